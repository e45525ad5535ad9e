//! Beacon kernel - ownership arbitration and batched ingestion of gateway reports
//!
//! Gateways stream `…,beacon,rssi,…,gateway` lines over TCP. Each line is
//! decoded, checked against the registry of known devices, arbitrated so that
//! only the owning gateway of a beacon is retained, then written in batches to
//! a time-series sink.

pub mod batch;
pub mod clients;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod identity;
pub mod mac;
pub mod models;
pub mod ownership;
pub mod pipeline;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod sink;

pub use config::{load_config, KernelConfig};
pub use error::{KernelError, KernelResult};
pub use models::{Observation, Role};
pub use ownership::OwnershipArbitrator;
pub use pipeline::{LineOutcome, PipelineContext};
pub use sink::{Point, Sink};
