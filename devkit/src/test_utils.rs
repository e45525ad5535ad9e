/*!
Test Harness pour le kernel beacon

Démarre le pipeline complet (serveur TCP + validation + arbitrage + flusher)
sur 127.0.0.1:0 avec un RecordingSink, et fournit des attentes par polling.
*/

use crate::gateway_stub::GatewayStub;
use crate::sink_stub::RecordingSink;
use anyhow::Result;
use beacon_kernel::config::KernelConfig;
use beacon_kernel::health::HealthTracker;
use beacon_kernel::identity::{IdentitySets, IdentityValidator, UnregisteredDevice};
use beacon_kernel::mac::normalize;
use beacon_kernel::pipeline::PipelineContext;
use beacon_kernel::server::serve;
use beacon_kernel::sink::Point;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Ensembles connus à partir d'identifiants bruts (normalisés)
pub fn identity_sets(gateways: &[&str], beacons: &[&str]) -> Result<IdentitySets> {
    let mut sets = IdentitySets::default();
    for g in gateways {
        sets.gateways.insert(normalize(g)?);
    }
    for b in beacons {
        sets.beacons.insert(normalize(b)?);
    }
    Ok(sets)
}

pub struct TestHarness {
    pub addr: SocketAddr,
    pub ctx: PipelineContext,
    pub sink: RecordingSink,
    notifications: mpsc::UnboundedReceiver<UnregisteredDevice>,
    server: JoinHandle<()>,
}

impl TestHarness {
    pub async fn start(cfg: KernelConfig, sets: IdentitySets) -> Result<Self> {
        env_logger::try_init().ok(); // Init logging pour tests

        let sink = RecordingSink::new();
        let (tx, notifications) = mpsc::unbounded_channel();
        let validator = IdentityValidator::new(sets).with_notifier(tx);
        let (ctx, _flusher) = PipelineContext::build(&cfg, validator, Arc::new(sink.clone()), HealthTracker::new())?;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(serve(listener, ctx.clone(), cfg.server.max_connections));
        log::info!("harness listening on {}", addr);

        Ok(Self { addr, ctx, sink, notifications, server })
    }

    pub async fn gateway(&self) -> Result<GatewayStub> {
        GatewayStub::connect(self.addr).await
    }

    /// Attend qu'au moins `count` points aient été écrits
    pub async fn wait_for_points(&self, count: usize, timeout_ms: u64) -> Result<Vec<Point>> {
        if self.wait_until(|| self.sink.point_count() >= count, timeout_ms).await {
            return Ok(self.sink.points());
        }
        anyhow::bail!(
            "timeout waiting for {} points, got {}",
            count,
            self.sink.point_count()
        )
    }

    /// Polling toutes les 20 ms jusqu'à `cond` ou expiration
    pub async fn wait_until<F: Fn() -> bool>(&self, cond: F, timeout_ms: u64) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        log::warn!("timeout after {} ms", timeout_ms);
        cond()
    }

    pub async fn next_unregistered(&mut self, timeout_ms: u64) -> Option<UnregisteredDevice> {
        tokio::time::timeout(Duration::from_millis(timeout_ms), self.notifications.recv())
            .await
            .ok()
            .flatten()
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.server.abort();
    }
}
