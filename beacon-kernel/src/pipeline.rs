/**
 * PIPELINE - Contexte unique partagé par toutes les connexions
 *
 * ligne -> décodage -> validation identité -> arbitrage ownership -> file de batch
 *
 * Pas d'état global : chaque composant est construit une fois et passé ici,
 * ce qui permet de tester l'arbitrage sans setup process-wide.
 */

use crate::batch::{spawn_flusher, BatchQueue};
use crate::clients::ClientTable;
use crate::config::KernelConfig;
use crate::error::KernelResult;
use crate::health::HealthTracker;
use crate::identity::IdentityValidator;
use crate::mac::IdPrefix;
use crate::models::Observation;
use crate::ownership::OwnershipArbitrator;
use crate::protocol::{decode_line, ConnectionContext, Decoded};
use crate::sink::Sink;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Sort d'une ligne reçue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Control,
    Malformed,
    Unregistered,
    NotOwner,
    Enqueued,
    /// Accepté par l'arbitrage mais non mis en file (file pleine ou fermée)
    Dropped,
}

#[derive(Clone)]
pub struct PipelineContext {
    pub validator: Arc<IdentityValidator>,
    pub arbitrator: Arc<OwnershipArbitrator>,
    pub queue: BatchQueue,
    pub health: HealthTracker,
    pub clients: ClientTable,
    pub prefix: Option<IdPrefix>,
}

impl PipelineContext {
    /// Assemble les composants depuis la config et démarre le flusher
    pub fn build(
        cfg: &KernelConfig,
        validator: IdentityValidator,
        sink: Arc<dyn Sink>,
        health: HealthTracker,
    ) -> KernelResult<(Self, JoinHandle<()>)> {
        let prefix = cfg.id_prefix()?;
        let (queue, flusher) = spawn_flusher(cfg.batch_config(), sink, health.clone());
        let ctx = Self {
            validator: Arc::new(validator),
            arbitrator: Arc::new(OwnershipArbitrator::new(cfg.stale_window())),
            queue,
            health,
            clients: ClientTable::new(),
            prefix,
        };
        Ok((ctx, flusher))
    }

    pub fn connection_context(&self, peer: IpAddr) -> ConnectionContext {
        ConnectionContext::new(peer, self.prefix.clone())
    }

    pub async fn handle_line(&self, line: &str, conn: &mut ConnectionContext, peer: IpAddr) -> LineOutcome {
        self.health.record_line();
        match decode_line(line, conn) {
            Decoded::Control => LineOutcome::Control,
            Decoded::Discarded => {
                self.health.record_malformed();
                LineOutcome::Malformed
            }
            Decoded::Observation(obs) => {
                self.clients.touch(peer, &obs.beacon_id);
                self.submit(obs).await
            }
        }
    }

    /// Validation + arbitrage + mise en file d'une observation déjà décodée
    pub async fn submit(&self, obs: Observation) -> LineOutcome {
        if !self.validator.admit(&obs) {
            self.health.record_unregistered();
            return LineOutcome::Unregistered;
        }

        if !self.arbitrator.try_claim(&obs) {
            self.health.record_arbitration_rejected();
            return LineOutcome::NotOwner;
        }

        self.health.record_accepted();
        debug!(gateway = %obs.gateway_id, beacon = %obs.beacon_id, rssi = obs.signal_strength, "owner");
        if self.queue.push(obs).await {
            LineOutcome::Enqueued
        } else {
            LineOutcome::Dropped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{spawn_flusher, BatchConfig};
    use crate::identity::IdentitySets;
    use crate::ownership::DEFAULT_STALE_WINDOW;
    use crate::sink::LogSink;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    const G1: &str = "0x00c0b1000001";
    const B1: &str = "0x00c0b1aabbcc";

    fn context() -> PipelineContext {
        let sets = IdentitySets {
            gateways: ["00:C0:B1:00:00:01".to_string()].into_iter().collect(),
            beacons: ["00:C0:B1:AA:BB:CC".to_string()].into_iter().collect(),
            unregistered: Default::default(),
        };
        let health = HealthTracker::new();
        let config = BatchConfig {
            flush_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let (queue, _) = spawn_flusher(config, Arc::new(LogSink), health.clone());
        PipelineContext {
            validator: Arc::new(IdentityValidator::new(sets)),
            arbitrator: Arc::new(OwnershipArbitrator::new(DEFAULT_STALE_WINDOW)),
            queue,
            health,
            clients: ClientTable::new(),
            prefix: None,
        }
    }

    #[tokio::test]
    async fn test_line_outcomes() {
        let ctx = context();
        let peer = IpAddr::V4(Ipv4Addr::LOCALHOST);
        ctx.clients.connected(peer);
        let mut conn = ctx.connection_context(peer);

        assert_eq!(ctx.handle_line("PROXY TCP4 10.1.1.1 10.1.1.2 1 2", &mut conn, peer).await, LineOutcome::Control);
        assert_eq!(ctx.handle_line("garbage", &mut conn, peer).await, LineOutcome::Malformed);
        assert_eq!(
            ctx.handle_line(&format!("x,{B1},-70,y,0x112233445566"), &mut conn, peer).await,
            LineOutcome::Unregistered
        );
        assert_eq!(ctx.handle_line(&format!("x,{B1},-70,y,{G1}"), &mut conn, peer).await, LineOutcome::Enqueued);

        let snap = ctx.health.snapshot();
        assert_eq!(snap.lines_received, 4);
        assert_eq!(snap.malformed_lines, 1);
        assert_eq!(snap.unregistered_rejected, 1);
        assert_eq!(snap.accepted, 1);
        assert_eq!(ctx.clients.views()[0].last_beacon.as_deref(), Some("00:C0:B1:AA:BB:CC"));
    }

    #[tokio::test]
    async fn test_build_from_config() {
        let cfg = KernelConfig::parse("filter:\n  id_prefix: \"0x00C0B1\"\nownership:\n  stale_window_secs: 3\n").unwrap();
        let health = HealthTracker::new();
        let (ctx, _flusher) =
            PipelineContext::build(&cfg, IdentityValidator::new(IdentitySets::default()), Arc::new(LogSink), health)
                .unwrap();
        assert_eq!(ctx.arbitrator.stale_window(), Duration::from_secs(3));

        let peer = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let mut conn = ctx.connection_context(peer);
        // hors préfixe : écarté avant la validation
        assert_eq!(
            ctx.handle_line("x,0x112233445566,-70,y,0x00c0b1000001", &mut conn, peer).await,
            LineOutcome::Malformed
        );
        assert_eq!(
            ctx.handle_line(&format!("x,{B1},-70,y,{G1}"), &mut conn, peer).await,
            LineOutcome::Unregistered
        );
    }

    #[tokio::test]
    async fn test_proxy_line_updates_connection() {
        let ctx = context();
        let peer = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let mut conn = ctx.connection_context(peer);
        ctx.handle_line("PROXY TCP4 10.1.1.1 10.1.1.2 1 2", &mut conn, peer).await;
        assert_eq!(conn.source_address, "10.1.1.1".parse::<IpAddr>().unwrap());
    }
}
