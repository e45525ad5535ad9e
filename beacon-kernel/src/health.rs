use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task;
use tracing::info;

/// Compteurs du pipeline exposés sur /health et dans les logs
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub memory_usage_mb: f32,
    pub active_connections: u64,
    pub lines_received: u64,
    pub malformed_lines: u64,
    pub unregistered_rejected: u64,
    pub arbitration_rejected: u64,
    pub accepted: u64,
    pub flushed_points: u64,
    pub sink_failures: u64,
    pub overflow_drops: u64,
}

#[derive(Default)]
struct Counters {
    active_connections: AtomicU64,
    lines_received: AtomicU64,
    malformed_lines: AtomicU64,
    unregistered_rejected: AtomicU64,
    arbitration_rejected: AtomicU64,
    accepted: AtomicU64,
    flushed_points: AtomicU64,
    sink_failures: AtomicU64,
    overflow_drops: AtomicU64,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    counters: Arc<Counters>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn connection_opened(&self) {
        self.counters.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.counters.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_line(&self) {
        self.counters.lines_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.counters.malformed_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unregistered(&self) {
        self.counters.unregistered_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_arbitration_rejected(&self) {
        self.counters.arbitration_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flushed(&self, points: usize) {
        self.counters.flushed_points.fetch_add(points as u64, Ordering::Relaxed);
    }

    pub fn record_sink_failure(&self) {
        self.counters.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflow_drop(&self) {
        self.counters.overflow_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> KernelHealth {
        let c = &self.counters;
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            memory_usage_mb: get_memory_usage_mb(),
            active_connections: c.active_connections.load(Ordering::Relaxed),
            lines_received: c.lines_received.load(Ordering::Relaxed),
            malformed_lines: c.malformed_lines.load(Ordering::Relaxed),
            unregistered_rejected: c.unregistered_rejected.load(Ordering::Relaxed),
            arbitration_rejected: c.arbitration_rejected.load(Ordering::Relaxed),
            accepted: c.accepted.load(Ordering::Relaxed),
            flushed_points: c.flushed_points.load(Ordering::Relaxed),
            sink_failures: c.sink_failures.load(Ordering::Relaxed),
            overflow_drops: c.overflow_drops.load(Ordering::Relaxed),
        }
    }

    /// Démarre la publication périodique du health dans les logs
    pub fn spawn_health_reporter(&self, every: Duration) {
        let tracker = self.clone();
        task::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let h = tracker.snapshot();
                info!(
                    uptime = h.uptime_seconds,
                    connections = h.active_connections,
                    lines = h.lines_received,
                    accepted = h.accepted,
                    flushed = h.flushed_points,
                    sink_failures = h.sink_failures,
                    memory_mb = h.memory_usage_mb,
                    "kernel health"
                );
            }
        });
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    if let Some(kb) = rest.split_whitespace().next().and_then(|v| v.parse::<u64>().ok()) {
                        return (kb as f32) / 1024.0; // KB -> MB
                    }
                }
            }
        }
    }

    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let h = HealthTracker::new();
        h.connection_opened();
        h.connection_opened();
        h.connection_closed();
        h.record_line();
        h.record_line();
        h.record_malformed();
        h.record_accepted();
        h.record_flushed(7);
        h.record_sink_failure();

        let snap = h.snapshot();
        assert_eq!(snap.active_connections, 1);
        assert_eq!(snap.lines_received, 2);
        assert_eq!(snap.malformed_lines, 1);
        assert_eq!(snap.accepted, 1);
        assert_eq!(snap.flushed_points, 7);
        assert_eq!(snap.sink_failures, 1);
        assert_eq!(snap.overflow_drops, 0);
    }

    #[test]
    fn test_clones_share_counters() {
        let h = HealthTracker::new();
        let other = h.clone();
        other.record_unregistered();
        assert_eq!(h.snapshot().unregistered_rejected, 1);
    }
}
