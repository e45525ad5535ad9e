/**
 * OWNERSHIP ARBITRATOR - Quel gateway fait autorité pour chaque beacon
 *
 * RÈGLES (évaluées sous un seul verrou, section critique O(1)) :
 * 1. pas de record, ou record plus vieux que la fenêtre stale -> accepté
 * 2. signal strictement plus fort, ou même gateway que le propriétaire -> accepté
 * 3. sinon rejeté
 *
 * La règle 1 évite qu'un beacon reste collé à un gateway muet ; l'auto-refresh
 * de la règle 2 évite le flapping quand le propriétaire fluctue.
 */

use crate::models::Observation;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::debug;

pub const DEFAULT_STALE_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnershipRecord {
    pub owning_gateway_id: String,
    pub last_signal_strength: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub last_claim_at: OffsetDateTime,
}

pub struct OwnershipArbitrator {
    stale_window: time::Duration,
    records: Mutex<HashMap<String, OwnershipRecord>>,
}

impl OwnershipArbitrator {
    pub fn new(stale_window: Duration) -> Self {
        Self {
            stale_window: to_time(stale_window),
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn stale_window(&self) -> Duration {
        self.stale_window.unsigned_abs()
    }

    /// Arbitre une observation ; l'horloge de référence est `observed_at`
    pub fn try_claim(&self, obs: &Observation) -> bool {
        let now = obs.observed_at;
        let mut records = self.records.lock();

        let accepted = match records.get(&obs.beacon_id) {
            None => true,
            Some(r) if now - r.last_claim_at > self.stale_window => true,
            Some(r) => obs.signal_strength > r.last_signal_strength || obs.gateway_id == r.owning_gateway_id,
        };

        if accepted {
            records.insert(
                obs.beacon_id.clone(),
                OwnershipRecord {
                    owning_gateway_id: obs.gateway_id.clone(),
                    last_signal_strength: obs.signal_strength,
                    last_claim_at: now,
                },
            );
        }
        accepted
    }

    pub fn owner_of(&self, beacon_id: &str) -> Option<OwnershipRecord> {
        self.records.lock().get(beacon_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<(String, OwnershipRecord)> {
        let mut all: Vec<_> = self
            .records
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Supprime les records dont la dernière revendication dépasse `max_age`
    pub fn evict_older_than(&self, now: OffsetDateTime, max_age: Duration) -> usize {
        let max_age = to_time(max_age);
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, r| now - r.last_claim_at <= max_age);
        before - records.len()
    }
}

/// Balayage périodique des records abandonnés (horloge murale)
pub fn spawn_eviction_sweep(
    arbitrator: Arc<OwnershipArbitrator>,
    max_age: Duration,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every.max(Duration::from_millis(1)));
        interval.tick().await;
        loop {
            interval.tick().await;
            let evicted = arbitrator.evict_older_than(OffsetDateTime::now_utc(), max_age);
            if evicted > 0 {
                debug!(evicted, remaining = arbitrator.len(), "ownership records evicted");
            }
        }
    })
}

fn to_time(d: Duration) -> time::Duration {
    time::Duration::try_from(d).unwrap_or(time::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    const G1: &str = "00:C0:B1:00:00:01";
    const G2: &str = "00:C0:B1:00:00:02";
    const B1: &str = "00:C0:B1:AA:BB:CC";

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000 + secs).unwrap()
    }

    fn obs(gateway: &str, rssi: i32, t: OffsetDateTime) -> Observation {
        Observation {
            gateway_id: gateway.to_string(),
            beacon_id: B1.to_string(),
            signal_strength: rssi,
            observed_at: t,
            source_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }

    fn arbitrator() -> OwnershipArbitrator {
        OwnershipArbitrator::new(DEFAULT_STALE_WINDOW)
    }

    #[test]
    fn test_first_observation_wins() {
        let a = arbitrator();
        assert!(a.try_claim(&obs(G1, -99, at(0))));
        assert_eq!(a.owner_of(B1).unwrap().owning_gateway_id, G1);
    }

    #[test]
    fn test_stale_record_is_superseded_by_weaker() {
        let a = arbitrator();
        assert!(a.try_claim(&obs(G1, -40, at(0))));
        assert!(a.try_claim(&obs(G2, -95, at(11))));
        let r = a.owner_of(B1).unwrap();
        assert_eq!(r.owning_gateway_id, G2);
        assert_eq!(r.last_signal_strength, -95);
    }

    #[test]
    fn test_exactly_stale_window_is_still_fresh() {
        let a = arbitrator();
        assert!(a.try_claim(&obs(G1, -40, at(0))));
        assert!(!a.try_claim(&obs(G2, -95, at(10))));
    }

    #[test]
    fn test_incumbent_self_refresh_when_weaker() {
        let a = arbitrator();
        assert!(a.try_claim(&obs(G1, -80, at(0))));
        assert!(a.try_claim(&obs(G1, -90, at(3))));
        let r = a.owner_of(B1).unwrap();
        assert_eq!(r.last_signal_strength, -90);
        assert_eq!(r.last_claim_at, at(3));
    }

    #[test]
    fn test_competitor_must_be_strictly_stronger() {
        let a = arbitrator();
        assert!(a.try_claim(&obs(G1, -70, at(0))));
        assert!(!a.try_claim(&obs(G2, -70, at(1))));
        assert!(!a.try_claim(&obs(G2, -75, at(1))));
        assert!(a.try_claim(&obs(G2, -69, at(2))));
        assert_eq!(a.owner_of(B1).unwrap().owning_gateway_id, G2);
    }

    #[test]
    fn test_rejection_leaves_record_untouched() {
        let a = arbitrator();
        assert!(a.try_claim(&obs(G1, -70, at(0))));
        assert!(!a.try_claim(&obs(G2, -80, at(5))));
        assert_eq!(a.owner_of(B1).unwrap().last_claim_at, at(0));
    }

    #[test]
    fn test_ownership_scenario() {
        let a = arbitrator();
        assert!(a.try_claim(&obs(G1, -70, at(0))));
        assert!(a.try_claim(&obs(G2, -60, at(1))));
        assert!(!a.try_claim(&obs(G1, -75, at(2))));
        assert_eq!(a.owner_of(B1).unwrap().owning_gateway_id, G2);
        assert!(a.try_claim(&obs(G1, -90, at(12))));
        assert_eq!(a.owner_of(B1).unwrap().owning_gateway_id, G1);
    }

    #[test]
    fn test_beacons_are_independent() {
        let a = arbitrator();
        let mut other = obs(G2, -99, at(0));
        other.beacon_id = "00:C0:B1:AA:BB:DD".into();
        assert!(a.try_claim(&obs(G1, -40, at(0))));
        assert!(a.try_claim(&other));
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_eviction_sweep() {
        let a = arbitrator();
        let mut other = obs(G2, -50, at(50));
        other.beacon_id = "00:C0:B1:AA:BB:DD".into();
        assert!(a.try_claim(&obs(G1, -40, at(0))));
        assert!(a.try_claim(&other));

        let evicted = a.evict_older_than(at(70), Duration::from_secs(60));
        assert_eq!(evicted, 1);
        assert!(a.owner_of(B1).is_none());
        assert_eq!(a.len(), 1);
    }

    #[tokio::test]
    async fn test_eviction_sweep_task() {
        let a = Arc::new(arbitrator());
        let old = OffsetDateTime::now_utc() - time::Duration::seconds(120);
        assert!(a.try_claim(&obs(G1, -40, old)));
        let handle = spawn_eviction_sweep(a.clone(), Duration::from_secs(60), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(a.is_empty());
        handle.abort();
    }

    #[test]
    fn test_concurrent_claims_keep_one_record() {
        let a = Arc::new(arbitrator());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let a = a.clone();
                std::thread::spawn(move || {
                    let gw = format!("00:C0:B1:00:00:{:02X}", i);
                    for n in 0..100 {
                        a.try_claim(&obs(&gw, -100 + n, at(0)));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(a.len(), 1);
        assert_eq!(a.owner_of(B1).unwrap().last_signal_strength, -1);
    }
}
