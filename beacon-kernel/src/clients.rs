use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub last_seen: OffsetDateTime,
    pub last_beacon: Option<String>,
    connections: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ClientView {
    pub ip: IpAddr,
    pub seconds_since_seen: i64,
    pub last_beacon: Option<String>,
}

/// Table des gateways connectés, indexée par IP (triée)
#[derive(Clone, Default)]
pub struct ClientTable {
    inner: Arc<Mutex<BTreeMap<IpAddr, ClientInfo>>>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected(&self, ip: IpAddr) {
        let mut map = self.inner.lock();
        let entry = map.entry(ip).or_insert_with(|| ClientInfo {
            last_seen: OffsetDateTime::now_utc(),
            last_beacon: None,
            connections: 0,
        });
        entry.connections += 1;
    }

    pub fn touch(&self, ip: IpAddr, beacon_id: &str) {
        if let Some(info) = self.inner.lock().get_mut(&ip) {
            info.last_seen = OffsetDateTime::now_utc();
            info.last_beacon = Some(beacon_id.to_string());
        }
    }

    /// L'entrée disparaît quand la dernière connexion de cette IP se ferme
    pub fn disconnected(&self, ip: IpAddr) {
        let mut map = self.inner.lock();
        if let Some(info) = map.get_mut(&ip) {
            info.connections = info.connections.saturating_sub(1);
            if info.connections == 0 {
                map.remove(&ip);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn views(&self) -> Vec<ClientView> {
        let now = OffsetDateTime::now_utc();
        self.inner
            .lock()
            .iter()
            .map(|(ip, info)| ClientView {
                ip: *ip,
                seconds_since_seen: (now - info.last_seen).whole_seconds().max(0),
                last_beacon: info.last_beacon.clone(),
            })
            .collect()
    }

    pub fn spawn_table_reporter(&self, every: Duration) {
        let table = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let views = table.views();
                if views.is_empty() {
                    info!("no clients connected");
                    continue;
                }
                for (i, v) in views.iter().enumerate() {
                    info!(
                        no = i + 1,
                        ip = %v.ip,
                        seen_secs_ago = v.seconds_since_seen,
                        last_beacon = v.last_beacon.as_deref().unwrap_or("-"),
                        "client"
                    );
                }
            }
        });
    }
}
