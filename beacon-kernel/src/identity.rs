/**
 * IDENTITY VALIDATOR - Liste blanche des gateways/beacons + cache négatif
 *
 * RÔLE : Décide si un identifiant canonique est connu pour son rôle.
 * Les ensembles connus sont chargés une fois au démarrage (lecture seule ensuite).
 * Le cache négatif grossit à l'exécution : chaque inconnu n'est signalé qu'une fois.
 */

use crate::models::{Observation, Role};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::net::IpAddr;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Ensembles d'identifiants chargés depuis le registre
#[derive(Debug, Clone, Default)]
pub struct IdentitySets {
    pub gateways: HashSet<String>,
    pub beacons: HashSet<String>,
    pub unregistered: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Known,
    Unregistered,
}

/// Notification émise la première fois qu'un identifiant inconnu est vu
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnregisteredDevice {
    pub id: String,
    pub role: Role,
    pub source_address: Option<IpAddr>,
}

pub struct IdentityValidator {
    gateways: HashSet<String>,
    beacons: HashSet<String>,
    unregistered: Mutex<HashSet<String>>,
    notifier: Option<mpsc::UnboundedSender<UnregisteredDevice>>,
}

impl IdentityValidator {
    pub fn new(sets: IdentitySets) -> Self {
        let mut unregistered = sets.unregistered;
        unregistered.retain(|id| !sets.gateways.contains(id) && !sets.beacons.contains(id));
        Self {
            gateways: sets.gateways,
            beacons: sets.beacons,
            unregistered: Mutex::new(unregistered),
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: mpsc::UnboundedSender<UnregisteredDevice>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn classify(&self, id: &str, role: Role) -> Classification {
        self.classify_from(id, role, None)
    }

    /// Classe `id` ; `source` n'est utilisé que pour la notification
    pub fn classify_from(&self, id: &str, role: Role, source: Option<IpAddr>) -> Classification {
        let known = match role {
            Role::Gateway => &self.gateways,
            Role::Beacon => &self.beacons,
        };
        if known.contains(id) {
            return Classification::Known;
        }
        // connu sous l'autre rôle : refusé, mais ni caché ni signalé
        if self.gateways.contains(id) || self.beacons.contains(id) {
            return Classification::Unregistered;
        }

        let first_sighting = self.unregistered.lock().insert(id.to_string());
        if first_sighting {
            self.notify(UnregisteredDevice {
                id: id.to_string(),
                role,
                source_address: source,
            });
        }
        Classification::Unregistered
    }

    /// Gateway d'abord puis beacon, court-circuit au premier inconnu
    pub fn admit(&self, obs: &Observation) -> bool {
        self.classify_from(&obs.gateway_id, Role::Gateway, Some(obs.source_address)) == Classification::Known
            && self.classify_from(&obs.beacon_id, Role::Beacon, Some(obs.source_address)) == Classification::Known
    }

    pub fn is_unregistered(&self, id: &str) -> bool {
        self.unregistered.lock().contains(id)
    }

    fn notify(&self, device: UnregisteredDevice) {
        match &self.notifier {
            Some(tx) => {
                if tx.send(device).is_err() {
                    debug!("unregistered reporter is gone, notification dropped");
                }
            }
            None => info!(id = %device.id, role = device.role.as_str(), "unregistered device"),
        }
    }
}

/// Tâche qui journalise les nouveaux identifiants inconnus
pub fn spawn_unregistered_reporter(mut rx: mpsc::UnboundedReceiver<UnregisteredDevice>) {
    tokio::spawn(async move {
        while let Some(device) = rx.recv().await {
            match (device.role, device.source_address) {
                (Role::Gateway, Some(ip)) => {
                    warn!(id = %device.id, %ip, "unregistered gateway {} from {}", device.id, ip)
                }
                _ => info!(id = %device.id, role = device.role.as_str(), "unregistered {}", device.role.as_str()),
            }
        }
    });
}
