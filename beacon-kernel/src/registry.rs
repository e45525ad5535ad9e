/**
 * REGISTRY - Source des identifiants connus, lue une seule fois au démarrage
 *
 * Le registre expose des collections de documents ; chaque document porte un
 * attribut identifiant (`mac` par défaut). Les collections gateway remplissent
 * l'ensemble gateways, les collections beacon l'ensemble beacons, et une
 * collection dédiée amorce le cache négatif.
 */

use crate::error::{KernelError, KernelResult};
use crate::identity::IdentitySets;
use crate::mac::normalize;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

#[async_trait]
pub trait Registry: Send + Sync {
    async fn fetch_collection(&self, name: &str) -> KernelResult<Vec<serde_json::Value>>;
}

/// Collections à lire et attribut identifiant
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryLayout {
    pub id_field: String,
    pub gateway_collections: Vec<String>,
    pub beacon_collections: Vec<String>,
    pub unregistered_collection: Option<String>,
}

impl Default for RegistryLayout {
    fn default() -> Self {
        Self {
            id_field: "mac".into(),
            gateway_collections: vec!["scanner".into()],
            beacon_collections: vec!["vehicle".into(), "worker".into(), "heartbit".into()],
            unregistered_collection: Some("unregisteredDevice".into()),
        }
    }
}

/// Registre fichier (YAML ou JSON) : `{ collection: [ {mac: ...}, ... ] }`
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    async fn load(&self) -> KernelResult<HashMap<String, Vec<serde_json::Value>>> {
        let txt = fs::read_to_string(&self.path).await.map_err(|e| {
            KernelError::Registry(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        if txt.trim().is_empty() {
            return Ok(HashMap::new());
        }
        // YAML est un sur-ensemble de JSON
        Ok(serde_yaml::from_str(&txt)?)
    }
}

#[async_trait]
impl Registry for FileRegistry {
    async fn fetch_collection(&self, name: &str) -> KernelResult<Vec<serde_json::Value>> {
        let mut all = self.load().await?;
        all.remove(name)
            .ok_or_else(|| KernelError::Registry(format!("collection not found: {}", name)))
    }
}

/// Identifiant canonique d'un document ; un id non normalisable est gardé en majuscules
fn document_id(doc: &serde_json::Value, id_field: &str) -> Option<String> {
    let raw = doc.get(id_field)?.as_str()?.trim();
    if raw.is_empty() {
        return None;
    }
    Some(normalize(raw).unwrap_or_else(|_| raw.to_uppercase()))
}

async fn collect_ids(
    registry: &dyn Registry,
    collections: &[String],
    id_field: &str,
    into: &mut HashSet<String>,
) {
    for name in collections {
        match registry.fetch_collection(name).await {
            Ok(docs) => into.extend(docs.iter().filter_map(|d| document_id(d, id_field))),
            Err(e) => warn!(collection = %name, error = %e, "registry find failed"),
        }
    }
}

/// Charge les trois ensembles ; une collection en échec est ignorée (deny by default)
pub async fn load_identity_sets(registry: &dyn Registry, layout: &RegistryLayout) -> IdentitySets {
    let mut sets = IdentitySets::default();
    collect_ids(registry, &layout.gateway_collections, &layout.id_field, &mut sets.gateways).await;
    collect_ids(registry, &layout.beacon_collections, &layout.id_field, &mut sets.beacons).await;
    if let Some(unregistered) = &layout.unregistered_collection {
        collect_ids(
            registry,
            std::slice::from_ref(unregistered),
            &layout.id_field,
            &mut sets.unregistered,
        )
        .await;
    }
    // un id connu ne reste pas dans le cache négatif
    let IdentitySets { gateways, beacons, unregistered } = &mut sets;
    unregistered.retain(|id| !gateways.contains(id) && !beacons.contains(id));

    info!(
        gateways = sets.gateways.len(),
        beacons = sets.beacons.len(),
        unregistered = sets.unregistered.len(),
        "loaded {} gateway, {} beacon, {} unregistered ids",
        sets.gateways.len(),
        sets.beacons.len(),
        sets.unregistered.len()
    );
    sets
}
