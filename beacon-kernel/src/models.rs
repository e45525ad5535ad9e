use serde::Serialize;
use std::net::IpAddr;
use time::OffsetDateTime;

/// Rapport décodé et validé : un gateway a entendu un beacon à une puissance donnée
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub gateway_id: String,
    pub beacon_id: String,
    pub signal_strength: i32, // RSSI en dBm, plus grand = plus fort
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
    pub source_address: IpAddr,
}

/// Rôle d'un identifiant dans le protocole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Gateway,
    Beacon,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Gateway => "gateway",
            Role::Beacon => "beacon",
        }
    }
}
