/**
 * PROTOCOLE LIGNE - Décodage des rapports envoyés par les gateways
 *
 * FORMAT :
 * - `PROXY <proto> <adresse> ...` : remplace l'adresse source de la connexion
 * - `f0,beacon,rssi,f3,gateway` : exactement 5 champs séparés par des virgules
 *
 * Toute autre ligne est ignorée sans bruit, les lignes mal formées sont attendues.
 */

use crate::mac::{normalize, IdPrefix};
use crate::models::Observation;
use std::net::IpAddr;
use time::OffsetDateTime;

const FIELD_DELIMITER: char = ',';
const FIELD_COUNT: usize = 5;
const BEACON_FIELD: usize = 1;
const RSSI_FIELD: usize = 2;
const GATEWAY_FIELD: usize = 4;
const PROXY_KEYWORD: &str = "PROXY";

/// État par connexion : adresse source effective et filtre optionnel
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub source_address: IpAddr,
    pub prefix: Option<IdPrefix>,
}

impl ConnectionContext {
    pub fn new(source_address: IpAddr, prefix: Option<IdPrefix>) -> Self {
        Self { source_address, prefix }
    }
}

/// Résultat du décodage d'une ligne
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Observation(Observation),
    /// Ligne PROXY consommée (adresse mise à jour ou non)
    Control,
    /// Ligne ignorée : mauvais nombre de champs, MAC invalide, hors préfixe
    Discarded,
}

/// Décode une ligne avec l'heure courante comme horodatage
pub fn decode_line(line: &str, ctx: &mut ConnectionContext) -> Decoded {
    decode_line_at(line, ctx, OffsetDateTime::now_utc())
}

pub fn decode_line_at(line: &str, ctx: &mut ConnectionContext, now: OffsetDateTime) -> Decoded {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(PROXY_KEYWORD) {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            if let Some(addr) = parse_proxy_address(rest) {
                ctx.source_address = addr;
            }
            return Decoded::Control;
        }
    }

    let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
    if fields.len() != FIELD_COUNT {
        return Decoded::Discarded;
    }

    let (beacon_id, gateway_id) = match (normalize(fields[BEACON_FIELD]), normalize(fields[GATEWAY_FIELD])) {
        (Ok(b), Ok(g)) => (b, g),
        _ => return Decoded::Discarded,
    };

    if let Some(prefix) = &ctx.prefix {
        if !prefix.matches(&beacon_id) || !prefix.matches(&gateway_id) {
            return Decoded::Discarded;
        }
    }

    Decoded::Observation(Observation {
        gateway_id,
        beacon_id,
        signal_strength: parse_signal(fields[RSSI_FIELD]),
        observed_at: now,
        source_address: ctx.source_address,
    })
}

/// `PROXY TCP4 10.0.0.5 10.0.0.1 56324 7001` -> 10.0.0.5
fn parse_proxy_address(rest: &str) -> Option<IpAddr> {
    let mut parts = rest.split_whitespace();
    let _proto = parts.next()?;
    parts.next()?.parse().ok()
}

/// Entier décimal en tête de champ, 0 si rien de numérique (ex: "-70dBm" -> -70)
pub fn parse_signal(raw: &str) -> i32 {
    let s = raw.trim();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return 0;
    }
    let value: i64 = digits[..end].parse().unwrap_or(0);
    let value = if negative { -value } else { value };
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}
