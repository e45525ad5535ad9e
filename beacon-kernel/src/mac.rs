//! Identifiants MAC canoniques : `0x00c0b1aabbcc` -> `00:C0:B1:AA:BB:CC`

use crate::error::{KernelError, KernelResult};

const MAC_HEX_LEN: usize = 12;

fn strip_hex_prefix(raw: &str) -> &str {
    raw.strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw)
}

/// Normalise un identifiant brut en `AA:BB:CC:DD:EE:FF`
pub fn normalize(raw: &str) -> KernelResult<String> {
    let hex = strip_hex_prefix(raw.trim());
    if hex.len() != MAC_HEX_LEN || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(KernelError::InvalidIdentifier(raw.to_string()));
    }

    let mut out = String::with_capacity(17);
    for (i, pair) in hex.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(':');
        }
        for b in pair {
            out.push(b.to_ascii_uppercase() as char);
        }
    }
    Ok(out)
}

/// Filtre de préfixe organisation, accepte `0x00C0B1` comme `00:C0:B1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdPrefix {
    hex: String,
}

impl IdPrefix {
    pub fn parse(raw: &str) -> KernelResult<Self> {
        let hex: String = strip_hex_prefix(raw.trim())
            .chars()
            .filter(|c| *c != ':')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        if hex.is_empty() || hex.len() > MAC_HEX_LEN || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(KernelError::InvalidIdentifier(raw.to_string()));
        }
        Ok(Self { hex })
    }

    /// `canonical` doit déjà être normalisé
    pub fn matches(&self, canonical: &str) -> bool {
        canonical
            .chars()
            .filter(|c| *c != ':')
            .take(self.hex.len())
            .eq(self.hex.chars())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_with_prefix() {
        assert_eq!(normalize("0x00c0b1aabbcc").unwrap(), "00:C0:B1:AA:BB:CC");
    }

    #[test]
    fn test_normalize_without_prefix() {
        assert_eq!(normalize("a1b2c3d4e5f6").unwrap(), "A1:B2:C3:D4:E5:F6");
        assert_eq!(normalize("0XA1B2C3D4E5F6").unwrap(), "A1:B2:C3:D4:E5:F6");
    }

    #[test]
    fn test_normalize_rejects_bad_length() {
        assert!(matches!(normalize("abc"), Err(KernelError::InvalidIdentifier(_))));
        assert!(normalize("0x00c0b1aabbccdd").is_err());
        assert!(normalize("").is_err());
        assert!(normalize("0x").is_err());
    }

    #[test]
    fn test_normalize_rejects_non_hex() {
        assert!(normalize("00c0b1aabbzz").is_err());
        assert!(normalize("00:C0:B1:AA").is_err());
    }

    #[test]
    fn test_prefix_matches_both_notations() {
        let raw = IdPrefix::parse("0x00C0B1").unwrap();
        let canonical = IdPrefix::parse("00:c0:b1").unwrap();
        assert_eq!(raw, canonical);
        assert!(raw.matches("00:C0:B1:AA:BB:CC"));
        assert!(!raw.matches("00:C0:B2:AA:BB:CC"));
    }

    #[test]
    fn test_prefix_rejects_garbage() {
        assert!(IdPrefix::parse("").is_err());
        assert!(IdPrefix::parse("0xZZ").is_err());
    }
}
