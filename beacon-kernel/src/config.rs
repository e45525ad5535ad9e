use crate::batch::{BatchConfig, OverflowPolicy};
use crate::error::{KernelError, KernelResult};
use crate::mac::IdPrefix;
use crate::registry::RegistryLayout;
use crate::sink::{InfluxSettings, DEFAULT_MEASUREMENT};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{error, warn};

pub const CONFIG_ENV: &str = "BEACON_KERNEL_CONFIG";
pub const INFLUX_TOKEN_ENV: &str = "BEACON_INFLUX_TOKEN";
pub const API_KEY_ENV: &str = "BEACON_API_KEY";

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct KernelConfig {
    pub server: ServerConf,
    pub batch: BatchConf,
    pub ownership: OwnershipConf,
    pub filter: FilterConf,
    pub registry: RegistryConf,
    pub sink: SinkConf,
    pub http: HttpConf,
    pub reporting: ReportingConf,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConf {
    pub bind: String,
    pub port: u16,
    pub max_connections: Option<usize>, // None = illimité
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BatchConf {
    pub max_batch_size: usize,
    pub flush_interval_ms: u64,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct OwnershipConf {
    pub stale_window_secs: u64,
    pub eviction_factor: u32,        // 0 = pas d'éviction
    pub eviction_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct FilterConf {
    pub id_prefix: Option<String>, // ex: "0x00C0B1"
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RegistryConf {
    pub path: String,
    #[serde(flatten)]
    pub layout: RegistryLayout,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Influx,
    Log,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SinkConf {
    pub kind: SinkKind,
    pub measurement: String,
    pub influx: InfluxConf,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct InfluxConf {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
    pub timeout_secs: u64,
    pub retention: String, // utilisé par beacon-bucket-init, ex: "2d"
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HttpConf {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
    #[serde(skip)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ReportingConf {
    pub health_secs: u64,       // 0 = désactivé
    pub client_table_secs: u64, // 0 = désactivé
}

impl Default for ServerConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0".into(), port: 7001, max_connections: None }
    }
}

impl Default for BatchConf {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            flush_interval_ms: 10_000,
            queue_capacity: 1024,
            overflow: OverflowPolicy::Block,
        }
    }
}

impl Default for OwnershipConf {
    fn default() -> Self {
        Self { stale_window_secs: 10, eviction_factor: 6, eviction_interval_secs: 60 }
    }
}

impl Default for RegistryConf {
    fn default() -> Self {
        Self { path: "registry.yaml".into(), layout: RegistryLayout::default() }
    }
}

impl Default for SinkConf {
    fn default() -> Self {
        Self {
            kind: SinkKind::Influx,
            measurement: DEFAULT_MEASUREMENT.into(),
            influx: InfluxConf::default(),
        }
    }
}

impl Default for InfluxConf {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".into(),
            org: "beacon".into(),
            bucket: "beacon".into(),
            token: String::new(),
            timeout_secs: 5,
            retention: "2d".into(),
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { enabled: true, bind: "0.0.0.0".into(), port: 8080, api_key: None }
    }
}

impl Default for ReportingConf {
    fn default() -> Self {
        Self { health_secs: 30, client_table_secs: 0 }
    }
}

impl KernelConfig {
    pub fn stale_window(&self) -> Duration {
        Duration::from_secs(self.ownership.stale_window_secs)
    }

    /// Âge maximal d'un record avant éviction, None si désactivée
    pub fn eviction_max_age(&self) -> Option<Duration> {
        match self.ownership.eviction_factor {
            0 => None,
            f => self.stale_window().checked_mul(f),
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            max_batch_size: self.batch.max_batch_size.max(1),
            flush_interval: Duration::from_millis(self.batch.flush_interval_ms.max(1)),
            queue_capacity: self.batch.queue_capacity.max(1),
            overflow: self.batch.overflow,
            measurement: self.sink.measurement.clone(),
        }
    }

    pub fn id_prefix(&self) -> KernelResult<Option<IdPrefix>> {
        self.filter.id_prefix.as_deref().map(IdPrefix::parse).transpose()
    }

    pub fn influx_settings(&self) -> InfluxSettings {
        let i = &self.sink.influx;
        InfluxSettings {
            url: i.url.clone(),
            org: i.org.clone(),
            bucket: i.bucket.clone(),
            token: i.token.clone(),
            timeout: Duration::from_secs(i.timeout_secs.max(1)),
        }
    }

    pub fn parse(txt: &str) -> KernelResult<Self> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Self = serde_yaml::from_str(txt)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> KernelResult<()> {
        if self.ownership.stale_window_secs == 0 {
            return Err(KernelError::Config("ownership.stale_window_secs must be > 0".into()));
        }
        if self.ownership.eviction_factor > 0 && self.eviction_max_age().is_none() {
            return Err(KernelError::Config(
                "ownership.stale_window_secs * eviction_factor overflows".into(),
            ));
        }
        if self.server.max_connections == Some(0) {
            return Err(KernelError::Config("server.max_connections must be > 0".into()));
        }
        self.id_prefix()?;
        Ok(())
    }

    /// Les secrets viennent de l'environnement et écrasent le fichier
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var(INFLUX_TOKEN_ENV) {
            if !token.is_empty() {
                self.sink.influx.token = token;
            }
        }
        self.http.api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
    }
}

pub async fn load_config_from<P: AsRef<Path>>(path: P) -> KernelConfig {
    let path = path.as_ref();
    let mut cfg = if path.exists() {
        let txt = fs::read_to_string(path).await.unwrap_or_default();
        KernelConfig::parse(&txt).unwrap_or_else(|e| {
            error!(path = %path.display(), error = %e, "invalid config, using defaults");
            KernelConfig::default()
        })
    } else {
        warn!(path = %path.display(), "no config file, using defaults");
        KernelConfig::default()
    };
    cfg.apply_env();
    cfg
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "beacon.yaml".into());
    load_config_from(path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = KernelConfig::default();
        assert_eq!(cfg.server.port, 7001);
        assert_eq!(cfg.batch.max_batch_size, 10);
        assert_eq!(cfg.stale_window(), Duration::from_secs(10));
        assert_eq!(cfg.eviction_max_age(), Some(Duration::from_secs(60)));
        assert_eq!(cfg.registry.layout.gateway_collections, vec!["scanner".to_string()]);
        assert_eq!(cfg.sink.kind, SinkKind::Influx);
        assert!(cfg.id_prefix().unwrap().is_none());
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(KernelConfig::parse("  \n").unwrap(), KernelConfig::default());
    }

    #[test]
    fn test_partial_yaml() {
        let cfg = KernelConfig::parse(
            r#"
server:
  port: 7100
  max_connections: 64
batch:
  max_batch_size: 50
  overflow: drop_newest
filter:
  id_prefix: "0x00C0B1"
registry:
  path: /etc/beacon/registry.yaml
  gateway_collections: [gateways]
sink:
  kind: log
ownership:
  eviction_factor: 0
"#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 7100);
        assert_eq!(cfg.server.bind, "0.0.0.0");
        assert_eq!(cfg.server.max_connections, Some(64));
        assert_eq!(cfg.batch_config().max_batch_size, 50);
        assert_eq!(cfg.batch_config().overflow, OverflowPolicy::DropNewest);
        assert_eq!(cfg.batch_config().flush_interval, Duration::from_secs(10));
        assert!(cfg.id_prefix().unwrap().unwrap().matches("00:C0:B1:AA:BB:CC"));
        assert_eq!(cfg.registry.path, "/etc/beacon/registry.yaml");
        assert_eq!(cfg.registry.layout.gateway_collections, vec!["gateways".to_string()]);
        assert_eq!(cfg.registry.layout.id_field, "mac");
        assert_eq!(cfg.sink.kind, SinkKind::Log);
        assert_eq!(cfg.eviction_max_age(), None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(KernelConfig::parse("ownership:\n  stale_window_secs: 0\n").is_err());
        assert!(KernelConfig::parse("filter:\n  id_prefix: \"xyz\"\n").is_err());
        assert!(KernelConfig::parse("server:\n  max_connections: 0\n").is_err());
        assert!(KernelConfig::parse("server: [1, 2]").is_err());
    }

    #[test]
    fn test_eviction_overflow_rejected() {
        let huge = "ownership:\n  stale_window_secs: 9223372036854775807\n";
        assert!(matches!(KernelConfig::parse(huge), Err(KernelError::Config(_))));

        let cfg = KernelConfig {
            ownership: OwnershipConf {
                stale_window_secs: u64::MAX,
                eviction_factor: 6,
                eviction_interval_secs: 60,
            },
            ..Default::default()
        };
        assert_eq!(cfg.eviction_max_age(), None);

        // sans éviction, une grande fenêtre reste acceptée
        let no_sweep = "ownership:\n  stale_window_secs: 9223372036854775807\n  eviction_factor: 0\n";
        assert!(KernelConfig::parse(no_sweep).is_ok());
    }

    #[tokio::test]
    async fn test_load_invalid_file_falls_back() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"server: {port: \"not a port\"}").unwrap();
        let cfg = load_config_from(f.path()).await;
        assert_eq!(cfg.server.port, 7001);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_default() {
        let cfg = load_config_from("/nonexistent/beacon.yaml").await;
        assert_eq!(cfg.batch.max_batch_size, 10);
    }
}
