/**
 * SINK - Écriture des observations retenues dans la base time-series
 *
 * - Sink trait = interface commune (InfluxDB, logs, stubs de test)
 * - Point = mesure + tags + champs + horodatage (nanosecondes)
 * - InfluxSink = API HTTP v2 `/api/v2/write` en line protocol
 */

use crate::error::{KernelError, KernelResult};
use crate::models::Observation;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info};

pub const DEFAULT_MEASUREMENT: &str = "beacon";
pub const TAG_GATEWAY: &str = "gateway_mac";
pub const TAG_BEACON: &str = "beacon_mac";
pub const TAG_SOURCE: &str = "ip";
pub const FIELD_RSSI: &str = "rssi";

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: OffsetDateTime,
}

impl Point {
    pub fn from_observation(measurement: &str, obs: &Observation) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert(TAG_GATEWAY.to_string(), obs.gateway_id.clone());
        tags.insert(TAG_BEACON.to_string(), obs.beacon_id.clone());
        tags.insert(TAG_SOURCE.to_string(), obs.source_address.to_string());

        let mut fields = BTreeMap::new();
        fields.insert(FIELD_RSSI.to_string(), FieldValue::Integer(obs.signal_strength as i64));

        Self {
            measurement: measurement.to_string(),
            tags,
            fields,
            timestamp: obs.observed_at,
        }
    }

    /// Encodage InfluxDB line protocol, précision nanoseconde
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);
        for (k, v) in &self.tags {
            let _ = write!(line, ",{}={}", escape(k, &[',', '=', ' ']), escape(v, &[',', '=', ' ']));
        }
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    FieldValue::Integer(i) => format!("{}i", i),
                    FieldValue::Float(f) => format!("{}", f),
                };
                format!("{}={}", escape(k, &[',', '=', ' ']), value)
            })
            .collect();
        let _ = write!(line, " {} {}", fields.join(","), self.timestamp.unix_timestamp_nanos());
        line
    }
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Destination des lots ; une erreur = lot perdu (pas de redelivery)
#[async_trait]
pub trait Sink: Send + Sync {
    async fn write(&self, points: &[Point]) -> KernelResult<()>;
}

/// Sink sans base : journalise chaque point (mode dev)
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    async fn write(&self, points: &[Point]) -> KernelResult<()> {
        for p in points {
            info!(point = %p.to_line_protocol(), "save");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InfluxSettings {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
    pub timeout: Duration,
}

pub struct InfluxSink {
    client: reqwest::Client,
    write_url: String,
    settings: InfluxSettings,
}

impl InfluxSink {
    pub fn new(settings: InfluxSettings) -> KernelResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| KernelError::Config(format!("influx client: {e}")))?;
        let write_url = format!("{}/api/v2/write", settings.url.trim_end_matches('/'));
        Ok(Self { client, write_url, settings })
    }
}

#[async_trait]
impl Sink for InfluxSink {
    async fn write(&self, points: &[Point]) -> KernelResult<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = points
            .iter()
            .map(Point::to_line_protocol)
            .collect::<Vec<_>>()
            .join("\n");

        let response = self
            .client
            .post(&self.write_url)
            .query(&[
                ("org", self.settings.org.as_str()),
                ("bucket", self.settings.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.settings.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|e| KernelError::SinkUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(KernelError::SinkUnavailable(format!("{}: {}", status, detail.trim())));
        }
        debug!(points = points.len(), "influx write ok");
        Ok(())
    }
}
