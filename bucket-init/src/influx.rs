// Client d'administration InfluxDB v2 : juste ce qu'il faut pour provisionner un bucket

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct Health {
    status: String,
}

#[derive(Debug, Deserialize)]
pub struct Org {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct Orgs {
    #[serde(default)]
    orgs: Vec<Org>,
}

#[derive(Debug, Deserialize)]
pub struct Bucket {
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct Buckets {
    #[serde(default)]
    buckets: Vec<Bucket>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct RetentionRule {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "everySeconds")]
    pub every_seconds: u64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct NewBucket {
    #[serde(rename = "orgID")]
    pub org_id: String,
    pub name: String,
    #[serde(rename = "retentionRules")]
    pub retention_rules: Vec<RetentionRule>,
}

impl NewBucket {
    pub fn expiring(org_id: &str, name: &str, retention: Duration) -> Self {
        Self {
            org_id: org_id.to_string(),
            name: name.to_string(),
            retention_rules: vec![RetentionRule {
                kind: "expire",
                every_seconds: retention.as_secs(),
            }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    AlreadyExists,
}

/// "2d", "48h", "1week"... ; une rétention nulle est refusée
pub fn parse_retention(raw: &str) -> Result<Duration> {
    let d = humantime::parse_duration(raw.trim()).with_context(|| format!("invalid retention '{raw}'"))?;
    if d.as_secs() == 0 {
        bail!("retention must be at least one second");
    }
    Ok(d)
}

pub struct InfluxAdmin {
    client: reqwest::Client,
    base: String,
    token: String,
}

impl InfluxAdmin {
    pub fn new(url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            base: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base, path))
            .header("Authorization", format!("Token {}", self.token))
    }

    pub async fn check_health(&self) -> Result<()> {
        let health: Health = self
            .get("/health")
            .send()
            .await
            .context("health request failed")?
            .json()
            .await
            .context("invalid health response")?;
        if health.status != "pass" {
            bail!("influxdb unhealthy: status {}", health.status);
        }
        Ok(())
    }

    pub async fn find_org(&self, name: &str) -> Result<Org> {
        let res = self
            .get("/api/v2/orgs")
            .query(&[("org", name)])
            .send()
            .await
            .context("org lookup failed")?
            .error_for_status()
            .with_context(|| format!("failed to find org '{name}'"))?;
        let orgs: Orgs = res.json().await.context("invalid orgs response")?;
        orgs.orgs
            .into_iter()
            .find(|o| o.name == name)
            .with_context(|| format!("org '{name}' not found"))
    }

    /// Buckets de l'org portant ce nom (filtré côté serveur, pas de pagination)
    pub async fn find_buckets(&self, org: &str, name: &str) -> Result<Vec<Bucket>> {
        let res = self
            .get("/api/v2/buckets")
            .query(&[("org", org), ("name", name)])
            .send()
            .await
            .context("bucket listing failed")?;
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let res = res.error_for_status().context("failed to retrieve buckets")?;
        let buckets: Buckets = res.json().await.context("invalid buckets response")?;
        Ok(buckets.buckets)
    }

    pub async fn create_bucket(&self, bucket: &NewBucket) -> Result<()> {
        self.client
            .post(format!("{}/api/v2/buckets", self.base))
            .header("Authorization", format!("Token {}", self.token))
            .json(bucket)
            .send()
            .await
            .context("bucket creation request failed")?
            .error_for_status()
            .context("failed to create bucket")?;
        Ok(())
    }

    /// health -> org -> buckets -> création si absent
    pub async fn ensure_bucket(&self, org: &str, bucket: &str, retention: Duration) -> Result<Provisioned> {
        self.check_health().await?;
        let org_info = self.find_org(org).await?;
        if self.find_buckets(org, bucket).await?.iter().any(|b| b.name == bucket) {
            return Ok(Provisioned::AlreadyExists);
        }
        self.create_bucket(&NewBucket::expiring(&org_info.id, bucket, retention)).await?;
        Ok(Provisioned::Created)
    }
}
