// beacon-bucket-init : crée le bucket InfluxDB du kernel s'il n'existe pas.
// Lit la même config que le kernel (section sink.influx) ; à lancer avant le kernel.

mod influx;

use anyhow::{Context, Result};
use beacon_kernel::config::load_config;
use influx::{parse_retention, InfluxAdmin, Provisioned};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("beacon_bucket_init=info")),
        )
        .init();

    let cfg = load_config().await;
    let influx = &cfg.sink.influx;
    let retention = parse_retention(&influx.retention)?;

    let admin = InfluxAdmin::new(&influx.url, &influx.token, REQUEST_TIMEOUT)?;
    let outcome = admin
        .ensure_bucket(&influx.org, &influx.bucket, retention)
        .await
        .with_context(|| format!("provisioning bucket '{}' on {}", influx.bucket, influx.url))?;

    match outcome {
        Provisioned::AlreadyExists => info!(bucket = %influx.bucket, "bucket already exists"),
        Provisioned::Created => info!(
            bucket = %influx.bucket,
            retention = %humantime::format_duration(retention),
            "bucket created"
        ),
    }
    Ok(())
}
