/**
 * BEACON KERNEL - Point d'entrée du service d'ingestion
 *
 * RÔLE : Bootstrap complet : config, registre, sink, flusher, tâches périodiques,
 * API admin et serveur TCP des gateways.
 * Arrêt propre sur Ctrl-C : la file est fermée et le dernier lot est flushé.
 */

use anyhow::{Context, Result};
use beacon_kernel::config::{load_config, SinkKind};
use beacon_kernel::health::HealthTracker;
use beacon_kernel::http::{build_router, AppState};
use beacon_kernel::identity::{spawn_unregistered_reporter, IdentityValidator};
use beacon_kernel::ownership::spawn_eviction_sweep;
use beacon_kernel::pipeline::PipelineContext;
use beacon_kernel::registry::{load_identity_sets, FileRegistry};
use beacon_kernel::server::serve;
use beacon_kernel::sink::{InfluxSink, LogSink, Sink};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Ok si .env n'existe pas

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("beacon_kernel=info")),
        )
        .init();

    let cfg = load_config().await;

    // registre : lu une fois, un échec laisse des ensembles vides (tout est refusé)
    let registry = FileRegistry::new(&cfg.registry.path);
    let sets = load_identity_sets(&registry, &cfg.registry.layout).await;
    if sets.gateways.is_empty() {
        warn!(path = %cfg.registry.path, "no known gateways, every observation will be rejected");
    }
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    spawn_unregistered_reporter(notify_rx);
    let validator = IdentityValidator::new(sets).with_notifier(notify_tx);

    let sink: Arc<dyn Sink> = match cfg.sink.kind {
        SinkKind::Influx => {
            let settings = cfg.influx_settings();
            info!(url = %settings.url, org = %settings.org, bucket = %settings.bucket, "influx sink");
            Arc::new(InfluxSink::new(settings).context("failed to build influx sink")?)
        }
        SinkKind::Log => Arc::new(LogSink),
    };

    let health = HealthTracker::new();
    let (ctx, flusher) = PipelineContext::build(&cfg, validator, sink, health.clone())
        .context("failed to assemble pipeline")?;

    // tâches périodiques
    if let Some(max_age) = cfg.eviction_max_age() {
        spawn_eviction_sweep(
            ctx.arbitrator.clone(),
            max_age,
            Duration::from_secs(cfg.ownership.eviction_interval_secs.max(1)),
        );
    }
    if cfg.reporting.health_secs > 0 {
        health.spawn_health_reporter(Duration::from_secs(cfg.reporting.health_secs));
    }
    if cfg.reporting.client_table_secs > 0 {
        ctx.clients.spawn_table_reporter(Duration::from_secs(cfg.reporting.client_table_secs));
    }

    // API admin
    if cfg.http.enabled {
        let app = build_router(AppState {
            health: health.clone(),
            clients: ctx.clients.clone(),
            arbitrator: ctx.arbitrator.clone(),
            api_key: cfg.http.api_key.clone(),
        });
        let addr = format!("{}:{}", cfg.http.bind, cfg.http.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind admin http on {addr}"))?;
        info!(%addr, "admin http listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "admin http stopped");
            }
        });
    }

    // gateways
    let addr = format!("{}:{}", cfg.server.bind, cfg.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind gateway listener on {addr}"))?;

    let server = tokio::spawn(serve(listener, ctx, cfg.server.max_connections));

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    // les connexions en cours tiennent encore des clones de la file : on les coupe
    server.abort();
    let _ = server.await;
    match tokio::time::timeout(Duration::from_secs(5), flusher).await {
        Ok(_) => info!("final batch flushed"),
        Err(_) => warn!("flusher did not stop in time"),
    }
    Ok(())
}
