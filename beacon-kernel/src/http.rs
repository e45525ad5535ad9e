/**
 * API ADMIN - Inspection de l'état du kernel
 *
 * ROUTES :
 * - GET /health            : compteurs du pipeline (toujours ouvert)
 * - GET /clients           : gateways connectés, triés par IP
 * - GET /owners            : tous les records d'ownership
 * - GET /owners/{beacon}   : record d'un beacon (id normalisé)
 *
 * SÉCURITÉ :
 * Si une clé est configurée (BEACON_API_KEY), le header x-api-key est exigé
 * sur toutes les routes sauf /health.
 */

use crate::clients::{ClientTable, ClientView};
use crate::health::{HealthTracker, KernelHealth};
use crate::mac::normalize;
use crate::ownership::{OwnershipArbitrator, OwnershipRecord};
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub health: HealthTracker,
    pub clients: ClientTable,
    pub arbitrator: Arc<OwnershipArbitrator>,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct OwnerView {
    beacon_id: String,
    gateway_id: String,
    rssi: i32,
    last_claim_at: String, // RFC3339
    stale: bool,           // true si plus vieux que la fenêtre stale
    age_seconds: i64,
}

fn to_view(beacon_id: &str, r: &OwnershipRecord, window: std::time::Duration) -> OwnerView {
    let age = OffsetDateTime::now_utc() - r.last_claim_at;
    OwnerView {
        beacon_id: beacon_id.to_string(),
        gateway_id: r.owning_gateway_id.clone(),
        rssi: r.last_signal_strength,
        last_claim_at: r.last_claim_at.format(&Rfc3339).unwrap_or_default(),
        stale: age > time::Duration::try_from(window).unwrap_or(time::Duration::MAX),
        age_seconds: age.whole_seconds().max(0),
    }
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    if req.uri().path().starts_with("/health") {
        return Ok(next.run(req).await);
    }
    let Some(expected) = app.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!(path = %req.uri().path(), "rejected request without valid api key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/clients", get(get_clients))
        .route("/owners", get(get_owners))
        .route("/owners/{beacon}", get(get_owner))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

// GET /health
async fn get_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health.snapshot())
}

// GET /clients
async fn get_clients(State(app): State<AppState>) -> Json<Vec<ClientView>> {
    Json(app.clients.views())
}

// GET /owners
async fn get_owners(State(app): State<AppState>) -> Json<Vec<OwnerView>> {
    let window = app.arbitrator.stale_window();
    let list = app
        .arbitrator
        .snapshot()
        .iter()
        .map(|(beacon, r)| to_view(beacon, r, window))
        .collect();
    Json(list)
}

// GET /owners/{beacon}
async fn get_owner(
    State(app): State<AppState>,
    Path(beacon): Path<String>,
) -> Result<Json<OwnerView>, StatusCode> {
    let id = normalize(&beacon).map_err(|_| StatusCode::BAD_REQUEST)?;
    let Some(r) = app.arbitrator.owner_of(&id) else {
        return Err(StatusCode::NOT_FOUND);
    };
    Ok(Json(to_view(&id, &r, app.arbitrator.stale_window())))
}
