//! HTTP surface of the hub.
//!
//! Routes: /health (open), machine views, the Glances push webhook, and
//! thin admin wrappers over the poller and the cleanup service. Everything
//! except /health and the webhook sits behind the x-api-key middleware;
//! the webhook runs its own gate so auth failures come back in the
//! ingestion error shape.

use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tracing::{error, warn};

use crate::cleanup::{CleanupReport, CleanupService};
use crate::config::HubConfig;
use crate::error::HubError;
use crate::ingest;
use crate::machines::MachineRegistry;
use crate::models::{Machine, Snapshot};
use crate::poller::{Poller, PollerStatus};
use crate::snapshots::SnapshotStore;
use crate::status::{HubHealth, StatusTracker};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<HubConfig>,
    pub registry: Arc<MachineRegistry>,
    pub store: Arc<SnapshotStore>,
    pub poller: Poller,
    pub cleanup: CleanupService,
    pub status: StatusTracker,
}

#[derive(Serialize)]
struct MachineView {
    id: String,
    name: String,
    hostname: String,
    ip_address: String,
    description: Option<String>,
    active: bool,
    os_name: Option<String>,
    os_version: Option<String>,
    last_seen: Option<String>, // RFC3339
    stale: bool,
    stale_for_seconds: Option<i64>,
    latest_snapshot: Option<Snapshot>,
}

fn to_view(m: &Machine, latest: Option<Snapshot>, poll_interval_secs: u64) -> MachineView {
    let now = OffsetDateTime::now_utc();
    // Stale after missing three poll intervals in a row.
    let (stale, stale_for_seconds) = match m.last_seen {
        Some(seen) => {
            let age = now - seen;
            (
                age > Duration::seconds(poll_interval_secs as i64 * 3),
                Some(age.whole_seconds().max(0)),
            )
        }
        None => (true, None),
    };
    MachineView {
        id: m.id.clone(),
        name: m.name.clone(),
        hostname: m.hostname.clone(),
        ip_address: m.ip_address.clone(),
        description: m.description.clone(),
        active: m.active,
        os_name: m.os_name.clone(),
        os_version: m.os_version.clone(),
        last_seen: m.last_seen.and_then(|t| t.format(&Rfc3339).ok()),
        stale,
        stale_for_seconds,
        latest_snapshot: latest,
    }
}

async fn require_api_key(
    State(app): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = req.uri().path();

    // Health check stays open; the webhook runs its own gate.
    if path.starts_with("/health") || path.starts_with("/webhook") {
        return Ok(next.run(req).await);
    }

    let expected = app.cfg.api_secret.as_str();
    if expected.is_empty() {
        warn!("api_secret not configured - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/machines", get(get_machines))
        .route("/machines/{id}", get(get_machine))
        .route("/machines/{id}/snapshots", get(get_machine_snapshots))
        .route("/webhook/glances", post(receive_glances_report))
        .route("/polling/trigger", post(trigger_polling))
        .route("/polling/status", get(get_polling_status))
        .route("/polling/start", post(start_polling))
        .route("/polling/stop", post(stop_polling))
        .route("/cleanup/run", post(run_cleanup))
        .with_state(app_state.clone())
        .layer(middleware::from_fn_with_state(app_state, require_api_key))
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<HubHealth> {
    let machines = app.registry.len().await;
    Json(app.status.snapshot(
        machines,
        app.store.len(),
        app.poller.is_running(),
        app.cleanup.is_running(),
    ))
}

// GET /machines (list with latest snapshot per machine)
async fn get_machines(State(app): State<AppState>) -> Json<Vec<MachineView>> {
    let mut views = Vec::new();
    for m in app.registry.list().await {
        let latest = app.store.latest_for(&m.id);
        views.push(to_view(&m, latest, app.cfg.poll.interval_secs));
    }
    Json(views)
}

// GET /machines/{id}
async fn get_machine(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MachineView>, StatusCode> {
    let Some(m) = app.registry.get(&id).await else {
        return Err(StatusCode::NOT_FOUND);
    };
    let latest = app.store.latest_for(&m.id);
    Ok(Json(to_view(&m, latest, app.cfg.poll.interval_secs)))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

// GET /machines/{id}/snapshots
async fn get_machine_snapshots(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<Snapshot>>, StatusCode> {
    if app.registry.get(&id).await.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    let limit = params.limit.unwrap_or(100);
    Ok(Json(app.store.for_machine(&id, limit)))
}

// POST /webhook/glances (push ingestion)
async fn receive_glances_report(
    State(app): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, HubError> {
    let secret = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    let raw: serde_json::Value = serde_json::from_str(&body)
        .map_err(|e| HubError::Validation(format!("invalid JSON body: {e}")))?;

    let outcome =
        ingest::ingest_report(&app.registry, &app.store, &app.cfg.api_secret, secret, &raw).await?;

    Ok(Json(json!({
        "success": true,
        "message": "report received and stored",
        "machine_id": outcome.machine_id,
        "machine_name": outcome.machine_name,
        "snapshot_id": outcome.snapshot_id,
    })))
}

// POST /polling/trigger (poll everything right now)
async fn trigger_polling(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match app.poller.poll_all_machines().await {
        Ok(count) => Ok(Json(json!({ "ok": true, "machines_polled": count }))),
        Err(e) => {
            error!("manual poll failed: {e:#}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// GET /polling/status
async fn get_polling_status(State(app): State<AppState>) -> Json<PollerStatus> {
    Json(app.poller.status())
}

// POST /polling/start
async fn start_polling(State(app): State<AppState>) -> Json<serde_json::Value> {
    let already = app.poller.is_running();
    app.poller.start();
    Json(json!({ "ok": true, "status": if already { "already_running" } else { "started" } }))
}

// POST /polling/stop
async fn stop_polling(State(app): State<AppState>) -> Json<serde_json::Value> {
    let was_running = app.poller.is_running();
    app.poller.stop();
    Json(json!({ "ok": true, "status": if was_running { "stopped" } else { "not_running" } }))
}

// POST /cleanup/run (manual retention pass)
async fn run_cleanup(State(app): State<AppState>) -> Result<Json<CleanupReport>, StatusCode> {
    match app.cleanup.run_cleanup_now() {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            error!("manual cleanup failed: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
