//! pulse-hub - central telemetry hub for a fleet of LAN machines.
//!
//! Two collection paths feed one snapshot store: the poll scheduler pulls
//! Glances reports from every active machine, and the webhook accepts
//! reports the machines push themselves. A retention service keeps the
//! store bounded. Everything is wired here: config, registry, store,
//! background services, HTTP API.

mod cleanup;
mod config;
mod error;
mod http;
mod ingest;
mod machines;
mod models;
mod poller;
mod snapshots;
mod status;
mod telemetry;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::cleanup::CleanupService;
use crate::config::load_config;
use crate::machines::MachineRegistry;
use crate::poller::Poller;
use crate::snapshots::SnapshotStore;
use crate::status::StatusTracker;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok(); // Ok si .env n'existe pas

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Arc::new(load_config().await);

    std::fs::create_dir_all(&cfg.data_dir).unwrap_or_else(|e| {
        warn!("failed to create data dir: {e}");
    });

    let store = match SnapshotStore::new(format!("{}/snapshots.json", cfg.data_dir)) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("failed to open snapshot store: {e}");
            std::process::exit(1);
        }
    };

    let registry = Arc::new(MachineRegistry::new(&format!("{}/machines.json", cfg.data_dir)));
    if let Err(e) = registry.load().await {
        error!("failed to load machines: {e}");
        std::process::exit(1);
    }
    if let Err(e) = registry.seed_from_config(&cfg).await {
        error!("failed to seed machines from config: {e}");
        std::process::exit(1);
    }
    info!(
        "tracking {} machines ({} active)",
        registry.len().await,
        registry.active_machines().await.len()
    );

    let poller = Poller::new(cfg.clone(), registry.clone(), store.clone());
    if cfg.poll.auto_start {
        poller.start();
    }

    let cleanup = CleanupService::new(cfg.clone(), store.clone());
    if cfg.cleanup.auto_start {
        cleanup.start();
    }

    let app_state = http::AppState {
        cfg: cfg.clone(),
        registry,
        store,
        poller,
        cleanup,
        status: StatusTracker::new(),
    };
    let app = http::build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    info!("listening on http://{addr}");
    let listener = TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
