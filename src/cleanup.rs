//! Retention service - keeps the snapshot store bounded.
//!
//! Two policies per cycle: a per-machine count cap, and an optional global
//! age cutoff. Each machine's cap trim is its own commit; the age sweep
//! commits once. Cycles are idempotent - with no writes in between, the
//! second pass deletes nothing.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::config::HubConfig;
use crate::snapshots::{SnapshotStore, StoreError};

#[derive(Debug, Serialize)]
pub struct CleanupReport {
    pub deleted_by_count: usize,
    pub deleted_by_age: usize,
    pub total_deleted: usize,
    pub timestamp: String,
}

#[derive(Clone)]
pub struct CleanupService {
    cfg: Arc<HubConfig>,
    store: Arc<SnapshotStore>,
    running: Arc<AtomicBool>,
    stop: Arc<Notify>,
}

impl CleanupService {
    pub fn new(cfg: Arc<HubConfig>, store: Arc<SnapshotStore>) -> Self {
        Self {
            cfg,
            store,
            running: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(Notify::new()),
        }
    }

    /// Starts the periodic cleanup loop. A second start is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("cleanup service already running");
            return;
        }
        info!(
            "🧹 cleanup service started - every {}h, keeping latest {} snapshots per machine",
            self.cfg.cleanup.interval_hours, self.cfg.cleanup.max_snapshots_per_machine
        );
        if let Some(days) = self.cfg.cleanup.max_age_days {
            info!("also removing snapshots older than {days} days");
        }
        let service = self.clone();
        tokio::spawn(async move {
            service.run_loop().await;
            info!("cleanup service stopped");
        });
    }

    /// Requests a cooperative stop. An executing cycle finishes first.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("🛑 stopping cleanup service");
            self.stop.notify_waiters();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run_loop(&self) {
        while self.is_running() {
            let delay = match self.run_cleanup_now() {
                Ok(report) if report.total_deleted > 0 => {
                    info!("cleanup cycle deleted {} snapshots", report.total_deleted);
                    Duration::from_secs(self.cfg.cleanup.interval_hours * 3600)
                }
                Ok(_) => {
                    debug!("no cleanup needed");
                    Duration::from_secs(self.cfg.cleanup.interval_hours * 3600)
                }
                Err(e) => {
                    error!("error in cleanup cycle: {e}");
                    Duration::from_secs(self.cfg.cleanup.recovery_delay_secs)
                }
            };
            if !self.is_running() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.stop.notified() => break,
            }
        }
    }

    /// Runs both policies once and reports what was deleted. Also serves
    /// the manual trigger endpoint; does not touch the periodic timer.
    pub fn run_cleanup_now(&self) -> Result<CleanupReport, StoreError> {
        let cap = self.cfg.cleanup.max_snapshots_per_machine;

        let mut deleted_by_count = 0;
        for machine_id in self.store.machine_ids() {
            let deleted = self.store.trim_to_latest(&machine_id, cap)?;
            if deleted > 0 {
                debug!("trimmed {deleted} snapshots for machine {machine_id}");
            }
            deleted_by_count += deleted;
        }

        let mut deleted_by_age = 0;
        if let Some(days) = self.cfg.cleanup.max_age_days {
            let cutoff = OffsetDateTime::now_utc() - time::Duration::days(days);
            deleted_by_age = self.store.delete_older_than(cutoff)?;
        }

        Ok(CleanupReport {
            deleted_by_count,
            deleted_by_age,
            total_deleted: deleted_by_count + deleted_by_age,
            timestamp: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
        })
    }
}
