//! Active poll scheduler - pulls Glances reports from every active machine.
//!
//! One fetch task per machine per tick, each fully isolated: a dead, slow
//! or garbage-talking machine costs nothing beyond its own warn line. The
//! loop stops cooperatively; an in-flight tick always finishes.

use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::config::HubConfig;
use crate::ingest::record_snapshot;
use crate::machines::MachineRegistry;
use crate::models::{Machine, SnapshotSource};
use crate::snapshots::SnapshotStore;
use crate::telemetry::parse_report;

#[derive(Debug, Serialize)]
pub struct PollerStatus {
    pub running: bool,
    pub interval_secs: u64,
}

#[derive(Clone)]
pub struct Poller {
    cfg: Arc<HubConfig>,
    registry: Arc<MachineRegistry>,
    store: Arc<SnapshotStore>,
    client: reqwest::Client,
    running: Arc<AtomicBool>,
    stop: Arc<Notify>,
}

impl Poller {
    pub fn new(
        cfg: Arc<HubConfig>,
        registry: Arc<MachineRegistry>,
        store: Arc<SnapshotStore>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.poll.timeout_secs))
            .build()
            .expect("http client");
        Self {
            cfg,
            registry,
            store,
            client,
            running: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(Notify::new()),
        }
    }

    /// Starts the polling loop. A second start while running is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("poller already running");
            return;
        }
        info!("🔄 starting poll scheduler (every {}s)", self.cfg.poll.interval_secs);
        let poller = self.clone();
        tokio::spawn(async move {
            poller.run_loop().await;
            info!("poll scheduler stopped");
        });
    }

    /// Requests a cooperative stop. The in-flight tick finishes first.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("⏹️ stopping poll scheduler");
            self.stop.notify_waiters();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> PollerStatus {
        PollerStatus {
            running: self.is_running(),
            interval_secs: self.cfg.poll.interval_secs,
        }
    }

    async fn run_loop(&self) {
        while self.is_running() {
            let delay = match self.poll_all_machines().await {
                Ok(_) => Duration::from_secs(self.cfg.poll.interval_secs),
                Err(e) => {
                    error!("error in polling loop: {e:#}");
                    Duration::from_secs(self.cfg.poll.recovery_delay_secs)
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

    /// One tick: fan out a fetch per active machine and wait for all of
    /// them to settle. Also serves the manual trigger endpoint. Returns the
    /// number of machines polled.
    pub async fn poll_all_machines(&self) -> anyhow::Result<usize> {
        let machines = self.registry.active_machines().await;
        if machines.is_empty() {
            debug!("no active machines to poll");
            return Ok(0);
        }
        info!("📊 polling {} machines", machines.len());

        let tasks: Vec<_> = machines
            .into_iter()
            .map(|machine| {
                let poller = self.clone();
                tokio::spawn(async move { poller.poll_machine(machine).await })
            })
            .collect();

        let polled = tasks.len();
        for joined in join_all(tasks).await {
            // A panicked task only loses its own machine's snapshot.
            if let Err(e) = joined {
                error!("poll task aborted: {e}");
            }
        }
        Ok(polled)
    }

    async fn poll_machine(&self, machine: Machine) {
        let url = format!(
            "http://{}:{}/api/4/all",
            machine.ip_address, self.cfg.poll.glances_port
        );
        debug!("polling {} at {}", machine.name, url);

        let response = match self.client.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                warn!("timeout polling {} at {}", machine.name, machine.ip_address);
                return;
            }
            Err(e) => {
                warn!("connection error polling {}: {e}", machine.name);
                return;
            }
        };
        if !response.status().is_success() {
            warn!("failed to poll {}: HTTP {}", machine.name, response.status());
            return;
        }
        let raw: serde_json::Value = match response.json().await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("malformed report from {}: {e}", machine.name);
                return;
            }
        };

        let report = parse_report(&raw);
        match record_snapshot(
            &self.registry,
            &self.store,
            &machine.id,
            report,
            SnapshotSource::Poll,
        )
        .await
        {
            Ok(_) => debug!("stored polled snapshot for {}", machine.name),
            Err(e) => warn!("failed to store snapshot for {}: {e}", machine.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineSeed;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::net::SocketAddr;

    fn seed(name: &str, ip: &str, hostname: &str) -> MachineSeed {
        MachineSeed {
            name: name.to_string(),
            ip: ip.to_string(),
            hostname: hostname.to_string(),
            mac: None,
            control_ref: None,
            description: None,
            active: true,
        }
    }

    async fn serve_glances(addr: SocketAddr, payload: serde_json::Value) {
        let app = Router::new().route(
            "/api/4/all",
            get(move || {
                let payload = payload.clone();
                async move { Json(payload) }
            }),
        );
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
    }

    /// Three machines on loopback aliases sharing one port: two healthy,
    /// one with nothing listening. The dead one must not cost the others
    /// their snapshots.
    #[tokio::test(flavor = "multi_thread")]
    async fn tick_isolates_failing_machines() {
        let dir = tempfile::tempdir().unwrap();

        // Grab an ephemeral port on 127.0.0.1, then reuse it on 127.0.0.2.
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        serve_glances(
            SocketAddr::from(([127, 0, 0, 1], port)),
            json!({"system": {"hostname": "atlas-host"}, "cpu": {"total": 10.0}}),
        )
        .await;
        serve_glances(
            SocketAddr::from(([127, 0, 0, 2], port)),
            json!({"system": {"hostname": "vega-host"}, "uptime": "1 day, 0:00:00"}),
        )
        .await;
        // 127.0.0.3 stays unbound: connecting there fails.

        let mut cfg = HubConfig::default();
        cfg.poll.glances_port = port;
        cfg.poll.timeout_secs = 2;
        cfg.machines.insert("atlas".into(), seed("Atlas", "127.0.0.1", "atlas-host"));
        cfg.machines.insert("vega".into(), seed("Vega", "127.0.0.2", "vega-host"));
        cfg.machines.insert("dead".into(), seed("Dead", "127.0.0.3", "dead-host"));

        let registry = Arc::new(MachineRegistry::new(
            dir.path().join("machines.json").to_str().unwrap(),
        ));
        registry.seed_from_config(&cfg).await.unwrap();
        let store = Arc::new(SnapshotStore::new(dir.path().join("snapshots.json")).unwrap());

        let poller = Poller::new(Arc::new(cfg), registry.clone(), store.clone());
        let polled = poller.poll_all_machines().await.unwrap();
        assert_eq!(polled, 3);

        assert_eq!(store.count_for("atlas"), 1);
        assert_eq!(store.count_for("vega"), 1);
        assert_eq!(store.count_for("dead"), 0);

        let atlas = store.latest_for("atlas").unwrap();
        assert_eq!(atlas.cpu_percent, Some(10.0));
        assert_eq!(atlas.source, SnapshotSource::Poll);
        assert_eq!(store.latest_for("vega").unwrap().uptime, 86_400);

        assert!(registry.get("atlas").await.unwrap().last_seen.is_some());
        assert!(registry.get("dead").await.unwrap().last_seen.is_none());
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_is_cooperative() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(MachineRegistry::new(
            dir.path().join("machines.json").to_str().unwrap(),
        ));
        let store = Arc::new(SnapshotStore::new(dir.path().join("snapshots.json")).unwrap());
        let poller = Poller::new(Arc::new(HubConfig::default()), registry, store);

        assert!(!poller.is_running());
        poller.start();
        poller.start();
        assert!(poller.is_running());
        assert!(poller.status().running);

        poller.stop();
        assert!(!poller.is_running());
        // A second stop is harmless.
        poller.stop();
    }
}
