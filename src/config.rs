use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path};
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HubConfig {
    pub listen_port: u16,
    pub data_dir: String,
    /// Shared secret expected in the x-api-key header.
    /// Overridden by PULSE_HUB_API_KEY; empty means every request is denied.
    pub api_secret: String,
    /// Machines provisioned at boot, merged into data/machines.json.
    pub machines: HashMap<String, MachineSeed>,
    pub poll: PollConfig,
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MachineSeed {
    pub name: String,
    pub ip: String,
    pub hostname: String,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub control_ref: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
    /// Port of the Glances REST API on each machine.
    pub glances_port: u16,
    pub recovery_delay_secs: u64,
    pub auto_start: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CleanupConfig {
    pub max_snapshots_per_machine: usize,
    pub interval_hours: u64,
    /// Optional global age cutoff. None keeps snapshots forever.
    pub max_age_days: Option<i64>,
    pub recovery_delay_secs: u64,
    pub auto_start: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_port: 8080,
            data_dir: "./data".into(),
            api_secret: String::new(),
            machines: HashMap::new(),
            poll: PollConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            timeout_secs: 10,
            glances_port: 61208,
            recovery_delay_secs: 5,
            auto_start: true,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_snapshots_per_machine: 10000,
            interval_hours: 6,
            max_age_days: None,
            recovery_delay_secs: 300,
            auto_start: true,
        }
    }
}

pub async fn load_config() -> HubConfig {
    let path = std::env::var("PULSE_HUB_CONFIG").unwrap_or_else(|_| "hub.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            HubConfig::default()
        } else {
            serde_yaml::from_str(&txt).unwrap_or_else(|e| {
                warn!("invalid config {path}: {e}");
                HubConfig::default()
            })
        }
    } else {
        warn!("no {path}, using default config");
        HubConfig::default()
    };

    if let Ok(secret) = std::env::var("PULSE_HUB_API_KEY") {
        if !secret.is_empty() {
            cfg.api_secret = secret;
        }
    }
    cfg
}
