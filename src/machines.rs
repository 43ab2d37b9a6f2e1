//! Machine registry - the provisioned fleet the hub is allowed to talk to.
//!
//! Machines are declared in the config and merged into a persisted JSON
//! file that carries the runtime fields (last_seen, reported OS info). The
//! collection pipeline only reads machines and performs narrow
//! write-on-change updates; nothing here creates or deletes machines at
//! runtime.

use anyhow::Result;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::HubConfig;
use crate::models::Machine;
use crate::telemetry::TelemetryReport;

pub type MachinesMap = HashMap<String, Machine>;

pub struct MachineRegistry {
    machines: RwLock<MachinesMap>,
    data_file: String,
}

impl MachineRegistry {
    pub fn new(data_file: &str) -> Self {
        Self {
            machines: RwLock::new(HashMap::new()),
            data_file: data_file.to_string(),
        }
    }

    /// Loads the persisted registry. Missing file means a fresh start.
    pub async fn load(&self) -> Result<()> {
        if !std::path::Path::new(&self.data_file).exists() {
            info!("no existing machines file, starting fresh");
            return Ok(());
        }
        let content = tokio::fs::read_to_string(&self.data_file).await?;
        let machines: MachinesMap = serde_json::from_str(&content)?;
        let mut map = self.machines.write().await;
        *map = machines;
        info!("loaded {} machines from {}", map.len(), self.data_file);
        Ok(())
    }

    pub async fn save(&self) -> Result<()> {
        let content = {
            let map = self.machines.read().await;
            serde_json::to_string_pretty(&*map)?
        };
        tokio::fs::write(&self.data_file, content).await?;
        Ok(())
    }

    /// Merges the config-declared machines into the registry. Static fields
    /// follow the config; runtime fields (last_seen, reported OS info) keep
    /// their persisted values.
    pub async fn seed_from_config(&self, cfg: &HubConfig) -> Result<()> {
        let mut changed = false;
        {
            let mut map = self.machines.write().await;
            for (id, seed) in &cfg.machines {
                let now = OffsetDateTime::now_utc();
                match map.get_mut(id) {
                    Some(existing) => {
                        if existing.name != seed.name
                            || existing.ip_address != seed.ip
                            || existing.hostname != seed.hostname
                            || existing.mac_address != seed.mac
                            || existing.control_ref != seed.control_ref
                            || existing.description != seed.description
                            || existing.active != seed.active
                        {
                            existing.name = seed.name.clone();
                            existing.ip_address = seed.ip.clone();
                            existing.hostname = seed.hostname.clone();
                            existing.mac_address = seed.mac.clone();
                            existing.control_ref = seed.control_ref.clone();
                            existing.description = seed.description.clone();
                            existing.active = seed.active;
                            existing.updated_at = now;
                            changed = true;
                        }
                    }
                    None => {
                        map.insert(
                            id.clone(),
                            Machine {
                                id: id.clone(),
                                name: seed.name.clone(),
                                ip_address: seed.ip.clone(),
                                hostname: seed.hostname.clone(),
                                mac_address: seed.mac.clone(),
                                control_ref: seed.control_ref.clone(),
                                description: seed.description.clone(),
                                active: seed.active,
                                os_name: None,
                                os_version: None,
                                last_seen: None,
                                created_at: now,
                                updated_at: now,
                            },
                        );
                        info!("registered machine {} ({})", id, seed.name);
                        changed = true;
                    }
                }
            }
        }
        if changed {
            self.save().await?;
        }
        Ok(())
    }

    pub async fn list(&self) -> Vec<Machine> {
        let mut machines: Vec<Machine> = self.machines.read().await.values().cloned().collect();
        machines.sort_by(|a, b| a.id.cmp(&b.id));
        machines
    }

    pub async fn get(&self, id: &str) -> Option<Machine> {
        self.machines.read().await.get(id).cloned()
    }

    pub async fn get_by_ip(&self, ip: &str) -> Option<Machine> {
        self.machines
            .read()
            .await
            .values()
            .find(|m| m.ip_address == ip)
            .cloned()
    }

    pub async fn get_by_hostname(&self, hostname: &str) -> Option<Machine> {
        self.machines
            .read()
            .await
            .values()
            .find(|m| m.hostname == hostname)
            .cloned()
    }

    pub async fn active_machines(&self) -> Vec<Machine> {
        self.machines
            .read()
            .await
            .values()
            .filter(|m| m.active)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.machines.read().await.len()
    }

    /// Write-on-change reconciliation of the reported hostname/OS fields,
    /// plus an unconditional last_seen refresh. The "unknown" hostname
    /// fallback is never written back. Ok(false) when the machine is gone.
    pub async fn record_observation(&self, id: &str, report: &TelemetryReport) -> Result<bool> {
        let now = OffsetDateTime::now_utc();
        {
            let mut map = self.machines.write().await;
            let Some(machine) = map.get_mut(id) else {
                return Ok(false);
            };

            let mut changed = false;
            if report.hostname != "unknown"
                && !report.hostname.is_empty()
                && machine.hostname != report.hostname
            {
                machine.hostname = report.hostname.clone();
                changed = true;
            }
            if let Some(os_name) = &report.os_name {
                if machine.os_name.as_deref() != Some(os_name) {
                    machine.os_name = Some(os_name.clone());
                    changed = true;
                }
            }
            if let Some(os_version) = &report.os_version {
                if machine.os_version.as_deref() != Some(os_version) {
                    machine.os_version = Some(os_version.clone());
                    changed = true;
                }
            }

            machine.last_seen = Some(now);
            if changed {
                machine.updated_at = now;
            }
        }
        self.save().await?;
        Ok(true)
    }
}
