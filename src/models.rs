//! Shared data model: registered machines and their telemetry snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::telemetry::TelemetryReport;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    pub name: String,
    pub ip_address: String,
    pub hostname: String,
    pub mac_address: Option<String>,
    /// Entity id in an external control integration. Stored for consumers,
    /// never acted on here.
    pub control_ref: Option<String>,
    pub description: Option<String>,
    pub active: bool,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub last_seen: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// How a snapshot reached the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    Poll,
    Push,
}

/// One immutable point-in-time metric record for a machine.
/// Written once by the collection pipeline, deleted only by retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub machine_id: String,
    pub cpu_percent: Option<f64>,
    pub cpu_user: Option<f64>,
    pub cpu_system: Option<f64>,
    pub cpu_iowait: Option<f64>,
    pub cpu_count: Option<i64>,
    pub memory_percent: Option<f64>,
    /// GiB
    pub memory_used: Option<f64>,
    /// GiB
    pub memory_total: Option<f64>,
    pub swap_percent: Option<f64>,
    pub swap_used: Option<f64>,
    pub swap_total: Option<f64>,
    pub swap_free: Option<f64>,
    /// Seconds
    pub uptime: i64,
    pub load_avg: Option<f64>,
    pub battery_percent: Option<f64>,
    pub battery_status: Option<String>,
    pub sensors_data: Option<Value>,
    pub alert_data: Option<Value>,
    pub network_data: Option<Value>,
    pub fs_data: Option<Value>,
    pub source: SnapshotSource,
    pub created_at: OffsetDateTime,
}

impl Snapshot {
    /// Builds a snapshot from a normalized report. Consumes the report so
    /// the opaque blobs move instead of being copied.
    pub fn from_report(machine_id: &str, report: TelemetryReport, source: SnapshotSource) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            machine_id: machine_id.to_string(),
            cpu_percent: report.cpu_percent,
            cpu_user: report.cpu_user,
            cpu_system: report.cpu_system,
            cpu_iowait: report.cpu_iowait,
            cpu_count: report.cpu_count,
            memory_percent: report.memory_percent,
            memory_used: report.memory_used,
            memory_total: report.memory_total,
            swap_percent: report.swap_percent,
            swap_used: report.swap_used,
            swap_total: report.swap_total,
            swap_free: report.swap_free,
            uptime: report.uptime,
            load_avg: report.load_avg,
            battery_percent: report.battery_percent,
            battery_status: report.battery_status,
            sensors_data: report.sensors,
            alert_data: report.alerts,
            network_data: report.network,
            fs_data: report.fs,
            source,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}
