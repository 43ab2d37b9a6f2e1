//! Push ingestion - resolution protocol for machine-pushed reports.
//!
//! Access control is address-based: a pushed report is accepted only when
//! one of its candidate addresses belongs to a registered machine; the
//! shared secret alone is not enough. The hostname the payload reports can
//! then re-attribute the snapshot to a different registered machine
//! (laptops roam between addresses; their hostname is the stable identity).

use serde_json::Value;
use tracing::{info, warn};

use crate::error::HubError;
use crate::machines::MachineRegistry;
use crate::models::{Snapshot, SnapshotSource};
use crate::snapshots::SnapshotStore;
use crate::telemetry::{parse_report, TelemetryReport};

#[derive(Debug, serde::Serialize)]
pub struct IngestOutcome {
    pub machine_id: String,
    pub machine_name: String,
    pub snapshot_id: String,
}

/// Exact-equality secret check. An empty configured secret denies everything.
pub fn verify_secret(configured: &str, supplied: Option<&str>) -> bool {
    !configured.is_empty() && supplied == Some(configured)
}

/// Handles one pushed report end to end: auth gate, address gatekeeper,
/// hostname-preference attribution, field reconciliation, snapshot persist.
pub async fn ingest_report(
    registry: &MachineRegistry,
    store: &SnapshotStore,
    configured_secret: &str,
    supplied_secret: Option<&str>,
    raw: &Value,
) -> Result<IngestOutcome, HubError> {
    if !verify_secret(configured_secret, supplied_secret) {
        return Err(HubError::Auth);
    }

    // Candidate addresses supplied by the sender, in priority order.
    let candidates: Vec<String> = ["external_ip", "local_ip"]
        .iter()
        .filter_map(|key| raw.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    if candidates.is_empty() {
        return Err(HubError::Forbidden(candidates));
    }

    let mut address_machine = None;
    for ip in &candidates {
        if let Some(machine) = registry.get_by_ip(ip).await {
            address_machine = Some(machine);
            break;
        }
    }
    let Some(address_machine) = address_machine else {
        warn!("push denied for unregistered addresses {candidates:?}");
        return Err(HubError::Forbidden(candidates));
    };

    let report = parse_report(raw);

    // The reported hostname outranks the matched address for attribution,
    // as long as it resolves to a registered machine.
    let machine = match registry.get_by_hostname(&report.hostname).await {
        Some(by_hostname) => by_hostname,
        None => address_machine,
    };

    let snapshot_id =
        record_snapshot(registry, store, &machine.id, report, SnapshotSource::Push).await?;
    info!("metrics received from '{}' via push", machine.name);

    Ok(IngestOutcome {
        machine_id: machine.id,
        machine_name: machine.name,
        snapshot_id,
    })
}

/// Records one normalized report: write-on-change machine reconciliation and
/// last-seen refresh, then the snapshot insert. A failed insert leaves the
/// already-applied machine updates in place.
pub async fn record_snapshot(
    registry: &MachineRegistry,
    store: &SnapshotStore,
    machine_id: &str,
    report: TelemetryReport,
    source: SnapshotSource,
) -> Result<String, HubError> {
    let found = registry.record_observation(machine_id, &report).await?;
    if !found {
        return Err(HubError::NotFound(machine_id.to_string()));
    }
    let snapshot = Snapshot::from_report(machine_id, report, source);
    let id = store.insert(snapshot)?;
    Ok(id)
}
