//! Snapshot store - file-backed JSON persistence for telemetry snapshots.
//!
//! In-memory cache with write-through to a JSON file under the data dir.
//! Snapshots are append-only; the only deletions come from the retention
//! policies. Every method takes and releases the cache lock on its own, so
//! each call is one unit of work against the store.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use time::OffsetDateTime;
use tracing::info;

use crate::models::Snapshot;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct SnapshotStore {
    storage_path: PathBuf,
    cache: Mutex<Vec<Snapshot>>,
}

impl SnapshotStore {
    pub fn new<P: Into<PathBuf>>(storage_path: P) -> Result<Self, StoreError> {
        let path = storage_path.into();
        let store = Self {
            storage_path: path.clone(),
            cache: Mutex::new(Vec::new()),
        };
        store.load_from_disk()?;
        info!("snapshot store ready at {:?} ({} snapshots)", path, store.len());
        Ok(store)
    }

    fn load_from_disk(&self) -> Result<(), StoreError> {
        if !self.storage_path.exists() {
            fs::write(&self.storage_path, "[]")?;
        }
        let content = fs::read_to_string(&self.storage_path)?;
        let snapshots: Vec<Snapshot> = serde_json::from_str(&content)?;
        *self.cache.lock() = snapshots;
        Ok(())
    }

    fn save_to_disk(&self) -> Result<(), StoreError> {
        let json = {
            let cache = self.cache.lock();
            serde_json::to_string(&*cache)?
        };
        fs::write(&self.storage_path, json)?;
        Ok(())
    }

    /// Appends one snapshot and returns its id.
    pub fn insert(&self, snapshot: Snapshot) -> Result<String, StoreError> {
        let id = snapshot.id.clone();
        {
            let mut cache = self.cache.lock();
            cache.push(snapshot);
        }
        self.save_to_disk()?;
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_for(&self, machine_id: &str) -> usize {
        self.cache
            .lock()
            .iter()
            .filter(|s| s.machine_id == machine_id)
            .count()
    }

    pub fn latest_for(&self, machine_id: &str) -> Option<Snapshot> {
        self.cache
            .lock()
            .iter()
            .filter(|s| s.machine_id == machine_id)
            .max_by_key(|s| s.created_at)
            .cloned()
    }

    /// Most recent first.
    pub fn for_machine(&self, machine_id: &str, limit: usize) -> Vec<Snapshot> {
        let mut rows: Vec<Snapshot> = {
            let cache = self.cache.lock();
            cache
                .iter()
                .filter(|s| s.machine_id == machine_id)
                .cloned()
                .collect()
        };
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        rows
    }

    /// Every machine id with at least one stored snapshot.
    pub fn machine_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = {
            let cache = self.cache.lock();
            cache.iter().map(|s| s.machine_id.clone()).collect()
        };
        ids.sort();
        ids.dedup();
        ids
    }

    /// Deletes every snapshot strictly older than the cutoff, across all
    /// machines, as a single commit. Returns the number deleted.
    pub fn delete_older_than(&self, cutoff: OffsetDateTime) -> Result<usize, StoreError> {
        let deleted = {
            let mut cache = self.cache.lock();
            let before = cache.len();
            cache.retain(|s| s.created_at >= cutoff);
            before - cache.len()
        };
        if deleted > 0 {
            self.save_to_disk()?;
        }
        Ok(deleted)
    }

    /// Keeps the `keep` most recent snapshots of one machine and deletes the
    /// rest by id. Returns the number deleted.
    pub fn trim_to_latest(&self, machine_id: &str, keep: usize) -> Result<usize, StoreError> {
        let deleted = {
            let mut cache = self.cache.lock();
            let mut owned: Vec<(OffsetDateTime, String)> = cache
                .iter()
                .filter(|s| s.machine_id == machine_id)
                .map(|s| (s.created_at, s.id.clone()))
                .collect();
            if owned.len() <= keep {
                return Ok(0);
            }
            owned.sort_by(|a, b| b.0.cmp(&a.0));
            let stale: HashSet<String> = owned.into_iter().skip(keep).map(|(_, id)| id).collect();
            cache.retain(|s| !stale.contains(&s.id));
            stale.len()
        };
        self.save_to_disk()?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SnapshotSource;
    use crate::telemetry::TelemetryReport;

    fn snapshot(machine_id: &str, age_secs: i64) -> Snapshot {
        let mut s = Snapshot::from_report(machine_id, TelemetryReport::default(), SnapshotSource::Poll);
        s.created_at = OffsetDateTime::now_utc() - time::Duration::seconds(age_secs);
        s
    }

    fn store_in(dir: &tempfile::TempDir) -> SnapshotStore {
        SnapshotStore::new(dir.path().join("snapshots.json")).unwrap()
    }

    #[test]
    fn insert_count_and_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.insert(snapshot("atlas", 30)).unwrap();
        let newest = store.insert(snapshot("atlas", 10)).unwrap();
        store.insert(snapshot("vega", 5)).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.count_for("atlas"), 2);
        assert_eq!(store.latest_for("atlas").unwrap().id, newest);
        assert!(store.latest_for("ghost").is_none());
        assert_eq!(store.machine_ids(), vec!["atlas".to_string(), "vega".to_string()]);
    }

    #[test]
    fn history_is_recency_ordered_and_limited() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        for age in [50, 40, 30, 20, 10] {
            store.insert(snapshot("atlas", age)).unwrap();
        }

        let rows = store.for_machine("atlas", 3);
        assert_eq!(rows.len(), 3);
        assert!(rows[0].created_at > rows[1].created_at);
        assert!(rows[1].created_at > rows[2].created_at);
    }

    #[test]
    fn delete_older_than_keeps_the_cutoff_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let cutoff = OffsetDateTime::now_utc() - time::Duration::seconds(100);

        let mut at_cutoff = snapshot("atlas", 0);
        at_cutoff.created_at = cutoff;
        store.insert(at_cutoff).unwrap();
        store.insert(snapshot("atlas", 200)).unwrap();
        store.insert(snapshot("vega", 300)).unwrap();
        store.insert(snapshot("vega", 50)).unwrap();

        let deleted = store.delete_older_than(cutoff).unwrap();
        assert_eq!(deleted, 2);
        // The snapshot created exactly at the cutoff survives.
        assert_eq!(store.count_for("atlas"), 1);
        assert_eq!(store.count_for("vega"), 1);
    }

    #[test]
    fn trim_deletes_exactly_the_excess() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        for age in [60, 50, 40, 30, 20, 10] {
            store.insert(snapshot("atlas", age)).unwrap();
        }
        store.insert(snapshot("vega", 500)).unwrap();

        let deleted = store.trim_to_latest("atlas", 4).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count_for("atlas"), 4);
        // Other machines untouched, and the survivors are the newest ones.
        assert_eq!(store.count_for("vega"), 1);
        let oldest_kept = store.for_machine("atlas", 10).pop().unwrap();
        assert!(oldest_kept.created_at >= OffsetDateTime::now_utc() - time::Duration::seconds(41));

        assert_eq!(store.trim_to_latest("atlas", 4).unwrap(), 0);
    }

    #[test]
    fn reload_sees_persisted_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = store_in(&dir);
            store.insert(snapshot("atlas", 10)).unwrap();
            store.insert(snapshot("atlas", 20)).unwrap();
        }
        let reopened = store_in(&dir);
        assert_eq!(reopened.count_for("atlas"), 2);
    }
}
