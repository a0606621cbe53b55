//! Store: the durable record of one workspace's task collection.
//!
//! The record is a single JSON value `{ "tasks": [...], "updatedAt": ms }`
//! kept under one storage key. It is always written whole; there are no
//! per-task or delta writes. Every successful write and every clear
//! notifies the sync bus.
//!
//! Clearing removes the record but leaves its stamp behind under
//! `"{key}{CLEARED_SUFFIX}"`, so a clear orders against writes like any
//! other change.

use crate::bus::SyncBus;
use crate::clock::{Clock, SystemClock};
use crate::config::BoardConfig;
use crate::storage::{StorageBackend, StorageError};
use crate::task::Task;
use crate::workspace::Workspace;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Suffix of the key holding the stamp of the last clear.
pub const CLEARED_SUFFIX: &str = ":cleared";

/// A complete task collection and the collection timestamp it was written with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Milliseconds since Unix epoch; 0 means "never written".
    #[serde(default)]
    pub updated_at: u64,
}

impl Snapshot {
    pub fn new(tasks: Vec<Task>, updated_at: u64) -> Self {
        Self { tasks, updated_at }
    }

    /// The default returned when no usable record exists.
    pub fn is_absent(&self) -> bool {
        self.updated_at == 0 && self.tasks.is_empty()
    }
}

/// What `Store::load` found under the record key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Present(Snapshot),
    /// No record. `cleared_at` is the stamp of the clear that removed it,
    /// 0 if it was never written or the clear left no stamp.
    Missing { cleared_at: u64 },
    /// The backend failed or the record did not decode. Says nothing about
    /// what other contexts see.
    Unreadable,
}

impl Record {
    /// The snapshot this record stands for, `None` when unreadable.
    ///
    /// A stamped clear is an empty collection carrying the clear's stamp.
    pub fn into_snapshot(self) -> Option<Snapshot> {
        match self {
            Record::Present(snapshot) => Some(snapshot),
            Record::Missing { cleared_at } => Some(Snapshot::new(Vec::new(), cleared_at)),
            Record::Unreadable => None,
        }
    }
}

/// Accepted record shapes. Early dashboards stored the bare task array.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Stamped(Snapshot),
    Bare(Vec<Task>),
}

pub struct Store<S, B> {
    storage: S,
    bus: B,
    key: String,
    cleared_key: String,
    clock: Arc<dyn Clock>,
    /// Highest stamp this store has written
    last_stamp: u64,
}

impl<S: StorageBackend, B: SyncBus> Store<S, B> {
    /// Store for `workspace`, keyed by the configured prefix.
    pub fn new(storage: S, bus: B, workspace: &Workspace, config: &BoardConfig) -> Self {
        Self::with_key(storage, bus, workspace.record_key(&config.storage_prefix))
    }

    pub fn with_key(storage: S, bus: B, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            storage,
            bus,
            cleared_key: format!("{key}{CLEARED_SUFFIX}"),
            key,
            clock: Arc::new(SystemClock),
            last_stamp: 0,
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Current record, or the empty default if it is missing or malformed.
    pub fn read(&self) -> Snapshot {
        match self.load() {
            Record::Present(snapshot) => snapshot,
            Record::Missing { .. } | Record::Unreadable => Snapshot::default(),
        }
    }

    /// Current record, telling a missing record apart from an unreadable one.
    pub fn load(&self) -> Record {
        let raw = match self.storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                return Record::Missing {
                    cleared_at: self.cleared_at(),
                };
            }
            Err(e) => {
                warn!("Failed to read {}: {}", self.key, e);
                return Record::Unreadable;
            }
        };

        match serde_json::from_str::<StoredRecord>(&raw) {
            Ok(StoredRecord::Stamped(snapshot)) => Record::Present(snapshot),
            Ok(StoredRecord::Bare(tasks)) => {
                debug!("Read unstamped record under {}", self.key);
                Record::Present(Snapshot::new(tasks, 0))
            }
            Err(e) => {
                warn!("Ignoring malformed record under {}: {}", self.key, e);
                Record::Unreadable
            }
        }
    }

    /// Stamp of the last clear, 0 if none is recorded.
    fn cleared_at(&self) -> u64 {
        match self.storage.get(&self.cleared_key) {
            Ok(Some(raw)) => raw.trim().parse().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                debug!("Failed to read {}: {}", self.cleared_key, e);
                0
            }
        }
    }

    /// Next stamp: the wall clock, bumped past the stored record or clear
    /// and past our own last stamp.
    fn next_stamp(&self) -> u64 {
        let stored = match self.load() {
            Record::Present(snapshot) => snapshot.updated_at.max(self.cleared_at()),
            Record::Missing { cleared_at } => cleared_at,
            Record::Unreadable => self.cleared_at(),
        };
        self.clock
            .now_ms()
            .max(stored.saturating_add(1))
            .max(self.last_stamp.saturating_add(1))
    }

    /// Persist `tasks` as the whole record and notify the bus.
    ///
    /// The stamp strictly increases even when the clock stalls or another
    /// context's clock runs ahead.
    pub fn write(&mut self, tasks: &[Task]) -> Result<u64> {
        let stamp = self.next_stamp();

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct RecordRef<'a> {
            tasks: &'a [Task],
            updated_at: u64,
        }

        let raw = serde_json::to_string(&RecordRef {
            tasks,
            updated_at: stamp,
        })?;
        self.storage.set(&self.key, &raw)?;
        self.last_stamp = stamp;
        debug!("Wrote {} task(s) to {} at {}", tasks.len(), self.key, stamp);

        self.bus.notify();
        Ok(stamp)
    }

    /// Remove the record and notify the bus. Clearing twice is fine.
    ///
    /// Returns the stamp of the clear. Nothing changes if it fails.
    pub fn clear(&mut self) -> Result<u64> {
        let stamp = self.next_stamp();
        let previous = self.storage.get(&self.cleared_key).ok().flatten();
        self.storage.set(&self.cleared_key, &stamp.to_string())?;

        if let Err(e) = self.storage.remove(&self.key) {
            let restored = match &previous {
                Some(raw) => self.storage.set(&self.cleared_key, raw),
                None => self.storage.remove(&self.cleared_key),
            };
            if let Err(restore) = restored {
                warn!("Failed to restore {}: {}", self.cleared_key, restore);
            }
            return Err(e.into());
        }

        self.last_stamp = stamp;
        debug!("Cleared {} at {}", self.key, stamp);
        self.bus.notify();
        Ok(stamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BroadcastHub;
    use crate::clock::ManualClock;
    use crate::storage::{MemoryArea, MemoryStorage};

    fn store_on(
        storage: MemoryStorage,
        hub: &BroadcastHub,
        clock: &ManualClock,
    ) -> Store<MemoryStorage, crate::bus::BroadcastChannel> {
        Store::with_key(storage, hub.open("chan"), "taskboard:test").with_clock(clock.clone())
    }

    fn tasks() -> Vec<Task> {
        vec![
            Task::new("A", "1", "01/01", "Joe"),
            Task::new("B", "N/A", "", "Ana"),
        ]
    }

    #[test]
    fn test_read_missing_record_is_empty() {
        let hub = BroadcastHub::new();
        let store = store_on(MemoryStorage::new(), &hub, &ManualClock::new(1));
        assert_eq!(store.read(), Snapshot::default());
        assert!(store.read().is_absent());
    }

    #[test]
    fn test_write_then_read() {
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(5_000);
        let mut store = store_on(MemoryStorage::new(), &hub, &clock);

        let tasks = tasks();
        let stamp = store.write(&tasks).unwrap();
        assert_eq!(stamp, 5_000);
        assert_eq!(store.read(), Snapshot::new(tasks, 5_000));
    }

    #[test]
    fn test_record_shape() {
        let hub = BroadcastHub::new();
        let storage = MemoryStorage::new();
        let mut store = store_on(storage.clone(), &hub, &ManualClock::new(42));
        store.write(&tasks()).unwrap();

        let raw = storage.get("taskboard:test").unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["updatedAt"], 42);
        assert_eq!(json["tasks"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_stamps_strictly_increase_when_clock_stalls() {
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(1_000);
        let mut store = store_on(MemoryStorage::new(), &hub, &clock);

        let first = store.write(&tasks()).unwrap();
        let second = store.write(&tasks()).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_stamp_passes_record_from_faster_clock() {
        let hub = BroadcastHub::new();
        let area = MemoryArea::new();
        let mut ahead = store_on(area.open(), &hub, &ManualClock::new(9_000));
        let mut behind = store_on(area.open(), &hub, &ManualClock::new(1_000));

        let theirs = ahead.write(&tasks()).unwrap();
        let ours = behind.write(&tasks()).unwrap();
        assert!(ours > theirs);
    }

    #[test]
    fn test_malformed_record_reads_empty() {
        let hub = BroadcastHub::new();
        let storage = MemoryStorage::new();
        storage.set("taskboard:test", "{not json").unwrap();
        let store = store_on(storage.clone(), &hub, &ManualClock::new(1));
        assert!(store.read().is_absent());

        storage.set("taskboard:test", r#"{"tasks": 7}"#).unwrap();
        assert!(store.read().is_absent());
    }

    #[test]
    fn test_bare_array_record_reads_unstamped() {
        let hub = BroadcastHub::new();
        let storage = MemoryStorage::new();
        storage
            .set(
                "taskboard:test",
                r#"[{"id":"1","activity":"A","performer":"Joe","status":"Concluído"}]"#,
            )
            .unwrap();
        let store = store_on(storage, &hub, &ManualClock::new(1));
        let snapshot = store.read();
        assert_eq!(snapshot.updated_at, 0);
        assert_eq!(snapshot.tasks.len(), 1);
    }

    #[test]
    fn test_load_tells_missing_from_unreadable() {
        let hub = BroadcastHub::new();
        let storage = MemoryStorage::new();
        let store = store_on(storage.clone(), &hub, &ManualClock::new(1));
        assert_eq!(store.load(), Record::Missing { cleared_at: 0 });

        storage.set("taskboard:test", "{not json").unwrap();
        assert_eq!(store.load(), Record::Unreadable);
        assert_eq!(store.load().into_snapshot(), None);
    }

    #[test]
    fn test_clear_is_stamped_past_the_record() {
        let hub = BroadcastHub::new();
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(500);
        let mut store = store_on(storage.clone(), &hub, &clock);
        let written = store.write(&tasks()).unwrap();

        let cleared = store.clear().unwrap();
        assert!(cleared > written);
        assert_eq!(store.load(), Record::Missing { cleared_at: cleared });
        assert_eq!(
            store.load().into_snapshot(),
            Some(Snapshot::new(Vec::new(), cleared))
        );
        assert_eq!(
            storage.get("taskboard:test:cleared").unwrap(),
            Some(cleared.to_string())
        );

        // A later write passes the clear even with the clock stalled
        assert!(store.write(&tasks()).unwrap() > cleared);
    }

    #[test]
    fn test_clear_twice_then_read() {
        let hub = BroadcastHub::new();
        let mut store = store_on(MemoryStorage::new(), &hub, &ManualClock::new(1));
        store.write(&tasks()).unwrap();

        store.clear().unwrap();
        assert_eq!(store.read(), Snapshot::default());
        store.clear().unwrap();
        assert_eq!(store.read(), Snapshot::default());
    }

    #[test]
    fn test_write_and_clear_notify_other_contexts() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hub = BroadcastHub::new();
        let area = MemoryArea::new();
        let clock = ManualClock::new(1);
        let mut writer = store_on(area.open(), &hub, &clock);
        let reader = store_on(area.open(), &hub, &clock);

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let _sub = reader.bus().subscribe(Box::new(move || {
            count_clone.fetch_add(1, Ordering::Relaxed);
        }));
        let own = Arc::new(AtomicUsize::new(0));
        let own_clone = Arc::clone(&own);
        let _own_sub = writer.bus().subscribe(Box::new(move || {
            own_clone.fetch_add(1, Ordering::Relaxed);
        }));

        writer.write(&tasks()).unwrap();
        writer.clear().unwrap();
        assert_eq!(count.load(Ordering::Relaxed), 2);
        assert_eq!(own.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_failed_write_does_not_notify() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hub = BroadcastHub::new();
        let area = MemoryArea::with_quota(64);
        let clock = ManualClock::new(1);
        let mut writer = store_on(area.open(), &hub, &clock);
        let reader = store_on(area.open(), &hub, &clock);

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let _sub = reader.bus().subscribe(Box::new(move || {
            count_clone.fetch_add(1, Ordering::Relaxed);
        }));

        let err = writer.write(&tasks()).unwrap_err();
        assert!(matches!(err, StoreError::Storage(StorageError::QuotaExceeded { .. })));
        assert_eq!(count.load(Ordering::Relaxed), 0);
        assert!(writer.read().is_absent());
    }
}
