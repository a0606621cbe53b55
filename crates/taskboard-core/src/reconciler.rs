//! Reconciler: decides which version of the collection a context shows.
//!
//! Two entry points, one rule each:
//! - local mutations always win; they are written through and shown
//! - external snapshots (bus signal, poll tick, remote fetch) are shown only
//!   if they are newer than the last snapshot this context accepted
//!
//! Conflicts resolve last-writer-wins at whole-collection granularity:
//! whichever context calls `Store::write` last owns the record.

use crate::bus::SyncBus;
use crate::codec;
use crate::location::{self, Location};
use crate::storage::StorageBackend;
use crate::store::{Snapshot, Store, StoreError};
use crate::task::{Task, ensure_unique_ids};
use tracing::{debug, info, warn};

/// Result of a local mutation.
#[derive(Debug)]
pub struct LocalCommit {
    /// Stamp of the persisted record, `None` when persisting failed
    pub updated_at: Option<u64>,
    /// Why persisting failed
    pub error: Option<StoreError>,
}

impl LocalCommit {
    pub fn persisted(&self) -> bool {
        self.updated_at.is_some()
    }
}

/// Where the startup sequence got the initial view from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupSource {
    /// Decoded from the location fragment and persisted
    Link { tasks: usize },
    /// Read from the store
    Store { updated_at: u64 },
    /// Nothing anywhere
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupReport {
    pub source: StartupSource,
    /// A fragment was present but did not decode
    pub invalid_link: bool,
    /// The link data could not be persisted (view still shows it)
    pub unpersisted: bool,
}

pub struct Reconciler<S, B> {
    store: Store<S, B>,
    view: Vec<Task>,
    last_seen: u64,
    reconciled_once: bool,
}

impl<S: StorageBackend, B: SyncBus> Reconciler<S, B> {
    pub fn new(store: Store<S, B>) -> Self {
        Self {
            store,
            view: Vec::new(),
            last_seen: 0,
            reconciled_once: false,
        }
    }

    /// The collection this context currently shows.
    pub fn view(&self) -> &[Task] {
        &self.view
    }

    /// Collection timestamp of the last accepted snapshot.
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    pub fn store(&self) -> &Store<S, B> {
        &self.store
    }

    /// Load the initial view.
    ///
    /// Priority: a share token in the location fragment (persisted at once and
    /// removed from the location), then the store, then nothing. A link
    /// overrides local state only here, at load time.
    pub fn startup(&mut self, location: &dyn Location) -> StartupReport {
        let mut invalid_link = false;

        let href = location.href().ok();
        if let Some(token) = href.as_deref().and_then(location::fragment_token) {
            match codec::decode(&token) {
                Some(mut tasks) => {
                    let rekeyed = ensure_unique_ids(&mut tasks);
                    if rekeyed > 0 {
                        warn!("Re-keyed {} duplicate task id(s) from shared link", rekeyed);
                    }
                    let count = tasks.len();
                    let commit = self.apply_local_mutation(tasks);
                    if let Some(href) = href.as_deref() {
                        Self::strip_fragment(location, href);
                    }
                    info!("Loaded {} task(s) from shared link", count);
                    return StartupReport {
                        source: StartupSource::Link { tasks: count },
                        invalid_link: false,
                        unpersisted: !commit.persisted(),
                    };
                }
                None => {
                    warn!("Location fragment is not a valid share token");
                    invalid_link = true;
                }
            }
        }

        let snapshot = self.store.load().into_snapshot().unwrap_or_default();
        let source = if snapshot.tasks.is_empty() {
            StartupSource::Empty
        } else {
            StartupSource::Store {
                updated_at: snapshot.updated_at,
            }
        };
        self.accept(snapshot);
        self.reconciled_once = true;

        StartupReport {
            source,
            invalid_link,
            unpersisted: false,
        }
    }

    fn strip_fragment(location: &dyn Location, href: &str) {
        match location::set_fragment(href, None) {
            Ok(clean) => {
                if let Err(e) = location.replace(&clean) {
                    debug!("Could not clear share token from location: {}", e);
                }
            }
            Err(e) => debug!("Could not clear share token from location: {}", e),
        }
    }

    /// Adopt `tasks` as this context's state and write it through.
    ///
    /// The view always changes. `last_seen` advances only when the write
    /// persisted, so a failed write never hides a newer record written by
    /// someone else.
    pub fn apply_local_mutation(&mut self, tasks: Vec<Task>) -> LocalCommit {
        let commit = match self.store.write(&tasks) {
            Ok(stamp) => {
                self.last_seen = stamp;
                LocalCommit {
                    updated_at: Some(stamp),
                    error: None,
                }
            }
            Err(e) => {
                warn!("Local change kept in memory only: {}", e);
                LocalCommit {
                    updated_at: None,
                    error: Some(e),
                }
            }
        };
        self.view = tasks;
        self.reconciled_once = true;
        commit
    }

    /// Record a local mutation that was persisted elsewhere (remote save).
    pub fn adopt_local(&mut self, tasks: Vec<Task>, updated_at: u64) {
        self.view = tasks;
        self.last_seen = self.last_seen.max(updated_at);
        self.reconciled_once = true;
    }

    /// Clear the store, then the view.
    ///
    /// The clear is stamped like a write, so snapshots read before it stay
    /// stale afterwards. On failure the view and watermark are untouched.
    pub fn clear(&mut self) -> Result<u64, StoreError> {
        let stamp = self.store.clear()?;
        self.view.clear();
        self.last_seen = self.last_seen.max(stamp);
        self.reconciled_once = true;
        Ok(stamp)
    }

    /// Re-read the store after a bus signal or poll tick.
    ///
    /// Returns whether the view changed hands. An unreadable record changes
    /// nothing.
    pub fn reconcile_from_external_signal(&mut self) -> bool {
        let Some(snapshot) = self.store.load().into_snapshot() else {
            debug!("Record unreadable, keeping current view");
            return false;
        };
        self.offer(snapshot)
    }

    /// Consider a snapshot obtained outside the store (e.g. a remote fetch).
    ///
    /// Accepted if it is the first reconciliation or if it is strictly newer
    /// than `last_seen`. Anything else is stale. A clear elsewhere arrives as
    /// an empty snapshot carrying the clear's stamp.
    pub fn offer(&mut self, snapshot: Snapshot) -> bool {
        let first = !self.reconciled_once;
        let newer = snapshot.updated_at > self.last_seen;

        if !(first || newer) {
            debug!(
                "Discarding stale snapshot ({} <= {})",
                snapshot.updated_at, self.last_seen
            );
            return false;
        }

        debug!(
            "Accepting snapshot at {} (last seen {}, {} task(s))",
            snapshot.updated_at,
            self.last_seen,
            snapshot.tasks.len()
        );
        self.reconciled_once = true;
        self.accept(snapshot);
        true
    }

    fn accept(&mut self, snapshot: Snapshot) {
        self.last_seen = snapshot.updated_at;
        self.view = snapshot.tasks;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BroadcastChannel, BroadcastHub};
    use crate::clock::ManualClock;
    use crate::location::MemoryLocation;
    use crate::storage::{MemoryArea, MemoryStorage, StorageError};
    use crate::store::CLEARED_SUFFIX;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    type TestReconciler = Reconciler<MemoryStorage, BroadcastChannel>;

    fn context(area: &MemoryArea, hub: &BroadcastHub, clock: &ManualClock) -> TestReconciler {
        let store = Store::with_key(area.open(), hub.open("chan"), "taskboard:ws")
            .with_clock(clock.clone());
        Reconciler::new(store)
    }

    fn tasks(label: &str) -> Vec<Task> {
        vec![Task::new(label, "1", "01/01", "Joe")]
    }

    #[test]
    fn test_first_reconcile_accepts_anything() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(100);
        let mut writer = context(&area, &hub, &clock);
        let mut reader = context(&area, &hub, &clock);

        writer.apply_local_mutation(tasks("a"));
        assert!(reader.reconcile_from_external_signal());
        assert_eq!(reader.view(), writer.view());
        assert_eq!(reader.last_seen(), 100);
    }

    #[test]
    fn test_stale_snapshot_is_discarded() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(100);
        let mut writer = context(&area, &hub, &clock);
        let mut reader = context(&area, &hub, &clock);

        writer.apply_local_mutation(tasks("a"));
        reader.reconcile_from_external_signal();

        // Reader writes locally at a later time
        clock.set(200);
        let mine = tasks("mine");
        reader.apply_local_mutation(mine.clone());
        let seen = reader.last_seen();

        // An older snapshot shows up (slow poll)
        assert!(!reader.offer(Snapshot::new(tasks("old"), 150)));
        assert!(!reader.offer(Snapshot::new(tasks("same"), seen)));
        assert_eq!(reader.view(), mine.as_slice());
        assert_eq!(reader.last_seen(), seen);
    }

    #[test]
    fn test_newer_snapshot_replaces_view() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(100);
        let mut a = context(&area, &hub, &clock);
        let mut b = context(&area, &hub, &clock);
        a.startup(&MemoryLocation::new("https://b.example/"));
        b.startup(&MemoryLocation::new("https://b.example/"));

        clock.set(300);
        let newer = tasks("newer");
        a.apply_local_mutation(newer.clone());

        assert!(b.reconcile_from_external_signal());
        assert_eq!(b.view(), newer.as_slice());
        assert_eq!(b.last_seen(), 300);

        // Same record again is redundant
        assert!(!b.reconcile_from_external_signal());
    }

    #[test]
    fn test_local_mutation_wins_over_pending_signal() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(100);
        let mut a = context(&area, &hub, &clock);
        let mut b = context(&area, &hub, &clock);
        b.startup(&MemoryLocation::new("https://b.example/"));

        // A writes; B has not reconciled yet and makes its own edit
        clock.set(200);
        a.apply_local_mutation(tasks("from a"));
        clock.set(150);
        let local = tasks("from b");
        let commit = b.apply_local_mutation(local.clone());

        assert!(commit.persisted());
        assert_eq!(b.view(), local.as_slice());
        // Stamp passed A's record even though B's clock is behind
        assert!(b.last_seen() > 200);

        // The late signal from A's write now reads B's own record: no change
        assert!(!b.reconcile_from_external_signal());
        assert_eq!(b.view(), local.as_slice());
    }

    #[test]
    fn test_failed_write_keeps_view_but_not_watermark() {
        let area = MemoryArea::with_quota(32);
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(100);
        let mut ctx = context(&area, &hub, &clock);

        let local = tasks("too big for quota");
        let commit = ctx.apply_local_mutation(local.clone());
        assert!(!commit.persisted());
        assert!(commit.error.is_some());
        assert_eq!(ctx.view(), local.as_slice());
        assert_eq!(ctx.last_seen(), 0);
    }

    #[test]
    fn test_clear_propagates_to_other_contexts() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(100);
        let mut a = context(&area, &hub, &clock);
        let mut b = context(&area, &hub, &clock);

        a.apply_local_mutation(tasks("a"));
        b.reconcile_from_external_signal();
        assert_eq!(b.view().len(), 1);

        let stamp = a.clear().unwrap();
        assert!(stamp > 100);
        assert!(b.reconcile_from_external_signal());
        assert!(b.view().is_empty());
        assert_eq!(b.last_seen(), stamp);

        // Nothing new: polling again changes nothing
        assert!(!b.reconcile_from_external_signal());
    }

    #[test]
    fn test_snapshot_read_before_clear_stays_stale() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(100);
        let mut ctx = context(&area, &hub, &clock);

        ctx.apply_local_mutation(tasks("old"));
        let in_flight = ctx.store().read();
        ctx.clear().unwrap();

        assert!(!ctx.offer(in_flight));
        assert!(ctx.view().is_empty());
        assert!(ctx.last_seen() > 100);
    }

    #[test]
    fn test_other_context_ignores_snapshot_older_than_clear() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(100);
        let mut a = context(&area, &hub, &clock);
        let mut b = context(&area, &hub, &clock);

        a.apply_local_mutation(tasks("old"));
        b.reconcile_from_external_signal();
        let in_flight = b.store().read();

        a.clear().unwrap();
        assert!(b.reconcile_from_external_signal());
        assert!(!b.offer(in_flight));
        assert!(b.view().is_empty());
    }

    #[test]
    fn test_write_after_clear_is_newer_than_clear() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let fast = ManualClock::new(900);
        let slow = ManualClock::new(100);
        let mut a = context(&area, &hub, &fast);
        let mut b = context(&area, &hub, &slow);

        a.apply_local_mutation(tasks("a"));
        a.clear().unwrap();

        // B's clock is behind A's, its write still orders after the clear
        let fresh = tasks("fresh");
        b.apply_local_mutation(fresh.clone());
        assert!(a.reconcile_from_external_signal());
        assert_eq!(a.view(), fresh.as_slice());
    }

    /// Storage whose reads, or removals of the record, can be made to fail.
    #[derive(Clone)]
    struct Flaky {
        inner: MemoryStorage,
        fail_get: Arc<AtomicBool>,
        fail_remove: Arc<AtomicBool>,
    }

    impl Flaky {
        fn new(inner: MemoryStorage) -> Self {
            Self {
                inner,
                fail_get: Arc::new(AtomicBool::new(false)),
                fail_remove: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl StorageBackend for Flaky {
        fn get(&self, key: &str) -> crate::storage::Result<Option<String>> {
            if self.fail_get.load(Ordering::Relaxed) {
                return Err(StorageError::Io("disk went away".into()));
            }
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> crate::storage::Result<()> {
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> crate::storage::Result<()> {
            if self.fail_remove.load(Ordering::Relaxed) && !key.ends_with(CLEARED_SUFFIX) {
                return Err(StorageError::Io("read-only".into()));
            }
            self.inner.remove(key)
        }
    }

    fn flaky_context(
        flaky: &Flaky,
        hub: &BroadcastHub,
        clock: &ManualClock,
    ) -> Reconciler<Flaky, BroadcastChannel> {
        let store = Store::with_key(flaky.clone(), hub.open("chan"), "taskboard:ws")
            .with_clock(clock.clone());
        Reconciler::new(store)
    }

    #[test]
    fn test_read_error_keeps_view() {
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(100);
        let flaky = Flaky::new(MemoryStorage::new());
        let mut ctx = flaky_context(&flaky, &hub, &clock);

        let written = tasks("kept");
        ctx.apply_local_mutation(written.clone());
        flaky.fail_get.store(true, Ordering::Relaxed);

        assert!(!ctx.reconcile_from_external_signal());
        assert_eq!(ctx.view(), written.as_slice());
        assert_eq!(ctx.last_seen(), 100);
    }

    #[test]
    fn test_malformed_record_after_good_one_keeps_view() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(100);
        let mut a = context(&area, &hub, &clock);
        let mut b = context(&area, &hub, &clock);

        a.apply_local_mutation(tasks("good"));
        b.reconcile_from_external_signal();

        a.store().storage().set("taskboard:ws", r#"{"tasks": "nope"}"#).unwrap();
        assert!(!b.reconcile_from_external_signal());
        assert_eq!(b.view(), a.view());
        assert_eq!(b.last_seen(), 100);
    }

    #[test]
    fn test_failed_clear_keeps_view_and_record() {
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(100);
        let flaky = Flaky::new(MemoryStorage::new());
        let mut ctx = flaky_context(&flaky, &hub, &clock);

        let written = tasks("kept");
        ctx.apply_local_mutation(written.clone());
        flaky.fail_remove.store(true, Ordering::Relaxed);

        assert!(ctx.clear().is_err());
        assert_eq!(ctx.view(), written.as_slice());
        assert_eq!(ctx.last_seen(), 100);
        assert_eq!(ctx.store().read().tasks, written);
        // No clear stamp left behind either
        assert_eq!(flaky.inner.get("taskboard:ws:cleared").unwrap(), None);
        assert!(!ctx.reconcile_from_external_signal());
    }

    #[test]
    fn test_startup_prefers_link_and_persists_it() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(100);
        let mut existing = context(&area, &hub, &clock);
        existing.apply_local_mutation(tasks("stored"));

        let shared = tasks("shared ✓");
        let href = format!("https://b.example/?ws=ws#{}", codec::encode(&shared));
        let location = MemoryLocation::new(href);

        clock.set(500);
        let mut ctx = context(&area, &hub, &clock);
        let report = ctx.startup(&location);

        assert_eq!(report.source, StartupSource::Link { tasks: 1 });
        assert_eq!(ctx.view(), shared.as_slice());
        assert_eq!(ctx.store().read().tasks, shared);
        // Token removed from the location, workspace param kept
        assert_eq!(location.href().unwrap(), "https://b.example/?ws=ws");
    }

    #[test]
    fn test_startup_falls_back_to_store_on_bad_link() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(100);
        let mut existing = context(&area, &hub, &clock);
        let stored = tasks("stored");
        existing.apply_local_mutation(stored.clone());

        let location = MemoryLocation::new("https://b.example/#garbage!!");
        let mut ctx = context(&area, &hub, &clock);
        let report = ctx.startup(&location);

        assert!(report.invalid_link);
        assert_eq!(report.source, StartupSource::Store { updated_at: 100 });
        assert_eq!(ctx.view(), stored.as_slice());
    }

    #[test]
    fn test_startup_empty() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let mut ctx = context(&area, &hub, &ManualClock::new(1));
        let report = ctx.startup(&MemoryLocation::new("https://b.example/?ws=x"));
        assert_eq!(report.source, StartupSource::Empty);
        assert!(!report.invalid_link);
        assert!(ctx.view().is_empty());
    }

    #[test]
    fn test_adopt_local_never_moves_watermark_back() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let mut ctx = context(&area, &hub, &ManualClock::new(1));
        ctx.offer(Snapshot::new(tasks("x"), 900));
        ctx.adopt_local(tasks("y"), 500);
        assert_eq!(ctx.last_seen(), 900);
        assert_eq!(ctx.view()[0].activity, "y");
    }
}
