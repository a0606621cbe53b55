//! Remote store: the same record behind an asynchronous API.
//!
//! Used when the board is served by a backend instead of shared browser
//! storage. There is no push channel, so the host polls. Results may arrive
//! late and out of order; every fetched snapshot goes through
//! `Reconciler::offer`, which drops the stale ones.

use crate::bus::SyncBus;
use crate::reconciler::Reconciler;
use crate::storage::StorageBackend;
use crate::store::{Snapshot, Store, StoreError};
use crate::task::Task;
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Remote store error: {0}")]
    Store(#[from] StoreError),

    #[error("Remote unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait RemoteStore {
    /// Current record.
    async fn fetch(&self) -> Result<Snapshot>;

    /// Replace the record; returns the stamp it was saved with.
    async fn save(&mut self, tasks: Vec<Task>) -> Result<u64>;

    async fn clear(&mut self) -> Result<()>;
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl<S, B> RemoteStore for Store<S, B>
where
    S: StorageBackend + Send + Sync,
    B: SyncBus + Send + Sync,
{
    async fn fetch(&self) -> Result<Snapshot> {
        self.load()
            .into_snapshot()
            .ok_or_else(|| RemoteError::Unavailable(format!("record {} is unreadable", self.key())))
    }

    async fn save(&mut self, tasks: Vec<Task>) -> Result<u64> {
        Ok(self.write(&tasks)?)
    }

    async fn clear(&mut self) -> Result<()> {
        Store::clear(self)?;
        Ok(())
    }
}

/// Fetch once and offer the result. Returns whether the view changed.
pub async fn poll_once<R, S, B>(remote: &R, reconciler: &mut Reconciler<S, B>) -> Result<bool>
where
    R: RemoteStore + ?Sized,
    S: StorageBackend,
    B: SyncBus,
{
    let snapshot = remote.fetch().await?;
    let changed = reconciler.offer(snapshot);
    debug!("Remote poll finished (changed: {})", changed);
    Ok(changed)
}

/// Save `tasks` remotely and make them the local view.
///
/// On failure the view is left alone and the error returned.
pub async fn commit<R, S, B>(
    remote: &mut R,
    reconciler: &mut Reconciler<S, B>,
    tasks: Vec<Task>,
) -> Result<u64>
where
    R: RemoteStore + ?Sized,
    S: StorageBackend,
    B: SyncBus,
{
    let stamp = remote.save(tasks.clone()).await?;
    reconciler.adopt_local(tasks, stamp);
    Ok(stamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BroadcastChannel, BroadcastHub};
    use crate::clock::ManualClock;
    use crate::storage::{MemoryArea, MemoryStorage};

    type TestStore = Store<MemoryStorage, BroadcastChannel>;

    fn remote(area: &MemoryArea, hub: &BroadcastHub, clock: &ManualClock) -> TestStore {
        Store::with_key(area.open(), hub.open("remote"), "taskboard:ws").with_clock(clock.clone())
    }

    fn local(hub: &BroadcastHub) -> Reconciler<MemoryStorage, BroadcastChannel> {
        Reconciler::new(Store::with_key(MemoryStorage::new(), hub.open("local"), "cache"))
    }

    fn tasks(label: &str) -> Vec<Task> {
        vec![Task::new(label, "1", "d", "Joe")]
    }

    #[tokio::test]
    async fn test_poll_picks_up_other_writer() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(100);
        let mut writer = remote(&area, &hub, &clock);
        let reader_remote = remote(&area, &hub, &clock);
        let mut reconciler = local(&hub);

        writer.save(tasks("first")).await.unwrap();
        assert!(poll_once(&reader_remote, &mut reconciler).await.unwrap());
        assert_eq!(reconciler.view()[0].activity, "first");
        assert!(!poll_once(&reader_remote, &mut reconciler).await.unwrap());
    }

    #[tokio::test]
    async fn test_late_fetch_is_discarded_after_local_commit() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(100);
        let mut other = remote(&area, &hub, &clock);
        let mut mine = remote(&area, &hub, &clock);
        let mut reconciler = local(&hub);

        other.save(tasks("theirs")).await.unwrap();
        // Fetch issued, but its result lands after our own save
        let in_flight = mine.fetch().await.unwrap();

        clock.set(200);
        let ours = tasks("ours");
        commit(&mut mine, &mut reconciler, ours.clone()).await.unwrap();

        assert!(!reconciler.offer(in_flight));
        assert_eq!(reconciler.view(), ours.as_slice());
    }

    #[tokio::test]
    async fn test_remote_clear_reaches_pollers() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(100);
        let mut writer = remote(&area, &hub, &clock);
        let mut reconciler = local(&hub);

        writer.save(tasks("x")).await.unwrap();
        poll_once(&writer, &mut reconciler).await.unwrap();
        assert_eq!(reconciler.view().len(), 1);

        RemoteStore::clear(&mut writer).await.unwrap();
        assert!(poll_once(&writer, &mut reconciler).await.unwrap());
        assert!(reconciler.view().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_record_fails_fetch() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(100);
        let mut writer = remote(&area, &hub, &clock);
        let mut reconciler = local(&hub);

        writer.save(tasks("x")).await.unwrap();
        poll_once(&writer, &mut reconciler).await.unwrap();

        writer.storage().set("taskboard:ws", "[oops").unwrap();
        let err = poll_once(&writer, &mut reconciler).await.unwrap_err();
        assert!(matches!(err, RemoteError::Unavailable(_)));
        assert_eq!(reconciler.view()[0].activity, "x");
    }

    #[tokio::test]
    async fn test_failed_save_leaves_view() {
        let area = MemoryArea::with_quota(8);
        let hub = BroadcastHub::new();
        let mut writer = remote(&area, &hub, &ManualClock::new(1));
        let mut reconciler = local(&hub);

        let err = commit(&mut writer, &mut reconciler, tasks("big")).await.unwrap_err();
        assert!(matches!(err, RemoteError::Store(_)));
        assert!(reconciler.view().is_empty());
    }
}
