//! A remote store with network-like latency, for exercising the polling
//! sync mode without a backend.

use async_trait::async_trait;
use std::time::Duration;
use taskboard_core::remote::{RemoteStore, Result};
use taskboard_core::store::Snapshot;
use taskboard_core::task::Task;
use tracing::debug;

/// Delays every call to `inner` by a fixed latency.
pub struct SimulatedRemote<R> {
    inner: R,
    latency: Duration,
}

impl<R> SimulatedRemote<R> {
    pub fn new(inner: R, latency: Duration) -> Self {
        Self { inner, latency }
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[async_trait]
impl<R: RemoteStore + Send + Sync> RemoteStore for SimulatedRemote<R> {
    async fn fetch(&self) -> Result<Snapshot> {
        tokio::time::sleep(self.latency).await;
        let snapshot = self.inner.fetch().await?;
        debug!("Simulated fetch returned stamp {}", snapshot.updated_at);
        Ok(snapshot)
    }

    async fn save(&mut self, tasks: Vec<Task>) -> Result<u64> {
        tokio::time::sleep(self.latency).await;
        self.inner.save(tasks).await
    }

    async fn clear(&mut self) -> Result<()> {
        tokio::time::sleep(self.latency).await;
        self.inner.clear().await
    }
}
