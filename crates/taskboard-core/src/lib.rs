//! taskboard-core: workspace-scoped task board with last-writer-wins sync.
//!
//! This crate provides the core functionality for:
//! - The task model and its status transitions
//! - Persisting a workspace's whole collection under one storage key
//! - Change signals between contexts sharing that storage
//! - Reconciling local edits with snapshots written elsewhere
//! - CSV import, share links, statistics and spreadsheet export
//! - Storage, Location and SyncBus trait abstractions for each host

pub mod bus;
pub mod clock;
pub mod codec;
pub mod config;
pub mod dashboard;
pub mod export;
pub mod history;
pub mod import;
pub mod location;
pub mod reconciler;
pub mod remote;
pub mod share;
pub mod stats;
pub mod storage;
pub mod store;
pub mod task;
pub mod workspace;

pub use bus::{BroadcastChannel, BroadcastHub, ChangeBus, Listener, StorageEventBus, Subscription, SyncBus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BoardConfig, ConfigError};
pub use dashboard::{Dashboard, Notice, ObservationDraft, Severity};
pub use import::{ImportError, ImportReport};
pub use location::{Location, LocationError, MemoryLocation};
pub use reconciler::{LocalCommit, Reconciler, StartupReport, StartupSource};
pub use remote::{RemoteError, RemoteStore};
pub use share::ShareError;
pub use stats::{BoardStats, PerformerStats, TaskFilter};
pub use storage::{MemoryArea, MemoryStorage, StorageBackend, StorageError};
pub use store::{Record, Snapshot, Store, StoreError};
pub use task::{Audit, Task, TaskStatus, TransitionError};
pub use workspace::{Workspace, WorkspaceId, WorkspaceResolver, WorkspaceSource};
