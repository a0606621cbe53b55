//! taskboard-cli library: the native host for a task board.
//!
//! Exposes the file-backed storage, watcher and session layers so the
//! binary and the integration tests share them.

pub mod echo;
pub mod file_storage;
pub mod render;
pub mod session;
pub mod simulated;
pub mod watcher;

pub use echo::EchoGuard;
pub use file_storage::FileStorage;
pub use session::{FileBoard, Session, SessionError, SessionOptions};
pub use simulated::SimulatedRemote;
pub use watcher::{FileWatcher, RecordEvent, RecordEventKind};
