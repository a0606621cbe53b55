//! Suppression of file-watcher echoes of our own writes.
//!
//! Writing the record file makes the watcher report it a moment later. That
//! event must not be treated as a change from another process, so writes
//! mark the file first and the watcher path consumes the mark.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Marks older than this are stale and ignored.
const MARK_TTL: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
pub struct EchoGuard {
    marks: Arc<Mutex<HashMap<String, Instant>>>,
}

impl EchoGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `name` as about to be written by us.
    pub fn mark(&self, name: &str) {
        self.marks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), Instant::now());
    }

    /// Drop a mark for a write that did not happen.
    pub fn forget(&self, name: &str) {
        self.marks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
    }

    /// Whether the event for `name` is our own echo. Consumes the mark, so
    /// this returns true at most once per write.
    pub fn consume(&self, name: &str) -> bool {
        let mut marks = self.marks.lock().unwrap_or_else(|e| e.into_inner());
        // Expired marks fall through as foreign changes
        matches!(marks.remove(name), Some(at) if at.elapsed() < MARK_TTL)
    }

    /// Remove expired marks.
    pub fn cleanup_expired(&self) {
        self.marks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, at| at.elapsed() < MARK_TTL);
    }

    pub fn len(&self) -> usize {
        self.marks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
