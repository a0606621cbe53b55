//! Debounced watcher for record files in the data directory.
//!
//! Uses notify-debouncer-mini so a burst of writes to one file arrives as
//! a single event.

use crate::file_storage::RECORD_EXT;
use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{DebouncedEvent, new_debouncer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// A record file changed on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEvent {
    /// File name within the data directory
    pub file_name: String,
    pub kind: RecordEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordEventKind {
    /// Written or replaced
    Modified,
    /// Removed (board cleared)
    Deleted,
}

pub struct FileWatcher {
    dir: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<RecordEvent>,
}

impl FileWatcher {
    /// Watch `dir` (non-recursively) with a 200ms debounce period.
    pub fn new(dir: PathBuf) -> Result<Self> {
        // FSEvents on macOS needs the resolved path (/var -> /private/var)
        let dir = dir.canonicalize().unwrap_or(dir);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let dir_clone = dir.clone();

        let mut debouncer = new_debouncer(
            Duration::from_millis(200),
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(record_event) = Self::process_event(&event, &dir_clone) {
                            if event_tx.send(record_event).is_err() {
                                // Receiver dropped
                                return;
                            }
                        }
                    }
                }
                Err(e) => error!("File watcher error: {}", e),
            },
        )?;

        debouncer
            .watcher()
            .watch(&dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            dir,
            _debouncer: debouncer,
            event_rx,
        })
    }

    /// Turn a debounced event into a record event if it concerns a record.
    pub fn process_event(event: &DebouncedEvent, dir: &Path) -> Option<RecordEvent> {
        let relative = event.path.strip_prefix(dir).ok()?;
        let file_name = relative.to_str()?;

        // Temp files and anything nested
        if file_name.starts_with('.') || file_name.contains(std::path::MAIN_SEPARATOR) {
            return None;
        }
        if event.path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
            return None;
        }

        let kind = if event.path.exists() {
            RecordEventKind::Modified
        } else {
            RecordEventKind::Deleted
        };
        debug!("Record event: {:?} - {}", kind, file_name);

        Some(RecordEvent {
            file_name: file_name.to_string(),
            kind,
        })
    }

    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<RecordEvent> {
        &mut self.event_rx
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
