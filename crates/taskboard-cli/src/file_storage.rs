//! File-backed storage: one JSON file per key under a data directory.
//!
//! Several processes may share the directory, the same way several tabs
//! share browser storage. Changes made by other processes reach `watch`
//! listeners when the host feeds watcher events to `deliver_change`.

use crate::echo::EchoGuard;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use taskboard_core::bus::{Listener, ListenerSet, Subscription};
use taskboard_core::storage::{Result, StorageBackend, StorageError};
use tracing::debug;

/// Extension of record files.
pub const RECORD_EXT: &str = "json";

struct Inner {
    dir: PathBuf,
    echoes: EchoGuard,
    /// file name -> listeners watching the key stored there
    watchers: RwLock<HashMap<String, Arc<ListenerSet>>>,
}

/// Storage rooted at a directory. Cloning shares the directory handle,
/// echo marks and watchers.
#[derive(Clone)]
pub struct FileStorage {
    inner: Arc<Inner>,
}

impl FileStorage {
    /// Open storage in `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| StorageError::Unavailable(format!("{}: {}", dir.display(), e)))?;
        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                echoes: EchoGuard::new(),
                watchers: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// File name holding `key`.
    ///
    /// ASCII letters, digits and `-` are kept; every other byte becomes
    /// `_xx` (hex), so distinct keys never share a file.
    pub fn file_name(key: &str) -> String {
        let mut stem = String::with_capacity(key.len());
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                stem.push(byte as char);
            } else {
                stem.push_str(&format!("_{:02x}", byte));
            }
        }
        format!("{}.{}", stem, RECORD_EXT)
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.inner.dir.join(Self::file_name(key))
    }

    pub fn echoes(&self) -> &EchoGuard {
        &self.inner.echoes
    }

    /// Feed a watcher event for `file_name`.
    ///
    /// Echoes of our own writes are dropped. Returns whether any listener
    /// was run.
    pub fn deliver_change(&self, file_name: &str) -> bool {
        if self.inner.echoes.consume(file_name) {
            debug!("Skipping change to {} (own write)", file_name);
            return false;
        }

        let set = self
            .inner
            .watchers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(file_name)
            .cloned();
        match set {
            Some(set) if !set.is_empty() => {
                debug!("Delivering external change to {}", file_name);
                set.emit();
                true
            }
            _ => false,
        }
    }

    fn io_error(path: &Path, e: std::io::Error) -> StorageError {
        StorageError::Io(format!("{}: {}", path.display(), e))
    }
}

impl StorageBackend for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_error(&path, e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let name = Self::file_name(key);
        let path = self.inner.dir.join(&name);
        // Hidden temp file, so the watcher ignores it; the rename is atomic
        let tmp = self.inner.dir.join(format!(".{}.tmp", name));

        self.inner.echoes.mark(&name);
        let written = fs::write(&tmp, value).and_then(|()| fs::rename(&tmp, &path));
        if let Err(e) = written {
            self.inner.echoes.forget(&name);
            let _ = fs::remove_file(&tmp);
            return Err(Self::io_error(&path, e));
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let name = Self::file_name(key);
        let path = self.inner.dir.join(&name);

        self.inner.echoes.mark(&name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.echoes.forget(&name);
                if e.kind() == ErrorKind::NotFound {
                    Ok(())
                } else {
                    Err(Self::io_error(&path, e))
                }
            }
        }
    }

    fn watch(&self, key: &str, listener: Listener) -> Option<Subscription> {
        let set = Arc::clone(
            self.inner
                .watchers
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .entry(Self::file_name(key))
                .or_insert_with(|| Arc::new(ListenerSet::new())),
        );
        Some(set.subscribe(listener))
    }
}
