//! Key/value storage abstraction behind the store.
//!
//! Modelled on the browser's `localStorage`: synchronous string get/set/remove
//! scoped to one origin. Implementations:
//! - `MemoryStorage` - in-process area shared by several contexts, for tests
//!   and for embedding several boards in one process
//! - `FileStorage` (in taskboard-cli) - one JSON file per key
//! - `JsStorageBridge` (in taskboard-wasm) - calls back into `localStorage`

use crate::bus::{Listener, ListenerSet, Subscription};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage quota exceeded writing {key} ({size} bytes)")]
    QuotaExceeded { key: String, size: usize },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Synchronous string storage.
pub trait StorageBackend {
    /// Read the value under `key`, `None` if unset.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value under `key` as a single unit.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Watch `key` for changes made by *other* contexts.
    ///
    /// Backends that cannot observe foreign writes return `None`.
    fn watch(&self, _key: &str, _listener: Listener) -> Option<Subscription> {
        None
    }
}

impl<T: StorageBackend + ?Sized> StorageBackend for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }

    fn watch(&self, key: &str, listener: Listener) -> Option<Subscription> {
        (**self).watch(key, listener)
    }
}

struct AreaInner {
    entries: RwLock<HashMap<String, String>>,
    /// (handle, key) -> listeners registered through that handle
    watchers: RwLock<HashMap<(usize, String), Arc<ListenerSet>>>,
    next_handle: AtomicUsize,
    /// Total bytes of keys + values allowed, if limited
    quota: Option<usize>,
}

/// A storage area shared by every context that opens a handle on it.
///
/// Like the browser, a write through one handle raises a storage event on
/// every *other* handle watching that key, and only when the value changed.
#[derive(Clone)]
pub struct MemoryArea {
    inner: Arc<AreaInner>,
}

impl MemoryArea {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// An area that refuses writes once `bytes` of keys plus values are held.
    pub fn with_quota(bytes: usize) -> Self {
        Self::build(Some(bytes))
    }

    fn build(quota: Option<usize>) -> Self {
        Self {
            inner: Arc::new(AreaInner {
                entries: RwLock::new(HashMap::new()),
                watchers: RwLock::new(HashMap::new()),
                next_handle: AtomicUsize::new(0),
                quota,
            }),
        }
    }

    /// Open a handle for one context.
    pub fn open(&self) -> MemoryStorage {
        MemoryStorage {
            area: self.clone(),
            handle: self.inner.next_handle.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Raw value under `key`, bypassing any handle.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.inner
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn used_bytes_without(&self, entries: &HashMap<String, String>, key: &str) -> usize {
        entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    fn fire(&self, origin: usize, key: &str) {
        let targets: Vec<_> = self
            .inner
            .watchers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|((handle, k), _)| *handle != origin && k == key)
            .map(|(_, set)| Arc::clone(set))
            .collect();
        for set in targets {
            set.emit();
        }
    }
}

impl Default for MemoryArea {
    fn default() -> Self {
        Self::new()
    }
}

/// One context's handle on a `MemoryArea`.
///
/// Clones share the handle identity, so they count as the same context.
#[derive(Clone)]
pub struct MemoryStorage {
    area: MemoryArea,
    handle: usize,
}

impl MemoryStorage {
    /// A standalone storage with its own private area.
    pub fn new() -> Self {
        MemoryArea::new().open()
    }

    pub fn area(&self) -> &MemoryArea {
        &self.area
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.area.peek(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let changed = {
            let mut entries = self
                .area
                .inner
                .entries
                .write()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(quota) = self.area.inner.quota {
                let size = key.len() + value.len();
                if self.area.used_bytes_without(&entries, key) + size > quota {
                    return Err(StorageError::QuotaExceeded {
                        key: key.to_string(),
                        size,
                    });
                }
            }
            entries.insert(key.to_string(), value.to_string()).as_deref() != Some(value)
        };
        if changed {
            self.area.fire(self.handle, key);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let removed = self
            .area
            .inner
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .is_some();
        if removed {
            self.area.fire(self.handle, key);
        }
        Ok(())
    }

    fn watch(&self, key: &str, listener: Listener) -> Option<Subscription> {
        let set = Arc::clone(
            self.area
                .inner
                .watchers
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .entry((self.handle, key.to_string()))
                .or_default(),
        );
        Some(set.subscribe(listener))
    }
}
