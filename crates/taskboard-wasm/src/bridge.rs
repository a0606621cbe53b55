//! JavaScript bridges for the browser environment.
//!
//! Each bridge holds plain JS callbacks supplied by the page and implements
//! one core trait with them: `localStorage` behind `StorageBackend`,
//! `window.location` plus `history.replaceState` behind `Location`, and a
//! `BroadcastChannel` behind `SyncBus`. All calls are synchronous; those
//! browser APIs are too.
//!
//! Incoming events (`storage` events, channel messages) cannot call into a
//! bridge the page no longer owns, so the board forwards them with
//! `deliver_*` on clones it keeps.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use taskboard_core::bus::{Listener, ListenerSet, Subscription, SyncBus};
use taskboard_core::location::{self, Location, LocationError};
use taskboard_core::storage::{self, StorageBackend, StorageError};
use tracing::debug;
use wasm_bindgen::prelude::*;

/// Message of a thrown JS value.
fn js_message(err: &JsValue) -> String {
    err.as_string()
        .or_else(|| {
            js_sys::Reflect::get(err, &"message".into())
                .ok()
                .and_then(|v| v.as_string())
        })
        .unwrap_or_else(|| format!("{:?}", err))
}

fn js_error_name(err: &JsValue) -> Option<String> {
    js_sys::Reflect::get(err, &"name".into())
        .ok()
        .and_then(|v| v.as_string())
}

/// `localStorage` bridge.
///
/// # Example (TypeScript side)
///
/// ```typescript
/// const storage = new JsStorageBridge(
///   (key) => localStorage.getItem(key),
///   (key, value) => localStorage.setItem(key, value),
///   (key) => localStorage.removeItem(key),
/// );
/// ```
#[wasm_bindgen]
#[derive(Clone)]
pub struct JsStorageBridge {
    get_fn: js_sys::Function,
    set_fn: js_sys::Function,
    remove_fn: js_sys::Function,
    watchers: Arc<RwLock<HashMap<String, Arc<ListenerSet>>>>,
}

#[wasm_bindgen]
impl JsStorageBridge {
    #[wasm_bindgen(constructor)]
    pub fn new(get_fn: js_sys::Function, set_fn: js_sys::Function, remove_fn: js_sys::Function) -> Self {
        Self {
            get_fn,
            set_fn,
            remove_fn,
            watchers: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl JsStorageBridge {
    /// Forward a `storage` event for `key` (fired for other tabs' writes).
    pub fn deliver_storage_event(&self, key: &str) -> bool {
        let set = self
            .watchers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned();
        match set {
            Some(set) if !set.is_empty() => {
                debug!("Storage event for {}", key);
                set.emit();
                true
            }
            _ => false,
        }
    }

    fn storage_error(key: &str, size: usize, err: JsValue) -> StorageError {
        if js_error_name(&err).as_deref() == Some("QuotaExceededError") {
            StorageError::QuotaExceeded {
                key: key.to_string(),
                size,
            }
        } else {
            StorageError::Unavailable(js_message(&err))
        }
    }
}

impl StorageBackend for JsStorageBridge {
    fn get(&self, key: &str) -> storage::Result<Option<String>> {
        let value = self
            .get_fn
            .call1(&JsValue::NULL, &key.into())
            .map_err(|e| Self::storage_error(key, 0, e))?;
        Ok(value.as_string())
    }

    fn set(&self, key: &str, value: &str) -> storage::Result<()> {
        self.set_fn
            .call2(&JsValue::NULL, &key.into(), &value.into())
            .map_err(|e| Self::storage_error(key, value.len(), e))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> storage::Result<()> {
        self.remove_fn
            .call1(&JsValue::NULL, &key.into())
            .map_err(|e| Self::storage_error(key, 0, e))?;
        Ok(())
    }

    fn watch(&self, key: &str, listener: Listener) -> Option<Subscription> {
        let set = Arc::clone(
            self.watchers
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(ListenerSet::new())),
        );
        Some(set.subscribe(listener))
    }
}

/// `window.location` bridge.
///
/// `href_fn` returns the current URL; `replace_fn(href)` swaps it without
/// navigating (`history.replaceState`). Either may throw in a sandboxed frame.
#[wasm_bindgen]
pub struct JsLocationBridge {
    href_fn: js_sys::Function,
    replace_fn: js_sys::Function,
}

#[wasm_bindgen]
impl JsLocationBridge {
    #[wasm_bindgen(constructor)]
    pub fn new(href_fn: js_sys::Function, replace_fn: js_sys::Function) -> Self {
        Self {
            href_fn,
            replace_fn,
        }
    }
}

impl Location for JsLocationBridge {
    fn href(&self) -> location::Result<String> {
        let value = self
            .href_fn
            .call0(&JsValue::NULL)
            .map_err(|e| LocationError::Unreadable(js_message(&e)))?;
        value
            .as_string()
            .ok_or_else(|| LocationError::Unreadable("href is not a string".into()))
    }

    fn replace(&self, href: &str) -> location::Result<()> {
        self.replace_fn
            .call1(&JsValue::NULL, &href.into())
            .map_err(|e| LocationError::Unwritable(js_message(&e)))?;
        Ok(())
    }
}

/// `BroadcastChannel` bridge.
///
/// `post_fn()` posts an empty message on the workspace channel. The page
/// forwards the channel's `message` events to the board. Built by the board
/// once the workspace, and so the channel name, is known.
#[derive(Clone)]
pub struct JsBroadcastBridge {
    post_fn: js_sys::Function,
    listeners: Arc<ListenerSet>,
}

impl JsBroadcastBridge {
    pub fn new(post_fn: js_sys::Function) -> Self {
        Self {
            post_fn,
            listeners: Arc::new(ListenerSet::new()),
        }
    }

    /// Forward a channel message.
    pub fn deliver(&self) {
        self.listeners.emit();
    }
}

impl SyncBus for JsBroadcastBridge {
    fn notify(&self) {
        // Best effort: a closed channel just means nobody hears us
        if let Err(e) = self.post_fn.call0(&JsValue::NULL) {
            debug!("Broadcast post failed: {}", js_message(&e));
        }
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        self.listeners.subscribe(listener)
    }
}
