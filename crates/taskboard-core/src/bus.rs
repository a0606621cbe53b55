//! Sync bus: best-effort "something changed" signals between contexts.
//!
//! Signals carry no payload. A listener that hears one re-reads the store
//! and lets the reconciler decide whether the record is newer than what it
//! already shows.
//!
//! Two transports:
//! - `BroadcastChannel` - named in-process channels from a `BroadcastHub`,
//!   the stand-in for the browser's `BroadcastChannel`
//! - `StorageEventBus` - the fallback when broadcasting is unavailable;
//!   listens for mutations of the store record made by other contexts
//!
//! `ChangeBus` picks whichever one the environment supports.

use crate::storage::StorageBackend;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, TryLockError, Weak};
use tracing::{debug, warn};

/// Callback run when a change signal arrives.
pub type Listener = Box<dyn Fn() + Send + Sync>;

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving signals,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    set: Weak<ListenerSet>,
    id: usize,
}

impl Subscription {
    /// A handle with nothing behind it, for transports that cannot deliver.
    pub fn detached() -> Self {
        Self {
            set: Weak::new(),
            id: 0,
        }
    }

    /// Whether the listener set this handle points at still exists.
    pub fn is_attached(&self) -> bool {
        self.set.strong_count() > 0
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.unsubscribe(self.id);
        }
    }
}

/// A set of listeners sharing one signal source.
///
/// Wrap in `Arc` to hand out subscriptions.
#[derive(Default)]
pub struct ListenerSet {
    listeners: RwLock<Vec<(usize, Arc<dyn Fn() + Send + Sync>)>>,
    next_id: AtomicUsize,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(self: &Arc<Self>, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::from(listener)));
        Subscription {
            set: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // Unwinding may drop a subscription while this thread holds the read
        // lock in emit, so never block then.
        let mut guard = match self.listeners.try_write() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) if std::thread::panicking() => {
                warn!("Listener {} left registered during unwinding", id);
                return;
            }
            Err(TryLockError::WouldBlock) => {
                self.listeners.write().unwrap_or_else(|e| e.into_inner())
            }
        };
        guard.retain(|(i, _)| *i != id);
    }

    /// Run every listener once.
    pub fn emit(&self) {
        // Clone first so a listener may subscribe without deadlocking.
        let listeners: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            listener();
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fire-and-forget change notification between contexts.
///
/// Delivery is not guaranteed and not ordered. A context never hears its own
/// `notify()`: the writer already knows its new state.
pub trait SyncBus {
    /// Tell other contexts the store record changed.
    fn notify(&self);

    /// Run `listener` whenever another context signals a change.
    fn subscribe(&self, listener: Listener) -> Subscription;
}

impl<B: SyncBus + ?Sized> SyncBus for Arc<B> {
    fn notify(&self) {
        (**self).notify()
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        (**self).subscribe(listener)
    }
}

struct Endpoint {
    id: usize,
    listeners: Weak<ListenerSet>,
}

/// Registry of named broadcast channels shared by every context in a process.
///
/// Cloning the hub shares the registry.
#[derive(Clone, Default)]
pub struct BroadcastHub {
    channels: Arc<Mutex<HashMap<String, Vec<Endpoint>>>>,
    next_endpoint: Arc<AtomicUsize>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an endpoint on the channel called `name`.
    pub fn open(&self, name: impl Into<String>) -> BroadcastChannel {
        let name = name.into();
        let id = self.next_endpoint.fetch_add(1, Ordering::Relaxed);
        let listeners = Arc::new(ListenerSet::new());
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.clone())
            .or_default()
            .push(Endpoint {
                id,
                listeners: Arc::downgrade(&listeners),
            });
        debug!("Opened broadcast endpoint {} on {}", id, name);
        BroadcastChannel {
            hub: self.clone(),
            name,
            id,
            listeners,
        }
    }

    /// Number of open endpoints on `name`.
    pub fn endpoint_count(&self, name: &str) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map_or(0, Vec::len)
    }

    fn peers_of(&self, name: &str, sender: usize) -> Vec<Arc<ListenerSet>> {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(|endpoints| {
                endpoints
                    .iter()
                    .filter(|e| e.id != sender)
                    .filter_map(|e| e.listeners.upgrade())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn close(&self, name: &str, id: usize) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(endpoints) = channels.get_mut(name) {
            endpoints.retain(|e| e.id != id);
            if endpoints.is_empty() {
                channels.remove(name);
            }
        }
    }
}

/// One context's endpoint on a named broadcast channel.
pub struct BroadcastChannel {
    hub: BroadcastHub,
    name: String,
    id: usize,
    listeners: Arc<ListenerSet>,
}

impl BroadcastChannel {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl SyncBus for BroadcastChannel {
    fn notify(&self) {
        // Collected before emitting so listeners can open or close endpoints.
        let peers = self.hub.peers_of(&self.name, self.id);
        debug!("Broadcasting change on {} to {} endpoint(s)", self.name, peers.len());
        for peer in peers {
            peer.emit();
        }
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        self.listeners.subscribe(listener)
    }
}

impl Drop for BroadcastChannel {
    fn drop(&mut self) {
        self.hub.close(&self.name, self.id);
    }
}

/// Fallback bus built on storage mutation events.
///
/// `notify()` does nothing: the write to the record is itself the signal
/// other contexts observe.
pub struct StorageEventBus<S> {
    storage: S,
    key: String,
}

impl<S: StorageBackend> StorageEventBus<S> {
    pub fn new(storage: S, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }
}

impl<S: StorageBackend> SyncBus for StorageEventBus<S> {
    fn notify(&self) {}

    fn subscribe(&self, listener: Listener) -> Subscription {
        match self.storage.watch(&self.key, listener) {
            Some(subscription) => subscription,
            None => {
                warn!("Storage backend cannot report changes to {}; relying on polling", self.key);
                Subscription::detached()
            }
        }
    }
}

/// The bus a context actually uses: broadcast when available, storage
/// events otherwise.
///
/// `C` is the broadcast transport; hosts with a native channel (a JS
/// `BroadcastChannel`) plug theirs in here.
pub enum ChangeBus<S, C = BroadcastChannel> {
    Broadcast(C),
    StorageEvents(StorageEventBus<S>),
}

impl<S: StorageBackend> ChangeBus<S> {
    /// Open `channel` on `hub` if there is one, else fall back to watching
    /// `record_key` on `storage`.
    pub fn select(
        hub: Option<&BroadcastHub>,
        channel: impl Into<String>,
        storage: S,
        record_key: impl Into<String>,
    ) -> Self {
        Self::with_fallback(hub.map(|hub| hub.open(channel)), storage, record_key)
    }
}

impl<S: StorageBackend, C: SyncBus> ChangeBus<S, C> {
    /// Use `transport` if there is one, else watch `record_key` on `storage`.
    pub fn with_fallback(transport: Option<C>, storage: S, record_key: impl Into<String>) -> Self {
        match transport {
            Some(transport) => ChangeBus::Broadcast(transport),
            None => {
                let record_key = record_key.into();
                warn!("Broadcast unavailable, falling back to storage events for {}", record_key);
                ChangeBus::StorageEvents(StorageEventBus::new(storage, record_key))
            }
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, ChangeBus::Broadcast(_))
    }
}

impl<S: StorageBackend, C: SyncBus> SyncBus for ChangeBus<S, C> {
    fn notify(&self) {
        match self {
            ChangeBus::Broadcast(channel) => channel.notify(),
            ChangeBus::StorageEvents(bus) => bus.notify(),
        }
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        match self {
            ChangeBus::Broadcast(channel) => channel.subscribe(listener),
            ChangeBus::StorageEvents(bus) => bus.subscribe(listener),
        }
    }
}
