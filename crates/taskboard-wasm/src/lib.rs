//! WASM bindings for taskboard-core.
//!
//! Lets a static web page run the board: the page supplies callbacks over
//! `localStorage`, `window.location` and `BroadcastChannel`, and renders
//! whatever the board reports.
//!
//! # Architecture
//!
//! ```text
//! Page (JS)                         WASM (Rust)
//! ─────────                         ───────────
//! localStorage ──callbacks──> JsStorageBridge ──┐
//! location     ──callbacks──> JsLocationBridge  │
//! openChannel(name) ──post──> JsBroadcastBridge ├─> Store ──> Dashboard
//!                                               │
//!                             ChangeBus <───────┘
//!                                   │
//!                                   ▼
//!                           WasmBoard (exposed to JS)
//! ```
//!
//! The page forwards `storage` events to `onStorageEvent` and channel
//! messages to `onBroadcast`, and calls `poll` on a timer when `isLive`
//! is false.
//!
//! **Note**: This crate only compiles for `wasm32` targets. When building for native
//! targets (e.g., during `cargo check --workspace`), this crate provides no exports.

#[cfg(target_arch = "wasm32")]
mod bridge;

#[cfg(target_arch = "wasm32")]
pub use bridge::{JsBroadcastBridge, JsLocationBridge, JsStorageBridge};

// ============================================================================
// All WASM-specific code is gated behind target_arch = "wasm32"
// This allows `cargo check --workspace` to succeed on native targets.
// ============================================================================

#[cfg(target_arch = "wasm32")]
mod wasm_impl {
    use super::*;
    use serde::Serialize;
    use std::cell::RefCell;
    use taskboard_core::import::today_label;
    use taskboard_core::{
        export, BoardConfig, ChangeBus, Dashboard, StartupReport, StartupSource, Store,
        TaskFilter, WorkspaceId, WorkspaceResolver,
    };
    use tracing::{info, warn};
    use tracing_subscriber::layer::SubscriberExt;
    use wasm_bindgen::prelude::*;

    // ========== Callback Logger Layer ==========

    thread_local! {
        static LOGGER_CALLBACK: RefCell<Option<js_sys::Function>> = const { RefCell::new(None) };
    }

    /// Forwards each tracing event to the page's logger callback.
    struct JsCallbackLayer;

    impl<S> tracing_subscriber::Layer<S> for JsCallbackLayer
    where
        S: tracing::Subscriber,
    {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            LOGGER_CALLBACK.with(|cb| {
                let cb = cb.borrow();
                let Some(callback) = cb.as_ref() else {
                    return;
                };
                let metadata = event.metadata();

                let mut visitor = MessageVisitor::default();
                event.record(&mut visitor);

                let timestamp = web_time::SystemTime::now()
                    .duration_since(web_time::UNIX_EPOCH)
                    .map(|d| d.as_millis() as f64)
                    .unwrap_or(0.0);

                let js_event = js_sys::Object::new();
                let _ = js_sys::Reflect::set(&js_event, &"level".into(), &metadata.level().as_str().into());
                let _ = js_sys::Reflect::set(&js_event, &"target".into(), &metadata.target().into());
                let _ = js_sys::Reflect::set(&js_event, &"message".into(), &visitor.message.into());
                let _ = js_sys::Reflect::set(&js_event, &"timestamp".into(), &timestamp.into());

                let _ = callback.call1(&JsValue::NULL, &js_event);
            });
        }
    }

    /// Visitor to extract message from tracing event fields
    #[derive(Default)]
    struct MessageVisitor {
        message: String,
    }

    impl MessageVisitor {
        fn push_field(&mut self, name: &str, value: String) {
            if name == "message" {
                self.message = value;
            } else if self.message.is_empty() {
                self.message = format!("{}={}", name, value);
            } else {
                self.message.push_str(&format!(" {}={}", name, value));
            }
        }
    }

    impl tracing::field::Visit for MessageVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            self.push_field(field.name(), format!("{:?}", value));
        }

        fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
            self.push_field(field.name(), value.to_string());
        }
    }

    /// Initialize the WASM module (panic hook and tracing).
    ///
    /// - `init()` - console-only logging
    /// - `init({ logger: (event) => {...} })` - callback + console logging
    ///
    /// The logger callback receives `{ level, target, message, timestamp }`.
    #[wasm_bindgen]
    pub fn init(config: Option<js_sys::Object>) {
        console_error_panic_hook::set_once();

        let callback = config
            .as_ref()
            .and_then(|cfg| js_sys::Reflect::get(cfg, &"logger".into()).ok())
            .and_then(|v| v.dyn_into::<js_sys::Function>().ok());

        let console_config = tracing_wasm::WASMLayerConfigBuilder::new()
            .set_max_level(tracing::Level::DEBUG)
            .build();

        match callback {
            Some(cb) => {
                LOGGER_CALLBACK.with(|cell| {
                    *cell.borrow_mut() = Some(cb);
                });
                let subscriber = tracing_subscriber::registry()
                    .with(JsCallbackLayer)
                    .with(tracing_wasm::WASMLayer::new(console_config));
                tracing::subscriber::set_global_default(subscriber).ok();
            }
            None => tracing_wasm::set_as_global_default_with_config(console_config),
        }

        info!("taskboard-wasm {} initialized", version());
    }

    /// Get version string
    #[wasm_bindgen]
    pub fn version() -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    /// Generate a new random workspace id.
    #[wasm_bindgen(js_name = generateWorkspaceId)]
    pub fn generate_workspace_id() -> String {
        WorkspaceId::generate().to_string()
    }

    // ========== Board ==========

    type JsBus = ChangeBus<JsStorageBridge, JsBroadcastBridge>;

    /// How the board was populated on open, as seen by the page.
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct OpenSummary {
        source: &'static str,
        tasks: usize,
        invalid_link: bool,
        unpersisted: bool,
    }

    impl OpenSummary {
        fn new(report: &StartupReport, tasks: usize) -> Self {
            let source = match report.source {
                StartupSource::Link { .. } => "link",
                StartupSource::Store { .. } => "store",
                StartupSource::Empty => "empty",
            };
            Self {
                source,
                tasks,
                invalid_link: report.invalid_link,
                unpersisted: report.unpersisted,
            }
        }
    }

    /// Ask the page for a channel named `name`. `None` when it has no
    /// `BroadcastChannel` (the callback is missing, throws, or returns
    /// something other than a post function).
    fn open_channel(open_fn: Option<&js_sys::Function>, name: &str) -> Option<JsBroadcastBridge> {
        let open_fn = open_fn?;
        match open_fn.call1(&JsValue::NULL, &name.into()) {
            Ok(post) => match post.dyn_into::<js_sys::Function>() {
                Ok(post) => Some(JsBroadcastBridge::new(post)),
                Err(_) => None,
            },
            Err(e) => {
                warn!("Cannot open channel {}: {:?}", name, e);
                None
            }
        }
    }

    /// The board for one page.
    #[wasm_bindgen]
    pub struct WasmBoard {
        inner: Dashboard<JsStorageBridge, JsBus>,
        storage: JsStorageBridge,
        broadcast: Option<JsBroadcastBridge>,
        location: JsLocationBridge,
        workspace_id: String,
        poll_interval_ms: u64,
        open_summary: OpenSummary,
    }

    #[wasm_bindgen]
    impl WasmBoard {
        /// Resolve the workspace, wire up sync and run the startup sequence.
        ///
        /// `open_channel(name)` should create a `BroadcastChannel` and return
        /// a function posting on it; pass `undefined` to sync through
        /// `storage` events only. `config` is a partial `BoardConfig`.
        #[wasm_bindgen(constructor)]
        pub fn new(
            storage: JsStorageBridge,
            location: JsLocationBridge,
            open_channel_fn: Option<js_sys::Function>,
            config: JsValue,
        ) -> Result<WasmBoard, JsError> {
            let config: BoardConfig = if config.is_undefined() || config.is_null() {
                BoardConfig::default()
            } else {
                serde_wasm_bindgen::from_value(config).map_err(|e| JsError::new(&e.to_string()))?
            };
            config.validate().map_err(|e| JsError::new(&e.to_string()))?;

            let workspace = WorkspaceResolver::new(config.workspace_param.as_str()).resolve(&location);
            let record_key = workspace.record_key(&config.storage_prefix);
            let broadcast = open_channel(
                open_channel_fn.as_ref(),
                &workspace.channel_name(&config.channel_prefix),
            );

            let bus = ChangeBus::with_fallback(broadcast.clone(), storage.clone(), record_key);
            let store = Store::new(storage.clone(), bus, &workspace, &config);
            let mut inner = Dashboard::new(store, &config);
            let report = inner.open(&location);
            let open_summary = OpenSummary::new(&report, inner.tasks().len());

            info!("Board open in workspace {}", workspace.id());
            Ok(WasmBoard {
                inner,
                storage,
                broadcast,
                location,
                workspace_id: workspace.id().to_string(),
                poll_interval_ms: config.poll_interval_ms,
                open_summary,
            })
        }

        #[wasm_bindgen(js_name = workspaceId)]
        pub fn workspace_id(&self) -> String {
            self.workspace_id.clone()
        }

        /// `{ source, tasks, invalidLink, unpersisted }` from startup.
        #[wasm_bindgen(js_name = openSummary)]
        pub fn open_summary(&self) -> Result<JsValue, JsError> {
            serde_wasm_bindgen::to_value(&self.open_summary).map_err(|e| JsError::new(&e.to_string()))
        }

        /// Whether changes from other contexts arrive without polling.
        #[wasm_bindgen(js_name = isLive)]
        pub fn is_live(&self) -> bool {
            self.inner.is_live()
        }

        #[wasm_bindgen(js_name = isBroadcast)]
        pub fn is_broadcast(&self) -> bool {
            self.broadcast.is_some()
        }

        #[wasm_bindgen(js_name = pollIntervalMs)]
        pub fn poll_interval_ms(&self) -> u32 {
            self.poll_interval_ms.min(u32::MAX as u64) as u32
        }

        pub fn tasks(&self) -> Result<JsValue, JsError> {
            serde_wasm_bindgen::to_value(self.inner.tasks()).map_err(|e| JsError::new(&e.to_string()))
        }

        /// Tasks matching `search` (case-insensitive) and `performer`.
        pub fn filtered(&self, search: String, performer: Option<String>) -> Result<JsValue, JsError> {
            let filter = TaskFilter { search, performer };
            serde_wasm_bindgen::to_value(&self.inner.filtered(&filter))
                .map_err(|e| JsError::new(&e.to_string()))
        }

        pub fn stats(&self) -> Result<JsValue, JsError> {
            serde_wasm_bindgen::to_value(&self.inner.stats()).map_err(|e| JsError::new(&e.to_string()))
        }

        /// Completed share in percent, one decimal place.
        #[wasm_bindgen(js_name = completionRate)]
        pub fn completion_rate(&self) -> f64 {
            self.inner.stats().completion_rate()
        }

        #[wasm_bindgen(js_name = performerStats)]
        pub fn performer_stats(&self) -> Result<JsValue, JsError> {
            let breakdown = taskboard_core::stats::performer_breakdown(self.inner.tasks());
            serde_wasm_bindgen::to_value(&breakdown).map_err(|e| JsError::new(&e.to_string()))
        }

        /// Replace the board with the CSV `text`. Returns the skipped line numbers.
        #[wasm_bindgen(js_name = importCsv)]
        pub fn import_csv(&mut self, text: &str) -> Result<Vec<u32>, JsError> {
            let report = self
                .inner
                .import_csv(text, &today_label())
                .map_err(|e| JsError::new(&e.to_string()))?;
            Ok(report.skipped.iter().map(|line| *line as u32).collect())
        }

        /// Returns whether the change was persisted.
        pub fn complete(&mut self, id: &str, observations: &str) -> Result<bool, JsError> {
            let commit = self
                .inner
                .complete(id, observations)
                .map_err(|e| JsError::new(&e.to_string()))?;
            Ok(commit.persisted())
        }

        pub fn reschedule(&mut self, id: &str, observations: &str) -> Result<bool, JsError> {
            let commit = self
                .inner
                .reschedule(id, observations)
                .map_err(|e| JsError::new(&e.to_string()))?;
            Ok(commit.persisted())
        }

        /// Complete `id` with the observation draft, which is then emptied.
        #[wasm_bindgen(js_name = completeWithDraft)]
        pub fn complete_with_draft(&mut self, id: &str) -> Result<bool, JsError> {
            let commit = self
                .inner
                .complete_with_draft(id)
                .map_err(|e| JsError::new(&e.to_string()))?;
            Ok(commit.persisted())
        }

        #[wasm_bindgen(js_name = rescheduleWithDraft)]
        pub fn reschedule_with_draft(&mut self, id: &str) -> Result<bool, JsError> {
            let commit = self
                .inner
                .reschedule_with_draft(id)
                .map_err(|e| JsError::new(&e.to_string()))?;
            Ok(commit.persisted())
        }

        pub fn reset(&mut self, id: &str) -> Result<bool, JsError> {
            let commit = self.inner.reset(id).map_err(|e| JsError::new(&e.to_string()))?;
            Ok(commit.persisted())
        }

        pub fn undo(&mut self) -> bool {
            self.inner.undo()
        }

        #[wasm_bindgen(js_name = canUndo)]
        pub fn can_undo(&self) -> bool {
            self.inner.can_undo()
        }

        pub fn clear(&mut self) -> Result<(), JsError> {
            self.inner.clear().map_err(|e| JsError::new(&e.to_string()))
        }

        /// Link carrying the whole board, based on the current location.
        #[wasm_bindgen(js_name = shareLink)]
        pub fn share_link(&mut self) -> Result<String, JsError> {
            use taskboard_core::Location;
            let href = self.location.href().map_err(|e| JsError::new(&e.to_string()))?;
            self.inner.share_link(&href).map_err(|e| JsError::new(&e.to_string()))
        }

        /// Add recognized speech (or any text) to the observation draft.
        #[wasm_bindgen(js_name = appendObservationDraft)]
        pub fn append_observation_draft(&mut self, fragment: &str) {
            self.inner.append_observation_draft(fragment);
        }

        #[wasm_bindgen(js_name = observationDraft)]
        pub fn observation_draft(&self) -> String {
            self.inner.draft().text().to_string()
        }

        #[wasm_bindgen(js_name = setObservationDraft)]
        pub fn set_observation_draft(&mut self, text: String) {
            self.inner.draft_mut().set(text);
        }

        /// Forward a `storage` event. Returns whether the view changed.
        #[wasm_bindgen(js_name = onStorageEvent)]
        pub fn on_storage_event(&mut self, key: &str) -> bool {
            self.storage.deliver_storage_event(key);
            self.inner.pump()
        }

        /// Forward a channel message. Returns whether the view changed.
        #[wasm_bindgen(js_name = onBroadcast)]
        pub fn on_broadcast(&mut self) -> bool {
            if let Some(broadcast) = &self.broadcast {
                broadcast.deliver();
            }
            self.inner.pump()
        }

        /// Re-read the store. Returns whether the view changed.
        pub fn poll(&mut self) -> bool {
            self.inner.poll()
        }

        /// `{ message, severity: "success" | "error" }`, or `undefined`.
        #[wasm_bindgen(js_name = takeNotice)]
        pub fn take_notice(&mut self) -> Result<JsValue, JsError> {
            serde_wasm_bindgen::to_value(&self.inner.take_notice())
                .map_err(|e| JsError::new(&e.to_string()))
        }

        /// Spreadsheet-compatible HTML report, `undefined` when the board is empty.
        #[wasm_bindgen(js_name = exportHtml)]
        pub fn export_html(&self) -> Option<String> {
            export::export_html(self.inner.tasks())
        }

        #[wasm_bindgen(js_name = exportFileName)]
        pub fn export_file_name(&self) -> String {
            export::export_file_name(&today_label())
        }

        #[wasm_bindgen(js_name = exportMime)]
        pub fn export_mime(&self) -> String {
            export::EXPORT_MIME.to_string()
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub use wasm_impl::*;
