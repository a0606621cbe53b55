//! Dashboard session: one context's view of a workspace's board.
//!
//! Wraps the reconciler with the operations a board UI offers. Every edit
//! takes the current view, changes it, remembers the old one for undo and
//! goes through `Reconciler::apply_local_mutation`. Bus signals only raise a
//! flag; the host drains it with `pump()` from its own event loop, so the
//! reconciler is never re-entered from inside a listener.
//!
//! Failures a user should see are left in a single notice slot rather than
//! returned as hard errors where the UI has nothing else to do with them.

use crate::bus::{Subscription, SyncBus};
use crate::config::BoardConfig;
use crate::history::History;
use crate::import::{self, ImportError, ImportReport};
use crate::location::Location;
use crate::reconciler::{LocalCommit, Reconciler, StartupReport, StartupSource};
use crate::share::{self, ShareError};
use crate::stats::{BoardStats, TaskFilter};
use crate::storage::StorageBackend;
use crate::store::{Store, StoreError};
use crate::task::{Task, TransitionError, update_task};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Error,
}

/// Transient, dismissible message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub message: String,
    pub severity: Severity,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Success,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Error,
        }
    }
}

/// Observation text being composed for a status change.
///
/// Typed input and text from an external dictation source both append here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservationDraft {
    text: String,
}

impl ObservationDraft {
    /// Append `fragment`, separated from existing text by one space.
    pub fn append(&mut self, fragment: &str) {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return;
        }
        if !self.text.is_empty() && !self.text.ends_with(' ') {
            self.text.push(' ');
        }
        self.text.push_str(fragment);
    }

    pub fn set(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Return the draft and leave it empty.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }
}

pub struct Dashboard<S, B> {
    reconciler: Reconciler<S, B>,
    history: History,
    link_cap: usize,
    actor: Option<String>,
    notice: Option<Notice>,
    draft: ObservationDraft,
    signal: Arc<AtomicBool>,
    subscription: Subscription,
}

impl<S: StorageBackend, B: SyncBus> Dashboard<S, B> {
    pub fn new(store: Store<S, B>, config: &BoardConfig) -> Self {
        let signal = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&signal);
        let subscription = store.bus().subscribe(Box::new(move || {
            flag.store(true, Ordering::Release);
        }));

        Self {
            reconciler: Reconciler::new(store),
            history: History::new(config.history_depth),
            link_cap: config.link_cap,
            actor: None,
            notice: None,
            draft: ObservationDraft::default(),
            signal,
            subscription,
        }
    }

    /// Name recorded in the audit of status changes made here.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Load the initial view from the location or the store.
    pub fn open(&mut self, location: &dyn Location) -> StartupReport {
        let report = self.reconciler.startup(location);
        match report.source {
            StartupSource::Link { tasks } if report.unpersisted => self.notify(Notice::error(
                format!("Loaded {tasks} task(s) from link, but they could not be saved locally"),
            )),
            StartupSource::Link { tasks } => {
                self.notify(Notice::success(format!("Loaded {tasks} task(s) from link")))
            }
            _ if report.invalid_link => {
                self.notify(Notice::error("The shared link appears to be invalid"))
            }
            _ => {}
        }
        report
    }

    pub fn tasks(&self) -> &[Task] {
        self.reconciler.view()
    }

    pub fn stats(&self) -> BoardStats {
        BoardStats::from_tasks(self.tasks())
    }

    pub fn filtered(&self, filter: &TaskFilter) -> Vec<&Task> {
        filter.apply(self.tasks())
    }

    pub fn reconciler(&self) -> &Reconciler<S, B> {
        &self.reconciler
    }

    /// Whether bus signals can reach this context. When false the host has
    /// to call `poll()` on a timer.
    pub fn is_live(&self) -> bool {
        self.subscription.is_attached()
    }

    pub fn can_undo(&self) -> bool {
        !self.history.is_empty()
    }

    /// Replace the board with the tasks in a CSV file.
    pub fn import_csv(&mut self, text: &str, today: &str) -> Result<ImportReport, ImportError> {
        let report = match import::parse_tasks(text, today) {
            Ok(report) => report,
            Err(e) => {
                self.notify(Notice::error(e.to_string()));
                return Err(e);
            }
        };

        let commit = self.commit(report.tasks.clone());
        if commit.persisted() {
            let mut message = format!("{} task(s) loaded", report.tasks.len());
            if !report.skipped.is_empty() {
                message.push_str(&format!(", {} row(s) skipped", report.skipped.len()));
            }
            self.notify(Notice::success(message));
        }
        info!(
            "Imported {} task(s), skipped {}",
            report.tasks.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Mark a task completed with `observations`.
    pub fn complete(&mut self, id: &str, observations: &str) -> Result<LocalCommit, TransitionError> {
        let actor = self.actor.clone();
        let now = self.reconciler.store().now_ms();
        self.edit(id, |task| task.complete(observations, actor, now))
    }

    /// Mark a task rescheduled with `observations`.
    pub fn reschedule(
        &mut self,
        id: &str,
        observations: &str,
    ) -> Result<LocalCommit, TransitionError> {
        let actor = self.actor.clone();
        let now = self.reconciler.store().now_ms();
        self.edit(id, |task| task.reschedule(observations, actor, now))
    }

    /// Complete using the current observation draft, emptying it on success.
    pub fn complete_with_draft(&mut self, id: &str) -> Result<LocalCommit, TransitionError> {
        let text = self.draft.text().to_string();
        let commit = self.complete(id, &text)?;
        self.draft.take();
        Ok(commit)
    }

    /// Reschedule using the current observation draft, emptying it on success.
    pub fn reschedule_with_draft(&mut self, id: &str) -> Result<LocalCommit, TransitionError> {
        let text = self.draft.text().to_string();
        let commit = self.reschedule(id, &text)?;
        self.draft.take();
        Ok(commit)
    }

    /// Put a task back to pending.
    pub fn reset(&mut self, id: &str) -> Result<LocalCommit, TransitionError> {
        self.edit(id, |task| {
            task.reset();
            Ok(())
        })
    }

    /// Restore the board as it was before the last edit.
    ///
    /// Returns false when there is nothing to undo.
    pub fn undo(&mut self) -> bool {
        let Some(previous) = self.history.pop() else {
            return false;
        };
        let commit = self.reconciler.apply_local_mutation(previous);
        if commit.persisted() {
            self.notify(Notice::success("Change undone"));
        } else {
            self.notify_unsaved(&commit);
        }
        true
    }

    /// Delete the board everywhere, including undo history.
    ///
    /// When the store cannot be cleared the board and history stay as they are.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        match self.reconciler.clear() {
            Ok(_) => {
                self.history.clear();
                self.notify(Notice::success("Board cleared"));
                Ok(())
            }
            Err(e) => {
                self.notify(Notice::error(format!("Could not clear saved board: {e}")));
                Err(e)
            }
        }
    }

    /// Link to `href` carrying the whole board.
    pub fn share_link(&mut self, href: &str) -> Result<String, ShareError> {
        match share::share_link(href, self.reconciler.view(), self.link_cap) {
            Ok(link) => {
                self.notify(Notice::success("Share link ready"));
                Ok(link)
            }
            Err(e) => {
                self.notify(Notice::error(e.to_string()));
                Err(e)
            }
        }
    }

    pub fn draft(&self) -> &ObservationDraft {
        &self.draft
    }

    pub fn draft_mut(&mut self) -> &mut ObservationDraft {
        &mut self.draft
    }

    /// Append text from typing or dictation to the observation draft.
    pub fn append_observation_draft(&mut self, fragment: &str) {
        self.draft.append(fragment);
    }

    /// Reconcile if a bus signal arrived since the last call.
    ///
    /// Returns whether the view changed.
    pub fn pump(&mut self) -> bool {
        if !self.signal.swap(false, Ordering::AcqRel) {
            return false;
        }
        debug!("Change signal received, reconciling");
        self.reconciler.reconcile_from_external_signal()
    }

    /// Reconcile unconditionally (poll tick, regained focus).
    pub fn poll(&mut self) -> bool {
        self.signal.store(false, Ordering::Release);
        self.reconciler.reconcile_from_external_signal()
    }

    /// Whether a bus signal is waiting for `pump()`.
    pub fn has_pending_signal(&self) -> bool {
        self.signal.load(Ordering::Acquire)
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    /// Remove and return the current notice.
    pub fn take_notice(&mut self) -> Option<Notice> {
        self.notice.take()
    }

    fn edit<F>(&mut self, id: &str, f: F) -> Result<LocalCommit, TransitionError>
    where
        F: FnOnce(&mut Task) -> Result<(), TransitionError>,
    {
        let mut tasks = self.reconciler.view().to_vec();
        update_task(&mut tasks, id, f)?;
        Ok(self.commit(tasks))
    }

    fn commit(&mut self, tasks: Vec<Task>) -> LocalCommit {
        self.history.push(self.reconciler.view().to_vec());
        let commit = self.reconciler.apply_local_mutation(tasks);
        if !commit.persisted() {
            self.notify_unsaved(&commit);
        }
        commit
    }

    fn notify_unsaved(&mut self, commit: &LocalCommit) {
        let reason = commit
            .error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        self.notify(Notice::error(format!(
            "Change kept on this screen only, saving failed: {reason}"
        )));
    }

    fn notify(&mut self, notice: Notice) {
        debug!("Notice ({:?}): {}", notice.severity, notice.message);
        self.notice = Some(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BroadcastChannel, BroadcastHub, StorageEventBus};
    use crate::clock::ManualClock;
    use crate::codec;
    use crate::location::{self, MemoryLocation};
    use crate::storage::{MemoryArea, MemoryStorage};
    use crate::task::TaskStatus;

    const CSV: &str = "Atividade;Ordem;Data;Executante\nA;1;01/01;Joe\nB;2;01/01;Ana\n";
    const KEY: &str = "taskboard:ws";

    fn dashboard(
        area: &MemoryArea,
        hub: &BroadcastHub,
        clock: &ManualClock,
    ) -> Dashboard<MemoryStorage, BroadcastChannel> {
        let store = Store::with_key(area.open(), hub.open("taskboard-sync:ws"), KEY)
            .with_clock(clock.clone());
        Dashboard::new(store, &BoardConfig::default())
    }

    #[test]
    fn test_import_replaces_board_and_reports() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let mut board = dashboard(&area, &hub, &ManualClock::new(10));

        let report = board.import_csv(CSV, "2024-01-01").unwrap();
        assert_eq!(report.tasks.len(), 2);
        assert_eq!(board.tasks().len(), 2);
        assert_eq!(
            board.take_notice().unwrap(),
            Notice::success("2 task(s) loaded")
        );
        assert!(board.take_notice().is_none());

        let err = board.import_csv("header\n;;;\n", "x").unwrap_err();
        assert_eq!(err, ImportError::NoRows);
        assert_eq!(board.tasks().len(), 2);
        assert_eq!(board.notice().unwrap().severity, Severity::Error);
    }

    #[test]
    fn test_status_changes_and_reset_symmetry() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let mut board = dashboard(&area, &hub, &ManualClock::new(10)).with_actor("admin");
        board.import_csv(CSV, "x").unwrap();
        let original = board.tasks()[0].clone();
        let id = original.id.clone();

        board.complete(&id, "done").unwrap();
        let done = &board.tasks()[0];
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.observations, "done");
        assert_eq!(done.audit.actor.as_deref(), Some("admin"));

        board.reset(&id).unwrap();
        assert_eq!(board.tasks()[0], original);
    }

    #[test]
    fn test_unknown_task_is_an_error() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let mut board = dashboard(&area, &hub, &ManualClock::new(10));
        board.import_csv(CSV, "x").unwrap();
        assert!(matches!(
            board.complete("nope", ""),
            Err(TransitionError::NotFound(_))
        ));
    }

    #[test]
    fn test_undo_steps_back_through_edits() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let mut board = dashboard(&area, &hub, &ManualClock::new(10));
        assert!(!board.undo());

        board.import_csv(CSV, "x").unwrap();
        let imported = board.tasks().to_vec();
        let id = imported[1].id.clone();
        board.reschedule(&id, "rain").unwrap();

        assert!(board.undo());
        assert_eq!(board.tasks(), imported.as_slice());
        // Undo is a local mutation, so it is persisted
        assert_eq!(board.reconciler().store().read().tasks, imported);

        assert!(board.undo());
        assert!(board.tasks().is_empty());
        assert!(!board.can_undo());
    }

    #[test]
    fn test_clear_empties_history_and_store() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let mut board = dashboard(&area, &hub, &ManualClock::new(10));
        board.import_csv(CSV, "x").unwrap();

        board.clear().unwrap();
        assert!(board.tasks().is_empty());
        assert!(!board.can_undo());
        assert!(board.reconciler().store().read().is_absent());
        board.clear().unwrap();
    }

    #[test]
    fn test_signal_is_consumed_by_pump() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(10);
        let mut a = dashboard(&area, &hub, &clock);
        let mut b = dashboard(&area, &hub, &clock);
        b.open(&MemoryLocation::new("https://b.example/?ws=ws"));
        assert!(b.is_live());

        a.import_csv(CSV, "x").unwrap();
        assert!(b.has_pending_signal());
        assert!(!a.has_pending_signal());

        assert!(b.pump());
        assert_eq!(b.tasks(), a.tasks());
        assert!(!b.pump());
    }

    #[test]
    fn test_poll_without_live_bus() {
        // Backend with no storage events: the bus can never deliver
        struct Quiet(MemoryStorage);
        impl StorageBackend for Quiet {
            fn get(&self, key: &str) -> crate::storage::Result<Option<String>> {
                self.0.get(key)
            }
            fn set(&self, key: &str, value: &str) -> crate::storage::Result<()> {
                self.0.set(key, value)
            }
            fn remove(&self, key: &str) -> crate::storage::Result<()> {
                self.0.remove(key)
            }
        }

        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let clock = ManualClock::new(10);
        let mut writer = dashboard(&area, &hub, &clock);
        let quiet = Arc::new(Quiet(area.open()));
        let store = Store::with_key(
            Arc::clone(&quiet),
            StorageEventBus::new(Arc::clone(&quiet), KEY),
            KEY,
        )
        .with_clock(clock.clone());
        let mut reader = Dashboard::new(store, &BoardConfig::default());
        assert!(!reader.is_live());

        writer.import_csv(CSV, "x").unwrap();
        assert!(!reader.pump());
        assert!(reader.poll());
        assert_eq!(reader.tasks(), writer.tasks());
    }

    #[test]
    fn test_share_link_respects_cap() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let store = Store::with_key(area.open(), hub.open("c"), KEY).with_clock(ManualClock::new(1));
        let config = BoardConfig {
            link_cap: 10,
            ..BoardConfig::default()
        };
        let mut board = Dashboard::new(store, &config);
        board.import_csv(CSV, "x").unwrap();

        let err = board.share_link("https://b.example/?ws=ws").unwrap_err();
        assert!(matches!(err, ShareError::TooLarge { .. }));
        assert_eq!(board.take_notice().unwrap().severity, Severity::Error);
    }

    #[test]
    fn test_open_from_link_sets_notice() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let mut board = dashboard(&area, &hub, &ManualClock::new(10));
        let shared = vec![Task::new("Shared", "1", "d", "Joe")];
        let location = MemoryLocation::new(format!(
            "https://b.example/?ws=ws#{}",
            codec::encode(&shared)
        ));

        board.open(&location);
        assert_eq!(board.tasks(), shared.as_slice());
        assert_eq!(board.take_notice().unwrap().severity, Severity::Success);
        assert_eq!(location::fragment(&location.current()), None);
    }

    #[test]
    fn test_open_with_bad_link_sets_error_notice() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let mut board = dashboard(&area, &hub, &ManualClock::new(10));
        board.open(&MemoryLocation::new("https://b.example/#not-a-board"));
        assert_eq!(board.take_notice().unwrap().severity, Severity::Error);
    }

    #[test]
    fn test_quota_failure_keeps_view_and_warns() {
        let area = MemoryArea::with_quota(16);
        let hub = BroadcastHub::new();
        let mut board = dashboard(&area, &hub, &ManualClock::new(10));
        board.import_csv(CSV, "x").unwrap();
        assert_eq!(board.tasks().len(), 2);
        assert_eq!(board.take_notice().unwrap().severity, Severity::Error);
    }

    #[test]
    fn test_observation_draft_appends_with_space() {
        let area = MemoryArea::new();
        let hub = BroadcastHub::new();
        let mut board = dashboard(&area, &hub, &ManualClock::new(10));
        board.import_csv(CSV, "x").unwrap();
        let id = board.tasks()[0].id.clone();

        board.draft_mut().set("Pump replaced");
        board.append_observation_draft("  seal also worn ");
        board.append_observation_draft("");
        assert_eq!(board.draft().text(), "Pump replaced seal also worn");

        board.complete_with_draft(&id).unwrap();
        assert_eq!(board.tasks()[0].observations, "Pump replaced seal also worn");
        assert_eq!(board.draft().text(), "");
    }
}
