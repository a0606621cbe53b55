//! Task: one row of work on the board, plus its status state machine.
//!
//! Tasks are created in bulk by the import pipeline and mutated in place by
//! status transitions. The wire form is the camelCase JSON shape the browser
//! dashboard has always stored, so older records keep loading.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// Order number used when an import row leaves the column blank.
pub const DEFAULT_ORDER_NUMBER: &str = "N/A";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Cannot move task {id} from {from} to {to} without resetting it first")]
    Invalid {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task not found: {0}")]
    NotFound(String),
}

/// Where a task stands.
///
/// Serialized lowercase. The Portuguese labels written by the first
/// dashboard releases are accepted on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    #[serde(alias = "Pendente")]
    Pending,
    #[serde(alias = "Concluído")]
    Completed,
    #[serde(alias = "Reprogramado")]
    Rescheduled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
            TaskStatus::Rescheduled => "rescheduled",
        }
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who last changed a task's status, and when.
///
/// Display-only. This is unrelated to the collection timestamp the store
/// uses to order snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredAudit")]
pub struct Audit {
    #[serde(rename = "updatedBy", skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Milliseconds since Unix epoch.
    #[serde(rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

/// Audit keys as found in stored tasks. Some boards wrote `lastUpdateAt`
/// next to (or instead of) `updatedAt`.
#[derive(Deserialize)]
struct StoredAudit {
    #[serde(rename = "updatedBy", default)]
    actor: Option<String>,
    #[serde(rename = "updatedAt", default)]
    updated_at: Option<u64>,
    #[serde(rename = "lastUpdateAt", default)]
    last_update_at: Option<u64>,
}

impl From<StoredAudit> for Audit {
    fn from(stored: StoredAudit) -> Self {
        Self {
            actor: stored.actor,
            timestamp: stored.updated_at.or(stored.last_update_at),
        }
    }
}

impl Audit {
    pub fn is_empty(&self) -> bool {
        self.actor.is_none() && self.timestamp.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub activity: String,
    #[serde(default = "default_order_number")]
    pub order_number: String,
    pub performer: String,
    /// Opaque date label, never parsed.
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub observations: String,
    #[serde(flatten)]
    pub audit: Audit,
}

fn default_order_number() -> String {
    DEFAULT_ORDER_NUMBER.to_string()
}

impl Task {
    /// Create a pending task with a fresh id.
    pub fn new(
        activity: impl Into<String>,
        order_number: impl Into<String>,
        date: impl Into<String>,
        performer: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            activity: activity.into(),
            order_number: order_number.into(),
            performer: performer.into(),
            date: date.into(),
            status: TaskStatus::Pending,
            observations: String::new(),
            audit: Audit::default(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    /// `Pending -> Completed`. Re-completing a completed task just
    /// replaces the observation.
    pub fn complete(
        &mut self,
        observations: impl Into<String>,
        actor: Option<String>,
        now_ms: u64,
    ) -> Result<(), TransitionError> {
        self.transition(TaskStatus::Completed, observations.into(), actor, now_ms)
    }

    /// `Pending -> Rescheduled`.
    pub fn reschedule(
        &mut self,
        observations: impl Into<String>,
        actor: Option<String>,
        now_ms: u64,
    ) -> Result<(), TransitionError> {
        self.transition(TaskStatus::Rescheduled, observations.into(), actor, now_ms)
    }

    /// Back to `Pending` with no observation and no audit record.
    pub fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.observations.clear();
        self.audit = Audit::default();
    }

    fn transition(
        &mut self,
        to: TaskStatus,
        observations: String,
        actor: Option<String>,
        now_ms: u64,
    ) -> Result<(), TransitionError> {
        if !self.is_pending() && self.status != to {
            return Err(TransitionError::Invalid {
                id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.observations = observations;
        self.audit = Audit {
            actor,
            timestamp: Some(now_ms),
        };
        Ok(())
    }
}

/// Find a task by id and apply `f` to it.
pub fn update_task<F>(tasks: &mut [Task], id: &str, f: F) -> Result<(), TransitionError>
where
    F: FnOnce(&mut Task) -> Result<(), TransitionError>,
{
    let task = tasks
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or_else(|| TransitionError::NotFound(id.to_string()))?;
    f(task)
}

/// Give every task whose id repeats an earlier one a fresh id.
///
/// Returns how many tasks were re-keyed.
pub fn ensure_unique_ids(tasks: &mut [Task]) -> usize {
    let mut seen = HashSet::with_capacity(tasks.len());
    let mut rekeyed = 0;
    for task in tasks.iter_mut() {
        if task.id.is_empty() || !seen.insert(task.id.clone()) {
            task.id = uuid::Uuid::new_v4().to_string();
            seen.insert(task.id.clone());
            rekeyed += 1;
        }
    }
    rekeyed
}
