//! Board statistics and list filtering.

use crate::task::{Task, TaskStatus};
use serde::Serialize;

/// Counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardStats {
    pub total: usize,
    pub pending: usize,
    pub completed: usize,
    pub rescheduled: usize,
}

impl BoardStats {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut stats = Self::default();
        for task in tasks {
            stats.total += 1;
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Rescheduled => stats.rescheduled += 1,
            }
        }
        stats
    }

    /// Completed share of all tasks in percent, to one decimal place.
    pub fn completion_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let percent = self.completed as f64 / self.total as f64 * 100.0;
        (percent * 10.0).round() / 10.0
    }
}

/// Stats for one performer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PerformerStats {
    pub performer: String,
    pub stats: BoardStats,
}

/// Per-performer counts, in the order performers first appear.
pub fn performer_breakdown(tasks: &[Task]) -> Vec<PerformerStats> {
    performers(tasks)
        .into_iter()
        .map(|performer| {
            let stats = BoardStats::from_tasks(tasks.iter().filter(|t| t.performer == performer));
            PerformerStats { performer, stats }
        })
        .collect()
}

/// Distinct performers in first-seen order.
pub fn performers(tasks: &[Task]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for task in tasks {
        if !out.iter().any(|p| *p == task.performer) {
            out.push(task.performer.clone());
        }
    }
    out
}

/// List filter: free-text search plus an optional exact performer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub search: String,
    pub performer: Option<String>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        if self.performer.as_ref().is_some_and(|p| *p != task.performer) {
            return false;
        }

        let needle = self.search.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        [&task.activity, &task.order_number, &task.performer]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle))
    }

    pub fn apply<'a>(&self, tasks: &'a [Task]) -> Vec<&'a Task> {
        tasks.iter().filter(|t| self.matches(t)).collect()
    }
}
