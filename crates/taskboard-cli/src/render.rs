//! Plain-text rendering of the board for the terminal.

use std::fmt::Write;
use taskboard_core::stats::{self, BoardStats};
use taskboard_core::{Notice, Severity, Task};

/// Characters of a task id shown in listings (enough to address it).
pub const SHORT_ID_LEN: usize = 8;

pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

/// One line per task: short id, status, date, performer, activity.
pub fn task_table<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> String {
    let mut out = String::new();
    for task in tasks {
        let _ = write!(
            out,
            "{:<8}  {:<11}  {:<10}  {:<16}  {}",
            short_id(&task.id),
            task.status.as_str(),
            task.date,
            task.performer,
            task.activity
        );
        if task.order_number != taskboard_core::task::DEFAULT_ORDER_NUMBER {
            let _ = write!(out, " [{}]", task.order_number);
        }
        if !task.observations.is_empty() {
            let _ = write!(out, " - {}", task.observations);
        }
        out.push('\n');
    }
    out
}

pub fn stats_report(tasks: &[Task]) -> String {
    let total = BoardStats::from_tasks(tasks);
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} task(s): {} pending, {} completed, {} rescheduled ({:.1}% complete)",
        total.total,
        total.pending,
        total.completed,
        total.rescheduled,
        total.completion_rate()
    );
    for entry in stats::performer_breakdown(tasks) {
        let _ = writeln!(
            out,
            "  {:<16} {:>3}/{:<3} done, {} rescheduled ({:.1}%)",
            entry.performer,
            entry.stats.completed,
            entry.stats.total,
            entry.stats.rescheduled,
            entry.stats.completion_rate()
        );
    }
    out
}

pub fn notice(notice: &Notice) -> String {
    match notice.severity {
        Severity::Success => format!("ok: {}", notice.message),
        Severity::Error => format!("error: {}", notice.message),
    }
}
