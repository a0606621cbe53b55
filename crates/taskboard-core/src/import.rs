//! CSV import: a delimited text file becomes a fresh task collection.
//!
//! Imports replace the whole board; they never merge.

use crate::task::{DEFAULT_ORDER_NUMBER, Task};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImportError {
    #[error("No valid rows. Expected columns: activity, order number, date, performer")]
    NoRows,
}

/// Outcome of parsing an import file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub tasks: Vec<Task>,
    /// 1-based line numbers of non-blank rows that were dropped
    pub skipped: Vec<usize>,
}

/// Parse `text` into pending tasks.
///
/// The first line is a header and is discarded; it only decides the
/// delimiter (`;` if it contains one, else `,`). Each remaining non-blank
/// line is `activity, orderNumber, date, performer`. Rows without an
/// activity or a performer are skipped. A blank date becomes `today`.
pub fn parse_tasks(text: &str, today: &str) -> Result<ImportReport, ImportError> {
    let mut lines = text.lines();
    let header = lines.next().unwrap_or_default();
    let delimiter = if header.contains(';') { ';' } else { ',' };

    let mut tasks = Vec::new();
    let mut skipped = Vec::new();

    for (index, line) in lines.enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split(delimiter).map(clean_field);
        let activity = fields.next().unwrap_or_default();
        let order_number = fields.next().unwrap_or_default();
        let date = fields.next().unwrap_or_default();
        let performer = fields.next().unwrap_or_default();

        if activity.is_empty() || performer.is_empty() {
            // +2: header is line 1 and enumerate starts at 0
            skipped.push(index + 2);
            continue;
        }

        tasks.push(Task::new(
            activity,
            if order_number.is_empty() {
                DEFAULT_ORDER_NUMBER
            } else {
                order_number
            },
            if date.is_empty() { today } else { date },
            performer,
        ));
    }

    debug!("Parsed {} task(s), skipped {} row(s)", tasks.len(), skipped.len());
    if tasks.is_empty() {
        return Err(ImportError::NoRows);
    }
    Ok(ImportReport { tasks, skipped })
}

/// Today's date label for rows that leave the date blank.
pub fn today_label() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

fn clean_field(field: &str) -> &str {
    let field = field.trim();
    let field = field.strip_prefix('"').unwrap_or(field);
    field.strip_suffix('"').unwrap_or(field)
}
