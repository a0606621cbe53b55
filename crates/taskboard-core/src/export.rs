//! Spreadsheet export.
//!
//! The report is an HTML table that spreadsheet applications open directly
//! when saved with an `.xls` extension. Rows are coloured by status.

use crate::task::{Task, TaskStatus};
use std::fmt::Write;

const HEADER: &str = r#"<html xmlns:o="urn:schemas-microsoft-com:office:office" xmlns:x="urn:schemas-microsoft-com:office:excel" xmlns="http://www.w3.org/TR/REC-html40">
<head>
<meta charset="UTF-8">
<style>
table { border-collapse: collapse; width: 100%; }
th, td { border: 1px solid #ccc; padding: 8px; font-family: sans-serif; }
th { background-color: #f3f4f6; font-weight: bold; }
.completed { background-color: #c6efce; color: #006100; }
.rescheduled { background-color: #ffeb9c; color: #9c6500; }
.pending { background-color: #ffffff; }
</style>
</head>
<body>
<table>
<thead>
<tr><th>Atividade</th><th>Ordem</th><th>Data</th><th>Executante</th><th>Status</th><th>Observacoes</th></tr>
</thead>
<tbody>
"#;

const FOOTER: &str = "</tbody>\n</table>\n</body>\n</html>\n";

/// MIME type to serve the report with.
pub const EXPORT_MIME: &str = "application/vnd.ms-excel";

/// Render the report. Returns `None` for an empty board.
pub fn export_html(tasks: &[Task]) -> Option<String> {
    if tasks.is_empty() {
        return None;
    }

    let mut html = String::from(HEADER);
    for task in tasks {
        let class = match task.status {
            TaskStatus::Completed => "completed",
            TaskStatus::Rescheduled => "rescheduled",
            TaskStatus::Pending => "pending",
        };
        // Writing to a String cannot fail
        let _ = writeln!(
            html,
            "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            class,
            escape(&task.activity),
            escape(&task.order_number),
            escape(&task.date),
            escape(&task.performer),
            task.status,
            escape(&task.observations),
        );
    }
    html.push_str(FOOTER);
    Some(html)
}

/// `relatorio_atividades_<date>.xls`
pub fn export_file_name(date: &str) -> String {
    format!("relatorio_atividades_{}.xls", date)
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_board_has_no_report() {
        assert_eq!(export_html(&[]), None);
    }

    #[test]
    fn test_rows_carry_status_class() {
        let mut tasks = vec![
            Task::new("A", "1", "01/01", "Joe"),
            Task::new("B", "2", "01/01", "Ana"),
            Task::new("C", "3", "01/01", "Bia"),
        ];
        tasks[0].complete("done", None, 1).unwrap();
        tasks[1].reschedule("later", None, 1).unwrap();

        let html = export_html(&tasks).unwrap();
        assert!(html.contains("<tr class=\"completed\"><td>A</td>"));
        assert!(html.contains("<tr class=\"rescheduled\"><td>B</td>"));
        assert!(html.contains("<tr class=\"pending\"><td>C</td>"));
        assert!(html.contains("<td>completed</td><td>done</td>"));
        assert!(html.trim_end().ends_with("</html>"));
    }

    #[test]
    fn test_cell_text_is_escaped() {
        let mut task = Task::new("<script>alert(1)</script>", "A&B", "01/01", "\"Joe\"");
        task.observations = "it's".into();
        let html = export_html(&[task]).unwrap();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(html.contains("<td>A&amp;B</td>"));
        assert!(html.contains("<td>&quot;Joe&quot;</td>"));
        assert!(html.contains("<td>it&#39;s</td>"));
    }

    #[test]
    fn test_file_name() {
        assert_eq!(
            export_file_name("2024-03-09"),
            "relatorio_atividades_2024-03-09.xls"
        );
    }
}
