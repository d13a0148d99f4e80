//! Shared formatting helpers for CLI output.

use anyhow::Result;
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use serde::Serialize;

use journey_types::execution::ExecutionStatus;
use journey_types::workflow::WorkflowStatus;

/// Pretty-print any serializable value as JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// A table with the house style and the given header.
pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .enumerate()
                .map(|(i, h)| {
                    let cell = Cell::new(h);
                    if i == 0 { cell.fg(Color::Cyan) } else { cell }
                })
                .collect::<Vec<_>>(),
        );
    table
}

pub fn execution_status_cell(status: ExecutionStatus) -> Cell {
    let color = match status {
        ExecutionStatus::Completed => Color::Green,
        ExecutionStatus::Failed => Color::Red,
        ExecutionStatus::Cancelled => Color::DarkGrey,
        ExecutionStatus::Running => Color::Cyan,
        ExecutionStatus::Waiting | ExecutionStatus::WaitingRetry => Color::Yellow,
        ExecutionStatus::Pending => Color::Blue,
    };
    Cell::new(status).fg(color)
}

pub fn workflow_status_cell(status: WorkflowStatus) -> Cell {
    let color = match status {
        WorkflowStatus::Active => Color::Green,
        WorkflowStatus::Paused => Color::Yellow,
        WorkflowStatus::Draft => Color::Blue,
        WorkflowStatus::Archived => Color::DarkGrey,
    };
    Cell::new(status).fg(color)
}

/// Compact UTC timestamp for table cells.
pub fn short_time(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn opt_time(ts: Option<&DateTime<Utc>>) -> String {
    ts.map(short_time).unwrap_or_else(|| "-".to_string())
}

/// Truncate to `max` characters, appending `...` when cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
