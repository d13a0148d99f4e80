//! CLI goal subcommands.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::Cell;
use uuid::Uuid;

use journey_types::workflow::GoalEvent;

use crate::cli::output::{print_json, short_time, table};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum GoalCommand {
    /// List goal events recorded for a workflow, newest first.
    List {
        /// Workflow UUID.
        workflow: Uuid,

        /// Maximum number of events.
        #[arg(long, default_value = "50")]
        limit: u32,
    },
}

pub async fn handle_goal_command(cmd: GoalCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        GoalCommand::List { workflow, limit } => {
            let events = state
                .goals
                .list_goal_events(&workflow, limit.max(1))
                .await
                .context("Failed to list goal events")?;
            if json {
                return print_json(&events);
            }
            print_events(&events);
            Ok(())
        }
    }
}

fn goal_type_label(event: &GoalEvent) -> String {
    serde_json::to_value(event.goal_type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn print_events(events: &[GoalEvent]) {
    if events.is_empty() {
        println!();
        println!("  No goal events recorded.");
        println!();
        return;
    }

    let mut t = table(&["When", "Goal", "Type", "Contact", "Revenue", "Execution"]);
    for e in events {
        t.add_row(vec![
            Cell::new(short_time(&e.occurred_at)),
            Cell::new(e.name.as_deref().unwrap_or(&e.node_id)),
            Cell::new(goal_type_label(e)),
            Cell::new(e.contact_id),
            Cell::new(e.revenue.map(|r| format!("{r:.2}")).unwrap_or_else(|| "-".into())),
            Cell::new(e.execution_id),
        ]);
    }
    println!("{t}");

    let total: f64 = events.iter().filter_map(|e| e.revenue).sum();
    if total > 0.0 {
        println!("  Revenue total: {total:.2}");
    }
}
