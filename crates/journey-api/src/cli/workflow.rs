//! CLI workflow management subcommands.
//!
//! Provides import, list, show and status operations for workflow
//! definitions.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::Subcommand;
use comfy_table::Cell;
use console::style;
use uuid::Uuid;

use journey_core::repository::workflow::WorkflowRepository;
use journey_core::workflow::definition::{WorkflowError, load_workflow_file};
use journey_types::workflow::{Workflow, WorkflowStatus};

use crate::cli::output::{print_json, short_time, table, workflow_status_cell};
use crate::state::AppState;

/// Workflow management subcommands.
#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Import (create or replace) a workflow from a YAML or JSON file.
    Import {
        /// Path to the workflow file.
        file: PathBuf,
    },

    /// List workflows.
    List {
        /// Only workflows of this organization.
        #[arg(long)]
        org: Option<Uuid>,
    },

    /// Show a workflow's nodes, edges and schedules.
    Show {
        /// Workflow UUID.
        id: Uuid,
    },

    /// Change a workflow's lifecycle status.
    Status {
        /// Workflow UUID.
        id: Uuid,

        /// New status: draft, active, paused or archived.
        status: WorkflowStatus,

        /// Also cancel every in-flight execution of the workflow.
        #[arg(long)]
        cancel_executions: bool,
    },
}

/// Handle a workflow subcommand.
pub async fn handle_workflow_command(cmd: WorkflowCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        WorkflowCommand::Import { file } => handle_import(&file, state, json).await,
        WorkflowCommand::List { org } => handle_list(org.as_ref(), state, json).await,
        WorkflowCommand::Show { id } => handle_show(&id, state, json).await,
        WorkflowCommand::Status {
            id,
            status,
            cancel_executions,
        } => handle_status(&id, status, cancel_executions, state, json).await,
    }
}

async fn require_workflow(state: &AppState, id: &Uuid) -> Result<Workflow> {
    state
        .repo
        .get_workflow(id)
        .await
        .context("Failed to look up workflow")?
        .ok_or_else(|| anyhow!("Workflow {id} not found"))
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

async fn handle_import(file: &Path, state: &AppState, json: bool) -> Result<()> {
    let mut workflow = load_workflow_file(file).map_err(|e| match e {
        WorkflowError::ParseError(msg) => anyhow!("Failed to parse workflow file: {msg}"),
        WorkflowError::ValidationError(msg) => anyhow!("Workflow validation failed: {msg}"),
        other => anyhow!("Failed to load workflow: {other}"),
    })?;

    let existing = state
        .repo
        .get_workflow(&workflow.id)
        .await
        .context("Failed to look up workflow")?;
    let now = Utc::now();
    let replaced = existing.is_some();
    if let Some(old) = existing {
        workflow.created_at = old.created_at;
        workflow.version = if old.structure_differs(&workflow) {
            old.version.max(workflow.version) + 1
        } else {
            old.version
        };
    }
    workflow.updated_at = now;

    state
        .repo
        .save_workflow(&workflow)
        .await
        .context("Failed to save workflow")?;

    if json {
        return print_json(&serde_json::json!({
            "id": workflow.id,
            "name": workflow.name,
            "status": workflow.status,
            "version": workflow.version,
            "nodes": workflow.nodes.len(),
            "edges": workflow.edges.len(),
            "replaced": replaced,
        }));
    }

    println!();
    println!(
        "  {} {} workflow '{}'",
        style("*").green().bold(),
        if replaced { "Updated" } else { "Imported" },
        style(&workflow.name).cyan()
    );
    println!("  ID:      {}", workflow.id);
    println!("  Status:  {}", workflow.status);
    println!("  Version: {}", workflow.version);
    println!("  Nodes:   {}", workflow.nodes.len());
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

async fn handle_list(org: Option<&Uuid>, state: &AppState, json: bool) -> Result<()> {
    let workflows = state
        .repo
        .list_workflows(org)
        .await
        .context("Failed to list workflows")?;

    if json {
        let out: Vec<_> = workflows
            .iter()
            .map(|w| {
                serde_json::json!({
                    "id": w.id,
                    "organization_id": w.organization_id,
                    "name": w.name,
                    "status": w.status,
                    "version": w.version,
                    "nodes": w.nodes.len(),
                })
            })
            .collect();
        return print_json(&out);
    }

    if workflows.is_empty() {
        println!();
        println!("  No workflows yet.");
        println!(
            "  Import one with: {}",
            style("jrny workflow import <file.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut t = table(&["Name", "ID", "Status", "Version", "Nodes", "Updated"]);
    for w in &workflows {
        t.add_row(vec![
            Cell::new(&w.name),
            Cell::new(w.id),
            workflow_status_cell(w.status),
            Cell::new(w.version),
            Cell::new(w.nodes.len()),
            Cell::new(short_time(&w.updated_at)),
        ]);
    }
    println!("{t}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

async fn handle_show(id: &Uuid, state: &AppState, json: bool) -> Result<()> {
    let workflow = require_workflow(state, id).await?;
    let schedules = state
        .repo
        .list_schedules(Some(id))
        .await
        .context("Failed to list schedules")?;

    if json {
        return print_json(&serde_json::json!({
            "workflow": workflow,
            "schedules": schedules,
        }));
    }

    println!();
    println!(
        "  {} (v{}, {})",
        style(&workflow.name).cyan().bold(),
        workflow.version,
        workflow.status
    );
    println!("  ID:           {}", workflow.id);
    println!("  Organization: {}", workflow.organization_id);
    println!();

    let mut nodes = table(&["Node", "Type", "Valid", "Next"]);
    for node in &workflow.nodes {
        let next: Vec<String> = workflow
            .edges
            .iter()
            .filter(|e| e.source_node_id == node.id)
            .map(|e| format!("{} -> {}", e.source_port, e.target_node_id))
            .collect();
        nodes.add_row(vec![
            Cell::new(&node.id),
            Cell::new(node.kind()),
            Cell::new(if node.is_valid { "yes" } else { "no" }),
            Cell::new(next.join("\n")),
        ]);
    }
    println!("{nodes}");

    let active = schedules.iter().filter(|s| s.is_active).count();
    println!();
    println!("  Schedules: {} ({} active)", schedules.len(), active);
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

async fn handle_status(
    id: &Uuid,
    status: WorkflowStatus,
    cancel_executions: bool,
    state: &AppState,
    json: bool,
) -> Result<()> {
    state
        .repo
        .set_workflow_status(id, status)
        .await
        .with_context(|| format!("Failed to set workflow {id} to {status}"))?;

    let cancelled = if cancel_executions {
        state
            .engine()
            .cancel_workflow(*id, Utc::now())
            .await
            .context("Failed to cancel executions")?
    } else {
        0
    };

    if json {
        return print_json(&serde_json::json!({
            "id": id,
            "status": status,
            "executions_cancelled": cancelled,
        }));
    }

    println!();
    println!("  {} Workflow {} is now {}", style("*").green().bold(), id, style(status).cyan());
    if cancel_executions {
        println!("  Executions cancelled: {cancelled}");
    }
    println!();
    Ok(())
}
