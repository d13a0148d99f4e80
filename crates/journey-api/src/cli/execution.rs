//! CLI execution subcommands: start, show, list, cancel, resume.

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::Subcommand;
use comfy_table::Cell;
use console::style;
use uuid::Uuid;

use journey_core::repository::workflow::WorkflowRepository;
use journey_core::workflow::executor::StepOutcome;
use journey_types::execution::{ExecutionStatus, WorkflowExecution};

use crate::cli::output::{execution_status_cell, opt_time, print_json, short_time, table, truncate};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum ExecutionCommand {
    /// Start an execution of a workflow for one contact.
    Start {
        /// Workflow UUID.
        workflow: Uuid,

        /// Contact UUID.
        #[arg(long)]
        contact: Uuid,

        /// Trigger node to enter at (defaults to the first trigger).
        #[arg(long)]
        trigger: Option<String>,

        /// Only enqueue; the next tick runs it.
        #[arg(long)]
        no_run: bool,
    },

    /// Show an execution's state and path.
    Show {
        /// Execution UUID.
        id: Uuid,
    },

    /// List recent executions of a workflow.
    List {
        /// Workflow UUID.
        workflow: Uuid,

        /// Only executions in this status.
        #[arg(long)]
        status: Option<ExecutionStatus>,

        /// Maximum number of executions.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Cancel a non-terminal execution.
    Cancel {
        /// Execution UUID.
        id: Uuid,
    },

    /// Wake a waiting execution, skip a retry back-off, or run a pending one.
    Resume {
        /// Execution UUID.
        id: Uuid,
    },
}

pub async fn handle_execution_command(cmd: ExecutionCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        ExecutionCommand::Start {
            workflow,
            contact,
            trigger,
            no_run,
        } => handle_start(workflow, contact, trigger.as_deref(), no_run, state, json).await,
        ExecutionCommand::Show { id } => handle_show(&id, state, json).await,
        ExecutionCommand::List {
            workflow,
            status,
            limit,
        } => handle_list(&workflow, status, limit, state, json).await,
        ExecutionCommand::Cancel { id } => handle_cancel(id, state, json).await,
        ExecutionCommand::Resume { id } => handle_resume(id, state, json).await,
    }
}

async fn require_execution(state: &AppState, id: &Uuid) -> Result<WorkflowExecution> {
    state
        .repo
        .get_execution(id)
        .await
        .context("Failed to look up execution")?
        .ok_or_else(|| anyhow!("Execution {id} not found"))
}

fn outcome_label(outcome: &StepOutcome) -> String {
    match outcome {
        StepOutcome::Completed => "completed".into(),
        StepOutcome::Waiting { until } => format!("waiting until {}", short_time(until)),
        StepOutcome::RetryScheduled {
            retry_count,
            next_retry_at,
        } => format!("retry #{retry_count} at {}", short_time(next_retry_at)),
        StepOutcome::Failed { reason } => format!("failed: {reason}"),
        StepOutcome::Cancelled => "cancelled".into(),
        StepOutcome::Yielded => "yielded (step budget reached)".into(),
        StepOutcome::Skipped => "skipped (nothing to do)".into(),
    }
}

fn print_outcome(execution: &WorkflowExecution, outcome: Option<&StepOutcome>, json: bool) -> Result<()> {
    if json {
        return print_json(&serde_json::json!({
            "execution": execution,
            "outcome": outcome,
        }));
    }
    println!();
    println!(
        "  {} Execution {} is {}",
        style("*").green().bold(),
        execution.id,
        style(execution.status).cyan()
    );
    if let Some(outcome) = outcome {
        println!("  Outcome: {}", outcome_label(outcome));
    }
    println!();
    Ok(())
}

async fn handle_start(
    workflow: Uuid,
    contact: Uuid,
    trigger: Option<&str>,
    no_run: bool,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let engine = state.engine();
    let now = Utc::now();
    let execution = engine.enqueue_at(workflow, contact, trigger, now).await?;

    let outcome = if no_run {
        None
    } else {
        Some(engine.run(execution.id, now, state.shutdown_token()).await?)
    };
    let execution = require_execution(state, &execution.id).await?;
    print_outcome(&execution, outcome.as_ref(), json)
}

async fn handle_show(id: &Uuid, state: &AppState, json: bool) -> Result<()> {
    let execution = require_execution(state, id).await?;
    if json {
        return print_json(&execution);
    }

    println!();
    println!("  Execution {}", style(execution.id).cyan().bold());
    println!("  Workflow:  {}", execution.workflow_id);
    println!("  Contact:   {}", execution.contact_id);
    println!("  Status:    {}", execution.status);
    println!(
        "  At node:   {}",
        execution.current_node_id.as_deref().unwrap_or("-")
    );
    println!("  Path:      {}", execution.execution_path.join(" -> "));
    println!("  Retries:   {}", execution.retry_count);
    if let Some(wake_at) = execution.wake_at {
        println!("  Wakes at:  {}", short_time(&wake_at));
    }
    if let Some(err) = &execution.last_error {
        println!("  Error:     {}", style(err).red());
    }
    println!("  Started:   {}", short_time(&execution.created_at));
    println!("  Finished:  {}", opt_time(execution.completed_at.as_ref()));
    if !execution.context.is_empty() {
        println!("  Context:");
        for (key, value) in &execution.context {
            println!("    {key} = {value}");
        }
    }
    println!();
    Ok(())
}

async fn handle_list(
    workflow: &Uuid,
    status: Option<ExecutionStatus>,
    limit: u32,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let mut executions = state
        .repo
        .list_executions(workflow, limit.max(1))
        .await
        .context("Failed to list executions")?;
    if let Some(status) = status {
        executions.retain(|e| e.status == status);
    }

    if json {
        return print_json(&executions);
    }
    if executions.is_empty() {
        println!();
        println!("  No executions.");
        println!();
        return Ok(());
    }

    let mut t = table(&["ID", "Contact", "Status", "Node", "Retries", "Updated", "Error"]);
    for e in &executions {
        t.add_row(vec![
            Cell::new(e.id),
            Cell::new(e.contact_id),
            execution_status_cell(e.status),
            Cell::new(e.current_node_id.as_deref().unwrap_or("-")),
            Cell::new(e.retry_count),
            Cell::new(short_time(&e.updated_at)),
            Cell::new(truncate(e.last_error.as_deref().unwrap_or(""), 40)),
        ]);
    }
    println!("{t}");
    Ok(())
}

async fn handle_cancel(id: Uuid, state: &AppState, json: bool) -> Result<()> {
    let applied = state.engine().cancel(id, Utc::now()).await?;
    let execution = require_execution(state, &id).await?;
    if !applied && !json {
        println!();
        println!("  Execution {id} is already {}; nothing to cancel.", execution.status);
        println!();
        return Ok(());
    }
    print_outcome(&execution, None, json)
}

async fn handle_resume(id: Uuid, state: &AppState, json: bool) -> Result<()> {
    let outcome = state
        .engine()
        .resume(id, Utc::now(), state.shutdown_token())
        .await?;
    let execution = require_execution(state, &id).await?;
    print_outcome(&execution, Some(&outcome), json)
}
