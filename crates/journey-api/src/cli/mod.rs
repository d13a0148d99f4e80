//! CLI command definitions and dispatch for the `jrny` binary.
//!
//! Uses clap derive macros for argument parsing. Commands follow a noun-verb
//! pattern (e.g., `jrny workflow import`, `jrny execution show`).

pub mod contact;
pub mod execution;
pub mod goal;
pub mod output;
pub mod schedule;
pub mod status;
pub mod tick;
pub mod workflow;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Schedule and run customer journeys.
#[derive(Parser)]
#[command(name = "jrny", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit log lines as JSON.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export tracing spans to stdout via OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one tick: fire due schedules, resume due retries and waits, run
    /// pending executions.
    Tick {
        /// Run the maintenance sweep this tick.
        #[arg(long, conflicts_with = "skip_maintenance")]
        maintenance: bool,

        /// Never run maintenance this tick.
        #[arg(long)]
        skip_maintenance: bool,
    },

    /// Tick continuously on a schedule until interrupted.
    Run {
        /// Cron expression or phrase ("every minute"). Defaults to
        /// `tick_schedule` from config.toml.
        #[arg(long)]
        every: Option<String>,
    },

    /// Start the REST API server.
    Serve {
        /// Port to listen on.
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Also tick on this schedule while serving.
        #[arg(long)]
        every: Option<String>,
    },

    /// Manage workflow definitions.
    #[command(alias = "wf")]
    Workflow {
        #[command(subcommand)]
        action: workflow::WorkflowCommand,
    },

    /// Manage schedules that start executions.
    Schedule {
        #[command(subcommand)]
        action: schedule::ScheduleCommand,
    },

    /// Inspect and control executions.
    #[command(alias = "exec")]
    Execution {
        #[command(subcommand)]
        action: execution::ExecutionCommand,
    },

    /// Manage contact attributes used by conditions and templates.
    Contact {
        #[command(subcommand)]
        action: contact::ContactCommand,
    },

    /// Inspect recorded goal events.
    Goal {
        #[command(subcommand)]
        action: goal::GoalCommand,
    },

    /// Run the maintenance sweep now (retention, orphaned retries, stalls).
    Maintain,

    /// Engine status dashboard.
    Status,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
