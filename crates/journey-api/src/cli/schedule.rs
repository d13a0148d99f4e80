//! CLI schedule subcommands: create, list, pause.

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color};
use console::style;
use uuid::Uuid;

use journey_core::repository::workflow::WorkflowRepository;
use journey_core::workflow::scheduler::{new_schedule, with_trigger};
use journey_types::schedule::{IntervalUnit, ScheduleConfig, WorkflowSchedule};

use crate::cli::output::{opt_time, print_json, table};
use crate::state::AppState;

/// Conditional-write attempts `pause` makes against a concurrently firing tick.
const PAUSE_ATTEMPTS: usize = 3;

#[derive(Subcommand)]
pub enum ScheduleCommand {
    /// Create a schedule for a workflow.
    Create(CreateArgs),

    /// List schedules.
    List {
        /// Only schedules of this workflow.
        #[arg(long)]
        workflow: Option<Uuid>,
    },

    /// Deactivate a schedule.
    Pause {
        /// Schedule UUID.
        id: Uuid,
    },
}

/// Exactly one of `--at`, `--every` or `--cron` picks the schedule kind.
#[derive(Args)]
#[command(group = clap::ArgGroup::new("kind").required(true).args(["at", "every", "cron"]))]
pub struct CreateArgs {
    /// Workflow UUID.
    pub workflow: Uuid,

    /// Fire once at this RFC 3339 instant.
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,

    /// Fire every N units (see --unit).
    #[arg(long, requires = "unit")]
    pub every: Option<u32>,

    /// Interval unit: minutes, hours, days, weeks or months.
    #[arg(long)]
    pub unit: Option<IntervalUnit>,

    /// First fire time for an interval schedule (RFC 3339).
    #[arg(long, requires = "every")]
    pub start_at: Option<DateTime<Utc>>,

    /// Cron expression (5 or 6 fields) or phrase ("every day at 09:00").
    #[arg(long)]
    pub cron: Option<String>,

    /// IANA timezone the schedule is evaluated in.
    #[arg(long, default_value = "UTC")]
    pub tz: String,

    /// Contact to start an execution for on each fire (repeatable).
    #[arg(long = "contact", required = true)]
    pub contacts: Vec<Uuid>,

    /// Stop after this many fires.
    #[arg(long)]
    pub max: Option<u32>,

    /// Trigger node the executions start at (defaults to the first trigger).
    #[arg(long)]
    pub trigger: Option<String>,
}

impl CreateArgs {
    fn config(&self) -> Result<ScheduleConfig> {
        match (&self.at, self.every, &self.cron) {
            (Some(fire_at), None, None) => Ok(ScheduleConfig::Once { fire_at: *fire_at }),
            (None, Some(interval), None) => Ok(ScheduleConfig::Recurring {
                interval,
                unit: self.unit.ok_or_else(|| anyhow!("--every requires --unit"))?,
                start_at: self.start_at,
            }),
            (None, None, Some(expression)) => Ok(ScheduleConfig::Cron {
                expression: expression.clone(),
            }),
            _ => bail!("Pass exactly one of --at, --every or --cron"),
        }
    }
}

pub async fn handle_schedule_command(cmd: ScheduleCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        ScheduleCommand::Create(args) => handle_create(&args, state, json).await,
        ScheduleCommand::List { workflow } => handle_list(workflow.as_ref(), state, json).await,
        ScheduleCommand::Pause { id } => handle_pause(&id, state, json).await,
    }
}

/// Human-readable summary of a schedule's timing.
pub fn describe(config: &ScheduleConfig) -> String {
    match config {
        ScheduleConfig::Once { fire_at } => format!("once at {}", fire_at.to_rfc3339()),
        ScheduleConfig::Recurring {
            interval, unit, ..
        } => {
            let unit = serde_json::to_value(unit)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            format!("every {interval} {unit}")
        }
        ScheduleConfig::Cron { expression } => format!("cron '{expression}'"),
    }
}

async fn handle_create(args: &CreateArgs, state: &AppState, json: bool) -> Result<()> {
    let workflow = state
        .repo
        .get_workflow(&args.workflow)
        .await
        .context("Failed to look up workflow")?
        .ok_or_else(|| anyhow!("Workflow {} not found", args.workflow))?;

    let schedule = new_schedule(
        &workflow,
        args.config()?,
        &args.tz,
        args.contacts.clone(),
        args.max,
        Utc::now(),
    )?;
    let schedule = match &args.trigger {
        Some(trigger) => with_trigger(schedule, &workflow, trigger)?,
        None => schedule,
    };
    state
        .repo
        .create_schedule(&schedule)
        .await
        .context("Failed to save schedule")?;

    if json {
        return print_json(&schedule);
    }

    println!();
    println!(
        "  {} Scheduled '{}' {}",
        style("*").green().bold(),
        style(&workflow.name).cyan(),
        describe(&schedule.config)
    );
    println!("  ID:       {}", schedule.id);
    println!("  Timezone: {}", schedule.timezone);
    println!("  Next:     {}", opt_time(schedule.next_execution_at.as_ref()));
    println!("  Audience: {} contact(s)", schedule.audience.len());
    if let Some(trigger) = &schedule.trigger_node_id {
        println!("  Trigger:  {trigger}");
    }
    println!();
    Ok(())
}

async fn handle_list(workflow: Option<&Uuid>, state: &AppState, json: bool) -> Result<()> {
    let schedules = state
        .repo
        .list_schedules(workflow)
        .await
        .context("Failed to list schedules")?;

    if json {
        return print_json(&schedules);
    }

    if schedules.is_empty() {
        println!();
        println!("  No schedules.");
        println!();
        return Ok(());
    }

    let mut t = table(&["ID", "Workflow", "When", "TZ", "Next", "Fired", "Active"]);
    for s in &schedules {
        let fired = match s.max_executions {
            Some(max) => format!("{}/{max}", s.executions_count),
            None => s.executions_count.to_string(),
        };
        t.add_row(vec![
            Cell::new(s.id),
            Cell::new(s.workflow_id),
            Cell::new(describe(&s.config)),
            Cell::new(&s.timezone),
            Cell::new(opt_time(s.next_execution_at.as_ref())),
            Cell::new(fired),
            if s.is_active {
                Cell::new("yes").fg(Color::Green)
            } else {
                Cell::new("no").fg(Color::DarkGrey)
            },
        ]);
    }
    println!("{t}");
    Ok(())
}

async fn pause(state: &AppState, id: &Uuid) -> Result<WorkflowSchedule> {
    for _ in 0..PAUSE_ATTEMPTS {
        let mut schedule = state
            .repo
            .get_schedule(id)
            .await
            .context("Failed to look up schedule")?
            .ok_or_else(|| anyhow!("Schedule {id} not found"))?;
        if !schedule.is_active {
            return Ok(schedule);
        }
        let expected = schedule.next_execution_at;
        schedule.is_active = false;
        schedule.updated_at = Utc::now();
        if state
            .repo
            .update_schedule(&schedule, expected)
            .await
            .context("Failed to update schedule")?
        {
            tracing::info!(schedule_id = %id, "schedule paused");
            return Ok(schedule);
        }
    }
    bail!("Schedule {id} kept changing underneath us; try again")
}

async fn handle_pause(id: &Uuid, state: &AppState, json: bool) -> Result<()> {
    let schedule = pause(state, id).await?;

    if json {
        return print_json(&schedule);
    }
    println!();
    println!("  {} Schedule {} paused", style("*").green().bold(), id);
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::test_state;
    use journey_core::workflow::definition::parse_workflow;
    use journey_types::config::EngineConfig;

    const JOURNEY: &str = r#"
id: 0190f5a2-6c1e-7cc0-a3a4-5d1c2b3a4f90
organization_id: 0190f5a2-6c1e-7cc0-a3a4-5d1c2b3a4f51
name: weekly digest
status: active
nodes:
  - { id: start, type: trigger }
  - { id: digest, type: message, content: "Your week" }
edges:
  - { source_node_id: start, target_node_id: digest }
"#;

    fn args(workflow: Uuid) -> CreateArgs {
        CreateArgs {
            workflow,
            at: None,
            every: Some(1),
            unit: Some(IntervalUnit::Weeks),
            start_at: None,
            cron: None,
            tz: "Europe/Berlin".into(),
            contacts: vec![Uuid::now_v7()],
            max: Some(4),
            trigger: None,
        }
    }

    #[test]
    fn test_describe() {
        let c = ScheduleConfig::Recurring {
            interval: 2,
            unit: IntervalUnit::Days,
            start_at: None,
        };
        assert_eq!(describe(&c), "every 2 days");
        let c = ScheduleConfig::Cron {
            expression: "0 9 * * 1".into(),
        };
        assert_eq!(describe(&c), "cron '0 9 * * 1'");
    }

    #[tokio::test]
    async fn test_create_then_pause() {
        let state = test_state(EngineConfig::default()).await;
        let wf = parse_workflow(JOURNEY).unwrap();
        state.repo.save_workflow(&wf).await.unwrap();

        handle_create(&args(wf.id), &state, true).await.unwrap();
        let schedules = state.repo.list_schedules(Some(&wf.id)).await.unwrap();
        assert_eq!(schedules.len(), 1);
        let s = &schedules[0];
        assert!(s.is_active);
        assert!(s.next_execution_at.unwrap() > Utc::now());
        assert_eq!(s.max_executions, Some(4));

        let paused = pause(&state, &s.id).await.unwrap();
        assert!(!paused.is_active);
        assert!(!state.repo.get_schedule(&s.id).await.unwrap().unwrap().is_active);

        // Pausing twice is a no-op.
        assert!(pause(&state, &s.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_rejects_bad_timezone_and_unknown_workflow() {
        let state = test_state(EngineConfig::default()).await;
        let wf = parse_workflow(JOURNEY).unwrap();
        state.repo.save_workflow(&wf).await.unwrap();

        let mut bad_tz = args(wf.id);
        bad_tz.tz = "Mars/Olympus_Mons".into();
        assert!(handle_create(&bad_tz, &state, true).await.is_err());

        assert!(handle_create(&args(Uuid::now_v7()), &state, true).await.is_err());
        assert!(pause(&state, &Uuid::now_v7()).await.is_err());
    }

    #[tokio::test]
    async fn test_create_with_trigger() {
        let state = test_state(EngineConfig::default()).await;
        let wf = parse_workflow(JOURNEY).unwrap();
        state.repo.save_workflow(&wf).await.unwrap();

        let mut unknown = args(wf.id);
        unknown.trigger = Some("digest".into());
        assert!(handle_create(&unknown, &state, true).await.is_err());

        let mut named = args(wf.id);
        named.trigger = Some("start".into());
        handle_create(&named, &state, true).await.unwrap();
        let schedules = state.repo.list_schedules(Some(&wf.id)).await.unwrap();
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].trigger_node_id.as_deref(), Some("start"));
    }
}
