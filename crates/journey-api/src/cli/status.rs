//! Engine status dashboard command.

use anyhow::{Context, Result};
use console::style;

use journey_core::repository::workflow::WorkflowRepository;
use journey_types::execution::ExecutionStatus;
use journey_types::workflow::WorkflowStatus;

use crate::state::AppState;

/// Display the engine status dashboard.
///
/// Shows workflow counts by status, active schedules, execution counts by
/// status and the effective engine settings.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let workflows = state
        .repo
        .list_workflows(None)
        .await
        .context("Failed to list workflows")?;
    let schedules = state
        .repo
        .list_schedules(None)
        .await
        .context("Failed to list schedules")?;
    let executions = state
        .repo
        .count_executions_by_status()
        .await
        .context("Failed to count executions")?;

    let count_wf = |s: WorkflowStatus| workflows.iter().filter(|w| w.status == s).count();
    let active_schedules = schedules.iter().filter(|s| s.is_active).count();
    let channel = if state.config.channel.webhook_url.is_some() {
        "webhook"
    } else {
        "log"
    };

    if json {
        let by_status: serde_json::Map<String, serde_json::Value> = executions
            .iter()
            .map(|(status, n)| (status.to_string(), serde_json::json!(n)))
            .collect();
        let out = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "workflows": {
                "total": workflows.len(),
                "active": count_wf(WorkflowStatus::Active),
                "paused": count_wf(WorkflowStatus::Paused),
                "draft": count_wf(WorkflowStatus::Draft),
                "archived": count_wf(WorkflowStatus::Archived),
            },
            "schedules": {
                "total": schedules.len(),
                "active": active_schedules,
            },
            "executions": by_status,
            "channel": channel,
            "tick_schedule": state.config.tick_schedule,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {} Journey v{}", style("*").bold(), env!("CARGO_PKG_VERSION"));
    println!();

    println!("  {}", style("── Workflows ──").dim());
    println!("  Total:    {}", style(workflows.len()).bold());
    println!("  Active:   {}", style(count_wf(WorkflowStatus::Active)).green());
    let paused = count_wf(WorkflowStatus::Paused);
    if paused > 0 {
        println!("  Paused:   {}", style(paused).yellow());
    }
    let draft = count_wf(WorkflowStatus::Draft);
    if draft > 0 {
        println!("  Draft:    {}", style(draft).blue());
    }
    println!();

    println!("  {}", style("── Schedules ──").dim());
    println!("  Active: {} of {}", style(active_schedules).green(), schedules.len());
    println!();

    println!("  {}", style("── Executions ──").dim());
    if executions.is_empty() {
        println!("  {}", style("none yet").dim());
    }
    for (status, n) in &executions {
        let n = match status {
            ExecutionStatus::Completed => style(n.to_string()).green(),
            ExecutionStatus::Failed => style(n.to_string()).red(),
            ExecutionStatus::Waiting | ExecutionStatus::WaitingRetry => style(n.to_string()).yellow(),
            _ => style(n.to_string()),
        };
        println!("  {:<14} {}", format!("{status}:"), n);
    }
    println!();

    println!("  {}", style("── Engine ──").dim());
    println!("  Channel:      {channel}");
    println!("  Tick cadence: {}", state.config.tick_schedule);
    println!(
        "  Retries:      {} (backoff {}s..{}s)",
        state.config.max_retries, state.config.backoff_base_secs, state.config.backoff_cap_secs
    );
    println!("  Step budget:  {}", state.config.step_budget);
    println!("  Retention:    {} days", state.config.retention_days);
    println!("  Data dir:     {}", style(state.data_dir.display()).dim());
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::test_state;
    use journey_types::config::EngineConfig;

    #[tokio::test]
    async fn test_status_on_empty_database() {
        let state = test_state(EngineConfig::default()).await;
        status(&state, true).await.unwrap();
        status(&state, false).await.unwrap();
    }
}
