//! `jrny tick`, `jrny run` and `jrny maintain`.

use anyhow::{Context, Result};
use chrono::Utc;
use console::style;

use journey_core::workflow::scheduler::ItemError;
use journey_core::workflow::tick::{MaintenanceMode, TickReport};

use crate::cli::output::print_json;
use crate::state::AppState;
use crate::ticker::TickDriver;

/// Run a single tick and print its report.
pub async fn tick(state: &AppState, mode: MaintenanceMode, json: bool, quiet: bool) -> Result<()> {
    let report = state.tick.run_tick_at(Utc::now(), mode).await;

    if json {
        print_json(&report)?;
    } else if !quiet {
        print_report(&report);
    }
    Ok(())
}

/// Tick on `every` (or the configured `tick_schedule`) until Ctrl+C.
pub async fn run(state: &AppState, every: Option<String>, quiet: bool) -> Result<()> {
    let schedule = every.unwrap_or_else(|| state.config.tick_schedule.clone());
    let driver = TickDriver::start(state.clone(), &schedule)
        .await
        .context("Failed to start the tick driver")?;

    if !quiet {
        println!();
        println!(
            "  {} Ticking on '{}' ({})",
            style("*").green().bold(),
            style(&schedule).cyan(),
            style(driver.cron_expr()).dim()
        );
        println!("  {}", style("Press Ctrl+C to stop").dim());
    }

    crate::shutdown_signal().await;
    state.shutdown_token().cancel();
    driver.stop().await.context("Failed to stop the tick driver")?;

    if !quiet {
        println!("\n  Stopped.");
    }
    Ok(())
}

/// Run the maintenance sweep immediately.
pub async fn maintain(state: &AppState, json: bool) -> Result<()> {
    let settings = state.tick.settings().maintenance;
    let report = state
        .tick
        .retry_handler()
        .run_maintenance(Utc::now(), &settings)
        .await;

    if json {
        return print_json(&report);
    }

    println!();
    println!("  {} Maintenance finished", style("*").green().bold());
    println!("  Expired executions deleted: {}", report.executions_deleted);
    println!("  Orphaned retry states deleted: {}", report.retry_states_deleted);
    println!("  Stalled executions re-queued: {}", report.stalled_requeued);
    println!("  Stranded retries re-queued: {}", report.retries_recovered);
    for error in &report.errors {
        println!("  {} {error}", style("!").red().bold());
    }
    println!();
    Ok(())
}

fn print_item_errors(errors: &[ItemError]) {
    for e in errors {
        println!("    {} {}: {}", style("!").red().bold(), e.id, e.message);
    }
}

fn print_report(report: &TickReport) {
    let marker = if report.error_count() == 0 {
        style("*").green().bold()
    } else {
        style("!").yellow().bold()
    };

    println!();
    println!("  {marker} Tick at {}", report.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!(
        "  Schedules fired: {} ({} executions started)",
        report.schedules.fired,
        report.schedules.started.len()
    );
    print_item_errors(&report.schedules.errors);
    println!("  Retries resumed: {}", report.retries.processed);
    print_item_errors(&report.retries.errors);
    println!("  Waits resumed:   {}", report.waits.resumed);
    print_item_errors(&report.waits.errors);

    let e = &report.executions;
    println!(
        "  Executions: {} completed, {} waiting, {} retrying, {} failed, {} yielded",
        style(e.completed).green(),
        style(e.waiting).yellow(),
        style(e.retrying).yellow(),
        style(e.failed).red(),
        e.yielded
    );
    print_item_errors(&e.errors);

    if let Some(m) = &report.maintenance {
        println!(
            "  Maintenance: {} expired, {} orphaned retries, {} stalled re-queued, {} retries recovered",
            m.executions_deleted, m.retry_states_deleted, m.stalled_requeued, m.retries_recovered
        );
        for error in &m.errors {
            println!("    {} {error}", style("!").red().bold());
        }
    }
    println!();
}
