//! Journey CLI and REST API entry point.
//!
//! Binary name: `jrny`
//!
//! Parses CLI arguments, opens the database and wires the engine, then
//! dispatches to the command handler or starts the REST API server.

mod cli;
mod http;
mod state;
mod ticker;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use journey_core::workflow::tick::MaintenanceMode;
use journey_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing, verbosity_filter};
use state::AppState;
use ticker::TickDriver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&TracingOptions {
        default_filter: verbosity_filter(cli.verbose, cli.quiet).to_string(),
        json: cli.log_json,
        enable_otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "jrny", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;
    let result = dispatch(cli, state).await;

    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli, state: AppState) -> anyhow::Result<()> {
    let json = cli.json;
    match cli.command {
        Commands::Tick {
            maintenance,
            skip_maintenance,
        } => {
            let mode = if maintenance {
                MaintenanceMode::Forced
            } else if skip_maintenance {
                MaintenanceMode::Skip
            } else {
                MaintenanceMode::Sampled
            };
            cli::tick::tick(&state, mode, json, cli.quiet).await?;
        }

        Commands::Run { every } => {
            cli::tick::run(&state, every, cli.quiet).await?;
        }

        Commands::Serve { port, host, every } => {
            serve(state, &host, port, every).await?;
        }

        Commands::Workflow { action } => {
            cli::workflow::handle_workflow_command(action, &state, json).await?;
        }

        Commands::Schedule { action } => {
            cli::schedule::handle_schedule_command(action, &state, json).await?;
        }

        Commands::Execution { action } => {
            cli::execution::handle_execution_command(action, &state, json).await?;
        }

        Commands::Contact { action } => {
            cli::contact::handle_contact_command(action, &state, json).await?;
        }

        Commands::Goal { action } => {
            cli::goal::handle_goal_command(action, &state, json).await?;
        }

        Commands::Maintain => {
            cli::tick::maintain(&state, json).await?;
        }

        Commands::Status => {
            cli::status::status(&state, json).await?;
        }

        Commands::Completions { .. } => {}
    }

    Ok(())
}

async fn serve(state: AppState, host: &str, port: u16, every: Option<String>) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let driver = match every {
        Some(schedule) => Some(TickDriver::start(state.clone(), &schedule).await?),
        None => None,
    };

    println!(
        "  {} Journey API listening on {}",
        console::style("*").green().bold(),
        console::style(format!("http://{addr}")).cyan()
    );
    if let Some(driver) = &driver {
        println!("  Ticking on {}", console::style(driver.cron_expr()).dim());
    }
    println!("  {}", console::style("Press Ctrl+C to stop").dim());

    let token = state.shutdown_token().clone();
    let router = http::router::build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            token.cancel();
        })
        .await?;

    if let Some(driver) = driver {
        driver.stop().await?;
    }
    println!("\n  Server stopped.");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
