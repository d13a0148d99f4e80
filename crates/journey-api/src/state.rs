//! Application state wiring all services together.
//!
//! AppState holds the concrete engine and stores used by both the CLI and the
//! REST API. The engine is generic over its collaborators; AppState pins it to
//! SQLite plus the configured channel sender.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use journey_core::workflow::executor::{EngineSettings, ExecutionEngine};
use journey_core::workflow::tick::{TickOrchestrator, TickSettings};
use journey_infra::channel::ConfiguredSender;
use journey_infra::config::{load_engine_config, resolve_data_dir};
use journey_infra::sqlite::contact::SqliteContactStore;
use journey_infra::sqlite::goal::SqliteGoalSink;
use journey_infra::sqlite::pool::{DatabasePool, database_url};
use journey_infra::sqlite::workflow::SqliteWorkflowRepository;
use journey_types::config::EngineConfig;

/// Concrete type aliases for the engine generics pinned to infra implementations.
pub type ConcreteEngine =
    ExecutionEngine<SqliteWorkflowRepository, ConfiguredSender, SqliteContactStore, SqliteGoalSink>;

pub type ConcreteTick =
    TickOrchestrator<SqliteWorkflowRepository, ConfiguredSender, SqliteContactStore, SqliteGoalSink>;

/// Shared application state.
///
/// Cheap to clone; every field is reference counted.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<SqliteWorkflowRepository>,
    pub contacts: Arc<SqliteContactStore>,
    pub goals: Arc<SqliteGoalSink>,
    pub tick: Arc<ConcreteTick>,
    pub config: Arc<EngineConfig>,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Resolve the data directory, load `config.toml`, open the database and
    /// wire the engine.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let config = load_engine_config(&data_dir).await;

        let db_pool = DatabasePool::new(&database_url(&data_dir))
            .await
            .context("Failed to open the journey database")?;

        Self::from_parts(data_dir, config, db_pool)
    }

    /// Wire the engine over an already-open database.
    pub fn from_parts(
        data_dir: PathBuf,
        config: EngineConfig,
        db_pool: DatabasePool,
    ) -> anyhow::Result<Self> {
        let repo = Arc::new(SqliteWorkflowRepository::new(db_pool.clone()));
        let contacts = Arc::new(SqliteContactStore::new(db_pool.clone()));
        let goals = Arc::new(SqliteGoalSink::new(db_pool.clone()));

        let sender = ConfiguredSender::from_config(&config.channel)
            .context("Failed to build the channel sender")?;

        let engine = Arc::new(ExecutionEngine::new(
            repo.clone(),
            Arc::new(sender),
            contacts.clone(),
            goals.clone(),
            EngineSettings::from_config(&config),
        ));
        let tick = TickOrchestrator::new(
            engine,
            repo.clone(),
            TickSettings::from_config(&config),
            CancellationToken::new(),
        );

        Ok(Self {
            repo,
            contacts,
            goals,
            tick: Arc::new(tick),
            config: Arc::new(config),
            data_dir,
            db_pool,
        })
    }

    pub fn engine(&self) -> &ConcreteEngine {
        self.tick.engine()
    }

    /// Token cancelled on shutdown; in-flight executions stop advancing.
    pub fn shutdown_token(&self) -> &CancellationToken {
        self.tick.shutdown_token()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// State over a fresh temporary database.
    pub async fn test_state(config: EngineConfig) -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_path_buf();
        std::mem::forget(dir);
        let pool = DatabasePool::new(&database_url(&data_dir)).await.unwrap();
        AppState::from_parts(data_dir, config, pool).unwrap()
    }
}
