//! Retry policy, retry handler and periodic maintenance.
//!
//! Transient node failures park the execution in `waiting_retry` with a
//! `RetryState` whose `next_retry_at` follows capped exponential back-off
//! with additive jitter:
//!
//! ```text
//! delay(n) = min(base * 2^n, cap) + uniform(0, jitter_ratio * min(base * 2^n, cap))
//! ```
//!
//! The handler surfaces due retries to the tick orchestrator and runs the
//! low-frequency maintenance sweep.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use journey_types::config::EngineConfig;
use journey_types::error::RepositoryError;
use journey_types::execution::{ExecutionStatus, RetryState, WorkflowExecution};
use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

use crate::repository::workflow::WorkflowRepository;

use super::checkpoint::CheckpointManager;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Retry limits and back-off parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
    /// Jitter as a fraction of the capped delay, in `[0, 1]`.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        let ratio = config.backoff_jitter_ratio;
        Self {
            max_retries: config.max_retries,
            base: Duration::seconds(config.backoff_base_secs as i64),
            cap: Duration::seconds(config.backoff_cap_secs.max(config.backoff_base_secs) as i64),
            jitter_ratio: if (0.0..=1.0).contains(&ratio) { ratio } else { 0.0 },
        }
    }

    /// Whether an execution whose retry count has just reached `retry_count`
    /// may be retried. With `max_retries = 3` the fourth failure (the first
    /// attempt plus three retries) is final.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count <= self.max_retries
    }

    /// The deterministic part of the delay: `min(base * 2^retry_count, cap)`.
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        let factor = 2_i32.checked_pow(retry_count).unwrap_or(i32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |d| d.min(self.cap))
    }

    /// Back-off delay including jitter drawn from the thread RNG.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.backoff_with(retry_count, &mut rng)
    }

    /// Back-off delay including jitter drawn from `rng`.
    pub fn backoff_with<R: Rng + ?Sized>(&self, retry_count: u32, rng: &mut R) -> Duration {
        let delay = self.base_delay(retry_count);
        let max_jitter_ms = (delay.num_milliseconds() as f64 * self.jitter_ratio) as i64;
        if max_jitter_ms <= 0 {
            return delay;
        }
        delay + Duration::milliseconds(rng.gen_range(0..=max_jitter_ms))
    }
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

/// Outcome of one maintenance sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaintenanceReport {
    /// Terminal executions deleted for being older than the retention window.
    pub executions_deleted: u64,
    /// Retry states deleted because their execution is gone or terminal.
    pub retry_states_deleted: u64,
    /// `running` executions with no progress past the stall timeout, re-queued.
    pub stalled_requeued: u64,
    /// `waiting_retry` executions whose retry state was consumed without a
    /// resume, re-queued.
    pub retries_recovered: u64,
    pub errors: Vec<String>,
}

/// Maintenance windows.
#[derive(Debug, Clone, Copy)]
pub struct MaintenanceSettings {
    pub retention: Duration,
    pub stall_timeout: Duration,
    pub batch_limit: u32,
}

impl MaintenanceSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            retention: Duration::days(i64::from(config.retention_days)),
            stall_timeout: Duration::seconds(config.stall_timeout_secs as i64),
            batch_limit: config.batch_limit.max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// RetryHandler
// ---------------------------------------------------------------------------

/// Finds executions whose back-off elapsed and hands them back for
/// resumption, and runs the maintenance sweep.
pub struct RetryHandler<R> {
    checkpoint: CheckpointManager<R>,
    batch_limit: u32,
}

impl<R: WorkflowRepository> RetryHandler<R> {
    pub fn new(repo: Arc<R>, batch_limit: u32) -> Self {
        Self {
            checkpoint: CheckpointManager::new(repo),
            batch_limit,
        }
    }

    /// Retry states due at or before `now`, earliest first, bounded by the
    /// batch limit.
    pub async fn get_pending_retries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RetryState>, RepositoryError> {
        self.checkpoint
            .repo()
            .list_due_retries(now, self.batch_limit)
            .await
    }

    /// Clear the retry state of an execution about to be resumed.
    ///
    /// Returns `false` if another processor already consumed it, in which
    /// case the caller must not resume the execution.
    pub async fn mark_as_resumed(&self, execution_id: Uuid) -> Result<bool, RepositoryError> {
        let removed = self.checkpoint.repo().delete_retry_state(&execution_id).await?;
        if removed {
            tracing::debug!(%execution_id, "retry state consumed");
        }
        Ok(removed)
    }

    /// Delete expired terminal executions and orphaned retry states, and
    /// re-queue executions stuck in `running` or left in `waiting_retry`
    /// without a retry state past the stall timeout.
    ///
    /// Each step runs independently; a failing step is recorded in the
    /// report and the remaining steps still run.
    pub async fn run_maintenance(
        &self,
        now: DateTime<Utc>,
        settings: &MaintenanceSettings,
    ) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        let repo = self.checkpoint.repo();

        match repo.delete_terminal_executions(now - settings.retention).await {
            Ok(n) => report.executions_deleted = n,
            Err(e) => report.errors.push(format!("delete terminal executions: {e}")),
        }

        match repo.delete_orphaned_retry_states().await {
            Ok(n) => report.retry_states_deleted = n,
            Err(e) => report.errors.push(format!("delete orphaned retry states: {e}")),
        }

        let stale_before = now - settings.stall_timeout;
        match repo
            .list_stalled_executions(stale_before, settings.batch_limit)
            .await
        {
            Ok(stalled) => {
                report.stalled_requeued =
                    self.requeue(stalled, now, "stalled execution", &mut report.errors).await;
            }
            Err(e) => report.errors.push(format!("list stalled executions: {e}")),
        }

        match repo
            .list_stranded_retries(stale_before, settings.batch_limit)
            .await
        {
            Ok(stranded) => {
                report.retries_recovered =
                    self.requeue(stranded, now, "stranded retry", &mut report.errors).await;
            }
            Err(e) => report.errors.push(format!("list stranded retries: {e}")),
        }

        tracing::info!(
            executions_deleted = report.executions_deleted,
            retry_states_deleted = report.retry_states_deleted,
            stalled_requeued = report.stalled_requeued,
            retries_recovered = report.retries_recovered,
            errors = report.errors.len(),
            "maintenance sweep finished"
        );
        report
    }

    /// Move each execution back to `pending` through a guarded commit.
    /// Returns how many writes applied; a lost race is not an error.
    async fn requeue(
        &self,
        executions: Vec<WorkflowExecution>,
        now: DateTime<Utc>,
        what: &str,
        errors: &mut Vec<String>,
    ) -> u64 {
        let mut requeued = 0;
        for mut execution in executions {
            let expected = execution.guard();
            execution.status = ExecutionStatus::Pending;
            match self.checkpoint.commit(&mut execution, expected, now).await {
                Ok(true) => {
                    tracing::warn!(
                        execution_id = %execution.id,
                        from = %expected.status,
                        node_id = execution.current_node_id.as_deref().unwrap_or("-"),
                        "re-queued {what}"
                    );
                    requeued += 1;
                }
                Ok(false) => {}
                Err(e) => errors.push(format!("re-queue {what} {}: {e}", execution.id)),
            }
        }
        requeued
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
