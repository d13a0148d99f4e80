//! Built-in tick driver wrapping `tokio-cron-scheduler`.
//!
//! `jrny run` and `jrny serve --every` use it to call `run_tick` on a cron
//! expression or schedule phrase ("every minute", "every 30 seconds"). A tick
//! that overlaps a slow predecessor only picks up work nobody else owns.

use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use journey_core::workflow::scheduler::normalize_cron;

use crate::state::AppState;

/// Errors starting or stopping the tick driver.
#[derive(Debug, thiserror::Error)]
pub enum TickerError {
    #[error("invalid tick schedule: {0}")]
    InvalidSchedule(String),

    #[error("tick scheduler error: {0}")]
    Job(String),
}

/// A running cron job that ticks the engine.
pub struct TickDriver {
    scheduler: JobScheduler,
    job_id: Uuid,
    cron_expr: String,
}

impl TickDriver {
    /// Start ticking `state`'s orchestrator on `schedule`.
    pub async fn start(state: AppState, schedule: &str) -> Result<Self, TickerError> {
        let cron_expr =
            normalize_cron(schedule).map_err(|e| TickerError::InvalidSchedule(e.to_string()))?;

        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| TickerError::Job(e.to_string()))?;

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let state = state.clone();
            Box::pin(async move {
                tracing::debug!(now = %Utc::now(), "tick driver fired");
                let report = state.tick.run_tick().await;
                if report.error_count() > 0 {
                    tracing::warn!(errors = report.error_count(), "tick finished with errors");
                }
            })
        })
        .map_err(|e| TickerError::InvalidSchedule(e.to_string()))?;

        let job_id = job.guid();
        scheduler
            .add(job)
            .await
            .map_err(|e| TickerError::Job(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| TickerError::Job(e.to_string()))?;

        tracing::info!(%job_id, cron = %cron_expr, "tick driver started");
        Ok(Self {
            scheduler,
            job_id,
            cron_expr,
        })
    }

    /// The normalized 6-field cron expression being driven.
    pub fn cron_expr(&self) -> &str {
        &self.cron_expr
    }

    /// Remove the job and stop the scheduler.
    pub async fn stop(mut self) -> Result<(), TickerError> {
        self.scheduler
            .remove(&self.job_id)
            .await
            .map_err(|e| TickerError::Job(e.to_string()))?;
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| TickerError::Job(e.to_string()))?;
        tracing::info!("tick driver stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::test_state;
    use journey_types::config::EngineConfig;

    #[tokio::test]
    async fn test_start_rejects_bad_schedule() {
        let state = test_state(EngineConfig::default()).await;
        let err = TickDriver::start(state, "whenever you like").await.err().unwrap();
        assert!(matches!(err, TickerError::InvalidSchedule(_)));
    }

    #[tokio::test]
    async fn test_start_normalizes_phrase_and_stops() {
        let state = test_state(EngineConfig::default()).await;
        let driver = TickDriver::start(state, "every 5 minutes").await.unwrap();
        assert_eq!(driver.cron_expr(), "0 */5 * * * *");
        driver.stop().await.unwrap();
    }
}
