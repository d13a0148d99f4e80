//! Tick orchestrator: the periodic entry point of the engine.
//!
//! One tick runs, in order:
//!
//! 1. the scheduler sweep (due schedules start new executions),
//! 2. the retry sweep (executions whose back-off elapsed),
//! 3. the due-wait sweep (waiting executions whose wake time passed),
//! 4. the pending sweep (new, re-queued and yielded executions),
//! 5. maintenance, on a sampled subset of ticks or when forced.
//!
//! Executions from steps 2-4 are processed on a bounded worker pool shared by
//! every tick of the orchestrator. Overlapping ticks are safe: the store's
//! conditional writes decide ownership, and an in-process in-flight set keeps
//! one orchestrator from dispatching the same execution twice.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use journey_types::config::EngineConfig;
use rand::Rng;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::channel::ChannelSender;
use crate::repository::contact::ContactResolver;
use crate::repository::goal::GoalSink;
use crate::repository::workflow::WorkflowRepository;

use super::executor::{ExecutionEngine, StepOutcome};
use super::retry::{MaintenanceReport, MaintenanceSettings, RetryHandler};
use super::scheduler::{ItemError, ScheduleSweep, Scheduler};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Tick sizing taken from `EngineConfig`.
#[derive(Debug, Clone, Copy)]
pub struct TickSettings {
    /// Worker pool size.
    pub concurrency: usize,
    /// Rows fetched by each sweep.
    pub batch_limit: u32,
    /// Maintenance runs on roughly one tick in this many; 0 disables sampling.
    pub maintenance_every_ticks: u32,
    pub maintenance: MaintenanceSettings,
}

impl TickSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            batch_limit: config.batch_limit.max(1),
            maintenance_every_ticks: config.maintenance_every_ticks,
            maintenance: MaintenanceSettings::from_config(config),
        }
    }
}

impl Default for TickSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Whether a tick runs the maintenance sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceMode {
    /// Run on one tick in `maintenance_every_ticks`, chosen at random.
    Sampled,
    Forced,
    Skip,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Retry sweep results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrySweep {
    /// Executions handed back to the engine.
    pub processed: usize,
    pub errors: Vec<ItemError>,
}

/// Due-wait sweep results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WaitSweep {
    pub resumed: usize,
    pub errors: Vec<ItemError>,
}

/// Where each dispatched execution ended up this tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionTally {
    pub completed: usize,
    pub waiting: usize,
    pub retrying: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub yielded: usize,
    pub skipped: usize,
    pub errors: Vec<ItemError>,
}

impl ExecutionTally {
    fn record(&mut self, outcome: &StepOutcome) {
        match outcome {
            StepOutcome::Completed => self.completed += 1,
            StepOutcome::Waiting { .. } => self.waiting += 1,
            StepOutcome::RetryScheduled { .. } => self.retrying += 1,
            StepOutcome::Failed { .. } => self.failed += 1,
            StepOutcome::Cancelled => self.cancelled += 1,
            StepOutcome::Yielded => self.yielded += 1,
            StepOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Everything one tick did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    pub schedules: ScheduleSweep,
    pub retries: RetrySweep,
    pub waits: WaitSweep,
    pub executions: ExecutionTally,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintenance: Option<MaintenanceReport>,
}

impl TickReport {
    pub fn error_count(&self) -> usize {
        self.schedules.errors.len()
            + self.retries.errors.len()
            + self.waits.errors.len()
            + self.executions.errors.len()
            + self.maintenance.as_ref().map_or(0, |m| m.errors.len())
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    /// Consume the retry state, then resume from `waiting_retry`.
    Retry(Uuid),
    /// Run a `pending` or due `waiting` execution.
    Run(Uuid),
}

impl Job {
    fn execution_id(self) -> Uuid {
        match self {
            Job::Retry(id) | Job::Run(id) => id,
        }
    }
}

struct JobResult {
    job: Job,
    /// `Ok(None)` when a retry state was already consumed elsewhere.
    outcome: Result<Option<StepOutcome>, String>,
}

/// Removes an execution from the in-flight set when dropped.
struct InFlight {
    set: Arc<DashSet<Uuid>>,
    id: Uuid,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

// ---------------------------------------------------------------------------
// TickOrchestrator
// ---------------------------------------------------------------------------

/// Runs ticks against one store and one engine.
pub struct TickOrchestrator<R, S, C, G> {
    engine: Arc<ExecutionEngine<R, S, C, G>>,
    scheduler: Scheduler<R>,
    retries: Arc<RetryHandler<R>>,
    repo: Arc<R>,
    settings: TickSettings,
    pool: Arc<Semaphore>,
    in_flight: Arc<DashSet<Uuid>>,
    shutdown: CancellationToken,
}

impl<R, S, C, G> TickOrchestrator<R, S, C, G>
where
    R: WorkflowRepository + 'static,
    S: ChannelSender + 'static,
    C: ContactResolver + 'static,
    G: GoalSink + 'static,
{
    pub fn new(
        engine: Arc<ExecutionEngine<R, S, C, G>>,
        repo: Arc<R>,
        settings: TickSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            scheduler: Scheduler::new(repo.clone(), settings.batch_limit),
            retries: Arc::new(RetryHandler::new(repo.clone(), settings.batch_limit)),
            repo,
            settings,
            pool: Arc::new(Semaphore::new(settings.concurrency.max(1))),
            in_flight: Arc::new(DashSet::new()),
            shutdown,
        }
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine<R, S, C, G>> {
        &self.engine
    }

    pub fn retry_handler(&self) -> &RetryHandler<R> {
        &self.retries
    }

    pub fn settings(&self) -> &TickSettings {
        &self.settings
    }

    /// The token that stops in-flight executions; cancel it on shutdown.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Run one tick now, with sampled maintenance.
    pub async fn run_tick(&self) -> TickReport {
        self.run_tick_at(Utc::now(), MaintenanceMode::Sampled).await
    }

    /// Run one tick as of `now`.
    ///
    /// Never fails: per-item errors are collected into the report.
    pub async fn run_tick_at(&self, now: DateTime<Utc>, maintenance: MaintenanceMode) -> TickReport {
        let mut report = TickReport {
            started_at: now,
            ..TickReport::default()
        };

        if self.shutdown.is_cancelled() {
            tracing::info!("shutdown requested, tick skipped");
            return report;
        }

        report.schedules = self.scheduler.process_due_schedules(now).await;

        let mut jobs = Vec::new();
        let mut queued = HashSet::new();

        match self.retries.get_pending_retries(now).await {
            Ok(due) => {
                for state in due {
                    if queued.insert(state.execution_id) {
                        jobs.push(Job::Retry(state.execution_id));
                    }
                }
            }
            Err(e) => report.retries.errors.push(ItemError {
                id: Uuid::nil(),
                message: format!("list due retries: {e}"),
            }),
        }

        match self.repo.list_due_waits(now, self.settings.batch_limit).await {
            Ok(due) => {
                for execution in due {
                    if queued.insert(execution.id) {
                        jobs.push(Job::Run(execution.id));
                        report.waits.resumed += 1;
                    }
                }
            }
            Err(e) => report.waits.errors.push(ItemError {
                id: Uuid::nil(),
                message: format!("list due waits: {e}"),
            }),
        }

        match self.repo.list_pending_executions(self.settings.batch_limit).await {
            Ok(pending) => {
                for execution in pending {
                    if queued.insert(execution.id) {
                        jobs.push(Job::Run(execution.id));
                    }
                }
            }
            Err(e) => report.executions.errors.push(ItemError {
                id: Uuid::nil(),
                message: format!("list pending executions: {e}"),
            }),
        }

        self.dispatch(jobs, now, &mut report).await;

        if self.should_maintain(maintenance) {
            report.maintenance = Some(
                self.retries
                    .run_maintenance(now, &self.settings.maintenance)
                    .await,
            );
        }

        for error in report
            .retries
            .errors
            .iter()
            .chain(&report.waits.errors)
            .chain(&report.executions.errors)
        {
            tracing::warn!(id = %error.id, error = %error.message, "tick item failed");
        }
        tracing::info!(
            schedules_fired = report.schedules.fired,
            executions_started = report.schedules.started.len(),
            retries_processed = report.retries.processed,
            waits_resumed = report.waits.resumed,
            completed = report.executions.completed,
            waiting = report.executions.waiting,
            retrying = report.executions.retrying,
            failed = report.executions.failed,
            yielded = report.executions.yielded,
            maintenance = report.maintenance.is_some(),
            errors = report.error_count(),
            "tick finished"
        );
        report
    }

    /// Process `jobs` on the worker pool and fold the outcomes into `report`.
    async fn dispatch(&self, jobs: Vec<Job>, now: DateTime<Utc>, report: &mut TickReport) {
        let mut set: JoinSet<JobResult> = JoinSet::new();

        for job in jobs {
            let id = job.execution_id();
            if !self.in_flight.insert(id) {
                tracing::debug!(execution_id = %id, "already in flight, not dispatched");
                report.executions.skipped += 1;
                continue;
            }
            let guard = InFlight {
                set: self.in_flight.clone(),
                id,
            };
            let engine = self.engine.clone();
            let retries = self.retries.clone();
            let pool = self.pool.clone();
            let shutdown = self.shutdown.clone();

            set.spawn(async move {
                let _guard = guard;
                let outcome = match pool.acquire_owned().await {
                    Ok(_permit) if shutdown.is_cancelled() => Ok(Some(StepOutcome::Skipped)),
                    Ok(_permit) => run_job(&engine, &retries, job, now, &shutdown).await,
                    Err(e) => Err(format!("worker pool closed: {e}")),
                };
                JobResult { job, outcome }
            });
        }

        while let Some(joined) = set.join_next().await {
            let JobResult { job, outcome } = match joined {
                Ok(result) => result,
                Err(e) => {
                    report.executions.errors.push(ItemError {
                        id: Uuid::nil(),
                        message: format!("execution task panicked: {e}"),
                    });
                    continue;
                }
            };
            let id = job.execution_id();
            match (job, outcome) {
                (Job::Retry(_), Ok(Some(outcome))) => {
                    report.retries.processed += 1;
                    report.executions.record(&outcome);
                }
                (_, Ok(Some(outcome))) => report.executions.record(&outcome),
                (_, Ok(None)) => report.executions.skipped += 1,
                (Job::Retry(_), Err(message)) => {
                    report.retries.errors.push(ItemError { id, message })
                }
                (Job::Run(_), Err(message)) => {
                    report.executions.errors.push(ItemError { id, message })
                }
            }
        }
    }

    fn should_maintain(&self, mode: MaintenanceMode) -> bool {
        match mode {
            MaintenanceMode::Forced => true,
            MaintenanceMode::Skip => false,
            MaintenanceMode::Sampled => match self.settings.maintenance_every_ticks {
                0 => false,
                1 => true,
                n => rand::thread_rng().gen_range(0..n) == 0,
            },
        }
    }
}

async fn run_job<R, S, C, G>(
    engine: &ExecutionEngine<R, S, C, G>,
    retries: &RetryHandler<R>,
    job: Job,
    now: DateTime<Utc>,
    shutdown: &CancellationToken,
) -> Result<Option<StepOutcome>, String>
where
    R: WorkflowRepository,
    S: ChannelSender,
    C: ContactResolver,
    G: GoalSink,
{
    match job {
        Job::Retry(id) => {
            if !retries.mark_as_resumed(id).await.map_err(|e| e.to_string())? {
                return Ok(None);
            }
            engine
                .resume_retry(id, now, shutdown)
                .await
                .map(Some)
                .map_err(|e| e.to_string())
        }
        Job::Run(id) => engine
            .run(id, now, shutdown)
            .await
            .map(Some)
            .map_err(|e| e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
