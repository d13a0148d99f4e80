//! Execution engine: drives one execution through the node graph.
//!
//! Every invocation follows the same protocol:
//!
//! 1. Claim the execution with a conditional write into `running`. Losing the
//!    claim means another processor owns it, so the invocation is skipped.
//! 2. Evaluate the current node and apply the decision.
//! 3. Persist each advance with a conditional write keyed on the guard read
//!    in the previous step. A lost write means a concurrent cancellation or
//!    recovery happened; the engine re-reads and stops.
//! 4. Continue until the execution completes, fails, parks (`waiting`,
//!    `waiting_retry`) or exhausts its step budget (re-queued as `pending`).

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use journey_types::config::EngineConfig;
use journey_types::execution::{
    ExecutionStatus, FailureKind, RetryState, WorkflowExecution, store_precision,
};
use journey_types::workflow::{NodeConfig, Workflow, WorkflowStatus};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::channel::ChannelSender;
use crate::repository::contact::ContactResolver;
use crate::repository::goal::GoalSink;
use crate::repository::workflow::WorkflowRepository;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::context::{MAX_CONTEXT_SIZE, context_size, wait_key};
use super::evaluator::{Decision, NodeEvaluator};
use super::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default number of node evaluations per invocation.
pub const DEFAULT_STEP_BUDGET: u32 = 50;

/// Conditional-write attempts a cancellation makes before giving up.
const MAX_CANCEL_ATTEMPTS: usize = 5;

// ---------------------------------------------------------------------------
// Settings and outcomes
// ---------------------------------------------------------------------------

/// Engine tuning taken from `EngineConfig`.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub step_budget: u32,
    pub retry: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            step_budget: DEFAULT_STEP_BUDGET,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            step_budget: config.step_budget.max(1),
            retry: RetryPolicy::from_config(config),
        }
    }
}

/// Where an invocation left the execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    Waiting {
        until: DateTime<Utc>,
    },
    RetryScheduled {
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    },
    Failed {
        reason: String,
    },
    Cancelled,
    /// Step budget exhausted or shutdown requested; re-queued as `pending`.
    Yielded,
    /// Not claimable, or another processor won the race.
    Skipped,
}

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

/// Drives executions through the state machine.
///
/// Generic over the four collaborators so tests can use in-memory doubles
/// and production wires SQLite plus a real channel sender.
pub struct ExecutionEngine<R, S, C, G> {
    checkpoint: CheckpointManager<R>,
    evaluator: NodeEvaluator<S, C>,
    goals: Arc<G>,
    settings: EngineSettings,
}

impl<R, S, C, G> ExecutionEngine<R, S, C, G>
where
    R: WorkflowRepository,
    S: ChannelSender,
    C: ContactResolver,
    G: GoalSink,
{
    pub fn new(
        repo: Arc<R>,
        sender: Arc<S>,
        contacts: Arc<C>,
        goals: Arc<G>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            checkpoint: CheckpointManager::new(repo),
            evaluator: NodeEvaluator::new(sender, contacts),
            goals,
            settings,
        }
    }

    pub fn checkpoint(&self) -> &CheckpointManager<R> {
        &self.checkpoint
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Start a new pending execution of an active workflow for one contact.
    pub async fn enqueue(
        &self,
        workflow_id: Uuid,
        contact_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<WorkflowExecution, ExecutorError> {
        self.enqueue_at(workflow_id, contact_id, None, now).await
    }

    /// Like [`enqueue`](Self::enqueue), entering the workflow at a specific
    /// trigger node.
    pub async fn enqueue_at(
        &self,
        workflow_id: Uuid,
        contact_id: Uuid,
        trigger: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<WorkflowExecution, ExecutorError> {
        let workflow = self.load_workflow(workflow_id).await?;
        if workflow.status != WorkflowStatus::Active {
            return Err(ExecutorError::WorkflowInactive {
                id: workflow_id,
                status: workflow.status,
            });
        }
        let execution = self
            .checkpoint
            .start_execution(&workflow, contact_id, trigger, now)
            .await?;
        tracing::info!(
            execution_id = %execution.id,
            workflow_id = %workflow_id,
            contact_id = %contact_id,
            "execution enqueued"
        );
        Ok(execution)
    }

    /// Run a `pending` execution, or a `waiting` one whose wake time passed.
    pub async fn run(
        &self,
        execution_id: Uuid,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, ExecutorError> {
        let claimed = self
            .claim(execution_id, now, |e| match e.status {
                ExecutionStatus::Pending => true,
                ExecutionStatus::Waiting => e.wake_at.is_none_or(|w| w <= now),
                _ => false,
            })
            .await?;
        match claimed {
            Some(execution) => self.drive(execution, now, cancel).await,
            None => Ok(StepOutcome::Skipped),
        }
    }

    /// Resume an execution parked in `waiting_retry`.
    ///
    /// The caller consumes the retry state first (`RetryHandler::mark_as_resumed`).
    pub async fn resume_retry(
        &self,
        execution_id: Uuid,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, ExecutorError> {
        let claimed = self
            .claim(execution_id, now, |e| e.status == ExecutionStatus::WaitingRetry)
            .await?;
        match claimed {
            Some(execution) => {
                tracing::info!(
                    execution_id = %execution_id,
                    retry_count = execution.retry_count,
                    "resuming after retry back-off"
                );
                self.drive(execution, now, cancel).await
            }
            None => Ok(StepOutcome::Skipped),
        }
    }

    /// Resume a `waiting` execution before its wake time (external event).
    ///
    /// The wait node it is parked on is treated as elapsed.
    pub async fn resume_waiting(
        &self,
        execution_id: Uuid,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, ExecutorError> {
        let mut execution = self.checkpoint.load(execution_id).await?;
        if execution.status != ExecutionStatus::Waiting {
            return Ok(StepOutcome::Skipped);
        }
        let expected = execution.guard();
        execution.status = ExecutionStatus::Running;
        execution.wake_at = None;
        if let Some(node_id) = execution.current_node_id.clone() {
            execution.context.insert(
                wait_key(&node_id),
                Value::String(store_precision(now).to_rfc3339()),
            );
        }
        if !self.checkpoint.commit(&mut execution, expected, now).await? {
            return Ok(StepOutcome::Skipped);
        }
        tracing::info!(execution_id = %execution_id, "waiting execution resumed early");
        self.drive(execution, now, cancel).await
    }

    /// Cancel a non-terminal execution. Returns `false` if it was already
    /// terminal.
    ///
    /// A `running` execution is cancelled in place; its processor notices on
    /// its next conditional write and stops.
    pub async fn cancel(
        &self,
        execution_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, ExecutorError> {
        for _ in 0..MAX_CANCEL_ATTEMPTS {
            let mut execution = self.checkpoint.load(execution_id).await?;
            if execution.status.is_terminal() {
                return Ok(false);
            }
            let expected = execution.guard();
            execution.status = ExecutionStatus::Cancelled;
            execution.current_node_id = None;
            execution.wake_at = None;
            execution.completed_at = Some(store_precision(now));
            if self.checkpoint.commit(&mut execution, expected, now).await? {
                self.checkpoint.clear_retry_state(execution_id).await?;
                tracing::info!(execution_id = %execution_id, from = %expected.status, "execution cancelled");
                return Ok(true);
            }
        }
        Err(ExecutorError::Contended(execution_id))
    }

    /// Cancel every non-terminal execution of a workflow. Returns how many
    /// were cancelled.
    pub async fn cancel_workflow(
        &self,
        workflow_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ExecutorError> {
        let executions = self
            .checkpoint
            .repo()
            .list_executions(&workflow_id, u32::MAX)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        let mut cancelled = 0;
        for execution in executions.iter().filter(|e| !e.status.is_terminal()) {
            if self.cancel(execution.id, now).await? {
                cancelled += 1;
            }
        }
        tracing::info!(workflow_id = %workflow_id, cancelled, "workflow executions cancelled");
        Ok(cancelled)
    }

    /// Resume an execution from wherever it is parked.
    ///
    /// `waiting` is woken early, `waiting_retry` skips the rest of its
    /// back-off, `pending` runs. Anything else is `Skipped`.
    pub async fn resume(
        &self,
        execution_id: Uuid,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, ExecutorError> {
        let execution = self.checkpoint.load(execution_id).await?;
        match execution.status {
            ExecutionStatus::Waiting => self.resume_waiting(execution_id, now, cancel).await,
            ExecutionStatus::WaitingRetry => {
                if !self.checkpoint.clear_retry_state(execution_id).await? {
                    // A tick consumed it first and owns the resumption.
                    return Ok(StepOutcome::Skipped);
                }
                self.resume_retry(execution_id, now, cancel).await
            }
            ExecutionStatus::Pending => self.run(execution_id, now, cancel).await,
            _ => Ok(StepOutcome::Skipped),
        }
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    async fn load_workflow(&self, workflow_id: Uuid) -> Result<Workflow, ExecutorError> {
        self.checkpoint
            .repo()
            .get_workflow(&workflow_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or(ExecutorError::WorkflowNotFound(workflow_id))
    }

    /// Move an execution into `running` if `claimable` accepts its current
    /// state and nobody else claims it first.
    async fn claim(
        &self,
        execution_id: Uuid,
        now: DateTime<Utc>,
        claimable: impl Fn(&WorkflowExecution) -> bool,
    ) -> Result<Option<WorkflowExecution>, ExecutorError> {
        let mut execution = self.checkpoint.load(execution_id).await?;
        if !claimable(&execution) {
            tracing::debug!(
                execution_id = %execution_id,
                status = %execution.status,
                "execution not claimable"
            );
            return Ok(None);
        }
        let expected = execution.guard();
        execution.status = ExecutionStatus::Running;
        execution.wake_at = None;
        if self.checkpoint.commit(&mut execution, expected, now).await? {
            Ok(Some(execution))
        } else {
            Ok(None)
        }
    }

    async fn drive(
        &self,
        mut execution: WorkflowExecution,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, ExecutorError> {
        let workflow = match self
            .checkpoint
            .repo()
            .get_workflow(&execution.workflow_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
        {
            Some(workflow) => workflow,
            None => {
                let reason = format!("workflow {} not found", execution.workflow_id);
                return self.fail(execution, reason, now).await;
            }
        };

        let mut visited: HashSet<String> = HashSet::new();
        let mut steps = 0;

        loop {
            if cancel.is_cancelled() {
                tracing::info!(execution_id = %execution.id, "shutdown requested, re-queueing");
                return self.requeue(execution, now).await;
            }
            if steps >= self.settings.step_budget {
                tracing::info!(
                    execution_id = %execution.id,
                    steps,
                    "step budget exhausted, re-queueing"
                );
                return self.requeue(execution, now).await;
            }
            steps += 1;

            let Some(node_id) = execution.current_node_id.clone() else {
                return self.complete(execution, now).await;
            };
            let Some(node) = workflow.node(&node_id) else {
                let reason = format!("node '{node_id}' not found in workflow {}", workflow.id);
                return self.fail(execution, reason, now).await;
            };
            // Wait nodes always park on re-entry, so only non-wait revisits
            // indicate a loop that can never yield.
            if !matches!(node.config, NodeConfig::Wait(_)) && !visited.insert(node_id.clone()) {
                return self
                    .fail(execution, format!("cycle detected at node '{node_id}'"), now)
                    .await;
            }

            let expected = execution.guard();
            let decision = self.evaluator.evaluate(node, &mut execution, now).await;

            if context_size(&execution.context) > MAX_CONTEXT_SIZE {
                let reason = format!("execution context exceeds {MAX_CONTEXT_SIZE} bytes");
                return self.fail(execution, reason, now).await;
            }

            let port = match decision {
                Decision::Advance { port } => port,
                Decision::Goal { event, port } => {
                    if let Err(e) = self.goals.record_goal(&execution.id, &event).await {
                        tracing::warn!(
                            execution_id = %execution.id,
                            node_id = %node_id,
                            error = %e,
                            "failed to record goal event"
                        );
                    }
                    port
                }
                Decision::WaitUntil(until) => {
                    execution.status = ExecutionStatus::Waiting;
                    execution.wake_at = Some(until);
                    if !self.checkpoint.commit(&mut execution, expected, now).await? {
                        return self.lost_race(execution.id).await;
                    }
                    tracing::info!(
                        execution_id = %execution.id,
                        node_id = %node_id,
                        wake_at = %until,
                        "execution waiting"
                    );
                    return Ok(StepOutcome::Waiting { until });
                }
                Decision::Fail {
                    kind: FailureKind::Transient,
                    reason,
                } => return self.schedule_retry(execution, &node_id, reason, now).await,
                Decision::Fail {
                    kind: FailureKind::Permanent,
                    reason,
                } => return self.fail(execution, reason, now).await,
            };

            match workflow.target_of(&node_id, &port) {
                Some(next) => {
                    execution.current_node_id = Some(next.to_string());
                    execution.execution_path.push(next.to_string());
                    if !self.checkpoint.commit(&mut execution, expected, now).await? {
                        return self.lost_race(execution.id).await;
                    }
                }
                None => return self.complete(execution, now).await,
            }
        }
    }

    async fn complete(
        &self,
        mut execution: WorkflowExecution,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, ExecutorError> {
        let expected = execution.guard();
        execution.status = ExecutionStatus::Completed;
        execution.current_node_id = None;
        execution.completed_at = Some(store_precision(now));
        if !self.checkpoint.commit(&mut execution, expected, now).await? {
            return self.lost_race(execution.id).await;
        }
        tracing::info!(
            execution_id = %execution.id,
            path_len = execution.execution_path.len(),
            retry_count = execution.retry_count,
            "execution completed"
        );
        Ok(StepOutcome::Completed)
    }

    async fn fail(
        &self,
        mut execution: WorkflowExecution,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, ExecutorError> {
        let expected = execution.guard();
        let node_id = execution.current_node_id.take();
        execution.status = ExecutionStatus::Failed;
        execution.last_error = Some(reason.clone());
        execution.completed_at = Some(store_precision(now));
        if !self.checkpoint.commit(&mut execution, expected, now).await? {
            return self.lost_race(execution.id).await;
        }
        tracing::warn!(
            execution_id = %execution.id,
            node_id = node_id.as_deref().unwrap_or("-"),
            error = %reason,
            "execution failed"
        );
        Ok(StepOutcome::Failed { reason })
    }

    /// Park a transient failure, or fail the execution once retries are
    /// exhausted.
    ///
    /// The retry state is written before the status so a crash between the
    /// two leaves a `running` execution that maintenance re-queues, never a
    /// `waiting_retry` execution nothing will wake.
    async fn schedule_retry(
        &self,
        mut execution: WorkflowExecution,
        node_id: &str,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, ExecutorError> {
        execution.retry_count += 1;
        let retry_count = execution.retry_count;
        if !self.settings.retry.should_retry(retry_count) {
            let reason = format!("{reason} (gave up after {retry_count} attempts)");
            return self.fail(execution, reason, now).await;
        }

        let next_retry_at = store_precision(now + self.settings.retry.backoff(retry_count));
        let state = RetryState {
            execution_id: execution.id,
            node_id: node_id.to_string(),
            retry_count,
            next_retry_at,
            last_error: reason.clone(),
            created_at: store_precision(now),
        };
        self.checkpoint.save_retry_state(&state).await?;

        let expected = execution.guard();
        execution.status = ExecutionStatus::WaitingRetry;
        execution.last_error = Some(reason.clone());
        if !self.checkpoint.commit(&mut execution, expected, now).await? {
            self.checkpoint.clear_retry_state(execution.id).await?;
            return self.lost_race(execution.id).await;
        }
        tracing::warn!(
            execution_id = %execution.id,
            node_id,
            retry_count,
            next_retry_at = %next_retry_at,
            error = %reason,
            "transient failure, retry scheduled"
        );
        Ok(StepOutcome::RetryScheduled {
            retry_count,
            next_retry_at,
        })
    }

    async fn requeue(
        &self,
        mut execution: WorkflowExecution,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, ExecutorError> {
        let expected = execution.guard();
        execution.status = ExecutionStatus::Pending;
        if !self.checkpoint.commit(&mut execution, expected, now).await? {
            return self.lost_race(execution.id).await;
        }
        Ok(StepOutcome::Yielded)
    }

    /// A conditional write was rejected: re-read to report why.
    async fn lost_race(&self, execution_id: Uuid) -> Result<StepOutcome, ExecutorError> {
        let current = self.checkpoint.load(execution_id).await?;
        if current.status == ExecutionStatus::Cancelled {
            tracing::info!(execution_id = %execution_id, "execution cancelled mid-run, stopping");
            Ok(StepOutcome::Cancelled)
        } else {
            tracing::debug!(
                execution_id = %execution_id,
                status = %current.status,
                "execution advanced by another processor, stopping"
            );
            Ok(StepOutcome::Skipped)
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

/// Errors that can occur while driving an execution.
///
/// Node failures are not errors: they are recorded on the execution and
/// reported through `StepOutcome`. These are infrastructure failures.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Checkpoint persistence error.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("workflow {id} is {status}, not active")]
    WorkflowInactive { id: Uuid, status: WorkflowStatus },

    /// Concurrent writers kept winning the conditional write.
    #[error("execution {0} is contended, try again")]
    Contended(Uuid),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
