//! Workflow repository trait definition.
//!
//! Defines the durable store for workflow definitions, executions, schedules
//! and retry states. The infrastructure layer (journey-infra) implements this
//! trait with SQLite persistence.

use chrono::{DateTime, Utc};
use journey_types::error::RepositoryError;
use journey_types::execution::{ExecutionGuard, RetryState, WorkflowExecution};
use journey_types::schedule::WorkflowSchedule;
use journey_types::workflow::{Workflow, WorkflowStatus};
use uuid::Uuid;

/// Repository trait for journey persistence.
///
/// Covers four entity families:
/// - **Workflows:** versioned node-graph definitions.
/// - **Executions:** per-contact runs, mutated only through conditional
///   writes keyed on an [`ExecutionGuard`].
/// - **Schedules:** time triggers, advanced through conditional writes keyed
///   on the previous due time.
/// - **Retry states:** parked transient failures.
///
/// Due-time queries (`list_due_*`) are range scans on indexed columns.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    /// Upsert a workflow definition (insert or replace by ID).
    fn save_workflow(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a workflow by its UUID.
    fn get_workflow(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    /// List workflows, optionally filtered by organization.
    fn list_workflows(
        &self,
        organization_id: Option<&Uuid>,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    /// Change a workflow's lifecycle status. `NotFound` if it does not exist.
    fn set_workflow_status(
        &self,
        id: &Uuid,
        status: WorkflowStatus,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Insert a new execution record.
    fn create_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get an execution by its UUID.
    fn get_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    /// Conditionally replace an execution.
    ///
    /// The write applies only if the stored record still matches `expected`.
    /// Returns `false` (and writes nothing) when another writer got there
    /// first.
    fn update_execution(
        &self,
        execution: &WorkflowExecution,
        expected: &ExecutionGuard,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// List executions of a workflow, newest first.
    fn list_executions(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    /// List `pending` executions, oldest first.
    fn list_pending_executions(
        &self,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    /// List `waiting` executions whose wake time is at or before `now`.
    fn list_due_waits(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    /// List `running` executions last updated before `before`.
    fn list_stalled_executions(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    /// List `waiting_retry` executions last updated before `before` that have
    /// no retry state left to resume them.
    fn list_stranded_retries(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    /// Delete terminal executions finished before `before`. Returns the count.
    fn delete_terminal_executions(
        &self,
        before: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Schedules
    // -----------------------------------------------------------------------

    /// Insert a new schedule.
    fn create_schedule(
        &self,
        schedule: &WorkflowSchedule,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a schedule by its UUID.
    fn get_schedule(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowSchedule>, RepositoryError>> + Send;

    /// List schedules, optionally filtered by workflow.
    fn list_schedules(
        &self,
        workflow_id: Option<&Uuid>,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowSchedule>, RepositoryError>> + Send;

    /// List active schedules due at or before `now`, earliest first.
    ///
    /// Schedules of paused or draft workflows are held back so they never
    /// crowd out the batch; those of archived or missing workflows are
    /// returned so the scheduler can deactivate them.
    fn list_due_schedules(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowSchedule>, RepositoryError>> + Send;

    /// Conditionally replace a schedule.
    ///
    /// Applies only if the stored `next_execution_at` still equals
    /// `expected_next`. Returns `false` when another tick already advanced it.
    fn update_schedule(
        &self,
        schedule: &WorkflowSchedule,
        expected_next: Option<DateTime<Utc>>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Retry states
    // -----------------------------------------------------------------------

    /// Upsert the retry state for an execution.
    fn save_retry_state(
        &self,
        state: &RetryState,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get the retry state for an execution.
    fn get_retry_state(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<RetryState>, RepositoryError>> + Send;

    /// List retry states due at or before `now`, earliest first.
    fn list_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<RetryState>, RepositoryError>> + Send;

    /// Delete the retry state for an execution. Returns `true` if it existed.
    fn delete_retry_state(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Delete retry states whose execution is missing or terminal.
    fn delete_orphaned_retry_states(
        &self,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
