//! Durable checkpoint manager for execution state.
//!
//! Wraps `WorkflowRepository` with the conditional-write protocol every
//! execution transition goes through: capture the stored guard, mutate,
//! bump `updated_at`, then write only if the guard still matches. A `false`
//! return means another processor (or a cancellation) got there first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use journey_types::execution::{ExecutionGuard, RetryState, WorkflowExecution};
use journey_types::workflow::Workflow;
use uuid::Uuid;

use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Persists execution transitions through guarded writes.
///
/// Generic over `R: WorkflowRepository` so it works with any storage backend
/// (SQLite, in-memory mock, etc.). Cloning shares the underlying repository.
pub struct CheckpointManager<R> {
    repo: Arc<R>,
}

impl<R> Clone for CheckpointManager<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
        }
    }
}

impl<R: WorkflowRepository> CheckpointManager<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    // -----------------------------------------------------------------------
    // Execution lifecycle
    // -----------------------------------------------------------------------

    /// Create a pending execution of `workflow` for `contact_id`, positioned
    /// at `trigger` or, when none is requested, the workflow's first trigger.
    pub async fn start_execution(
        &self,
        workflow: &Workflow,
        contact_id: Uuid,
        trigger: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<WorkflowExecution, CheckpointError> {
        let trigger = resolve_trigger(workflow, trigger)?;

        let execution = WorkflowExecution::new(
            workflow.id,
            workflow.organization_id,
            contact_id,
            &trigger,
            now,
        );
        self.repo
            .create_execution(&execution)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            execution_id = %execution.id,
            workflow_id = %workflow.id,
            contact_id = %contact_id,
            trigger = %trigger,
            "checkpointed execution start"
        );
        Ok(execution)
    }

    /// Load an execution, failing if it does not exist.
    pub async fn load(&self, execution_id: Uuid) -> Result<WorkflowExecution, CheckpointError> {
        self.repo
            .get_execution(&execution_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or(CheckpointError::ExecutionNotFound(execution_id))
    }

    /// Write `execution` if the stored record still matches `expected`.
    ///
    /// Bumps `updated_at` before writing. Returns `false` when the guard no
    /// longer matches; the caller should re-read before deciding what to do.
    pub async fn commit(
        &self,
        execution: &mut WorkflowExecution,
        expected: ExecutionGuard,
        now: DateTime<Utc>,
    ) -> Result<bool, CheckpointError> {
        debug_assert!(
            expected.status.can_transition_to(execution.status),
            "illegal transition {} -> {}",
            expected.status,
            execution.status
        );
        execution.touch(now);
        let applied = self
            .repo
            .update_execution(execution, &expected)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        if applied {
            tracing::debug!(
                execution_id = %execution.id,
                from = %expected.status,
                to = %execution.status,
                node_id = execution.current_node_id.as_deref().unwrap_or("-"),
                "checkpointed transition"
            );
        } else {
            tracing::debug!(
                execution_id = %execution.id,
                expected = %expected.status,
                "conditional write lost"
            );
        }
        Ok(applied)
    }

    // -----------------------------------------------------------------------
    // Retry states
    // -----------------------------------------------------------------------

    pub async fn save_retry_state(&self, state: &RetryState) -> Result<(), CheckpointError> {
        self.repo
            .save_retry_state(state)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    pub async fn clear_retry_state(&self, execution_id: Uuid) -> Result<bool, CheckpointError> {
        self.repo
            .delete_retry_state(&execution_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }
}

/// Pick the entry node for a new execution of `workflow`.
///
/// A requested node must be one of the workflow's triggers.
pub fn resolve_trigger(
    workflow: &Workflow,
    requested: Option<&str>,
) -> Result<String, CheckpointError> {
    let triggers = workflow.trigger_ids();
    match requested {
        Some(node_id) if triggers.contains(&node_id) => Ok(node_id.to_string()),
        Some(node_id) => Err(CheckpointError::UnknownTrigger {
            workflow_id: workflow.id,
            node_id: node_id.to_string(),
        }),
        None => triggers
            .first()
            .map(|id| id.to_string())
            .ok_or(CheckpointError::NoTrigger(workflow.id)),
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying repository operation failed.
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("workflow {0} has no trigger node")]
    NoTrigger(Uuid),

    #[error("node '{node_id}' is not a trigger of workflow {workflow_id}")]
    UnknownTrigger { workflow_id: Uuid, node_id: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::testing::{InMemoryRepository, workflow};
    use journey_types::execution::ExecutionStatus;
    use serde_json::json;

    fn manager() -> (CheckpointManager<InMemoryRepository>, Arc<InMemoryRepository>) {
        let repo = Arc::new(InMemoryRepository::default());
        (CheckpointManager::new(repo.clone()), repo)
    }

    #[test]
    fn checkpoint_error_display() {
        let err = CheckpointError::Repository("disk full".into());
        assert_eq!(err.to_string(), "checkpoint repository error: disk full");
        let id = Uuid::nil();
        assert!(CheckpointError::ExecutionNotFound(id).to_string().contains(&id.to_string()));
    }

    #[tokio::test]
    async fn test_start_execution_positions_at_trigger() {
        let (mgr, repo) = manager();
        let wf = workflow(
            json!([{"id": "entry", "type": "trigger"}]),
            json!([]),
        );
        let exec = mgr.start_execution(&wf, Uuid::now_v7(), None, Utc::now()).await.unwrap();
        assert_eq!(exec.status, ExecutionStatus::Pending);
        assert_eq!(exec.current_node_id.as_deref(), Some("entry"));
        assert!(exec.execution_path.is_empty());
        assert_eq!(repo.execution(&exec.id).id, exec.id);
    }

    #[tokio::test]
    async fn test_start_execution_requires_trigger() {
        let (mgr, _) = manager();
        let wf = workflow(json!([{"id": "m", "type": "message", "content": "x"}]), json!([]));
        let err = mgr.start_execution(&wf, Uuid::now_v7(), None, Utc::now()).await.unwrap_err();
        assert!(matches!(err, CheckpointError::NoTrigger(_)));
    }

    #[tokio::test]
    async fn test_start_execution_at_requested_trigger() {
        let (mgr, _) = manager();
        let wf = workflow(
            json!([
                {"id": "signup", "type": "trigger"},
                {"id": "purchase", "type": "trigger"},
                {"id": "m", "type": "message", "content": "x"}
            ]),
            json!([
                {"source_node_id": "signup", "target_node_id": "m"},
                {"source_node_id": "purchase", "target_node_id": "m"}
            ]),
        );
        let exec = mgr
            .start_execution(&wf, Uuid::now_v7(), Some("purchase"), Utc::now())
            .await
            .unwrap();
        assert_eq!(exec.current_node_id.as_deref(), Some("purchase"));

        let default = mgr.start_execution(&wf, Uuid::now_v7(), None, Utc::now()).await.unwrap();
        assert_eq!(default.current_node_id.as_deref(), Some("signup"));

        let err = mgr
            .start_execution(&wf, Uuid::now_v7(), Some("m"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::UnknownTrigger { ref node_id, .. } if node_id == "m"));
    }

    #[tokio::test]
    async fn test_second_writer_with_stale_guard_loses() {
        let (mgr, repo) = manager();
        let wf = workflow(json!([{"id": "t", "type": "trigger"}]), json!([]));
        let exec = mgr.start_execution(&wf, Uuid::now_v7(), None, Utc::now()).await.unwrap();

        let mut first = exec.clone();
        let mut second = exec.clone();
        let guard = exec.guard();

        first.status = ExecutionStatus::Running;
        second.status = ExecutionStatus::Running;
        assert!(mgr.commit(&mut first, guard, Utc::now()).await.unwrap());
        assert!(!mgr.commit(&mut second, guard, Utc::now()).await.unwrap());
        assert_eq!(repo.execution(&exec.id).updated_at, first.updated_at);
    }

    #[tokio::test]
    async fn test_commit_bumps_updated_at_within_same_instant() {
        let (mgr, _) = manager();
        let wf = workflow(json!([{"id": "t", "type": "trigger"}]), json!([]));
        let now = Utc::now();
        let mut exec = mgr.start_execution(&wf, Uuid::now_v7(), None, now).await.unwrap();
        let before = exec.updated_at;
        let guard = exec.guard();
        exec.status = ExecutionStatus::Running;
        assert!(mgr.commit(&mut exec, guard, now).await.unwrap());
        assert!(exec.updated_at > before);
    }
}
