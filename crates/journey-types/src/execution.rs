//! Execution tracking types.
//!
//! A `WorkflowExecution` is one contact traversing a workflow graph. Its
//! `(status, updated_at)` pair forms the `ExecutionGuard` that every
//! conditional write is keyed on, so two processors can never both advance
//! the same execution.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// State-machine status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Waiting,
    WaitingRetry,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// `Running -> Pending` is the re-enqueue edge used when a step budget is
    /// exhausted or a worker shuts down mid-chain. `WaitingRetry -> Pending`
    /// recovers a retry whose state row was consumed but never resumed.
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            (Running, Running) => true,
            (Running, Pending) => true,
            (Running, Waiting | WaitingRetry | Completed | Failed | Cancelled) => true,
            (Waiting, Running) => true,
            (WaitingRetry, Running) => true,
            (WaitingRetry, Pending) => true,
            (Pending | Waiting | WaitingRetry, Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Waiting => "waiting",
            ExecutionStatus::WaitingRetry => "waiting_retry",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "waiting" => Ok(ExecutionStatus::Waiting),
            "waiting_retry" => Ok(ExecutionStatus::WaitingRetry),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("unknown execution status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecution
// ---------------------------------------------------------------------------

/// One contact's run through a workflow's node graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub organization_id: Uuid,
    pub contact_id: Uuid,
    pub status: ExecutionStatus,
    /// Node the execution is positioned at. `None` once terminal.
    pub current_node_id: Option<String>,
    /// Append-only audit trail of nodes entered after the trigger.
    #[serde(default)]
    pub execution_path: Vec<String>,
    /// Accumulated variables (split assignments, goal flags, wait times).
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    pub retry_count: u32,
    /// Failure reason; always set when `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Due time while `status == Waiting`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// A fresh pending execution positioned at `trigger_node_id`.
    pub fn new(
        workflow_id: Uuid,
        organization_id: Uuid,
        contact_id: Uuid,
        trigger_node_id: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let now = store_precision(now);
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            organization_id,
            contact_id,
            status: ExecutionStatus::Pending,
            current_node_id: Some(trigger_node_id.to_string()),
            execution_path: Vec::new(),
            context: serde_json::Map::new(),
            retry_count: 0,
            last_error: None,
            wake_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// The guard a conditional write against this record must match.
    pub fn guard(&self) -> ExecutionGuard {
        ExecutionGuard {
            status: self.status,
            updated_at: self.updated_at,
        }
    }

    /// Advance `updated_at` so it is strictly greater than its previous value.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        let now = store_precision(now);
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + chrono::Duration::microseconds(1)
        };
    }
}

/// Truncate a timestamp to the microsecond precision the store persists, so
/// values compare equal after a round trip.
pub fn store_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

/// The `(status, updated_at)` pair a conditional execution write is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionGuard {
    pub status: ExecutionStatus,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Failure classification
// ---------------------------------------------------------------------------

/// Whether a failure may succeed on a later attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permanent,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Permanent => write!(f, "permanent"),
        }
    }
}

// ---------------------------------------------------------------------------
// RetryState
// ---------------------------------------------------------------------------

/// A parked, retryable failure awaiting its back-off window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryState {
    pub execution_id: Uuid,
    pub node_id: String,
    pub retry_count: u32,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
