//! Goal sink port.

use journey_types::error::RepositoryError;
use journey_types::workflow::GoalEvent;
use uuid::Uuid;

/// Receives goal-completion records. Callers treat this as fire-and-forget:
/// errors are logged, never propagated into the execution.
pub trait GoalSink: Send + Sync {
    fn record_goal(
        &self,
        execution_id: &Uuid,
        event: &GoalEvent,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
