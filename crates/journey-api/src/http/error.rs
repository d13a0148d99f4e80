//! Application error type mapping to HTTP status codes and envelope format.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use journey_core::workflow::checkpoint::CheckpointError;
use journey_core::workflow::executor::ExecutorError;
use journey_types::error::RepositoryError;

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Executor(ExecutorError),
    Repository(RepositoryError),
    NotFound(String),
    Unauthorized(String),
    Validation(String),
}

impl From<ExecutorError> for AppError {
    fn from(e: ExecutorError) -> Self {
        AppError::Executor(e)
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Repository(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Executor(ExecutorError::Checkpoint(CheckpointError::ExecutionNotFound(id))) => (
                StatusCode::NOT_FOUND,
                "EXECUTION_NOT_FOUND",
                format!("Execution {id} not found"),
            ),
            AppError::Executor(ExecutorError::WorkflowNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "WORKFLOW_NOT_FOUND",
                format!("Workflow {id} not found"),
            ),
            AppError::Executor(e @ ExecutorError::WorkflowInactive { .. }) => {
                (StatusCode::CONFLICT, "WORKFLOW_INACTIVE", e.to_string())
            }
            AppError::Executor(e @ ExecutorError::Contended(_)) => {
                (StatusCode::CONFLICT, "CONFLICT", e.to_string())
            }
            AppError::Executor(e) => (StatusCode::INTERNAL_SERVER_ERROR, "EXECUTOR_ERROR", e.to_string()),
            AppError::Repository(RepositoryError::NotFound) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", "Not found".to_string())
            }
            AppError::Repository(e @ RepositoryError::Conflict(_)) => {
                (StatusCode::CONFLICT, "CONFLICT", e.to_string())
            }
            AppError::Repository(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "REPOSITORY_ERROR", e.to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, %message, "request failed");
        }
        (status, Json(ApiResponse::error(code, message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        let missing = AppError::from(ExecutorError::Checkpoint(CheckpointError::ExecutionNotFound(
            Uuid::now_v7(),
        )));
        assert_eq!(missing.parts().0, StatusCode::NOT_FOUND);
        assert_eq!(missing.parts().1, "EXECUTION_NOT_FOUND");

        let contended = AppError::from(ExecutorError::Contended(Uuid::now_v7()));
        assert_eq!(contended.parts().0, StatusCode::CONFLICT);

        let db = AppError::from(RepositoryError::Query("disk I/O error".into()));
        assert_eq!(db.parts().0, StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(AppError::Unauthorized("x".into()).parts().0, StatusCode::UNAUTHORIZED);
    }
}
