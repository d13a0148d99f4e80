//! Execution inspection and control handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use journey_core::repository::workflow::WorkflowRepository;
use journey_core::workflow::executor::StepOutcome;
use journey_types::execution::{ExecutionStatus, WorkflowExecution};

use crate::http::error::AppError;
use crate::http::extractors::query::ListQuery;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

/// Result of a cancel or resume request.
#[derive(Debug, Serialize)]
pub struct ControlResult {
    pub execution: WorkflowExecution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<StepOutcome>,
    /// Whether the request changed anything.
    pub applied: bool,
}

async fn load(state: &AppState, id: Uuid) -> Result<WorkflowExecution, AppError> {
    state
        .repo
        .get_execution(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Execution {id} not found")))
}

/// GET /api/v1/executions/{id}
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowExecution>>, AppError> {
    let timer = RequestTimer::start();
    let execution = load(&state, id).await?;

    Ok(Json(
        ApiResponse::success(execution, &timer).with_link("self", &format!("/api/v1/executions/{id}")),
    ))
}

/// POST /api/v1/executions/{id}/cancel
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ControlResult>>, AppError> {
    let timer = RequestTimer::start();
    let applied = state.engine().cancel(id, Utc::now()).await?;
    let execution = load(&state, id).await?;

    Ok(Json(ApiResponse::success(
        ControlResult {
            execution,
            outcome: None,
            applied,
        },
        &timer,
    )))
}

/// POST /api/v1/executions/{id}/resume
///
/// Wakes a waiting execution early, skips the remaining back-off of one
/// awaiting retry, or runs a pending one.
pub async fn resume_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ControlResult>>, AppError> {
    let timer = RequestTimer::start();
    let outcome = state
        .engine()
        .resume(id, Utc::now(), state.shutdown_token())
        .await?;
    let execution = load(&state, id).await?;

    Ok(Json(ApiResponse::success(
        ControlResult {
            execution,
            applied: outcome != StepOutcome::Skipped,
            outcome: Some(outcome),
        },
        &timer,
    )))
}

/// GET /api/v1/workflows/{id}/executions
pub async fn list_workflow_executions(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<WorkflowExecution>>>, AppError> {
    let timer = RequestTimer::start();

    let status = query
        .status
        .as_deref()
        .map(str::parse::<ExecutionStatus>)
        .transpose()
        .map_err(AppError::Validation)?;

    if state.repo.get_workflow(&workflow_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Workflow {workflow_id} not found")));
    }

    let mut executions = state
        .repo
        .list_executions(&workflow_id, query.clamped_limit())
        .await?;
    if let Some(status) = status {
        executions.retain(|e| e.status == status);
    }

    Ok(Json(
        ApiResponse::success(executions, &timer)
            .with_link("self", &format!("/api/v1/workflows/{workflow_id}/executions")),
    ))
}
