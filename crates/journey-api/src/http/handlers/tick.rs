//! `POST /api/v1/tick`: run one orchestration tick.

use axum::Json;
use axum::extract::{Query, State};
use chrono::Utc;

use journey_core::workflow::tick::{MaintenanceMode, TickReport};

use crate::http::error::AppError;
use crate::http::extractors::auth::TickAuthorized;
use crate::http::extractors::query::TickQuery;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

pub fn maintenance_mode(raw: Option<&str>) -> Result<MaintenanceMode, AppError> {
    match raw {
        None | Some("sampled") => Ok(MaintenanceMode::Sampled),
        Some("force") => Ok(MaintenanceMode::Forced),
        Some("skip") => Ok(MaintenanceMode::Skip),
        Some(other) => Err(AppError::Validation(format!(
            "maintenance must be 'sampled', 'force' or 'skip', got '{other}'"
        ))),
    }
}

/// POST /api/v1/tick - Run one tick and return its report.
///
/// Errors inside the tick are reported in the body; the request itself
/// succeeds.
pub async fn run_tick(
    State(state): State<AppState>,
    _auth: TickAuthorized,
    Query(query): Query<TickQuery>,
) -> Result<Json<ApiResponse<TickReport>>, AppError> {
    let timer = RequestTimer::start();
    let mode = maintenance_mode(query.maintenance.as_deref())?;

    let report = state.tick.run_tick_at(Utc::now(), mode).await;

    Ok(Json(ApiResponse::success(report, &timer)))
}
