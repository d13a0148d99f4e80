//! Tick secret authentication extractor.
//!
//! When `tick_secret` is configured, `POST /api/v1/tick` must carry
//! `Authorization: Bearer <tick_secret>`. The comparison is constant-time.
//! Without a configured secret the endpoint is open.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use journey_infra::channel::signature::verify_bearer_token;

use crate::http::error::AppError;
use crate::state::AppState;

/// Marker proving the request may trigger a tick.
pub struct TickAuthorized;

impl FromRequestParts<AppState> for TickAuthorized {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(secret) = state.config.tick_secret.as_deref() else {
            return Ok(TickAuthorized);
        };

        let provided = parts
            .headers
            .get("authorization")
            .ok_or_else(|| {
                AppError::Unauthorized(
                    "Missing tick secret. Provide it via 'Authorization: Bearer <secret>'.".to_string(),
                )
            })?
            .to_str()
            .map_err(|_| AppError::Unauthorized("Invalid Authorization header encoding".to_string()))?;

        verify_bearer_token(secret, provided.trim()).map_err(|_| {
            tracing::warn!("tick request rejected: bad secret");
            AppError::Unauthorized("Invalid tick secret".to_string())
        })?;

        Ok(TickAuthorized)
    }
}
