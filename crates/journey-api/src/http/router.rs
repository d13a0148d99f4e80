//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`. Middleware: CORS, request tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/tick", post(handlers::tick::run_tick))
        .route("/executions/{id}", get(handlers::execution::get_execution))
        .route("/executions/{id}/cancel", post(handlers::execution::cancel_execution))
        .route("/executions/{id}/resume", post(handlers::execution::resume_execution))
        .route(
            "/workflows/{id}/executions",
            get(handlers::execution::list_workflow_executions),
        )
        .route("/health", get(health_check));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - liveness check (no auth required).
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::util::ServiceExt;
    use uuid::Uuid;

    use journey_core::repository::workflow::WorkflowRepository;
    use journey_core::workflow::definition::parse_workflow;
    use journey_types::config::EngineConfig;
    use journey_types::workflow::Workflow;

    use super::build_router;
    use crate::state::AppState;
    use crate::state::testing::test_state;

    const WAIT_JOURNEY: &str = r#"
id: 0190f5a2-6c1e-7cc0-a3a4-5d1c2b3a4f70
organization_id: 0190f5a2-6c1e-7cc0-a3a4-5d1c2b3a4f51
name: nurture
status: active
nodes:
  - { id: start, type: trigger }
  - { id: pause, type: wait, amount: 2, unit: days }
  - { id: follow_up, type: message, content: "Checking in" }
edges:
  - { source_node_id: start, target_node_id: pause }
  - { source_node_id: pause, target_node_id: follow_up }
"#;

    async fn call(state: &AppState, method: &str, uri: &str, auth: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(auth) = auth {
            request = request.header("authorization", auth);
        }
        let response = build_router(state.clone())
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn seeded(state: &AppState) -> Workflow {
        let wf = parse_workflow(WAIT_JOURNEY).unwrap();
        state.repo.save_workflow(&wf).await.unwrap();
        wf
    }

    #[tokio::test]
    async fn test_health() {
        let state = test_state(EngineConfig::default()).await;
        let (status, body) = call(&state, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        let (status, _) = call(&state, "GET", "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_tick_open_without_secret() {
        let state = test_state(EngineConfig::default()).await;
        let (status, body) = call(&state, "POST", "/api/v1/tick?maintenance=skip", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["schedules"]["started"].is_array());
        assert_eq!(body["data"]["retries"]["processed"], 0);
    }

    #[tokio::test]
    async fn test_tick_requires_configured_secret() {
        let config = EngineConfig {
            tick_secret: Some("tick-s3cret".into()),
            ..EngineConfig::default()
        };
        let state = test_state(config).await;

        let (status, body) = call(&state, "POST", "/api/v1/tick", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["errors"][0]["code"], "UNAUTHORIZED");

        let (status, _) = call(&state, "POST", "/api/v1/tick", Some("Bearer wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&state, "POST", "/api/v1/tick", Some("Bearer tick-s3cret")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_tick_rejects_unknown_maintenance_mode() {
        let state = test_state(EngineConfig::default()).await;
        let (status, body) = call(&state, "POST", "/api/v1/tick?maintenance=always", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_unknown_execution_is_404() {
        let state = test_state(EngineConfig::default()).await;
        let uri = format!("/api/v1/executions/{}", Uuid::now_v7());
        let (status, body) = call(&state, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "NOT_FOUND");

        let (status, body) = call(&state, "POST", &format!("{uri}/resume"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "EXECUTION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_tick_parks_then_resume_completes() {
        let state = test_state(EngineConfig::default()).await;
        let wf = seeded(&state).await;
        let exec = state
            .engine()
            .enqueue(wf.id, Uuid::now_v7(), Utc::now())
            .await
            .unwrap();

        let (status, body) = call(&state, "POST", "/api/v1/tick?maintenance=skip", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["executions"]["waiting"], 1);

        let uri = format!("/api/v1/executions/{}", exec.id);
        let (_, body) = call(&state, "GET", &uri, None).await;
        assert_eq!(body["data"]["status"], "waiting");
        assert_eq!(body["data"]["current_node_id"], "pause");

        let (status, body) = call(&state, "POST", &format!("{uri}/resume"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["applied"], true);
        assert_eq!(body["data"]["outcome"]["outcome"], "completed");
        assert_eq!(body["data"]["execution"]["status"], "completed");

        let list_uri = format!("/api/v1/workflows/{}/executions?status=completed", wf.id);
        let (status, body) = call(&state, "GET", &list_uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_execution() {
        let state = test_state(EngineConfig::default()).await;
        let wf = seeded(&state).await;
        let exec = state
            .engine()
            .enqueue(wf.id, Uuid::now_v7(), Utc::now())
            .await
            .unwrap();

        let uri = format!("/api/v1/executions/{}/cancel", exec.id);
        let (status, body) = call(&state, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["applied"], true);
        assert_eq!(body["data"]["execution"]["status"], "cancelled");

        let (_, body) = call(&state, "POST", &uri, None).await;
        assert_eq!(body["data"]["applied"], false);
    }

    #[tokio::test]
    async fn test_list_executions_validates_input() {
        let state = test_state(EngineConfig::default()).await;
        let wf = seeded(&state).await;

        let uri = format!("/api/v1/workflows/{}/executions?status=sleeping", wf.id);
        let (status, _) = call(&state, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/api/v1/workflows/{}/executions", Uuid::now_v7());
        let (status, _) = call(&state, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
