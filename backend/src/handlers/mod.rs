use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;

use crate::jobs::APPROVAL_EXPIRY_JOB;
use crate::AppState;

pub mod executions;
pub mod workflows;

pub use executions::{approval_routes, execution_routes};
pub use workflows::workflow_routes;

/// All API routes, without the outer middleware stack
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Groundwork Workflow Engine API v1" }))
        .route("/health", get(health_check))
        .nest("/api/v1/workflows", workflow_routes())
        .nest("/api/v1/executions", execution_routes())
        .nest("/api/v1/approvals", approval_routes())
        .with_state(state)
}

/// Store reachability plus the outcome of the last approval expiry sweep
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let last_sweep = state.jobs.latest(APPROVAL_EXPIRY_JOB).await;

    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "service": "groundwork-workflows",
                "store": "ok",
                "approval_sweep": last_sweep,
            })),
        ),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "degraded",
                    "service": "groundwork-workflows",
                    "store": "unreachable",
                    "approval_sweep": last_sweep,
                })),
            )
        }
    }
}
