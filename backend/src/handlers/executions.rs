//! Execution Inspection Handlers
//!
//! Read-only views over executions and the approval and notification rows they produced.

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use groundwork_shared::{Approval, Execution, Notification};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;
use crate::validation::validate;
use crate::{ApiResult, AppState};

#[derive(Debug, Deserialize, Validate)]
pub struct AssigneeQuery {
    #[validate(length(min = 1, message = "assignee is required"))]
    #[serde(default)]
    pub assignee: String,
}

pub fn execution_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:id", get(get_execution))
        .route("/:id/approvals", get(list_execution_approvals))
        .route("/:id/notifications", get(list_execution_notifications))
}

pub fn approval_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_pending_approvals))
}

async fn find_execution(state: &AppState, id: Uuid) -> ApiResult<Execution> {
    state
        .store
        .get_execution(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Execution {}", id)))
}

async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Execution>> {
    Ok(Json(find_execution(&state, id).await?))
}

async fn list_execution_approvals(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Approval>>> {
    find_execution(&state, id).await?;
    Ok(Json(state.store.list_approvals(id).await?))
}

async fn list_execution_notifications(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Notification>>> {
    find_execution(&state, id).await?;
    Ok(Json(state.store.list_notifications(id).await?))
}

async fn list_pending_approvals(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AssigneeQuery>,
) -> ApiResult<Json<Vec<Approval>>> {
    let query = validate(query)?;
    Ok(Json(state.store.pending_approvals_for(&query.assignee).await?))
}
