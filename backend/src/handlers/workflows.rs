//! Workflow Trigger and Resume Handlers
//!
//! Entry points used by the forms subsystem (trigger) and the approvals UI (resume).

use axum::{extract::State, response::Json, routing::post, Router};
use groundwork_shared::{Decision, ExecutionStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::validation::validate;
use crate::workflows::{EngineError, ResumeCommand};
use crate::{ApiResult, AppState};

// ==================== Structs ====================

#[derive(Debug, Deserialize, Validate)]
pub struct TriggerRequest {
    pub workflow_id: Uuid,
    /// Submitted form data; becomes `trigger` in the execution context
    #[serde(default = "empty_object")]
    #[validate(custom(function = "json_object"))]
    pub trigger_context: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub execution_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResumeRequest {
    pub approval_id: Uuid,
    pub decision: Decision,
    /// Emptiness is checked by the engine and reported as a bad request
    #[serde(default)]
    pub reason: String,
    #[validate(length(min = 1, max = 255, message = "actor_id is required"))]
    pub actor_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResumeResponse {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

fn json_object(value: &serde_json::Value) -> Result<(), ValidationError> {
    if value.is_object() {
        Ok(())
    } else {
        let mut error = ValidationError::new("object");
        error.message = Some("trigger_context must be a JSON object".into());
        Err(error)
    }
}

// ==================== Routes ====================

pub fn workflow_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/trigger", post(trigger_workflow))
        .route("/resume", post(resume_workflow))
}

// ==================== Handlers ====================

async fn trigger_workflow(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TriggerRequest>,
) -> ApiResult<Json<TriggerResponse>> {
    let payload = validate(payload)?.into_inner();

    let started = state
        .engine
        .start(payload.workflow_id, payload.trigger_context)
        .await?;

    Ok(Json(TriggerResponse {
        execution_id: started.execution_id,
    }))
}

async fn resume_workflow(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ResumeRequest>,
) -> ApiResult<Json<ResumeResponse>> {
    // a blank reason answers 400 before any field validation
    if payload.reason.trim().is_empty() {
        return Err(EngineError::MissingReason.into());
    }
    let payload = validate(payload)?.into_inner();

    let outcome = state
        .engine
        .resume(ResumeCommand {
            approval_id: payload.approval_id,
            decision: payload.decision,
            reason: payload.reason,
            actor_id: payload.actor_id,
        })
        .await?;

    Ok(Json(ResumeResponse {
        execution_id: outcome.execution_id,
        status: outcome.status,
    }))
}
