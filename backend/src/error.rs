//! Error envelope for the Groundwork workflow API
//!
//! Every failed request answers with an `ApiError` body; `AppError` decides
//! the status and the stable code string clients switch on.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::store::StoreError;
use crate::workflows::EngineError;

/// Field name -> messages, as reported for validation failures
pub type FieldErrors = HashMap<String, Vec<String>>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Stable machine-readable code, e.g. "CONFLICT"
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<FieldErrors>,
    /// RFC 3339
    pub timestamp: String,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Validation failed")]
    ValidationError { details: FieldErrors },
    #[error("{0}")]
    BadRequest(String),
    #[error("internal: {0}")]
    InternalError(String),
    #[error("database: {0}")]
    DatabaseError(String),
}

impl AppError {
    /// Single field failure, reported like a derived validation error
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        Self::ValidationError {
            details: HashMap::from([(field.to_string(), vec![message.into()])]),
        }
    }

    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::ValidationError { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            Self::DatabaseError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.classify().0
    }

    pub fn error_code(&self) -> &'static str {
        self.classify().1
    }

    /// Client-facing message; server-side causes are logged, not returned
    fn public_message(&self) -> String {
        match self {
            Self::InternalError(_) | Self::DatabaseError(_) => {
                tracing::error!("Request failed: {}", self);
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();
        let message = self.public_message();
        let details = match self {
            Self::ValidationError { details } => Some(details),
            _ => None,
        };

        let body = ApiError {
            code: code.to_string(),
            message,
            details,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(e) => Self::DatabaseError(e.to_string()),
            StoreError::DefinitionInUse(id) => {
                Self::Conflict(StoreError::DefinitionInUse(id).to_string())
            }
            other => Self::InternalError(other.to_string()),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::WorkflowNotFound(id) => Self::NotFound(format!("Workflow {}", id)),
            EngineError::ExecutionNotFound(id) => Self::NotFound(format!("Execution {}", id)),
            EngineError::ApprovalNotFound(id) => Self::NotFound(format!("Approval {}", id)),
            EngineError::Definition(e) => Self::invalid_field("definition", e.to_string()),
            EngineError::Conflict(e) => Self::Conflict(e.to_string()),
            EngineError::MissingReason => Self::BadRequest(EngineError::MissingReason.to_string()),
            EngineError::Store(e) => e.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, AppError>;
