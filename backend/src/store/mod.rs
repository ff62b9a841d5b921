// Execution Store - Durable state for executions, approvals and notifications
//
// Every mutation is scoped to one execution and applied as a single
// conditional update, so concurrent writers observe each other's decisions
// instead of overwriting them.

#[cfg(test)]
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use groundwork_shared::{
    Approval, ApprovalStatus, Decision, Execution, Notification, NotificationStatus,
    WorkflowDefinition,
};
use thiserror::Error;
use uuid::Uuid;

#[cfg(test)]
pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Execution {0} is no longer running")]
    ExecutionNotRunning(Uuid),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Workflow {0} is referenced by a running execution and cannot be changed")]
    DefinitionInUse(Uuid),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of trying to decide an approval
#[derive(Debug, Clone, PartialEq)]
pub enum DecideOutcome {
    Decided(Approval),
    NotFound,
    NotPending(ApprovalStatus),
    Expired(DateTime<Utc>),
}

/// Read-only source of workflow definitions
#[async_trait]
pub trait DefinitionRepository: Send + Sync {
    async fn get_workflow(&self, id: Uuid) -> StoreResult<Option<WorkflowDefinition>>;

    /// Register a definition; used for seeding, the builder UI owns authoring.
    /// Replacing a definition that a running execution uses fails with `DefinitionInUse`.
    async fn save_workflow(&self, definition: &WorkflowDefinition) -> StoreResult<()>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    // Executions
    async fn create_execution(&self, execution: &Execution) -> StoreResult<()>;
    async fn get_execution(&self, id: Uuid) -> StoreResult<Option<Execution>>;
    /// Move a running execution to `step_id`, persisting its context.
    /// Fails with `ExecutionNotRunning` if it already left the running state.
    async fn advance_execution(
        &self,
        id: Uuid,
        step_id: &str,
        context: &serde_json::Value,
    ) -> StoreResult<()>;
    async fn complete_execution(&self, id: Uuid, context: &serde_json::Value) -> StoreResult<()>;
    /// Mark a running execution failed and cancel its pending approvals;
    /// no-op for terminal executions
    async fn fail_execution(&self, id: Uuid, error: &str) -> StoreResult<()>;

    // Approvals
    async fn create_approval(&self, approval: &Approval) -> StoreResult<()>;
    async fn get_approval(&self, id: Uuid) -> StoreResult<Option<Approval>>;
    async fn pending_approval_for_execution(&self, execution_id: Uuid) -> StoreResult<Option<Approval>>;
    async fn mark_approval_notified(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;
    /// Apply a decision exactly once: only while pending and before expiry
    async fn decide_approval(
        &self,
        id: Uuid,
        decision: Decision,
        reason: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<DecideOutcome>;
    async fn list_approvals(&self, execution_id: Uuid) -> StoreResult<Vec<Approval>>;
    async fn pending_approvals_for(&self, assignee: &str) -> StoreResult<Vec<Approval>>;
    /// Expire every pending approval past its deadline together with its
    /// running execution; returns the approvals that were expired
    async fn expire_approvals(&self, now: DateTime<Utc>) -> StoreResult<Vec<Approval>>;

    // Notifications
    async fn create_notification(&self, notification: &Notification) -> StoreResult<()>;
    async fn finish_notification(
        &self,
        id: Uuid,
        status: NotificationStatus,
        error: Option<&str>,
        sent_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;
    async fn list_notifications(&self, execution_id: Uuid) -> StoreResult<Vec<Notification>>;
}

/// Error message recorded on an execution abandoned by the expiry sweep
pub fn expiry_message(approval: &Approval) -> String {
    format!(
        "approval {} for step '{}' expired at {}",
        approval.id,
        approval.step_id,
        approval.expires_at.to_rfc3339()
    )
}
