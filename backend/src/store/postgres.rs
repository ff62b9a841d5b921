use async_trait::async_trait;
use chrono::{DateTime, Utc};
use groundwork_shared::{
    Approval, ApprovalStatus, Decision, Execution, ExecutionStatus, Notification,
    NotificationStatus, WorkflowDefinition,
};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::{
    expiry_message, DecideOutcome, DefinitionRepository, ExecutionStore, StoreError, StoreResult,
};

/// Postgres-backed store; schema lives in `backend/migrations`
#[derive(Debug, Clone)]
pub struct PgStore {
    db_pool: PgPool,
}

impl PgStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl DefinitionRepository for PgStore {
    async fn get_workflow(&self, id: Uuid) -> StoreResult<Option<WorkflowDefinition>> {
        let definition = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT definition FROM workflow_definitions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await?;

        match definition {
            Some(json) => Ok(Some(serde_json::from_value(json)?)),
            None => Ok(None),
        }
    }

    async fn save_workflow(&self, definition: &WorkflowDefinition) -> StoreResult<()> {
        let saved = sqlx::query(
            r#"
            INSERT INTO workflow_definitions (id, name, definition, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, definition = EXCLUDED.definition, updated_at = NOW()
            WHERE NOT EXISTS (
                SELECT 1 FROM executions
                WHERE executions.workflow_id = workflow_definitions.id AND executions.status = 'running'
            )
            "#,
        )
        .bind(definition.id)
        .bind(&definition.name)
        .bind(serde_json::to_value(definition)?)
        .execute(&self.db_pool)
        .await?;

        if saved.rows_affected() == 0 {
            return Err(StoreError::DefinitionInUse(definition.id));
        }

        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.db_pool).await?;
        Ok(())
    }

    async fn create_execution(&self, execution: &Execution) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO executions
            (id, workflow_id, status, current_step_id, context_json, created_at, updated_at, completed_at, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(execution.id)
        .bind(execution.workflow_id)
        .bind(execution.status)
        .bind(&execution.current_step_id)
        .bind(&execution.context)
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .bind(execution.completed_at)
        .bind(&execution.error_message)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> StoreResult<Option<Execution>> {
        let execution = sqlx::query_as::<_, Execution>("SELECT * FROM executions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(execution)
    }

    async fn advance_execution(
        &self,
        id: Uuid,
        step_id: &str,
        context: &serde_json::Value,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET current_step_id = $2, context_json = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(step_id)
        .bind(context)
        .execute(&self.db_pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ExecutionNotRunning(id));
        }
        Ok(())
    }

    async fn complete_execution(&self, id: Uuid, context: &serde_json::Value) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = 'completed', context_json = $2, updated_at = NOW(), completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(context)
        .execute(&self.db_pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ExecutionNotRunning(id));
        }
        Ok(())
    }

    async fn fail_execution(&self, id: Uuid, error: &str) -> StoreResult<()> {
        let mut tx = self.db_pool.begin().await?;

        let failed = sqlx::query(
            r#"
            UPDATE executions
            SET status = 'failed', error_message = $2, updated_at = NOW(), completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&mut *tx)
        .await?;

        if failed.rows_affected() > 0 {
            let cancelled = sqlx::query(
                "UPDATE approvals SET status = 'cancelled' WHERE execution_id = $1 AND status = 'pending'",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
            debug!(execution_id = %id, approvals = cancelled.rows_affected(), "Cancelled open approvals");
        }

        tx.commit().await?;
        Ok(())
    }

    async fn create_approval(&self, approval: &Approval) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO approvals
            (id, execution_id, step_id, assignee, status, decision_reason, decision_at, decision_by, expires_at, notified_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(approval.id)
        .bind(approval.execution_id)
        .bind(&approval.step_id)
        .bind(&approval.assignee)
        .bind(approval.status)
        .bind(&approval.decision_reason)
        .bind(approval.decision_at)
        .bind(&approval.decision_by)
        .bind(approval.expires_at)
        .bind(approval.notified_at)
        .bind(approval.created_at)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    async fn get_approval(&self, id: Uuid) -> StoreResult<Option<Approval>> {
        let approval = sqlx::query_as::<_, Approval>("SELECT * FROM approvals WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(approval)
    }

    async fn pending_approval_for_execution(&self, execution_id: Uuid) -> StoreResult<Option<Approval>> {
        let approval = sqlx::query_as::<_, Approval>(
            "SELECT * FROM approvals WHERE execution_id = $1 AND status = 'pending'",
        )
        .bind(execution_id)
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(approval)
    }

    async fn mark_approval_notified(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE approvals SET notified_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn decide_approval(
        &self,
        id: Uuid,
        decision: Decision,
        reason: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<DecideOutcome> {
        // The pending/unexpired precondition is part of the UPDATE itself, so
        // of two concurrent deciders exactly one gets a row back.
        let decided = sqlx::query_as::<_, Approval>(
            r#"
            UPDATE approvals
            SET status = $2, decision_reason = $3, decision_by = $4, decision_at = $5
            WHERE id = $1 AND status = 'pending' AND expires_at > $5
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(decision.status())
        .bind(reason)
        .bind(actor)
        .bind(now)
        .fetch_optional(&self.db_pool)
        .await?;

        if let Some(approval) = decided {
            return Ok(DecideOutcome::Decided(approval));
        }

        let outcome = match self.get_approval(id).await? {
            None => DecideOutcome::NotFound,
            Some(approval) if approval.status != ApprovalStatus::Pending => {
                DecideOutcome::NotPending(approval.status)
            }
            Some(approval) => DecideOutcome::Expired(approval.expires_at),
        };
        debug!(approval_id = %id, ?outcome, "Approval decision rejected");
        Ok(outcome)
    }

    async fn list_approvals(&self, execution_id: Uuid) -> StoreResult<Vec<Approval>> {
        let approvals = sqlx::query_as::<_, Approval>(
            "SELECT * FROM approvals WHERE execution_id = $1 ORDER BY created_at ASC",
        )
        .bind(execution_id)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(approvals)
    }

    async fn pending_approvals_for(&self, assignee: &str) -> StoreResult<Vec<Approval>> {
        let approvals = sqlx::query_as::<_, Approval>(
            "SELECT * FROM approvals WHERE assignee = $1 AND status = 'pending' ORDER BY created_at ASC",
        )
        .bind(assignee)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(approvals)
    }

    async fn expire_approvals(&self, now: DateTime<Utc>) -> StoreResult<Vec<Approval>> {
        let mut tx = self.db_pool.begin().await?;

        let expired = sqlx::query_as::<_, Approval>(
            r#"
            UPDATE approvals
            SET status = 'expired'
            WHERE status = 'pending' AND expires_at <= $1
            RETURNING *
            "#,
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        for approval in &expired {
            sqlx::query(
                r#"
                UPDATE executions
                SET status = $2, error_message = $3, updated_at = $4, completed_at = $4
                WHERE id = $1 AND status = 'running'
                "#,
            )
            .bind(approval.execution_id)
            .bind(ExecutionStatus::Expired)
            .bind(expiry_message(approval))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(expired)
    }

    async fn create_notification(&self, notification: &Notification) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications
            (id, execution_id, step_id, channel, recipient, subject, message, status, error_message, sent_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(notification.id)
        .bind(notification.execution_id)
        .bind(&notification.step_id)
        .bind(&notification.channel)
        .bind(&notification.recipient)
        .bind(&notification.subject)
        .bind(&notification.message)
        .bind(notification.status)
        .bind(&notification.error_message)
        .bind(notification.sent_at)
        .bind(notification.created_at)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    async fn finish_notification(
        &self,
        id: Uuid,
        status: NotificationStatus,
        error: Option<&str>,
        sent_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE notifications SET status = $2, error_message = $3, sent_at = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .bind(sent_at)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    async fn list_notifications(&self, execution_id: Uuid) -> StoreResult<Vec<Notification>> {
        let notifications = sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications WHERE execution_id = $1 ORDER BY created_at ASC",
        )
        .bind(execution_id)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(notifications)
    }
}
