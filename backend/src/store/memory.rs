use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use groundwork_shared::{
    Approval, ApprovalStatus, Decision, Execution, ExecutionStatus, Notification,
    NotificationStatus, WorkflowDefinition,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    expiry_message, DecideOutcome, DefinitionRepository, ExecutionStore, StoreError, StoreResult,
};

#[derive(Debug, Default)]
struct MemoryState {
    workflows: HashMap<Uuid, WorkflowDefinition>,
    executions: HashMap<Uuid, Execution>,
    approvals: HashMap<Uuid, Approval>,
    notifications: HashMap<Uuid, Notification>,
}

/// In-memory store for tests and local runs without Postgres.
///
/// All tables sit behind one lock so multi-row updates (the expiry sweep)
/// are as atomic as their SQL counterparts.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by_creation<T, F>(mut rows: Vec<T>, created_at: F) -> Vec<T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    rows.sort_by_key(|row| created_at(row));
    rows
}

#[async_trait]
impl DefinitionRepository for InMemoryStore {
    async fn get_workflow(&self, id: Uuid) -> StoreResult<Option<WorkflowDefinition>> {
        let state = self.state.read().await;
        Ok(state.workflows.get(&id).cloned())
    }

    async fn save_workflow(&self, definition: &WorkflowDefinition) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let in_use = state.workflows.contains_key(&definition.id)
            && state
                .executions
                .values()
                .any(|e| e.workflow_id == definition.id && e.status == ExecutionStatus::Running);
        if in_use {
            return Err(StoreError::DefinitionInUse(definition.id));
        }
        state.workflows.insert(definition.id, definition.clone());
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn create_execution(&self, execution: &Execution) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> StoreResult<Option<Execution>> {
        let state = self.state.read().await;
        Ok(state.executions.get(&id).cloned())
    }

    async fn advance_execution(
        &self,
        id: Uuid,
        step_id: &str,
        context: &serde_json::Value,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        match state.executions.get_mut(&id) {
            Some(execution) if execution.status == ExecutionStatus::Running => {
                execution.current_step_id = step_id.to_string();
                execution.context = context.clone();
                execution.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(StoreError::ExecutionNotRunning(id)),
        }
    }

    async fn complete_execution(&self, id: Uuid, context: &serde_json::Value) -> StoreResult<()> {
        let mut state = self.state.write().await;
        match state.executions.get_mut(&id) {
            Some(execution) if execution.status == ExecutionStatus::Running => {
                let now = Utc::now();
                execution.status = ExecutionStatus::Completed;
                execution.context = context.clone();
                execution.updated_at = now;
                execution.completed_at = Some(now);
                Ok(())
            }
            _ => Err(StoreError::ExecutionNotRunning(id)),
        }
    }

    async fn fail_execution(&self, id: Uuid, error: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let Some(execution) = state.executions.get_mut(&id) else {
            return Ok(());
        };
        if execution.status != ExecutionStatus::Running {
            return Ok(());
        }

        let now = Utc::now();
        execution.status = ExecutionStatus::Failed;
        execution.error_message = Some(error.to_string());
        execution.updated_at = now;
        execution.completed_at = Some(now);

        for approval in state.approvals.values_mut() {
            if approval.execution_id == id && approval.status == ApprovalStatus::Pending {
                approval.status = ApprovalStatus::Cancelled;
            }
        }
        Ok(())
    }

    async fn create_approval(&self, approval: &Approval) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.approvals.insert(approval.id, approval.clone());
        Ok(())
    }

    async fn get_approval(&self, id: Uuid) -> StoreResult<Option<Approval>> {
        let state = self.state.read().await;
        Ok(state.approvals.get(&id).cloned())
    }

    async fn pending_approval_for_execution(&self, execution_id: Uuid) -> StoreResult<Option<Approval>> {
        let state = self.state.read().await;
        Ok(state
            .approvals
            .values()
            .find(|a| a.execution_id == execution_id && a.status == ApprovalStatus::Pending)
            .cloned())
    }

    async fn mark_approval_notified(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(approval) = state.approvals.get_mut(&id) {
            approval.notified_at = Some(at);
        }
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
        let mut state = self.state.write().await;
        let Some(approval) = state.approvals.get_mut(&id) else {
            return Ok(DecideOutcome::NotFound);
        };

        if approval.status != ApprovalStatus::Pending {
            return Ok(DecideOutcome::NotPending(approval.status));
        }
        if approval.is_expired_at(now) {
            return Ok(DecideOutcome::Expired(approval.expires_at));
        }

        approval.status = decision.status();
        approval.decision_reason = Some(reason.to_string());
        approval.decision_by = Some(actor.to_string());
        approval.decision_at = Some(now);

        Ok(DecideOutcome::Decided(approval.clone()))
    }

    async fn list_approvals(&self, execution_id: Uuid) -> StoreResult<Vec<Approval>> {
        let state = self.state.read().await;
        let rows: Vec<Approval> = state
            .approvals
            .values()
            .filter(|a| a.execution_id == execution_id)
            .cloned()
            .collect();
        Ok(sorted_by_creation(rows, |a: &Approval| a.created_at))
    }

    async fn pending_approvals_for(&self, assignee: &str) -> StoreResult<Vec<Approval>> {
        let state = self.state.read().await;
        let rows: Vec<Approval> = state
            .approvals
            .values()
            .filter(|a| a.assignee == assignee && a.status == ApprovalStatus::Pending)
            .cloned()
            .collect();
        Ok(sorted_by_creation(rows, |a: &Approval| a.created_at))
    }

    async fn expire_approvals(&self, now: DateTime<Utc>) -> StoreResult<Vec<Approval>> {
        let mut state = self.state.write().await;
        let mut expired = Vec::new();

        for approval in state.approvals.values_mut() {
            if approval.status == ApprovalStatus::Pending && approval.is_expired_at(now) {
                approval.status = ApprovalStatus::Expired;
                expired.push(approval.clone());
            }
        }

        for approval in &expired {
            if let Some(execution) = state.executions.get_mut(&approval.execution_id) {
                if execution.status == ExecutionStatus::Running {
                    execution.status = ExecutionStatus::Expired;
                    execution.error_message = Some(expiry_message(approval));
                    execution.updated_at = now;
                    execution.completed_at = Some(now);
                }
            }
        }

        Ok(expired)
    }

    async fn create_notification(&self, notification: &Notification) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.notifications.insert(notification.id, notification.clone());
        Ok(())
    }

    async fn finish_notification(
        &self,
        id: Uuid,
        status: NotificationStatus,
        error: Option<&str>,
        sent_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(notification) = state.notifications.get_mut(&id) {
            notification.status = status;
            notification.error_message = error.map(str::to_string);
            notification.sent_at = sent_at;
        }
        Ok(())
    }

    async fn list_notifications(&self, execution_id: Uuid) -> StoreResult<Vec<Notification>> {
        let state = self.state.read().await;
        let rows: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.execution_id == execution_id)
            .cloned()
            .collect();
        Ok(sorted_by_creation(rows, |n: &Notification| n.created_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    async fn seeded() -> (InMemoryStore, Execution, Approval) {
        let store = InMemoryStore::new();
        let execution = Execution::new(Uuid::new_v4(), "review", json!({}));
        store.create_execution(&execution).await.unwrap();

        let approval = Approval::pending(
            execution.id,
            "review",
            "pm@example.com",
            Utc::now() + Duration::days(7),
        );
        store.create_approval(&approval).await.unwrap();
        (store, execution, approval)
    }

    #[tokio::test]
    async fn test_decide_applies_once() {
        let (store, _, approval) = seeded().await;
        let now = Utc::now();

        let first = store
            .decide_approval(approval.id, Decision::Approved, "ok", "pm", now)
            .await
            .unwrap();
        assert!(matches!(first, DecideOutcome::Decided(ref a) if a.status == ApprovalStatus::Approved));

        let second = store
            .decide_approval(approval.id, Decision::Rejected, "changed my mind", "pm", now)
            .await
            .unwrap();
        assert_eq!(second, DecideOutcome::NotPending(ApprovalStatus::Approved));

        let stored = store.get_approval(approval.id).await.unwrap().unwrap();
        assert_eq!(stored.decision_reason.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_decide_after_expiry() {
        let (store, _, approval) = seeded().await;
        let later = approval.expires_at + Duration::seconds(1);

        let outcome = store
            .decide_approval(approval.id, Decision::Approved, "late", "pm", later)
            .await
            .unwrap();
        assert_eq!(outcome, DecideOutcome::Expired(approval.expires_at));
    }

    #[tokio::test]
    async fn test_decide_unknown_approval() {
        let store = InMemoryStore::new();
        let outcome = store
            .decide_approval(Uuid::new_v4(), Decision::Approved, "ok", "pm", Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, DecideOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_advance_requires_running() {
        let (store, execution, _) = seeded().await;

        store.fail_execution(execution.id, "boom").await.unwrap();
        let err = store
            .advance_execution(execution.id, "next", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ExecutionNotRunning(id) if id == execution.id));

        // failing twice keeps the first message
        store.fail_execution(execution.id, "second").await.unwrap();
        let stored = store.get_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(stored.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_fail_cancels_pending_approvals() {
        let (store, execution, approval) = seeded().await;

        store.fail_execution(execution.id, "alert could not be recorded").await.unwrap();

        let stored = store.get_approval(approval.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ApprovalStatus::Cancelled);
        assert!(store.pending_approval_for_execution(execution.id).await.unwrap().is_none());

        let outcome = store
            .decide_approval(approval.id, Decision::Approved, "ok", "pm", Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, DecideOutcome::NotPending(ApprovalStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_definition_replace_refused_while_running() {
        let store = InMemoryStore::new();
        let definition = WorkflowDefinition {
            id: Uuid::new_v4(),
            name: "Hot work permit".to_string(),
            form_template_id: None,
            steps: Vec::new(),
            connections: Vec::new(),
        };
        store.save_workflow(&definition).await.unwrap();

        let execution = Execution::new(definition.id, "start", json!({}));
        store.create_execution(&execution).await.unwrap();

        let renamed = WorkflowDefinition {
            name: "Hot work permit v2".to_string(),
            ..definition.clone()
        };
        let err = store.save_workflow(&renamed).await.unwrap_err();
        assert!(matches!(err, StoreError::DefinitionInUse(id) if id == definition.id));

        store.complete_execution(execution.id, &json!({})).await.unwrap();
        store.save_workflow(&renamed).await.unwrap();
        let stored = store.get_workflow(definition.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Hot work permit v2");
    }

    #[tokio::test]
    async fn test_expire_approvals_expires_execution() {
        let (store, execution, approval) = seeded().await;

        let none = store.expire_approvals(Utc::now()).await.unwrap();
        assert!(none.is_empty());

        let expired = store
            .expire_approvals(approval.expires_at + Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, ApprovalStatus::Expired);

        let stored = store.get_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Expired);
        assert!(stored.error_message.unwrap().contains("expired"));
        assert!(store.pending_approvals_for("pm@example.com").await.unwrap().is_empty());
    }
}
