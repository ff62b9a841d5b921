// Integration tests for the Postgres store
//
// Skipped unless TEST_DATABASE_URL or TEST_USE_CONTAINERS is set.

use std::sync::Arc;

use chrono::{Duration, Utc};
use groundwork_shared::{
    Approval, ApprovalStatus, Decision, Execution, ExecutionStatus, Notification,
    NotificationStatus,
};
use serde_json::json;
use serial_test::serial;
use uuid::Uuid;

use crate::store::{DecideOutcome, DefinitionRepository, ExecutionStore, PgStore, StoreError};
use crate::tests::fixtures::{fake_submission, risk_review_workflow, RecordingDispatcher};
use crate::tests::helpers::PgTestContext;
use crate::workflows::{EngineConfig, ResumeCommand, WorkflowEngine};

/// Saves a workflow and a running execution parked at `review`
async fn seeded(store: &PgStore) -> (Execution, Approval) {
    let definition = risk_review_workflow();
    store.save_workflow(&definition).await.unwrap();

    let mut execution = Execution::new(definition.id, "start", fake_submission("high"));
    execution.current_step_id = "review".to_string();
    store.create_execution(&execution).await.unwrap();

    let approval = Approval::pending(
        execution.id,
        "review",
        "safety@example.com",
        Utc::now() + Duration::days(7),
    );
    store.create_approval(&approval).await.unwrap();

    (execution, approval)
}

#[tokio::test]
#[serial]
async fn test_workflow_definition_round_trip() {
    let Some(ctx) = PgTestContext::new().await else { return };
    let definition = risk_review_workflow();

    ctx.store.save_workflow(&definition).await.unwrap();
    let loaded = ctx.store.get_workflow(definition.id).await.unwrap().unwrap();

    assert_eq!(loaded.name, definition.name);
    assert_eq!(loaded.steps.len(), definition.steps.len());
    assert_eq!(loaded.connections.len(), definition.connections.len());
    assert!(ctx.store.get_workflow(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn test_decide_applies_once() {
    let Some(ctx) = PgTestContext::new().await else { return };
    let (_, approval) = seeded(&ctx.store).await;
    let now = Utc::now();

    let first = ctx
        .store
        .decide_approval(approval.id, Decision::Approved, "ok", "site-manager", now)
        .await
        .unwrap();
    let DecideOutcome::Decided(decided) = first else {
        panic!("expected the first decision to apply, got {:?}", first);
    };
    assert_eq!(decided.status, ApprovalStatus::Approved);
    assert_eq!(decided.decision_reason.as_deref(), Some("ok"));

    let second = ctx
        .store
        .decide_approval(approval.id, Decision::Rejected, "no", "someone-else", now)
        .await
        .unwrap();
    assert_eq!(second, DecideOutcome::NotPending(ApprovalStatus::Approved));

    let stored = ctx.store.get_approval(approval.id).await.unwrap().unwrap();
    assert_eq!(stored.decision_by.as_deref(), Some("site-manager"));
}

#[tokio::test]
#[serial]
async fn test_decide_after_expiry() {
    let Some(ctx) = PgTestContext::new().await else { return };
    let (_, approval) = seeded(&ctx.store).await;

    let outcome = ctx
        .store
        .decide_approval(
            approval.id,
            Decision::Approved,
            "ok",
            "site-manager",
            approval.expires_at + Duration::seconds(1),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, DecideOutcome::Expired(_)));
    let stored = ctx.store.get_approval(approval.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ApprovalStatus::Pending);

    let missing = ctx
        .store
        .decide_approval(Uuid::new_v4(), Decision::Approved, "ok", "a", Utc::now())
        .await
        .unwrap();
    assert_eq!(missing, DecideOutcome::NotFound);
}

#[tokio::test]
#[serial]
async fn test_advance_requires_running() {
    let Some(ctx) = PgTestContext::new().await else { return };
    let (execution, _) = seeded(&ctx.store).await;
    let context = json!({"trigger": {}, "steps": {"review": {"decision": "approved"}}});

    ctx.store
        .advance_execution(execution.id, "done", &context)
        .await
        .unwrap();
    ctx.store
        .complete_execution(execution.id, &context)
        .await
        .unwrap();

    let stored = ctx.store.get_execution(execution.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Completed);
    assert_eq!(stored.current_step_id, "done");
    assert_eq!(stored.context, context);
    assert!(stored.completed_at.is_some());

    let err = ctx
        .store
        .advance_execution(execution.id, "review", &context)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ExecutionNotRunning(id) if id == execution.id));
}

#[tokio::test]
#[serial]
async fn test_expire_approvals_sweep() {
    let Some(ctx) = PgTestContext::new().await else { return };
    let (execution, approval) = seeded(&ctx.store).await;

    let none = ctx.store.expire_approvals(Utc::now()).await.unwrap();
    assert!(none.is_empty());

    let expired = ctx
        .store
        .expire_approvals(approval.expires_at + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, approval.id);
    assert_eq!(expired[0].status, ApprovalStatus::Expired);

    let stored = ctx.store.get_execution(execution.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Expired);
    assert!(stored.error_message.is_some());
    assert!(ctx
        .store
        .pending_approvals_for("safety@example.com")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
#[serial]
async fn test_fail_execution_cancels_pending_approval() {
    let Some(ctx) = PgTestContext::new().await else { return };
    let (execution, approval) = seeded(&ctx.store).await;

    ctx.store
        .fail_execution(execution.id, "alert could not be recorded")
        .await
        .unwrap();

    let stored = ctx.store.get_approval(approval.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ApprovalStatus::Cancelled);
    assert!(ctx
        .store
        .pending_approval_for_execution(execution.id)
        .await
        .unwrap()
        .is_none());

    let outcome = ctx
        .store
        .decide_approval(approval.id, Decision::Approved, "ok", "site-manager", Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, DecideOutcome::NotPending(ApprovalStatus::Cancelled));
}

#[tokio::test]
#[serial]
async fn test_definition_locked_while_running() {
    let Some(ctx) = PgTestContext::new().await else { return };
    let (execution, _) = seeded(&ctx.store).await;
    let definition = ctx
        .store
        .get_workflow(execution.workflow_id)
        .await
        .unwrap()
        .unwrap();

    let mut renamed = definition.clone();
    renamed.name = "Site risk review v2".to_string();
    let err = ctx.store.save_workflow(&renamed).await.unwrap_err();
    assert!(matches!(err, StoreError::DefinitionInUse(id) if id == definition.id));
    let stored = ctx.store.get_workflow(definition.id).await.unwrap().unwrap();
    assert_eq!(stored.name, definition.name);

    ctx.store.fail_execution(execution.id, "stopped").await.unwrap();
    ctx.store.save_workflow(&renamed).await.unwrap();
    let stored = ctx.store.get_workflow(definition.id).await.unwrap().unwrap();
    assert_eq!(stored.name, "Site risk review v2");
}

#[tokio::test]
#[serial]
async fn test_notification_lifecycle() {
    let Some(ctx) = PgTestContext::new().await else { return };
    let (execution, _) = seeded(&ctx.store).await;

    let notification = Notification::pending(
        execution.id,
        "notify",
        "email",
        "foreman@example.com",
        "Pour scheduled",
        "Concrete arrives at 7am",
    );
    ctx.store.create_notification(&notification).await.unwrap();
    ctx.store
        .finish_notification(
            notification.id,
            NotificationStatus::Failed,
            Some("mailbox unavailable"),
            None,
        )
        .await
        .unwrap();

    let rows = ctx.store.list_notifications(execution.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, NotificationStatus::Failed);
    assert_eq!(rows[0].error_message.as_deref(), Some("mailbox unavailable"));
    assert!(rows[0].sent_at.is_none());
}

#[tokio::test]
#[serial]
async fn test_engine_run_on_postgres() {
    let Some(ctx) = PgTestContext::new().await else { return };
    let store = Arc::new(ctx.store.clone());
    let definition = risk_review_workflow();
    store.save_workflow(&definition).await.unwrap();

    let dispatcher = RecordingDispatcher::new();
    let engine = WorkflowEngine::new(
        store.clone(),
        store.clone(),
        dispatcher.clone(),
        EngineConfig::default(),
    );

    let started = engine
        .start(definition.id, fake_submission("high"))
        .await
        .unwrap();
    started.handle.await.unwrap();

    let approval = store
        .pending_approval_for_execution(started.execution_id)
        .await
        .unwrap()
        .unwrap();
    let outcome = engine
        .resume(ResumeCommand {
            approval_id: approval.id,
            decision: Decision::Approved,
            reason: "ok".to_string(),
            actor_id: "site-manager".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Completed);
    let execution = store.get_execution(started.execution_id).await.unwrap().unwrap();
    assert_eq!(execution.context["steps"]["review"]["decision"], "approved");
    assert_eq!(dispatcher.sent().len(), 2);
}
