// Workflow Executor - Step processors for notification, approval, condition and start steps

use std::sync::{Arc, LazyLock};

use chrono::{Duration, Utc};
use groundwork_shared::{Approval, Notification, NotificationStatus, Step, StepId, StepKind};
use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::conditions::{coerce_string, get_field, select_connection};
use super::engine::EngineError;
use super::graph::{DefinitionError, WorkflowGraph};
use crate::notifications::NotificationDispatcher;
use crate::store::ExecutionStore;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^}]+?)\s*\}\}").expect("placeholder pattern is valid"));

/// Channel recorded on the notification that alerts an approval's assignee
pub const APPROVAL_REQUEST_CHANNEL: &str = "approval_request";

/// What the driver loop should do after a step ran
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Advance(StepId),
    /// Parked on the given pending approval
    Suspend(Uuid),
}

/// Replace `{{path}}` placeholders with values from the execution context.
/// Placeholders that resolve to nothing are left verbatim.
pub fn render_template(template: &str, context: &Value) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| match get_field(context, &caps[1]) {
            Some(value) => coerce_string(Some(value)),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Store a step's record under `steps.<step_id>` in the context
pub fn record_step(context: &mut Value, step_id: &str, record: Value) {
    if !context.is_object() {
        *context = json!({});
    }
    if let Some(root) = context.as_object_mut() {
        let steps = root.entry("steps").or_insert_with(|| json!({}));
        if !steps.is_object() {
            *steps = json!({});
        }
        if let Some(steps) = steps.as_object_mut() {
            steps.insert(step_id.to_string(), record);
        }
    }
}

#[derive(Clone)]
pub struct StepExecutor {
    store: Arc<dyn ExecutionStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    approval_window: Duration,
}

impl StepExecutor {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        approval_window: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            approval_window,
        }
    }

    /// Run the processor for `step`. End steps never reach here; the driver
    /// loop completes the execution itself.
    pub async fn execute(
        &self,
        graph: &WorkflowGraph,
        step: &Step,
        execution_id: Uuid,
        context: &mut Value,
    ) -> Result<StepOutcome, EngineError> {
        match &step.kind {
            StepKind::Start => first_outgoing(graph, step),
            StepKind::Notification { assignee, action } => {
                self.notify(graph, step, execution_id, assignee.as_deref(), action.as_deref(), context)
                    .await
            }
            StepKind::Approval { assignee, .. } => {
                self.request_approval(step, execution_id, assignee, context).await
            }
            StepKind::Condition => branch(graph, step, context),
            StepKind::End => Err(DefinitionError::NoProcessor(step.id.clone()).into()),
        }
    }

    async fn notify(
        &self,
        graph: &WorkflowGraph,
        step: &Step,
        execution_id: Uuid,
        assignee: Option<&str>,
        action: Option<&str>,
        context: &mut Value,
    ) -> Result<StepOutcome, EngineError> {
        let recipient = assignee
            .map(|assignee| render_template(assignee, context))
            .filter(|recipient| !recipient.trim().is_empty());
        let subject = render_template(&step.label, context);
        let body = match &step.description {
            Some(description) => render_template(description, context),
            None => format!("Step '{}' of execution {} has been reached.", step.label, execution_id),
        };
        let channel = action.unwrap_or_else(|| self.dispatcher.channel());

        let notification = Notification::pending(
            execution_id,
            &step.id,
            channel,
            recipient.as_deref().unwrap_or_default(),
            &subject,
            &body,
        );
        self.store.create_notification(&notification).await?;

        let status = match recipient {
            Some(recipient) => self.dispatch(&notification, &recipient, &subject, &body).await?,
            None => {
                warn!(execution_id = %execution_id, step_id = %step.id, "Notification step has no recipient");
                self.store
                    .finish_notification(
                        notification.id,
                        NotificationStatus::Failed,
                        Some("no recipient configured"),
                        None,
                    )
                    .await?;
                NotificationStatus::Failed
            }
        };

        record_step(
            context,
            &step.id,
            json!({ "notification_id": notification.id, "status": status.as_str() }),
        );

        first_outgoing(graph, step)
    }

    async fn request_approval(
        &self,
        step: &Step,
        execution_id: Uuid,
        assignee: &str,
        context: &Value,
    ) -> Result<StepOutcome, EngineError> {
        // Re-entering a suspended step must not open a second approval
        if let Some(existing) = self.store.pending_approval_for_execution(execution_id).await? {
            return Ok(StepOutcome::Suspend(existing.id));
        }

        let assignee = render_template(assignee, context);
        let now = Utc::now();
        let approval = Approval::pending(execution_id, &step.id, &assignee, now + self.approval_window);
        self.store.create_approval(&approval).await?;

        info!(
            execution_id = %execution_id,
            step_id = %step.id,
            approval_id = %approval.id,
            assignee = %assignee,
            "Approval requested"
        );

        let subject = format!("Approval required: {}", render_template(&step.label, context));
        let body = match &step.description {
            Some(description) => render_template(description, context),
            None => format!(
                "Execution {} is waiting for your decision on '{}'. This request expires at {}.",
                execution_id,
                step.label,
                approval.expires_at.to_rfc3339()
            ),
        };

        let notification = Notification::pending(
            execution_id,
            &step.id,
            APPROVAL_REQUEST_CHANNEL,
            &assignee,
            &subject,
            &body,
        );
        self.store.create_notification(&notification).await?;

        if assignee.trim().is_empty() {
            self.store
                .finish_notification(
                    notification.id,
                    NotificationStatus::Failed,
                    Some("no recipient configured"),
                    None,
                )
                .await?;
        } else if self.dispatch(&notification, &assignee, &subject, &body).await? == NotificationStatus::Sent {
            self.store.mark_approval_notified(approval.id, Utc::now()).await?;
        }

        Ok(StepOutcome::Suspend(approval.id))
    }

    /// Single send attempt; the outcome lands on the notification row only
    async fn dispatch(
        &self,
        notification: &Notification,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<NotificationStatus, EngineError> {
        match self.dispatcher.send(recipient, subject, body).await {
            Ok(()) => {
                self.store
                    .finish_notification(notification.id, NotificationStatus::Sent, None, Some(Utc::now()))
                    .await?;
                Ok(NotificationStatus::Sent)
            }
            Err(e) => {
                warn!(
                    execution_id = %notification.execution_id,
                    step_id = %notification.step_id,
                    notification_id = %notification.id,
                    "Notification dispatch failed: {}",
                    e
                );
                self.store
                    .finish_notification(notification.id, NotificationStatus::Failed, Some(&e.0), None)
                    .await?;
                Ok(NotificationStatus::Failed)
            }
        }
    }
}

fn first_outgoing(graph: &WorkflowGraph, step: &Step) -> Result<StepOutcome, EngineError> {
    graph
        .outgoing(&step.id)
        .first()
        .map(|connection| StepOutcome::Advance(connection.target.clone()))
        .ok_or_else(|| DefinitionError::NoOutgoing(step.id.clone()).into())
}

fn branch(graph: &WorkflowGraph, step: &Step, context: &mut Value) -> Result<StepOutcome, EngineError> {
    let target = next_step(graph, &step.id, context)?;
    record_step(context, &step.id, json!({ "selected": target }));
    Ok(StepOutcome::Advance(target))
}

/// Edge selection shared by condition steps and approval resumption
pub fn next_step(graph: &WorkflowGraph, step_id: &str, context: &Value) -> Result<StepId, DefinitionError> {
    let outgoing = graph.outgoing(step_id);
    if outgoing.is_empty() {
        return Err(DefinitionError::NoOutgoing(step_id.to_string()));
    }
    select_connection(&outgoing, context)
        .map(|connection| connection.target.clone())
        .ok_or_else(|| DefinitionError::NoEligibleConnection(step_id.to_string()))
}
