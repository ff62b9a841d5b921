use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authored step identifier, unique within one workflow definition.
pub type StepId = String;

// ===== Workflow definitions =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub name: String,
    /// Form template whose submissions trigger this workflow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_template_id: Option<Uuid>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub id: StepId,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Builder canvas coordinates, never read by the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(flatten)]
    pub kind: StepKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Per-kind step payload. Only the fields a kind actually uses are present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    Start,
    Notification {
        /// Recipient, may contain `{{field}}` placeholders
        #[serde(default)]
        assignee: Option<String>,
        /// Channel hint recorded on the notification row
        #[serde(default)]
        action: Option<String>,
    },
    Approval {
        assignee: String,
        #[serde(default)]
        action: Option<String>,
    },
    Condition,
    End,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Notification { .. } => "notification",
            Self::Approval { .. } => "approval",
            Self::Condition => "condition",
            Self::End => "end",
        }
    }
}

impl Step {
    pub fn is_start(&self) -> bool {
        matches!(self.kind, StepKind::Start)
    }

    pub fn is_end(&self) -> bool {
        matches!(self.kind, StepKind::End)
    }

    pub fn is_condition(&self) -> bool {
        matches!(self.kind, StepKind::Condition)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Connection {
    pub source: StepId,
    pub target: StepId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<Guard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Connection {
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            guard: None,
            label: None,
        }
    }

    pub fn guarded(source: &str, target: &str, guard: Guard) -> Self {
        Self {
            guard: Some(guard),
            ..Self::new(source, target)
        }
    }
}

/// A (field, operator, literal) triple deciding whether a connection is eligible
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Guard {
    pub field: String,
    pub operator: GuardOperator,
    pub value: serde_json::Value,
}

impl Guard {
    pub fn new(field: &str, operator: GuardOperator, value: serde_json::Value) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GuardOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
}

// ===== Executions =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "execution_status", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    /// Abandoned: its pending approval expired before anyone decided it
    Expired,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub current_step_id: StepId,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "context_json"))]
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Execution {
    /// A fresh running execution positioned at `start_step_id`
    pub fn new(workflow_id: Uuid, start_step_id: &str, trigger_context: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Running,
            current_step_id: start_step_id.to_string(),
            context: serde_json::json!({ "trigger": trigger_context, "steps": {} }),
            created_at: now,
            updated_at: now,
            completed_at: None,
            error_message: None,
        }
    }
}

// ===== Approvals =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "approval_status", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    /// Closed because its execution failed before anyone decided it
    Cancelled,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Outcome supplied by whoever resolves an approval
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn status(&self) -> ApprovalStatus {
        match self {
            Self::Approved => ApprovalStatus::Approved,
            Self::Rejected => ApprovalStatus::Rejected,
        }
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Approval {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_id: StepId,
    pub assignee: String,
    pub status: ApprovalStatus,
    pub decision_reason: Option<String>,
    pub decision_at: Option<DateTime<Utc>>,
    pub decision_by: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Approval {
    pub fn pending(execution_id: Uuid, step_id: &str, assignee: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            step_id: step_id.to_string(),
            assignee: assignee.to_string(),
            status: ApprovalStatus::Pending,
            decision_reason: None,
            decision_at: None,
            decision_by: None,
            expires_at,
            notified_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// ===== Notifications =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "notification_status", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_id: StepId,
    pub channel: String,
    pub recipient: String,
    pub subject: String,
    pub message: String,
    pub status: NotificationStatus,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn pending(
        execution_id: Uuid,
        step_id: &str,
        channel: &str,
        recipient: &str,
        subject: &str,
        message: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            step_id: step_id.to_string(),
            channel: channel.to_string(),
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            message: message.to_string(),
            status: NotificationStatus::Pending,
            error_message: None,
            sent_at: None,
            created_at: Utc::now(),
        }
    }
}
