// Approval Expiry Job - Closes approvals nobody decided before their deadline

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::{ExecutionStore, StoreError};

pub struct ApprovalExpiryJob {
    store: Arc<dyn ExecutionStore>,
}

#[derive(Debug, Default)]
pub struct ExpirySweepResult {
    pub approvals_expired: i32,
    pub executions_expired: Vec<Uuid>,
}

impl ApprovalExpiryJob {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }

    /// Expire everything overdue as of now
    pub async fn run(&self) -> Result<ExpirySweepResult, StoreError> {
        self.run_at(Utc::now()).await
    }

    /// Expire everything whose deadline is at or before `now`
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<ExpirySweepResult, StoreError> {
        let expired = self.store.expire_approvals(now).await?;
        let mut result = ExpirySweepResult::default();

        for approval in &expired {
            warn!(
                execution_id = %approval.execution_id,
                approval_id = %approval.id,
                step_id = %approval.step_id,
                assignee = %approval.assignee,
                "Approval expired without a decision"
            );
            result.approvals_expired += 1;
            result.executions_expired.push(approval.execution_id);
        }

        if result.approvals_expired > 0 {
            info!("Expired {} approvals", result.approvals_expired);
        }

        Ok(result)
    }
}
