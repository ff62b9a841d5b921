// Job Scheduler - Central scheduler for all background jobs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info};
use uuid::Uuid;

use super::approval_expiry::ApprovalExpiryJob;
use crate::store::ExecutionStore;

const MAX_EXECUTION_LOGS: usize = 100;
pub const APPROVAL_EXPIRY_JOB: &str = "approval_expiry";

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Cron expression with a seconds field
    pub approval_sweep_cron: String,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            approval_sweep_cron: "0 */15 * * * *".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub items_processed: i32,
    pub errors: Vec<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Completed,
    Failed,
}

/// Recent job runs, newest last, shared between the scheduler and the API
#[derive(Debug, Clone, Default)]
pub struct JobLog {
    entries: Arc<RwLock<Vec<JobExecutionLog>>>,
}

impl JobLog {
    pub async fn push(&self, log: JobExecutionLog) {
        let mut entries = self.entries.write().await;
        entries.push(log);
        if entries.len() > MAX_EXECUTION_LOGS {
            entries.remove(0);
        }
    }

    /// Most recent run of `job_name`, if it has run since startup
    pub async fn latest(&self, job_name: &str) -> Option<JobExecutionLog> {
        self.entries
            .read()
            .await
            .iter()
            .rev()
            .find(|log| log.job_name == job_name)
            .cloned()
    }
}

pub struct JobScheduler {
    scheduler: TokioScheduler,
    store: Arc<dyn ExecutionStore>,
    config: JobConfig,
    log: JobLog,
}

impl JobScheduler {
    pub async fn new(store: Arc<dyn ExecutionStore>, config: JobConfig) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            store,
            config,
            log: JobLog::default(),
        })
    }

    pub fn log(&self) -> JobLog {
        self.log.clone()
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting background job scheduler");

        self.schedule_approval_expiry().await?;

        self.scheduler.start().await?;

        info!("Background job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down background job scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    async fn schedule_approval_expiry(&self) -> JobResult<()> {
        let cron_expr = self.config.approval_sweep_cron.clone();
        let store = self.store.clone();
        let log = self.log.clone();

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let store = store.clone();
            let log = log.clone();

            Box::pin(async move {
                log.push(sweep_approvals(store).await).await;
            })
        })
        .map_err(|e| JobError::ConfigError(format!("Invalid approval sweep schedule '{}': {}", cron_expr, e)))?;

        self.scheduler.add(job).await?;
        info!("Scheduled approval expiry sweep ({})", cron_expr);

        Ok(())
    }

}

async fn sweep_approvals(store: Arc<dyn ExecutionStore>) -> JobExecutionLog {
    let started_at = Utc::now();
    info!("Running approval expiry job");

    let job = ApprovalExpiryJob::new(store);
    let (status, items_processed, errors) = match job.run().await {
        Ok(result) => {
            info!(
                executions = ?result.executions_expired,
                "Approval expiry completed: {} approvals expired",
                result.approvals_expired
            );
            (JobStatus::Completed, result.approvals_expired, Vec::new())
        }
        Err(e) => {
            error!("Approval expiry failed: {}", e);
            (JobStatus::Failed, 0, vec![e.to_string()])
        }
    };

    let completed_at = Utc::now();
    JobExecutionLog {
        id: Uuid::new_v4(),
        job_name: APPROVAL_EXPIRY_JOB.to_string(),
        started_at,
        completed_at: Some(completed_at),
        status,
        items_processed,
        errors,
        duration_ms: Some((completed_at - started_at).num_milliseconds()),
    }
}
