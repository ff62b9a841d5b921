// Background Jobs Service
//
// Scheduled background jobs for the workflow engine, run through
// tokio-cron-scheduler on a cron expression with a seconds field.

pub mod approval_expiry;
pub mod scheduler;

pub use scheduler::{JobConfig, JobLog, JobScheduler, APPROVAL_EXPIRY_JOB};
