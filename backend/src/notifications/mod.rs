// Notification Dispatchers - Outbound channels used by notification and approval steps
//
// The engine only relies on the pass/fail contract of `send`; a failed send
// is recorded on the notification row and never stops an execution.

pub mod email;
pub mod webhook;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

pub use email::{EmailDispatcher, EmailService};
pub use webhook::WebhookDispatcher;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct DispatchError(pub String);

impl DispatchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Channel name recorded on notification rows
    fn channel(&self) -> &'static str;

    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), DispatchError>;
}

/// Dispatcher that only writes to the log; the fallback when no channel is configured
#[derive(Debug, Clone, Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    fn channel(&self) -> &'static str {
        "log"
    }

    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), DispatchError> {
        info!(recipient, subject, body_len = body.len(), "Notification (log channel)");
        Ok(())
    }
}
