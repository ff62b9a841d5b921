use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use super::{DispatchError, NotificationDispatcher};

#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload<'a> {
    pub recipient: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
}

/// Posts every notification as JSON to a fixed endpoint (chat bridge, SMS relay, ...)
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: String,
}

impl WebhookDispatcher {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    fn channel(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), DispatchError> {
        let payload = WebhookPayload { recipient, subject, body };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DispatchError::new(format!("Request failed: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(DispatchError::new(format!("Status: {}, Body: {}", status, body)))
        }
    }
}
