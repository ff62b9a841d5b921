// Email Channel - SMTP delivery for workflow notifications

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::{authentication::Credentials, PoolConfig},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use tracing::{error, info};

use super::{DispatchError, NotificationDispatcher};
use crate::config::SmtpConfig;

#[derive(Debug, Clone)]
pub struct EmailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
}

impl EmailService {
    /// STARTTLS relay when `use_tls` is set, plain SMTP otherwise
    pub fn new(smtp_config: &SmtpConfig) -> Result<Self, DispatchError> {
        let creds = Credentials::new(smtp_config.username.clone(), smtp_config.password.clone());

        let builder = if smtp_config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp_config.host)
                .map_err(|e| DispatchError::new(format!("invalid SMTP relay '{}': {}", smtp_config.host, e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp_config.host)
        };

        let transport = builder
            .port(smtp_config.port)
            .credentials(creds)
            .pool_config(PoolConfig::new().max_size(10))
            .timeout(Some(Duration::from_secs(10)))
            .build();

        Ok(EmailService {
            transport,
            from_email: smtp_config.from_email.clone(),
            from_name: smtp_config.from_name.clone(),
        })
    }

    pub async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<(), DispatchError> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| DispatchError::new(format!("invalid sender address: {}", e)))?;
        let to = to_email
            .parse::<Mailbox>()
            .map_err(|e| DispatchError::new(format!("invalid recipient '{}': {}", to_email, e)))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )
            .map_err(|e| DispatchError::new(format!("failed to build message: {}", e)))?;

        match self.transport.send(message).await {
            Ok(_) => {
                info!("Email sent successfully to {}", to_email);
                Ok(())
            }
            Err(e) => {
                error!("Failed to send email to {}: {}", to_email, e);
                Err(DispatchError::new(e.to_string()))
            }
        }
    }
}

/// Wrap a plain-text workflow message in the standard mail layout
pub fn render_html(subject: &str, body: &str) -> String {
    let paragraphs: String = body
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| format!("<p>{}</p>", escape_html(line)))
        .collect();

    format!(
        r#"
        <html>
        <head>
            <style>
                body {{ font-family: Arial, sans-serif; margin: 0; padding: 20px; background-color: #f5f5f5; }}
                .container {{ max-width: 600px; margin: 0 auto; background: white; border-radius: 8px; overflow: hidden; }}
                .header {{ background: #b45309; color: white; padding: 20px; }}
                .content {{ padding: 30px; }}
                .footer {{ background: #f8fafc; padding: 20px; text-align: center; color: #666; }}
            </style>
        </head>
        <body>
            <div class="container">
                <div class="header"><h2>{}</h2></div>
                <div class="content">{}</div>
                <div class="footer"><p>This is an automated workflow message. Please do not reply directly to this email.</p></div>
            </div>
        </body>
        </html>
        "#,
        escape_html(subject),
        paragraphs
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// SMTP channel
#[derive(Debug, Clone)]
pub struct EmailDispatcher {
    service: EmailService,
}

impl EmailDispatcher {
    pub fn new(service: EmailService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl NotificationDispatcher for EmailDispatcher {
    fn channel(&self) -> &'static str {
        "email"
    }

    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), DispatchError> {
        let html = render_html(subject, body);
        self.service.send_email(recipient, subject, &html, body).await
    }
}
