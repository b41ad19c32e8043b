use crate::config::AppConfig;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Best-effort transactional mail.
///
/// `send` reports success as a boolean and never returns an error: a failed
/// receipt or cancellation email must not fail the request that triggered it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> bool;
}

/// SendGrid-backed implementation of [`Mailer`].
#[derive(Clone)]
pub struct SendgridMailer {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    from: String,
}

impl SendgridMailer {
    pub fn new(config: &AppConfig, api_key: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            api_base: config.sendgrid_api_base.trim_end_matches('/').to_string(),
            api_key,
            from: config.mail_from.clone(),
        }
    }
}

#[async_trait]
impl Mailer for SendgridMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> bool {
        let payload = json!({
            "personalizations": [{ "to": [{ "email": to }] }],
            "from": { "email": self.from },
            "subject": subject,
            "content": [{ "type": "text/plain", "value": body }],
        });

        let result = self
            .client
            .post(format!("{}/mail/send", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "mail delivery rejected");
                false
            }
            Err(e) => {
                warn!("mail delivery failed: {}", e);
                false
            }
        }
    }
}

/// Mailer used when no provider is configured; logs and reports failure so
/// responses carry `receipt_mailed = false` instead of pretending.
#[derive(Clone, Default)]
pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> bool {
        debug!(to = %to, subject = %subject, "mailer disabled; dropping message");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_mailer_reports_failure() {
        let mailer = NoopMailer;
        assert!(!mailer.send("user@example.com", "Order placed", "body").await);
    }
}
