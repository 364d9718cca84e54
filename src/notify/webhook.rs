//! HTTP webhook notifications

use super::NotificationSink;
use crate::config::WebhookConfig;
use crate::error::{Error, Result};
use crate::types::{NotificationPayload, RunId, RunOutcome};
use async_trait::async_trait;
use futures::future::join_all;

/// POSTs a [`NotificationPayload`] to every configured webhook
///
/// Webhooks are called concurrently, each under its own timeout. `notify`
/// fails if any webhook failed, after all of them were attempted.
pub struct WebhookNotifier {
    client: reqwest::Client,
    webhooks: Vec<WebhookConfig>,
}

impl WebhookNotifier {
    /// Create a notifier for `webhooks`
    pub fn new(webhooks: Vec<WebhookConfig>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhooks,
        }
    }

    async fn send(
        &self,
        webhook: &WebhookConfig,
        payload: &NotificationPayload,
    ) -> std::result::Result<(), String> {
        let mut request = self
            .client
            .post(&webhook.url)
            .json(payload)
            .timeout(webhook.timeout);

        if let Some(auth) = &webhook.auth_header {
            request = request.header("Authorization", auth);
        }

        match tokio::time::timeout(webhook.timeout, request.send()).await {
            Ok(Ok(response)) if response.status().is_success() => {
                tracing::debug!(url = %webhook.url, "webhook sent successfully");
                Ok(())
            }
            Ok(Ok(response)) => Err(format!(
                "webhook returned status {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )),
            Ok(Err(e)) => Err(format!("failed to send webhook: {}", e)),
            Err(_) => Err(format!("webhook timed out after {:?}", webhook.timeout)),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify(&self, run_id: RunId, outcomes: &[RunOutcome]) -> Result<()> {
        let payload = NotificationPayload::from_outcomes(run_id, outcomes);

        let results = join_all(self.webhooks.iter().map(|w| self.send(w, &payload))).await;

        let failures: Vec<String> = self
            .webhooks
            .iter()
            .zip(results)
            .filter_map(|(webhook, result)| {
                result.err().map(|error| {
                    tracing::warn!(url = %webhook.url, error = %error, "webhook failed");
                    format!("{}: {}", webhook.url, error)
                })
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Notification(failures.join("; ")))
        }
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}
