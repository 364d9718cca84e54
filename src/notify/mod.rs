//! Failure notification for operators
//!
//! At the end of a run with failures the orchestrator hands the full outcome
//! sequence to a [`NotificationSink`]. Delivery is best effort: an error is
//! logged and broadcast, and never changes the run's outcomes.
//!
//! - [`WebhookNotifier`]: POSTs a JSON [`NotificationPayload`](crate::types::NotificationPayload)
//! - [`ScriptNotifier`]: runs external programs with the report in environment variables
//! - [`Notifiers`]: fans out to every configured sink
//! - [`NoOpNotifier`]: used when nothing is configured

mod script;
mod webhook;

pub use script::ScriptNotifier;
pub use webhook::WebhookNotifier;

use crate::config::NotificationConfig;
use crate::error::{Error, Result};
use crate::types::{RunId, RunOutcome};
use async_trait::async_trait;
use std::sync::Arc;

/// Receiver of the outcome sequence of a run with failures
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver the `outcomes` of run `run_id` (inventory order, successes included)
    ///
    /// # Errors
    ///
    /// [`Error::Notification`] when delivery failed.
    async fn notify(&self, run_id: RunId, outcomes: &[RunOutcome]) -> Result<()>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Sink that drops every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpNotifier;

#[async_trait]
impl NotificationSink for NoOpNotifier {
    async fn notify(&self, run_id: RunId, outcomes: &[RunOutcome]) -> Result<()> {
        tracing::debug!(
            %run_id,
            outcomes = outcomes.len(),
            "no notification sinks configured, dropping report"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Fan-out over several sinks
///
/// Every sink is attempted; the errors of all failing sinks are joined into
/// one [`Error::Notification`].
pub struct Notifiers {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl Notifiers {
    /// Wrap an explicit list of sinks
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    /// Build the sinks described by `config`
    ///
    /// Returns a [`NoOpNotifier`] when neither webhooks nor scripts are
    /// configured.
    pub fn from_config(config: &NotificationConfig) -> Arc<dyn NotificationSink> {
        let mut sinks: Vec<Arc<dyn NotificationSink>> = Vec::new();
        if !config.webhooks.is_empty() {
            sinks.push(Arc::new(WebhookNotifier::new(config.webhooks.clone())));
        }
        if !config.scripts.is_empty() {
            sinks.push(Arc::new(ScriptNotifier::new(config.scripts.clone())));
        }

        if sinks.is_empty() {
            Arc::new(NoOpNotifier)
        } else {
            Arc::new(Self::new(sinks))
        }
    }

    /// Number of wrapped sinks
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether no sinks are wrapped
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl NotificationSink for Notifiers {
    async fn notify(&self, run_id: RunId, outcomes: &[RunOutcome]) -> Result<()> {
        let mut errors = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.notify(run_id, outcomes).await {
                tracing::warn!(sink = sink.name(), error = %e, "notification sink failed");
                errors.push(format!("{}: {}", sink.name(), e));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Notification(errors.join("; ")))
        }
    }

    fn name(&self) -> &'static str {
        "fan-out"
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScriptConfig, WebhookConfig};
    use crate::orchestrator::test_helpers::RecordingNotifier;
    use crate::types::DeviceRecord;
    use std::time::Duration;

    fn failed_outcomes() -> Vec<RunOutcome> {
        vec![
            RunOutcome::success(&DeviceRecord::new("a", "10.0.0.1"), "ok"),
            RunOutcome::retrieval_failed(&DeviceRecord::new("b", "10.0.0.2"), "refused"),
        ]
    }

    #[test]
    fn empty_config_yields_noop() {
        let sink = Notifiers::from_config(&NotificationConfig::default());
        assert_eq!(sink.name(), "noop");
    }

    #[test]
    fn configured_sinks_yield_fan_out() {
        let config = NotificationConfig {
            webhooks: vec![WebhookConfig {
                url: "http://localhost:9/hook".into(),
                auth_header: None,
                timeout: Duration::from_secs(1),
            }],
            scripts: vec![ScriptConfig {
                path: "/usr/local/bin/notify".into(),
                timeout: Duration::from_secs(1),
            }],
        };
        assert_eq!(Notifiers::from_config(&config).name(), "fan-out");
    }

    #[tokio::test]
    async fn fan_out_attempts_every_sink_and_joins_errors() {
        let ok = Arc::new(RecordingNotifier::new());
        let failing = Arc::new(RecordingNotifier::failing());
        let also_ok = Arc::new(RecordingNotifier::new());
        let notifiers = Notifiers::new(vec![ok.clone(), failing.clone(), also_ok.clone()]);
        assert_eq!(notifiers.len(), 3);

        let run_id = RunId::new();
        let err = notifiers.notify(run_id, &failed_outcomes()).await.unwrap_err();
        assert!(matches!(err, Error::Notification(ref m) if m.contains("recording")));

        assert_eq!(ok.calls().len(), 1);
        assert_eq!(failing.calls().len(), 1);
        assert_eq!(also_ok.calls().len(), 1);
        assert_eq!(also_ok.calls()[0], failed_outcomes());
        assert_eq!(also_ok.run_ids(), vec![run_id], "every sink sees the same run");
    }

    #[tokio::test]
    async fn noop_always_succeeds() {
        NoOpNotifier
            .notify(RunId::new(), &failed_outcomes())
            .await
            .unwrap();
    }
}
