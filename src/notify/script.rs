//! External script notifications

use super::NotificationSink;
use crate::config::ScriptConfig;
use crate::error::{Error, Result};
use crate::types::{RunId, RunOutcome};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::process::Command;

/// Runs every configured script with the run report in its environment
///
/// Variables set for each script:
///
/// - `ROUTERBOARD_BACKUP_RUN_ID`: ID of the run that produced the report
/// - `ROUTERBOARD_BACKUP_FAILED`: number of failed outcomes
/// - `ROUTERBOARD_BACKUP_TOTAL`: number of outcomes
/// - `ROUTERBOARD_BACKUP_FAILED_ADDRESSES`: failed addresses, comma separated
/// - `ROUTERBOARD_BACKUP_REPORT`: one `<address> <identity> <status> <detail>` line per outcome
///
/// Scripts run one after another. A script that exits non-zero, cannot be
/// started, or exceeds its timeout counts as a failed delivery.
pub struct ScriptNotifier {
    scripts: Vec<ScriptConfig>,
}

impl ScriptNotifier {
    /// Create a notifier for `scripts`
    pub fn new(scripts: Vec<ScriptConfig>) -> Self {
        Self { scripts }
    }

    async fn run(
        &self,
        script: &ScriptConfig,
        env_vars: &HashMap<&'static str, String>,
    ) -> std::result::Result<(), String> {
        let result = tokio::time::timeout(
            script.timeout,
            Command::new(&script.path)
                .envs(env_vars)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) if output.status.success() => {
                tracing::debug!(script = ?script.path, "notification script executed successfully");
                Ok(())
            }
            Ok(Ok(output)) => Err(format!(
                "exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            Ok(Err(e)) => Err(format!("failed to run: {}", e)),
            Err(_) => Err(format!("timed out after {:?}", script.timeout)),
        }
    }
}

/// Environment handed to notification scripts
pub(crate) fn report_env(
    run_id: RunId,
    outcomes: &[RunOutcome],
) -> HashMap<&'static str, String> {
    let failed: Vec<&RunOutcome> = outcomes.iter().filter(|o| !o.is_success()).collect();

    let report = outcomes
        .iter()
        .map(|o| {
            format!(
                "{} {} {} {}",
                o.device_address,
                o.device_identity.as_deref().unwrap_or("-"),
                o.status,
                o.detail
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut env_vars = HashMap::new();
    env_vars.insert("ROUTERBOARD_BACKUP_RUN_ID", run_id.to_string());
    env_vars.insert("ROUTERBOARD_BACKUP_FAILED", failed.len().to_string());
    env_vars.insert("ROUTERBOARD_BACKUP_TOTAL", outcomes.len().to_string());
    env_vars.insert(
        "ROUTERBOARD_BACKUP_FAILED_ADDRESSES",
        failed
            .iter()
            .map(|o| o.device_address.as_str())
            .collect::<Vec<_>>()
            .join(","),
    );
    env_vars.insert("ROUTERBOARD_BACKUP_REPORT", report);
    env_vars
}

#[async_trait]
impl NotificationSink for ScriptNotifier {
    async fn notify(&self, run_id: RunId, outcomes: &[RunOutcome]) -> Result<()> {
        let env_vars = report_env(run_id, outcomes);

        let mut failures = Vec::new();
        for script in &self.scripts {
            if let Err(error) = self.run(script, &env_vars).await {
                tracing::warn!(script = ?script.path, error = %error, "notification script failed");
                failures.push(format!("{}: {}", script.path.display(), error));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Notification(failures.join("; ")))
        }
    }

    fn name(&self) -> &'static str {
        "script"
    }
}
