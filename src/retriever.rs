//! Per-device configuration retrieval
//!
//! [`RemoteRetriever`] asks a device to write its binary backup and its
//! plain-text export, then downloads both through a [`RemoteSession`].

use crate::config::Config;
use crate::error::{RetrievalError, SessionError};
use crate::session::{Endpoint, RemoteSession};
use crate::types::{ArtifactKind, ArtifactSet, DeviceRecord};
use chrono::Utc;
use std::sync::Arc;

/// RouterOS prefixes that mark a command as rejected even though the
/// session itself exited cleanly
const ROUTEROS_ERROR_MARKERS: &[&str] = &[
    "failure:",
    "bad command name",
    "syntax error",
    "expected end of command",
];

/// Fetches both configuration artifacts from one device
///
/// Every remote step is bounded by `routerboard.operation_timeout`. Failures
/// are returned, never retried here.
pub struct RemoteRetriever {
    session: Arc<dyn RemoteSession>,
    config: Arc<Config>,
}

impl RemoteRetriever {
    /// Create a retriever over `session`
    pub fn new(session: Arc<dyn RemoteSession>, config: Arc<Config>) -> Self {
        Self { session, config }
    }

    /// Connection parameters for `device`
    pub fn endpoint(&self, device: &DeviceRecord) -> Endpoint {
        let routerboard = &self.config.routerboard;
        Endpoint {
            host: device.address.clone(),
            port: device.port_or(routerboard.ssh_port),
            user: routerboard.backup_user.clone(),
            credential_ref: device.credential_ref.clone(),
            label: device.folder_name(),
        }
    }

    /// Produce and download the binary backup and the text export of `device`
    pub async fn retrieve(&self, device: &DeviceRecord) -> Result<ArtifactSet, RetrievalError> {
        let endpoint = self.endpoint(device);
        tracing::debug!(
            address = %device.address,
            identity = %device.identity,
            session = self.session.name(),
            "retrieving configuration"
        );

        let (binary_payload, text_payload) = self
            .retrieve_payloads(&endpoint)
            .await
            .map_err(|cause| RetrievalError::new(device.address.clone(), cause))?;

        tracing::info!(
            address = %device.address,
            binary_bytes = binary_payload.len(),
            text_bytes = text_payload.len(),
            "configuration retrieved"
        );

        Ok(ArtifactSet {
            device_identity: device.identity.clone(),
            device_address: device.address.clone(),
            binary_payload,
            text_payload,
            retrieved_at: Utc::now(),
        })
    }

    async fn retrieve_payloads(
        &self,
        endpoint: &Endpoint,
    ) -> Result<(Vec<u8>, Vec<u8>), SessionError> {
        let name = self.config.routerboard.backup_name();

        self.run_step(
            endpoint,
            &format!("/system backup save name={} dont-encrypt=yes", name),
        )
        .await?;
        self.run_step(endpoint, &format!("/export file={}", name))
            .await?;

        let binary = self
            .fetch_step(endpoint, &remote_file(name, ArtifactKind::Binary))
            .await?;
        let text = self
            .fetch_step(endpoint, &remote_file(name, ArtifactKind::Text))
            .await?;

        Ok((binary, text))
    }

    async fn run_step(&self, endpoint: &Endpoint, command: &str) -> Result<(), SessionError> {
        let after = self.config.routerboard.operation_timeout;
        let output = tokio::time::timeout(after, self.session.run_command(endpoint, command))
            .await
            .map_err(|_| SessionError::Timeout {
                operation: command.to_string(),
                after,
            })??;

        check_command_output(command, &output)
    }

    async fn fetch_step(
        &self,
        endpoint: &Endpoint,
        remote_path: &str,
    ) -> Result<Vec<u8>, SessionError> {
        let after = self.config.routerboard.operation_timeout;
        let bytes = tokio::time::timeout(after, self.session.fetch(endpoint, remote_path))
            .await
            .map_err(|_| SessionError::Timeout {
                operation: format!("download {}", remote_path),
                after,
            })??;

        if bytes.is_empty() {
            return Err(SessionError::MissingResource {
                resource: remote_path.to_string(),
                reason: "downloaded file is empty".to_string(),
            });
        }
        Ok(bytes)
    }
}

/// Name of the file the device writes for `kind`
pub(crate) fn remote_file(backup_name: &str, kind: ArtifactKind) -> String {
    format!("{}.{}", backup_name, kind.extension())
}

fn check_command_output(command: &str, output: &str) -> Result<(), SessionError> {
    let rejected = output.lines().map(str::trim).find(|line| {
        let lowered = line.to_ascii_lowercase();
        ROUTEROS_ERROR_MARKERS
            .iter()
            .any(|marker| lowered.starts_with(marker))
    });

    match rejected {
        Some(line) => Err(SessionError::MissingResource {
            resource: command.to_string(),
            reason: line.to_string(),
        }),
        None => Ok(()),
    }
}
