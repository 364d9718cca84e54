//! Committing retrieved artifacts to the versioned destination

use crate::config::Config;
use crate::error::{CommitError, RepositoryError};
use crate::repository::{PutOutcome, VersionedRepository};
use crate::types::{ArtifactKind, ArtifactSet};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

/// Timestamp layout in commit messages; millisecond precision keeps two
/// quick commits of the same file distinguishable
const MESSAGE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Result of one successful commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Destination path inside the repository
    pub path: String,
    /// Which artifact was committed
    pub kind: ArtifactKind,
    /// Commit message used
    pub message: String,
    /// Hex SHA-256 of the raw payload (before transfer encoding)
    pub digest: String,
    /// Whether the file was created or replaced
    pub outcome: PutOutcome,
}

/// Writes artifacts to a [`VersionedRepository`] under deterministic paths
///
/// The path depends only on device identity, address and kind, so
/// committing again replaces the previous snapshot instead of adding one.
pub struct ArtifactStore {
    repository: Arc<dyn VersionedRepository>,
    backup_name: String,
    timeout: Duration,
}

impl ArtifactStore {
    /// Create a store writing through `repository`
    pub fn new(repository: Arc<dyn VersionedRepository>, config: &Config) -> Self {
        Self {
            repository,
            backup_name: config.routerboard.backup_name().to_string(),
            timeout: config.run.commit_timeout,
        }
    }

    /// Run the repository's preparation step
    pub async fn prepare(&self) -> Result<(), RepositoryError> {
        self.repository.prepare().await
    }

    /// Name of the underlying repository
    pub fn repository_name(&self) -> &'static str {
        self.repository.name()
    }

    /// `<identity>_<address>/<backup_name>.<ext>`
    pub fn destination_path(&self, artifacts: &ArtifactSet, kind: ArtifactKind) -> String {
        format!(
            "{}/{}.{}",
            artifacts.folder_name(),
            self.backup_name,
            kind.extension()
        )
    }

    /// Commit one artifact of `artifacts`
    pub async fn commit(
        &self,
        artifacts: &ArtifactSet,
        kind: ArtifactKind,
    ) -> Result<CommitReceipt, CommitError> {
        let path = self.destination_path(artifacts, kind);
        let content = encode_payload(artifacts.payload(kind), kind);
        let message = commit_message(kind, Utc::now());

        let result = tokio::time::timeout(
            self.timeout,
            self.repository.put(&path, &content[..], &message),
        )
        .await
        .map_err(|_| RepositoryError::Timeout(self.timeout))
        .and_then(|put| put);

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(cause) => {
                return Err(CommitError {
                    address: artifacts.device_address.clone(),
                    path,
                    cause,
                });
            }
        };

        let digest = artifacts.digest(kind);
        tracing::info!(
            address = %artifacts.device_address,
            path = %path,
            %kind,
            ?outcome,
            digest = %digest,
            repository = self.repository.name(),
            "artifact committed"
        );

        Ok(CommitReceipt {
            path,
            kind,
            message,
            digest,
            outcome,
        })
    }
}

/// Transfer encoding: base64 for the binary backup, the export's bytes untouched
pub(crate) fn encode_payload(payload: &[u8], kind: ArtifactKind) -> Cow<'_, [u8]> {
    match kind {
        ArtifactKind::Binary => Cow::Owned(STANDARD.encode(payload).into_bytes()),
        ArtifactKind::Text => Cow::Borrowed(payload),
    }
}

pub(crate) fn commit_message(kind: ArtifactKind, at: DateTime<Utc>) -> String {
    format!(
        "backup/change time {} type = {}",
        at.format(MESSAGE_TIME_FORMAT),
        kind.encoding()
    )
}
