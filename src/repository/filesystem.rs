//! Local directory repository with a JSON-lines commit log

use super::{PutOutcome, VersionedRepository};
use crate::error::RepositoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Commit log file name, relative to the repository root
pub const COMMIT_LOG: &str = ".commit-log.jsonl";

/// One line of the commit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitLogEntry {
    /// Path relative to the root
    pub path: String,
    /// Commit message
    pub message: String,
    /// Hex SHA-256 of the stored content
    pub sha256: String,
    /// When the file was written
    pub committed_at: DateTime<Utc>,
}

/// Archive rooted at a local directory
///
/// Files are replaced atomically (written to a `.tmp` sibling, then renamed),
/// and every put appends one [`CommitLogEntry`] to [`COMMIT_LOG`].
pub struct FilesystemRepository {
    root: PathBuf,
    // Serializes log appends so concurrent puts never interleave lines
    log_lock: Mutex<()>,
}

impl FilesystemRepository {
    /// Create a repository rooted at `root`
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            log_lock: Mutex::new(()),
        }
    }

    /// Root directory of the archive
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All commit log entries, oldest first
    pub async fn history(&self) -> Result<Vec<CommitLogEntry>, RepositoryError> {
        let contents = match tokio::fs::read_to_string(self.root.join(COMMIT_LOG)).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line).map_err(|e| {
                    RepositoryError::Rejected(format!(
                        "corrupt commit log line {}: {}",
                        index + 1,
                        e
                    ))
                })
            })
            .collect()
    }

    /// Absolute location of `path`, refusing anything that escapes the root
    fn resolve(&self, path: &str) -> Result<PathBuf, RepositoryError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if path.is_empty() || escapes || path == COMMIT_LOG {
            return Err(RepositoryError::Rejected(format!(
                "invalid repository path: {:?}",
                path
            )));
        }
        Ok(self.root.join(relative))
    }

    async fn append_log(&self, entry: &CommitLogEntry) -> Result<(), RepositoryError> {
        let mut line = serde_json::to_string(entry)
            .map_err(|e| RepositoryError::Rejected(format!("unserializable log entry: {}", e)))?;
        line.push('\n');

        let _guard = self.log_lock.lock().await;
        let mut log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(COMMIT_LOG))
            .await?;
        log.write_all(line.as_bytes()).await?;
        log.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl VersionedRepository for FilesystemRepository {
    async fn prepare(&self) -> Result<(), RepositoryError> {
        tokio::fs::create_dir_all(&self.root).await?;
        tracing::info!(root = %self.root.display(), "filesystem repository ready");
        Ok(())
    }

    async fn put(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<PutOutcome, RepositoryError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let outcome = if tokio::fs::try_exists(&target).await? {
            PutOutcome::Updated
        } else {
            PutOutcome::Created
        };

        let mut tmp_name = target.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = target.with_file_name(tmp_name);
        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        self.append_log(&CommitLogEntry {
            path: path.to_string(),
            message: message.to_string(),
            sha256: hex::encode(Sha256::digest(content)),
            committed_at: Utc::now(),
        })
        .await?;

        tracing::debug!(path, ?outcome, "file written to archive");
        Ok(outcome)
    }

    fn name(&self) -> &'static str {
        "filesystem"
    }
}
