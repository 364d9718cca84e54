//! Versioned destinations for configuration artifacts
//!
//! The store writes through the [`VersionedRepository`] trait: a
//! path-addressed put with a commit message. Which implementation is used
//! is decided by the `target` section of the configuration:
//!
//! - [`GitLabRepository`]: files in a GitLab project, via the REST API
//! - [`FilesystemRepository`]: a local directory tree with a JSON-lines
//!   commit log
//!
//! ```no_run
//! use routerboard_backup::config::Config;
//! use routerboard_backup::repository::build_repository;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let repository = build_repository(&config)?;
//! repository.prepare().await?;
//! repository
//!     .put("core_10.0.0.1/backup.rsc", b"/ip address\n", "manual upload")
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod filesystem;
mod gitlab;

pub use filesystem::{CommitLogEntry, FilesystemRepository};
pub use gitlab::GitLabRepository;

use crate::config::{BackupTarget, Config};
use crate::error::RepositoryError;
use async_trait::async_trait;
use std::sync::Arc;

/// What a successful put did to the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The path did not exist before
    Created,
    /// An existing file at the path was replaced
    Updated,
}

/// Path-addressed destination with commit messages
///
/// `put` overwrites: writing the same path twice leaves one file holding the
/// latest content. Content is stored byte for byte. Implementations do not
/// retry.
#[async_trait]
pub trait VersionedRepository: Send + Sync {
    /// Make sure the destination exists, creating it when allowed
    ///
    /// Called once before a run. Implementations that need no preparation
    /// return `Ok(())`.
    async fn prepare(&self) -> Result<(), RepositoryError>;

    /// Store `content` at `path` with `message`
    async fn put(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<PutOutcome, RepositoryError>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Build the repository selected by `config.target`
///
/// # Errors
///
/// [`crate::Error::Config`] when the target section cannot be turned into a
/// client (for example an unparsable GitLab URL).
pub fn build_repository(config: &Config) -> crate::Result<Arc<dyn VersionedRepository>> {
    match &config.target {
        BackupTarget::GitLab(gitlab) => Ok(Arc::new(GitLabRepository::new(gitlab)?)),
        BackupTarget::Filesystem(fs) => Ok(Arc::new(FilesystemRepository::new(fs.root.clone()))),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilesystemConfig, GitLabConfig};

    #[test]
    fn default_target_is_filesystem() {
        let repository = build_repository(&Config::default()).unwrap();
        assert_eq!(repository.name(), "filesystem");
    }

    #[test]
    fn gitlab_target_builds_gitlab_client() {
        let config = Config {
            target: BackupTarget::GitLab(GitLabConfig {
                url: "https://gitlab.example.com".into(),
                token: "secret".into(),
                project_name: "routers".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(build_repository(&config).unwrap().name(), "gitlab");
    }

    #[test]
    fn unparsable_gitlab_url_is_config_error() {
        let config = Config {
            target: BackupTarget::GitLab(GitLabConfig {
                url: "not a url".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(matches!(
            build_repository(&config),
            Err(crate::Error::Config { .. })
        ));
    }

    #[test]
    fn filesystem_root_is_taken_from_config() {
        let config = Config {
            target: BackupTarget::Filesystem(FilesystemConfig {
                root: "/srv/archive".into(),
            }),
            ..Default::default()
        };
        assert_eq!(build_repository(&config).unwrap().name(), "filesystem");
    }
}
