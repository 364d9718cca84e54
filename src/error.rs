//! Error types for routerboard-backup
//!
//! This module provides the error taxonomy used throughout the library:
//! - [`Error`] - the crate-wide error, returned by collaborators and startup code
//! - [`RetrievalError`] - a failed per-device retrieval (connect/auth/missing resource/timeout)
//! - [`CommitError`] - a failed artifact commit (transport/destination)
//! - [`DatabaseError`] - inventory database failures
//!
//! Per-device errors never escape a run: the orchestrator turns them into
//! [`RunOutcome`](crate::types::RunOutcome)s.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for routerboard-backup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for routerboard-backup
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "target.gitlab.token")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// No device list could be obtained from the inventory
    #[error("device inventory unavailable: {0}")]
    InventoryUnavailable(String),

    /// Device address is not present in the inventory
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Retrieving artifacts from a device failed
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    /// Committing an artifact to the versioned repository failed
    #[error(transparent)]
    Commit(#[from] CommitError),

    /// Versioned repository error outside of a commit (e.g. project preparation)
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Delivering a failure notification failed
    #[error("notification failed: {0}")]
    Notification(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool execution failed (ssh, scp, notification scripts)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Constraint violation (e.g., duplicate device address)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Failure of a single remote-session step
///
/// Produced by [`RemoteSession`](crate::session::RemoteSession) implementations
/// and carried as the cause of a [`RetrievalError`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// Could not reach the device (refused, unreachable, DNS, handshake)
    #[error("connection failed: {0}")]
    Connect(String),

    /// The device rejected the credentials
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A requested resource does not exist on the device, or came back empty
    #[error("missing resource {resource}: {reason}")]
    MissingResource {
        /// Remote file or command that could not be satisfied
        resource: String,
        /// Reason reported by the device or the transfer tool
        reason: String,
    },

    /// The step did not finish within the configured timeout
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The step that timed out (e.g. "download config.backup")
        operation: String,
        /// The timeout that elapsed
        after: Duration,
    },

    /// The transfer tool could not be started or failed locally
    #[error("session tool error: {0}")]
    Tool(String),
}

/// Retrieval from one device failed
#[derive(Debug, Error)]
#[error("retrieval from {address} failed: {cause}")]
pub struct RetrievalError {
    /// Address of the device the retrieval targeted
    pub address: String,
    /// Underlying session failure
    pub cause: SessionError,
}

impl RetrievalError {
    /// Create a retrieval error for `address`
    pub fn new(address: impl Into<String>, cause: SessionError) -> Self {
        Self {
            address: address.into(),
            cause,
        }
    }

    /// Whether the underlying cause was a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self.cause, SessionError::Timeout { .. })
    }
}

/// Failure of a versioned repository primitive
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The request never produced a response (DNS, refused, reset, TLS)
    #[error("transport error: {0}")]
    Transport(String),

    /// The repository answered with a non-success status
    #[error("repository returned status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        body: String,
    },

    /// The call did not finish within the configured timeout
    #[error("repository call timed out after {0:?}")]
    Timeout(Duration),

    /// Local filesystem failure (filesystem target)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The destination refused the request for a non-transport reason
    #[error("rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for RepositoryError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => RepositoryError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None => RepositoryError::Transport(e.to_string()),
        }
    }
}

/// Committing one artifact failed
#[derive(Debug, Error)]
#[error("commit of {path} for {address} failed: {cause}")]
pub struct CommitError {
    /// Address of the device the artifact belongs to
    pub address: String,
    /// Destination path within the repository
    pub path: String,
    /// Underlying repository failure
    pub cause: RepositoryError,
}
