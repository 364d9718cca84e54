//! Retry logic with exponential backoff
//!
//! Retrieval and commit components never retry on their own; the orchestrator
//! wraps their calls in [`with_retry`], which re-runs an operation only while
//! its error is classified as transient by [`IsRetryable`].
//!
//! # Example
//!
//! ```no_run
//! use routerboard_backup::retry::{IsRetryable, with_retry};
//! use routerboard_backup::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! with_retry(&config, "fetch", || async { Ok::<_, MyError>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{CommitError, Error, RepositoryError, RetrievalError, SessionError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (unreachable device, timeouts, gateway errors) return `true`.
/// Permanent failures (bad credentials, missing resources, rejected paths) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for SessionError {
    fn is_retryable(&self) -> bool {
        match self {
            SessionError::Connect(_) | SessionError::Timeout { .. } => true,
            // Wrong key or missing file won't fix itself between attempts
            SessionError::Auth(_) | SessionError::MissingResource { .. } => false,
            SessionError::Tool(_) => false,
        }
    }
}

impl IsRetryable for RetrievalError {
    fn is_retryable(&self) -> bool {
        self.cause.is_retryable()
    }
}

impl IsRetryable for RepositoryError {
    fn is_retryable(&self) -> bool {
        match self {
            RepositoryError::Transport(_) | RepositoryError::Timeout(_) => true,
            // Rate limiting and server-side failures
            RepositoryError::Status { status, .. } => *status == 429 || *status >= 500,
            RepositoryError::Io(e) => is_transient_io(e),
            RepositoryError::Rejected(_) => false,
        }
    }
}

impl IsRetryable for CommitError {
    fn is_retryable(&self) -> bool {
        self.cause.is_retryable()
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => is_transient_io(e),
            Error::Retrieval(e) => e.is_retryable(),
            Error::Commit(e) => e.is_retryable(),
            Error::Repository(e) => e.is_retryable(),
            Error::InventoryUnavailable(_) => true,
            Error::Config { .. }
            | Error::Database(_)
            | Error::Sqlx(_)
            | Error::DeviceNotFound(_)
            | Error::Notification(_)
            | Error::Serialization(_)
            | Error::ExternalTool(_)
            | Error::Other(_) => false,
        }
    }
}

fn is_transient_io(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::Interrupted
    )
}

/// Execute an async operation with exponential backoff retry logic
///
/// `operation_name` only labels log lines. Returns the successful result or
/// the last error once retries are exhausted or a permanent error occurs.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    operation = operation_name,
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tokio::time::sleep(jittered_delay).await;

                delay = next_delay(delay, config);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(
                        operation = operation_name,
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(
                        operation = operation_name,
                        error = %e,
                        "Operation failed with non-retryable error"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Grow `delay` by the backoff multiplier, capped at `max_delay`
///
/// Products that are not a representable duration (negative, NaN, overflow)
/// fall back to the cap instead of panicking.
fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::try_from_secs_f64(jittered_secs).unwrap_or(delay)
}
