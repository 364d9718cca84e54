//! # routerboard-backup
//!
//! Fleet backup orchestrator for RouterBoard configuration snapshots.
//!
//! For every device in an SQLite inventory the orchestrator asks the router
//! to produce a binary backup and a text export, downloads both over SSH,
//! commits them to a versioned destination (a GitLab project or a local
//! directory tree) and records the time of the last successful backup.
//! Failures are collected per device and reported through webhooks or
//! scripts once the run is over.
//!
//! ## Design Philosophy
//!
//! - **Isolated devices** - one unreachable router never stops the others
//! - **Pluggable seams** - inventory, remote session, repository and notifier are traits
//! - **Library-first** - no CLI, embed it in a timer or a service
//! - **Event-driven** - consumers subscribe to run events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use routerboard_backup::{BackupOrchestrator, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(std::path::Path::new("backup.toml")).await?;
//!     let orchestrator = BackupOrchestrator::from_config(config).await?;
//!
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = orchestrator.run_fleet().await;
//!     for failure in summary.failures() {
//!         eprintln!("{} {}: {}", failure.device_address, failure.status, failure.detail);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Device inventory abstraction
pub mod inventory;
/// Failure notification sinks
pub mod notify;
/// Run orchestration (decomposed into focused submodules)
pub mod orchestrator;
/// Versioned destinations for artifacts
pub mod repository;
/// Two-artifact retrieval protocol
pub mod retriever;
/// Retry logic with exponential backoff
pub mod retry;
/// Remote command and download primitives
pub mod session;
/// Artifact commit paths and messages
pub mod store;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{BackupTarget, Config, GitLabConfig, RetryConfig};
pub use db::Database;
pub use error::{CommitError, Error, RepositoryError, Result, RetrievalError, SessionError};
pub use inventory::DeviceInventory;
pub use notify::{NotificationSink, Notifiers};
pub use orchestrator::{BackupOrchestrator, Collaborators};
pub use repository::{FilesystemRepository, GitLabRepository, VersionedRepository};
pub use session::{Endpoint, RemoteSession, SshSession};
pub use types::{
    ArtifactKind, ArtifactSet, DeviceRecord, Event, FailureKind, OutcomeStatus, RunId,
    RunOutcome, RunSummary,
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancel `token` when a termination signal arrives.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Abort the returned handle once the guarded work is over.
pub fn cancel_on_signal(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                tracing::info!("cancelling backup run, in-flight devices will finish");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

/// Back up the whole fleet, stopping dispatch on SIGINT/SIGTERM.
///
/// Devices already in flight when the signal arrives still finish, and the
/// returned summary is marked `cancelled`.
///
/// # Example
///
/// ```no_run
/// use routerboard_backup::{BackupOrchestrator, Config, run_fleet_until_signal};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::load(std::path::Path::new("backup.toml")).await?;
///     let orchestrator = BackupOrchestrator::from_config(config).await?;
///
///     let summary = run_fleet_until_signal(&orchestrator).await;
///     std::process::exit(if summary.all_succeeded() { 0 } else { 1 });
/// }
/// ```
pub async fn run_fleet_until_signal(orchestrator: &BackupOrchestrator) -> RunSummary {
    let watcher = cancel_on_signal(orchestrator.cancellation_token());
    let summary = orchestrator.run_fleet().await;
    watcher.abort();
    summary
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGTERM handler, waiting for SIGINT only"
            );
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGINT handler, waiting for SIGTERM only"
            );
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
