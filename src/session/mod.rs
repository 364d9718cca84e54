//! Remote shell sessions to devices
//!
//! The retriever talks to devices only through the [`RemoteSession`] trait:
//! run a command, fetch a file. The protocol underneath is opaque.
//!
//! - [`SshSession`]: drives the system `ssh` and `scp` binaries
//!
//! ```no_run
//! use routerboard_backup::session::{Endpoint, RemoteSession, SshSession};
//! use routerboard_backup::config::RouterBoardConfig;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let session = SshSession::from_config(&RouterBoardConfig::default())?;
//! let endpoint = Endpoint {
//!     host: "10.0.0.1".into(),
//!     port: 22,
//!     user: "backup".into(),
//!     credential_ref: String::new(),
//!     label: "core_10.0.0.1".into(),
//! };
//! session.run_command(&endpoint, "/export file=backup").await?;
//! let script = session.fetch(&endpoint, "backup.rsc").await?;
//! println!("{} bytes", script.len());
//! # Ok(())
//! # }
//! ```

mod ssh;

pub use ssh::SshSession;

use crate::error::SessionError;
use async_trait::async_trait;

/// Where and as whom to open a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP address
    pub host: String,
    /// SSH port
    pub port: u16,
    /// Login user
    pub user: String,
    /// Credential reference (private key path); empty for client defaults
    pub credential_ref: String,
    /// Stable per-device label, used for local scratch paths
    pub label: String,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Credentialed command/fetch primitive
///
/// Implementations classify failures into [`SessionError`] variants and do
/// not retry. Callers bound each call with their own timeout, so
/// implementations must tolerate being dropped mid-call.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run `command` on the device, returning its standard output
    async fn run_command(&self, endpoint: &Endpoint, command: &str)
    -> Result<String, SessionError>;

    /// Download `remote_path` from the device
    async fn fetch(&self, endpoint: &Endpoint, remote_path: &str) -> Result<Vec<u8>, SessionError>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
