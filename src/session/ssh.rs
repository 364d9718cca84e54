//! Session backed by the system `ssh` and `scp` binaries

use super::{Endpoint, RemoteSession};
use crate::config::RouterBoardConfig;
use crate::error::SessionError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

/// Exit status OpenSSH uses for its own (non-remote) failures
const SSH_FAILURE_STATUS: i32 = 255;

/// Remote session using OpenSSH client binaries
///
/// Every call spawns a fresh `ssh`/`scp` process in batch mode, so a missing
/// key never blocks on a password prompt. Processes are killed when the
/// returned future is dropped, which lets callers bound a call with
/// `tokio::time::timeout`.
///
/// Downloads land in `work_dir/<endpoint label>/`; the file and then the
/// emptied directory are removed after being read.
#[derive(Debug, Clone)]
pub struct SshSession {
    ssh_path: PathBuf,
    scp_path: PathBuf,
    work_dir: PathBuf,
    connect_timeout: Duration,
    strict_host_key_checking: String,
}

impl SshSession {
    /// Build a session with explicit binary paths and defaults for the rest
    pub fn new(ssh_path: PathBuf, scp_path: PathBuf, work_dir: PathBuf) -> Self {
        let defaults = RouterBoardConfig::default();
        Self {
            ssh_path,
            scp_path,
            work_dir,
            connect_timeout: defaults.connect_timeout,
            strict_host_key_checking: defaults.strict_host_key_checking,
        }
    }

    /// Build a session from configuration, locating binaries on `PATH` when
    /// no explicit path is configured
    ///
    /// # Errors
    ///
    /// [`crate::Error::ExternalTool`] when `ssh` or `scp` cannot be found.
    pub fn from_config(config: &RouterBoardConfig) -> crate::Result<Self> {
        let ssh_path = resolve_binary(config.ssh_path.as_deref(), "ssh")?;
        let scp_path = resolve_binary(config.scp_path.as_deref(), "scp")?;

        Ok(Self {
            ssh_path,
            scp_path,
            work_dir: config.work_dir.clone(),
            connect_timeout: config.connect_timeout,
            strict_host_key_checking: config.strict_host_key_checking.clone(),
        })
    }

    /// Options shared by `ssh` and `scp`
    fn common_args(&self, endpoint: &Endpoint) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            format!("StrictHostKeyChecking={}", self.strict_host_key_checking),
        ];
        if !endpoint.credential_ref.is_empty() {
            args.push("-i".to_string());
            args.push(endpoint.credential_ref.clone());
        }
        args
    }

    fn ssh_args(&self, endpoint: &Endpoint, command: &str) -> Vec<String> {
        let mut args = self.common_args(endpoint);
        args.push("-p".to_string());
        args.push(endpoint.port.to_string());
        args.push(format!("{}@{}", endpoint.user, endpoint.host));
        args.push(command.to_string());
        args
    }

    fn scp_args(&self, endpoint: &Endpoint, remote_path: &str, local_path: &Path) -> Vec<String> {
        let mut args = self.common_args(endpoint);
        args.push("-q".to_string());
        args.push("-P".to_string());
        args.push(endpoint.port.to_string());

        // scp needs IPv6 literals bracketed to find the path separator
        let host = if endpoint.host.contains(':') {
            format!("[{}]", endpoint.host)
        } else {
            endpoint.host.clone()
        };
        args.push(format!("{}@{}:{}", endpoint.user, host, remote_path));
        args.push(local_path.display().to_string());
        args
    }

    fn scratch_dir(&self, endpoint: &Endpoint) -> PathBuf {
        self.work_dir.join(&endpoint.label)
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn run_command(
        &self,
        endpoint: &Endpoint,
        command: &str,
    ) -> Result<String, SessionError> {
        tracing::debug!(%endpoint, command, "running remote command");

        let output = Command::new(&self.ssh_path)
            .args(self.ssh_args(endpoint, command))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SessionError::Tool(format!("failed to execute ssh: {}", e)))?;

        if !output.status.success() {
            return Err(failure_from_output(command, &output));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn fetch(&self, endpoint: &Endpoint, remote_path: &str) -> Result<Vec<u8>, SessionError> {
        let dir = self.scratch_dir(endpoint);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            SessionError::Tool(format!("failed to create {}: {}", dir.display(), e))
        })?;

        let file_name = Path::new(remote_path)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| remote_path.into());
        let local_path = dir.join(file_name);

        tracing::debug!(%endpoint, remote_path, local = %local_path.display(), "downloading");

        let output = Command::new(&self.scp_path)
            .args(self.scp_args(endpoint, remote_path, &local_path))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SessionError::Tool(format!("failed to execute scp: {}", e)))?;

        if !output.status.success() {
            return Err(failure_from_output(remote_path, &output));
        }

        let bytes = match tokio::fs::read(&local_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::MissingResource {
                    resource: remote_path.to_string(),
                    reason: "transfer produced no file".to_string(),
                });
            }
            Err(e) => {
                return Err(SessionError::Tool(format!(
                    "failed to read {}: {}",
                    local_path.display(),
                    e
                )));
            }
        };

        if let Err(e) = tokio::fs::remove_file(&local_path).await {
            tracing::warn!(
                path = %local_path.display(),
                error = %e,
                "failed to remove scratch file"
            );
        }
        // Only succeeds once the directory is empty
        let _ = tokio::fs::remove_dir(&dir).await;

        Ok(bytes)
    }

    fn name(&self) -> &'static str {
        "ssh"
    }
}

fn resolve_binary(configured: Option<&Path>, name: &str) -> crate::Result<PathBuf> {
    match configured {
        Some(path) => Ok(path.to_path_buf()),
        None => which::which(name)
            .map_err(|e| crate::Error::ExternalTool(format!("{} not found in PATH: {}", name, e))),
    }
}

fn failure_from_output(resource: &str, output: &Output) -> SessionError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    classify_failure(resource, output.status.code(), stderr.trim())
}

/// Map an OpenSSH exit status and stderr onto a [`SessionError`]
pub(crate) fn classify_failure(resource: &str, code: Option<i32>, stderr: &str) -> SessionError {
    let lowered = stderr.to_ascii_lowercase();

    if lowered.contains("permission denied") || lowered.contains("authentication") {
        return SessionError::Auth(stderr.to_string());
    }
    if lowered.contains("no such file") || lowered.contains("not found") {
        return SessionError::MissingResource {
            resource: resource.to_string(),
            reason: stderr.to_string(),
        };
    }

    match code {
        Some(SSH_FAILURE_STATUS) => SessionError::Connect(stderr.to_string()),
        Some(code) => SessionError::Tool(format!("exit status {}: {}", code, stderr)),
        None => SessionError::Tool(format!("terminated by signal: {}", stderr)),
    }
}
