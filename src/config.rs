//! Configuration types for routerboard-backup
//!
//! A [`Config`] is built once (usually from TOML via [`Config::load`]) and
//! handed to each component at construction behind an `Arc`. Nothing reads
//! configuration from ambient state.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Main configuration for the backup orchestrator
///
/// Sections:
/// - [`routerboard`](RouterBoardConfig): how devices are reached over SSH
/// - [`target`](BackupTarget): where artifacts are committed
/// - [`database`](DatabaseConfig): device inventory location
/// - [`notifications`](NotificationConfig): failure reporting
/// - [`run`](RunConfig): concurrency and retry policy
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Device access settings
    #[serde(default)]
    pub routerboard: RouterBoardConfig,

    /// Backup destination
    #[serde(default)]
    pub target: BackupTarget,

    /// Inventory database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Failure notification settings
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Run scheduling settings
    #[serde(default)]
    pub run: RunConfig,
}

impl Config {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).map_err(|e| Error::Config {
            message: format!("TOML parse error: {}", e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Reject settings that would make every run fail before it starts
    pub fn validate(&self) -> Result<()> {
        if self.run.max_concurrent_devices == 0 {
            return Err(Error::config(
                "must be at least 1",
                "run.max_concurrent_devices",
            ));
        }
        let multiplier = self.run.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(Error::config(
                "must be a finite number of at least 1.0",
                "run.retry.backoff_multiplier",
            ));
        }
        if self.routerboard.backup_user.trim().is_empty() {
            return Err(Error::config(
                "must not be empty",
                "routerboard.backup_user",
            ));
        }
        if let BackupTarget::GitLab(gitlab) = &self.target {
            if gitlab.project_name.trim().is_empty() {
                return Err(Error::config("must not be empty", "target.project_name"));
            }
            url::Url::parse(&gitlab.url).map_err(|e| {
                Error::config(format!("invalid URL: {}", e), "target.url")
            })?;
        }
        Ok(())
    }
}

/// Device access configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouterBoardConfig {
    /// SSH port used when a device record has none (default: 22)
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Login user on the devices; also the default backup file name (default: "backup")
    #[serde(default = "default_backup_user")]
    pub backup_user: String,

    /// Base name of the generated backup files (default: the backup user)
    #[serde(default)]
    pub backup_name: Option<String>,

    /// Local scratch directory for downloads (default: system temp dir)
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Timeout for each remote step: command or download (default: 60 seconds)
    #[serde(default = "default_operation_timeout", with = "duration_serde")]
    pub operation_timeout: Duration,

    /// SSH connect timeout passed to the client (default: 15 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Value for the StrictHostKeyChecking option (default: "accept-new")
    #[serde(default = "default_host_key_checking")]
    pub strict_host_key_checking: String,

    /// Path to the ssh executable (auto-detected if None)
    #[serde(default)]
    pub ssh_path: Option<PathBuf>,

    /// Path to the scp executable (auto-detected if None)
    #[serde(default)]
    pub scp_path: Option<PathBuf>,
}

impl RouterBoardConfig {
    /// File base name for generated backups
    pub fn backup_name(&self) -> &str {
        self.backup_name.as_deref().unwrap_or(&self.backup_user)
    }
}

impl Default for RouterBoardConfig {
    fn default() -> Self {
        Self {
            ssh_port: default_ssh_port(),
            backup_user: default_backup_user(),
            backup_name: None,
            work_dir: default_work_dir(),
            operation_timeout: default_operation_timeout(),
            connect_timeout: default_connect_timeout(),
            strict_host_key_checking: default_host_key_checking(),
            ssh_path: None,
            scp_path: None,
        }
    }
}

/// Backup destination, selected by the `kind` field
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackupTarget {
    /// GitLab repository through the REST API
    #[serde(rename = "gitlab")]
    GitLab(GitLabConfig),
    /// Local directory tree with a commit log
    Filesystem(FilesystemConfig),
}

impl Default for BackupTarget {
    fn default() -> Self {
        BackupTarget::Filesystem(FilesystemConfig::default())
    }
}

/// GitLab destination configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GitLabConfig {
    /// Base URL of the GitLab instance (e.g. "https://gitlab.example.com")
    pub url: String,

    /// Personal or project access token
    pub token: String,

    /// Project holding the backups; created when missing
    pub project_name: String,

    /// Optional group the project lives in; created when missing
    #[serde(default)]
    pub group_name: Option<String>,

    /// Branch commits go to (default: "master")
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Timeout for each API request (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            project_name: String::new(),
            group_name: None,
            branch: default_branch(),
            timeout: default_request_timeout(),
        }
    }
}

/// Filesystem destination configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilesystemConfig {
    /// Root directory of the archive (default: "./backups")
    #[serde(default = "default_archive_root")]
    pub root: PathBuf,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            root: default_archive_root(),
        }
    }
}

/// Inventory database configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path (default: "./routerboard-backup.db")
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Notification configuration (webhooks and scripts)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Webhook configurations
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,

    /// Script configurations
    #[serde(default)]
    pub scripts: Vec<ScriptConfig>,
}

/// Webhook configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// URL to POST to
    pub url: String,

    /// Optional authentication header value
    #[serde(default)]
    pub auth_header: Option<String>,

    /// Timeout for webhook requests (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

/// Script execution configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Path to script/executable
    pub path: PathBuf,

    /// Timeout for script execution (default: 5 minutes)
    #[serde(default = "default_script_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

/// Run scheduling configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    /// Maximum devices processed at once (default: 4)
    #[serde(default = "default_max_concurrent_devices")]
    pub max_concurrent_devices: usize,

    /// Timeout for each artifact commit (default: 120 seconds)
    #[serde(default = "default_commit_timeout", with = "duration_serde")]
    pub commit_timeout: Duration,

    /// Retry policy for transient retrieval and commit failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_concurrent_devices: default_max_concurrent_devices(),
            commit_timeout: default_commit_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try (default: 2)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 2 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl RetryConfig {
    /// A policy that never retries
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

// Default value functions
fn default_ssh_port() -> u16 {
    22
}

fn default_backup_user() -> String {
    "backup".to_string()
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("routerboard-backup")
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_host_key_checking() -> String {
    "accept-new".to_string()
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_script_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_archive_root() -> PathBuf {
    PathBuf::from("backups")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("routerboard-backup.db")
}

fn default_max_concurrent_devices() -> usize {
    4
}

fn default_commit_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
