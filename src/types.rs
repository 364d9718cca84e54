//! Core types for routerboard-backup

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Unique identifier for one backup run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub uuid::Uuid);

impl RunId {
    /// Create a fresh random run ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One device as supplied by the inventory
///
/// Identity and address together form the natural key used for artifact paths.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Opaque device name (e.g. the RouterOS identity)
    pub identity: String,
    /// Host name or IP address
    pub address: String,
    /// SSH port; the configured default applies when unset
    pub port: Option<u16>,
    /// Credential reference handed to the remote session (SSH key path)
    pub credential_ref: String,
}

impl DeviceRecord {
    /// Create a record with no explicit port and no credential reference
    pub fn new(identity: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            address: address.into(),
            port: None,
            credential_ref: String::new(),
        }
    }

    /// Port to connect to, falling back to `default_port`
    pub fn port_or(&self, default_port: u16) -> u16 {
        self.port.unwrap_or(default_port)
    }

    /// Directory name derived from the natural key: `<identity>_<address>`
    pub fn folder_name(&self) -> String {
        folder_name(&self.identity, &self.address)
    }
}

/// `<identity>_<address>` with path separators percent-encoded
///
/// `_` is also encoded in the address, so the last `_` always separates the
/// two parts and distinct devices never share a folder.
pub(crate) fn folder_name(identity: &str, address: &str) -> String {
    format!(
        "{}_{}",
        escape_component(identity, &['%', '/', '\\']),
        escape_component(address, &['%', '/', '\\', '_'])
    )
}

fn escape_component(raw: &str, reserved: &[char]) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if reserved.contains(&c) {
            escaped.push_str(&format!("%{:02X}", c as u32));
        } else {
            escaped.push(c);
        }
    }
    escaped
}

/// The two artifact forms retrieved from every device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Binary backup blob (`.backup`)
    Binary,
    /// Plain-text script export (`.rsc`)
    Text,
}

impl ArtifactKind {
    /// Both kinds, in commit order
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Binary, ArtifactKind::Text];

    /// File extension used on the device and in the repository
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Binary => "backup",
            ArtifactKind::Text => "rsc",
        }
    }

    /// Transfer encoding label recorded in commit messages
    pub fn encoding(&self) -> &'static str {
        match self {
            ArtifactKind::Binary => "base64",
            ArtifactKind::Text => "text",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ArtifactKind::Binary => "binary",
            ArtifactKind::Text => "text",
        })
    }
}

/// Artifacts retrieved from one device in one run
#[derive(Clone, Debug)]
pub struct ArtifactSet {
    /// Identity of the source device
    pub device_identity: String,
    /// Address of the source device
    pub device_address: String,
    /// Binary backup blob
    pub binary_payload: Vec<u8>,
    /// Plain-text script export
    pub text_payload: Vec<u8>,
    /// When the retrieval finished
    pub retrieved_at: DateTime<Utc>,
}

impl ArtifactSet {
    /// Payload bytes for `kind`
    pub fn payload(&self, kind: ArtifactKind) -> &[u8] {
        match kind {
            ArtifactKind::Binary => &self.binary_payload,
            ArtifactKind::Text => &self.text_payload,
        }
    }

    /// Hex SHA-256 of the payload for `kind`
    pub fn digest(&self, kind: ArtifactKind) -> String {
        hex::encode(Sha256::digest(self.payload(kind)))
    }

    /// Directory name derived from the natural key: `<identity>_<address>`
    pub fn folder_name(&self) -> String {
        folder_name(&self.device_identity, &self.device_address)
    }
}

/// Terminal status of one device within one run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Both artifacts retrieved and committed
    Success,
    /// Nothing could be retrieved (or the device could not be resolved)
    RetrievalFailed,
    /// Retrieved, but at least one artifact could not be committed
    CommitFailed,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::RetrievalFailed => "retrieval_failed",
            OutcomeStatus::CommitFailed => "commit_failed",
        })
    }
}

/// Error class attached to a failed outcome
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No device list could be obtained at all
    InventoryUnavailable,
    /// The requested address is not in the inventory
    DeviceNotFound,
    /// Connect, authentication, missing resource or timeout
    RetrievalError,
    /// Repository transport or destination failure
    CommitFailed,
}

/// Outcome recorded for one device
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Device address (empty for inventory-level failures)
    pub device_address: String,
    /// Device identity when the device was resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_identity: Option<String>,
    /// Terminal status
    pub status: OutcomeStatus,
    /// Error class for failed outcomes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Human-readable detail
    pub detail: String,
}

impl RunOutcome {
    /// Successful backup of `device`
    pub fn success(device: &DeviceRecord, detail: impl Into<String>) -> Self {
        Self {
            device_address: device.address.clone(),
            device_identity: Some(device.identity.clone()),
            status: OutcomeStatus::Success,
            failure: None,
            detail: detail.into(),
        }
    }

    /// Retrieval failure for a resolved device
    pub fn retrieval_failed(device: &DeviceRecord, detail: impl Into<String>) -> Self {
        Self {
            device_address: device.address.clone(),
            device_identity: Some(device.identity.clone()),
            status: OutcomeStatus::RetrievalFailed,
            failure: Some(FailureKind::RetrievalError),
            detail: detail.into(),
        }
    }

    /// Commit failure for a resolved device
    pub fn commit_failed(device: &DeviceRecord, detail: impl Into<String>) -> Self {
        Self {
            device_address: device.address.clone(),
            device_identity: Some(device.identity.clone()),
            status: OutcomeStatus::CommitFailed,
            failure: Some(FailureKind::CommitFailed),
            detail: detail.into(),
        }
    }

    /// Requested address absent from the inventory
    pub fn unknown_device(address: impl Into<String>) -> Self {
        Self {
            device_address: address.into(),
            device_identity: None,
            status: OutcomeStatus::RetrievalFailed,
            failure: Some(FailureKind::DeviceNotFound),
            detail: "unknown device".to_string(),
        }
    }

    /// No device list (or lookup) available from the inventory
    pub fn inventory_unavailable(address: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            device_address: address.into(),
            device_identity: None,
            status: OutcomeStatus::RetrievalFailed,
            failure: Some(FailureKind::InventoryUnavailable),
            detail: detail.into(),
        }
    }

    /// Whether this outcome is a success
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Result of one run, in inventory order
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identifier
    pub run_id: RunId,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
    /// One outcome per processed device, in inventory order
    pub outcomes: Vec<RunOutcome>,
    /// Whether the run stopped early on cancellation
    pub cancelled: bool,
}

impl RunSummary {
    /// True when every outcome is a success
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(RunOutcome::is_success)
    }

    /// Outcomes that are not successes
    pub fn failures(&self) -> impl Iterator<Item = &RunOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Number of successful devices
    pub fn succeeded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }
}

/// Event emitted during a run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run started
    RunStarted {
        /// Run ID
        run_id: RunId,
        /// Number of devices the run will process
        devices: usize,
    },

    /// Work on a device started
    DeviceStarted {
        /// Run ID
        run_id: RunId,
        /// Device address
        address: String,
    },

    /// A device was backed up successfully
    DeviceBackedUp {
        /// Run ID
        run_id: RunId,
        /// Device address
        address: String,
        /// Device identity
        identity: String,
    },

    /// A device failed
    DeviceFailed {
        /// Run ID
        run_id: RunId,
        /// Device address
        address: String,
        /// Terminal status
        status: OutcomeStatus,
        /// Error detail
        error: String,
    },

    /// The run was cancelled before all devices were dispatched
    RunCancelled {
        /// Run ID
        run_id: RunId,
        /// Devices completed before the cancellation took effect
        completed: usize,
    },

    /// The run finished
    RunCompleted {
        /// Run ID
        run_id: RunId,
        /// Successful devices
        succeeded: usize,
        /// Failed devices
        failed: usize,
    },

    /// The failure notification could not be delivered
    NotificationFailed {
        /// Run ID
        run_id: RunId,
        /// Error message
        error: String,
    },
}

/// Payload sent to webhooks when a run has failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Event type (always "backup_failed")
    pub event: String,

    /// Run that produced the outcomes
    pub run_id: RunId,

    /// Number of failed outcomes
    pub failed: usize,

    /// Total number of outcomes
    pub total: usize,

    /// Full ordered outcome sequence
    pub outcomes: Vec<RunOutcome>,

    /// Timestamp of the notification (Unix timestamp in seconds)
    pub timestamp: i64,
}

impl NotificationPayload {
    /// Build a payload for the outcomes of `run_id`
    pub fn from_outcomes(run_id: RunId, outcomes: &[RunOutcome]) -> Self {
        Self {
            event: "backup_failed".to_string(),
            run_id,
            failed: outcomes.iter().filter(|o| !o.is_success()).count(),
            total: outcomes.len(),
            outcomes: outcomes.to_vec(),
            timestamp: Utc::now().timestamp(),
        }
    }
}
