//! In-memory fakes of the collaborator traits, shared by unit tests.

use crate::config::{Config, RetryConfig};
use crate::error::{DatabaseError, Error, RepositoryError, Result, SessionError};
use crate::inventory::DeviceInventory;
use crate::notify::NotificationSink;
use crate::repository::{PutOutcome, VersionedRepository};
use crate::session::{Endpoint, RemoteSession};
use crate::types::{ArtifactSet, DeviceRecord, RunId, RunOutcome};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{BackupOrchestrator, Collaborators};

/// Config with retries disabled so failure tests don't sleep
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.run.retry = RetryConfig::disabled();
    config
}

/// Artifacts as a device at `address` would produce them
pub(crate) fn sample_artifacts(identity: &str, address: &str) -> ArtifactSet {
    ArtifactSet {
        device_identity: identity.into(),
        device_address: address.into(),
        binary_payload: FakeSession::binary_for(address),
        text_payload: FakeSession::text_for(address),
        retrieved_at: Utc::now(),
    }
}

/// `count` devices named `rb1..` at `10.0.0.1..`
pub(crate) fn devices(count: usize) -> Vec<DeviceRecord> {
    (1..=count)
        .map(|i| DeviceRecord::new(format!("rb{i}"), format!("10.0.0.{i}")))
        .collect()
}

// ---------------------------------------------------------------------------
// Session

/// How the fake device at an address responds
#[derive(Debug, Clone)]
pub(crate) enum SessionBehavior {
    /// Every step succeeds
    Normal,
    /// The first step fails to connect
    ConnectFailure,
    /// The first `n` connects fail, later ones succeed
    ConnectFailureTimes(u32),
    /// The first step is rejected by authentication
    AuthFailure,
    /// The text export downloads as zero bytes
    EmptyText,
    /// Commands print this output
    CommandOutput(String),
    /// The first step never returns
    Hang,
    /// The first step panics
    Panic,
}

/// Scriptable [`RemoteSession`] recording every call
pub(crate) struct FakeSession {
    behaviors: Mutex<HashMap<String, SessionBehavior>>,
    calls: Mutex<Vec<(String, String)>>,
    delay: Mutex<Option<Duration>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeSession {
    pub(crate) fn new() -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub(crate) fn binary_for(address: &str) -> Vec<u8> {
        let mut bytes = vec![0x00, 0xff, 0x4d, 0x54];
        bytes.extend_from_slice(address.as_bytes());
        bytes
    }

    pub(crate) fn text_for(address: &str) -> Vec<u8> {
        format!("# exported from {address}\n/ip address\nadd address={address}/24\n").into_bytes()
    }

    pub(crate) fn set_behavior(&self, address: &str, behavior: SessionBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(address.to_string(), behavior);
    }

    /// Make every command take `delay`
    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn calls_for(&self, address: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(host, _)| host == address)
            .map(|(_, call)| call.clone())
            .collect()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of commands that were running at the same time
    pub(crate) fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn behavior(&self, address: &str) -> SessionBehavior {
        self.behaviors
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or(SessionBehavior::Normal)
    }

    fn record(&self, endpoint: &Endpoint, call: String) {
        self.calls
            .lock()
            .unwrap()
            .push((endpoint.host.clone(), call));
    }

    /// Behavior for a connecting step, consuming one `ConnectFailureTimes` failure
    fn connect(&self, endpoint: &Endpoint) -> std::result::Result<SessionBehavior, SessionError> {
        let mut behaviors = self.behaviors.lock().unwrap();
        let behavior = behaviors
            .get(&endpoint.host)
            .cloned()
            .unwrap_or(SessionBehavior::Normal);
        match behavior {
            SessionBehavior::ConnectFailure => Err(SessionError::Connect(format!(
                "ssh: connect to host {} port {}: Connection refused",
                endpoint.host, endpoint.port
            ))),
            SessionBehavior::ConnectFailureTimes(n) if n > 0 => {
                behaviors.insert(
                    endpoint.host.clone(),
                    SessionBehavior::ConnectFailureTimes(n - 1),
                );
                Err(SessionError::Connect("Connection timed out".into()))
            }
            SessionBehavior::AuthFailure => {
                Err(SessionError::Auth("Permission denied (publickey).".into()))
            }
            other => Ok(other),
        }
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn run_command(
        &self,
        endpoint: &Endpoint,
        command: &str,
    ) -> std::result::Result<String, SessionError> {
        self.record(endpoint, format!("run {command}"));
        let behavior = self.connect(endpoint)?;

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        match behavior {
            SessionBehavior::Hang => std::future::pending().await,
            SessionBehavior::Panic => panic!("session exploded for {}", endpoint.host),
            SessionBehavior::CommandOutput(output) => Ok(output),
            _ => Ok(String::new()),
        }
    }

    async fn fetch(
        &self,
        endpoint: &Endpoint,
        remote_path: &str,
    ) -> std::result::Result<Vec<u8>, SessionError> {
        self.record(endpoint, format!("fetch {remote_path}"));
        let behavior = self.behavior(&endpoint.host);

        if remote_path.ends_with(".rsc") {
            if matches!(behavior, SessionBehavior::EmptyText) {
                return Ok(Vec::new());
            }
            Ok(Self::text_for(&endpoint.host))
        } else {
            Ok(Self::binary_for(&endpoint.host))
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

// ---------------------------------------------------------------------------
// Inventory

/// In-memory [`DeviceInventory`]
pub(crate) struct FakeInventory {
    devices: Vec<DeviceRecord>,
    unavailable: AtomicBool,
    updates: Mutex<Vec<(String, String)>>,
    failing_updates: Mutex<HashSet<String>>,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
}

impl FakeInventory {
    pub(crate) fn new(devices: Vec<DeviceRecord>) -> Self {
        Self {
            devices,
            unavailable: AtomicBool::new(false),
            updates: Mutex::new(Vec::new()),
            failing_updates: Mutex::new(HashSet::new()),
            cancel_after: Mutex::new(None),
        }
    }

    /// Every call fails as if the database were unreachable
    pub(crate) fn set_unavailable(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }

    /// Identities whose timestamp was updated, in call order
    pub(crate) fn updates(&self) -> Vec<String> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .map(|(identity, _)| identity.clone())
            .collect()
    }

    /// Addresses whose timestamp was updated, in call order
    pub(crate) fn updated_addresses(&self) -> Vec<String> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .map(|(_, address)| address.clone())
            .collect()
    }

    pub(crate) fn fail_update_for(&self, identity: &str) {
        self.failing_updates
            .lock()
            .unwrap()
            .insert(identity.to_string());
    }

    /// Cancel `token` as soon as the `count`-th timestamp update happened
    pub(crate) fn cancel_after_updates(&self, count: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((count, token));
    }

    fn offline() -> Error {
        Error::InventoryUnavailable("database offline".into())
    }
}

#[async_trait]
impl DeviceInventory for FakeInventory {
    async fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Self::offline());
        }
        Ok(self.devices.clone())
    }

    async fn get_device(&self, address: &str) -> Result<DeviceRecord> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Self::offline());
        }
        self.devices
            .iter()
            .find(|d| d.address == address)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound(address.to_string()))
    }

    async fn update_timestamp(&self, identity: &str, address: &str) -> Result<()> {
        if self.failing_updates.lock().unwrap().contains(identity) {
            return Err(Error::Database(DatabaseError::QueryFailed(
                "database is locked".into(),
            )));
        }

        let count = {
            let mut updates = self.updates.lock().unwrap();
            updates.push((identity.to_string(), address.to_string()));
            updates.len()
        };
        if let Some((after, token)) = self.cancel_after.lock().unwrap().as_ref()
            && count >= *after
        {
            token.cancel();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Repository

/// In-memory [`VersionedRepository`]
pub(crate) struct FakeRepository {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    attempts: Mutex<Vec<String>>,
    messages: Mutex<Vec<(String, String)>>,
    failing: Mutex<Vec<String>>,
    transient_failures: AtomicUsize,
    hang: AtomicBool,
    prepared: AtomicUsize,
}

impl FakeRepository {
    pub(crate) fn new() -> Self {
        Self {
            files: Mutex::new(BTreeMap::new()),
            attempts: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
            transient_failures: AtomicUsize::new(0),
            hang: AtomicBool::new(false),
            prepared: AtomicUsize::new(0),
        }
    }

    /// Reject (403) every put whose path contains `fragment`
    pub(crate) fn fail_paths_containing(&self, fragment: &str) {
        self.failing.lock().unwrap().push(fragment.to_string());
    }

    /// Fail the next `count` puts with a transport error
    pub(crate) fn fail_transiently(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn hang_on_put(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub(crate) fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub(crate) fn paths(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    /// Every put path, including failed ones
    pub(crate) fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub(crate) fn prepared(&self) -> usize {
        self.prepared.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VersionedRepository for FakeRepository {
    async fn prepare(&self) -> std::result::Result<(), RepositoryError> {
        self.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn put(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> std::result::Result<PutOutcome, RepositoryError> {
        self.attempts.lock().unwrap().push(path.to_string());

        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RepositoryError::Transport("connection reset by peer".into()));
        }
        if self
            .failing
            .lock()
            .unwrap()
            .iter()
            .any(|fragment| path.contains(fragment.as_str()))
        {
            return Err(RepositoryError::Status {
                status: 403,
                body: "403 Forbidden".into(),
            });
        }

        self.messages
            .lock()
            .unwrap()
            .push((path.to_string(), message.to_string()));
        let previous = self
            .files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_vec());
        Ok(match previous {
            Some(_) => PutOutcome::Updated,
            None => PutOutcome::Created,
        })
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

// ---------------------------------------------------------------------------
// Notifier

/// [`NotificationSink`] that records every outcome sequence it receives
pub(crate) struct RecordingNotifier {
    calls: Mutex<Vec<(RunId, Vec<RunOutcome>)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub(crate) fn calls(&self) -> Vec<Vec<RunOutcome>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, outcomes)| outcomes.clone())
            .collect()
    }

    pub(crate) fn run_ids(&self) -> Vec<RunId> {
        self.calls.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, run_id: RunId, outcomes: &[RunOutcome]) -> Result<()> {
        self.calls.lock().unwrap().push((run_id, outcomes.to_vec()));
        if self.fail {
            return Err(Error::Notification("smtp relay refused".into()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

// ---------------------------------------------------------------------------
// Harness

/// An orchestrator wired to fakes, with handles to inspect them
pub(crate) struct Harness {
    pub(crate) orchestrator: BackupOrchestrator,
    pub(crate) inventory: Arc<FakeInventory>,
    pub(crate) session: Arc<FakeSession>,
    pub(crate) repository: Arc<FakeRepository>,
    pub(crate) notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub(crate) fn new(devices: Vec<DeviceRecord>) -> Self {
        Self::with_config(devices, test_config())
    }

    pub(crate) fn with_config(devices: Vec<DeviceRecord>, config: Config) -> Self {
        Self::build(devices, config, RecordingNotifier::new())
    }

    pub(crate) fn with_failing_notifier(devices: Vec<DeviceRecord>) -> Self {
        Self::build(devices, test_config(), RecordingNotifier::failing())
    }

    fn build(devices: Vec<DeviceRecord>, config: Config, notifier: RecordingNotifier) -> Self {
        let inventory = Arc::new(FakeInventory::new(devices));
        let session = Arc::new(FakeSession::new());
        let repository = Arc::new(FakeRepository::new());
        let notifier = Arc::new(notifier);

        let orchestrator = BackupOrchestrator::new(
            config,
            Collaborators {
                inventory: inventory.clone(),
                session: session.clone(),
                repository: repository.clone(),
                notifier: notifier.clone(),
            },
        );

        Self {
            orchestrator,
            inventory,
            session,
            repository,
            notifier,
        }
    }
}
