//! Fleet backup orchestration split into focused submodules.
//!
//! [`BackupOrchestrator`] drives a run: it reads the inventory, dispatches one
//! task per device under a concurrency limit, and collects outcomes in
//! inventory order.
//!
//! - [`run`]: fleet and selected-target runs, bounded dispatch, cancellation
//! - [`device_task`]: retrieve, commit and timestamp one device

mod device_task;
mod run;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::inventory::DeviceInventory;
use crate::notify::{NotificationSink, Notifiers};
use crate::repository::{VersionedRepository, build_repository};
use crate::retriever::RemoteRetriever;
use crate::session::{RemoteSession, SshSession};
use crate::store::ArtifactStore;
use crate::types::Event;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// The pluggable parts of an orchestrator
pub struct Collaborators {
    /// Device list and timestamp sink
    pub inventory: Arc<dyn DeviceInventory>,
    /// Remote shell used to reach devices
    pub session: Arc<dyn RemoteSession>,
    /// Versioned destination for artifacts
    pub repository: Arc<dyn VersionedRepository>,
    /// Failure reporting
    pub notifier: Arc<dyn NotificationSink>,
}

/// Fleet backup orchestrator (cloneable, all fields are Arc-wrapped)
///
/// # Examples
///
/// ```no_run
/// use routerboard_backup::{BackupOrchestrator, Config};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::load(std::path::Path::new("routerboard-backup.toml")).await?;
///     let orchestrator = BackupOrchestrator::from_config(config).await?;
///
///     let mut events = orchestrator.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             println!("{:?}", event);
///         }
///     });
///
///     let summary = orchestrator.run_fleet().await;
///     println!("{} of {} devices backed up", summary.succeeded_count(), summary.outcomes.len());
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct BackupOrchestrator {
    pub(crate) config: Arc<Config>,
    pub(crate) inventory: Arc<dyn DeviceInventory>,
    pub(crate) retriever: Arc<RemoteRetriever>,
    pub(crate) store: Arc<ArtifactStore>,
    pub(crate) notifier: Arc<dyn NotificationSink>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) cancel_token: CancellationToken,
}

impl BackupOrchestrator {
    /// Assemble an orchestrator from explicit collaborators
    ///
    /// The repository is not prepared; call [`prepare`](Self::prepare) when
    /// the destination may need to be created.
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        let config = Arc::new(config);
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let retriever = Arc::new(RemoteRetriever::new(
            collaborators.session,
            Arc::clone(&config),
        ));
        let store = Arc::new(ArtifactStore::new(collaborators.repository, &config));

        Self {
            config,
            inventory: collaborators.inventory,
            retriever,
            store,
            notifier: collaborators.notifier,
            event_tx,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Build the production stack described by `config`
    ///
    /// This initializes:
    /// - the SQLite inventory (created and migrated if needed)
    /// - an ssh/scp session
    /// - the configured repository, prepared (GitLab group and project created when missing)
    /// - webhook and script notifiers
    ///
    /// # Errors
    ///
    /// Invalid configuration, an unusable database, missing ssh/scp binaries,
    /// or a repository that cannot be prepared.
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate()?;

        let inventory = Arc::new(Database::new(&config.database.path).await?);
        let session = Arc::new(SshSession::from_config(&config.routerboard)?);
        let repository = build_repository(&config)?;
        let notifier = Notifiers::from_config(&config.notifications);

        tracing::info!(
            session = session.name(),
            repository = repository.name(),
            notifier = notifier.name(),
            max_concurrent_devices = config.run.max_concurrent_devices,
            "backup orchestrator initialized"
        );

        let orchestrator = Self::new(
            config,
            Collaborators {
                inventory,
                session,
                repository,
                notifier,
            },
        );
        orchestrator.prepare().await?;
        Ok(orchestrator)
    }

    /// Make sure the versioned destination exists
    ///
    /// # Errors
    ///
    /// [`Error::Repository`] when the destination cannot be reached or created.
    pub async fn prepare(&self) -> Result<()> {
        self.store.prepare().await.map_err(|e| {
            tracing::error!(
                repository = self.store.repository_name(),
                error = %e,
                "failed to prepare repository"
            );
            Error::Repository(e)
        })
    }

    /// Subscribe to run events
    ///
    /// Each subscriber receives all events independently. A subscriber that
    /// falls more than 1000 events behind receives `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Stop dispatching device work
    ///
    /// Devices already in flight finish (or time out) and are reported; the
    /// rest of the run is skipped and its summary is marked cancelled.
    /// Cancellation is permanent for this orchestrator and its clones.
    pub fn cancel(&self) {
        tracing::info!("backup run cancellation requested");
        self.cancel_token.cancel();
    }

    /// Whether [`cancel`](Self::cancel) has been called
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Token observed by the dispatcher, for wiring external shutdown sources
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Configuration this orchestrator was built with
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Emit an event to all subscribers
    ///
    /// Dropped silently when nobody is subscribed.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
