//! Common test utilities for routerboard-backup integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use routerboard_backup::db::NewDevice;
use routerboard_backup::{
    Database, Endpoint, Event, NotificationSink, RemoteSession, Result, RunId, RunOutcome,
    SessionError,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

/// Open a fresh inventory under `dir` holding `(identity, address)` devices
pub async fn seeded_database(dir: &Path, devices: &[(&str, &str)]) -> Database {
    let db = Database::new(&dir.join("inventory.db"))
        .await
        .expect("database should open");
    for (identity, address) in devices {
        db.add_device(&NewDevice {
            identity: identity.to_string(),
            address: address.to_string(),
            port: None,
            credential_ref: String::new(),
        })
        .await
        .expect("device should insert");
    }
    db
}

/// Router stand-in answering the backup commands and serving both files
///
/// Addresses listed as unreachable fail every call with a connection error.
pub struct RouterSimulator {
    unreachable: HashSet<String>,
    commands: Mutex<Vec<String>>,
}

impl RouterSimulator {
    pub fn new(unreachable: &[&str]) -> Self {
        Self {
            unreachable: unreachable.iter().map(|s| s.to_string()).collect(),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Binary backup content served for `host`
    pub fn backup_for(host: &str) -> Vec<u8> {
        let mut blob = vec![0x88, 0xac, 0xa1, 0xb1];
        blob.extend_from_slice(host.as_bytes());
        blob
    }

    /// Export content served for `host`
    pub fn export_for(host: &str) -> String {
        format!("# by RouterOS 7.14\n/system identity\nset name={host}\n")
    }

    /// Every command run, as `<host> <command>`
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn reach(&self, endpoint: &Endpoint) -> std::result::Result<(), SessionError> {
        if self.unreachable.contains(&endpoint.host) {
            return Err(SessionError::Connect(format!(
                "ssh: connect to host {} port {}: No route to host",
                endpoint.host, endpoint.port
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSession for RouterSimulator {
    async fn run_command(
        &self,
        endpoint: &Endpoint,
        command: &str,
    ) -> std::result::Result<String, SessionError> {
        self.reach(endpoint)?;
        self.commands
            .lock()
            .unwrap()
            .push(format!("{} {}", endpoint.host, command));
        Ok(String::new())
    }

    async fn fetch(
        &self,
        endpoint: &Endpoint,
        remote_path: &str,
    ) -> std::result::Result<Vec<u8>, SessionError> {
        self.reach(endpoint)?;
        if remote_path.ends_with(".rsc") {
            Ok(Self::export_for(&endpoint.host).into_bytes())
        } else {
            Ok(Self::backup_for(&endpoint.host))
        }
    }

    fn name(&self) -> &'static str {
        "router-simulator"
    }
}

/// Notifier keeping every batch of outcomes it was handed
#[derive(Default)]
pub struct CollectingNotifier {
    batches: Mutex<Vec<Vec<RunOutcome>>>,
    run_ids: Mutex<Vec<RunId>>,
}

impl CollectingNotifier {
    pub fn batches(&self) -> Vec<Vec<RunOutcome>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn run_ids(&self) -> Vec<RunId> {
        self.run_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for CollectingNotifier {
    async fn notify(&self, run_id: RunId, outcomes: &[RunOutcome]) -> Result<()> {
        self.run_ids.lock().unwrap().push(run_id);
        self.batches.lock().unwrap().push(outcomes.to_vec());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collecting"
    }
}

/// Collect events until `predicate` matches one, or `timeout` elapses
pub async fn collect_events_until<F>(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    predicate: F,
) -> Vec<Event>
where
    F: Fn(&Event) -> bool,
{
    let mut collected = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let done = predicate(&event);
            collected.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    collected
}
