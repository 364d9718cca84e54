//! Fleet and selected-target runs.

use crate::error::Error;
use crate::types::{DeviceRecord, Event, RunId, RunOutcome, RunSummary};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::BackupOrchestrator;

/// One slot of a run, in inventory order
enum Target {
    /// Needs remote work
    Device(DeviceRecord),
    /// Already decided without contacting anything (unknown address)
    Resolved(RunOutcome),
}

impl BackupOrchestrator {
    /// Back up every device in the inventory
    ///
    /// Never fails: an empty or unreachable inventory yields a summary with
    /// a single `InventoryUnavailable` outcome, and the operator is notified.
    pub async fn run_fleet(&self) -> RunSummary {
        let run_id = RunId::new();
        let started_at = Utc::now();

        let devices = match self.inventory.list_devices().await {
            Ok(devices) if !devices.is_empty() => devices,
            Ok(_) => {
                return self
                    .inventory_failure(run_id, started_at, "device inventory is empty")
                    .await;
            }
            Err(e) => {
                return self
                    .inventory_failure(run_id, started_at, e.to_string())
                    .await;
            }
        };

        tracing::info!(%run_id, devices = devices.len(), "starting fleet backup");
        let targets = devices.into_iter().map(Target::Device).collect();
        self.run_targets(run_id, started_at, targets).await
    }

    /// Back up the devices registered at `addresses`
    ///
    /// Duplicate addresses collapse to their first occurrence. An address
    /// missing from the inventory gets a `DeviceNotFound` outcome and no
    /// remote calls; the other addresses are still processed.
    pub async fn run_selected(&self, addresses: &[String]) -> RunSummary {
        let run_id = RunId::new();
        let started_at = Utc::now();

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for address in addresses {
            if !seen.insert(address.as_str()) {
                continue;
            }
            let target = match self.inventory.get_device(address).await {
                Ok(device) => Target::Device(device),
                Err(Error::DeviceNotFound(_)) => {
                    tracing::error!(
                        %run_id,
                        address = %address,
                        "address is not in the device inventory, add it first"
                    );
                    Target::Resolved(RunOutcome::unknown_device(address.clone()))
                }
                Err(e) => {
                    tracing::error!(
                        %run_id,
                        address = %address,
                        error = %e,
                        "device lookup failed"
                    );
                    Target::Resolved(RunOutcome::inventory_unavailable(
                        address.clone(),
                        e.to_string(),
                    ))
                }
            };
            targets.push(target);
        }

        tracing::info!(%run_id, devices = targets.len(), "starting selected backup");
        self.run_targets(run_id, started_at, targets).await
    }

    async fn inventory_failure(
        &self,
        run_id: RunId,
        started_at: DateTime<Utc>,
        detail: impl Into<String>,
    ) -> RunSummary {
        let detail = detail.into();
        tracing::error!(
            %run_id,
            error = %detail,
            "device list unavailable, backup is not possible"
        );
        self.emit_event(Event::RunStarted { run_id, devices: 0 });

        let outcomes = vec![RunOutcome::inventory_unavailable("", detail)];
        self.finish(run_id, started_at, outcomes, false).await
    }

    /// Dispatch `targets` with bounded concurrency and collect outcomes in
    /// target order
    async fn run_targets(
        &self,
        run_id: RunId,
        started_at: DateTime<Utc>,
        targets: Vec<Target>,
    ) -> RunSummary {
        self.emit_event(Event::RunStarted {
            run_id,
            devices: targets.len(),
        });

        let limit = self.config.run.max_concurrent_devices.max(1);
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut join_set = JoinSet::new();
        let mut slots: Vec<Option<RunOutcome>> = vec![None; targets.len()];
        let mut cancelled = false;

        for (index, target) in targets.into_iter().enumerate() {
            if self.cancel_token.is_cancelled() {
                cancelled = true;
                break;
            }

            let device = match target {
                Target::Resolved(outcome) => {
                    self.emit_event(Event::DeviceFailed {
                        run_id,
                        address: outcome.device_address.clone(),
                        status: outcome.status,
                        error: outcome.detail.clone(),
                    });
                    slots[index] = Some(outcome);
                    continue;
                }
                Target::Device(device) => device,
            };

            let permit = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        cancelled = true;
                        break;
                    }
                },
            };

            let this = self.clone();
            join_set.spawn(async move {
                let _permit = permit;
                let outcome = match AssertUnwindSafe(this.process_device(run_id, &device))
                    .catch_unwind()
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(panic) => this.panicked_device(run_id, &device, panic.as_ref()),
                };
                (index, outcome)
            });
        }

        if cancelled {
            tracing::warn!(
                %run_id,
                in_flight = join_set.len(),
                "run cancelled, waiting for in-flight devices"
            );
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => tracing::error!(%run_id, error = %e, "device task did not complete"),
            }
        }

        let outcomes: Vec<RunOutcome> = slots.into_iter().flatten().collect();
        if cancelled {
            self.emit_event(Event::RunCancelled {
                run_id,
                completed: outcomes.len(),
            });
        }
        self.finish(run_id, started_at, outcomes, cancelled).await
    }

    /// Outcome for a device whose task panicked
    fn panicked_device(
        &self,
        run_id: RunId,
        device: &DeviceRecord,
        panic: &(dyn Any + Send),
    ) -> RunOutcome {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(
            %run_id,
            address = %device.address,
            panic = %message,
            "device task panicked"
        );

        let outcome =
            RunOutcome::retrieval_failed(device, format!("device task panicked: {}", message));
        self.emit_event(Event::DeviceFailed {
            run_id,
            address: device.address.clone(),
            status: outcome.status,
            error: outcome.detail.clone(),
        });
        outcome
    }

    /// Notify on failures, emit the completion event and build the summary
    async fn finish(
        &self,
        run_id: RunId,
        started_at: DateTime<Utc>,
        outcomes: Vec<RunOutcome>,
        cancelled: bool,
    ) -> RunSummary {
        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        let succeeded = outcomes.len() - failed;

        if failed > 0 {
            if let Err(e) = self.notifier.notify(run_id, &outcomes).await {
                tracing::warn!(
                    %run_id,
                    notifier = self.notifier.name(),
                    error = %e,
                    "failure notification could not be delivered"
                );
                self.emit_event(Event::NotificationFailed {
                    run_id,
                    error: e.to_string(),
                });
            }
        }

        tracing::info!(%run_id, succeeded, failed, cancelled, "backup run finished");
        self.emit_event(Event::RunCompleted {
            run_id,
            succeeded,
            failed,
        });

        RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
            cancelled,
        }
    }
}
