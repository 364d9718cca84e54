//! Retrieve, commit and timestamp one device.

use crate::retry::with_retry;
use crate::types::{ArtifactKind, DeviceRecord, Event, RunId, RunOutcome};

use super::BackupOrchestrator;

impl BackupOrchestrator {
    /// Run the full backup of `device` and return its outcome
    ///
    /// The timestamp is only touched after both artifacts were committed.
    /// A binary commit failure skips the text commit.
    pub(crate) async fn process_device(&self, run_id: RunId, device: &DeviceRecord) -> RunOutcome {
        self.emit_event(Event::DeviceStarted {
            run_id,
            address: device.address.clone(),
        });
        let retry = &self.config.run.retry;

        let artifacts = match with_retry(retry, "retrieve configuration", || {
            self.retriever.retrieve(device)
        })
        .await
        {
            Ok(artifacts) => artifacts,
            Err(e) => {
                tracing::error!(
                    %run_id,
                    address = %device.address,
                    identity = %device.identity,
                    error = %e,
                    "retrieval failed"
                );
                return self.failed(run_id, RunOutcome::retrieval_failed(device, e.to_string()));
            }
        };

        let mut paths = Vec::with_capacity(ArtifactKind::ALL.len());
        for kind in ArtifactKind::ALL {
            match with_retry(retry, "commit artifact", || self.store.commit(&artifacts, kind)).await
            {
                Ok(receipt) => paths.push(receipt.path),
                Err(e) => {
                    tracing::error!(
                        %run_id,
                        address = %device.address,
                        %kind,
                        error = %e,
                        "commit failed"
                    );
                    return self.failed(run_id, RunOutcome::commit_failed(device, e.to_string()));
                }
            }
        }

        let mut detail = format!("committed {}", paths.join(", "));
        if let Err(e) = self
            .inventory
            .update_timestamp(&device.identity, &device.address)
            .await
        {
            tracing::warn!(
                %run_id,
                address = %device.address,
                identity = %device.identity,
                error = %e,
                "backup archived but last-backup timestamp not updated"
            );
            detail.push_str(&format!("; last-backup timestamp not updated: {}", e));
        }

        tracing::info!(%run_id, address = %device.address, "backup of the router succeeded");
        self.emit_event(Event::DeviceBackedUp {
            run_id,
            address: device.address.clone(),
            identity: device.identity.clone(),
        });
        RunOutcome::success(device, detail)
    }

    fn failed(&self, run_id: RunId, outcome: RunOutcome) -> RunOutcome {
        self.emit_event(Event::DeviceFailed {
            run_id,
            address: outcome.device_address.clone(),
            status: outcome.status,
            error: outcome.detail.clone(),
        });
        outcome
    }
}
