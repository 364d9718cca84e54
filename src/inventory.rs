//! Device inventory seam
//!
//! The orchestrator only sees [`DeviceInventory`]. [`Database`] is the
//! production implementation; tests substitute in-memory fakes.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::DeviceRecord;
use async_trait::async_trait;

/// Source of device records and sink of last-backup timestamps
///
/// `update_timestamp` must be safe to call concurrently for distinct devices.
#[async_trait]
pub trait DeviceInventory: Send + Sync {
    /// All devices, in inventory order
    ///
    /// # Errors
    ///
    /// [`Error::InventoryUnavailable`] when no list can be obtained.
    async fn list_devices(&self) -> Result<Vec<DeviceRecord>>;

    /// The device registered at `address`
    ///
    /// # Errors
    ///
    /// [`Error::DeviceNotFound`] when absent, [`Error::InventoryUnavailable`]
    /// when the lookup itself failed.
    async fn get_device(&self, address: &str) -> Result<DeviceRecord>;

    /// Record a successful backup of the device `identity` at `address`
    ///
    /// Exactly one device is touched: identities repeat across a fleet, so
    /// the address disambiguates.
    async fn update_timestamp(&self, identity: &str, address: &str) -> Result<()>;
}

#[async_trait]
impl DeviceInventory for Database {
    async fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        let rows = Database::list_devices(self)
            .await
            .map_err(|e| Error::InventoryUnavailable(e.to_string()))?;
        Ok(rows.into_iter().map(DeviceRecord::from).collect())
    }

    async fn get_device(&self, address: &str) -> Result<DeviceRecord> {
        match self.get_device_by_address(address).await {
            Ok(Some(row)) => Ok(row.into()),
            Ok(None) => Err(Error::DeviceNotFound(address.to_string())),
            Err(e) => Err(Error::InventoryUnavailable(e.to_string())),
        }
    }

    async fn update_timestamp(&self, identity: &str, address: &str) -> Result<()> {
        let updated = self.touch_backup_time(identity, address).await?;
        if updated == 0 {
            return Err(Error::DeviceNotFound(format!("{} at {}", identity, address)));
        }
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewDevice;
    use tempfile::NamedTempFile;

    async fn seeded_db() -> (Database, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).await.unwrap();
        for (identity, address) in [("edge-1", "10.0.0.1"), ("edge-2", "10.0.0.2")] {
            db.add_device(&NewDevice {
                identity: identity.into(),
                address: address.into(),
                port: None,
                credential_ref: String::new(),
            })
            .await
            .unwrap();
        }
        (db, temp_file)
    }

    #[tokio::test]
    async fn lists_records_in_order() {
        let (db, _file) = seeded_db().await;
        let inventory: &dyn DeviceInventory = &db;

        let devices = inventory.list_devices().await.unwrap();
        assert_eq!(
            devices,
            vec![
                DeviceRecord::new("edge-1", "10.0.0.1"),
                DeviceRecord::new("edge-2", "10.0.0.2"),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_address_is_device_not_found() {
        let (db, _file) = seeded_db().await;
        let inventory: &dyn DeviceInventory = &db;

        let err = inventory.get_device("10.0.0.9").await.unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(ref a) if a == "10.0.0.9"));
    }

    #[tokio::test]
    async fn closed_pool_is_inventory_unavailable() {
        let (db, _file) = seeded_db().await;
        db.pool().close().await;
        let inventory: &dyn DeviceInventory = &db;

        let err = inventory.list_devices().await.unwrap_err();
        assert!(matches!(err, Error::InventoryUnavailable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn update_timestamp_for_unknown_identity_fails() {
        let (db, _file) = seeded_db().await;
        let inventory: &dyn DeviceInventory = &db;

        inventory.update_timestamp("edge-1", "10.0.0.1").await.unwrap();
        assert!(db.last_backup_at("10.0.0.1").await.unwrap().is_some());
        assert!(db.last_backup_at("10.0.0.2").await.unwrap().is_none());

        let err = inventory
            .update_timestamp("ghost", "10.0.0.1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(_)));

        // Right identity, wrong address
        let err = inventory
            .update_timestamp("edge-1", "10.0.0.2")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(_)));
        assert!(db.last_backup_at("10.0.0.2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_updates_for_distinct_devices() {
        let (db, _file) = seeded_db().await;
        let db = std::sync::Arc::new(db);

        let a = {
            let db = db.clone();
            tokio::spawn(async move { db.update_timestamp("edge-1", "10.0.0.1").await })
        };
        let b = {
            let db = db.clone();
            tokio::spawn(async move { db.update_timestamp("edge-2", "10.0.0.2").await })
        };

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert!(db.last_backup_at("10.0.0.1").await.unwrap().is_some());
        assert!(db.last_backup_at("10.0.0.2").await.unwrap().is_some());
    }
}
