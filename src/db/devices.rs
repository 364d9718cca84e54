//! Device inventory CRUD and last-backup timestamps.

use crate::error::DatabaseError;
use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};

use super::{Database, Device, NewDevice};

impl Database {
    /// Insert a new device into the inventory
    ///
    /// Returns the new row ID. Fails with
    /// [`DatabaseError::ConstraintViolation`] when the address already exists.
    pub async fn add_device(&self, device: &NewDevice) -> Result<i64> {
        let now = Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO devices (identity, address, port, credential_ref, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&device.identity)
        .bind(&device.address)
        .bind(device.port.map(i64::from))
        .bind(&device.credential_ref)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Error::Database(DatabaseError::ConstraintViolation(format!(
                    "device address {} already exists",
                    device.address
                )))
            }
            _ => Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert device: {}",
                e
            ))),
        })?;

        Ok(result.last_insert_rowid())
    }

    /// Remove a device by address
    ///
    /// Returns `true` if a device was removed.
    pub async fn remove_device(&self, address: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM devices WHERE address = ?")
            .bind(address)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to remove device: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// List all devices in insertion order
    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        sqlx::query_as::<_, Device>(
            r#"
            SELECT id, identity, address, port, credential_ref, last_backup_at, created_at
            FROM devices
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list devices: {}",
                e
            )))
        })
    }

    /// Look up one device by address
    pub async fn get_device_by_address(&self, address: &str) -> Result<Option<Device>> {
        sqlx::query_as::<_, Device>(
            r#"
            SELECT id, identity, address, port, credential_ref, last_backup_at, created_at
            FROM devices
            WHERE address = ?
            "#,
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get device: {}",
                e
            )))
        })
    }

    /// Set the last-backup time of the device `identity` at `address` to now
    ///
    /// Identities are not unique (factory-default routers all report
    /// "MikroTik"), so the row is matched on both columns. Returns the
    /// number of rows updated, at most one.
    pub async fn touch_backup_time(&self, identity: &str, address: &str) -> Result<u64> {
        let now = Utc::now().timestamp();

        let result = sqlx::query(
            "UPDATE devices SET last_backup_at = ? WHERE identity = ? AND address = ?",
        )
        .bind(now)
        .bind(identity)
        .bind(address)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update backup time: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }

    /// Last successful backup of the device at `address`
    ///
    /// `Ok(None)` when the device exists but was never backed up.
    pub async fn last_backup_at(&self, address: &str) -> Result<Option<DateTime<Utc>>> {
        let device = self.get_device_by_address(address).await?.ok_or_else(|| {
            Error::Database(DatabaseError::NotFound(format!("device {}", address)))
        })?;

        Ok(device
            .last_backup_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single()))
    }
}
