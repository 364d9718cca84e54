//! Database layer for routerboard-backup
//!
//! Handles SQLite persistence for the device inventory.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`devices`]: Device CRUD and last-backup timestamps

use crate::types::DeviceRecord;
use sqlx::{FromRow, sqlite::SqlitePool};

mod devices;
mod migrations;

/// New device to be inserted into the inventory
#[derive(Debug, Clone)]
pub struct NewDevice {
    /// Device identity (RouterOS system identity)
    pub identity: String,
    /// Host name or IP address (unique)
    pub address: String,
    /// SSH port, `None` to use the configured default
    pub port: Option<u16>,
    /// Credential reference (SSH key path); empty for the client default
    pub credential_ref: String,
}

/// Device record from database
#[derive(Debug, Clone, FromRow)]
pub struct Device {
    /// Unique database ID
    pub id: i64,
    /// Device identity
    pub identity: String,
    /// Host name or IP address
    pub address: String,
    /// SSH port, NULL for the configured default
    pub port: Option<i64>,
    /// Credential reference
    pub credential_ref: String,
    /// Unix timestamp of the last successful backup
    pub last_backup_at: Option<i64>,
    /// Unix timestamp when the device was added
    pub created_at: i64,
}

impl From<Device> for DeviceRecord {
    fn from(row: Device) -> Self {
        DeviceRecord {
            identity: row.identity,
            address: row.address,
            // Out-of-range ports fall back to the configured default
            port: row.port.and_then(|p| u16::try_from(p).ok()),
            credential_ref: row.credential_ref,
        }
    }
}

/// Database handle for routerboard-backup
pub struct Database {
    pool: SqlitePool,
}
