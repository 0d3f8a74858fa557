//! # Device Repository
//!
//! Database operations for the device registry.
//!
//! Devices are registered once (keyed by the vendor's device ID) and
//! then referenced by every telemetry row, trip, and sync state. Sync
//! only runs for active devices.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use tripline_core::Device;

/// Repository for device database operations.
#[derive(Debug, Clone)]
pub struct DeviceRepository {
    pool: SqlitePool,
}

impl DeviceRepository {
    /// Creates a new DeviceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DeviceRepository { pool }
    }

    /// Registers a device, assigning it a fresh UUID.
    ///
    /// ## Errors
    /// [`DbError::UniqueViolation`] when the vendor_device_id is
    /// already registered.
    pub async fn register(&self, name: &str, vendor_device_id: &str) -> DbResult<Device> {
        let device = Device {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            vendor_device_id: vendor_device_id.to_string(),
            is_active: true,
            created_at: Utc::now(),
        };

        debug!(id = %device.id, vendor_device_id = %device.vendor_device_id, "Registering device");

        sqlx::query(
            r#"
            INSERT INTO devices (id, name, vendor_device_id, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&device.id)
        .bind(&device.name)
        .bind(&device.vendor_device_id)
        .bind(device.is_active)
        .bind(device.created_at)
        .execute(&self.pool)
        .await?;

        Ok(device)
    }

    /// Gets a device by its internal ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Device>> {
        let device = sqlx::query_as::<_, Device>(
            r#"
            SELECT id, name, vendor_device_id, is_active, created_at
            FROM devices
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(device)
    }

    /// Gets a device by the vendor's device ID.
    pub async fn get_by_vendor_id(&self, vendor_device_id: &str) -> DbResult<Option<Device>> {
        let device = sqlx::query_as::<_, Device>(
            r#"
            SELECT id, name, vendor_device_id, is_active, created_at
            FROM devices
            WHERE vendor_device_id = ?1
            "#,
        )
        .bind(vendor_device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(device)
    }

    /// Lists all active devices, the set the scheduler syncs.
    pub async fn list_active(&self) -> DbResult<Vec<Device>> {
        let devices = sqlx::query_as::<_, Device>(
            r#"
            SELECT id, name, vendor_device_id, is_active, created_at
            FROM devices
            WHERE is_active = 1
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(devices)
    }

    /// Activates or deactivates a device.
    ///
    /// Deactivation stops future syncs; existing telemetry and trips
    /// are untouched.
    pub async fn set_active(&self, id: &str, active: bool) -> DbResult<()> {
        let result = sqlx::query("UPDATE devices SET is_active = ?1 WHERE id = ?2")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Device", id));
        }

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
