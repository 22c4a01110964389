//! Device directory: lookup and maintenance of paired wearables

use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

use crate::error::{Result, StoreError};
use crate::models::{ConnectionStatus, Device, DeviceId, DeviceKind, NewDevice, UserId};

/// Directory of paired devices, consumed by the sync core to resolve jobs
/// to concrete hardware.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Look up a device by id
    async fn find_by_id(&self, id: DeviceId) -> Result<Option<Device>>;

    /// All devices paired by a user
    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Device>>;

    /// Pair a new device; the store assigns the id
    async fn insert(&self, device: &NewDevice) -> Result<DeviceId>;

    /// Record the completion time of a successful sync
    async fn update_last_sync(&self, id: DeviceId, synced_at: i64) -> Result<()>;

    /// Change a device's connection state
    async fn update_connection_status(&self, id: DeviceId, status: ConnectionStatus)
        -> Result<()>;
}

/// SQLite implementation of [`DeviceDirectory`]
pub struct SqliteDeviceDirectory {
    pool: SqlitePool,
}

impl SqliteDeviceDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct DeviceRow {
    id: i64,
    user_id: i64,
    kind: String,
    external_ref: String,
    connection_status: String,
    label: Option<String>,
    last_sync_at: Option<i64>,
    created_at: i64,
}

impl TryFrom<DeviceRow> for Device {
    type Error = StoreError;

    fn try_from(row: DeviceRow) -> Result<Self> {
        let kind = DeviceKind::parse(&row.kind).ok_or_else(|| StoreError::Decode {
            column: "kind".to_string(),
            value: row.kind.clone(),
        })?;
        let connection_status =
            ConnectionStatus::parse(&row.connection_status).ok_or_else(|| StoreError::Decode {
                column: "connection_status".to_string(),
                value: row.connection_status.clone(),
            })?;

        Ok(Device {
            id: DeviceId(row.id),
            user_id: UserId(row.user_id),
            kind,
            external_ref: row.external_ref,
            connection_status,
            label: row.label,
            last_sync_at: row.last_sync_at,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl DeviceDirectory for SqliteDeviceDirectory {
    async fn find_by_id(&self, id: DeviceId) -> Result<Option<Device>> {
        let row = sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT id, user_id, kind, external_ref, connection_status,
                   label, last_sync_at, created_at
            FROM devices
            WHERE id = ?
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Device::try_from).transpose()
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Device>> {
        let rows = sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT id, user_id, kind, external_ref, connection_status,
                   label, last_sync_at, created_at
            FROM devices
            WHERE user_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Device::try_from).collect()
    }

    async fn insert(&self, device: &NewDevice) -> Result<DeviceId> {
        let result = sqlx::query(
            r#"
            INSERT INTO devices (
                user_id, kind, external_ref, connection_status, label, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(device.user_id.0)
        .bind(device.kind.as_str())
        .bind(&device.external_ref)
        .bind(device.connection_status.as_str())
        .bind(&device.label)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(DeviceId(result.last_insert_rowid()))
    }

    async fn update_last_sync(&self, id: DeviceId, synced_at: i64) -> Result<()> {
        let result = sqlx::query("UPDATE devices SET last_sync_at = ? WHERE id = ?")
            .bind(synced_at)
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity_type: "Device".to_string(),
                id: id.to_string(),
            });
        }

        Ok(())
    }

    async fn update_connection_status(
        &self,
        id: DeviceId,
        status: ConnectionStatus,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE devices SET connection_status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity_type: "Device".to_string(),
                id: id.to_string(),
            });
        }

        Ok(())
    }
}
