//! Heart-rate and body-metric series storage
//!
//! Series rows are keyed on their timestamps; re-importing an overlapping
//! window overwrites in place (last writer wins), so these upserts are safe
//! to repeat across retried sync attempts.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::error::{Result, StoreError};
use crate::models::{BodyMeasurement, DeviceId, HeartRatePoint, UserId};
use provider_traits::MetricKind;

/// Repository for fetched metric series
#[async_trait]
pub trait HealthMetricsRepository: Send + Sync {
    /// Store heart-rate readings; overlapping timestamps are overwritten.
    /// Returns the number of rows written.
    async fn upsert_heart_rate(&self, points: &[HeartRatePoint]) -> Result<u64>;

    /// Store body metric values; overlapping keys are overwritten.
    /// Returns the number of rows written.
    async fn upsert_measurements(&self, measurements: &[BodyMeasurement]) -> Result<u64>;

    /// Count stored heart-rate readings for a device
    async fn count_heart_rate(&self, device_id: DeviceId) -> Result<i64>;

    /// Fetch a user's measurements of one kind, newest first
    async fn find_measurements(
        &self,
        user_id: UserId,
        kind: MetricKind,
        limit: u32,
    ) -> Result<Vec<BodyMeasurement>>;
}

/// SQLite implementation of [`HealthMetricsRepository`]
pub struct SqliteHealthMetricsRepository {
    pool: SqlitePool,
}

impl SqliteHealthMetricsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthMetricsRepository for SqliteHealthMetricsRepository {
    async fn upsert_heart_rate(&self, points: &[HeartRatePoint]) -> Result<u64> {
        let mut written = 0u64;
        for point in points {
            let result = sqlx::query(
                r#"
                INSERT INTO heart_rate_points (device_id, user_id, recorded_at, bpm)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (device_id, recorded_at) DO UPDATE SET bpm = excluded.bpm
                "#,
            )
            .bind(point.device_id.0)
            .bind(point.user_id.0)
            .bind(point.recorded_at)
            .bind(point.bpm)
            .execute(&self.pool)
            .await?;

            written += result.rows_affected();
        }

        Ok(written)
    }

    async fn upsert_measurements(&self, measurements: &[BodyMeasurement]) -> Result<u64> {
        let mut written = 0u64;
        for measurement in measurements {
            let result = sqlx::query(
                r#"
                INSERT INTO body_measurements (user_id, device_id, kind, recorded_at, value)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (user_id, kind, recorded_at) DO UPDATE SET
                    value = excluded.value,
                    device_id = excluded.device_id
                "#,
            )
            .bind(measurement.user_id.0)
            .bind(measurement.device_id.0)
            .bind(measurement.kind.as_str())
            .bind(measurement.recorded_at)
            .bind(measurement.value)
            .execute(&self.pool)
            .await?;

            written += result.rows_affected();
        }

        Ok(written)
    }

    async fn count_heart_rate(&self, device_id: DeviceId) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM heart_rate_points WHERE device_id = ?")
                .bind(device_id.0)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    async fn find_measurements(
        &self,
        user_id: UserId,
        kind: MetricKind,
        limit: u32,
    ) -> Result<Vec<BodyMeasurement>> {
        let rows: Vec<(i64, i64, String, i64, f64)> = sqlx::query_as(
            r#"
            SELECT user_id, device_id, kind, recorded_at, value
            FROM body_measurements
            WHERE user_id = ? AND kind = ?
            ORDER BY recorded_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_id.0)
        .bind(kind.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(user_id, device_id, kind, recorded_at, value)| {
                let kind = MetricKind::parse(&kind).ok_or_else(|| StoreError::Decode {
                    column: "kind".to_string(),
                    value: kind.clone(),
                })?;
                Ok(BodyMeasurement {
                    user_id: UserId(user_id),
                    device_id: DeviceId(device_id),
                    kind,
                    recorded_at,
                    value,
                })
            })
            .collect()
    }
}
