//! Run storage with idempotent import semantics
//!
//! The `(user_id, external_id)` pair is the idempotency key: importing the
//! same vendor activity twice must leave exactly one local run. Callers check
//! [`ActivityRepository::find_by_external_id`] before inserting; the unique
//! index backs that check up at the storage layer.

use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

use crate::error::{Result, StoreError};
use crate::models::{DeviceId, Run, RunId, UserId};

/// Repository for imported runs
#[async_trait]
pub trait ActivityRepository: Send + Sync {
    /// Insert a new run
    async fn insert(&self, run: &Run) -> Result<()>;

    /// Look up a run by its vendor-assigned activity id
    async fn find_by_external_id(
        &self,
        user_id: UserId,
        external_id: &str,
    ) -> Result<Option<Run>>;

    /// Most recent runs for a user, newest first
    async fn find_recent(&self, user_id: UserId, limit: u32) -> Result<Vec<Run>>;

    /// Total runs stored for a user
    async fn count_for_user(&self, user_id: UserId) -> Result<i64>;
}

/// SQLite implementation of [`ActivityRepository`]
pub struct SqliteActivityRepository {
    pool: SqlitePool,
}

impl SqliteActivityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct RunRow {
    id: String,
    user_id: i64,
    device_id: i64,
    external_id: String,
    sport: String,
    started_at: i64,
    duration_secs: i64,
    distance_m: Option<f64>,
    avg_heart_rate: Option<i64>,
    calories: Option<i64>,
    created_at: i64,
}

impl TryFrom<RunRow> for Run {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self> {
        let id = RunId::from_string(&row.id).map_err(|_| StoreError::Decode {
            column: "id".to_string(),
            value: row.id.clone(),
        })?;

        Ok(Run {
            id,
            user_id: UserId(row.user_id),
            device_id: DeviceId(row.device_id),
            external_id: row.external_id,
            sport: row.sport,
            started_at: row.started_at,
            duration_secs: row.duration_secs,
            distance_m: row.distance_m,
            avg_heart_rate: row.avg_heart_rate.map(|bpm| bpm as u16),
            calories: row.calories.map(|kcal| kcal as u32),
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl ActivityRepository for SqliteActivityRepository {
    async fn insert(&self, run: &Run) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runs (
                id, user_id, device_id, external_id, sport,
                started_at, duration_secs, distance_m, avg_heart_rate,
                calories, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.user_id.0)
        .bind(run.device_id.0)
        .bind(&run.external_id)
        .bind(&run.sport)
        .bind(run.started_at)
        .bind(run.duration_secs)
        .bind(run.distance_m)
        .bind(run.avg_heart_rate)
        .bind(run.calories)
        .bind(run.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_external_id(
        &self,
        user_id: UserId,
        external_id: &str,
    ) -> Result<Option<Run>> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, user_id, device_id, external_id, sport,
                   started_at, duration_secs, distance_m, avg_heart_rate,
                   calories, created_at
            FROM runs
            WHERE user_id = ? AND external_id = ?
            "#,
        )
        .bind(user_id.0)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Run::try_from).transpose()
    }

    async fn find_recent(&self, user_id: UserId, limit: u32) -> Result<Vec<Run>> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, user_id, device_id, external_id, sport,
                   started_at, duration_secs, distance_m, avg_heart_rate,
                   calories, created_at
            FROM runs
            WHERE user_id = ?
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_id.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Run::try_from).collect()
    }

    async fn count_for_user(&self, user_id: UserId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM runs WHERE user_id = ?")
            .bind(user_id.0)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
