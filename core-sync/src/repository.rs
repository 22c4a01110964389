//! # Sync Job Repository
//!
//! Database persistence for sync job records.
//!
//! The scheduler consumes the [`SyncJobRepository`] trait; the SQLite
//! implementation here owns its own schema (created by
//! [`SqliteSyncJobRepository::initialize`]) so the job table lives wherever
//! the host application points the pool.

use crate::job::{Priority, SyncJob, SyncJobId, SyncJobType, SyncStatus};
use crate::{Result, SyncError};
use async_trait::async_trait;
use core_store::{DeviceId, UserId};
use sqlx::{FromRow, SqlitePool};

// ============================================================================
// Repository Trait
// ============================================================================

/// Repository trait for sync job persistence
#[async_trait]
pub trait SyncJobRepository: Send + Sync {
    /// Insert a new sync job
    async fn insert(&self, job: &SyncJob) -> Result<()>;

    /// Update an existing sync job
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::JobNotFound`] if the record does not exist
    async fn update(&self, job: &SyncJob) -> Result<()>;

    /// Find a sync job by ID
    async fn find_by_id(&self, id: &SyncJobId) -> Result<Option<SyncJob>>;

    /// The non-terminal job for a `(user, device, type)` triple, if any.
    ///
    /// Backs the dedup invariant: at most one such job exists at a time.
    async fn find_active_for(
        &self,
        user_id: UserId,
        device_id: DeviceId,
        job_type: SyncJobType,
    ) -> Result<Option<SyncJob>>;

    /// Pending jobs whose `scheduled_at` has passed, ordered by descending
    /// priority with insertion order as the tiebreak.
    async fn find_due(&self, now: i64, limit: u32) -> Result<Vec<SyncJob>>;

    /// A user's jobs, most recently created first
    async fn find_by_user(&self, user_id: UserId, limit: u32) -> Result<Vec<SyncJob>>;

    /// Count jobs in a given status
    async fn count_by_status(&self, status: SyncStatus) -> Result<u64>;

    /// Delete a sync job
    async fn delete(&self, id: &SyncJobId) -> Result<()>;

    /// Delete terminal jobs created before the cutoff; returns rows removed
    async fn delete_terminal_older_than(&self, cutoff: i64) -> Result<u64>;

    /// Reset `Running` jobs whose attempt started before the cutoff back to
    /// `Pending`; returns rows touched. Recovery for records orphaned by a
    /// crash mid-execution.
    async fn reset_stale_running(&self, started_before: i64) -> Result<u64>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of [`SyncJobRepository`]
pub struct SqliteSyncJobRepository {
    pool: SqlitePool,
}

impl SqliteSyncJobRepository {
    /// Create a new SQLite sync job repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the job table and its indexes if they don't exist
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_jobs (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                device_id INTEGER NOT NULL,
                job_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                priority INTEGER NOT NULL DEFAULT 1,
                scheduled_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER,
                error_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                progress INTEGER NOT NULL DEFAULT 0,
                metadata TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                CONSTRAINT sync_jobs_status_check CHECK (
                    status IN ('pending', 'running', 'completed', 'failed', 'cancelled')
                ),
                CONSTRAINT sync_jobs_type_check CHECK (
                    job_type IN ('activities', 'heart_rate', 'metrics', 'full_sync')
                )
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sync_jobs_due
            ON sync_jobs(status, scheduled_at, priority DESC)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sync_jobs_user_created
            ON sync_jobs(user_id, created_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sync_jobs_dedup
            ON sync_jobs(user_id, device_id, job_type, status)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }
}

/// Database row representation of a sync job
#[derive(Debug, FromRow)]
struct SyncJobRow {
    id: String,
    user_id: i64,
    device_id: i64,
    job_type: String,
    status: String,
    priority: i32,
    scheduled_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    error_message: Option<String>,
    retry_count: i64,
    max_retries: i64,
    progress: i64,
    metadata: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<SyncJobRow> for SyncJob {
    type Error = SyncError;

    fn try_from(row: SyncJobRow) -> Result<Self> {
        let metadata = row
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| SyncError::Database(format!("Invalid metadata JSON: {}", e)))?;

        Ok(SyncJob {
            id: SyncJobId::from_string(&row.id)?,
            user_id: UserId(row.user_id),
            device_id: DeviceId(row.device_id),
            job_type: row.job_type.parse()?,
            status: row.status.parse()?,
            priority: Priority::from_i32(row.priority)?,
            scheduled_at: row.scheduled_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
            retry_count: row.retry_count as u32,
            max_retries: row.max_retries as u32,
            progress: row.progress.clamp(0, 100) as u8,
            metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const JOB_COLUMNS: &str = "id, user_id, device_id, job_type, status, priority, \
     scheduled_at, started_at, completed_at, error_message, \
     retry_count, max_retries, progress, metadata, created_at, updated_at";

fn metadata_to_string(job: &SyncJob) -> Result<Option<String>> {
    job.metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| SyncError::Database(format!("Cannot encode metadata: {}", e)))
}

#[async_trait]
impl SyncJobRepository for SqliteSyncJobRepository {
    async fn insert(&self, job: &SyncJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_jobs (
                id, user_id, device_id, job_type, status, priority,
                scheduled_at, started_at, completed_at, error_message,
                retry_count, max_retries, progress, metadata, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.as_str())
        .bind(job.user_id.0)
        .bind(job.device_id.0)
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(job.priority.as_i32())
        .bind(job.scheduled_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.error_message)
        .bind(job.retry_count as i64)
        .bind(job.max_retries as i64)
        .bind(job.progress as i64)
        .bind(metadata_to_string(job)?)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn update(&self, job: &SyncJob) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs SET
                status = ?,
                priority = ?,
                scheduled_at = ?,
                started_at = ?,
                completed_at = ?,
                error_message = ?,
                retry_count = ?,
                progress = ?,
                metadata = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.priority.as_i32())
        .bind(job.scheduled_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.error_message)
        .bind(job.retry_count as i64)
        .bind(job.progress as i64)
        .bind(metadata_to_string(job)?)
        .bind(job.updated_at)
        .bind(job.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SyncError::JobNotFound {
                job_id: job.id.to_string(),
            });
        }

        Ok(())
    }

    async fn find_by_id(&self, id: &SyncJobId) -> Result<Option<SyncJob>> {
        let row = sqlx::query_as::<_, SyncJobRow>(&format!(
            "SELECT {} FROM sync_jobs WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(SyncJob::try_from).transpose()
    }

    async fn find_active_for(
        &self,
        user_id: UserId,
        device_id: DeviceId,
        job_type: SyncJobType,
    ) -> Result<Option<SyncJob>> {
        let row = sqlx::query_as::<_, SyncJobRow>(&format!(
            r#"
            SELECT {}
            FROM sync_jobs
            WHERE user_id = ? AND device_id = ? AND job_type = ?
              AND status IN ('pending', 'running')
            LIMIT 1
            "#,
            JOB_COLUMNS
        ))
        .bind(user_id.0)
        .bind(device_id.0)
        .bind(job_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(SyncJob::try_from).transpose()
    }

    async fn find_due(&self, now: i64, limit: u32) -> Result<Vec<SyncJob>> {
        let rows = sqlx::query_as::<_, SyncJobRow>(&format!(
            r#"
            SELECT {}
            FROM sync_jobs
            WHERE status = 'pending' AND scheduled_at <= ?
            ORDER BY priority DESC, created_at ASC, rowid ASC
            LIMIT ?
            "#,
            JOB_COLUMNS
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter().map(SyncJob::try_from).collect()
    }

    async fn find_by_user(&self, user_id: UserId, limit: u32) -> Result<Vec<SyncJob>> {
        let rows = sqlx::query_as::<_, SyncJobRow>(&format!(
            r#"
            SELECT {}
            FROM sync_jobs
            WHERE user_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
            JOB_COLUMNS
        ))
        .bind(user_id.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter().map(SyncJob::try_from).collect()
    }

    async fn count_by_status(&self, status: SyncStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_jobs WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(count as u64)
    }

    async fn delete(&self, id: &SyncJobId) -> Result<()> {
        let result = sqlx::query("DELETE FROM sync_jobs WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SyncError::JobNotFound {
                job_id: id.to_string(),
            });
        }

        Ok(())
    }

    async fn delete_terminal_older_than(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sync_jobs
            WHERE created_at < ?
              AND status IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn reset_stale_running(&self, started_before: i64) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = 'pending', scheduled_at = ?, updated_at = ?
            WHERE status = 'running' AND started_at < ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(started_before)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    async fn test_repo() -> SqliteSyncJobRepository {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let repo = SqliteSyncJobRepository::new(pool);
        repo.initialize().await.unwrap();
        repo
    }

    fn job_for(user: i64, device: i64, job_type: SyncJobType) -> SyncJob {
        SyncJob::new(UserId(user), DeviceId(device), job_type)
    }

    #[tokio::test]
    async fn test_insert_and_find_by_id() {
        let repo = test_repo().await;

        let mut job = job_for(1, 10, SyncJobType::Activities);
        job.metadata = Some(json!({"runs_imported": 4}));
        repo.insert(&job).await.unwrap();

        let found = repo.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(found, job);
    }

    #[tokio::test]
    async fn test_find_by_id_missing() {
        let repo = test_repo().await;
        assert!(repo.find_by_id(&SyncJobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_round_trip() {
        let repo = test_repo().await;

        let job = job_for(1, 10, SyncJobType::FullSync);
        repo.insert(&job).await.unwrap();

        let mut running = job.start().unwrap();
        running.update_progress(33).unwrap();
        repo.update(&running).await.unwrap();

        let found = repo.find_by_id(&running.id).await.unwrap().unwrap();
        assert_eq!(found.status, SyncStatus::Running);
        assert_eq!(found.progress, 33);
        assert!(found.started_at.is_some());
    }

    #[tokio::test]
    async fn test_update_missing_job() {
        let repo = test_repo().await;
        let job = job_for(1, 10, SyncJobType::Activities);
        assert!(matches!(
            repo.update(&job).await,
            Err(SyncError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_find_active_for_matches_non_terminal_only() {
        let repo = test_repo().await;

        let pending = job_for(1, 10, SyncJobType::Activities);
        repo.insert(&pending).await.unwrap();

        let found = repo
            .find_active_for(UserId(1), DeviceId(10), SyncJobType::Activities)
            .await
            .unwrap();
        assert_eq!(found.map(|j| j.id), Some(pending.id));

        // Other triples don't match
        assert!(repo
            .find_active_for(UserId(1), DeviceId(11), SyncJobType::Activities)
            .await
            .unwrap()
            .is_none());
        assert!(repo
            .find_active_for(UserId(1), DeviceId(10), SyncJobType::FullSync)
            .await
            .unwrap()
            .is_none());

        // Terminal jobs don't count against the triple
        let done = repo
            .find_by_id(&pending.id)
            .await
            .unwrap()
            .unwrap()
            .start()
            .unwrap()
            .complete()
            .unwrap();
        repo.update(&done).await.unwrap();

        assert!(repo
            .find_active_for(UserId(1), DeviceId(10), SyncJobType::Activities)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_find_due_respects_schedule_and_priority() {
        let repo = test_repo().await;
        let now = chrono::Utc::now().timestamp();

        let low = job_for(1, 10, SyncJobType::Activities).with_priority(Priority::Low);
        let high = job_for(1, 11, SyncJobType::Activities).with_priority(Priority::High);
        let normal = job_for(1, 12, SyncJobType::Activities);
        let later = job_for(1, 13, SyncJobType::Activities).with_delay(Duration::from_secs(3600));

        for job in [&low, &high, &normal, &later] {
            repo.insert(job).await.unwrap();
        }

        let due = repo.find_due(now, 10).await.unwrap();

        // The delayed job is not eligible; the rest come back high to low
        assert_eq!(due.len(), 3);
        assert_eq!(due[0].id, high.id);
        assert_eq!(due[1].id, normal.id);
        assert_eq!(due[2].id, low.id);
    }

    #[tokio::test]
    async fn test_find_due_honors_limit() {
        let repo = test_repo().await;
        let now = chrono::Utc::now().timestamp();

        for device in 0..5 {
            repo.insert(&job_for(1, device, SyncJobType::Activities))
                .await
                .unwrap();
        }

        assert_eq!(repo.find_due(now, 3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_find_by_user_newest_first() {
        let repo = test_repo().await;

        let mut expected = Vec::new();
        for device in 0..4 {
            let job = job_for(7, device, SyncJobType::Activities);
            repo.insert(&job).await.unwrap();
            expected.push(job.id);
        }
        repo.insert(&job_for(8, 99, SyncJobType::Activities))
            .await
            .unwrap();

        let jobs = repo.find_by_user(UserId(7), 3).await.unwrap();
        assert_eq!(jobs.len(), 3);
        // Most recently created first
        assert_eq!(jobs[0].id, expected[3]);
        assert_eq!(jobs[1].id, expected[2]);
        assert_eq!(jobs[2].id, expected[1]);
    }

    #[tokio::test]
    async fn test_count_by_status() {
        let repo = test_repo().await;

        let a = job_for(1, 10, SyncJobType::Activities);
        let b = job_for(1, 11, SyncJobType::Activities);
        repo.insert(&a).await.unwrap();
        repo.insert(&b).await.unwrap();

        let running = b.start().unwrap();
        repo.update(&running).await.unwrap();

        assert_eq!(repo.count_by_status(SyncStatus::Pending).await.unwrap(), 1);
        assert_eq!(repo.count_by_status(SyncStatus::Running).await.unwrap(), 1);
        assert_eq!(repo.count_by_status(SyncStatus::Failed).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_terminal_older_than() {
        let repo = test_repo().await;
        let now = chrono::Utc::now().timestamp();

        // An old completed job, an old pending job, and a fresh completed job
        let mut old_done = job_for(1, 10, SyncJobType::Activities);
        old_done.created_at = now - 10 * 24 * 3600;
        let old_done = {
            repo.insert(&old_done).await.unwrap();
            let done = old_done.start().unwrap().complete().unwrap();
            repo.update(&done).await.unwrap();
            done
        };

        let mut old_pending = job_for(1, 11, SyncJobType::Activities);
        old_pending.created_at = now - 10 * 24 * 3600;
        repo.insert(&old_pending).await.unwrap();

        let fresh_done = job_for(1, 12, SyncJobType::Activities)
            .start()
            .unwrap()
            .complete()
            .unwrap();
        repo.insert(&fresh_done).await.unwrap();

        let cutoff = now - 7 * 24 * 3600;
        let deleted = repo.delete_terminal_older_than(cutoff).await.unwrap();

        assert_eq!(deleted, 1);
        assert!(repo.find_by_id(&old_done.id).await.unwrap().is_none());
        assert!(repo.find_by_id(&old_pending.id).await.unwrap().is_some());
        assert!(repo.find_by_id(&fresh_done.id).await.unwrap().is_some());

        // Idempotent
        assert_eq!(repo.delete_terminal_older_than(cutoff).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reset_stale_running() {
        let repo = test_repo().await;
        let now = chrono::Utc::now().timestamp();

        let mut stale = job_for(1, 10, SyncJobType::Activities).start().unwrap();
        stale.started_at = Some(now - 7200);
        repo.insert(&stale).await.unwrap();

        let fresh = job_for(1, 11, SyncJobType::Activities).start().unwrap();
        repo.insert(&fresh).await.unwrap();

        let reset = repo.reset_stale_running(now - 3600).await.unwrap();
        assert_eq!(reset, 1);

        let recovered = repo.find_by_id(&stale.id).await.unwrap().unwrap();
        assert_eq!(recovered.status, SyncStatus::Pending);
        assert!(recovered.scheduled_at <= chrono::Utc::now().timestamp());

        let untouched = repo.find_by_id(&fresh.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, SyncStatus::Running);
    }
}
