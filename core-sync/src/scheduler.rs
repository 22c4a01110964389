//! # Sync Scheduler
//!
//! The process-wide coordinator for background synchronization: accepts sync
//! requests, persists them as durable job records, claims eligible jobs with
//! bounded concurrency, and classifies failures into backoff retries or
//! permanent failures.
//!
//! ## Lifecycle
//!
//! A scheduler is an explicitly constructed instance with injected store and
//! provider dependencies; there is no implicit global. [`SyncScheduler::start`]
//! spawns the timer-driven poll loop (first tick immediate) and is a no-op if
//! already running; [`SyncScheduler::stop`] halts future polls without
//! touching in-flight executions.
//!
//! ## Claiming
//!
//! Each poll selects pending jobs whose `scheduled_at` has passed, highest
//! priority first, and claims at most `max_concurrent_jobs - active` of them.
//! Claims are recorded in an in-memory set so one process never dispatches
//! the same record twice; the persisted job record stays the source of
//! truth. The set is rebuilt empty on restart, so a crash mid-execution
//! leaves the record `Running` until
//! [`SyncScheduler::reset_stale_running_jobs`] is invoked explicitly at
//! startup.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SchedulerConfig, SyncScheduler, SyncJobType, Priority};
//! use std::time::Duration;
//!
//! let scheduler = SyncScheduler::new(SchedulerConfig::default(), pool).await?;
//! scheduler.register_provider(DeviceKind::Garmin, garmin_provider).await;
//! scheduler.start();
//!
//! let job_id = scheduler
//!     .schedule_sync(user_id, device_id, SyncJobType::FullSync, Priority::Normal, Duration::ZERO)
//!     .await?;
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::FutureExt;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use core_store::{
    ActivityRepository, DeviceDirectory, DeviceId, DeviceKind, HealthMetricsRepository,
    SqliteActivityRepository, SqliteDeviceDirectory, SqliteHealthMetricsRepository, UserId,
};
use provider_traits::DeviceProvider;

use crate::error::ExecutionError;
use crate::executor::{SyncExecutor, SyncOutcome};
use crate::job::{Priority, SyncJob, SyncJobId, SyncJobType};
use crate::repository::{SqliteSyncJobRepository, SyncJobRepository};
use crate::retry::{self, RetryClass};
use crate::Result;

/// Limit used by callers that don't care to pick one for
/// [`SyncScheduler::get_user_jobs`].
pub const DEFAULT_USER_JOBS_LIMIT: u32 = 10;

/// Retention horizon used by the maintenance sweep unless overridden.
pub const DEFAULT_JOB_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Scheduler configuration, read once at construction.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the poll loop looks for eligible jobs
    pub poll_interval: Duration,

    /// Maximum number of jobs executing at once
    pub max_concurrent_jobs: usize,

    /// Retry budget stamped onto newly created jobs
    pub default_max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            max_concurrent_jobs: 3,
            default_max_retries: 3,
        }
    }
}

/// The background sync scheduler.
///
/// Cheap to clone; clones share all state, including the poll-loop
/// lifecycle.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    jobs: Arc<dyn SyncJobRepository>,
    devices: Arc<dyn DeviceDirectory>,
    executor: SyncExecutor,
    /// Jobs claimed by this process and not yet settled. Mutated only under
    /// this mutex, which also covers the budget computation in `poll`.
    active_jobs: Mutex<HashSet<SyncJobId>>,
    /// Serializes the dedup check and insert in `schedule_sync`
    admission: Mutex<()>,
    /// Present while the poll loop is running
    poll_token: StdMutex<Option<CancellationToken>>,
}

impl SyncScheduler {
    /// Create a scheduler wired to SQLite-backed repositories on `pool`.
    ///
    /// Initializes the job table if it does not exist. The device, activity,
    /// and metric tables are expected to be migrated by the store layer.
    pub async fn new(config: SchedulerConfig, pool: SqlitePool) -> Result<Self> {
        let jobs = Arc::new(SqliteSyncJobRepository::new(pool.clone()));
        jobs.initialize().await?;

        let devices = Arc::new(SqliteDeviceDirectory::new(pool.clone()));
        let activities = Arc::new(SqliteActivityRepository::new(pool.clone()));
        let metrics = Arc::new(SqliteHealthMetricsRepository::new(pool));

        Ok(Self::with_repositories(
            config, jobs, devices, activities, metrics,
        ))
    }

    /// Create a scheduler over caller-supplied repository implementations.
    pub fn with_repositories(
        config: SchedulerConfig,
        jobs: Arc<dyn SyncJobRepository>,
        devices: Arc<dyn DeviceDirectory>,
        activities: Arc<dyn ActivityRepository>,
        metrics: Arc<dyn HealthMetricsRepository>,
    ) -> Self {
        let executor = SyncExecutor::new(
            jobs.clone(),
            devices.clone(),
            activities,
            metrics,
        );

        Self {
            inner: Arc::new(SchedulerInner {
                config,
                jobs,
                devices,
                executor,
                active_jobs: Mutex::new(HashSet::new()),
                admission: Mutex::new(()),
                poll_token: StdMutex::new(None),
            }),
        }
    }

    /// Register the provider implementation for a device vendor.
    pub async fn register_provider(&self, kind: DeviceKind, provider: Arc<dyn DeviceProvider>) {
        self.inner.executor.register_provider(kind, provider).await;
    }

    /// Begin periodic polling. The first poll fires immediately.
    ///
    /// No-op if the scheduler is already running.
    pub fn start(&self) {
        let mut guard = self
            .inner
            .poll_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if guard.is_some() {
            debug!("Scheduler already running");
            return;
        }

        let token = CancellationToken::new();
        *guard = Some(token.clone());
        drop(guard);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(inner.config.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        // A store failure aborts this cycle only; the next
                        // tick retries.
                        if let Err(e) = inner.poll().await {
                            error!(error = %e, "Poll cycle failed");
                        }
                    }
                }
            }

            debug!("Poll loop stopped");
        });

        info!(
            poll_interval_secs = self.inner.config.poll_interval.as_secs(),
            max_concurrent_jobs = self.inner.config.max_concurrent_jobs,
            "Sync scheduler started"
        );
    }

    /// Halt future polling. In-flight job executions keep running to
    /// completion and settle normally.
    ///
    /// No-op if the scheduler is not running. Safe to call from any shutdown
    /// path.
    pub fn stop(&self) {
        let mut guard = self
            .inner
            .poll_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(token) = guard.take() {
            token.cancel();
            info!("Sync scheduler stopped");
        }
    }

    /// Whether the poll loop is currently running
    pub fn is_running(&self) -> bool {
        self.inner
            .poll_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    /// Run one poll pass on demand, outside the timer.
    pub async fn poll_now(&self) -> Result<()> {
        self.inner.poll().await
    }

    /// Request a sync for `(user, device, type)`.
    ///
    /// If a non-terminal job already exists for the triple, its id is
    /// returned and nothing is created or mutated. Otherwise a pending job
    /// becomes eligible `delay` from now. The device id is not validated
    /// here; resolution happens at execution time.
    pub async fn schedule_sync(
        &self,
        user_id: UserId,
        device_id: DeviceId,
        job_type: SyncJobType,
        priority: Priority,
        delay: Duration,
    ) -> Result<SyncJobId> {
        let _admission = self.inner.admission.lock().await;

        if let Some(existing) = self
            .inner
            .jobs
            .find_active_for(user_id, device_id, job_type)
            .await?
        {
            debug!(
                job_id = %existing.id,
                user_id = %user_id,
                device_id = %device_id,
                job_type = %job_type,
                "Sync already scheduled, returning existing job"
            );
            return Ok(existing.id);
        }

        let job = SyncJob::new(user_id, device_id, job_type)
            .with_priority(priority)
            .with_delay(delay)
            .with_max_retries(self.inner.config.default_max_retries);

        self.inner.jobs.insert(&job).await?;

        info!(
            job_id = %job.id,
            user_id = %user_id,
            device_id = %device_id,
            job_type = %job_type,
            priority = ?priority,
            delay_secs = delay.as_secs(),
            "Scheduled sync job"
        );

        Ok(job.id)
    }

    /// Cancel a job.
    ///
    /// Returns `true` if the cancellation flag was applied. A `Running` job
    /// is soft-cancelled: the flag is persisted but in-flight work is not
    /// interrupted. Unknown and already-terminal jobs return `false`.
    pub async fn cancel_job(&self, id: &SyncJobId) -> Result<bool> {
        let Some(job) = self.inner.jobs.find_by_id(id).await? else {
            return Ok(false);
        };

        if job.status.is_terminal() {
            return Ok(false);
        }

        match job.cancel() {
            Ok(cancelled) => {
                self.inner.jobs.update(&cancelled).await?;
                info!(job_id = %id, "Cancelled sync job");
                Ok(true)
            }
            // Lost the race against a concurrent settle
            Err(_) => Ok(false),
        }
    }

    /// Current state of a job, or `None` for unknown ids
    pub async fn get_job_status(&self, id: &SyncJobId) -> Result<Option<SyncJob>> {
        self.inner.jobs.find_by_id(id).await
    }

    /// A user's jobs, most recently created first
    pub async fn get_user_jobs(&self, user_id: UserId, limit: u32) -> Result<Vec<SyncJob>> {
        self.inner.jobs.find_by_user(user_id, limit).await
    }

    /// Delete terminal jobs older than `max_age`. Idempotent; meant to be
    /// driven by an external maintenance task, not the scheduler itself.
    pub async fn cleanup_old_jobs(&self, max_age: Duration) -> Result<u64> {
        let cutoff = chrono::Utc::now().timestamp() - max_age.as_secs() as i64;
        let deleted = self.inner.jobs.delete_terminal_older_than(cutoff).await?;
        if deleted > 0 {
            info!(deleted, "Cleaned up old sync jobs");
        }
        Ok(deleted)
    }

    /// Reset `Running` jobs orphaned by a crash back to `Pending`.
    ///
    /// The in-memory claim set does not survive restarts, so a job that was
    /// mid-execution when the process died stays `Running` forever unless
    /// the host calls this during startup, before `start()`. Jobs whose
    /// attempt began within `stale_after` are left alone.
    pub async fn reset_stale_running_jobs(&self, stale_after: Duration) -> Result<u64> {
        let cutoff = chrono::Utc::now().timestamp() - stale_after.as_secs() as i64;
        let reset = self.inner.jobs.reset_stale_running(cutoff).await?;
        if reset > 0 {
            warn!(reset, "Reset stale running jobs back to pending");
        }
        Ok(reset)
    }
}

impl SchedulerInner {
    /// One poll pass: claim up to the free budget of eligible jobs and
    /// dispatch each as a detached task.
    async fn poll(self: &Arc<Self>) -> Result<()> {
        {
            let active = self.active_jobs.lock().await;
            if active.len() >= self.config.max_concurrent_jobs {
                debug!(
                    active = active.len(),
                    "Concurrency budget exhausted, skipping poll"
                );
                return Ok(());
            }
        }

        let now = chrono::Utc::now().timestamp();

        // Fetching more than the cap is pointless: at most
        // `max_concurrent_jobs` rows can be claimed or defensively skipped.
        let candidates = self
            .jobs
            .find_due(now, self.config.max_concurrent_jobs as u32)
            .await?;

        if candidates.is_empty() {
            return Ok(());
        }

        // Budget re-computation and claiming happen under one lock so
        // concurrent polls cannot oversubscribe the cap.
        let mut active = self.active_jobs.lock().await;
        let available = self
            .config
            .max_concurrent_jobs
            .saturating_sub(active.len());

        if available == 0 {
            return Ok(());
        }

        let mut claimed = 0usize;
        for job in candidates {
            if claimed == available {
                break;
            }
            // A claimed job may still read as pending until its task
            // persists the transition; never dispatch it twice.
            if !active.insert(job.id) {
                continue;
            }
            claimed += 1;

            let inner = Arc::clone(self);
            tokio::spawn(async move {
                inner.run_claimed(job).await;
            });
        }

        if claimed > 0 {
            debug!(claimed, active = active.len(), "Claimed jobs for execution");
        }

        Ok(())
    }

    /// Drive one claimed job to settlement and release its claim.
    ///
    /// The claim is released on every exit path, including a panicking
    /// executor; a panic additionally finalizes the record as failed.
    async fn run_claimed(self: Arc<Self>, job: SyncJob) {
        let job_id = job.id;

        let drive = std::panic::AssertUnwindSafe(self.drive(job));
        if drive.catch_unwind().await.is_err() {
            error!(job_id = %job_id, "Job execution panicked");
            if let Ok(Some(fresh)) = self.jobs.find_by_id(&job_id).await {
                if let Ok(failed) = fresh.fail("Job execution panicked".to_string()) {
                    if let Err(e) = self.jobs.update(&failed).await {
                        error!(job_id = %job_id, error = %e, "Could not record panic failure");
                    }
                }
            }
        }

        let mut active = self.active_jobs.lock().await;
        active.remove(&job_id);
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.job_type))]
    async fn drive(&self, job: SyncJob) {
        // Re-read before starting: the job may have been cancelled between
        // the due query and this task getting scheduled.
        let fresh = match self.jobs.find_by_id(&job.id).await {
            Ok(Some(fresh)) => fresh,
            Ok(None) => {
                debug!("Job disappeared before execution");
                return;
            }
            Err(e) => {
                error!(error = %e, "Could not load claimed job");
                return;
            }
        };

        let fresh_status = fresh.status;
        let mut running = match fresh.start() {
            Ok(running) => running,
            Err(_) => {
                debug!(status = %fresh_status, "Job no longer pending, releasing claim");
                return;
            }
        };

        if let Err(e) = self.jobs.update(&running).await {
            error!(error = %e, "Could not persist running transition");
            return;
        }

        info!(
            user_id = %running.user_id,
            device_id = %running.device_id,
            attempt = running.retry_count + 1,
            "Executing sync job"
        );

        match self.executor.execute(&mut running).await {
            Ok(SyncOutcome::Completed(summary)) => {
                if let Ok(metadata) = serde_json::to_value(summary) {
                    running.set_metadata(metadata);
                }

                let device_id = running.device_id;
                match running.complete() {
                    Ok(completed) => {
                        if let Err(e) = self.jobs.update(&completed).await {
                            error!(error = %e, "Could not persist completion");
                            return;
                        }

                        // Visible side effect for the rest of the app;
                        // last-writer-wins.
                        let now = chrono::Utc::now().timestamp();
                        if let Err(e) = self.devices.update_last_sync(device_id, now).await {
                            warn!(error = %e, "Could not update device last_sync");
                        }

                        info!(
                            runs_imported = summary.runs_imported,
                            runs_skipped = summary.runs_skipped,
                            "Sync job completed"
                        );
                    }
                    Err(e) => warn!(error = %e, "Completed job was no longer running"),
                }
            }
            Ok(SyncOutcome::Cancelled) => {
                info!("Sync job stopped at cancellation flag");
            }
            Err(error) => self.settle_failure(running, error).await,
        }
    }

    /// Apply the retry classifier to a failed attempt.
    async fn settle_failure(&self, job: SyncJob, error: ExecutionError) {
        let message = error.to_string();

        let transient = retry::classify(&error) == RetryClass::Transient;
        if transient && job.retry_count + 1 < job.max_retries {
            // Backoff keyed to the retry count the job is about to have
            let delay = retry::backoff_delay(job.retry_count + 1);
            match job.requeue(message.clone(), delay) {
                Ok(requeued) => {
                    if let Err(e) = self.jobs.update(&requeued).await {
                        error!(error = %e, "Could not persist retry");
                        return;
                    }
                    warn!(
                        error = %message,
                        retry_count = requeued.retry_count,
                        max_retries = requeued.max_retries,
                        backoff_secs = delay.as_secs(),
                        "Sync job failed, will retry"
                    );
                }
                Err(e) => warn!(error = %e, "Could not requeue failed job"),
            }
        } else {
            match job.fail(message.clone()) {
                Ok(failed) => {
                    if let Err(e) = self.jobs.update(&failed).await {
                        error!(error = %e, "Could not persist failure");
                        return;
                    }
                    warn!(
                        error = %message,
                        retry_count = failed.retry_count,
                        terminal = !transient,
                        "Sync job failed permanently"
                    );
                }
                Err(e) => warn!(error = %e, "Could not finalize failed job"),
            }
        }
    }
}
