//! # Job Executor
//!
//! Performs the type-specific synchronization work for one claimed job:
//! resolves the target device, looks up the vendor's provider, pulls the
//! requested data, and writes it to the local store.
//!
//! The executor reports outcomes; deciding what a failure means for the job
//! record (retry vs. permanent failure) is the scheduler's business.
//!
//! ## Full sync
//!
//! A `FullSync` job runs activities, then heart rate, then metrics within
//! one attempt, persisting progress checkpoints (33/66) between phases. The
//! persisted status is re-read between phases: a job cancelled midway stops
//! there. A retried full sync restarts from the first phase and relies on
//! the activities idempotency check to avoid duplicate imports.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use core_store::{
    ActivityRepository, BodyMeasurement, ConnectionStatus, Device, DeviceDirectory, DeviceKind,
    HealthMetricsRepository, HeartRatePoint, Run,
};
use provider_traits::DeviceProvider;

use crate::error::ExecutionError;
use crate::job::{SyncJob, SyncJobId, SyncJobType, SyncStatus};
use crate::repository::SyncJobRepository;

/// Counters describing what one successful execution imported.
///
/// Serialized into the job record's metadata for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub runs_imported: u64,
    pub runs_skipped: u64,
    pub heart_rate_points: u64,
    pub body_measurements: u64,
}

/// How a (non-failing) execution attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// All requested data was pulled and stored
    Completed(ImportSummary),
    /// The executor observed a cancellation flag and stopped early
    Cancelled,
}

/// Executes claimed sync jobs against registered device providers.
pub struct SyncExecutor {
    jobs: Arc<dyn SyncJobRepository>,
    devices: Arc<dyn DeviceDirectory>,
    activities: Arc<dyn ActivityRepository>,
    metrics: Arc<dyn HealthMetricsRepository>,
    providers: RwLock<HashMap<DeviceKind, Arc<dyn DeviceProvider>>>,
}

impl SyncExecutor {
    pub fn new(
        jobs: Arc<dyn SyncJobRepository>,
        devices: Arc<dyn DeviceDirectory>,
        activities: Arc<dyn ActivityRepository>,
        metrics: Arc<dyn HealthMetricsRepository>,
    ) -> Self {
        Self {
            jobs,
            devices,
            activities,
            metrics,
            providers: RwLock::new(HashMap::new()),
        }
    }

    /// Register the provider implementation for a device vendor.
    ///
    /// Jobs targeting a device whose kind has no registered provider fail
    /// with a terminal error.
    pub async fn register_provider(&self, kind: DeviceKind, provider: Arc<dyn DeviceProvider>) {
        let mut providers = self.providers.write().await;
        providers.insert(kind, provider);
        info!(kind = %kind, "Registered device provider");
    }

    /// Execute one claimed, already-running job.
    ///
    /// `job` must have been transitioned to `Running` and persisted by the
    /// caller. Progress checkpoints for `FullSync` are written through the
    /// job repository as phases finish.
    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.job_type))]
    pub async fn execute(
        &self,
        job: &mut SyncJob,
    ) -> std::result::Result<SyncOutcome, ExecutionError> {
        let device = self
            .devices
            .find_by_id(job.device_id)
            .await?
            .ok_or(ExecutionError::DeviceNotFound)?;

        if device.connection_status != ConnectionStatus::Connected {
            return Err(ExecutionError::DeviceNotConnected);
        }

        let provider = {
            let providers = self.providers.read().await;
            providers
                .get(&device.kind)
                .cloned()
                .ok_or(ExecutionError::UnsupportedDeviceKind)?
        };

        // Cursor: everything newer than the device's last successful sync
        let since = device.last_sync_at;

        let mut summary = ImportSummary::default();
        match job.job_type {
            SyncJobType::Activities => {
                let (imported, skipped) = self
                    .import_activities(job, &device, provider.as_ref(), since)
                    .await?;
                summary.runs_imported = imported;
                summary.runs_skipped = skipped;
            }
            SyncJobType::HeartRate => {
                summary.heart_rate_points = self
                    .import_heart_rate(job, &device, provider.as_ref(), since)
                    .await?;
            }
            SyncJobType::Metrics => {
                summary.body_measurements = self
                    .import_metrics(job, &device, provider.as_ref(), since)
                    .await?;
            }
            SyncJobType::FullSync => {
                let (imported, skipped) = self
                    .import_activities(job, &device, provider.as_ref(), since)
                    .await?;
                summary.runs_imported = imported;
                summary.runs_skipped = skipped;

                if self.cancelled(&job.id).await? {
                    info!("Cancellation observed after activities phase");
                    return Ok(SyncOutcome::Cancelled);
                }
                job.update_progress(33)?;
                self.jobs.update(job).await?;

                summary.heart_rate_points = self
                    .import_heart_rate(job, &device, provider.as_ref(), since)
                    .await?;

                if self.cancelled(&job.id).await? {
                    info!("Cancellation observed after heart-rate phase");
                    return Ok(SyncOutcome::Cancelled);
                }
                job.update_progress(66)?;
                self.jobs.update(job).await?;

                summary.body_measurements = self
                    .import_metrics(job, &device, provider.as_ref(), since)
                    .await?;
            }
        }

        Ok(SyncOutcome::Completed(summary))
    }

    /// Pull new activities and import each at most once.
    async fn import_activities(
        &self,
        job: &SyncJob,
        device: &Device,
        provider: &dyn DeviceProvider,
        since: Option<i64>,
    ) -> std::result::Result<(u64, u64), ExecutionError> {
        let activities = provider
            .fetch_activities(&device.external_ref, since)
            .await?;

        let mut imported = 0u64;
        let mut skipped = 0u64;
        for activity in &activities {
            let existing = self
                .activities
                .find_by_external_id(job.user_id, &activity.external_id)
                .await?;

            if existing.is_some() {
                skipped += 1;
                debug!(
                    external_id = %activity.external_id,
                    "Activity already imported, skipping"
                );
                continue;
            }

            let run = Run::from_provider_activity(job.user_id, job.device_id, activity);
            self.activities.insert(&run).await?;
            imported += 1;
        }

        info!(imported, skipped, "Activities phase finished");
        Ok((imported, skipped))
    }

    async fn import_heart_rate(
        &self,
        job: &SyncJob,
        device: &Device,
        provider: &dyn DeviceProvider,
        since: Option<i64>,
    ) -> std::result::Result<u64, ExecutionError> {
        let samples = provider
            .fetch_heart_rate(&device.external_ref, since)
            .await?;

        let points: Vec<HeartRatePoint> = samples
            .iter()
            .map(|sample| HeartRatePoint {
                device_id: job.device_id,
                user_id: job.user_id,
                recorded_at: sample.recorded_at,
                bpm: sample.bpm,
            })
            .collect();

        let written = self.metrics.upsert_heart_rate(&points).await?;
        info!(written, "Heart-rate phase finished");
        Ok(written)
    }

    async fn import_metrics(
        &self,
        job: &SyncJob,
        device: &Device,
        provider: &dyn DeviceProvider,
        since: Option<i64>,
    ) -> std::result::Result<u64, ExecutionError> {
        let metrics = provider.fetch_metrics(&device.external_ref, since).await?;

        let measurements: Vec<BodyMeasurement> = metrics
            .iter()
            .map(|metric| BodyMeasurement {
                user_id: job.user_id,
                device_id: job.device_id,
                kind: metric.kind,
                recorded_at: metric.recorded_at,
                value: metric.value,
            })
            .collect();

        let written = self.metrics.upsert_measurements(&measurements).await?;
        info!(written, "Metrics phase finished");
        Ok(written)
    }

    /// Re-read the persisted status to observe a soft-cancel flag.
    ///
    /// A record that disappeared mid-run is treated as cancelled.
    async fn cancelled(&self, id: &SyncJobId) -> std::result::Result<bool, ExecutionError> {
        let fresh = self.jobs.find_by_id(id).await?;
        Ok(match fresh {
            Some(job) => job.status == SyncStatus::Cancelled,
            None => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::SqliteSyncJobRepository;
    use core_store::{
        create_test_pool, DeviceId, NewDevice, SqliteActivityRepository, SqliteDeviceDirectory,
        SqliteHealthMetricsRepository, UserId,
    };
    use provider_traits::{
        BodyMetric, HeartRateSample, MetricKind, ProviderActivity, ProviderError,
    };

    /// Provider stub returning fixed payloads.
    struct StubProvider {
        activities: Vec<ProviderActivity>,
        heart_rate: Vec<HeartRateSample>,
        metrics: Vec<BodyMetric>,
    }

    impl StubProvider {
        fn empty() -> Self {
            Self {
                activities: Vec::new(),
                heart_rate: Vec::new(),
                metrics: Vec::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl DeviceProvider for StubProvider {
        async fn fetch_activities(
            &self,
            _device_ref: &str,
            _since: Option<i64>,
        ) -> provider_traits::Result<Vec<ProviderActivity>> {
            Ok(self.activities.clone())
        }

        async fn fetch_heart_rate(
            &self,
            _device_ref: &str,
            _since: Option<i64>,
        ) -> provider_traits::Result<Vec<HeartRateSample>> {
            Ok(self.heart_rate.clone())
        }

        async fn fetch_metrics(
            &self,
            _device_ref: &str,
            _since: Option<i64>,
        ) -> provider_traits::Result<Vec<BodyMetric>> {
            Ok(self.metrics.clone())
        }
    }

    /// Provider stub whose heart-rate endpoint always fails.
    struct FlakyHeartRateProvider;

    #[async_trait::async_trait]
    impl DeviceProvider for FlakyHeartRateProvider {
        async fn fetch_activities(
            &self,
            _device_ref: &str,
            _since: Option<i64>,
        ) -> provider_traits::Result<Vec<ProviderActivity>> {
            Ok(Vec::new())
        }

        async fn fetch_heart_rate(
            &self,
            _device_ref: &str,
            _since: Option<i64>,
        ) -> provider_traits::Result<Vec<HeartRateSample>> {
            Err(ProviderError::Timeout { seconds: 30 })
        }

        async fn fetch_metrics(
            &self,
            _device_ref: &str,
            _since: Option<i64>,
        ) -> provider_traits::Result<Vec<BodyMetric>> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        executor: SyncExecutor,
        jobs: Arc<SqliteSyncJobRepository>,
        activities: Arc<SqliteActivityRepository>,
        devices: Arc<SqliteDeviceDirectory>,
    }

    async fn harness() -> Harness {
        let pool = create_test_pool().await.unwrap();

        let jobs = Arc::new(SqliteSyncJobRepository::new(pool.clone()));
        jobs.initialize().await.unwrap();

        let devices = Arc::new(SqliteDeviceDirectory::new(pool.clone()));
        let activities = Arc::new(SqliteActivityRepository::new(pool.clone()));
        let metrics = Arc::new(SqliteHealthMetricsRepository::new(pool));

        let executor = SyncExecutor::new(
            jobs.clone(),
            devices.clone(),
            activities.clone(),
            metrics,
        );

        Harness {
            executor,
            jobs,
            activities,
            devices,
        }
    }

    async fn paired_device(h: &Harness, status: ConnectionStatus) -> DeviceId {
        h.devices
            .insert(&NewDevice {
                user_id: UserId(1),
                kind: DeviceKind::Garmin,
                external_ref: "garmin-1".to_string(),
                connection_status: status,
                label: None,
            })
            .await
            .unwrap()
    }

    async fn claimed_job(h: &Harness, device_id: DeviceId, job_type: SyncJobType) -> SyncJob {
        let job = SyncJob::new(UserId(1), device_id, job_type);
        h.jobs.insert(&job).await.unwrap();
        let running = job.start().unwrap();
        h.jobs.update(&running).await.unwrap();
        running
    }

    fn activity(external_id: &str) -> ProviderActivity {
        ProviderActivity {
            external_id: external_id.to_string(),
            sport: "running".to_string(),
            started_at: 1_700_000_000,
            duration_secs: 1_800,
            distance_m: Some(5_000.0),
            avg_heart_rate: Some(150),
            calories: Some(300),
        }
    }

    #[tokio::test]
    async fn test_missing_device_is_terminal_error() {
        let h = harness().await;
        let mut job = claimed_job(&h, DeviceId(404), SyncJobType::Activities).await;

        let err = h.executor.execute(&mut job).await.unwrap_err();
        assert!(matches!(err, ExecutionError::DeviceNotFound));
        assert_eq!(err.to_string(), "Device not found");
    }

    #[tokio::test]
    async fn test_disconnected_device_is_terminal_error() {
        let h = harness().await;
        let device_id = paired_device(&h, ConnectionStatus::Disconnected).await;
        let mut job = claimed_job(&h, device_id, SyncJobType::Activities).await;

        let err = h.executor.execute(&mut job).await.unwrap_err();
        assert!(matches!(err, ExecutionError::DeviceNotConnected));
        assert_eq!(err.to_string(), "Device not connected");
    }

    #[tokio::test]
    async fn test_unregistered_vendor_is_terminal_error() {
        let h = harness().await;
        let device_id = paired_device(&h, ConnectionStatus::Connected).await;
        let mut job = claimed_job(&h, device_id, SyncJobType::Activities).await;

        // No provider registered for Garmin
        let err = h.executor.execute(&mut job).await.unwrap_err();
        assert!(matches!(err, ExecutionError::UnsupportedDeviceKind));
        assert_eq!(err.to_string(), "Unsupported device type");
    }

    #[tokio::test]
    async fn test_activities_import_is_idempotent() {
        let h = harness().await;
        let device_id = paired_device(&h, ConnectionStatus::Connected).await;

        h.executor
            .register_provider(
                DeviceKind::Garmin,
                Arc::new(StubProvider {
                    activities: vec![activity("act-1"), activity("act-2")],
                    ..StubProvider::empty()
                }),
            )
            .await;

        let mut first = claimed_job(&h, device_id, SyncJobType::Activities).await;
        let outcome = h.executor.execute(&mut first).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Completed(ImportSummary {
                runs_imported: 2,
                ..ImportSummary::default()
            })
        );

        // Close out the first job so a second one can be created for the triple
        let done = first.complete().unwrap();
        h.jobs.update(&done).await.unwrap();

        // A second run over the same payload imports nothing new
        let mut second = claimed_job(&h, device_id, SyncJobType::Activities).await;
        let outcome = h.executor.execute(&mut second).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Completed(ImportSummary {
                runs_imported: 0,
                runs_skipped: 2,
                ..ImportSummary::default()
            })
        );

        assert_eq!(h.activities.count_for_user(UserId(1)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_full_sync_persists_phase_checkpoints() {
        let h = harness().await;
        let device_id = paired_device(&h, ConnectionStatus::Connected).await;

        h.executor
            .register_provider(
                DeviceKind::Garmin,
                Arc::new(StubProvider {
                    activities: vec![activity("act-1")],
                    heart_rate: vec![HeartRateSample {
                        recorded_at: 1_700_000_100,
                        bpm: 140,
                    }],
                    metrics: vec![BodyMetric {
                        recorded_at: 1_700_000_200,
                        kind: MetricKind::RestingHeartRate,
                        value: 52.0,
                    }],
                }),
            )
            .await;

        let mut job = claimed_job(&h, device_id, SyncJobType::FullSync).await;
        let outcome = h.executor.execute(&mut job).await.unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::Completed(ImportSummary {
                runs_imported: 1,
                runs_skipped: 0,
                heart_rate_points: 1,
                body_measurements: 1,
            })
        );

        // The final checkpoint persisted before the last phase is 66
        let persisted = h.jobs.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(persisted.progress, 66);
    }

    #[tokio::test]
    async fn test_full_sync_stops_at_cancellation_flag() {
        let h = harness().await;
        let device_id = paired_device(&h, ConnectionStatus::Connected).await;

        h.executor
            .register_provider(DeviceKind::Garmin, Arc::new(StubProvider::empty()))
            .await;

        let mut job = claimed_job(&h, device_id, SyncJobType::FullSync).await;

        // Soft-cancel the persisted record while the attempt is in flight
        let cancelled = h
            .jobs
            .find_by_id(&job.id)
            .await
            .unwrap()
            .unwrap()
            .cancel()
            .unwrap();
        h.jobs.update(&cancelled).await.unwrap();

        let outcome = h.executor.execute(&mut job).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Cancelled);

        // The cancelled status was not overwritten by a checkpoint
        let persisted = h.jobs.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(persisted.status, SyncStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_full_sync_phase_failure_fails_whole_attempt() {
        let h = harness().await;
        let device_id = paired_device(&h, ConnectionStatus::Connected).await;

        h.executor
            .register_provider(DeviceKind::Garmin, Arc::new(FlakyHeartRateProvider))
            .await;

        let mut job = claimed_job(&h, device_id, SyncJobType::FullSync).await;
        let err = h.executor.execute(&mut job).await.unwrap_err();

        assert!(matches!(
            err,
            ExecutionError::Provider(ProviderError::Timeout { .. })
        ));
        // Activities phase had completed; its checkpoint is persisted
        let persisted = h.jobs.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(persisted.progress, 33);
    }
}
