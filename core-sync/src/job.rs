//! # Sync Job State Machine
//!
//! The durable unit of background synchronization work, with validated state
//! transitions.
//!
//! ## State Machine
//!
//! ```text
//! Pending → Running → Completed
//!     ↓        ↓  ↓
//!     ↓        ↓  └─→ Failed
//!     └────────┴────→ Cancelled
//!          ↑   ↓
//!          └───┘  (retry re-queue: Running → Pending, same record)
//! ```
//!
//! A retried job is not a new record: a transient failure sends the record
//! back to `Pending` with an incremented `retry_count` and a future
//! `scheduled_at`. `Failed` is always terminal.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SyncJob, SyncJobType};
//! use core_store::{DeviceId, UserId};
//!
//! let job = SyncJob::new(UserId(1), DeviceId(10), SyncJobType::Activities);
//! let mut job = job.start()?;
//! job.update_progress(50)?;
//! let job = job.complete()?;
//! ```

use crate::{Result, SyncError};
use core_store::{DeviceId, UserId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Retry budget applied to new jobs unless the scheduler configuration says
/// otherwise.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

// ============================================================================
// ID Type
// ============================================================================

/// Unique identifier for a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncJobId(Uuid);

impl SyncJobId {
    /// Create a new random sync job ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a sync job ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidJobId(e.to_string()))?,
        ))
    }

    /// Get the string representation of this ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Status, Type, Priority
// ============================================================================

/// The current status of a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Job is waiting for its `scheduled_at` time and a free slot
    Pending,
    /// Job has been claimed and is executing
    Running,
    /// Job finished successfully
    Completed,
    /// Job failed permanently (non-retryable error or retry budget spent)
    Failed,
    /// Job was cancelled by the user
    Cancelled,
}

impl SyncStatus {
    /// Check if this status represents a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed | SyncStatus::Failed | SyncStatus::Cancelled
        )
    }

    /// Check if this status represents a non-terminal state
    pub fn is_active(&self) -> bool {
        matches!(self, SyncStatus::Pending | SyncStatus::Running)
    }

    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
            SyncStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "running" => Ok(SyncStatus::Running),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            "cancelled" => Ok(SyncStatus::Cancelled),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a sync job pulls from the device provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncJobType {
    /// Import new activities recorded on the device
    Activities,
    /// Pull continuous heart-rate samples
    HeartRate,
    /// Pull daily body metrics
    Metrics,
    /// Activities, then heart rate, then metrics, in one attempt
    FullSync,
}

impl SyncJobType {
    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncJobType::Activities => "activities",
            SyncJobType::HeartRate => "heart_rate",
            SyncJobType::Metrics => "metrics",
            SyncJobType::FullSync => "full_sync",
        }
    }
}

impl FromStr for SyncJobType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "activities" => Ok(SyncJobType::Activities),
            "heart_rate" => Ok(SyncJobType::HeartRate),
            "metrics" => Ok(SyncJobType::Metrics),
            "full_sync" => Ok(SyncJobType::FullSync),
            _ => Err(SyncError::InvalidJobType(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncJobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Selection-order tiebreak at poll time. Never preempts a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
}

impl Priority {
    /// Convert priority to database integer
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Parse priority from database integer
    pub fn from_i32(i: i32) -> Result<Self> {
        match i {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::Normal),
            2 => Ok(Priority::High),
            _ => Err(SyncError::InvalidPriority(i)),
        }
    }
}

// ============================================================================
// Sync Job Entity
// ============================================================================

/// A durable sync job record.
///
/// Transitions are validated: terminal states accept none, and the only way
/// back from `Running` to `Pending` is [`SyncJob::requeue`], which spends
/// retry budget. `updated_at` is refreshed by every mutator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    /// Unique identifier, minted when the record is created
    pub id: SyncJobId,
    /// Owning user
    pub user_id: UserId,
    /// Target device
    pub device_id: DeviceId,
    /// What to pull
    pub job_type: SyncJobType,
    /// Current status
    pub status: SyncStatus,
    /// Selection-order tiebreak
    pub priority: Priority,
    /// Earliest time the job becomes eligible for execution
    pub scheduled_at: i64,
    /// When the job entered `Running`
    pub started_at: Option<i64>,
    /// When the job entered a terminal state
    pub completed_at: Option<i64>,
    /// Last failure reason, retained across retries
    pub error_message: Option<String>,
    /// Failures so far; never exceeds `max_retries`
    pub retry_count: u32,
    /// Retry budget, fixed at creation
    pub max_retries: u32,
    /// 0–100, non-decreasing within an attempt
    pub progress: u8,
    /// Free-form execution-result annotations
    pub metadata: Option<serde_json::Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SyncJob {
    /// Create a new pending job scheduled for immediate eligibility.
    pub fn new(user_id: UserId, device_id: DeviceId, job_type: SyncJobType) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: SyncJobId::new(),
            user_id,
            device_id,
            job_type,
            status: SyncStatus::Pending,
            priority: Priority::Normal,
            scheduled_at: now,
            started_at: None,
            completed_at: None,
            error_message: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            progress: 0,
            metadata: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the selection priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Delay eligibility by the given duration from now
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.scheduled_at = chrono::Utc::now().timestamp() + delay.as_secs() as i64;
        self
    }

    /// Override the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether the job is eligible for claiming at `now`
    pub fn is_due(&self, now: i64) -> bool {
        self.status == SyncStatus::Pending && self.scheduled_at <= now
    }

    /// Claim the job for execution.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not `Pending`
    pub fn start(mut self) -> Result<Self> {
        self.validate_transition(SyncStatus::Running)?;
        self.status = SyncStatus::Running;
        self.started_at = Some(chrono::Utc::now().timestamp());
        self.touch();
        Ok(self)
    }

    /// Record progress within the current attempt.
    ///
    /// Progress is clamped to 100 and never decreases within an attempt;
    /// a stale lower value is simply ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not `Running`
    pub fn update_progress(&mut self, percent: u8) -> Result<()> {
        if self.status != SyncStatus::Running {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "update_progress".to_string(),
                reason: "Job must be running to update progress".to_string(),
            });
        }

        self.progress = self.progress.max(percent.min(100));
        self.touch();
        Ok(())
    }

    /// Attach free-form result annotations
    pub fn set_metadata(&mut self, metadata: serde_json::Value) {
        self.metadata = Some(metadata);
        self.touch();
    }

    /// Mark the job as successfully completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not `Running`
    pub fn complete(mut self) -> Result<Self> {
        self.validate_transition(SyncStatus::Completed)?;
        self.status = SyncStatus::Completed;
        self.completed_at = Some(chrono::Utc::now().timestamp());
        self.progress = 100;
        self.touch();
        Ok(self)
    }

    /// Mark the job as permanently failed.
    ///
    /// `retry_count` is left untouched: a terminal failure reports the budget
    /// actually spent.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not `Running`
    pub fn fail(mut self, error_message: String) -> Result<Self> {
        self.validate_transition(SyncStatus::Failed)?;
        self.status = SyncStatus::Failed;
        self.completed_at = Some(chrono::Utc::now().timestamp());
        self.error_message = Some(error_message);
        self.touch();
        Ok(self)
    }

    /// Send the job back to `Pending` after a transient failure.
    ///
    /// Increments `retry_count` and schedules the next attempt `delay` from
    /// now. The failure reason is recorded for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not `Running` or the retry budget is
    /// already spent
    pub fn requeue(mut self, error_message: String, delay: Duration) -> Result<Self> {
        self.validate_transition(SyncStatus::Pending)?;
        if self.retry_count + 1 >= self.max_retries {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: SyncStatus::Pending.as_str().to_string(),
                reason: format!(
                    "Retry budget exhausted ({}/{})",
                    self.retry_count, self.max_retries
                ),
            });
        }

        self.status = SyncStatus::Pending;
        self.retry_count += 1;
        self.scheduled_at = chrono::Utc::now().timestamp() + delay.as_secs() as i64;
        self.error_message = Some(error_message);
        self.touch();
        Ok(self)
    }

    /// Cancel the job.
    ///
    /// A `Pending` job will never run; a `Running` job is only flagged and
    /// keeps executing until its executor observes the flag (or finishes).
    ///
    /// # Errors
    ///
    /// Returns an error if the job is already terminal
    pub fn cancel(mut self) -> Result<Self> {
        self.validate_transition(SyncStatus::Cancelled)?;
        self.status = SyncStatus::Cancelled;
        self.completed_at = Some(chrono::Utc::now().timestamp());
        self.touch();
        Ok(self)
    }

    /// Duration of the attempt in seconds, if the job has started and settled
    pub fn duration_secs(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).max(0) as u64),
            _ => None,
        }
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp();
    }

    /// Validate a state transition
    fn validate_transition(&self, to: SyncStatus) -> Result<()> {
        let valid = matches!(
            (self.status, to),
            (SyncStatus::Pending, SyncStatus::Running)
                | (SyncStatus::Pending, SyncStatus::Cancelled)
                | (SyncStatus::Running, SyncStatus::Completed)
                | (SyncStatus::Running, SyncStatus::Failed)
                | (SyncStatus::Running, SyncStatus::Cancelled)
                | (SyncStatus::Running, SyncStatus::Pending)
        );

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn new_job() -> SyncJob {
        SyncJob::new(UserId(1), DeviceId(10), SyncJobType::Activities)
    }

    #[test]
    fn test_sync_job_id_round_trip() {
        let id = SyncJobId::new();
        let parsed = SyncJobId::from_string(&id.as_str()).unwrap();
        assert_eq!(id, parsed);
        assert!(SyncJobId::from_string("not-a-uuid").is_err());
    }

    #[test]
    fn test_status_terminal_and_active() {
        assert!(SyncStatus::Pending.is_active());
        assert!(SyncStatus::Running.is_active());
        assert!(SyncStatus::Completed.is_terminal());
        assert!(SyncStatus::Failed.is_terminal());
        assert!(SyncStatus::Cancelled.is_terminal());
        assert!(!SyncStatus::Pending.is_terminal());
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("pending".parse::<SyncStatus>().unwrap(), SyncStatus::Pending);
        assert_eq!("running".parse::<SyncStatus>().unwrap(), SyncStatus::Running);
        assert!("paused".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_job_type_round_trip() {
        for job_type in [
            SyncJobType::Activities,
            SyncJobType::HeartRate,
            SyncJobType::Metrics,
            SyncJobType::FullSync,
        ] {
            assert_eq!(job_type.as_str().parse::<SyncJobType>().unwrap(), job_type);
        }
        assert!("sleep".parse::<SyncJobType>().is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::from_i32(2).unwrap(), Priority::High);
        assert!(Priority::from_i32(7).is_err());
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_new_job_defaults() {
        let job = new_job();
        assert_eq!(job.status, SyncStatus::Pending);
        assert_eq!(job.priority, Priority::Normal);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(job.progress, 0);
        assert!(job.started_at.is_none());
        assert!(job.is_due(chrono::Utc::now().timestamp()));
    }

    #[test]
    fn test_with_delay_pushes_eligibility() {
        let now = chrono::Utc::now().timestamp();
        let job = new_job().with_delay(Duration::from_secs(300));
        assert!(job.scheduled_at >= now + 300);
        assert!(!job.is_due(now));
        assert!(job.is_due(now + 301));
    }

    #[test]
    fn test_start_sets_started_at() {
        let job = new_job().start().unwrap();
        assert_eq!(job.status, SyncStatus::Running);
        assert!(job.started_at.is_some());

        // Starting again is invalid
        assert!(job.start().is_err());
    }

    #[test]
    fn test_progress_is_monotonic_within_attempt() {
        let mut job = new_job().start().unwrap();

        job.update_progress(33).unwrap();
        assert_eq!(job.progress, 33);

        // A stale lower value never rewinds progress
        job.update_progress(10).unwrap();
        assert_eq!(job.progress, 33);

        job.update_progress(66).unwrap();
        assert_eq!(job.progress, 66);

        // Clamped at 100
        job.update_progress(200).unwrap();
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_progress_requires_running() {
        let mut job = new_job();
        assert!(job.update_progress(10).is_err());
    }

    #[test]
    fn test_complete_sets_progress_and_timestamp() {
        let job = new_job().start().unwrap().complete().unwrap();
        assert_eq!(job.status, SyncStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.completed_at.is_some());
        assert!(job.duration_secs().is_some());
    }

    #[test]
    fn test_fail_keeps_retry_count() {
        let job = new_job().start().unwrap();
        let job = job.fail("Device not connected".to_string()).unwrap();

        assert_eq!(job.status, SyncStatus::Failed);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.error_message.as_deref(), Some("Device not connected"));
    }

    #[test]
    fn test_fail_only_from_running() {
        let job = new_job();
        assert!(job.fail("boom".to_string()).is_err());
    }

    #[test]
    fn test_requeue_spends_budget_and_delays() {
        let now = chrono::Utc::now().timestamp();
        let job = new_job().start().unwrap();
        let job = job
            .requeue("timeout".to_string(), Duration::from_secs(120))
            .unwrap();

        assert_eq!(job.status, SyncStatus::Pending);
        assert_eq!(job.retry_count, 1);
        assert!(job.scheduled_at >= now + 120);
        assert_eq!(job.error_message.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_requeue_refused_when_budget_spent() {
        let mut job = new_job();
        job.retry_count = 2; // next failure would be the third of three
        let job = job.start().unwrap();
        assert!(job.requeue("timeout".to_string(), Duration::ZERO).is_err());
    }

    #[test]
    fn test_cancel_from_pending_and_running() {
        let pending = new_job().cancel().unwrap();
        assert_eq!(pending.status, SyncStatus::Cancelled);
        assert!(pending.completed_at.is_some());

        let running = new_job().start().unwrap().cancel().unwrap();
        assert_eq!(running.status, SyncStatus::Cancelled);
    }

    #[test]
    fn test_terminal_states_accept_no_transition() {
        let completed = new_job().start().unwrap().complete().unwrap();
        assert!(completed.clone().start().is_err());
        assert!(completed.clone().fail("x".to_string()).is_err());
        assert!(completed
            .clone()
            .requeue("x".to_string(), Duration::ZERO)
            .is_err());
        assert!(completed.cancel().is_err());
    }

    #[test]
    fn test_retry_cycle_keeps_same_record() {
        // pending → running → pending → running → completed, one record
        let job = new_job();
        let id = job.id;

        let job = job.start().unwrap();
        let job = job
            .requeue("timeout".to_string(), Duration::ZERO)
            .unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.retry_count, 1);

        let job = job.start().unwrap();
        let job = job.complete().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.status, SyncStatus::Completed);
    }
}
