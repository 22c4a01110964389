//! # Background Sync Scheduler
//!
//! Pulls data from external wearable-device providers into the local store
//! as durable, retryable background jobs.
//!
//! ## Components
//!
//! - **Job record** (`job`): the durable unit of work, with a validated
//!   state machine (pending → running → completed/failed/cancelled, plus
//!   the retry re-queue back to pending)
//! - **Repository** (`repository`): job persistence behind a trait, with a
//!   self-initializing SQLite implementation
//! - **Retry classifier** (`retry`): pure failure classification and
//!   exponential backoff
//! - **Executor** (`executor`): type-specific sync work against registered
//!   device providers, with idempotent activity import
//! - **Scheduler** (`scheduler`): the polling loop, the concurrency cap,
//!   and job finalization
//!
//! This is an in-process library component: no wire format, no CLI. The
//! rest of the application observes sync state by polling
//! [`SyncScheduler::get_job_status`] / [`SyncScheduler::get_user_jobs`].

pub mod error;
pub mod executor;
pub mod job;
pub mod repository;
pub mod retry;
pub mod scheduler;

pub use error::{ExecutionError, Result, SyncError};
pub use executor::{ImportSummary, SyncExecutor, SyncOutcome};
pub use job::{
    Priority, SyncJob, SyncJobId, SyncJobType, SyncStatus, DEFAULT_MAX_RETRIES,
};
pub use repository::{SqliteSyncJobRepository, SyncJobRepository};
pub use retry::{backoff_delay, classify, RetryClass};
pub use scheduler::{
    SchedulerConfig, SyncScheduler, DEFAULT_JOB_RETENTION, DEFAULT_USER_JOBS_LIMIT,
};
