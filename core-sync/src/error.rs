use core_store::StoreError;
use provider_traits::ProviderError;
use thiserror::Error;

/// Errors surfaced by the scheduler's public entry points and the job store.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("Invalid job ID: {0}")]
    InvalidJobId(String),

    #[error("Invalid sync status: {0}")]
    InvalidStatus(String),

    #[error("Invalid sync job type: {0}")]
    InvalidJobType(String),

    #[error("Invalid priority: {0}")]
    InvalidPriority(i32),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Database error: {0}")]
    Database(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Failure of a single job execution attempt, as seen at the finalization
/// boundary.
///
/// The first three variants are setup problems a retry cannot fix; their
/// display strings are the messages recorded on the job record. Everything
/// else carries its own classification (see [`crate::retry::classify`]).
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Device not found")]
    DeviceNotFound,

    #[error("Device not connected")]
    DeviceNotConnected,

    #[error("Unsupported device type")]
    UnsupportedDeviceKind,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Job store error: {0}")]
    JobStore(#[from] SyncError),
}
