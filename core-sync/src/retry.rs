//! # Retry Classification & Backoff
//!
//! Pure functions that decide, at the finalization boundary, whether a failed
//! attempt is worth retrying and how long to wait before the next one.
//!
//! Classification is driven by the error types themselves: the three device
//! setup failures are always terminal, provider errors carry their own
//! `retryable` tag, and store failures are assumed transient. No message
//! text is ever inspected.

use std::time::Duration;

use crate::error::ExecutionError;

/// Backoff unit: delays grow as `2^retry_count` minutes.
const BACKOFF_BASE_SECS: u64 = 60;

/// Outcome of classifying a failed execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Worth another attempt after backoff, budget permitting
    Transient,
    /// Retrying cannot fix this; the job fails permanently
    Terminal,
}

/// Classify a failed execution attempt.
pub fn classify(error: &ExecutionError) -> RetryClass {
    match error {
        ExecutionError::DeviceNotFound
        | ExecutionError::DeviceNotConnected
        | ExecutionError::UnsupportedDeviceKind => RetryClass::Terminal,
        ExecutionError::Provider(e) => {
            if e.retryable() {
                RetryClass::Transient
            } else {
                RetryClass::Terminal
            }
        }
        ExecutionError::Store(_) | ExecutionError::JobStore(_) => RetryClass::Transient,
    }
}

/// Delay before the attempt that would bring the job to `retry_count`
/// failures becomes eligible again: `2^retry_count` minutes.
pub fn backoff_delay(retry_count: u32) -> Duration {
    Duration::from_secs(BACKOFF_BASE_SECS * 2u64.pow(retry_count.min(16)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_store::StoreError;
    use provider_traits::ProviderError;

    #[test]
    fn test_device_setup_failures_are_terminal() {
        assert_eq!(classify(&ExecutionError::DeviceNotFound), RetryClass::Terminal);
        assert_eq!(
            classify(&ExecutionError::DeviceNotConnected),
            RetryClass::Terminal
        );
        assert_eq!(
            classify(&ExecutionError::UnsupportedDeviceKind),
            RetryClass::Terminal
        );
    }

    #[test]
    fn test_provider_tag_decides() {
        let transient = ExecutionError::Provider(ProviderError::Network("reset".into()));
        assert_eq!(classify(&transient), RetryClass::Transient);

        let terminal = ExecutionError::Provider(ProviderError::NotSupported {
            capability: "heart rate export".into(),
        });
        assert_eq!(classify(&terminal), RetryClass::Terminal);
    }

    #[test]
    fn test_store_failures_are_transient() {
        let err = ExecutionError::Store(StoreError::Migration("locked".into()));
        assert_eq!(classify(&err), RetryClass::Transient);
    }

    #[test]
    fn test_backoff_doubles_per_retry() {
        assert_eq!(backoff_delay(0), Duration::from_secs(60));
        assert_eq!(backoff_delay(1), Duration::from_secs(120));
        assert_eq!(backoff_delay(2), Duration::from_secs(240));
        assert_eq!(backoff_delay(3), Duration::from_secs(480));
    }

    #[test]
    fn test_terminal_error_messages() {
        // These strings are the ones recorded on failed job records; the
        // dashboard keys its copy off them.
        assert_eq!(ExecutionError::DeviceNotFound.to_string(), "Device not found");
        assert_eq!(
            ExecutionError::DeviceNotConnected.to_string(),
            "Device not connected"
        );
        assert_eq!(
            ExecutionError::UnsupportedDeviceKind.to_string(),
            "Unsupported device type"
        );
    }
}
