use thiserror::Error;

/// Errors raised by device provider implementations.
///
/// Every variant carries its own retry classification via
/// [`ProviderError::retryable`]. Transport-level failures are transient and
/// worth retrying; a capability the vendor simply does not offer is not.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider rate limited the request")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Provider request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed provider payload: {0}")]
    Payload(String),

    #[error("Provider does not support {capability}")]
    NotSupported { capability: String },
}

impl ProviderError {
    /// Whether a retry with backoff could plausibly succeed.
    pub fn retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. }
            | ProviderError::Timeout { .. }
            | ProviderError::Network(_)
            | ProviderError::Payload(_) => true,
            ProviderError::NotSupported { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
