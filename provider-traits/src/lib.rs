//! # Provider Traits
//!
//! Platform-agnostic contracts for wearable-device data providers.
//!
//! Each supported wearable vendor ships an implementation of
//! [`DeviceProvider`] that knows how to talk to that vendor's API. The sync
//! core consumes providers purely through this trait; protocol details,
//! authentication, and pagination live entirely inside the implementations.
//!
//! Provider failures are reported through [`ProviderError`], a tagged error
//! type that carries its own retry classification (see
//! [`ProviderError::retryable`]) so the sync core never has to inspect
//! free-form message text.

pub mod error;
pub mod provider;

pub use error::{ProviderError, Result};
pub use provider::{
    BodyMetric, DeviceProvider, HeartRateSample, MetricKind, ProviderActivity,
};
