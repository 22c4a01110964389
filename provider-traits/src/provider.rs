//! Device Provider Contract
//!
//! Defines the narrow interface the sync core uses to pull data from a
//! wearable vendor: three fetch operations, each returning a finite batch of
//! records newer than a cursor timestamp.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A raw activity as reported by the vendor, before conversion into the
/// application's own run records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderActivity {
    /// Vendor-assigned activity identifier; the idempotency key for import.
    pub external_id: String,
    /// Vendor sport label (e.g. "running", "trail_running").
    pub sport: String,
    /// Unix timestamp when the activity started
    pub started_at: i64,
    /// Elapsed duration in seconds
    pub duration_secs: i64,
    /// Total distance in meters, if the vendor reports one
    pub distance_m: Option<f64>,
    /// Average heart rate over the activity
    pub avg_heart_rate: Option<u16>,
    /// Active calories burned
    pub calories: Option<u32>,
}

/// A single heart-rate reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateSample {
    /// Unix timestamp of the reading
    pub recorded_at: i64,
    /// Beats per minute
    pub bpm: u16,
}

/// Kinds of body metrics the vendors report outside of activities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    RestingHeartRate,
    Vo2Max,
    WeightKg,
    SleepDurationMins,
}

impl MetricKind {
    /// String representation used for storage
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::RestingHeartRate => "resting_heart_rate",
            MetricKind::Vo2Max => "vo2_max",
            MetricKind::WeightKg => "weight_kg",
            MetricKind::SleepDurationMins => "sleep_duration_mins",
        }
    }

    /// Parse a metric kind from its storage representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "resting_heart_rate" => Some(MetricKind::RestingHeartRate),
            "vo2_max" => Some(MetricKind::Vo2Max),
            "weight_kg" => Some(MetricKind::WeightKg),
            "sleep_duration_mins" => Some(MetricKind::SleepDurationMins),
            _ => None,
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A dated body metric value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyMetric {
    /// Unix timestamp of the measurement
    pub recorded_at: i64,
    /// What was measured
    pub kind: MetricKind,
    /// The measured value in the kind's implied unit
    pub value: f64,
}

/// Wearable vendor data source.
///
/// Implementations own protocol, authentication, and pagination; each fetch
/// returns the complete batch of records newer than `since` (a Unix
/// timestamp, typically the device's last successful sync). `None` means
/// "everything the vendor retains".
///
/// # Example
///
/// ```ignore
/// use provider_traits::DeviceProvider;
///
/// async fn pull(provider: &dyn DeviceProvider, device_ref: &str) -> Result<()> {
///     let activities = provider.fetch_activities(device_ref, None).await?;
///     for activity in activities {
///         println!("{} {}m", activity.external_id, activity.distance_m.unwrap_or(0.0));
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Fetch activities recorded on the device since the cursor.
    async fn fetch_activities(
        &self,
        device_ref: &str,
        since: Option<i64>,
    ) -> Result<Vec<ProviderActivity>>;

    /// Fetch continuous heart-rate samples since the cursor.
    async fn fetch_heart_rate(
        &self,
        device_ref: &str,
        since: Option<i64>,
    ) -> Result<Vec<HeartRateSample>>;

    /// Fetch daily body metrics since the cursor.
    async fn fetch_metrics(
        &self,
        device_ref: &str,
        since: Option<i64>,
    ) -> Result<Vec<BodyMetric>>;
}
