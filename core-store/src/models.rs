//! Domain models for the local health-data store
//!
//! Devices paired by users, runs imported from wearable providers, and the
//! metric series that back the dashboard screens.

use provider_traits::{MetricKind, ProviderActivity};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// ID Types
// =============================================================================

/// Identifier of an application user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a paired wearable device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub i64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an imported run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Devices
// =============================================================================

/// Supported wearable vendors.
///
/// A device whose kind has no registered provider cannot be synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Garmin,
    Fitbit,
    Coros,
}

impl DeviceKind {
    /// Get the storage identifier string
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Garmin => "garmin",
            DeviceKind::Fitbit => "fitbit",
            DeviceKind::Coros => "coros",
        }
    }

    /// Parse a device kind from its storage representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "garmin" => Some(DeviceKind::Garmin),
            "fitbit" => Some(DeviceKind::Fitbit),
            "coros" => Some(DeviceKind::Coros),
            _ => None,
        }
    }

    /// Human-readable vendor name
    pub fn display_name(&self) -> &'static str {
        match self {
            DeviceKind::Garmin => "Garmin",
            DeviceKind::Fitbit => "Fitbit",
            DeviceKind::Coros => "COROS",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Connection state of a paired device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Device is linked and its credentials are valid
    Connected,
    /// Device is linked but currently unreachable
    Disconnected,
    /// User revoked access on the vendor side
    Revoked,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "connected" => Some(ConnectionStatus::Connected),
            "disconnected" => Some(ConnectionStatus::Disconnected),
            "revoked" => Some(ConnectionStatus::Revoked),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A wearable device paired by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub user_id: UserId,
    pub kind: DeviceKind,
    /// Vendor-side identifier handed to the provider on every fetch
    pub external_ref: String,
    pub connection_status: ConnectionStatus,
    /// User-visible label (e.g. "Forerunner 965")
    pub label: Option<String>,
    /// Unix timestamp of the last successful sync
    pub last_sync_at: Option<i64>,
    pub created_at: i64,
}

/// Fields required to pair a new device; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub user_id: UserId,
    pub kind: DeviceKind,
    pub external_ref: String,
    pub connection_status: ConnectionStatus,
    pub label: Option<String>,
}

// =============================================================================
// Imported records
// =============================================================================

/// A run imported from a wearable provider.
///
/// Exactly one `Run` exists per `(user_id, external_id)` pair; import is
/// idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub user_id: UserId,
    pub device_id: DeviceId,
    /// Vendor-assigned activity identifier (the idempotency key)
    pub external_id: String,
    pub sport: String,
    pub started_at: i64,
    pub duration_secs: i64,
    pub distance_m: Option<f64>,
    pub avg_heart_rate: Option<u16>,
    pub calories: Option<u32>,
    pub created_at: i64,
}

impl Run {
    /// Convert a raw provider activity into a local run record.
    pub fn from_provider_activity(
        user_id: UserId,
        device_id: DeviceId,
        activity: &ProviderActivity,
    ) -> Self {
        Self {
            id: RunId::new(),
            user_id,
            device_id,
            external_id: activity.external_id.clone(),
            sport: activity.sport.clone(),
            started_at: activity.started_at,
            duration_secs: activity.duration_secs,
            distance_m: activity.distance_m,
            avg_heart_rate: activity.avg_heart_rate,
            calories: activity.calories,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// One stored heart-rate reading for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRatePoint {
    pub device_id: DeviceId,
    pub user_id: UserId,
    pub recorded_at: i64,
    pub bpm: u16,
}

/// One stored body metric value for a user
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyMeasurement {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub kind: MetricKind,
    pub recorded_at: i64,
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_kind_round_trip() {
        for kind in [DeviceKind::Garmin, DeviceKind::Fitbit, DeviceKind::Coros] {
            assert_eq!(DeviceKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(DeviceKind::parse("pebble"), None);
    }

    #[test]
    fn test_connection_status_round_trip() {
        for status in [
            ConnectionStatus::Connected,
            ConnectionStatus::Disconnected,
            ConnectionStatus::Revoked,
        ] {
            assert_eq!(ConnectionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ConnectionStatus::parse("paired"), None);
    }

    #[test]
    fn test_run_from_provider_activity() {
        let activity = ProviderActivity {
            external_id: "garmin-123".to_string(),
            sport: "running".to_string(),
            started_at: 1_700_000_000,
            duration_secs: 1_800,
            distance_m: Some(5_000.0),
            avg_heart_rate: Some(152),
            calories: Some(320),
        };

        let run = Run::from_provider_activity(UserId(1), DeviceId(10), &activity);

        assert_eq!(run.user_id, UserId(1));
        assert_eq!(run.device_id, DeviceId(10));
        assert_eq!(run.external_id, "garmin-123");
        assert_eq!(run.duration_secs, 1_800);
        assert_eq!(run.avg_heart_rate, Some(152));
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }
}
