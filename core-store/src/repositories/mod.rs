//! Repository traits and SQLite implementations for the health-data store

pub mod activities;
pub mod devices;
pub mod metrics;

pub use activities::{ActivityRepository, SqliteActivityRepository};
pub use devices::{DeviceDirectory, SqliteDeviceDirectory};
pub use metrics::{HealthMetricsRepository, SqliteHealthMetricsRepository};
