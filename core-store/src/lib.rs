//! # Local Health-Data Store
//!
//! The embedded database layer of the coaching app: paired devices, imported
//! runs, and metric series, persisted in SQLite.
//!
//! ## Components
//!
//! - **Database pool** (`db`): SQLite connection pooling with WAL mode and
//!   embedded migrations
//! - **Models** (`models`): devices, runs, heart-rate points, body
//!   measurements
//! - **Repositories** (`repositories`): data-access traits and their SQLite
//!   implementations; the sync core consumes only the traits

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{Result, StoreError};
pub use models::{
    BodyMeasurement, ConnectionStatus, Device, DeviceId, DeviceKind, HeartRatePoint, NewDevice,
    Run, RunId, UserId,
};
pub use repositories::{
    ActivityRepository, DeviceDirectory, HealthMetricsRepository, SqliteActivityRepository,
    SqliteDeviceDirectory, SqliteHealthMetricsRepository,
};
