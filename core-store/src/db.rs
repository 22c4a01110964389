//! # Database Connection Pool Module
//!
//! SQLite connection pooling for the local health-data store.
//!
//! ## Features
//!
//! - **WAL Mode**: Enabled for better concurrency (multiple readers, one writer)
//! - **Connection Pooling**: Configurable min/max connections with timeouts
//! - **Foreign Keys**: Enforced for referential integrity
//! - **Automatic Migrations**: Runs on initialization
//! - **Health Checks**: Connection validation
//!
//! ## Testing
//!
//! For tests, use an in-memory database:
//!
//! ```rust,ignore
//! let pool = create_test_pool().await?;
//! ```

use crate::{Result, StoreError};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Database configuration for the SQLite connection pool
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database file path or `sqlite::memory:` for an in-memory database
    pub database_url: String,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Maximum time to wait for a connection from the pool
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    /// Create a new database configuration for the given file path
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        let path = database_path.into();
        let database_url = format!("sqlite:{}", path.display());

        Self {
            database_url,
            min_connections: 1,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    /// Create a configuration for an in-memory database (useful for testing).
    ///
    /// Capped to a single connection: every in-memory connection is its own
    /// database, so a wider pool would hand out empty databases.
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            min_connections: 1,
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    /// Set the maximum number of connections
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the connection acquire timeout
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Create a configured SQLite connection pool
///
/// Configures SQLite connection options (WAL mode, foreign keys), creates
/// the pool, runs migrations, and performs a health check.
///
/// # Errors
///
/// Returns an error if the database cannot be opened, migrations fail, or
/// the health check fails.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    info!(
        database_url = %config.database_url,
        max_connections = config.max_connections,
        "Creating database connection pool"
    );

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(StoreError::Database)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    debug!("SQLite connection options configured");

    let pool = SqlitePoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to create connection pool");
            StoreError::Database(e)
        })?;

    run_migrations(&pool).await?;
    health_check(&pool).await?;

    Ok(pool)
}

/// Create a connection pool for testing with an in-memory database,
/// migrations already applied.
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(DatabaseConfig::in_memory()).await
}

/// Apply all pending migrations from the `migrations/` directory.
///
/// Migrations are embedded in the binary at compile time.
async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    info!("Running database migrations");

    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        warn!(error = %e, "Migration failed");
        StoreError::Migration(e.to_string())
    })?;

    Ok(())
}

/// Verify the database is reachable through the pool.
async fn health_check(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!(error = %e, "Database health check failed");
        StoreError::Database(e)
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_in_memory_pool() {
        let pool = create_pool(DatabaseConfig::in_memory()).await;
        assert!(pool.is_ok(), "Should create in-memory pool successfully");
    }

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let pool = create_test_pool().await.unwrap();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('devices', 'runs', 'heart_rate_points', 'body_measurements')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn test_database_config_builder() {
        let config = DatabaseConfig::new("coach.db")
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(60));

        assert_eq!(config.database_url, "sqlite:coach.db");
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.acquire_timeout, Duration::from_secs(60));
    }
}
