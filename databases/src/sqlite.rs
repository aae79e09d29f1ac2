//! SQLite backend for the drift metrics table
//!
//! Used for local runs and tests. SQLite's `ALTER TABLE ... ADD COLUMN` and
//! `CREATE TABLE` are transactional, so the behaviour matches Postgres.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use crate::schema::Dialect;
use crate::{StoreError, StoreResult};

/// SQLite connection manager for metrics
pub struct SqliteMetricsStore {
    pool: SqlitePool,
}

impl SqliteMetricsStore {
    /// Open (creating if needed) the database at `url`.
    ///
    /// `sqlite::memory:` gets a single-connection pool so every call sees
    /// the same in-memory database.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        info!("Creating SQLite metrics store: {url}");

        let options = sqlx::sqlite::SqliteConnectOptions::from_str(url)
            .map_err(StoreError::Connection)?
            .create_if_missing(true);
        let mut pool_options = SqlitePoolOptions::new().max_connections(4);
        if url.contains(":memory:") {
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(StoreError::Connection)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl_metrics_store!(SqliteMetricsStore, sqlx::Sqlite, Dialect::Sqlite);
