//! Postgres backend for the drift metrics table

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::schema::Dialect;
use crate::{StoreError, StoreResult};

/// Metrics store writing to a Postgres database
pub struct PgMetricsStore {
    pool: PgPool,
}

impl PgMetricsStore {
    /// Prepare a pool without opening a connection yet
    pub fn connect_lazy(url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect_lazy(url)
            .map_err(StoreError::Connection)?;
        Ok(Self { pool })
    }
}

impl_metrics_store!(PgMetricsStore, sqlx::Postgres, Dialect::Postgres);
