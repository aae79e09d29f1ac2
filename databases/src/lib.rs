//! smokedet Databases Module
//!
//! Storage for drift-monitoring metrics. The metrics table grows a column
//! for every new metric key it sees; see [`schema`] for the record types and
//! the generated SQL, and [`postgres`] / [`sqlite`] for the backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[macro_use]
mod store;

pub mod postgres;
pub mod schema;
pub mod sqlite;

pub use postgres::PgMetricsStore;
pub use schema::{Dialect, MetricKind, MetricRecord, MetricValue, SchemaChange, TIMESTAMP_COLUMN};
pub use sqlite::SqliteMetricsStore;

/// Errors raised by the metrics store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A statement failed; `query` is the SQL that was sent
    #[error("metrics query failed: {query}: {source}")]
    Query {
        query: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("invalid metric or table name: {0:?}")]
    InvalidMetricName(String),

    /// The same metric was added to a record twice
    #[error("duplicate metric in record: {0:?}")]
    DuplicateMetric(String),

    #[error("failed to connect to metrics database: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("unsupported database url: {0}")]
    UnsupportedUrl(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Database type enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    Postgres,
    SQLite,
}

impl DatabaseType {
    /// Pick the backend from a connection URL scheme
    pub fn from_url(url: &str) -> StoreResult<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(DatabaseType::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(DatabaseType::SQLite)
        } else {
            Err(StoreError::UnsupportedUrl(url.to_string()))
        }
    }
}

/// A sink for drift metric records.
///
/// Each call is one transaction: read the table's columns, create the
/// table or add the missing columns, insert the row.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn log_metrics(&self, table: &str, record: &MetricRecord) -> StoreResult<SchemaChange>;

    /// Column names currently present in `table` (empty if it does not exist)
    async fn table_columns(&self, table: &str) -> StoreResult<Vec<String>>;
}

/// Open a metrics store for the given URL.
///
/// Postgres connections are opened lazily, so the service can start before
/// the database is reachable; the first log call surfaces any failure.
pub async fn connect_metrics_store(url: &str) -> StoreResult<Arc<dyn MetricsStore>> {
    let store: Arc<dyn MetricsStore> = match DatabaseType::from_url(url)? {
        DatabaseType::Postgres => Arc::new(PgMetricsStore::connect_lazy(url)?),
        DatabaseType::SQLite => Arc::new(SqliteMetricsStore::connect(url).await?),
    };
    info!("Metrics store ready for {}", redact(url));
    Ok(store)
}

fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
