//! Shared `MetricsStore` body for the sqlx backends.
//!
//! Postgres and SQLite run the same transaction and differ only in the
//! driver type and the SQL [`Dialect`](crate::Dialect), so the impl is
//! generated per backend.

use tracing::error;

use crate::StoreError;

pub(crate) fn query_error(query: &str, source: sqlx::Error) -> StoreError {
    error!(query = %query, error = %source, "Metrics query failed");
    StoreError::Query {
        query: query.to_string(),
        source,
    }
}

/// Implement `MetricsStore` for `$store`, a struct with a `pool: Pool<$db>`
macro_rules! impl_metrics_store {
    ($store:ty, $db:ty, $dialect:expr) => {
        impl $store {
            async fn fetch_columns(
                tx: &mut sqlx::Transaction<'_, $db>,
                table: &str,
            ) -> $crate::StoreResult<std::collections::HashSet<String>> {
                let sql = $dialect.columns_query();
                let columns: Vec<String> = sqlx::query_scalar(sql)
                    .bind(table)
                    .fetch_all(&mut **tx)
                    .await
                    .map_err(|e| $crate::store::query_error(sql, e))?;
                Ok(columns.into_iter().collect())
            }

            async fn execute(
                tx: &mut sqlx::Transaction<'_, $db>,
                sql: &str,
            ) -> $crate::StoreResult<()> {
                tracing::debug!("Executing: {sql}");
                sqlx::query(sql)
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| $crate::store::query_error(sql, e))?;
                Ok(())
            }
        }

        #[async_trait::async_trait]
        impl $crate::MetricsStore for $store {
            async fn log_metrics(
                &self,
                table: &str,
                record: &$crate::MetricRecord,
            ) -> $crate::StoreResult<$crate::SchemaChange> {
                use $crate::schema::{
                    add_column_sql, create_table_sql, insert_sql, missing_columns,
                    validate_identifier,
                };
                use $crate::{MetricValue, SchemaChange, StoreError};

                let dialect = $dialect;
                validate_identifier(table)?;

                let mut tx = self.pool.begin().await.map_err(StoreError::Connection)?;
                let existing = Self::fetch_columns(&mut tx, table).await?;
                let mut change = SchemaChange::default();

                if existing.is_empty() {
                    Self::execute(&mut tx, &create_table_sql(dialect, table, record)).await?;
                    change.created_table = true;
                } else {
                    for (column, kind) in missing_columns(&existing, record) {
                        let sql = add_column_sql(dialect, table, column, kind);
                        Self::execute(&mut tx, &sql).await?;
                        change.added_columns.push(column.to_string());
                    }
                }

                let sql = insert_sql(dialect, table, record);
                let mut query = sqlx::query(&sql).bind(record.timestamp);
                for (_, value) in record.iter() {
                    query = match value {
                        MetricValue::Float(v) => query.bind(*v),
                        MetricValue::Integer(v) => query.bind(*v),
                    };
                }
                query
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| $crate::store::query_error(&sql, e))?;

                tx.commit()
                    .await
                    .map_err(|e| $crate::store::query_error("COMMIT", e))?;

                if !change.is_unchanged() {
                    tracing::info!(
                        "Metrics table {table} schema updated: created={}, added={:?}",
                        change.created_table,
                        change.added_columns
                    );
                }
                Ok(change)
            }

            async fn table_columns(&self, table: &str) -> $crate::StoreResult<Vec<String>> {
                $crate::schema::validate_identifier(table)?;
                let mut tx = self
                    .pool
                    .begin()
                    .await
                    .map_err($crate::StoreError::Connection)?;
                let mut columns: Vec<String> =
                    Self::fetch_columns(&mut tx, table).await?.into_iter().collect();
                tx.commit()
                    .await
                    .map_err(|e| $crate::store::query_error("COMMIT", e))?;
                columns.sort();
                Ok(columns)
            }
        }
    };
}
