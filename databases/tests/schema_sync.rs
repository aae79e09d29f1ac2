//! Schema synchronisation against a real (in-memory SQLite) database.

use smokedet_databases::{
    MetricRecord, MetricValue, MetricsStore, SchemaChange, SqliteMetricsStore,
};
use sqlx::Row;

const TABLE: &str = "drift_metrics";

async fn store() -> SqliteMetricsStore {
    SqliteMetricsStore::connect("sqlite::memory:").await.unwrap()
}

fn record(values: &[(&str, MetricValue)]) -> MetricRecord {
    let mut record = MetricRecord::new();
    for (name, value) in values {
        record.insert(*name, *value).unwrap();
    }
    record
}

#[tokio::test]
async fn first_log_creates_table_with_timestamp() {
    let store = store().await;
    let change = store
        .log_metrics(
            TABLE,
            &record(&[
                ("a", MetricValue::Float(0.1)),
                ("b", MetricValue::Integer(2)),
            ]),
        )
        .await
        .unwrap();

    assert_eq!(
        change,
        SchemaChange {
            created_table: true,
            added_columns: vec![],
        }
    );
    assert_eq!(
        store.table_columns(TABLE).await.unwrap(),
        vec!["a", "b", "timestamp"]
    );
}

#[tokio::test]
async fn new_key_adds_exactly_that_column() {
    let store = store().await;
    store
        .log_metrics(
            TABLE,
            &record(&[
                ("a", MetricValue::Float(0.1)),
                ("b", MetricValue::Float(0.2)),
            ]),
        )
        .await
        .unwrap();

    let change = store
        .log_metrics(
            TABLE,
            &record(&[
                ("a", MetricValue::Float(0.3)),
                ("b", MetricValue::Float(0.4)),
                ("c", MetricValue::Integer(7)),
            ]),
        )
        .await
        .unwrap();
    assert_eq!(change.added_columns, vec!["c".to_string()]);
    assert!(!change.created_table);

    let again = store
        .log_metrics(
            TABLE,
            &record(&[
                ("a", MetricValue::Float(0.5)),
                ("b", MetricValue::Float(0.6)),
                ("c", MetricValue::Integer(8)),
            ]),
        )
        .await
        .unwrap();
    assert!(again.is_unchanged());

    // c is typed from its declared kind, a and b keep theirs
    let types: Vec<(String, String)> =
        sqlx::query_as("SELECT name, type FROM pragma_table_info('drift_metrics') ORDER BY name")
            .fetch_all(store.pool())
            .await
            .unwrap();
    assert_eq!(
        types,
        vec![
            ("a".to_string(), "REAL".to_string()),
            ("b".to_string(), "REAL".to_string()),
            ("c".to_string(), "INTEGER".to_string()),
            ("timestamp".to_string(), "DATETIME".to_string()),
        ]
    );
}

#[tokio::test]
async fn older_rows_read_null_for_added_columns() {
    let store = store().await;
    store
        .log_metrics(TABLE, &record(&[("a", MetricValue::Float(1.0))]))
        .await
        .unwrap();
    store
        .log_metrics(
            TABLE,
            &record(&[
                ("a", MetricValue::Float(2.0)),
                ("c", MetricValue::Float(3.0)),
            ]),
        )
        .await
        .unwrap();

    let rows = sqlx::query("SELECT a, c FROM drift_metrics ORDER BY a")
        .fetch_all(store.pool())
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get::<Option<f64>, _>("c"), None);
    assert_eq!(rows[1].get::<Option<f64>, _>("c"), Some(3.0));
}

#[tokio::test]
async fn subset_of_keys_inserts_without_schema_change() {
    let store = store().await;
    store
        .log_metrics(
            TABLE,
            &record(&[
                ("a", MetricValue::Float(1.0)),
                ("b", MetricValue::Float(1.0)),
            ]),
        )
        .await
        .unwrap();

    let change = store
        .log_metrics(TABLE, &record(&[("b", MetricValue::Float(0.0))]))
        .await
        .unwrap();
    assert!(change.is_unchanged());

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM drift_metrics WHERE a IS NULL")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}
