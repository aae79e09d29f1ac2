//! Metric record types and SQL generation for the drift metrics table.
//!
//! The table has no fixed column set. Every metric key that ever appears in
//! a [`MetricRecord`] becomes a column, typed by the metric's declared
//! [`MetricKind`]. Columns are only ever added, never altered or dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};

use crate::StoreError;

/// Name of the column every row carries.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Declared storage type of a metric column
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Floating point score (drift scores, shares)
    Float,
    /// Integer count (number of drifted columns)
    Integer,
}

/// A single typed metric value
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum MetricValue {
    Float(f64),
    Integer(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Float(_) => MetricKind::Float,
            MetricValue::Integer(_) => MetricKind::Integer,
        }
    }
}

/// One logged run: metric values plus the time they were computed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRecord {
    pub timestamp: DateTime<Utc>,
    values: BTreeMap<String, MetricValue>,
}

impl MetricRecord {
    /// Create an empty record stamped with the current time
    pub fn new() -> Self {
        Self {
            timestamp: Utc::now(),
            values: BTreeMap::new(),
        }
    }

    /// Add a metric. Names must be safe column identifiers and unique
    /// within the record.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: MetricValue,
    ) -> Result<(), StoreError> {
        let name = name.into();
        validate_identifier(&name)?;
        match self.values.entry(name) {
            Entry::Occupied(entry) => Err(StoreError::DuplicateMetric(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(value);
                Ok(())
            }
        }
    }

    /// Builder-style [`MetricRecord::insert`]
    pub fn with(mut self, name: impl Into<String>, value: MetricValue) -> Result<Self, StoreError> {
        self.insert(name, value)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.values.get(name)
    }

    /// Metric names and values in stable (sorted) order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for MetricRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// What a log call changed in the table layout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaChange {
    /// The table did not exist and was created
    pub created_table: bool,
    /// Columns added to an existing table, in the order they were added
    pub added_columns: Vec<String>,
}

impl SchemaChange {
    pub fn is_unchanged(&self) -> bool {
        !self.created_table && self.added_columns.is_empty()
    }
}

/// SQL flavour differences between the supported backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    pub fn column_type(&self, kind: MetricKind) -> &'static str {
        match (self, kind) {
            (Dialect::Postgres, MetricKind::Float) => "DOUBLE PRECISION",
            (Dialect::Postgres, MetricKind::Integer) => "BIGINT",
            (Dialect::Sqlite, MetricKind::Float) => "REAL",
            (Dialect::Sqlite, MetricKind::Integer) => "INTEGER",
        }
    }

    pub fn timestamp_type(&self) -> &'static str {
        match self {
            Dialect::Postgres => "TIMESTAMPTZ",
            Dialect::Sqlite => "DATETIME",
        }
    }

    fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => "?".to_string(),
        }
    }

    /// Query returning the column names of a table (bound parameter: table name)
    pub fn columns_query(&self) -> &'static str {
        match self {
            Dialect::Postgres => {
                "SELECT column_name::text FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = $1"
            }
            Dialect::Sqlite => "SELECT name FROM pragma_table_info(?)",
        }
    }
}

/// Check a metric or table name is a plain lowercase identifier
pub fn validate_identifier(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if !valid_start || !valid_rest || name == TIMESTAMP_COLUMN {
        return Err(StoreError::InvalidMetricName(name.to_string()));
    }
    Ok(())
}

fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

/// Metric columns of `record` that are not in `existing`, with their kinds
pub fn missing_columns<'a>(
    existing: &HashSet<String>,
    record: &'a MetricRecord,
) -> Vec<(&'a str, MetricKind)> {
    record
        .iter()
        .filter(|(name, _)| !existing.contains(*name))
        .map(|(name, value)| (name, value.kind()))
        .collect()
}

pub fn create_table_sql(dialect: Dialect, table: &str, record: &MetricRecord) -> String {
    let mut columns = vec![format!(
        "{} {}",
        quote(TIMESTAMP_COLUMN),
        dialect.timestamp_type()
    )];
    columns.extend(
        record
            .iter()
            .map(|(name, value)| format!("{} {}", quote(name), dialect.column_type(value.kind()))),
    );
    format!("CREATE TABLE {} ({})", quote(table), columns.join(", "))
}

pub fn add_column_sql(dialect: Dialect, table: &str, column: &str, kind: MetricKind) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote(table),
        quote(column),
        dialect.column_type(kind)
    )
}

/// INSERT with the timestamp bound first, then metrics in record order
pub fn insert_sql(dialect: Dialect, table: &str, record: &MetricRecord) -> String {
    let mut columns = vec![quote(TIMESTAMP_COLUMN)];
    columns.extend(record.keys().map(quote));
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| dialect.placeholder(i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(table),
        columns.join(", "),
        placeholders.join(", ")
    )
}
