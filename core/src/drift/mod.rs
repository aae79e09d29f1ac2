//! Column and dataset drift between a reference and a current batch.
//!
//! The test for each column is picked from the column's kind and the size
//! of the reference:
//!
//! | column | reference ≤ 1000 rows | reference > 1000 rows |
//! |--------|-----------------------|-----------------------|
//! | numeric, > 5 distinct values | K-S p-value | normed Wasserstein |
//! | 3 to 5 distinct values | chi-square p-value | Jensen-Shannon |
//! | ≤ 2 distinct values | proportion Z-test | Jensen-Shannon |

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use smokedet_databases::{MetricRecord, MetricValue};
use std::collections::HashMap;
use tracing::debug;

use crate::dataset::column_values;
use crate::error::{Error, Result};

pub mod stattest;

pub use stattest::Sample;

/// Reference size above which distance measures replace p-value tests
pub const LARGE_REFERENCE_ROWS: usize = 1000;

/// Columns with at most this many distinct values are treated as categorical
pub const MAX_CATEGORICAL_VALUES: usize = 5;

/// Share of drifted columns at which the dataset counts as drifted
pub const DATASET_DRIFT_SHARE: f64 = 0.5;

pub const NUM_DRIFTED_COLUMNS: &str = "num_drifted_columns";
pub const SHARE_OF_DRIFTED_COLUMNS: &str = "share_of_drifted_columns";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatTest {
    KolmogorovSmirnov,
    Wasserstein,
    ChiSquare,
    ZTest,
    JensenShannon,
}

impl StatTest {
    /// Pick the test for a column given its distinct value count across both
    /// samples and the reference size
    pub fn select(distinct_values: usize, reference_rows: usize) -> Self {
        let large = reference_rows > LARGE_REFERENCE_ROWS;
        match (distinct_values > MAX_CATEGORICAL_VALUES, large) {
            (true, false) => StatTest::KolmogorovSmirnov,
            (true, true) => StatTest::Wasserstein,
            (false, true) => StatTest::JensenShannon,
            (false, false) if distinct_values > 2 => StatTest::ChiSquare,
            (false, false) => StatTest::ZTest,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StatTest::KolmogorovSmirnov => "K-S p_value",
            StatTest::Wasserstein => "Wasserstein distance (normed)",
            StatTest::ChiSquare => "chi-square p_value",
            StatTest::ZTest => "Z-test p_value",
            StatTest::JensenShannon => "Jensen-Shannon distance",
        }
    }

    pub fn threshold(&self) -> f64 {
        if self.is_p_value() {
            0.05
        } else {
            0.1
        }
    }

    /// p-value tests drift below the threshold, distances at or above it
    pub fn is_p_value(&self) -> bool {
        matches!(
            self,
            StatTest::KolmogorovSmirnov | StatTest::ChiSquare | StatTest::ZTest
        )
    }

    pub fn score(&self, reference: &Sample, current: &Sample) -> Result<f64> {
        match self {
            StatTest::KolmogorovSmirnov => Ok(stattest::ks_p_value(reference, current)),
            StatTest::Wasserstein => Ok(stattest::wasserstein_normed(reference, current)),
            StatTest::ChiSquare => stattest::chi_square_p_value(reference, current),
            StatTest::ZTest => stattest::proportion_z_p_value(reference, current),
            StatTest::JensenShannon => Ok(stattest::jensen_shannon_distance(reference, current)),
        }
    }

    pub fn is_drift(&self, score: f64) -> bool {
        if self.is_p_value() {
            score < self.threshold()
        } else {
            score >= self.threshold()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDrift {
    pub column: String,
    pub stattest: StatTest,
    pub drift_score: f64,
    pub threshold: f64,
    pub drift_detected: bool,
}

impl ColumnDrift {
    pub fn compute(column: &str, reference: &Sample, current: &Sample) -> Result<Self> {
        if reference.is_empty() || current.is_empty() {
            return Err(Error::InvalidInput(format!(
                "column {column:?} needs reference and current values"
            )));
        }

        let distinct = stattest::distinct_values(reference, current).len();
        let stattest = StatTest::select(distinct, reference.len());
        let drift_score = stattest.score(reference, current)?;
        debug!(
            "{column}: {} = {drift_score:.4} ({distinct} distinct values)",
            stattest.name()
        );

        Ok(Self {
            column: column.to_string(),
            stattest,
            drift_score,
            threshold: stattest.threshold(),
            drift_detected: stattest.is_drift(drift_score),
        })
    }
}

/// Reference columns sorted once, for scoring repeated batches
#[derive(Debug, Clone)]
pub struct ReferenceSamples {
    columns: Vec<(String, Sample)>,
}

impl ReferenceSamples {
    pub fn from_frame(reference: &DataFrame, columns: &[String]) -> Result<Self> {
        let columns = columns
            .iter()
            .map(|name| -> Result<(String, Sample)> {
                Ok((name.clone(), Sample::new(column_values(reference, name)?)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { columns })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDrift {
    pub number_of_columns: usize,
    pub number_of_drifted_columns: usize,
    pub share_of_drifted_columns: f64,
    pub dataset_drift: bool,
}

impl DatasetDrift {
    fn from_columns(columns: &[ColumnDrift]) -> Self {
        let drifted = columns.iter().filter(|c| c.drift_detected).count();
        let share = if columns.is_empty() {
            0.0
        } else {
            drifted as f64 / columns.len() as f64
        };
        Self {
            number_of_columns: columns.len(),
            number_of_drifted_columns: drifted,
            share_of_drifted_columns: share,
            dataset_drift: share >= DATASET_DRIFT_SHARE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub columns: Vec<ColumnDrift>,
    pub dataset: DatasetDrift,
}

impl DriftReport {
    /// Score every named column of `current` against `reference`
    pub fn compute(reference: &DataFrame, current: &DataFrame, columns: &[String]) -> Result<Self> {
        Self::against(&ReferenceSamples::from_frame(reference, columns)?, current)
    }

    /// Score each reference column against the same column of `current`
    pub fn against(reference: &ReferenceSamples, current: &DataFrame) -> Result<Self> {
        let columns = reference
            .columns
            .iter()
            .map(|(name, ref_sample)| {
                let cur_sample = Sample::new(column_values(current, name)?);
                ColumnDrift::compute(name, ref_sample, &cur_sample)
            })
            .collect::<Result<Vec<_>>>()?;

        let dataset = DatasetDrift::from_columns(&columns);
        Ok(Self { columns, dataset })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDrift> {
        self.columns.iter().find(|c| c.column == name)
    }

    /// Metric row for the store: one `<column>_drift` score for each of
    /// `score_columns` plus the dataset-level counts
    pub fn to_record(&self, score_columns: &[String]) -> Result<MetricRecord> {
        let metric_names = drift_metric_names(score_columns)?;
        let mut record = MetricRecord::new();
        for (name, metric) in score_columns.iter().zip(metric_names) {
            let drift = self.column(name).ok_or_else(|| {
                Error::InvalidInput(format!("no drift result for column {name:?}"))
            })?;
            record.insert(metric, MetricValue::Float(drift.drift_score))?;
        }
        record.insert(
            NUM_DRIFTED_COLUMNS,
            MetricValue::Integer(self.dataset.number_of_drifted_columns as i64),
        )?;
        record.insert(
            SHARE_OF_DRIFTED_COLUMNS,
            MetricValue::Float(self.dataset.share_of_drifted_columns),
        )?;
        Ok(record)
    }
}

/// Lowercase, collapse runs of non-alphanumerics to `_` and trim them
pub fn sanitize_metric_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Store column for a feature's drift score
pub fn drift_metric_name(column: &str) -> String {
    let base = sanitize_metric_name(column);
    if base.is_empty() {
        "drift".to_string()
    } else {
        format!("{base}_drift")
    }
}

/// Drift metric names for `columns`, rejecting columns that map to the same
/// name or to one of the dataset-level metrics
pub fn drift_metric_names(columns: &[String]) -> Result<Vec<String>> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    let mut names = Vec::with_capacity(columns.len());
    for column in columns {
        let metric = drift_metric_name(column);
        if metric == NUM_DRIFTED_COLUMNS || metric == SHARE_OF_DRIFTED_COLUMNS {
            return Err(Error::InvalidInput(format!(
                "column {column:?} clashes with the {metric} metric"
            )));
        }
        if let Some(previous) = seen.insert(metric.clone(), column) {
            return Err(Error::InvalidInput(format!(
                "columns {previous:?} and {column:?} both map to metric {metric}"
            )));
        }
        names.push(metric);
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn test_metric_names() {
        assert_eq!(drift_metric_name("Temperature[C]"), "temperature_c_drift");
        assert_eq!(drift_metric_name("Humidity[%]"), "humidity_drift");
        assert_eq!(drift_metric_name("eCO2[ppm]"), "eco2_ppm_drift");
        assert_eq!(drift_metric_name("PM2.5"), "pm2_5_drift");
        assert_eq!(sanitize_metric_name("  NC0.5 "), "nc0_5");
        assert_eq!(sanitize_metric_name("2nd"), "_2nd");
    }

    #[test]
    fn test_select_stattest() {
        assert_eq!(StatTest::select(100, 500), StatTest::KolmogorovSmirnov);
        assert_eq!(StatTest::select(100, 5000), StatTest::Wasserstein);
        assert_eq!(StatTest::select(2, 500), StatTest::ZTest);
        assert_eq!(StatTest::select(4, 500), StatTest::ChiSquare);
        assert_eq!(StatTest::select(2, 5000), StatTest::JensenShannon);
    }

    #[test]
    fn test_drift_direction() {
        assert!(StatTest::KolmogorovSmirnov.is_drift(0.01));
        assert!(!StatTest::KolmogorovSmirnov.is_drift(0.5));
        assert!(StatTest::Wasserstein.is_drift(0.1));
        assert!(!StatTest::Wasserstein.is_drift(0.05));
    }

    #[test]
    fn test_report_and_record() {
        let reference = df!(
            "Temperature[C]" => (0..50).map(f64::from).collect::<Vec<_>>(),
            "Humidity[%]" => (0..50).map(|i| f64::from(i % 10)).collect::<Vec<_>>(),
            "prediction" => (0..50).map(|i| i % 2).collect::<Vec<i64>>(),
        )
        .unwrap();
        let current = df!(
            "Temperature[C]" => (100..120).map(f64::from).collect::<Vec<_>>(),
            "Humidity[%]" => (0..20).map(|i| f64::from(i % 10)).collect::<Vec<_>>(),
            "prediction" => (0..20).map(|i| i % 2).collect::<Vec<i64>>(),
        )
        .unwrap();

        let features = vec!["Humidity[%]".to_string(), "Temperature[C]".to_string()];
        let mut all = features.clone();
        all.push("prediction".to_string());

        let report = DriftReport::compute(&reference, &current, &all).unwrap();
        assert!(report.column("Temperature[C]").unwrap().drift_detected);
        assert!(!report.column("Humidity[%]").unwrap().drift_detected);
        assert_eq!(report.column("prediction").unwrap().stattest, StatTest::ZTest);
        assert!(!report.column("prediction").unwrap().drift_detected);
        assert_eq!(report.dataset.number_of_drifted_columns, 1);
        assert!(!report.dataset.dataset_drift);

        let record = report.to_record(&features).unwrap();
        let keys: Vec<&str> = record.keys().collect();
        assert_eq!(
            keys,
            vec![
                "humidity_drift",
                NUM_DRIFTED_COLUMNS,
                SHARE_OF_DRIFTED_COLUMNS,
                "temperature_c_drift"
            ]
        );
        assert_eq!(
            record.get(NUM_DRIFTED_COLUMNS),
            Some(&MetricValue::Integer(1))
        );
    }

    #[test]
    fn test_colliding_metric_names_are_rejected() {
        let columns = vec!["PM1.0".to_string(), "PM1_0".to_string()];
        let err = drift_metric_names(&columns).unwrap_err();
        assert!(err.to_string().contains("pm1_0_drift"), "{err}");

        let spaced = vec!["a-b".to_string(), "a b".to_string()];
        assert!(matches!(
            drift_metric_names(&spaced),
            Err(Error::InvalidInput(_))
        ));

        let named = vec!["Temperature[C]".to_string(), "Humidity[%]".to_string()];
        assert_eq!(
            drift_metric_names(&named).unwrap(),
            vec!["temperature_c_drift", "humidity_drift"]
        );
    }

    #[test]
    fn test_to_record_rejects_colliding_columns() {
        let frame = df!(
            "PM1.0" => (0..20).map(f64::from).collect::<Vec<_>>(),
            "PM1_0" => (0..20).map(f64::from).collect::<Vec<_>>(),
        )
        .unwrap();
        let columns = vec!["PM1.0".to_string(), "PM1_0".to_string()];
        let report = DriftReport::compute(&frame, &frame, &columns).unwrap();
        assert!(matches!(
            report.to_record(&columns),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_reference_samples_match_frame_scoring() {
        let reference = df!("x" => (0..40).map(f64::from).collect::<Vec<_>>()).unwrap();
        let current = df!("x" => (10..30).map(f64::from).collect::<Vec<_>>()).unwrap();
        let columns = vec!["x".to_string()];

        let samples = ReferenceSamples::from_frame(&reference, &columns).unwrap();
        assert_eq!(
            DriftReport::against(&samples, &current).unwrap(),
            DriftReport::compute(&reference, &current, &columns).unwrap()
        );
    }

    #[test]
    fn test_empty_current_is_rejected() {
        assert!(matches!(
            ColumnDrift::compute("a", &Sample::new(vec![1.0]), &Sample::new(vec![])),
            Err(Error::InvalidInput(_))
        ));
    }
}
