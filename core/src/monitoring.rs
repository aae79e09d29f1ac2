//! Drift monitoring: reference snapshot handling and per-batch metric logging.

use ndarray::ArrayView2;
use polars::prelude::*;
use smokedet_databases::{MetricRecord, MetricsStore, SchemaChange};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Settings;
use crate::dataset::{self, prepare_data, split_data};
use crate::drift::{drift_metric_names, DriftReport, ReferenceSamples};
use crate::error::{Error, Result};
use crate::model::{Model, ModelInput};

/// Column holding model output in reference and monitored frames
pub const PREDICTION_COLUMN: &str = "prediction";

fn frame_from_matrix(columns: &[String], x: ArrayView2<f64>) -> Result<DataFrame> {
    let series = columns
        .iter()
        .enumerate()
        .map(|(j, name)| Series::new(name.as_str(), x.column(j).to_vec()))
        .collect::<Vec<_>>();
    Ok(DataFrame::new(series)?)
}

fn prediction_series(labels: impl IntoIterator<Item = usize>) -> Series {
    let values: Vec<i64> = labels.into_iter().map(|l| l as i64).collect();
    Series::new(PREDICTION_COLUMN, values)
}

/// `feature_columns` of `frame` plus the given labels as `prediction`
pub fn attach_predictions(
    frame: &DataFrame,
    feature_columns: &[String],
    labels: &[usize],
) -> Result<DataFrame> {
    if labels.len() != frame.height() {
        return Err(Error::InvalidInput(format!(
            "{} predictions for {} rows",
            labels.len(),
            frame.height()
        )));
    }
    let mut out = frame.select(feature_columns.iter().map(|c| c.as_str()))?;
    out.with_column(prediction_series(labels.iter().copied()))?;
    Ok(out)
}

/// Model feature columns of `frame` plus a `prediction` column
pub fn frame_with_predictions(model: &Model, frame: &DataFrame) -> Result<DataFrame> {
    let labels = model.predict(ModelInput::LabeledRecords(frame))?;
    attach_predictions(frame, model.feature_columns(), &labels.to_vec())
}

/// Reference snapshot: the training split of the dataset scored by `model`
pub fn compute_reference(model: &Model, settings: &Settings) -> Result<DataFrame> {
    let df = dataset::read_dataset(settings)?;
    let (x, y) = prepare_data(&df, model.feature_columns(), Some(model.target_column()))?;
    let y = y.ok_or_else(|| Error::InvalidInput("target column required".to_string()))?;
    let split = split_data(x.view(), y.view(), settings.test_size, settings.seed)?;

    let labels = model.predict(ModelInput::RawMatrix(split.x_train.view()))?;
    let mut reference = frame_from_matrix(model.feature_columns(), split.x_train.view())?;
    reference.with_column(prediction_series(labels))?;

    info!(
        "Computed reference snapshot with {} rows",
        reference.height()
    );
    Ok(reference)
}

pub fn save_reference(reference: &mut DataFrame, path: &Path) -> Result<()> {
    dataset::write_csv(reference, path)?;
    info!("Saved reference snapshot to {}", path.display());
    Ok(())
}

pub fn load_reference(path: &Path) -> Result<DataFrame> {
    if !path.exists() {
        return Err(Error::MissingArtifact(path.to_path_buf()));
    }
    dataset::read_csv(path)
}

/// Scores batches against a fixed reference and logs the result
pub struct DriftMonitor {
    reference: ReferenceSamples,
    feature_columns: Vec<String>,
    store: Arc<dyn MetricsStore>,
    table: String,
}

impl DriftMonitor {
    pub fn new(
        reference: DataFrame,
        feature_columns: Vec<String>,
        store: Arc<dyn MetricsStore>,
        table: impl Into<String>,
    ) -> Result<Self> {
        for column in feature_columns.iter().map(String::as_str).chain([PREDICTION_COLUMN]) {
            if reference.column(column).is_err() {
                return Err(Error::InvalidInput(format!(
                    "reference snapshot lacks column {column:?}"
                )));
            }
        }
        if reference.height() == 0 {
            return Err(Error::InvalidInput(
                "reference snapshot is empty".to_string(),
            ));
        }
        drift_metric_names(&feature_columns)?;

        let mut scored = feature_columns.clone();
        scored.push(PREDICTION_COLUMN.to_string());
        let reference = ReferenceSamples::from_frame(&reference, &scored)?;

        Ok(Self {
            reference,
            feature_columns,
            store,
            table: table.into(),
        })
    }

    pub fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Drift of every feature plus the prediction column
    pub fn report(&self, current: &DataFrame) -> Result<DriftReport> {
        DriftReport::against(&self.reference, current)
    }

    pub fn calculate_metrics(&self, current: &DataFrame) -> Result<MetricRecord> {
        self.report(current)?.to_record(&self.feature_columns)
    }

    /// Compute the batch's metrics and append them to the metrics table
    pub async fn log_batch(&self, current: &DataFrame) -> Result<SchemaChange> {
        self.log_report(&self.report(current)?).await
    }

    /// Append an already computed report to the metrics table
    pub async fn log_report(&self, report: &DriftReport) -> Result<SchemaChange> {
        let record = report.to_record(&self.feature_columns)?;
        debug!("Logging {} drift metrics to {}", record.len(), self.table);
        let change = self.store.log_metrics(&self.table, &record).await?;
        if !change.is_unchanged() {
            info!(
                "Metrics table {} changed: created={} added={:?}",
                self.table, change.created_table, change.added_columns
            );
        }
        Ok(change)
    }
}
