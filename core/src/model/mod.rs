//! Smoke classifier: a fitted estimator bound to the feature columns it
//! was trained on.

use ndarray::{Array1, ArrayView1, ArrayView2};
use polars::prelude::DataFrame;
use tracing::debug;

use crate::dataset::feature_matrix;
use crate::error::{Error, Result};

mod artifact;
mod estimator;

pub use artifact::{ModelMeta, META_FILE, MODEL_FILE};
pub use estimator::Estimator;

/// Inputs accepted by [`Model::predict`]
#[derive(Debug, Clone, Copy)]
pub enum ModelInput<'a> {
    /// Columns already in `feature_columns` order
    RawMatrix(ArrayView2<'a, f64>),
    /// Named columns; features are picked by name and extra columns ignored
    LabeledRecords(&'a DataFrame),
}

impl<'a> From<ArrayView2<'a, f64>> for ModelInput<'a> {
    fn from(view: ArrayView2<'a, f64>) -> Self {
        ModelInput::RawMatrix(view)
    }
}

impl<'a> From<&'a DataFrame> for ModelInput<'a> {
    fn from(df: &'a DataFrame) -> Self {
        ModelInput::LabeledRecords(df)
    }
}

/// Render column names as a bracketed, quoted list: `['A', 'B']`
pub fn column_list_repr(columns: &[String]) -> String {
    let quoted: Vec<String> = columns
        .iter()
        .map(|c| {
            if c.contains('\'') && !c.contains('"') {
                format!("\"{}\"", c.replace('\\', "\\\\"))
            } else {
                format!("'{}'", c.replace('\\', "\\\\").replace('\'', "\\'"))
            }
        })
        .collect();
    format!("[{}]", quoted.join(", "))
}

#[derive(Debug)]
pub struct Model {
    feature_columns: Vec<String>,
    target_column: String,
    estimator: Option<Estimator>,
}

impl Model {
    /// Untrained model; feature columns are sorted and deduplicated
    pub fn new<I, S>(feature_columns: I, target_column: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut feature_columns: Vec<String> =
            feature_columns.into_iter().map(Into::into).collect();
        feature_columns.sort();
        feature_columns.dedup();

        Self {
            feature_columns,
            target_column: target_column.into(),
            estimator: None,
        }
    }

    pub fn with_estimator(mut self, estimator: Estimator) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    pub fn target_column(&self) -> &str {
        &self.target_column
    }

    pub fn estimator(&self) -> Option<&Estimator> {
        self.estimator.as_ref()
    }

    pub fn is_trained(&self) -> bool {
        self.estimator.is_some()
    }

    pub fn train(&mut self, features: ArrayView2<f64>, target: ArrayView1<usize>) -> Result<()> {
        if features.ncols() != self.feature_columns.len() {
            return Err(Error::Training(format!(
                "expected {} feature columns, got {}",
                self.feature_columns.len(),
                features.ncols()
            )));
        }
        self.estimator = Some(Estimator::fit_logistic_regression(features, target)?);
        Ok(())
    }

    /// One class label per input row, in input order
    pub fn predict<'a>(&self, input: impl Into<ModelInput<'a>>) -> Result<Array1<usize>> {
        let estimator = self.estimator.as_ref().ok_or(Error::Untrained)?;
        match input.into() {
            ModelInput::RawMatrix(view) => {
                if view.ncols() != self.feature_columns.len() {
                    return Err(Error::TypeMismatch(format!(
                        "matrix has {} columns, model expects {:?}",
                        view.ncols(),
                        self.feature_columns
                    )));
                }
                estimator.predict(view)
            }
            ModelInput::LabeledRecords(df) => {
                debug!("Predicting {} records", df.height());
                let x = feature_matrix(df, &self.feature_columns)?;
                estimator.predict(x.view())
            }
        }
    }

    /// Share of correctly classified rows, in percent
    pub fn accuracy(&self, features: ArrayView2<f64>, target: ArrayView1<usize>) -> Result<f64> {
        let estimator = self.estimator.as_ref().ok_or(Error::Untrained)?;
        Ok(estimator.score(features, target)? * 100.0)
    }
}
