//! Fitted classifiers the model can wrap.

use linfa::prelude::*;
use linfa_logistic::{FittedLogisticRegression, LogisticRegression};
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

const MAX_ITERATIONS: u64 = 100;

/// L2 regularisation strength
const ALPHA: f64 = 1.0;

/// A fitted classifier with fit/predict/score capability.
///
/// Persisted as a tagged value, so a blob that does not decode into one of
/// these variants is rejected at load time.
#[derive(Debug, Serialize, Deserialize)]
pub enum Estimator {
    LogisticRegression(FittedLogisticRegression<f64, usize>),
}

impl Estimator {
    /// Fit a binary logistic regression
    pub fn fit_logistic_regression(
        features: ArrayView2<f64>,
        targets: ArrayView1<usize>,
    ) -> Result<Self> {
        if features.nrows() != targets.len() {
            return Err(Error::Training(format!(
                "features and targets must have same number of samples: {} vs {}",
                features.nrows(),
                targets.len()
            )));
        }
        if features.is_empty() || targets.is_empty() {
            return Err(Error::Training(
                "features and targets cannot be empty".to_string(),
            ));
        }

        info!(
            "Starting Logistic Regression training with {} samples and {} features",
            features.nrows(),
            features.ncols()
        );

        let dataset = Dataset::new(features.to_owned(), targets.to_owned());
        let fitted = LogisticRegression::default()
            .max_iterations(MAX_ITERATIONS)
            .alpha(ALPHA)
            .fit(&dataset)
            .map_err(|e| Error::Training(format!("logistic regression training failed: {e}")))?;

        info!("Logistic regression training completed successfully");
        Ok(Estimator::LogisticRegression(fitted))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Estimator::LogisticRegression(_) => "LogisticRegression",
        }
    }

    /// Number of input columns the estimator was fitted on
    pub fn n_features(&self) -> usize {
        match self {
            Estimator::LogisticRegression(model) => model.params().len(),
        }
    }

    /// One class label per row
    pub fn predict(&self, features: ArrayView2<f64>) -> Result<Array1<usize>> {
        if features.ncols() != self.n_features() {
            return Err(Error::TypeMismatch(format!(
                "expected {} feature columns, got {}",
                self.n_features(),
                features.ncols()
            )));
        }
        let labels = match self {
            Estimator::LogisticRegression(model) => model.predict(&features),
        };
        Ok(labels)
    }

    /// Fraction of rows predicted correctly
    pub fn score(&self, features: ArrayView2<f64>, targets: ArrayView1<usize>) -> Result<f64> {
        if features.nrows() != targets.len() {
            return Err(Error::InvalidInput(format!(
                "features and targets must have same number of samples: {} vs {}",
                features.nrows(),
                targets.len()
            )));
        }
        if targets.is_empty() {
            return Err(Error::InvalidInput("cannot score an empty set".to_string()));
        }

        let predicted = self.predict(features)?;
        let correct = predicted
            .iter()
            .zip(targets.iter())
            .filter(|(p, t)| p == t)
            .count();
        Ok(correct as f64 / targets.len() as f64)
    }
}
