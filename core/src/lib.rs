//! smokedet Core Module
//!
//! The core module provides the smoke-detection pipeline: dataset loading,
//! the classifier and its artifacts, registry access, drift statistics and
//! the monitoring step that feeds the metrics store.

pub mod config;
pub mod dataset;
pub mod drift;
pub mod error;
pub mod model;
pub mod monitoring;
pub mod pipeline;
pub mod registry;

pub use config::Settings;
pub use drift::{ColumnDrift, DatasetDrift, DriftReport, StatTest};
pub use error::{Error, Result};
pub use model::{Estimator, Model, ModelInput};
pub use monitoring::{DriftMonitor, PREDICTION_COLUMN};
pub use registry::{ObjectStore, RegistryClient, RegistryError, TrackingClient};

pub use smokedet_databases as databases;
