//! Error taxonomy shared by the pipeline components.

use std::path::PathBuf;

use crate::registry::RegistryError;
use smokedet_databases::StoreError;

/// Canonical error type for the core crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required model file is absent
    #[error("{} doesn't exist", .0.display())]
    MissingArtifact(PathBuf),

    /// Malformed or incomplete input data
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Input shape or dtype the model cannot consume
    #[error("unsupported input: {0}")]
    TypeMismatch(String),

    /// Failure in the drift-logging path
    #[error(transparent)]
    Database(#[from] StoreError),

    /// A required external resource (dataset archive, setting) is absent
    #[error("{0}")]
    ConfigurationMissing(String),

    /// Operation needs a fitted estimator
    #[error("model has not been trained")]
    Untrained,

    /// Serialized estimator blob does not decode into a supported estimator
    #[error("not a supported estimator: {0}")]
    InvalidEstimator(String),

    #[error("training failed: {0}")]
    Training(String),

    /// A test distribution rejected its parameters
    #[error("statistics error: {0}")]
    Statistics(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("object storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Polars(#[from] polars::error::PolarsError),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
