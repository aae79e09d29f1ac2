//! Model registry: run tracking, registered versions and their artifacts.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::Settings;

pub mod storage;
pub mod tracking;

pub use storage::{download_folder, parse_s3_uri, upload_folder, MemoryStore, ObjectStore, S3Store};
pub use tracking::{
    Experiment, ModelVersion, RegisteredModel, Run, RunInfo, RunStatus, TrackingClient,
};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tracking request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tracking server returned {status}: {message}")]
    Api {
        status: u16,
        error_code: Option<String>,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid S3 uri {0:?}: expected s3://<bucket>/<folder>")]
    InvalidUri(String),

    #[error("object storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Tracking service plus the object store its artifacts live in
#[derive(Clone)]
pub struct RegistryClient {
    pub tracking: TrackingClient,
    pub store: Arc<dyn ObjectStore>,
}

impl RegistryClient {
    pub fn new(tracking: TrackingClient, store: Arc<dyn ObjectStore>) -> Self {
        Self { tracking, store }
    }

    /// Tracking client for `mlflow_tracking_uri` backed by S3 from the AWS env
    pub async fn connect(settings: &Settings) -> RegistryResult<Self> {
        let tracking = TrackingClient::new(
            settings.mlflow_tracking_uri.clone(),
            Duration::from_secs(settings.request_timeout_secs),
        )?;
        let store: Arc<dyn ObjectStore> = Arc::new(S3Store::from_env().await);
        Ok(Self::new(tracking, store))
    }

    pub async fn fetch_model_version(
        &self,
        name: &str,
        version: &str,
        local_dir: &Path,
    ) -> RegistryResult<ModelVersion> {
        fetch_model_version(&self.tracking, self.store.as_ref(), name, version, local_dir).await
    }
}

/// Download the files of a registered model version into `local_dir`
pub async fn fetch_model_version(
    client: &TrackingClient,
    store: &dyn ObjectStore,
    name: &str,
    version: &str,
    local_dir: &Path,
) -> RegistryResult<ModelVersion> {
    let model_version = client.get_model_version(name, version).await?;
    let source = model_version
        .source
        .as_deref()
        .ok_or_else(|| RegistryError::NotFound(format!("source of {name} version {version}")))?;

    info!("Fetching {name} version {version} from {source}");
    download_folder(store, source, local_dir).await?;
    Ok(model_version)
}
