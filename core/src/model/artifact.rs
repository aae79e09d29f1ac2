//! On-disk model artifact: `model.bin` holds the estimator, `meta.bin` the
//! column metadata. Both are bincode.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use super::{Estimator, Model};
use crate::error::{Error, Result};

pub const MODEL_FILE: &str = "model.bin";
pub const META_FILE: &str = "meta.bin";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMeta {
    pub feature_columns: Vec<String>,
    pub target_column: String,
}

impl Model {
    /// Replace `dir` with a fresh artifact directory
    pub fn save(&self, dir: &Path) -> Result<()> {
        let estimator = self.estimator.as_ref().ok_or(Error::Untrained)?;

        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        fs::create_dir_all(dir)?;

        let meta = ModelMeta {
            feature_columns: self.feature_columns.clone(),
            target_column: self.target_column.clone(),
        };
        fs::write(dir.join(MODEL_FILE), bincode::serialize(estimator)?)?;
        fs::write(dir.join(META_FILE), bincode::serialize(&meta)?)?;

        info!("Saved {} model to {}", estimator.kind(), dir.display());
        Ok(())
    }

    pub fn from_directory(dir: &Path) -> Result<Self> {
        let model_path = dir.join(MODEL_FILE);
        let meta_path = dir.join(META_FILE);
        for path in [&model_path, &meta_path] {
            if !path.exists() {
                return Err(Error::MissingArtifact(path.clone()));
            }
        }

        let estimator: Estimator = bincode::deserialize(&fs::read(&model_path)?)
            .map_err(|e| Error::InvalidEstimator(format!("{}: {e}", model_path.display())))?;
        let meta: ModelMeta = bincode::deserialize(&fs::read(&meta_path)?)?;

        if estimator.n_features() != meta.feature_columns.len() {
            return Err(Error::InvalidEstimator(format!(
                "estimator expects {} features but metadata lists {:?}",
                estimator.n_features(),
                meta.feature_columns
            )));
        }

        info!(
            "Loaded {} model from {} with features {:?}",
            estimator.kind(),
            dir.display(),
            meta.feature_columns
        );
        Ok(Model::new(meta.feature_columns, meta.target_column).with_estimator(estimator))
    }
}
