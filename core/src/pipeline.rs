//! Training, registration and evaluation workflows.

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Settings;
use crate::dataset::{prepare_data, read_dataset, split_data, SplitData};
use crate::error::{Error, Result};
use crate::model::{column_list_repr, Model};
use crate::registry::{upload_folder, ModelVersion, RegistryClient, RunStatus};

pub const TRAIN_ACC: &str = "train_acc";
pub const VAL_ACC: &str = "val_acc";
pub const REGISTERED_MODEL_TAGS: &[(&str, &str)] = &[("task", "smoke-detection")];
pub const EVALUATION_REPORT: &str = "evaluation-report.md";

/// Result of one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainOutcome {
    pub feature_columns: Vec<String>,
    pub train_shape: (usize, usize),
    pub val_shape: (usize, usize),
    pub train_acc: f64,
    pub val_acc: f64,
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Registration {
    Registered { run_id: String, version: String },
    AlreadyRegistered { run_id: String, version: String },
    BelowThreshold { run_id: String, val_acc: f64 },
    MissingMetric { run_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Registered version, or `None` for the local model
    pub version: Option<String>,
    pub train_acc: f64,
    pub val_acc: f64,
    pub report_path: PathBuf,
}

fn split_for(settings: &Settings, df: &DataFrame, model: &Model) -> Result<SplitData> {
    let (x, y) = prepare_data(df, model.feature_columns(), Some(model.target_column()))?;
    let y = y.ok_or_else(|| Error::InvalidInput("target column required".to_string()))?;
    split_data(x.view(), y.view(), settings.test_size, settings.seed)
}

/// Fit a fresh model on the training split of `df`
pub fn train_on_frame(
    settings: &Settings,
    df: &DataFrame,
    feature_columns: &[String],
) -> Result<(Model, TrainOutcome)> {
    let mut model = Model::new(feature_columns.iter().cloned(), settings.target_column.clone());
    let split = split_for(settings, df, &model)?;

    info!(
        "Training data shape(X,y): ({}, {}), ({},)",
        split.x_train.nrows(),
        split.x_train.ncols(),
        split.y_train.len()
    );
    info!(
        "Validation data shape(X,y): ({}, {}), ({},)",
        split.x_val.nrows(),
        split.x_val.ncols(),
        split.y_val.len()
    );

    model.train(split.x_train.view(), split.y_train.view())?;
    let train_acc = model.accuracy(split.x_train.view(), split.y_train.view())?;
    info!("Training Accuracy: {train_acc:.4}");
    let val_acc = model.accuracy(split.x_val.view(), split.y_val.view())?;
    info!("Validation Accuracy: {val_acc:.4}");

    let outcome = TrainOutcome {
        feature_columns: model.feature_columns().to_vec(),
        train_shape: (split.x_train.nrows(), split.x_train.ncols()),
        val_shape: (split.x_val.nrows(), split.x_val.ncols()),
        train_acc,
        val_acc,
        run_id: None,
    };
    Ok((model, outcome))
}

/// Train on the configured dataset and save to `model_dir`
pub fn train_local(settings: &Settings, feature_columns: &[String]) -> Result<TrainOutcome> {
    let df = read_dataset(settings)?;
    let (model, outcome) = train_on_frame(settings, &df, feature_columns)?;
    model.save(&settings.model_dir)?;
    info!("Model artifacts saved to {}", settings.model_dir.display());
    Ok(outcome)
}

fn shapes_param(shape: (usize, usize)) -> String {
    format!("(({}, {}), ({},))", shape.0, shape.1, shape.0)
}

async fn log_training(
    settings: &Settings,
    registry: &RegistryClient,
    run_id: &str,
    artifact_uri: Option<&str>,
    df: &DataFrame,
    feature_columns: &[String],
) -> Result<TrainOutcome> {
    let tracking = &registry.tracking;
    let mut sorted = feature_columns.to_vec();
    sorted.sort();
    sorted.dedup();

    tracking
        .log_param(run_id, "seed", &settings.seed.to_string())
        .await?;
    tracking
        .log_param(run_id, "numeric_cols", &column_list_repr(&sorted))
        .await?;

    let (model, mut outcome) = train_on_frame(settings, df, &sorted)?;
    tracking
        .log_param(run_id, "training data shapes", &shapes_param(outcome.train_shape))
        .await?;
    tracking
        .log_param(run_id, "validation data shapes", &shapes_param(outcome.val_shape))
        .await?;
    tracking.log_metric(run_id, TRAIN_ACC, outcome.train_acc).await?;
    tracking.log_metric(run_id, VAL_ACC, outcome.val_acc).await?;

    model.save(&settings.model_dir)?;
    let artifact_uri = artifact_uri.ok_or_else(|| {
        Error::ConfigurationMissing(format!("run {run_id} has no artifact location"))
    })?;
    let target = format!("{}/model", artifact_uri.trim_end_matches('/'));
    upload_folder(registry.store.as_ref(), &settings.model_dir, &target).await?;
    info!("Model artifacts logged to {target}");

    outcome.run_id = Some(run_id.to_string());
    Ok(outcome)
}

/// Train inside a tracking run of the configured experiment
pub async fn train_tracked_on_frame(
    settings: &Settings,
    registry: &RegistryClient,
    df: &DataFrame,
    feature_columns: &[String],
) -> Result<TrainOutcome> {
    let experiment_id = registry
        .tracking
        .ensure_experiment(&settings.mlflow_experiment_name)
        .await?;
    let run = registry.tracking.create_run(&experiment_id, None).await?;
    info!(
        "started tracking run: {}",
        run.run_name.as_deref().unwrap_or(&run.run_id)
    );

    let result = log_training(
        settings,
        registry,
        &run.run_id,
        run.artifact_uri.as_deref(),
        df,
        feature_columns,
    )
    .await;

    let status = if result.is_ok() {
        RunStatus::Finished
    } else {
        RunStatus::Failed
    };
    if let Err(e) = registry.tracking.update_run(&run.run_id, status).await {
        warn!("Failed to mark run {} as {status:?}: {e}", run.run_id);
    }
    result
}

pub async fn train_tracked(
    settings: &Settings,
    registry: &RegistryClient,
    feature_columns: &[String],
) -> Result<TrainOutcome> {
    let df = read_dataset(settings)?;
    train_tracked_on_frame(settings, registry, &df, feature_columns).await
}

/// One tracked training run per column set
pub async fn feature_selection(
    settings: &Settings,
    registry: &RegistryClient,
    column_sets: &[Vec<String>],
) -> Result<Vec<TrainOutcome>> {
    let df = read_dataset(settings)?;
    let mut outcomes = Vec::with_capacity(column_sets.len());
    for (i, columns) in column_sets.iter().enumerate() {
        let mut sorted = columns.clone();
        sorted.sort();
        info!(
            "{}/{} running training with numeric_cols: {}",
            i + 1,
            column_sets.len(),
            column_list_repr(&sorted)
        );
        outcomes.push(train_tracked_on_frame(settings, registry, &df, &sorted).await?);
    }
    Ok(outcomes)
}

/// Register every run of the experiment whose validation accuracy reaches
/// `threshold`, skipping runs that already have a version
pub async fn register_models_by_accuracy(
    settings: &Settings,
    registry: &RegistryClient,
    threshold: f64,
) -> Result<Vec<Registration>> {
    let tracking = &registry.tracking;
    let name = settings.mlflow_model_name.as_str();
    info!("registering all models with val_acc >= {threshold}");

    if tracking.get_registered_model(name).await?.is_none() {
        info!("Creating Registered Model: {name}");
        tracking
            .create_registered_model(name, REGISTERED_MODEL_TAGS)
            .await?;
    }

    let experiment = tracking
        .get_experiment_by_name(&settings.mlflow_experiment_name)
        .await?
        .ok_or_else(|| {
            Error::ConfigurationMissing(format!(
                "experiment {} does not exist",
                settings.mlflow_experiment_name
            ))
        })?;
    let order_by = format!("metrics.{VAL_ACC} ASC");
    let runs = tracking
        .search_runs(&[experiment.experiment_id], &[order_by.as_str()])
        .await?;

    let versions: HashMap<String, ModelVersion> = tracking
        .search_model_versions(&format!("name='{name}'"))
        .await?
        .into_iter()
        .filter_map(|v| v.run_id.clone().map(|id| (id, v)))
        .collect();

    let mut outcomes = Vec::with_capacity(runs.len());
    for run in runs {
        let run_id = run.info.run_id.clone();
        let Some(val_acc) = run.metric(VAL_ACC) else {
            warn!("Run {run_id} has no {VAL_ACC} metric, skipping");
            outcomes.push(Registration::MissingMetric { run_id });
            continue;
        };
        if val_acc < threshold {
            outcomes.push(Registration::BelowThreshold { run_id, val_acc });
            continue;
        }

        if let Some(existing) = versions.get(&run_id) {
            info!(
                "Model from run {run_id} is already registered as version {}",
                existing.version
            );
            outcomes.push(Registration::AlreadyRegistered {
                run_id,
                version: existing.version.clone(),
            });
            continue;
        }

        let artifact_uri = run.info.artifact_uri.as_deref().ok_or_else(|| {
            Error::ConfigurationMissing(format!("run {run_id} has no artifact location"))
        })?;
        let source = format!("{}/model", artifact_uri.trim_end_matches('/'));
        info!("registering model from run {run_id}: {source}");
        let version = tracking.create_model_version(name, &source, &run_id).await?;
        outcomes.push(Registration::Registered {
            run_id,
            version: version.version,
        });
    }
    Ok(outcomes)
}

fn write_report(path: &Path, header: &str, train_acc: f64, val_acc: f64) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let report = format!(
        "# Evaluation Report\n{header}\n\n\
         - training accuracy: {train_acc}\n\
         - validation accuracy: {val_acc}\n"
    );
    fs::write(path, report)?;
    Ok(())
}

fn evaluate_model(settings: &Settings, df: &DataFrame, model: &Model) -> Result<(f64, f64)> {
    let split = split_for(settings, df, model)?;
    let train_acc = model.accuracy(split.x_train.view(), split.y_train.view())?;
    info!("training accuracy: {train_acc:.02}");
    let val_acc = model.accuracy(split.x_val.view(), split.y_val.view())?;
    info!("validation accuracy: {val_acc:.02}");
    Ok((train_acc, val_acc))
}

/// Evaluate the model saved in `model_dir`
pub fn evaluate_local(settings: &Settings) -> Result<Evaluation> {
    let model = Model::from_directory(&settings.model_dir)?;
    let df = read_dataset(settings)?;
    let (train_acc, val_acc) = evaluate_model(settings, &df, &model)?;

    let report_path = settings.artifact_dir.join(EVALUATION_REPORT);
    write_report(
        &report_path,
        &format!("using local model: {}", settings.model_dir.display()),
        train_acc,
        val_acc,
    )?;
    Ok(Evaluation {
        version: None,
        train_acc,
        val_acc,
        report_path,
    })
}

/// Download a registered version and evaluate it on the configured dataset
pub async fn evaluate_version(
    settings: &Settings,
    registry: &RegistryClient,
    version: &str,
) -> Result<Evaluation> {
    info!("evaluating model_version {version}");
    let local_dir = settings
        .artifact_dir
        .join("evaluation")
        .join(format!("version-{version}"));
    registry
        .fetch_model_version(&settings.mlflow_model_name, version, &local_dir)
        .await?;

    let model = Model::from_directory(&local_dir)?;
    let df = read_dataset(settings)?;
    let (train_acc, val_acc) = evaluate_model(settings, &df, &model)?;

    let report_path = settings.artifact_dir.join(EVALUATION_REPORT);
    write_report(
        &report_path,
        &format!("using model version: {version}"),
        train_acc,
        val_acc,
    )?;
    Ok(Evaluation {
        version: Some(version.to_string()),
        train_acc,
        val_acc,
        report_path,
    })
}

/// Fetch the configured (or given) version into the deployment model dir.
///
/// Returns `None` without touching anything when downloads are disabled.
pub async fn download_model(
    settings: &Settings,
    registry: &RegistryClient,
    version: Option<&str>,
) -> Result<Option<ModelVersion>> {
    if !settings.download_model_flag {
        info!(
            "Skipping model download from the registry, \
             set DOWNLOAD_MODEL_FLAG=true to download the model"
        );
        return Ok(None);
    }
    let version = version.unwrap_or(&settings.mlflow_model_version);
    info!("Downloading model version: {version}");
    let fetched = registry
        .fetch_model_version(
            &settings.mlflow_model_name,
            version,
            &settings.deployment_model_dir,
        )
        .await?;
    Ok(Some(fetched))
}
