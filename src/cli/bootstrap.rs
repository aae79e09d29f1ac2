//! Service bootstrap
//!
//! Order at start-up:
//! 1. download the configured model version (unless `download_model_flag` is off)
//! 2. load the model from the deployment model dir
//! 3. compute and save the reference snapshot
//! 4. connect the metrics store and build the drift monitor
//! 5. assemble the API state and server
//!
//! Steps 3 and 4 are skipped when drift logging is disabled.

use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use smokedet_api::{ApiConfig, ApiServer, ApiState};
use smokedet_core::databases::connect_metrics_store;
use smokedet_core::model::column_list_repr;
use smokedet_core::monitoring::{compute_reference, save_reference};
use smokedet_core::pipeline::download_model;
use smokedet_core::{DriftMonitor, Model, RegistryClient, Settings};

/// Fetch the serving model when downloads are enabled
pub async fn fetch_serving_model(settings: &Settings) -> anyhow::Result<()> {
    if !settings.download_model_flag {
        info!(
            "Serving the model already in {}",
            settings.deployment_model_dir.display()
        );
        return Ok(());
    }
    let registry = RegistryClient::connect(settings)
        .await
        .context("failed to connect to the model registry")?;
    download_model(settings, &registry, None).await?;
    Ok(())
}

/// Reference snapshot, metrics store and monitor for a loaded model
pub async fn build_monitor(settings: &Settings, model: &Model) -> anyhow::Result<DriftMonitor> {
    let mut reference = compute_reference(model, settings)?;
    save_reference(&mut reference, &settings.reference_path())?;

    let store = connect_metrics_store(&settings.database_url).await?;
    let monitor = DriftMonitor::new(
        reference,
        model.feature_columns().to_vec(),
        store,
        settings.drift_table.clone(),
    )?;
    Ok(monitor)
}

/// Everything `serve` needs, ready to start
pub async fn bootstrap_service(settings: &Settings) -> anyhow::Result<ApiServer> {
    fetch_serving_model(settings).await?;

    let model = Model::from_directory(&settings.deployment_model_dir)
        .context("failed to load the serving model")?;
    info!(
        "Loaded model expecting numeric_cols: {}",
        column_list_repr(model.feature_columns())
    );

    let monitor = if settings.drift_logging_enabled {
        Some(Arc::new(build_monitor(settings, &model).await?))
    } else {
        info!("Drift logging disabled");
        None
    };

    let config = ApiConfig::from_settings(settings);
    let state = ApiState::new(Arc::new(model), monitor, config.clone())?;
    Ok(ApiServer::new(config, Arc::new(state)))
}
