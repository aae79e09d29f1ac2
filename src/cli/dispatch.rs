//! Subcommand dispatch
//!
//! Every command loads settings first, then calls into the core pipelines.
//! Results are printed as JSON with `--json`, as short text lines otherwise.

use anyhow::Context;
use serde::Serialize;
use tracing::info;

use smokedet_core::databases::connect_metrics_store;
use smokedet_core::dataset::read_csv;
use smokedet_core::monitoring::{frame_with_predictions, load_reference};
use smokedet_core::pipeline::{
    download_model, evaluate_local, evaluate_version, feature_selection,
    register_models_by_accuracy, train_local, Evaluation, Registration, TrainOutcome,
};
use smokedet_core::{DriftMonitor, Model, RegistryClient, Settings};

use crate::cli::bootstrap::bootstrap_service;
use crate::cli::{Args, Error, Mode, EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_SUCCESS};

/// Exit code wrapper for CLI operations
pub type ExitCode = i32;

/// Run the parsed command and map the outcome to an exit code
pub async fn run_cli_mode(args: Args) -> ExitCode {
    let settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    match run_mode(args.command, &settings, args.json).await {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_FAILURE
        }
    }
}

async fn run_mode(mode: Mode, settings: &Settings, json: bool) -> anyhow::Result<()> {
    match mode {
        Mode::Train { columns, tracked } => {
            let mut sets = Mode::column_sets(&columns);
            if sets.is_empty() {
                sets.push(settings.feature_columns.clone());
            }
            if tracked {
                let registry = RegistryClient::connect(settings).await?;
                let outcomes = feature_selection(settings, &registry, &sets).await?;
                print_outcomes(&outcomes, json)
            } else {
                let [columns] = sets.as_slice() else {
                    return Err(Error::InvalidArgs(
                        "local training takes a single --columns set".to_string(),
                    )
                    .into());
                };
                let outcome = train_local(settings, columns)?;
                print_outcomes(std::slice::from_ref(&outcome), json)
            }
        }
        Mode::Evaluate { version } => {
            let evaluation = match version {
                Some(version) => {
                    let registry = RegistryClient::connect(settings).await?;
                    evaluate_version(settings, &registry, &version).await?
                }
                None => evaluate_local(settings)?,
            };
            print_evaluation(&evaluation, json)
        }
        Mode::Register { threshold } => {
            let threshold = threshold.unwrap_or(settings.registration_threshold);
            let registry = RegistryClient::connect(settings).await?;
            let registrations = register_models_by_accuracy(settings, &registry, threshold).await?;
            print_registrations(&registrations, json)
        }
        Mode::Download { version } => {
            let registry = RegistryClient::connect(settings).await?;
            match download_model(settings, &registry, version.as_deref()).await? {
                Some(fetched) => emit(&fetched, json, || {
                    format!(
                        "downloaded {} version {} into {}",
                        fetched.name,
                        fetched.version,
                        settings.deployment_model_dir.display()
                    )
                }),
                None => Ok(()),
            }
        }
        Mode::Serve => {
            let server = bootstrap_service(settings).await?;
            server.start().await
        }
        Mode::Monitor { input } => {
            let model = Model::from_directory(&settings.deployment_model_dir)
                .context("failed to load the serving model")?;
            let reference = load_reference(&settings.reference_path())?;
            let store = connect_metrics_store(&settings.database_url).await?;
            let monitor = DriftMonitor::new(
                reference,
                model.feature_columns().to_vec(),
                store,
                settings.drift_table.clone(),
            )?;

            let batch = read_csv(&input)?;
            let current = frame_with_predictions(&model, &batch)?;
            let report = monitor.report(&current)?;
            monitor.log_report(&report).await?;
            info!("Logged drift of {} rows from {}", current.height(), input.display());

            emit(&report, json, || {
                format!(
                    "drifted columns: {}/{} (dataset drift: {})",
                    report.dataset.number_of_drifted_columns,
                    report.dataset.number_of_columns,
                    report.dataset.dataset_drift
                )
            })
        }
    }
}

fn emit<T: Serialize>(value: &T, json: bool, text: impl FnOnce() -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text());
    }
    Ok(())
}

fn print_outcomes(outcomes: &[TrainOutcome], json: bool) -> anyhow::Result<()> {
    emit(&outcomes, json, || {
        outcomes
            .iter()
            .map(|o| {
                format!(
                    "{:?}: train_acc {:.02}, val_acc {:.02}{}",
                    o.feature_columns,
                    o.train_acc,
                    o.val_acc,
                    o.run_id
                        .as_deref()
                        .map(|id| format!(" (run {id})"))
                        .unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}

fn print_evaluation(evaluation: &Evaluation, json: bool) -> anyhow::Result<()> {
    emit(evaluation, json, || {
        format!(
            "train_acc {:.02}, val_acc {:.02}, report: {}",
            evaluation.train_acc,
            evaluation.val_acc,
            evaluation.report_path.display()
        )
    })
}

fn registration_line(registration: &Registration) -> String {
    match registration {
        Registration::Registered { run_id, version } => {
            format!("registered run {run_id} as version {version}")
        }
        Registration::AlreadyRegistered { run_id, version } => {
            format!("run {run_id} already registered as version {version}")
        }
        Registration::BelowThreshold { run_id, val_acc } => {
            format!("run {run_id} below threshold (val_acc {val_acc:.02})")
        }
        Registration::MissingMetric { run_id } => format!("run {run_id} has no val_acc"),
    }
}

fn print_registrations(registrations: &[Registration], json: bool) -> anyhow::Result<()> {
    emit(&registrations, json, || {
        registrations
            .iter()
            .map(registration_line)
            .collect::<Vec<_>>()
            .join("\n")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_lines() {
        let line = registration_line(&Registration::Registered {
            run_id: "abc".to_string(),
            version: "3".to_string(),
        });
        assert_eq!(line, "registered run abc as version 3");

        let line = registration_line(&Registration::BelowThreshold {
            run_id: "def".to_string(),
            val_acc: 70.126,
        });
        assert_eq!(line, "run def below threshold (val_acc 70.13)");
    }

    #[tokio::test]
    async fn test_local_training_rejects_several_sets() {
        let mode = Mode::Train {
            columns: vec!["A".to_string(), "B".to_string()],
            tracked: false,
        };
        let err = run_mode(mode, &Settings::default(), false).await.unwrap_err();
        assert!(err.to_string().contains("single --columns set"));
    }
}
