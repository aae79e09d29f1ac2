//! Tracked training, registration and model download against an in-process
//! tracking server and an in-memory object store.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use smokedet_core::pipeline::{self, Registration};
use smokedet_core::registry::{MemoryStore, ModelVersion, RegistryClient, TrackingClient};
use smokedet_core::{Model, Settings};

#[derive(Default)]
struct FakeTracking {
    experiments: Vec<Value>,
    runs: Vec<Value>,
    registered_models: Vec<Value>,
    versions: Vec<Value>,
    registered_model_creates: usize,
}

type Shared = Arc<Mutex<FakeTracking>>;
type Params = Query<HashMap<String, String>>;

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error_code": "RESOURCE_DOES_NOT_EXIST", "message": "missing"})),
    )
        .into_response()
}

async fn get_experiment(State(s): State<Shared>, Query(q): Params) -> Response {
    let s = s.lock().unwrap();
    match s.experiments.iter().find(|e| e["name"] == q["experiment_name"]) {
        Some(e) => Json(json!({ "experiment": e })).into_response(),
        None => not_found(),
    }
}

async fn create_experiment(State(s): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut s = s.lock().unwrap();
    let id = (s.experiments.len() + 1).to_string();
    s.experiments
        .push(json!({"experiment_id": id, "name": body["name"]}));
    Json(json!({ "experiment_id": id }))
}

async fn create_run(State(s): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut s = s.lock().unwrap();
    let run_id = format!("run{}", s.runs.len() + 1);
    let experiment_id = body["experiment_id"].as_str().unwrap().to_string();
    let run = json!({
        "info": {
            "run_id": run_id,
            "experiment_id": experiment_id,
            "status": "RUNNING",
            "artifact_uri": format!("s3://bucket/{experiment_id}/{run_id}/artifacts"),
        },
        "data": {"metrics": [], "params": []}
    });
    s.runs.push(run.clone());
    Json(json!({ "run": run }))
}

fn run_mut<'a>(s: &'a mut FakeTracking, run_id: &Value) -> &'a mut Value {
    s.runs
        .iter_mut()
        .find(|r| &r["info"]["run_id"] == run_id)
        .unwrap()
}

async fn update_run(State(s): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut s = s.lock().unwrap();
    let run = run_mut(&mut s, &body["run_id"]);
    run["info"]["status"] = body["status"].clone();
    Json(json!({ "run_info": run["info"] }))
}

async fn log_param(State(s): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut s = s.lock().unwrap();
    let run = run_mut(&mut s, &body["run_id"]);
    run["data"]["params"]
        .as_array_mut()
        .unwrap()
        .push(json!({"key": body["key"], "value": body["value"]}));
    Json(json!({}))
}

async fn log_metric(State(s): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut s = s.lock().unwrap();
    let run = run_mut(&mut s, &body["run_id"]);
    run["data"]["metrics"].as_array_mut().unwrap().push(json!({
        "key": body["key"],
        "value": body["value"],
        "timestamp": body["timestamp"],
        "step": body["step"],
    }));
    Json(json!({}))
}

async fn search_runs(State(s): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let s = s.lock().unwrap();
    assert_eq!(body["order_by"], json!(["metrics.val_acc ASC"]));
    let ids = body["experiment_ids"].as_array().unwrap();
    let val_acc = |run: &Value| {
        run["data"]["metrics"]
            .as_array()
            .unwrap()
            .iter()
            .find(|m| m["key"] == "val_acc")
            .and_then(|m| m["value"].as_f64())
            .unwrap_or(f64::NEG_INFINITY)
    };
    let mut runs: Vec<Value> = s
        .runs
        .iter()
        .filter(|r| ids.contains(&r["info"]["experiment_id"]))
        .cloned()
        .collect();
    runs.sort_by(|a, b| val_acc(a).total_cmp(&val_acc(b)));
    Json(json!({ "runs": runs }))
}

async fn get_registered_model(State(s): State<Shared>, Query(q): Params) -> Response {
    let s = s.lock().unwrap();
    match s.registered_models.iter().find(|m| m["name"] == q["name"]) {
        Some(m) => Json(json!({ "registered_model": m })).into_response(),
        None => not_found(),
    }
}

async fn create_registered_model(State(s): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut s = s.lock().unwrap();
    s.registered_model_creates += 1;
    let model = json!({"name": body["name"], "tags": body["tags"]});
    s.registered_models.push(model.clone());
    Json(json!({ "registered_model": model }))
}

async fn create_model_version(State(s): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut s = s.lock().unwrap();
    let version = json!({
        "name": body["name"],
        "version": (s.versions.len() + 1).to_string(),
        "source": body["source"],
        "run_id": body["run_id"],
        "status": "READY",
    });
    s.versions.push(version.clone());
    Json(json!({ "model_version": version }))
}

async fn get_model_version(State(s): State<Shared>, Query(q): Params) -> Response {
    let s = s.lock().unwrap();
    match s
        .versions
        .iter()
        .find(|v| v["name"] == q["name"] && v["version"] == q["version"])
    {
        Some(v) => Json(json!({ "model_version": v })).into_response(),
        None => not_found(),
    }
}

async fn search_model_versions(State(s): State<Shared>, Query(q): Params) -> Json<Value> {
    let s = s.lock().unwrap();
    let versions: Vec<&Value> = s
        .versions
        .iter()
        .filter(|v| q["filter"] == format!("name='{}'", v["name"].as_str().unwrap()))
        .collect();
    Json(json!({ "model_versions": versions }))
}

async fn spawn_tracking() -> (String, Shared) {
    let state = Shared::default();
    let app = Router::new()
        .route("/api/2.0/mlflow/experiments/get-by-name", get(get_experiment))
        .route("/api/2.0/mlflow/experiments/create", post(create_experiment))
        .route("/api/2.0/mlflow/runs/create", post(create_run))
        .route("/api/2.0/mlflow/runs/update", post(update_run))
        .route("/api/2.0/mlflow/runs/log-parameter", post(log_param))
        .route("/api/2.0/mlflow/runs/log-metric", post(log_metric))
        .route("/api/2.0/mlflow/runs/search", post(search_runs))
        .route("/api/2.0/mlflow/registered-models/get", get(get_registered_model))
        .route(
            "/api/2.0/mlflow/registered-models/create",
            post(create_registered_model),
        )
        .route("/api/2.0/mlflow/model-versions/create", post(create_model_version))
        .route("/api/2.0/mlflow/model-versions/get", get(get_model_version))
        .route("/api/2.0/mlflow/model-versions/search", get(search_model_versions))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

fn write_dataset(settings: &Settings) {
    let mut csv = String::from("UTC,Temperature[C],Humidity[%],Fire Alarm\n");
    for i in 0..20 {
        let step = i as f64;
        writeln!(csv, "{i},{},{},0", 10.0 + step, 20.0 + 1.5 * step).unwrap();
        writeln!(csv, "{i},{},{},1", 40.0 + step, 80.0 + step).unwrap();
    }
    std::fs::create_dir_all(&settings.dataset_extracted_dir).unwrap();
    std::fs::write(settings.dataset_file_path(), csv).unwrap();
}

fn settings_in(dir: &Path, tracking_uri: &str) -> Settings {
    Settings {
        dataset_zip_path: dir.join("missing.zip"),
        dataset_extracted_dir: dir.join("dataset"),
        artifact_dir: dir.join("artifacts"),
        model_dir: dir.join("artifacts/model"),
        deployment_model_dir: dir.join("deployment/model"),
        mlflow_tracking_uri: tracking_uri.to_string(),
        ..Settings::default()
    }
}

fn registry(uri: &str, store: Arc<MemoryStore>) -> RegistryClient {
    RegistryClient::new(
        TrackingClient::new(uri, Duration::from_secs(5)).unwrap(),
        store,
    )
}

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn tracked_runs_register_and_download() {
    let (uri, state) = spawn_tracking().await;
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_in(dir.path(), &uri);
    write_dataset(&settings);
    let store = Arc::new(MemoryStore::new());
    let registry = registry(&uri, store.clone());

    let outcomes = pipeline::feature_selection(
        &settings,
        &registry,
        &[
            columns(&["Temperature[C]"]),
            columns(&["Temperature[C]", "Humidity[%]"]),
        ],
    )
    .await
    .unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].run_id.as_deref(), Some("run1"));
    // model.bin and meta.bin for each run
    assert_eq!(store.len().await, 4);

    {
        let s = state.lock().unwrap();
        assert_eq!(s.experiments.len(), 1);
        let run = &s.runs[1];
        assert_eq!(run["info"]["status"], "FINISHED");
        let params: HashMap<&str, &str> = run["data"]["params"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| (p["key"].as_str().unwrap(), p["value"].as_str().unwrap()))
            .collect();
        assert_eq!(params["seed"], "565");
        assert_eq!(params["numeric_cols"], "['Humidity[%]', 'Temperature[C]']");
        assert_eq!(params["training data shapes"], "((32, 2), (32,))");
        assert_eq!(params["validation data shapes"], "((8, 2), (8,))");
    }

    let first = pipeline::register_models_by_accuracy(&settings, &registry, 50.0)
        .await
        .unwrap();
    assert_eq!(first.len(), 2);
    assert!(first
        .iter()
        .all(|r| matches!(r, Registration::Registered { .. })));

    let second = pipeline::register_models_by_accuracy(&settings, &registry, 50.0)
        .await
        .unwrap();
    assert!(second
        .iter()
        .all(|r| matches!(r, Registration::AlreadyRegistered { .. })));
    {
        let s = state.lock().unwrap();
        assert_eq!(s.registered_model_creates, 1);
        assert_eq!(s.versions.len(), 2);
        assert_eq!(
            s.registered_models[0]["tags"],
            json!([{"key": "task", "value": "smoke-detection"}])
        );
    }

    let run2_version = second
        .iter()
        .find_map(|r| match r {
            Registration::AlreadyRegistered { run_id, version } if run_id == "run2" => {
                Some(version.clone())
            }
            _ => None,
        })
        .unwrap();
    let fetched: Option<ModelVersion> =
        pipeline::download_model(&settings, &registry, Some(&run2_version))
            .await
            .unwrap();
    assert_eq!(
        fetched.unwrap().source.as_deref(),
        Some("s3://bucket/1/run2/artifacts/model")
    );
    let model = Model::from_directory(&settings.deployment_model_dir).unwrap();
    assert_eq!(model.feature_columns(), &columns(&["Humidity[%]", "Temperature[C]"]));

    let evaluation = pipeline::evaluate_version(&settings, &registry, &run2_version)
        .await
        .unwrap();
    assert_eq!(evaluation.val_acc, outcomes[1].val_acc);
    let report = std::fs::read_to_string(evaluation.report_path).unwrap();
    assert!(report.contains(&format!("using model version: {run2_version}")));
}

#[tokio::test]
async fn registration_respects_threshold() {
    let (uri, _state) = spawn_tracking().await;
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_in(dir.path(), &uri);
    write_dataset(&settings);
    let registry = registry(&uri, Arc::new(MemoryStore::new()));

    pipeline::train_tracked(&settings, &registry, &columns(&["Temperature[C]"]))
        .await
        .unwrap();
    let outcome = pipeline::register_models_by_accuracy(&settings, &registry, 101.0)
        .await
        .unwrap();
    assert!(matches!(
        outcome.as_slice(),
        [Registration::BelowThreshold { .. }]
    ));
}

#[tokio::test]
async fn failed_training_marks_run_failed() {
    let (uri, state) = spawn_tracking().await;
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_in(dir.path(), &uri);
    write_dataset(&settings);
    let registry = registry(&uri, Arc::new(MemoryStore::new()));

    let result = pipeline::train_tracked(&settings, &registry, &columns(&["eCO2[ppm]"])).await;
    assert!(result.is_err());
    let s = state.lock().unwrap();
    assert_eq!(s.runs[0]["info"]["status"], "FAILED");
}

#[tokio::test]
async fn download_skipped_when_disabled() {
    let (uri, _state) = spawn_tracking().await;
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        download_model_flag: false,
        ..settings_in(dir.path(), &uri)
    };
    let registry = registry(&uri, Arc::new(MemoryStore::new()));

    let fetched = pipeline::download_model(&settings, &registry, None)
        .await
        .unwrap();
    assert!(fetched.is_none());
    assert!(!settings.deployment_model_dir.exists());
}
