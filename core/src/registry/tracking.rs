//! Client for the MLflow tracking and model registry REST API (2.0).

use reqwest::Client;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{RegistryError, RegistryResult};

const API_PREFIX: &str = "api/2.0/mlflow";
const RESOURCE_DOES_NOT_EXIST: &str = "RESOURCE_DOES_NOT_EXIST";
const SEARCH_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub name: String,
    #[serde(default)]
    pub artifact_location: Option<String>,
    #[serde(default)]
    pub lifecycle_stage: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Scheduled,
    Finished,
    Failed,
    Killed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub experiment_id: String,
    #[serde(default)]
    pub run_name: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub artifact_uri: Option<String>,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub end_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub key: String,
    pub value: f64,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub step: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunData {
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub info: RunInfo,
    #[serde(default)]
    pub data: RunData,
}

impl Run {
    /// Latest logged value of a metric
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.data
            .metrics
            .iter()
            .filter(|m| m.key == key)
            .max_by_key(|m| (m.timestamp, m.step))
            .map(|m| m.value)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.data
            .params
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Map a non-success response to a registry error
pub fn api_error(status: u16, body: &str) -> RegistryError {
    let parsed: Option<ApiErrorBody> = serde_json::from_str(body).ok();
    let (error_code, message) = match parsed {
        Some(b) => (b.error_code, b.message.unwrap_or_else(|| body.to_string())),
        None => (None, body.to_string()),
    };

    let missing = error_code.as_deref() == Some(RESOURCE_DOES_NOT_EXIST);
    if missing || (status == 404 && error_code.is_none()) {
        return RegistryError::NotFound(message);
    }
    RegistryError::Api {
        status,
        error_code,
        message,
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Deserialize)]
struct ExperimentResponse {
    experiment: Experiment,
}

#[derive(Debug, Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    run: Run,
}

#[derive(Debug, Deserialize)]
struct SearchRunsResponse {
    #[serde(default)]
    runs: Vec<Run>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegisteredModelResponse {
    registered_model: RegisteredModel,
}

#[derive(Debug, Deserialize)]
struct ModelVersionResponse {
    model_version: ModelVersion,
}

#[derive(Debug, Deserialize)]
struct SearchModelVersionsResponse {
    #[serde(default)]
    model_versions: Vec<ModelVersion>,
}

/// Tracking service client
#[derive(Debug, Clone)]
pub struct TrackingClient {
    base_url: String,
    client: Client,
}

impl TrackingClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> RegistryResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{API_PREFIX}/{endpoint}", self.base_url)
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> RegistryResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(api_error(status.as_u16(), &body));
        }
        Ok(response.json().await?)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> RegistryResult<T> {
        debug!("GET {endpoint} {query:?}");
        let response = self.client.get(self.url(endpoint)).query(query).send().await?;
        Self::read(response).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> RegistryResult<T> {
        debug!("POST {endpoint}");
        let response = self.client.post(self.url(endpoint)).json(body).send().await?;
        Self::read(response).await
    }

    pub async fn get_experiment_by_name(&self, name: &str) -> RegistryResult<Option<Experiment>> {
        match self
            .get::<ExperimentResponse>("experiments/get-by-name", &[("experiment_name", name)])
            .await
        {
            Ok(resp) => Ok(Some(resp.experiment)),
            Err(RegistryError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn create_experiment(&self, name: &str) -> RegistryResult<String> {
        let resp: CreateExperimentResponse = self
            .post("experiments/create", &json!({ "name": name }))
            .await?;
        Ok(resp.experiment_id)
    }

    /// Id of the named experiment, creating it when absent
    pub async fn ensure_experiment(&self, name: &str) -> RegistryResult<String> {
        match self.get_experiment_by_name(name).await? {
            Some(experiment) => Ok(experiment.experiment_id),
            None => self.create_experiment(name).await,
        }
    }

    pub async fn create_run(
        &self,
        experiment_id: &str,
        run_name: Option<&str>,
    ) -> RegistryResult<RunInfo> {
        let mut body = json!({
            "experiment_id": experiment_id,
            "start_time": now_millis(),
        });
        if let Some(run_name) = run_name {
            body["run_name"] = json!(run_name);
        }
        let resp: RunResponse = self.post("runs/create", &body).await?;
        Ok(resp.run.info)
    }

    pub async fn update_run(&self, run_id: &str, status: RunStatus) -> RegistryResult<()> {
        let _: IgnoredAny = self
            .post(
                "runs/update",
                &json!({
                    "run_id": run_id,
                    "status": status,
                    "end_time": now_millis(),
                }),
            )
            .await?;
        Ok(())
    }

    /// All runs of the experiments, following pagination
    pub async fn search_runs(
        &self,
        experiment_ids: &[String],
        order_by: &[&str],
    ) -> RegistryResult<Vec<Run>> {
        let mut runs = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut body = json!({
                "experiment_ids": experiment_ids,
                "order_by": order_by,
                "max_results": SEARCH_PAGE_SIZE,
            });
            if let Some(token) = &page_token {
                body["page_token"] = json!(token);
            }
            let resp: SearchRunsResponse = self.post("runs/search", &body).await?;
            runs.extend(resp.runs);
            match resp.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(runs)
    }

    pub async fn log_param(&self, run_id: &str, key: &str, value: &str) -> RegistryResult<()> {
        let _: IgnoredAny = self
            .post(
                "runs/log-parameter",
                &json!({ "run_id": run_id, "key": key, "value": value }),
            )
            .await?;
        Ok(())
    }

    pub async fn log_metric(&self, run_id: &str, key: &str, value: f64) -> RegistryResult<()> {
        let _: IgnoredAny = self
            .post(
                "runs/log-metric",
                &json!({
                    "run_id": run_id,
                    "key": key,
                    "value": value,
                    "timestamp": now_millis(),
                    "step": 0,
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn get_registered_model(
        &self,
        name: &str,
    ) -> RegistryResult<Option<RegisteredModel>> {
        match self
            .get::<RegisteredModelResponse>("registered-models/get", &[("name", name)])
            .await
        {
            Ok(resp) => Ok(Some(resp.registered_model)),
            Err(RegistryError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn create_registered_model(
        &self,
        name: &str,
        tags: &[(&str, &str)],
    ) -> RegistryResult<RegisteredModel> {
        let tags: Vec<Tag> = tags
            .iter()
            .map(|(k, v)| Tag {
                key: k.to_string(),
                value: v.to_string(),
            })
            .collect();
        let resp: RegisteredModelResponse = self
            .post(
                "registered-models/create",
                &json!({ "name": name, "tags": tags }),
            )
            .await?;
        Ok(resp.registered_model)
    }

    pub async fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: &str,
    ) -> RegistryResult<ModelVersion> {
        let resp: ModelVersionResponse = self
            .post(
                "model-versions/create",
                &json!({ "name": name, "source": source, "run_id": run_id }),
            )
            .await?;
        Ok(resp.model_version)
    }

    pub async fn get_model_version(
        &self,
        name: &str,
        version: &str,
    ) -> RegistryResult<ModelVersion> {
        let resp: ModelVersionResponse = self
            .get(
                "model-versions/get",
                &[("name", name), ("version", version)],
            )
            .await?;
        Ok(resp.model_version)
    }

    /// Versions matching an MLflow filter such as `run_id='abc'`
    pub async fn search_model_versions(&self, filter: &str) -> RegistryResult<Vec<ModelVersion>> {
        let resp: SearchModelVersionsResponse = self
            .get("model-versions/search", &[("filter", filter)])
            .await?;
        Ok(resp.model_versions)
    }
}
