//! API Handlers Module
//!
//! This module contains the request handlers for the inference service.

use axum::{
    body::Bytes,
    debug_handler,
    extract::State,
    http::HeaderMap,
    response::{Html, Json},
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use smokedet_core::monitoring::attach_predictions;
use smokedet_core::{DriftMonitor, Model, ModelInput};

use crate::fixtures::fixture_for;
use crate::models::{parse_json_body, records_to_frame, validate_records, ApiConfig, ApiError};

/// Represents the state of the API server
pub struct ApiState {
    /// Loaded classifier
    pub model: Arc<Model>,
    /// Drift logging for served batches; `None` disables it
    pub monitor: Option<Arc<DriftMonitor>>,
    /// Client for the self-test call
    pub http: reqwest::Client,
    pub config: ApiConfig,
}

impl ApiState {
    pub fn new(
        model: Arc<Model>,
        monitor: Option<Arc<DriftMonitor>>,
        config: ApiConfig,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let monitor = monitor.filter(|_| config.drift_logging_enabled);
        Ok(Self {
            model,
            monitor,
            http,
            config,
        })
    }
}

/// Health check endpoint
#[debug_handler]
pub async fn health_check() -> Json<HashMap<String, String>> {
    let mut response = HashMap::new();
    response.insert("status".to_string(), "healthy".to_string());
    response.insert("service".to_string(), "smokedet-api".to_string());
    Json(response)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Landing page listing the inputs the model expects
#[debug_handler]
pub async fn home(State(state): State<Arc<ApiState>>) -> Html<String> {
    let columns = state.model.feature_columns();
    let items: String = columns
        .iter()
        .map(|c| format!("      <li><code>{}</code></li>\n", escape_html(c)))
        .collect();
    let example: serde_json::Map<String, Value> =
        columns.iter().map(|c| (c.clone(), json!(0))).collect();
    let example = escape_html(&Value::Array(vec![Value::Object(example)]).to_string());

    Html(format!(
        r#"<!DOCTYPE html>
<html>
  <head><title>Smoke Detection</title></head>
  <body>
    <h1>Smoke Detection</h1>
    <p>POST a JSON list of records to <code>/predict</code>. Every record needs these numeric columns:</p>
    <ul>
{items}    </ul>
    <textarea id="payload" rows="6" cols="80">{example}</textarea>
    <button onclick="predict()">Predict</button>
    <pre id="result"></pre>
    <script>
      async function predict() {{
        const response = await fetch("/predict", {{
          method: "POST",
          headers: {{"Content-Type": "application/json"}},
          body: document.getElementById("payload").value,
        }});
        document.getElementById("result").textContent = await response.text();
      }}
    </script>
  </body>
</html>
"#
    ))
}

/// Run the fixture for this model's feature set through `/predict`
#[debug_handler]
pub async fn self_test(State(state): State<Arc<ApiState>>) -> Result<Json<Value>, ApiError> {
    let numeric_cols = state.model.feature_columns();
    let Some(data) = fixture_for(numeric_cols) else {
        return Ok(Json(json!({
            "numeric_cols": numeric_cols,
            "msg": "we don't have dummy data for this model",
        })));
    };

    let url = format!("{}/predict", state.config.self_url.trim_end_matches('/'));
    tracing::debug!("Posting fixture to {}", url);
    let response: Value = state
        .http
        .post(&url)
        .json(&data)
        .send()
        .await?
        .json()
        .await?;

    Ok(Json(json!({
        "numeric_cols": numeric_cols,
        "data": data,
        "response": response,
    })))
}

/// Classify a batch of records and log its drift
#[debug_handler]
pub async fn predict(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Vec<usize>>, ApiError> {
    let feature_columns = state.model.feature_columns();
    let payload = parse_json_body(&headers, &body)?;
    let records = validate_records(&payload, feature_columns)?;
    tracing::debug!("Predicting {} records", records.len());

    let frame = records_to_frame(&records, feature_columns)?;
    let labels = state.model.predict(ModelInput::LabeledRecords(&frame))?.to_vec();

    if let Some(monitor) = &state.monitor {
        let current = attach_predictions(&frame, feature_columns, &labels)?;
        monitor.log_batch(&current).await?;
    }

    Ok(Json(labels))
}
