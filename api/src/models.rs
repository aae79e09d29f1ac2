//! API Models Module
//!
//! Request validation, error bodies and server configuration.

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use polars::prelude::{DataFrame, NamedFrom, Series};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;

use smokedet_core::model::column_list_repr;
use smokedet_core::Settings;

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Base URL `/test` posts its fixture to
    pub self_url: String,
    pub request_timeout: Duration,
    pub drift_logging_enabled: bool,
}

impl ApiConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            self_url: settings.self_url(),
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            drift_logging_enabled: settings.drift_logging_enabled,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Why a `/predict` body was rejected
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    #[error("pass json only")]
    NotJson,
    #[error("pass list of features")]
    NotAList,
    #[error("include at least one example")]
    Empty,
    /// Carries the rendered list of expected feature names
    #[error("pass all the features including {0}")]
    MissingFeatures(String),
}

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        error_body(StatusCode::BAD_REQUEST, self.to_string())
    }
}

/// Handler failure: validation (400) or anything past it (500)
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Core(#[from] smokedet_core::Error),
    #[error("self-test request failed: {0}")]
    SelfTest(#[from] reqwest::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Request(e) => e.into_response(),
            other => {
                tracing::error!("Request failed: {}", other);
                error_body(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

fn is_json_content_type(headers: &HeaderMap) -> bool {
    let Some(value) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let mime = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
}

/// Decode a request body that must be JSON
pub fn parse_json_body(headers: &HeaderMap, body: &[u8]) -> Result<Value, RequestError> {
    if !is_json_content_type(headers) {
        return Err(RequestError::NotJson);
    }
    serde_json::from_slice(body).map_err(|_| RequestError::NotJson)
}

/// Check the body is a non-empty list of objects carrying every feature as a
/// JSON number. Booleans are not numbers; extra keys are allowed.
pub fn validate_records<'a>(
    value: &'a Value,
    feature_columns: &[String],
) -> Result<Vec<&'a Map<String, Value>>, RequestError> {
    let items = value.as_array().ok_or(RequestError::NotAList)?;
    if items.is_empty() {
        return Err(RequestError::Empty);
    }

    let missing = || RequestError::MissingFeatures(column_list_repr(feature_columns));
    items
        .iter()
        .map(|item| {
            let record = item.as_object().ok_or_else(missing)?;
            let complete = feature_columns
                .iter()
                .all(|c| matches!(record.get(c), Some(Value::Number(_))));
            if complete {
                Ok(record)
            } else {
                Err(missing())
            }
        })
        .collect()
}

/// Frame of the feature columns, one row per record, in input order
pub fn records_to_frame(
    records: &[&Map<String, Value>],
    feature_columns: &[String],
) -> Result<DataFrame, smokedet_core::Error> {
    let columns = feature_columns
        .iter()
        .map(|name| {
            let values: Vec<f64> = records
                .iter()
                .map(|r| r.get(name).and_then(Value::as_f64).unwrap_or(f64::NAN))
                .collect();
            Series::new(name.as_str(), values)
        })
        .collect::<Vec<_>>();
    Ok(DataFrame::new(columns)?)
}
