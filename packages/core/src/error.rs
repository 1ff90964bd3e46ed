use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Which external data source a refresh failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Countries,
    ExchangeRates,
}

impl Upstream {
    /// Human-readable API name used in 503 details.
    pub fn api_name(&self) -> &'static str {
        match self {
            Upstream::Countries => "Restcountries",
            Upstream::ExchangeRates => "Exchangerate",
        }
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

/// Per-field outcome of the optional required-field check.
/// `None` serialises as `null`, meaning the field passed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationDetails {
    pub name: Option<&'static str>,
    pub population: Option<&'static str>,
    pub currency_code: Option<&'static str>,
}

impl ValidationDetails {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.population.is_none() && self.currency_code.is_none()
    }
}

/// Unified application error.
///
/// This ensures all layers (config, upstream, storage, rendering)
/// fail in a predictable and debuggable way, and map onto one HTTP shape.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("{upstream} API unavailable: {details}")]
    UpstreamUnavailable { upstream: Upstream, details: String },

    #[error("Country '{0}' not found")]
    NotFound(String),

    #[error("Validation failed: {0:?}")]
    Validation(ValidationDetails),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Summary error: {0}")]
    Summary(String),
}

impl AppError {
    pub fn upstream(upstream: Upstream, details: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            upstream,
            details: details.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            AppError::UpstreamUnavailable { upstream, details } => {
                tracing::warn!(%upstream, "Upstream unavailable: {}", details);
                json!({
                    "error": "External data source unavailable",
                    "details": format!("Could not fetch data from {} API", upstream),
                })
            }
            AppError::NotFound(_) => json!({ "error": "Country not found" }),
            AppError::Validation(details) => json!({
                "error": "Validation failed",
                "details": details,
            }),
            other => {
                tracing::error!("Request failed: {}", other);
                json!({ "error": "Internal server error" })
            }
        };

        (status, Json(body)).into_response()
    }
}
