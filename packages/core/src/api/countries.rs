//! Country endpoints.
//!
//! Routes:
//! - `POST   /countries/refresh` re-fetch both upstreams and merge
//! - `GET    /countries`         list with `region`, `currency`, `sort`
//! - `GET    /countries/image`   cached summary chart (PNG)
//! - `GET    /country/:name`     single record, case-insensitive
//! - `DELETE /country/:name`     remove a record
//! - `GET    /status`            record count and last refresh time

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::query::{CountryListQuery, StatusReport};
use crate::repository::CountryRecord;

use super::headers::{compute_etag, if_none_match_matches, last_modified};
use super::AppState;

/// `POST /countries/refresh`
pub async fn refresh(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let outcome = state.refresher.refresh().await?;
    tracing::debug!(?outcome, "Refresh request served");
    Ok(Json(json!({ "Successful": "Done" })))
}

/// `GET /countries`
pub async fn list_countries(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CountryListQuery>,
) -> Result<Json<Vec<CountryRecord>>, AppError> {
    let rows = state.queries.list(&params).await?;
    Ok(Json(rows))
}

/// `GET /country/:name`
pub async fn get_country(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<CountryRecord>, AppError> {
    let record = state.queries.get_by_name(&name).await?;
    Ok(Json(record))
}

/// `DELETE /country/:name`
pub async fn delete_country(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    match state.queries.delete_by_name(&name).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "message": format!("Country '{}' deleted successfully", name) })),
        )
            .into_response(),
        Err(AppError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Country '{}' not found", name) })),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

/// `GET /status`
pub async fn status(State(state): State<Arc<AppState>>) -> Result<Json<StatusReport>, AppError> {
    Ok(Json(state.queries.status().await?))
}

/// `GET /countries/image`
pub async fn summary_image(
    State(state): State<Arc<AppState>>,
    request_headers: HeaderMap,
) -> Result<Response, AppError> {
    let path = state.summary.image_path();
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok((
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "Summary image not found" })),
            )
                .into_response());
        }
        Err(err) => {
            return Err(AppError::Summary(format!(
                "Failed to read {}: {}",
                path.display(),
                err
            )))
        }
    };

    let etag = compute_etag(&bytes);
    let modified = state
        .repository
        .last_refreshed_at()
        .await?
        .and_then(last_modified);

    let (status, body) = if if_none_match_matches(&request_headers, &etag) {
        (StatusCode::NOT_MODIFIED, Body::empty())
    } else {
        (StatusCode::OK, Body::from(bytes))
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(value) = HeaderValue::from_str(&etag) {
        headers.insert(header::ETAG, value);
    }
    if let Some(value) = modified {
        headers.insert(header::LAST_MODIFIED, value);
    }

    Ok(response)
}
