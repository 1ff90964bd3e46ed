//! HTTP surface: route table and shared state.

pub mod countries;
pub mod headers;
pub mod health;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::metrics::{metrics_handler, track_http, AppMetrics};
use crate::query::QueryService;
use crate::refresh::Refresher;
use crate::repository::CountryRepository;
use crate::summary::SummaryGenerator;

/// Everything the handlers need, shared behind one `Arc`.
pub struct AppState {
    pub repository: Arc<CountryRepository>,
    pub queries: QueryService,
    pub refresher: Arc<Refresher>,
    pub summary: Arc<SummaryGenerator>,
    pub metrics: Arc<AppMetrics>,
}

impl AppState {
    pub fn new(
        repository: Arc<CountryRepository>,
        refresher: Arc<Refresher>,
        summary: Arc<SummaryGenerator>,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            queries: QueryService::new(repository.clone()),
            repository,
            refresher,
            summary,
            metrics,
        }
    }
}

/// Build the complete application router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let metrics = state.metrics.clone();

    let api = Router::new()
        .route("/countries/refresh", post(countries::refresh))
        .route("/countries", get(countries::list_countries))
        .route("/countries/image", get(countries::summary_image))
        .route(
            "/country/:name",
            get(countries::get_country).delete(countries::delete_country),
        )
        .route("/status", get(countries::status))
        .route("/health", get(health::health))
        .with_state(state);

    let metrics_router = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics.clone());

    api.merge(metrics_router)
        .layer(middleware::from_fn_with_state(metrics, track_http))
        .layer(CorsLayer::permissive())
}
