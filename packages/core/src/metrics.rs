//! Prometheus metrics registry for the country GDP tracker.
//!
//! [`AppMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and pass it
//! to the refresher and the HTTP middleware.
//!
//! Exposed at `GET /metrics` in Prometheus text exposition format
//! (`text/plain; version=0.0.4`).

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// All application-level Prometheus metrics.
pub struct AppMetrics {
    /// Refresh attempts, successful or not.
    pub refreshes_total: Counter,
    /// Refreshes that returned an error.
    pub refresh_errors_total: Counter,
    /// Country rows after the last successful refresh.
    pub countries_stored: Gauge,
    /// HTTP request count, labelled by method, path, and status code.
    pub http_requests_total: CounterVec,
    /// HTTP request latency histogram in seconds.
    pub http_request_duration: Histogram,
    pub registry: Registry,
}

impl AppMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let refreshes_total = Counter::with_opts(Opts::new(
            "country_gdp_tracker_refreshes_total",
            "Total refresh attempts",
        ))?;

        let refresh_errors_total = Counter::with_opts(Opts::new(
            "country_gdp_tracker_refresh_errors_total",
            "Failed refresh attempts",
        ))?;

        let countries_stored = Gauge::with_opts(Opts::new(
            "country_gdp_tracker_countries_stored",
            "Country records in the store after the last refresh",
        ))?;

        let http_requests_total = CounterVec::new(
            Opts::new(
                "country_gdp_tracker_http_requests_total",
                "HTTP requests by method, path, and status",
            ),
            &["method", "path", "status"],
        )?;

        let http_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "country_gdp_tracker_http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 30.0]),
        )?;

        registry.register(Box::new(refreshes_total.clone()))?;
        registry.register(Box::new(refresh_errors_total.clone()))?;
        registry.register(Box::new(countries_stored.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;

        Ok(Self {
            refreshes_total,
            refresh_errors_total,
            countries_stored,
            http_requests_total,
            http_request_duration,
            registry,
        })
    }

    /// Render all metrics as Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}

/// `GET /metrics`
pub async fn metrics_handler(State(metrics): State<Arc<AppMetrics>>) -> Response {
    match metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response(),
        Err(err) => {
            tracing::error!("Failed to render metrics: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, Body::from("metrics error")).into_response()
        }
    }
}

/// Middleware recording request count and latency per matched route.
pub async fn track_http(
    State(metrics): State<Arc<AppMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    // Route templates keep label cardinality bounded.
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let started = Instant::now();
    let response = next.run(request).await;

    metrics
        .http_request_duration
        .observe(started.elapsed().as_secs_f64());
    metrics
        .http_requests_total
        .with_label_values(&[method.as_str(), path.as_str(), response.status().as_str()])
        .inc();

    response
}
