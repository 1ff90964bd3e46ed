use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;

use country_gdp_tracker::api::{create_router, AppState};
use country_gdp_tracker::cli::Cli;
use country_gdp_tracker::config::Config;
use country_gdp_tracker::db::create_pool;
use country_gdp_tracker::error::AppError;
use country_gdp_tracker::logging::{init_logging, LogFormat};
use country_gdp_tracker::metrics::AppMetrics;
use country_gdp_tracker::refresh::Refresher;
use country_gdp_tracker::repository::CountryRepository;
use country_gdp_tracker::scheduler::run_periodic_refresh;
use country_gdp_tracker::services::upstream::HttpGateway;
use country_gdp_tracker::summary::{PlottersRenderer, SummaryGenerator};

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging(LogFormat::from_env());

    if let Err(err) = run().await {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = Config::from_env().map_err(AppError::Config)?.apply_cli(&cli);
    tracing::info!("Service starting with config: {:?}", config);

    let pool = create_pool(&config.database_url).await?;
    let repository = Arc::new(CountryRepository::new(pool));
    let metrics = Arc::new(
        AppMetrics::new().map_err(|err| AppError::Config(format!("Metrics setup failed: {}", err)))?,
    );

    let gateway = Arc::new(HttpGateway::new(
        config.countries_api_url.clone(),
        config.exchange_rates_api_url.clone(),
        config.upstream_timeout,
    )?);
    let summary = Arc::new(SummaryGenerator::new(
        repository.clone(),
        Arc::new(PlottersRenderer::default()),
        config.summary_image_path.clone(),
    ));
    let refresher = Arc::new(
        Refresher::new(gateway, repository.clone(), summary.clone())
            .with_validation(config.validate_records)
            .with_metrics(metrics.clone()),
    );

    if let Ok(total) = repository.count_countries().await {
        metrics.countries_stored.set(total as f64);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = config.refresh_interval_seconds.map(|secs| {
        let mut rx = shutdown_rx.clone();
        tokio::spawn(run_periodic_refresh(
            refresher.clone(),
            Duration::from_secs(secs),
            async move {
                let _ = rx.changed().await;
            },
        ))
    });

    let state = Arc::new(AppState::new(repository, refresher, summary, metrics));
    let app = create_router(state);

    let address = config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|err| AppError::Config(format!("Failed to bind {}: {}", address, err)))?;
    tracing::info!("Listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await
        .map_err(|err| AppError::Network(err.to_string()))?;

    if let Some(handle) = scheduler {
        let _ = handle.await;
    }

    tracing::info!("Service stopped cleanly");
    Ok(())
}
