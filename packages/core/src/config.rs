use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://countries.db?mode=rwc";
pub const DEFAULT_COUNTRIES_API_URL: &str =
    "https://restcountries.com/v2/all?fields=name,capital,region,population,flag,currencies";
pub const DEFAULT_EXCHANGE_RATES_API_URL: &str = "https://open.er-api.com/v6/latest/USD";
pub const DEFAULT_SUMMARY_IMAGE_PATH: &str = "cache/summary.png";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub countries_api_url: String,
    pub exchange_rates_api_url: String,
    pub summary_image_path: PathBuf,
    pub validate_records: bool,
    pub refresh_interval_seconds: Option<u64>,
    pub upstream_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = match env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| format!("PORT must be a valid port number, got '{}'", raw))?,
            Err(_) => 5000,
        };

        let countries_api_url = env::var("COUNTRIES_API_URL")
            .unwrap_or_else(|_| DEFAULT_COUNTRIES_API_URL.to_string());
        let exchange_rates_api_url = env::var("EXCHANGE_RATES_API_URL")
            .unwrap_or_else(|_| DEFAULT_EXCHANGE_RATES_API_URL.to_string());
        let summary_image_path = env::var("SUMMARY_IMAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_SUMMARY_IMAGE_PATH));

        let validate_records = match env::var("VALIDATE_RECORDS") {
            Ok(raw) => parse_bool(&raw)
                .ok_or_else(|| format!("VALIDATE_RECORDS must be true or false, got '{}'", raw))?,
            Err(_) => false,
        };

        let refresh_interval_seconds = match env::var("REFRESH_INTERVAL_SECONDS") {
            Ok(raw) => Some(
                raw.parse::<u64>()
                    .map_err(|_| "REFRESH_INTERVAL_SECONDS must be a valid number")?,
            ),
            Err(_) => None,
        };

        let upstream_timeout_seconds = match env::var("UPSTREAM_TIMEOUT_SECONDS") {
            Ok(raw) => raw
                .parse::<u64>()
                .map_err(|_| "UPSTREAM_TIMEOUT_SECONDS must be a valid number")?,
            Err(_) => 30,
        };

        Ok(Self {
            database_url,
            host,
            port,
            countries_api_url,
            exchange_rates_api_url,
            summary_image_path,
            validate_records,
            refresh_interval_seconds: refresh_interval_seconds.filter(|secs| *secs > 0),
            upstream_timeout: Duration::from_secs(upstream_timeout_seconds),
        })
    }

    /// Command-line flags take precedence over the environment.
    pub fn apply_cli(mut self, cli: &Cli) -> Self {
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(url) = &cli.database_url {
            self.database_url = url.clone();
        }
        if let Some(path) = &cli.summary_image_path {
            self.summary_image_path = path.clone();
        }
        if let Some(secs) = cli.refresh_interval {
            self.refresh_interval_seconds = Some(secs).filter(|secs| *secs > 0);
        }
        if cli.validate_records {
            self.validate_records = true;
        }
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" | "" => Some(false),
        _ => None,
    }
}
