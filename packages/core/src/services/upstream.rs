//! External data gateway: the country directory and the USD exchange-rate table.
//!
//! Neither call is retried. Any transport error, non-2xx status, or
//! undecodable body surfaces as [`AppError::UpstreamUnavailable`] naming the
//! source, and the refresh stops before touching the store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{AppError, Upstream};

/// Country currency → units per 1 USD.
pub type RateTable = HashMap<String, f64>;

/// One entry from the country directory, exactly as the upstream sends it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawCountry {
    pub name: Option<String>,
    pub capital: Option<String>,
    pub region: Option<String>,
    pub population: Option<i64>,
    pub flag: Option<String>,
    #[serde(default)]
    pub currencies: Option<Vec<RawCurrency>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawCurrency {
    pub code: Option<String>,
    pub name: Option<String>,
    pub symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExchangeRatesResponse {
    rates: RateTable,
}

/// Source of the two upstream payloads a refresh merges.
#[async_trait]
pub trait CountryDataGateway {
    async fn fetch_countries(&self) -> Result<Vec<RawCountry>, AppError>;

    async fn fetch_exchange_rates(&self) -> Result<RateTable, AppError>;
}

#[derive(Clone)]
pub struct HttpGateway {
    countries_url: String,
    exchange_rates_url: String,
    http: Client,
}

impl HttpGateway {
    pub fn new(
        countries_url: String,
        exchange_rates_url: String,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Config(format!("Failed to build HTTP client: {}", err)))?;

        Ok(Self {
            countries_url,
            exchange_rates_url,
            http,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        upstream: Upstream,
    ) -> Result<T, AppError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| AppError::upstream(upstream, err.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::upstream(
                upstream,
                format!("{} API returned HTTP {}", upstream, response.status()),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| AppError::upstream(upstream, format!("Malformed body: {}", err)))
    }
}

#[async_trait]
impl CountryDataGateway for HttpGateway {
    async fn fetch_countries(&self) -> Result<Vec<RawCountry>, AppError> {
        let countries: Vec<RawCountry> =
            self.get_json(&self.countries_url, Upstream::Countries).await?;
        tracing::debug!(count = countries.len(), "Fetched country directory");
        Ok(countries)
    }

    async fn fetch_exchange_rates(&self) -> Result<RateTable, AppError> {
        let body: ExchangeRatesResponse = self
            .get_json(&self.exchange_rates_url, Upstream::ExchangeRates)
            .await?;
        tracing::debug!(count = body.rates.len(), "Fetched exchange rates");
        Ok(body.rates)
    }
}
