//! Refresh pipeline: fetch both upstreams, normalize, upsert, re-render.
//!
//! Normalization is a pure step over the fetched payloads so that the
//! random GDP multiplier is drawn before any await point; persistence is a
//! single transaction in [`CountryRepository::upsert_batch`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;

use crate::error::{AppError, ValidationDetails};
use crate::metrics::AppMetrics;
use crate::repository::{CountryDraft, CountryRepository};
use crate::services::upstream::{CountryDataGateway, RateTable, RawCountry};
use crate::summary::SummaryGenerator;

/// Placeholder stored when the directory omits a text field.
pub const UNKNOWN: &str = "Unknown";

/// Inclusive bounds of the random GDP multiplier.
pub const GDP_MULTIPLIER_MIN: i64 = 1000;
pub const GDP_MULTIPLIER_MAX: i64 = 2000;

/// Exchange rate and estimated GDP for one country.
///
/// No currency at all gives a GDP of 0; a currency missing from the rate
/// table gives no rate and no GDP.
pub fn derive_economics<R: Rng>(
    population: i64,
    currency_code: Option<&str>,
    rates: &RateTable,
    rng: &mut R,
) -> (Option<f64>, Option<f64>) {
    let Some(code) = currency_code else {
        return (None, Some(0.0));
    };

    match rates.get(code) {
        Some(&rate) => {
            let multiplier = rng.gen_range(GDP_MULTIPLIER_MIN..=GDP_MULTIPLIER_MAX);
            (Some(rate), Some(population as f64 * multiplier as f64 / rate))
        }
        None => (None, None),
    }
}

fn text_or_unknown(value: Option<&String>) -> String {
    value
        .map(String::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

/// Turn one directory entry into a draft, or `None` when it lists no currencies.
pub fn normalize_country<R: Rng>(
    raw: &RawCountry,
    rates: &RateTable,
    rng: &mut R,
) -> Option<CountryDraft> {
    let first_currency = raw.currencies.as_ref()?.first()?;

    let population = raw.population.unwrap_or(0).max(0);
    let currency_code = first_currency
        .code
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string);
    let (exchange_rate, estimated_gdp) =
        derive_economics(population, currency_code.as_deref(), rates, rng);

    Some(CountryDraft {
        name: text_or_unknown(raw.name.as_ref()),
        capital: text_or_unknown(raw.capital.as_ref()),
        region: text_or_unknown(raw.region.as_ref()),
        population,
        currency_code,
        exchange_rate,
        estimated_gdp,
        flag_url: text_or_unknown(raw.flag.as_ref()),
    })
}

/// Normalize a whole directory payload. Entries without currencies are dropped.
pub fn normalize_all<R: Rng>(
    raw: &[RawCountry],
    rates: &RateTable,
    rng: &mut R,
) -> Vec<CountryDraft> {
    raw.iter()
        .filter_map(|entry| normalize_country(entry, rates, rng))
        .collect()
}

/// Required-field check for a single draft. Empty details means it passed.
pub fn validate_draft(draft: &CountryDraft) -> ValidationDetails {
    ValidationDetails {
        name: (draft.name.is_empty() || draft.name == UNKNOWN).then_some("is required"),
        population: (draft.population == 0).then_some("is required"),
        currency_code: draft.currency_code.is_none().then_some("is required"),
    }
}

/// What one committed refresh did.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub refreshed_at: DateTime<Utc>,
    pub summary_generated: bool,
}

/// Runs refreshes one at a time.
pub struct Refresher {
    gateway: Arc<dyn CountryDataGateway + Send + Sync>,
    repository: Arc<CountryRepository>,
    summary: Arc<SummaryGenerator>,
    metrics: Option<Arc<AppMetrics>>,
    validate_records: bool,
    lock: Mutex<()>,
}

impl Refresher {
    pub fn new(
        gateway: Arc<dyn CountryDataGateway + Send + Sync>,
        repository: Arc<CountryRepository>,
        summary: Arc<SummaryGenerator>,
    ) -> Self {
        Self {
            gateway,
            repository,
            summary,
            metrics: None,
            validate_records: false,
            lock: Mutex::new(()),
        }
    }

    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validate_records = enabled;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<AppMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Fetch, merge and commit, then regenerate the summary image.
    ///
    /// Either upstream failing aborts before the store is touched. A
    /// summary failure after the commit is logged and reported in the
    /// outcome but does not fail the refresh.
    pub async fn refresh(&self) -> Result<RefreshOutcome, AppError> {
        let _guard = self.lock.lock().await;

        if let Some(metrics) = &self.metrics {
            metrics.refreshes_total.inc();
        }

        let result = self.refresh_locked().await;

        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(_) => {
                    if let Ok(total) = self.repository.count_countries().await {
                        metrics.countries_stored.set(total as f64);
                    }
                }
                Err(_) => metrics.refresh_errors_total.inc(),
            }
        }

        result
    }

    async fn refresh_locked(&self) -> Result<RefreshOutcome, AppError> {
        tracing::info!("Refresh started");

        let countries = self.gateway.fetch_countries().await?;
        let rates = self.gateway.fetch_exchange_rates().await?;
        tracing::info!(
            countries = countries.len(),
            rates = rates.len(),
            "Upstream data fetched"
        );

        let drafts = {
            let mut rng = StdRng::from_entropy();
            normalize_all(&countries, &rates, &mut rng)
        };
        let skipped = countries.len() - drafts.len();

        if self.validate_records {
            if let Some(details) = drafts
                .iter()
                .map(validate_draft)
                .find(|details| !details.is_empty())
            {
                tracing::warn!(?details, "Refresh rejected by validation");
                return Err(AppError::Validation(details));
            }
        }

        let refreshed_at = Utc::now();
        let counts = self.repository.upsert_batch(&drafts, refreshed_at).await?;
        tracing::info!(
            inserted = counts.inserted,
            updated = counts.updated,
            skipped,
            "Refresh committed"
        );

        let summary_generated = match self.summary.generate().await {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!("Summary image generation failed: {}", err);
                false
            }
        };

        Ok(RefreshOutcome {
            inserted: counts.inserted,
            updated: counts.updated,
            skipped,
            refreshed_at,
            summary_generated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;

    use async_trait::async_trait;
    use proptest::prelude::*;

    use crate::db::create_pool;
    use crate::error::Upstream;
    use crate::services::upstream::RawCurrency;
    use crate::summary::{ChartRenderer, PlottersRenderer, SummaryChart};

    fn raw(name: &str, population: i64, codes: Option<Vec<Option<&str>>>) -> RawCountry {
        RawCountry {
            name: Some(name.to_string()),
            capital: Some(format!("{} City", name)),
            region: Some("Testland".to_string()),
            population: Some(population),
            flag: Some(format!("https://flags.example.com/{}.svg", name)),
            currencies: codes.map(|codes| {
                codes
                    .into_iter()
                    .map(|code| RawCurrency {
                        code: code.map(str::to_string),
                        ..Default::default()
                    })
                    .collect()
            }),
        }
    }

    fn rates(pairs: &[(&str, f64)]) -> RateTable {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn seeded() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn currency_missing_from_rates_yields_null_rate_and_gdp() {
        let draft =
            normalize_country(&raw("Wakanda", 1000, Some(vec![Some("ABC")])), &HashMap::new(), &mut seeded())
                .unwrap();

        assert_eq!(draft.currency_code.as_deref(), Some("ABC"));
        assert_eq!(draft.exchange_rate, None);
        assert_eq!(draft.estimated_gdp, None);
    }

    #[test]
    fn null_currency_code_yields_zero_gdp() {
        let draft =
            normalize_country(&raw("Nocode", 1000, Some(vec![None])), &rates(&[("USD", 1.0)]), &mut seeded())
                .unwrap();

        assert_eq!(draft.currency_code, None);
        assert_eq!(draft.exchange_rate, None);
        assert_eq!(draft.estimated_gdp, Some(0.0));
    }

    #[test]
    fn known_currency_uses_first_listed_code() {
        let draft = normalize_country(
            &raw("Panama", 4_000_000, Some(vec![Some("PAB"), Some("USD")])),
            &rates(&[("PAB", 1.0), ("USD", 1.0)]),
            &mut seeded(),
        )
        .unwrap();

        assert_eq!(draft.currency_code.as_deref(), Some("PAB"));
        assert_eq!(draft.exchange_rate, Some(1.0));
        let gdp = draft.estimated_gdp.unwrap();
        assert!((4_000_000.0 * 1000.0..=4_000_000.0 * 2000.0).contains(&gdp));
    }

    #[test]
    fn entries_without_currencies_are_skipped() {
        let payload = vec![
            raw("Antarctica", 1000, None),
            raw("Empty", 1000, Some(vec![])),
            raw("Kept", 1000, Some(vec![Some("EUR")])),
        ];
        let drafts = normalize_all(&payload, &rates(&[("EUR", 0.9)]), &mut seeded());

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].name, "Kept");
    }

    #[test]
    fn missing_text_fields_fall_back_to_unknown() {
        let entry = RawCountry {
            currencies: Some(vec![RawCurrency {
                code: Some("XOF".into()),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let draft = normalize_country(&entry, &HashMap::new(), &mut seeded()).unwrap();

        assert_eq!(draft.name, UNKNOWN);
        assert_eq!(draft.capital, UNKNOWN);
        assert_eq!(draft.region, UNKNOWN);
        assert_eq!(draft.flag_url, UNKNOWN);
        assert_eq!(draft.population, 0);
    }

    #[test]
    fn validate_draft_flags_each_missing_field() {
        let entry = RawCountry {
            currencies: Some(vec![RawCurrency::default()]),
            ..Default::default()
        };
        let draft = normalize_country(&entry, &HashMap::new(), &mut seeded()).unwrap();
        let details = validate_draft(&draft);

        assert_eq!(details.name, Some("is required"));
        assert_eq!(details.population, Some("is required"));
        assert_eq!(details.currency_code, Some("is required"));

        let good = normalize_country(
            &raw("Fine", 10, Some(vec![Some("EUR")])),
            &HashMap::new(),
            &mut seeded(),
        )
        .unwrap();
        assert!(validate_draft(&good).is_empty());
    }

    proptest! {
        #[test]
        fn gdp_stays_within_multiplier_bounds(
            population in 0i64..2_000_000_000,
            rate in 0.001f64..10_000.0,
            seed in any::<u64>(),
        ) {
            let table = rates(&[("XYZ", rate)]);
            let mut rng = StdRng::seed_from_u64(seed);
            let (got_rate, gdp) = derive_economics(population, Some("XYZ"), &table, &mut rng);

            prop_assert_eq!(got_rate, Some(rate));
            let gdp = gdp.unwrap();
            let low = population as f64 * 1000.0 / rate;
            let high = population as f64 * 2000.0 / rate;
            prop_assert!(gdp >= low * (1.0 - 1e-12) && gdp <= high * (1.0 + 1e-12));
        }

        #[test]
        fn currencyless_entries_never_produce_drafts(
            names in proptest::collection::vec("[A-Za-z]{1,12}", 0..20),
        ) {
            let payload: Vec<RawCountry> = names.iter().map(|n| raw(n, 10, None)).collect();
            let drafts = normalize_all(&payload, &HashMap::new(), &mut seeded());
            prop_assert!(drafts.is_empty());
        }
    }

    // ---- Refresher ----

    struct StubGateway {
        countries: Result<Vec<RawCountry>, Upstream>,
        rates: Result<RateTable, Upstream>,
    }

    impl StubGateway {
        fn ok(countries: Vec<RawCountry>, rates: RateTable) -> Self {
            Self {
                countries: Ok(countries),
                rates: Ok(rates),
            }
        }
    }

    #[async_trait]
    impl CountryDataGateway for StubGateway {
        async fn fetch_countries(&self) -> Result<Vec<RawCountry>, AppError> {
            self.countries
                .clone()
                .map_err(|upstream| AppError::upstream(upstream, "stubbed failure"))
        }

        async fn fetch_exchange_rates(&self) -> Result<RateTable, AppError> {
            self.rates
                .clone()
                .map_err(|upstream| AppError::upstream(upstream, "stubbed failure"))
        }
    }

    struct BlankRenderer;

    impl ChartRenderer for BlankRenderer {
        fn render(&self, _chart: &SummaryChart, path: &Path) -> Result<(), AppError> {
            std::fs::write(path, b"").map_err(|e| AppError::Summary(e.to_string()))
        }
    }

    struct FailingRenderer;

    impl ChartRenderer for FailingRenderer {
        fn render(&self, _chart: &SummaryChart, _path: &Path) -> Result<(), AppError> {
            Err(AppError::Summary("boom".into()))
        }
    }

    async fn make_refresher(
        gateway: StubGateway,
        renderer: Arc<dyn ChartRenderer>,
    ) -> (Refresher, Arc<CountryRepository>, tempfile::TempDir) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let repository = Arc::new(CountryRepository::new(pool));
        let dir = tempfile::tempdir().unwrap();
        let summary = Arc::new(SummaryGenerator::new(
            repository.clone(),
            renderer,
            dir.path().join("summary.png"),
        ));
        let refresher = Refresher::new(Arc::new(gateway), repository.clone(), summary);
        (refresher, repository, dir)
    }

    #[tokio::test]
    async fn refresh_stores_wakanda_with_null_rate_and_gdp() {
        let gateway = StubGateway::ok(vec![raw("Wakanda", 1000, Some(vec![Some("ABC")]))], HashMap::new());
        let (refresher, repo, _dir) = make_refresher(gateway, Arc::new(BlankRenderer)).await;

        let outcome = refresher.refresh().await.unwrap();
        assert_eq!(outcome.inserted, 1);
        assert!(outcome.summary_generated);

        let stored = repo.find_by_name("wakanda").await.unwrap().unwrap();
        assert_eq!(stored.currency_code.as_deref(), Some("ABC"));
        assert_eq!(stored.exchange_rate, None);
        assert_eq!(stored.estimated_gdp, None);
    }

    #[tokio::test]
    async fn refreshing_twice_is_idempotent_apart_from_gdp_and_timestamp() {
        let payload = vec![
            raw("France", 67_000_000, Some(vec![Some("EUR")])),
            raw("Japan", 125_000_000, Some(vec![Some("JPY")])),
            raw("Antarctica", 0, None),
        ];
        let gateway = StubGateway::ok(payload, rates(&[("EUR", 0.92), ("JPY", 150.0)]));
        let (refresher, repo, _dir) = make_refresher(gateway, Arc::new(BlankRenderer)).await;

        let first = refresher.refresh().await.unwrap();
        let before = repo.find_by_name("France").await.unwrap().unwrap();
        let second = refresher.refresh().await.unwrap();
        let after = repo.find_by_name("France").await.unwrap().unwrap();

        assert_eq!(first.inserted, 2);
        assert_eq!(first.skipped, 1);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 2);
        assert!(second.refreshed_at >= first.refreshed_at);
        assert_eq!(repo.count_countries().await.unwrap(), 2);
        assert_eq!(before.id, after.id);
        assert_eq!(before.population, after.population);
        assert_eq!(before.exchange_rate, after.exchange_rate);
        assert!(repo.find_by_name("Antarctica").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upstream_failure_leaves_store_untouched() {
        let gateway = StubGateway {
            countries: Ok(vec![raw("France", 1, Some(vec![Some("EUR")]))]),
            rates: Err(Upstream::ExchangeRates),
        };
        let (refresher, repo, _dir) = make_refresher(gateway, Arc::new(BlankRenderer)).await;

        let err = refresher.refresh().await.unwrap_err();

        assert!(matches!(
            err,
            AppError::UpstreamUnavailable {
                upstream: Upstream::ExchangeRates,
                ..
            }
        ));
        assert_eq!(repo.count_countries().await.unwrap(), 0);
        assert!(repo.last_refreshed_at().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refresh_with_plotters_renderer_generates_the_summary() {
        let gateway = StubGateway::ok(
            vec![
                raw("China", 1_400_000_000, Some(vec![Some("CNY")])),
                raw("Åland Islands", 30_000, Some(vec![Some("EUR")])),
            ],
            rates(&[("CNY", 7.2), ("EUR", 0.92)]),
        );
        let (refresher, _repo, dir) =
            make_refresher(gateway, Arc::new(PlottersRenderer::default())).await;

        let outcome = refresher.refresh().await.unwrap();

        assert!(outcome.summary_generated);
        let bytes = std::fs::read(dir.path().join("summary.png")).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[tokio::test]
    async fn summary_failure_does_not_roll_back_the_commit() {
        let gateway = StubGateway::ok(vec![raw("Chile", 19_000_000, Some(vec![Some("CLP")]))], rates(&[("CLP", 900.0)]));
        let (refresher, repo, _dir) = make_refresher(gateway, Arc::new(FailingRenderer)).await;

        let outcome = refresher.refresh().await.unwrap();

        assert!(!outcome.summary_generated);
        assert_eq!(repo.count_countries().await.unwrap(), 1);
        assert!(repo.last_refreshed_at().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn validation_rejects_incomplete_batches_before_writing() {
        let gateway = StubGateway::ok(
            vec![
                raw("Good", 10, Some(vec![Some("EUR")])),
                raw("Empty", 0, Some(vec![Some("EUR")])),
            ],
            rates(&[("EUR", 1.0)]),
        );
        let (refresher, repo, _dir) = make_refresher(gateway, Arc::new(BlankRenderer)).await;
        let refresher = refresher.with_validation(true);

        let err = refresher.refresh().await.unwrap_err();

        match err {
            AppError::Validation(details) => {
                assert_eq!(details.population, Some("is required"));
                assert_eq!(details.name, None);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(repo.count_countries().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_refreshes_do_not_duplicate_rows() {
        let payload: Vec<_> = (0..25)
            .map(|i| raw(&format!("Country{}", i), 1000 + i, Some(vec![Some("EUR")])))
            .collect();
        let gateway = StubGateway::ok(payload, rates(&[("EUR", 1.0)]));
        let (refresher, repo, _dir) = make_refresher(gateway, Arc::new(BlankRenderer)).await;
        let refresher = Arc::new(refresher);

        let a = tokio::spawn({
            let r = refresher.clone();
            async move { r.refresh().await.map(|_| ()) }
        });
        let b = tokio::spawn({
            let r = refresher.clone();
            async move { r.refresh().await.map(|_| ()) }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(repo.count_countries().await.unwrap(), 25);
    }
}
