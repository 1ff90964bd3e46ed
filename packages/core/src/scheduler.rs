//! Optional background refresh loop.
//!
//! When `REFRESH_INTERVAL_SECONDS` is set, the same refresh that backs
//! `POST /countries/refresh` also runs on a timer. The refresher's own lock
//! keeps a timed run and a manual one from interleaving.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};

use crate::refresh::Refresher;

/// Run `refresher` every `period` until `shutdown` resolves.
///
/// The first run happens one full period after start. Failed refreshes
/// are logged and the loop continues.
pub async fn run_periodic_refresh<F>(refresher: Arc<Refresher>, period: Duration, shutdown: F)
where
    F: Future<Output = ()>,
{
    let mut interval = time::interval_at(time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!("Background refresh started (interval: {}s)", period.as_secs());

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                refresh_once(&refresher).await;
            }

            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received. Stopping background refresh.");
                break;
            }
        }
    }

    tracing::info!("Background refresh stopped cleanly");
}

async fn refresh_once(refresher: &Refresher) {
    match refresher.refresh().await {
        Ok(outcome) => tracing::info!(
            inserted = outcome.inserted,
            updated = outcome.updated,
            skipped = outcome.skipped,
            "Scheduled refresh complete"
        ),
        Err(err) => tracing::error!("Scheduled refresh failed, will retry next tick: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::oneshot;

    use crate::db::create_pool;
    use crate::error::{AppError, Upstream};
    use crate::repository::CountryRepository;
    use crate::services::upstream::{CountryDataGateway, RateTable, RawCountry, RawCurrency};
    use crate::summary::{ChartRenderer, SummaryChart, SummaryGenerator};

    struct CountingGateway {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl CountryDataGateway for CountingGateway {
        async fn fetch_countries(&self) -> Result<Vec<RawCountry>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AppError::upstream(Upstream::Countries, "down"));
            }
            Ok(vec![RawCountry {
                name: Some("Fiji".into()),
                population: Some(900_000),
                currencies: Some(vec![RawCurrency {
                    code: Some("FJD".into()),
                    ..Default::default()
                }]),
                ..Default::default()
            }])
        }

        async fn fetch_exchange_rates(&self) -> Result<RateTable, AppError> {
            Ok(HashMap::from([("FJD".to_string(), 2.2)]))
        }
    }

    struct BlankRenderer;

    impl ChartRenderer for BlankRenderer {
        fn render(&self, _chart: &SummaryChart, path: &Path) -> Result<(), AppError> {
            std::fs::write(path, b"").map_err(|e| AppError::Summary(e.to_string()))
        }
    }

    async fn make_refresher(fail: bool) -> (Arc<Refresher>, Arc<AtomicUsize>, Arc<CountryRepository>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let repository = Arc::new(CountryRepository::new(
            create_pool("sqlite::memory:").await.unwrap(),
        ));
        let summary = Arc::new(SummaryGenerator::new(
            repository.clone(),
            Arc::new(BlankRenderer),
            std::env::temp_dir().join("scheduler-test-summary.png"),
        ));
        let gateway = Arc::new(CountingGateway {
            calls: calls.clone(),
            fail,
        });
        let refresher = Arc::new(Refresher::new(gateway, repository.clone(), summary));
        (refresher, calls, repository)
    }

    #[tokio::test]
    async fn runs_on_each_tick_until_shutdown() {
        let (refresher, calls, repository) = make_refresher(false).await;
        let (tx, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(run_periodic_refresh(
            refresher,
            Duration::from_millis(50),
            async {
                let _ = rx.await;
            },
        ));

        time::sleep(Duration::from_millis(400)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(repository.count_countries().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn keeps_running_after_a_failed_refresh() {
        let (refresher, calls, repository) = make_refresher(true).await;
        let (tx, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(run_periodic_refresh(
            refresher,
            Duration::from_millis(30),
            async {
                let _ = rx.await;
            },
        ));

        time::sleep(Duration::from_millis(300)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(repository.count_countries().await.unwrap(), 0);
    }
}
