use chrono::NaiveDate;
use log::{error, info};

use crate::fetch::{CandleFetcher, CandleSource, PAGE_SPAN_SECS};
use crate::products::Product;
use crate::store::CandleStore;
use crate::sync::{format_ts, resolve_start, sync_product, SyncOutcome};

/// Per-product outcomes of one run, in processing order.
pub struct RunReport {
    pub outcomes: Vec<(String, SyncOutcome)>,
}

impl RunReport {
    pub fn all_done(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, outcome)| matches!(outcome, SyncOutcome::Done { .. }))
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, SyncOutcome::Failed))
            .count()
    }
}

/// Sync every selected product sequentially. The window end is fixed once for
/// the whole run (so a long catch-up does not chase a moving target) and
/// stops one page span short of `run_started`: the most recent candles are
/// still changing, and a row frozen by the duplicate-proof insert would never
/// be corrected. The next run picks them up once final.
pub async fn run<S: CandleSource>(
    store: &mut CandleStore,
    fetcher: &CandleFetcher<S>,
    products: &[&'static Product],
    start_override: Option<NaiveDate>,
    run_started: i64,
) -> RunReport {
    let window_end = run_started - PAGE_SPAN_SECS;

    let ids: Vec<&str> = products.iter().map(|p| p.id).collect();
    info!("Updating {:?}", ids);

    let total = products.len();
    let mut outcomes = Vec::with_capacity(total);

    for (i, product) in products.iter().enumerate() {
        let start = match resolve_start(store, product, start_override) {
            Ok(start) => start,
            Err(err) => {
                error!("{} | failed to resolve start: {}", product.id, err);
                outcomes.push((product.id.to_string(), SyncOutcome::Failed));
                continue;
            }
        };

        info!(
            "{}/{} | {} | starting from {}",
            i + 1,
            total,
            product.id,
            format_ts(start)
        );

        let outcome = sync_product(store, fetcher, product.id, start, window_end).await;
        if let SyncOutcome::Done { pages, inserted } = outcome {
            info!(
                "{} | caught up, {} page(s), {} new candle(s)",
                product.id, pages, inserted
            );
        }
        outcomes.push((product.id.to_string(), outcome));
    }

    RunReport { outcomes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::Candle;
    use crate::fetch::{SourceError, GRANULARITY_SECS};
    use crate::limiter::RateLimiter;
    use crate::products;
    use anyhow::anyhow;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    type PageResult = std::result::Result<Vec<Candle>, SourceError>;

    struct ScriptedSource {
        responses: Mutex<VecDeque<PageResult>>,
        requests: Mutex<Vec<(i64, i64)>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<PageResult>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<(i64, i64)> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl CandleSource for &ScriptedSource {
        async fn fetch(&self, _product: &str, start: i64, end: i64) -> PageResult {
            self.requests.lock().unwrap().push((start, end));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn page(market: &str, start: i64, count: usize) -> Vec<Candle> {
        (0..count)
            .map(|i| Candle {
                market: market.to_string(),
                time: start + i as i64 * GRANULARITY_SECS,
                open: 1.0,
                high: 2.0,
                low: 0.5,
                close: 1.5,
                volume: 3.0,
            })
            .collect()
    }

    #[tokio::test]
    async fn one_failing_product_does_not_abort_the_rest() {
        let mut store = CandleStore::open_in_memory().unwrap();
        // BTC-USD burns all three attempts, ETH-USD succeeds right after.
        let source = ScriptedSource::new(vec![
            Err(SourceError::Transient(anyhow!("timeout"))),
            Err(SourceError::Transient(anyhow!("timeout"))),
            Err(SourceError::Transient(anyhow!("timeout"))),
            Ok(page("ETH-USD", 1463529600, 4)),
        ]);
        let fetcher = CandleFetcher::new(&source, RateLimiter::new(Duration::ZERO));
        let selected = vec![
            products::find("BTC-USD").unwrap(),
            products::find("ETH-USD").unwrap(),
        ];

        let run_started = 1463529600 + 86_400;
        let report = run(&mut store, &fetcher, &selected, None, run_started).await;

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcomes[0].1, SyncOutcome::Failed);
        assert!(matches!(report.outcomes[1].1, SyncOutcome::Done { .. }));
        assert!(!report.all_done());
        assert_eq!(report.failed_count(), 1);
        assert_eq!(store.count("ETH-USD").unwrap(), 4);
        assert_eq!(store.count("BTC-USD").unwrap(), 0);
    }

    #[tokio::test]
    async fn all_products_done_reports_success() {
        let mut store = CandleStore::open_in_memory().unwrap();
        let source = ScriptedSource::new(vec![Ok(page("ETH-USD", 1463529600, 2))]);
        let fetcher = CandleFetcher::new(&source, RateLimiter::new(Duration::ZERO));
        let selected = vec![products::find("ETH-USD").unwrap()];

        let report = run(&mut store, &fetcher, &selected, None, 1463529600 + 86_400).await;

        assert!(report.all_done());
        assert_eq!(report.failed_count(), 0);
    }

    #[tokio::test]
    async fn requested_windows_stop_short_of_run_start() {
        let mut store = CandleStore::open_in_memory().unwrap();
        let source = ScriptedSource::new(vec![Ok(page("ETH-USD", 1463529600, 4))]);
        let fetcher = CandleFetcher::new(&source, RateLimiter::new(Duration::ZERO));
        let selected = vec![products::find("ETH-USD").unwrap()];

        let run_started = 1463529600 + 86_400;
        run(&mut store, &fetcher, &selected, None, run_started).await;

        // Candles from the final page span are still changing upstream and
        // must never be requested, let alone frozen into the table.
        let requests = source.requests();
        assert!(!requests.is_empty());
        assert!(requests
            .iter()
            .all(|(_, end)| *end <= run_started - PAGE_SPAN_SECS));
    }

    #[tokio::test]
    async fn run_starting_inside_the_excluded_tail_fetches_nothing() {
        let mut store = CandleStore::open_in_memory().unwrap();
        let source = ScriptedSource::new(vec![Ok(page("ETH-USD", 1463529600, 4))]);
        let fetcher = CandleFetcher::new(&source, RateLimiter::new(Duration::ZERO));
        let selected = vec![products::find("ETH-USD").unwrap()];

        // One page span after the first trading day: every candle in the
        // window is still subject to change.
        let report = run(
            &mut store,
            &fetcher,
            &selected,
            None,
            1463529600 + PAGE_SPAN_SECS,
        )
        .await;

        assert!(report.all_done());
        assert!(source.requests().is_empty());
        assert_eq!(store.count("ETH-USD").unwrap(), 0);
    }
}
