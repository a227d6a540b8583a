use chrono::{DateTime, NaiveDate, NaiveTime};
use log::{debug, error, info, warn};

use crate::error::Result;
use crate::fetch::{CandleFetcher, CandleSource, GRANULARITY_SECS, PAGE_SPAN_SECS};
use crate::products::Product;
use crate::store::CandleStore;

/// Final state of one product's catch-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Caught up to the window end that was fixed at run start.
    Done { pages: usize, inserted: usize },
    /// Fetching or persisting stopped the sync; everything committed so far
    /// stays, the next run resumes from the watermark.
    Failed,
}

pub fn date_to_unix(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

pub fn format_ts(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn day_of(ts: i64) -> NaiveDate {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}

/// Resolve where a product's fetch window starts.
///
/// Without an override this is the stored watermark plus one candle interval
/// (resume exactly after the last committed row), or the product's first
/// trading day for an empty database. An explicit `--start-date` wins over the
/// watermark — rewinding is a deliberate request and is safe because writes
/// are duplicate-proof — but is clamped to the first trading day, below which
/// the exchange has nothing to return.
pub fn resolve_start(
    store: &CandleStore,
    product: &Product,
    override_date: Option<NaiveDate>,
) -> Result<i64> {
    let first_traded = product.first_traded()?;

    if let Some(date) = override_date {
        if date < first_traded {
            warn!(
                "{} | start date {} predates first trading day {}, clamping",
                product.id, date, first_traded
            );
            return Ok(date_to_unix(first_traded));
        }
        return Ok(date_to_unix(date));
    }

    match store.latest_time(product.id)? {
        Some(watermark) => {
            info!("{} | resuming from {}", product.id, format_ts(watermark));
            Ok(watermark + GRANULARITY_SECS)
        }
        None => {
            info!(
                "{} | no previous data found, importing full history",
                product.id
            );
            Ok(date_to_unix(first_traded))
        }
    }
}

/// Catch one product up from `start` to `end`.
///
/// Pages are fetched strictly sequentially and each successful page is
/// persisted before the next request, so an interruption loses at most one
/// unpersisted page. The window end is fixed by the caller; the loop ends when
/// a page comes back empty or its last candle reaches the end.
pub async fn sync_product<S: CandleSource>(
    store: &mut CandleStore,
    fetcher: &CandleFetcher<S>,
    product: &str,
    start: i64,
    end: i64,
) -> SyncOutcome {
    let mut cursor = start;
    let mut pages = 0;
    let mut inserted = 0;
    let mut current_day = day_of(start);

    if end <= cursor {
        debug!(
            "{} | start {} is not before end {}",
            product,
            format_ts(cursor),
            format_ts(end)
        );
        return SyncOutcome::Done { pages, inserted };
    }

    while cursor < end {
        let window_end = (cursor + PAGE_SPAN_SECS).min(end);

        // Logging should only show day-by-day progress.
        let day = day_of(cursor);
        if day != current_day {
            info!("{} | importing {}", product, day);
            current_day = day;
        }
        debug!(
            "{} | {} -> {}",
            product,
            format_ts(cursor),
            format_ts(window_end)
        );

        let candles = match fetcher.fetch_page(product, cursor, window_end).await {
            Ok(candles) => candles,
            Err(err) => {
                // FetchFailed already carries the product context.
                error!("{}", err);
                return SyncOutcome::Failed;
            }
        };

        let Some(last) = candles.last() else {
            debug!("{} | no candles in window, caught up", product);
            break;
        };
        let last_time = last.time;

        match store.save(&candles) {
            Ok(new_rows) => {
                debug!(
                    "{} | fetched {} candles, {} new",
                    product,
                    candles.len(),
                    new_rows
                );
                inserted += new_rows;
                pages += 1;
            }
            Err(err) => {
                error!("{} | failed to persist page: {}", product, err);
                return SyncOutcome::Failed;
            }
        }

        if last_time >= end {
            break;
        }
        let next_cursor = last_time + GRANULARITY_SECS;
        if next_cursor <= cursor {
            // Rows from before the requested window would re-fetch the same
            // page forever.
            error!(
                "{} | page did not advance past {}, stopping",
                product,
                format_ts(cursor)
            );
            return SyncOutcome::Failed;
        }
        cursor = next_cursor;
    }

    SyncOutcome::Done { pages, inserted }
}
