use std::time::Duration;

use anyhow::{anyhow, Context};
use chrono::DateTime;
use log::{info, warn};
use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::candle::Candle;
use crate::error::{AppError, Result};
use crate::limiter::RateLimiter;

pub const API_URL: &str = "https://api.exchange.coinbase.com";

/// Candle interval requested from the exchange, in seconds.
pub const GRANULARITY_SECS: i64 = 60;
/// "your response may contain as many as 300 candles"
pub const PAGE_CANDLES: i64 = 300;
/// Widest time window a single request can cover.
pub const PAGE_SPAN_SECS: i64 = PAGE_CANDLES * GRANULARITY_SECS;

const MAX_ATTEMPTS: usize = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A single-page candle lookup. One call maps to one upstream request.
#[allow(async_fn_in_trait)]
pub trait CandleSource {
    async fn fetch(
        &self,
        product: &str,
        start: i64,
        end: i64,
    ) -> std::result::Result<Vec<Candle>, SourceError>;
}

#[derive(Debug, Error)]
pub enum SourceError {
    /// Worth another attempt: network failure, timeout, 429/5xx, bad payload.
    #[error(transparent)]
    Transient(anyhow::Error),
    /// Will fail no matter how often we try, e.g. 400 Bad Request.
    #[error(transparent)]
    Fatal(anyhow::Error),
}

/// Fetches candle pages from the exchange's public market-data endpoint.
pub struct HttpCandleSource {
    client: Client,
    base_url: String,
}

impl HttpCandleSource {
    pub fn new() -> Result<Self> {
        Self::with_base_url(API_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to construct candle HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

impl CandleSource for HttpCandleSource {
    async fn fetch(
        &self,
        product: &str,
        start: i64,
        end: i64,
    ) -> std::result::Result<Vec<Candle>, SourceError> {
        let url = format!("{}/products/{}/candles", self.base_url, product);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("start", iso_timestamp(start)?),
                ("end", iso_timestamp(end)?),
                ("granularity", GRANULARITY_SECS.to_string()),
            ])
            .send()
            .await
            .map_err(|err| SourceError::Transient(err.into()))?;

        let status = response.status();
        if !status.is_success() {
            let err = anyhow!("candle request for {} returned status {}", product, status);
            // Only 4XX code worth re-trying is 429 (api rate limit).
            return if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                Err(SourceError::Transient(err))
            } else {
                Err(SourceError::Fatal(err))
            };
        }

        let body = response
            .text()
            .await
            .map_err(|err| SourceError::Transient(err.into()))?;

        parse_candles(product, &body).map_err(SourceError::Transient)
    }
}

fn iso_timestamp(unix_secs: i64) -> std::result::Result<String, SourceError> {
    DateTime::from_timestamp(unix_secs, 0)
        .map(|dt| dt.to_rfc3339())
        .ok_or_else(|| SourceError::Fatal(anyhow!("timestamp {} out of range", unix_secs)))
}

/// Parse the raw page body: an array of `[time, low, high, open, close, volume]`
/// rows in descending time order. Rows without exactly six fields are skipped;
/// output is normalized to ascending time order. Prices are passed through
/// unvalidated; malformed upstream data is the downstream consumer's problem.
fn parse_candles(product: &str, body: &str) -> anyhow::Result<Vec<Candle>> {
    let rows: Vec<Vec<f64>> = serde_json::from_str(body)
        .with_context(|| format!("Failed to parse candle payload for {}", product))?;

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        // In rare cases the api returned extra values in the response.
        if row.len() != 6 {
            warn!("{} | response row length invalid: {:?}", product, row);
            continue;
        }
        candles.push(Candle {
            market: product.to_string(),
            time: row[0] as i64,
            low: row[1],
            high: row[2],
            open: row[3],
            close: row[4],
            volume: row[5],
        });
    }

    candles.sort_by_key(|c| c.time);
    Ok(candles)
}

/// Wraps a [`CandleSource`] with the shared rate limiter and bounded retry.
///
/// Every attempt waits for a limiter slot first; there is no extra backoff
/// beyond that natural spacing. Transient failures are retried up to
/// [`MAX_ATTEMPTS`] times, fatal ones surface immediately. Either way the
/// caller only ever sees [`AppError::FetchFailed`].
pub struct CandleFetcher<S> {
    source: S,
    limiter: RateLimiter,
}

impl<S: CandleSource> CandleFetcher<S> {
    pub fn new(source: S, limiter: RateLimiter) -> Self {
        Self { source, limiter }
    }

    /// Fetch one page. An empty result is a success with zero rows, distinct
    /// from an error — the window may simply hold no candles yet.
    pub async fn fetch_page(&self, product: &str, start: i64, end: i64) -> Result<Vec<Candle>> {
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            self.limiter.acquire().await;

            match self.source.fetch(product, start, end).await {
                Ok(candles) => return Ok(candles),
                Err(SourceError::Transient(err)) => {
                    warn!(
                        "{} | attempt {}/{} failed: {:#}",
                        product, attempt, MAX_ATTEMPTS, err
                    );
                    if attempt < MAX_ATTEMPTS {
                        info!("Re-trying");
                    }
                    last_err = Some(err);
                }
                Err(SourceError::Fatal(err)) => {
                    return Err(AppError::FetchFailed {
                        product: product.to_string(),
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }

        Err(AppError::FetchFailed {
            product: product.to_string(),
            attempts: MAX_ATTEMPTS,
            source: last_err.unwrap_or_else(|| anyhow!("no attempt was made")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_and_sorts_ascending() {
        let body = r#"[
            [1463540580, 0.32, 0.35, 0.35, 0.32, 12.3],
            [1463540520, 0.30, 0.34, 0.30, 0.34, 3.1],
            [1463540460, 0.28, 0.31, 0.29, 0.30, 0.5]
        ]"#;

        let candles = parse_candles("ETH-USD", body).unwrap();

        assert_eq!(candles.len(), 3);
        assert_eq!(
            candles.iter().map(|c| c.time).collect::<Vec<_>>(),
            vec![1463540460, 1463540520, 1463540580]
        );
        assert_eq!(candles[0].market, "ETH-USD");
        // Row order is [time, low, high, open, close, volume].
        assert!((candles[2].low - 0.32).abs() < 1e-9);
        assert!((candles[2].high - 0.35).abs() < 1e-9);
        assert!((candles[2].volume - 12.3).abs() < 1e-9);
    }

    #[test]
    fn skips_rows_with_wrong_field_count() {
        let body = r#"[
            [1463540520, 0.30, 0.34, 0.30, 0.34, 3.1, 99.0],
            [1463540460, 0.28, 0.31, 0.29, 0.30, 0.5],
            [1463540580, 0.32]
        ]"#;

        let candles = parse_candles("ETH-USD", body).unwrap();

        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].time, 1463540460);
    }

    #[test]
    fn empty_page_is_not_an_error() {
        let candles = parse_candles("BTC-USD", "[]").unwrap();
        assert!(candles.is_empty());
    }

    #[test]
    fn rejects_non_array_payload() {
        assert!(parse_candles("BTC-USD", r#"{"message":"oops"}"#).is_err());
    }
}
