//! Cryptocurrency OHLCV through public exchange candle endpoints.
//!
//! Exchanges only hand out a bounded page of candles per request, so a
//! date range is fetched by walking a cursor forward page by page:
//!
//! 1. request at most `page_limit` candles starting at the cursor;
//! 2. stop on an empty page, otherwise move the cursor one millisecond past
//!    the newest candle received;
//! 3. stop once the cursor reaches the end of the range.
//!
//! The merged candles are then trimmed to the exact inclusive range, sorted,
//! and de-duplicated (pages may share a boundary candle). If the range is
//! still open after `max_iterations` pages the fetch fails instead of
//! returning a silently truncated series.

pub mod binance;
pub mod coinbase;
pub mod kraken;

use std::{num::NonZeroU32, time::Duration};

use async_trait::async_trait;
use chrono::DateTime;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::RequestBuilder;
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use shared_utils::env::get_env_var_opt;
use snafu::{Backtrace, OptionExt, Snafu};
use tracing::{debug, info};

use crate::models::{
    bar::{Bar, BarSeries},
    request_params::BarsRequestParams,
    timeframe::TimeFrame,
};
use crate::providers::{
    ApiSnafu, DataProvider, InternalSnafu, MissingExchangeSnafu, NotFoundSnafu, ProviderError,
    ProviderInitError, UnknownExchangeSnafu, ValidationSnafu, registry::ProviderOptions,
};

pub const NAME: &str = "crypto";
pub const API_KEY_ENV: &str = "CRYPTO_API_KEY";

/// Exchange ids accepted by `--exchange`.
pub const EXCHANGES: [&str; 3] = [binance::ID, kraken::ID, coinbase::ID];

/// One exchange candle, timestamp in epoch milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ExchangeError {
    /// Transport failure talking to the exchange.
    #[snafu(context(false), display("network error: {source}"))]
    Network {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// The exchange answered but refused the request.
    #[snafu(display("{message}"))]
    Rejected {
        message: String,
        backtrace: Backtrace,
    },

    /// The exchange answered with something we could not read.
    #[snafu(display("unexpected response: {message}"))]
    Decode {
        message: String,
        backtrace: Backtrace,
    },
}

/// The single public primitive the pagination loop needs from an exchange.
#[async_trait]
pub trait Exchange: Send + Sync {
    fn id(&self) -> &'static str;

    /// Intervals the exchange serves.
    fn timeframes(&self) -> Vec<TimeFrame>;

    fn supports(&self, timeframe: &TimeFrame) -> bool {
        self.timeframes().contains(timeframe)
    }

    /// Up to `limit` candles with open time at or after `since_ms`, oldest
    /// first. An empty result means there is nothing between `since_ms` and
    /// `until_ms`; clients that query fixed windows keep searching up to
    /// `until_ms`.
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &TimeFrame,
        since_ms: i64,
        until_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;
}

/// Connection settings shared by the exchange clients.
pub struct ExchangeConfig {
    pub timeout: Duration,
    pub base_url: Option<String>,
    pub requests_per_second: u32,
    pub api_key: Option<SecretString>,
}

impl ExchangeConfig {
    pub fn from_options(options: &ProviderOptions) -> Self {
        let api_key = options
            .api_key
            .clone()
            .or_else(|| get_env_var_opt(API_KEY_ENV))
            .map(|key| SecretString::new(key.into()));
        Self {
            timeout: options.http_timeout,
            base_url: options.base_url.clone(),
            requests_per_second: options.crypto.requests_per_second,
            api_key,
        }
    }

    pub(crate) fn base_url_or(&self, default: &str) -> String {
        self.base_url.clone().unwrap_or_else(|| default.to_string())
    }

    pub(crate) fn limiter(&self) -> DefaultDirectRateLimiter {
        let rate = NonZeroU32::new(self.requests_per_second).unwrap_or(nonzero!(10u32));
        RateLimiter::direct(Quota::per_second(rate))
    }
}

/// Instantiates one of the built-in exchange clients.
pub fn create_exchange(
    id: &str,
    config: &ExchangeConfig,
) -> Result<Box<dyn Exchange>, ProviderInitError> {
    let exchange: Box<dyn Exchange> = match id.to_ascii_lowercase().as_str() {
        binance::ID => Box::new(binance::Binance::new(config)?),
        kraken::ID => Box::new(kraken::Kraken::new(config)?),
        coinbase::ID => Box::new(coinbase::Coinbase::new(config)?),
        _ => {
            return UnknownExchangeSnafu {
                exchange: id,
                available: EXCHANGES.join(", "),
            }
            .fail();
        }
    };
    Ok(exchange)
}

/// Splits `BASE/QUOTE`; symbols without a slash are passed through whole.
pub(crate) fn split_pair(symbol: &str) -> Option<(&str, &str)> {
    symbol.split_once('/')
}

/// Sends a request and decodes a JSON body, mapping non-2xx answers to
/// [`ExchangeError::Rejected`].
pub(crate) async fn get_json<T: DeserializeOwned>(
    exchange: &str,
    request: RequestBuilder,
) -> Result<T, ExchangeError> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        let snippet: String = body.chars().take(200).collect();
        return RejectedSnafu {
            message: format!("{exchange} HTTP {}: {snippet}", status.as_u16()),
        }
        .fail();
    }
    serde_json::from_str(&body).map_err(|e| {
        DecodeSnafu {
            message: format!("{exchange}: {e}"),
        }
        .build()
    })
}

pub(crate) fn parse_price(exchange: &str, raw: &str) -> Result<f64, ExchangeError> {
    raw.parse().map_err(|_| {
        DecodeSnafu {
            message: format!("{exchange}: invalid number {raw:?}"),
        }
        .build()
    })
}

/// Paginated range fetch over an [`Exchange`].
pub struct CryptoProvider {
    exchange: Box<dyn Exchange>,
    page_limit: usize,
    max_iterations: usize,
}

impl CryptoProvider {
    /// Builds the provider for `options.exchange`, which is required.
    pub fn new(options: &ProviderOptions) -> Result<Self, ProviderInitError> {
        let id = options
            .exchange
            .as_deref()
            .context(MissingExchangeSnafu { provider: NAME })?;
        let exchange = create_exchange(id, &ExchangeConfig::from_options(options))?;
        Ok(Self::with_exchange(
            exchange,
            options.crypto.page_limit,
            options.crypto.max_iterations,
        ))
    }

    pub fn with_exchange(
        exchange: Box<dyn Exchange>,
        page_limit: usize,
        max_iterations: usize,
    ) -> Self {
        Self {
            exchange,
            page_limit: page_limit.max(1),
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn exchange_id(&self) -> &'static str {
        self.exchange.id()
    }

    fn map_exchange_error(&self, symbol: &str, err: ExchangeError) -> ProviderError {
        match err {
            ExchangeError::Network { source, .. } => ProviderError::from(source),
            ExchangeError::Rejected { message, .. } => ApiSnafu {
                message: format!("{} rejected request for {symbol}: {message}", self.exchange.id()),
            }
            .build(),
            ExchangeError::Decode { message, .. } => InternalSnafu {
                message: format!("{} response for {symbol}: {message}", self.exchange.id()),
            }
            .build(),
        }
    }

    /// Walks the cursor from `start` to `end`, returning every candle received.
    async fn fetch_pages(&self, params: &BarsRequestParams) -> Result<Vec<Candle>, ProviderError> {
        let end_ms = params.end.timestamp_millis();
        let mut cursor = params.start.timestamp_millis();
        let mut candles = Vec::new();
        let mut iterations = 0;

        while cursor < end_ms {
            if iterations == self.max_iterations {
                return InternalSnafu {
                    message: format!(
                        "reached {} page requests for {} before {}; \
                         narrow the range or raise crypto.max_iterations",
                        self.max_iterations, params.symbol, params.end
                    ),
                }
                .fail();
            }
            iterations += 1;

            let page = self
                .exchange
                .fetch_ohlcv(&params.symbol, &params.timeframe, cursor, end_ms, self.page_limit)
                .await
                .map_err(|e| self.map_exchange_error(&params.symbol, e))?;
            let Some(newest) = page.iter().map(|c| c.timestamp_ms).max() else {
                debug!(exchange = self.exchange.id(), cursor, "empty page, stopping");
                break;
            };
            debug!(
                exchange = self.exchange.id(),
                page = iterations,
                candles = page.len(),
                cursor,
                newest,
                "fetched page"
            );
            candles.extend(page);

            if newest < cursor {
                // The exchange ignored the cursor; nothing further to gain.
                break;
            }
            cursor = newest + 1;
        }
        Ok(candles)
    }
}

#[async_trait]
impl DataProvider for CryptoProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn fetch_bars(&self, params: &BarsRequestParams) -> Result<BarSeries, ProviderError> {
        if !self.exchange.supports(&params.timeframe) {
            let supported: Vec<String> =
                self.exchange.timeframes().iter().map(ToString::to_string).collect();
            return ValidationSnafu {
                message: format!(
                    "Interval '{}' not supported by {}. Supported intervals: {}",
                    params.timeframe,
                    self.exchange.id(),
                    supported.join(", ")
                ),
            }
            .fail();
        }

        info!(
            exchange = self.exchange.id(),
            symbol = %params.symbol,
            interval = %params.timeframe,
            start = %params.start,
            end = %params.end,
            "fetching crypto candles"
        );
        let candles = self.fetch_pages(params).await?;
        if candles.is_empty() {
            return NotFoundSnafu {
                message: format!(
                    "no candles for {} on {} between {} and {}",
                    params.symbol,
                    self.exchange.id(),
                    params.start,
                    params.end
                ),
            }
            .fail();
        }

        let bars = candles
            .into_iter()
            .map(|c| {
                let timestamp =
                    DateTime::from_timestamp_millis(c.timestamp_ms).context(InternalSnafu {
                        message: format!("invalid candle timestamp: {}", c.timestamp_ms),
                    })?;
                Ok(Bar {
                    timestamp,
                    open: c.open,
                    high: c.high,
                    low: c.low,
                    close: c.close,
                    volume: c.volume,
                })
            })
            .collect::<Result<Vec<_>, ProviderError>>()?;

        let mut series = BarSeries::new(params.symbol.clone(), params.timeframe, bars);
        series.normalize(params.start, params.end);
        if series.is_empty() {
            return NotFoundSnafu {
                message: format!(
                    "no candles for {} on {} inside the requested range",
                    params.symbol,
                    self.exchange.id()
                ),
            }
            .fail();
        }
        info!(
            exchange = self.exchange.id(),
            symbol = %params.symbol,
            bars = series.len(),
            "crypto fetch complete"
        );
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::models::{asset::AssetClass, timeframe::supported_crypto_timeframes};

    const HOUR_MS: i64 = 3_600_000;

    /// Serves hourly candles over `[data_start, data_end)`. With `overlap`,
    /// each page repeats the candle just before the cursor.
    struct SyntheticExchange {
        data_start: i64,
        data_end: i64,
        overlap: bool,
        ignore_cursor: bool,
        calls: Arc<AtomicUsize>,
    }

    impl SyntheticExchange {
        fn new(data_start: i64, data_end: i64, calls: Arc<AtomicUsize>) -> Self {
            Self {
                data_start,
                data_end,
                overlap: false,
                ignore_cursor: false,
                calls,
            }
        }
    }

    #[async_trait]
    impl Exchange for SyntheticExchange {
        fn id(&self) -> &'static str {
            "synthetic"
        }

        fn timeframes(&self) -> Vec<TimeFrame> {
            vec!["1h".parse().unwrap()]
        }

        async fn fetch_ohlcv(
            &self,
            _symbol: &str,
            _timeframe: &TimeFrame,
            since_ms: i64,
            _until_ms: i64,
            limit: usize,
        ) -> Result<Vec<Candle>, ExchangeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let since = if self.ignore_cursor { self.data_start } else { since_ms };
            let mut first = self.data_start.max(since);
            first = (first + HOUR_MS - 1).div_euclid(HOUR_MS) * HOUR_MS;
            if self.overlap && first > self.data_start {
                first -= HOUR_MS;
            }
            Ok((0..limit as i64)
                .map(|i| first + i * HOUR_MS)
                .take_while(|&ts| ts < self.data_end)
                .map(|ts| Candle {
                    timestamp_ms: ts,
                    open: 1.0,
                    high: 2.0,
                    low: 0.5,
                    close: ts as f64,
                    volume: 10.0,
                })
                .collect())
        }
    }

    fn ms(y: i32, m: u32, d: u32, h: u32) -> i64 {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap().timestamp_millis()
    }

    fn params(interval: &str) -> BarsRequestParams {
        BarsRequestParams {
            symbol: "BTC/USDT".into(),
            timeframe: interval.parse().unwrap(),
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            asset_class: AssetClass::Crypto,
        }
    }

    #[tokio::test]
    async fn pages_are_merged_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let exchange = SyntheticExchange::new(ms(2024, 1, 1, 0), ms(2024, 1, 1, 24), calls.clone());
        let provider = CryptoProvider::with_exchange(Box::new(exchange), 5, 100);

        let series = provider.fetch_bars(&params("1h")).await.unwrap();
        assert_eq!(series.len(), 24);
        for pair in series.bars.windows(2) {
            let step = pair[1].timestamp.timestamp_millis() - pair[0].timestamp.timestamp_millis();
            assert_eq!(step, HOUR_MS);
        }
        // 24 candles in pages of 5, plus the empty page that ends the walk.
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn boundary_candles_are_not_repeated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut exchange = SyntheticExchange::new(ms(2024, 1, 1, 0), ms(2024, 1, 1, 24), calls);
        exchange.overlap = true;
        let provider = CryptoProvider::with_exchange(Box::new(exchange), 4, 100);

        let series = provider.fetch_bars(&params("1h")).await.unwrap();
        assert_eq!(series.len(), 24);
        for pair in series.bars.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn range_is_trimmed_to_inclusive_bounds() {
        let calls = Arc::new(AtomicUsize::new(0));
        // Data extends a day on either side of the request.
        let exchange = SyntheticExchange::new(ms(2023, 12, 31, 0), ms(2024, 1, 3, 0), calls);
        let provider = CryptoProvider::with_exchange(Box::new(exchange), 1000, 10);

        let p = params("1h");
        let series = provider.fetch_bars(&p).await.unwrap();
        assert_eq!(series.first_timestamp(), Some(p.start));
        assert_eq!(series.last_timestamp(), Some(p.end));
        assert_eq!(series.len(), 25);
    }

    #[tokio::test]
    async fn no_candles_is_not_found() {
        let calls = Arc::new(AtomicUsize::new(0));
        let exchange = SyntheticExchange::new(ms(2025, 1, 1, 0), ms(2025, 1, 2, 0), calls.clone());
        let provider = CryptoProvider::with_exchange(Box::new(exchange), 1000, 10);

        let err = provider.fetch_bars(&params("1h")).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn iteration_cap_is_an_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let exchange = SyntheticExchange::new(ms(2024, 1, 1, 0), ms(2024, 1, 1, 24), calls.clone());
        let provider = CryptoProvider::with_exchange(Box::new(exchange), 2, 3);

        let err = provider.fetch_bars(&params("1h")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Internal { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stale_pages_stop_the_walk() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut exchange =
            SyntheticExchange::new(ms(2024, 1, 1, 0), ms(2024, 1, 1, 24), calls.clone());
        exchange.ignore_cursor = true;
        let provider = CryptoProvider::with_exchange(Box::new(exchange), 10, 100);

        let series = provider.fetch_bars(&params("1h")).await.unwrap();
        assert_eq!(series.len(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unsupported_interval_makes_no_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let exchange = SyntheticExchange::new(0, 0, calls.clone());
        let provider = CryptoProvider::with_exchange(Box::new(exchange), 10, 10);

        let err = provider.fetch_bars(&params("1d")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Validation { .. }));
        assert!(err.to_string().contains("1h"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_exchange_lists_alternatives() {
        let options = ProviderOptions::default().with_exchange(Some("mtgox".into()));
        let err = CryptoProvider::new(&options).err().unwrap();
        let msg = err.to_string();
        assert!(msg.contains("mtgox"));
        assert!(msg.contains("binance, kraken, coinbase"));
    }

    #[test]
    fn exchange_ids_are_case_insensitive() {
        let options = ProviderOptions::default().with_exchange(Some("Binance".into()));
        let provider = CryptoProvider::new(&options).unwrap();
        assert_eq!(provider.exchange_id(), "binance");
    }

    #[test]
    fn every_builtin_exchange_serves_a_subset_of_crypto_intervals() {
        let all = supported_crypto_timeframes();
        let config = ExchangeConfig::from_options(&ProviderOptions::default());
        for id in EXCHANGES {
            let exchange = create_exchange(id, &config).unwrap();
            assert!(exchange.timeframes().iter().all(|tf| all.contains(tf)), "{id}");
            assert!(exchange.supports(&"1h".parse().unwrap()), "{id}");
        }
    }
}
