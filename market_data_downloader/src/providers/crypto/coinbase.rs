use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use governor::DefaultDirectRateLimiter;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::models::timeframe::TimeFrame;
use crate::providers::{
    ProviderInitError,
    crypto::{Candle, DecodeSnafu, Exchange, ExchangeConfig, ExchangeError, get_json, split_pair},
    http_client,
};

pub const ID: &str = "coinbase";
const BASE_URL: &str = "https://api.exchange.coinbase.com";
const MAX_CANDLES: usize = 300;
/// Empty windows skipped in one call before giving up.
const MAX_EMPTY_WINDOWS: usize = 100;

/// `[time, low, high, open, close, volume]`, time in seconds.
#[derive(Debug, Deserialize)]
struct CoinbaseCandle(i64, f64, f64, f64, f64, f64);

pub struct Coinbase {
    client: Client,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
}

impl Coinbase {
    pub fn new(config: &ExchangeConfig) -> Result<Self, ProviderInitError> {
        Ok(Self {
            client: http_client(config.timeout)?,
            base_url: config.base_url_or(BASE_URL),
            limiter: config.limiter(),
        })
    }

    /// `BTC/USD` -> `BTC-USD`.
    fn product_id(symbol: &str) -> String {
        match split_pair(symbol) {
            Some((base, quote)) => format!("{base}-{quote}"),
            None => symbol.to_string(),
        }
        .to_ascii_uppercase()
    }

    fn granularity_secs(timeframe: &TimeFrame) -> i64 {
        timeframe.duration_ms() / 1000
    }

    /// One request covering `count` candles from `start_ms`, oldest first.
    async fn fetch_window(
        &self,
        symbol: &str,
        timeframe: &TimeFrame,
        start_ms: i64,
        count: i64,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.limiter.until_ready().await;

        let window_end = start_ms + timeframe.duration_ms() * (count - 1);
        let request = self
            .client
            .get(format!("{}/products/{}/candles", self.base_url, Self::product_id(symbol)))
            .query(&[
                ("granularity", Self::granularity_secs(timeframe).to_string()),
                ("start", iso(start_ms)?),
                ("end", iso(window_end)?),
            ]);
        let rows: Vec<CoinbaseCandle> = get_json(ID, request).await?;

        // Newest first on the wire.
        let mut candles: Vec<Candle> = rows
            .into_iter()
            .map(|r| Candle {
                timestamp_ms: r.0 * 1000,
                low: r.1,
                high: r.2,
                open: r.3,
                close: r.4,
                volume: r.5,
            })
            .filter(|c| c.timestamp_ms >= start_ms)
            .collect();
        candles.sort_by_key(|c| c.timestamp_ms);
        Ok(candles)
    }
}

fn iso(ms: i64) -> Result<String, ExchangeError> {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .ok_or_else(|| {
            DecodeSnafu {
                message: format!("{ID}: timestamp out of range: {ms}"),
            }
            .build()
        })
}

#[async_trait]
impl Exchange for Coinbase {
    fn id(&self) -> &'static str {
        ID
    }

    fn timeframes(&self) -> Vec<TimeFrame> {
        ["1m", "5m", "15m", "1h", "6h", "1d"]
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect()
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &TimeFrame,
        since_ms: i64,
        until_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        // The endpoint wants an explicit window; size it to the page.
        let count = limit.clamp(1, MAX_CANDLES) as i64;
        let span_ms = timeframe.duration_ms() * count;
        let horizon_ms = until_ms.min(Utc::now().timestamp_millis());

        // A window with no trades (before listing, or an outage) comes back
        // empty; step over it instead of reporting the end of history.
        let mut window_start = since_ms;
        for _ in 0..MAX_EMPTY_WINDOWS {
            let mut candles = self.fetch_window(symbol, timeframe, window_start, count).await?;
            if !candles.is_empty() {
                candles.truncate(limit);
                return Ok(candles);
            }
            window_start += span_ms;
            if window_start > horizon_ms {
                break;
            }
            debug!(exchange = ID, symbol, window_start, "empty window, moving forward");
        }
        Ok(Vec::new())
    }
}
