//! Kraken public OHLC endpoint.
//!
//! Kraken keys results by its own pair name and only serves the most recent
//! 720 intervals, so older ranges come back empty or partial.

use async_trait::async_trait;
use governor::DefaultDirectRateLimiter;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::models::timeframe::{TimeFrame, TimeFrameUnit};
use crate::providers::{
    ProviderInitError,
    crypto::{
        Candle, DecodeSnafu, Exchange, ExchangeConfig, ExchangeError, RejectedSnafu, get_json,
        parse_price, split_pair,
    },
    http_client,
};

pub const ID: &str = "kraken";
const BASE_URL: &str = "https://api.kraken.com";

#[derive(Debug, Deserialize)]
struct OhlcResponse {
    #[serde(default)]
    error: Vec<String>,
    #[serde(default)]
    result: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct KrakenRow(
    i64,    // 0: time (seconds)
    String, // 1: open
    String, // 2: high
    String, // 3: low
    String, // 4: close
    String, // 5: vwap
    String, // 6: volume
    i64,    // 7: count
);

pub struct Kraken {
    client: Client,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
}

impl Kraken {
    pub fn new(config: &ExchangeConfig) -> Result<Self, ProviderInitError> {
        Ok(Self {
            client: http_client(config.timeout)?,
            base_url: config.base_url_or(BASE_URL),
            limiter: config.limiter(),
        })
    }

    /// `BTC/USD` -> `XBTUSD`.
    fn pair(symbol: &str) -> String {
        let asset = |a: &str| {
            let upper = a.to_ascii_uppercase();
            if upper == "BTC" { "XBT".to_string() } else { upper }
        };
        match split_pair(symbol) {
            Some((base, quote)) => format!("{}{}", asset(base), asset(quote)),
            None => symbol.to_ascii_uppercase(),
        }
    }

    /// Interval length in minutes.
    fn interval(timeframe: &TimeFrame) -> u32 {
        let unit = match timeframe.unit {
            TimeFrameUnit::Minute => 1,
            TimeFrameUnit::Hour => 60,
            TimeFrameUnit::Day => 1440,
            TimeFrameUnit::Week => 10080,
            TimeFrameUnit::Month => 43200,
        };
        unit * timeframe.amount.get()
    }

    fn parse(resp: OhlcResponse) -> Result<Vec<Candle>, ExchangeError> {
        if !resp.error.is_empty() {
            return RejectedSnafu {
                message: resp.error.join("; "),
            }
            .fail();
        }
        let Some(rows) = resp
            .result
            .into_iter()
            .find_map(|(key, rows)| (key != "last").then_some(rows))
        else {
            return Ok(Vec::new());
        };
        let rows: Vec<KrakenRow> = serde_json::from_value(rows).map_err(|e| {
            DecodeSnafu {
                message: format!("{ID}: {e}"),
            }
            .build()
        })?;

        rows.into_iter()
            .map(|r| {
                Ok(Candle {
                    timestamp_ms: r.0 * 1000,
                    open: parse_price(ID, &r.1)?,
                    high: parse_price(ID, &r.2)?,
                    low: parse_price(ID, &r.3)?,
                    close: parse_price(ID, &r.4)?,
                    volume: parse_price(ID, &r.6)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Exchange for Kraken {
    fn id(&self) -> &'static str {
        ID
    }

    fn timeframes(&self) -> Vec<TimeFrame> {
        ["1m", "5m", "15m", "30m", "1h", "4h", "1d", "1wk"]
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect()
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &TimeFrame,
        since_ms: i64,
        _until_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.limiter.until_ready().await;
        // `since` is exclusive and in seconds.
        let since = (since_ms / 1000 - 1).max(0);
        let request = self.client.get(format!("{}/0/public/OHLC", self.base_url)).query(&[
            ("pair", Self::pair(symbol)),
            ("interval", Self::interval(timeframe).to_string()),
            ("since", since.to_string()),
        ]);
        let resp: OhlcResponse = get_json(ID, request).await?;

        let mut candles = Self::parse(resp)?;
        candles.retain(|c| c.timestamp_ms >= since_ms);
        candles.truncate(limit);
        Ok(candles)
    }
}
