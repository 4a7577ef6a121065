use async_trait::async_trait;
use governor::DefaultDirectRateLimiter;
use reqwest::{Client, header};
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::models::timeframe::{TimeFrame, TimeFrameUnit, supported_crypto_timeframes};
use crate::providers::{
    ProviderInitError,
    crypto::{Candle, Exchange, ExchangeConfig, ExchangeError, get_json, parse_price, split_pair},
};

pub const ID: &str = "binance";
const BASE_URL: &str = "https://api.binance.com";
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
struct BinanceKline(
    i64,    // 0: Open time
    String, // 1: Open
    String, // 2: High
    String, // 3: Low
    String, // 4: Close
    String, // 5: Volume
    i64,    // 6: Close time
    String, // 7: Quote asset volume
    i64,    // 8: Number of trades
    String, // 9: Taker buy base asset volume
    String, // 10: Taker buy quote asset volume
    String, // 11: Ignore
);

pub struct Binance {
    client: Client,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
}

impl Binance {
    pub fn new(config: &ExchangeConfig) -> Result<Self, ProviderInitError> {
        let mut headers = header::HeaderMap::new();
        if let Some(key) = &config.api_key {
            headers.insert("X-MBX-APIKEY", header::HeaderValue::from_str(key.expose_secret())?);
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url_or(BASE_URL),
            limiter: config.limiter(),
        })
    }

    /// `BTC/USDT` -> `BTCUSDT`.
    fn market_id(symbol: &str) -> String {
        match split_pair(symbol) {
            Some((base, quote)) => format!("{base}{quote}"),
            None => symbol.to_string(),
        }
        .to_ascii_uppercase()
    }

    fn interval(timeframe: &TimeFrame) -> String {
        let unit = match timeframe.unit {
            TimeFrameUnit::Minute => "m",
            TimeFrameUnit::Hour => "h",
            TimeFrameUnit::Day => "d",
            TimeFrameUnit::Week => "w",
            TimeFrameUnit::Month => "M",
        };
        format!("{}{unit}", timeframe.amount)
    }
}

#[async_trait]
impl Exchange for Binance {
    fn id(&self) -> &'static str {
        ID
    }

    fn timeframes(&self) -> Vec<TimeFrame> {
        supported_crypto_timeframes()
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
        let request = self.client.get(format!("{}/api/v3/klines", self.base_url)).query(&[
            ("symbol", Self::market_id(symbol)),
            ("interval", Self::interval(timeframe)),
            ("startTime", since_ms.to_string()),
            ("limit", limit.min(MAX_LIMIT).to_string()),
        ]);
        let klines: Vec<BinanceKline> = get_json(ID, request).await?;

        klines
            .into_iter()
            .map(|k| {
                Ok(Candle {
                    timestamp_ms: k.0,
                    open: parse_price(ID, &k.1)?,
                    high: parse_price(ID, &k.2)?,
                    low: parse_price(ID, &k.3)?,
                    close: parse_price(ID, &k.4)?,
                    volume: parse_price(ID, &k.5)?,
                })
            })
            .collect()
    }
}
