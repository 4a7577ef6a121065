//! Yahoo Finance data provider.
//!
//! Fetches OHLCV bars from Yahoo's public v8 chart API. No API key is needed.
//! Yahoo has no official API and changes its response format without notice,
//! so every field of the chart payload is treated as optional.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration};
use reqwest::Client;
use serde::Deserialize;
use snafu::OptionExt;
use tracing::{debug, info};

use crate::models::{
    bar::{Bar, BarSeries},
    request_params::BarsRequestParams,
    timeframe::{TimeFrame, TimeFrameUnit, supported_stock_timeframes},
};
use crate::providers::{
    ApiSnafu, DataProvider, InternalSnafu, NotFoundSnafu, ProviderError, ProviderInitError,
    ensure_success, finish_series, midnight_utc, validate_timeframe,
};

pub const NAME: &str = "yahoo";
const BASE_URL: &str = "https://query2.finance.yahoo.com";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChartMeta {
    /// Exchange offset from UTC in seconds, daylight saving included.
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<f64>>,
}

pub struct YahooProvider {
    client: Client,
    base_url: String,
}

impl YahooProvider {
    pub fn new(timeout: Duration) -> Result<Self, ProviderInitError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: BASE_URL.to_string(),
        })
    }

    /// Points the provider at another host (used by tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn interval(timeframe: &TimeFrame) -> &'static str {
        match timeframe.unit {
            TimeFrameUnit::Week => "1wk",
            TimeFrameUnit::Month => "1mo",
            _ => "1d",
        }
    }

    /// Converts the chart payload into bars, skipping rows with missing prices
    /// (holidays and half-filled trailing rows).
    fn parse_response(
        symbol: &str,
        timeframe: TimeFrame,
        resp: ChartResponse,
    ) -> Result<BarSeries, ProviderError> {
        let result = match (resp.chart.result, resp.chart.error) {
            (_, Some(err)) if err.code == "Not Found" => {
                return NotFoundSnafu {
                    message: format!("symbol {symbol} not found on Yahoo: {}", err.description),
                }
                .fail();
            }
            (_, Some(err)) => {
                return ApiSnafu {
                    message: format!("{}: {}", err.code, err.description),
                }
                .fail();
            }
            (Some(result), None) => result,
            (None, None) => {
                return InternalSnafu {
                    message: "empty chart result with no error".to_string(),
                }
                .fail();
            }
        };

        let Some(data) = result.into_iter().next() else {
            return NotFoundSnafu {
                message: format!("no chart data for {symbol}"),
            }
            .fail();
        };
        // A valid symbol with no trading in range has no timestamp array.
        let timestamps = data.timestamp.unwrap_or_default();
        let offset = data.meta.gmtoffset;
        let quote = data.indicators.quote.into_iter().next().unwrap_or_default();

        let mut bars = Vec::with_capacity(timestamps.len());
        for (i, &ts) in timestamps.iter().enumerate() {
            // Session open times are keyed by the exchange's local date.
            let timestamp = DateTime::from_timestamp(ts + offset, 0).context(InternalSnafu {
                message: format!("invalid timestamp: {ts}"),
            })?;
            let field = |col: &Vec<Option<f64>>| col.get(i).copied().flatten();
            let (Some(open), Some(high), Some(low), Some(close)) = (
                field(&quote.open),
                field(&quote.high),
                field(&quote.low),
                field(&quote.close),
            ) else {
                debug!(symbol, ts, "skipping row with missing prices");
                continue;
            };
            bars.push(Bar {
                timestamp: midnight_utc(timestamp),
                open,
                high,
                low,
                close,
                volume: field(&quote.volume).unwrap_or(0.0),
            });
        }

        Ok(BarSeries::new(symbol, timeframe, bars))
    }
}

#[async_trait]
impl DataProvider for YahooProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn fetch_bars(&self, params: &BarsRequestParams) -> Result<BarSeries, ProviderError> {
        validate_timeframe(NAME, &params.timeframe, &supported_stock_timeframes())?;

        // Sessions east of UTC open on the previous UTC day, so ask for one
        // extra day before the start and let `finish_series` trim. period2 is
        // exclusive on Yahoo's side; extend it so the end date is included.
        let period1 = (params.start - ChronoDuration::days(1)).timestamp();
        let period2 = (params.end + ChronoDuration::days(1)).timestamp();
        let url = format!("{}/v8/finance/chart/{}", self.base_url, params.symbol);
        info!(symbol = %params.symbol, interval = %params.timeframe, "requesting Yahoo chart");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("period1", period1.to_string()),
                ("period2", period2.to_string()),
                ("interval", Self::interval(&params.timeframe).to_string()),
                ("events", "history".to_string()),
            ])
            .send()
            .await?;

        // Yahoo reports unknown symbols as 404 with a chart error body.
        let status = response.status();
        let chart: ChartResponse = if status == reqwest::StatusCode::NOT_FOUND {
            match response.json::<ChartResponse>().await {
                Ok(chart) => chart,
                Err(_) => {
                    return NotFoundSnafu {
                        message: format!("symbol {} not found on Yahoo", params.symbol),
                    }
                    .fail();
                }
            }
        } else {
            ensure_success(NAME, response).await?.json().await?
        };

        let series = Self::parse_response(&params.symbol, params.timeframe, chart)?;
        finish_series(NAME, series, params)
    }
}
