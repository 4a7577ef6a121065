//! Financial Modeling Prep adapter.
//!
//! Daily prices come from `historical-price-full` wrapped in a `historical`
//! array; weekly and monthly bars come from `historical-chart`, which returns
//! a bare array. Both list the newest bar first.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{info, warn};

use crate::models::{
    bar::{Bar, BarSeries},
    request_params::BarsRequestParams,
    timeframe::{TimeFrameUnit, supported_stock_timeframes},
};
use crate::providers::{
    DataProvider, ProviderError, ProviderInitError, ensure_success, finish_series, http_client,
    registry::ProviderOptions, resolve_api_key, validate_timeframe,
};

pub const NAME: &str = "fmp";
pub const API_KEY_ENV: &str = "FMP_API_KEY";
const BASE_URL: &str = "https://financialmodelingprep.com";

#[derive(Debug, Default, Deserialize)]
struct HistoricalResponse {
    #[serde(default)]
    historical: Vec<FmpBar>,
}

#[derive(Debug, Deserialize)]
struct FmpBar {
    /// `YYYY-MM-DD`, optionally followed by a time.
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

pub struct FmpProvider {
    client: Client,
    api_key: SecretString,
    base_url: String,
}

impl FmpProvider {
    /// Reads the API key from `FMP_API_KEY` unless the options carry one.
    pub fn new(options: &ProviderOptions) -> Result<Self, ProviderInitError> {
        let api_key = resolve_api_key(options, API_KEY_ENV)?;
        Ok(Self {
            client: http_client(options.http_timeout)?,
            api_key,
            base_url: options.base_url.clone().unwrap_or_else(|| BASE_URL.to_string()),
        })
    }

    fn to_bars(symbol: &str, rows: Vec<FmpBar>) -> Vec<Bar> {
        rows.into_iter()
            .filter_map(|row| {
                let day = row
                    .date
                    .get(..10)
                    .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
                let Some(day) = day else {
                    warn!(symbol, date = %row.date, "skipping row with unparseable date");
                    return None;
                };
                Some(Bar {
                    timestamp: day.and_hms_opt(0, 0, 0)?.and_utc(),
                    open: row.open,
                    high: row.high,
                    low: row.low,
                    close: row.close,
                    volume: row.volume,
                })
            })
            .collect()
    }
}

#[async_trait]
impl DataProvider for FmpProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn fetch_bars(&self, params: &BarsRequestParams) -> Result<BarSeries, ProviderError> {
        validate_timeframe(NAME, &params.timeframe, &supported_stock_timeframes())?;

        let from = params.start.format("%Y-%m-%d").to_string();
        let to = params.end.format("%Y-%m-%d").to_string();
        let query = [
            ("from", from.as_str()),
            ("to", to.as_str()),
            ("apikey", self.api_key.expose_secret()),
        ];
        info!(symbol = %params.symbol, interval = %params.timeframe, "requesting FMP prices");

        let rows = match params.timeframe.unit {
            TimeFrameUnit::Week | TimeFrameUnit::Month => {
                let chart = if params.timeframe.unit == TimeFrameUnit::Week {
                    "1week"
                } else {
                    "1month"
                };
                let url = format!(
                    "{}/api/v3/historical-chart/{chart}/{}",
                    self.base_url, params.symbol
                );
                let response = self.client.get(&url).query(&query).send().await?;
                ensure_success(NAME, response).await?.json::<Vec<FmpBar>>().await?
            }
            _ => {
                let url = format!(
                    "{}/api/v3/historical-price-full/{}",
                    self.base_url, params.symbol
                );
                let response = self.client.get(&url).query(&query).send().await?;
                ensure_success(NAME, response)
                    .await?
                    .json::<HistoricalResponse>()
                    .await?
                    .historical
            }
        };

        let series = BarSeries::new(
            params.symbol.clone(),
            params.timeframe,
            Self::to_bars(&params.symbol, rows),
        );
        finish_series(NAME, series, params)
    }
}
