use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use snafu::OptionExt;
use tracing::info;

use crate::models::{
    bar::{Bar, BarSeries},
    request_params::BarsRequestParams,
    timeframe::{TimeFrame, TimeFrameUnit, supported_stock_timeframes},
};
use crate::providers::{
    ApiSnafu, DataProvider, InternalSnafu, ProviderError, ProviderInitError, ensure_success,
    finish_series, http_client, midnight_utc, registry::ProviderOptions, resolve_api_key,
    validate_timeframe,
};

pub const NAME: &str = "polygon";
pub const API_KEY_ENV: &str = "POLYGON_API_KEY";
const BASE_URL: &str = "https://api.polygon.io";

/// Aggregates response. `results` is absent when the range holds no bars.
#[derive(Debug, Deserialize)]
struct AggsResponse {
    status: Option<String>,
    error: Option<String>,
    #[serde(default)]
    results: Vec<AggBar>,
}

#[derive(Debug, Deserialize)]
struct AggBar {
    /// Bar start, milliseconds since the epoch.
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    #[serde(default)]
    v: f64,
}

/// Polygon.io daily, weekly and monthly aggregates.
pub struct PolygonProvider {
    client: Client,
    api_key: SecretString,
    base_url: String,
}

impl PolygonProvider {
    /// Reads the API key from `POLYGON_API_KEY` unless the options carry one.
    pub fn new(options: &ProviderOptions) -> Result<Self, ProviderInitError> {
        let api_key = resolve_api_key(options, API_KEY_ENV)?;
        Ok(Self {
            client: http_client(options.http_timeout)?,
            api_key,
            base_url: options.base_url.clone().unwrap_or_else(|| BASE_URL.to_string()),
        })
    }

    fn timespan(timeframe: &TimeFrame) -> &'static str {
        match timeframe.unit {
            TimeFrameUnit::Week => "week",
            TimeFrameUnit::Month => "month",
            _ => "day",
        }
    }

    fn into_series(
        params: &BarsRequestParams,
        resp: AggsResponse,
    ) -> Result<BarSeries, ProviderError> {
        if resp.status.as_deref() == Some("ERROR") {
            return ApiSnafu {
                message: format!(
                    "polygon: {}",
                    resp.error.unwrap_or_else(|| "unknown error".to_string())
                ),
            }
            .fail();
        }
        let bars = resp
            .results
            .into_iter()
            .map(|agg| {
                let timestamp = DateTime::from_timestamp_millis(agg.t).context(InternalSnafu {
                    message: format!("invalid timestamp: {}", agg.t),
                })?;
                Ok(Bar {
                    timestamp: midnight_utc(timestamp),
                    open: agg.o,
                    high: agg.h,
                    low: agg.l,
                    close: agg.c,
                    volume: agg.v,
                })
            })
            .collect::<Result<Vec<_>, ProviderError>>()?;
        Ok(BarSeries::new(params.symbol.clone(), params.timeframe, bars))
    }
}

#[async_trait]
impl DataProvider for PolygonProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn fetch_bars(&self, params: &BarsRequestParams) -> Result<BarSeries, ProviderError> {
        validate_timeframe(NAME, &params.timeframe, &supported_stock_timeframes())?;

        let url = format!(
            "{}/v2/aggs/ticker/{}/range/1/{}/{}/{}",
            self.base_url,
            params.symbol,
            Self::timespan(&params.timeframe),
            params.start.format("%Y-%m-%d"),
            params.end.format("%Y-%m-%d"),
        );
        info!(
            symbol = %params.symbol,
            interval = %params.timeframe,
            "requesting Polygon aggregates"
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("adjusted", "true"),
                ("sort", "asc"),
                ("limit", "50000"),
                ("apiKey", self.api_key.expose_secret()),
            ])
            .send()
            .await?;
        let body: AggsResponse = ensure_success(NAME, response).await?.json().await?;

        finish_series(NAME, Self::into_series(params, body)?, params)
    }
}
