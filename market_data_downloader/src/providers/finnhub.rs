use async_trait::async_trait;
use chrono::{DateTime, Duration};
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
    ApiSnafu, DataProvider, InternalSnafu, NotFoundSnafu, ProviderError, ProviderInitError,
    ensure_success, finish_series, http_client, midnight_utc, registry::ProviderOptions,
    resolve_api_key, validate_timeframe,
};

pub const NAME: &str = "finnhub";
pub const API_KEY_ENV: &str = "FINNHUB_API_KEY";
const BASE_URL: &str = "https://finnhub.io";

/// Candle response: parallel arrays plus a status flag (`ok` / `no_data`).
#[derive(Debug, Deserialize)]
struct CandleResponse {
    s: String,
    #[serde(default)]
    t: Vec<i64>,
    #[serde(default)]
    o: Vec<f64>,
    #[serde(default)]
    h: Vec<f64>,
    #[serde(default)]
    l: Vec<f64>,
    #[serde(default)]
    c: Vec<f64>,
    #[serde(default)]
    v: Vec<f64>,
}

pub struct FinnhubProvider {
    client: Client,
    api_key: SecretString,
    base_url: String,
}

impl FinnhubProvider {
    /// Reads the API key from `FINNHUB_API_KEY` unless the options carry one.
    pub fn new(options: &ProviderOptions) -> Result<Self, ProviderInitError> {
        let api_key = resolve_api_key(options, API_KEY_ENV)?;
        Ok(Self {
            client: http_client(options.http_timeout)?,
            api_key,
            base_url: options.base_url.clone().unwrap_or_else(|| BASE_URL.to_string()),
        })
    }

    fn resolution(timeframe: &TimeFrame) -> &'static str {
        match timeframe.unit {
            TimeFrameUnit::Week => "W",
            TimeFrameUnit::Month => "M",
            _ => "D",
        }
    }

    fn into_series(
        params: &BarsRequestParams,
        resp: CandleResponse,
    ) -> Result<BarSeries, ProviderError> {
        match resp.s.as_str() {
            "ok" => {}
            "no_data" => {
                return NotFoundSnafu {
                    message: format!("finnhub has no candles for {}", params.symbol),
                }
                .fail();
            }
            other => {
                return ApiSnafu {
                    message: format!("finnhub status {other}"),
                }
                .fail();
            }
        }

        let n = resp.t.len();
        if [resp.o.len(), resp.h.len(), resp.l.len(), resp.c.len(), resp.v.len()]
            .iter()
            .any(|&len| len != n)
        {
            return InternalSnafu {
                message: "finnhub candle arrays differ in length".to_string(),
            }
            .fail();
        }

        let mut bars = Vec::with_capacity(n);
        for i in 0..n {
            let timestamp = DateTime::from_timestamp(resp.t[i], 0).context(InternalSnafu {
                message: format!("invalid timestamp: {}", resp.t[i]),
            })?;
            bars.push(Bar {
                timestamp: midnight_utc(timestamp),
                open: resp.o[i],
                high: resp.h[i],
                low: resp.l[i],
                close: resp.c[i],
                volume: resp.v[i],
            });
        }
        Ok(BarSeries::new(params.symbol.clone(), params.timeframe, bars))
    }
}

#[async_trait]
impl DataProvider for FinnhubProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn fetch_bars(&self, params: &BarsRequestParams) -> Result<BarSeries, ProviderError> {
        validate_timeframe(NAME, &params.timeframe, &supported_stock_timeframes())?;

        let from = params.start.timestamp().to_string();
        let to = ((params.end + Duration::days(1)).timestamp() - 1).to_string();
        info!(symbol = %params.symbol, interval = %params.timeframe, "requesting Finnhub candles");

        let response = self
            .client
            .get(format!("{}/api/v1/stock/candle", self.base_url))
            .query(&[
                ("symbol", params.symbol.as_str()),
                ("resolution", Self::resolution(&params.timeframe)),
                ("from", from.as_str()),
                ("to", to.as_str()),
                ("token", self.api_key.expose_secret()),
            ])
            .send()
            .await?;
        let body: CandleResponse = ensure_success(NAME, response).await?.json().await?;

        finish_series(NAME, Self::into_series(params, body)?, params)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::models::asset::AssetClass;

    fn params() -> BarsRequestParams {
        BarsRequestParams {
            symbol: "MSFT".into(),
            timeframe: TimeFrame::day(),
            start: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap(),
            asset_class: AssetClass::Stock,
        }
    }

    #[test]
    fn parallel_arrays_become_bars() {
        let resp: CandleResponse = serde_json::from_str(
            r#"{"s":"ok","t":[1704153600,1704240000],"o":[1.0,2.0],"h":[1.5,2.5],
            "l":[0.5,1.5],"c":[1.2,2.2],"v":[10,20]}"#,
        )
        .unwrap();
        let series = FinnhubProvider::into_series(&params(), resp).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.bars[1].close, 2.2);
        assert_eq!(series.bars[1].volume, 20.0);
    }

    #[test]
    fn no_data_is_not_found() {
        let resp: CandleResponse = serde_json::from_str(r#"{"s":"no_data"}"#).unwrap();
        let err = FinnhubProvider::into_series(&params(), resp).unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
    }

    #[test]
    fn ragged_arrays_are_rejected() {
        let resp: CandleResponse = serde_json::from_str(
            r#"{"s":"ok","t":[1704153600],"o":[],"h":[],"l":[],"c":[],"v":[]}"#,
        )
        .unwrap();
        let err = FinnhubProvider::into_series(&params(), resp).unwrap_err();
        assert!(matches!(err, ProviderError::Internal { .. }));
    }
}
