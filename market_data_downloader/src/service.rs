//! Download orchestration: validate a request, fetch it through a provider
//! and write the result under the datasets directory.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::errors::Error;
use crate::io::{OutputFormat, write_series};
use crate::models::{
    market::{MarketConfig, markets},
    request_params::BarsRequestParams,
    timeframe::TimeFrame,
    timespan::{DateRange, Timespan},
};
use crate::providers::{
    crypto,
    registry::{ProviderDescriptor, ProviderOptions, ProviderRegistry},
};

const MAX_TICKER_LEN: usize = 20;

/// What the caller wants downloaded. Dates are `YYYY-MM-DD` strings as typed
/// on the command line; resolution happens in [`DownloadService::preview`].
#[derive(Clone, Debug, PartialEq)]
pub struct DownloadRequest {
    pub datasource: String,
    pub ticker: String,
    pub interval: String,
    pub timespan: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub exchange: Option<String>,
    pub market: Option<String>,
    pub format: OutputFormat,
    /// Explicit output file; the generated name is used otherwise.
    pub output: Option<PathBuf>,
    pub include_datasource: bool,
}

impl DownloadRequest {
    pub fn new(datasource: impl Into<String>, ticker: impl Into<String>) -> Self {
        Self {
            datasource: datasource.into(),
            ticker: ticker.into(),
            interval: "1d".to_string(),
            timespan: None,
            start: None,
            end: None,
            exchange: None,
            market: None,
            format: OutputFormat::Csv,
            output: None,
            include_datasource: false,
        }
    }
}

/// A validated request, ready to fetch.
#[derive(Clone, Debug, Serialize)]
pub struct DownloadPlan {
    pub datasource: String,
    /// Ticker as requested.
    pub ticker: String,
    /// Ticker sent to the provider, market suffix applied.
    pub final_ticker: String,
    pub exchange: Option<String>,
    pub market: &'static MarketConfig,
    pub timeframe: TimeFrame,
    pub timespan: Option<Timespan>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub format: OutputFormat,
    pub output_path: PathBuf,
}

impl DownloadPlan {
    pub fn file_name(&self) -> String {
        self.output_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Provider parameters: both dates at midnight UTC, both inclusive.
    pub fn request_params(&self, descriptor: &ProviderDescriptor) -> BarsRequestParams {
        BarsRequestParams {
            symbol: self.final_ticker.clone(),
            timeframe: self.timeframe,
            start: self.start.and_time(chrono::NaiveTime::MIN).and_utc(),
            end: self.end.and_time(chrono::NaiveTime::MIN).and_utc(),
            asset_class: descriptor.asset_class,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct DownloadResult {
    pub plan: DownloadPlan,
    pub path: PathBuf,
    pub rows: usize,
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
}

/// Replaces characters that cannot appear in a file name component.
pub fn safe_ticker(ticker: &str) -> String {
    ticker.replace(['/', '\\', ':'], "-")
}

/// Output file name:
/// `<ticker>[_<exchange>|_<market>][_<datasource>]_<period>_<interval>.<ext>`.
pub struct FileName<'a> {
    pub ticker: &'a str,
    pub datasource: &'a str,
    /// Exchange for crypto, market for non-default stock markets.
    pub qualifier: Option<&'a str>,
    /// Timespan label, or `<start>_<end>`.
    pub period: &'a str,
    pub interval: &'a TimeFrame,
    pub format: OutputFormat,
    pub include_datasource: bool,
}

impl fmt::Display for FileName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", safe_ticker(self.ticker))?;
        if let Some(q) = self.qualifier {
            write!(f, "_{q}")?;
        }
        if self.include_datasource {
            write!(f, "_{}", self.datasource)?;
        }
        write!(f, "_{}_{}.{}", self.period, self.interval, self.format.extension())
    }
}

/// A file found in the datasets directory.
#[derive(Clone, Debug, Serialize)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub ticker: String,
    /// Name components between the ticker and the interval (exchange,
    /// market, datasource, period).
    pub qualifiers: Vec<String>,
    pub interval: TimeFrame,
    pub format: OutputFormat,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

impl DownloadedFile {
    /// Reads a file's metadata; `None` for names this crate did not produce.
    fn from_path(path: &Path) -> Option<Self> {
        let format = OutputFormat::from_extension(path.extension()?.to_str()?)?;
        let stem = path.file_stem()?.to_str()?;
        let parts: Vec<&str> = stem.split('_').collect();
        if parts.len() < 3 {
            return None;
        }
        let interval: TimeFrame = parts[parts.len() - 1].parse().ok()?;
        let meta = fs::metadata(path).ok()?;
        Some(Self {
            path: path.to_path_buf(),
            file_name: path.file_name()?.to_string_lossy().into_owned(),
            ticker: parts[0].to_string(),
            qualifiers: parts[1..parts.len() - 1].iter().map(|s| s.to_string()).collect(),
            interval,
            format,
            size_bytes: meta.len(),
            modified: meta.modified().map(DateTime::<Utc>::from).ok()?,
        })
    }
}

/// Narrows [`DownloadService::list_downloaded_files`].
#[derive(Clone, Debug, Default)]
pub struct FileFilter {
    pub ticker: Option<String>,
    /// Matches an exchange, market, or datasource component.
    pub qualifier: Option<String>,
}

impl FileFilter {
    fn matches(&self, file: &DownloadedFile) -> bool {
        let ticker_ok = self
            .ticker
            .as_deref()
            .is_none_or(|t| safe_ticker(t).eq_ignore_ascii_case(&file.ticker));
        let qualifier_ok = self
            .qualifier
            .as_deref()
            .is_none_or(|q| file.qualifiers.iter().any(|f| f == q));
        ticker_ok && qualifier_ok
    }
}

pub struct DownloadService {
    settings: Settings,
    registry: ProviderRegistry,
    options: ProviderOptions,
}

impl DownloadService {
    pub fn new(settings: Settings) -> Self {
        Self::with_registry(settings, ProviderRegistry::builtin())
    }

    pub fn with_registry(settings: Settings, registry: ProviderRegistry) -> Self {
        let options = ProviderOptions::from_settings(&settings);
        Self {
            settings,
            registry,
            options,
        }
    }

    /// Replaces the options handed to provider constructors. The exchange is
    /// still taken from each request.
    pub fn with_provider_options(mut self, options: ProviderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn datasources(&self) -> Vec<&'static str> {
        self.registry.names()
    }

    pub fn datasource_info(&self) -> Vec<&ProviderDescriptor> {
        self.registry.descriptors().collect()
    }

    pub fn markets(&self) -> &'static [MarketConfig] {
        markets()
    }

    pub fn market(&self, name: &str) -> Result<&'static MarketConfig, Error> {
        Ok(MarketConfig::lookup(name)?)
    }

    pub fn timespans(&self) -> &'static [Timespan] {
        &Timespan::ALL
    }

    /// Accepts letters, digits and `. - /`, at most 20 characters.
    pub fn validate_ticker(&self, ticker: &str) -> Result<(), Error> {
        if ticker.is_empty() {
            return Err(Error::Validation("Ticker cannot be empty".to_string()));
        }
        if !ticker
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '/'))
        {
            return Err(Error::Validation(format!("Ticker contains invalid characters: {ticker}")));
        }
        if ticker.chars().count() > MAX_TICKER_LEN {
            return Err(Error::Validation(format!(
                "Ticker too long (max {MAX_TICKER_LEN} characters)"
            )));
        }
        Ok(())
    }

    fn descriptor(&self, datasource: &str) -> Result<&ProviderDescriptor, Error> {
        self.registry.descriptor(datasource).ok_or_else(|| {
            Error::Validation(format!(
                "Unknown datasource '{datasource}'. Available: {}",
                self.registry.names().join(", ")
            ))
        })
    }

    /// Validates a request and works out what would be downloaded where,
    /// without touching the network.
    pub fn preview(&self, request: &DownloadRequest) -> Result<DownloadPlan, Error> {
        self.preview_as_of(request, Utc::now().date_naive())
    }

    /// [`preview`](Self::preview) with an explicit "today" for relative timespans.
    pub fn preview_as_of(
        &self,
        request: &DownloadRequest,
        today: NaiveDate,
    ) -> Result<DownloadPlan, Error> {
        let descriptor = self.descriptor(&request.datasource)?;

        let exchange = if descriptor.requires_exchange {
            let exchange = request.exchange.as_deref().map(str::to_ascii_lowercase).ok_or_else(|| {
                Error::Validation(format!(
                    "Exchange is required for the {} datasource. Use --exchange (available: {})",
                    descriptor.name,
                    crypto::EXCHANGES.join(", ")
                ))
            })?;
            if !crypto::EXCHANGES.contains(&exchange.as_str()) {
                return Err(Error::Validation(format!(
                    "Exchange '{exchange}' is not supported. Available exchanges: {}",
                    crypto::EXCHANGES.join(", ")
                )));
            }
            Some(exchange)
        } else {
            if let Some(exchange) = &request.exchange {
                warn!(
                    %exchange,
                    datasource = descriptor.name,
                    "ignoring exchange for a stock datasource"
                );
            }
            None
        };

        let timeframe: TimeFrame = request.interval.parse()?;
        if !descriptor.supports(&timeframe) {
            let supported: Vec<String> =
                descriptor.timeframes.iter().map(ToString::to_string).collect();
            return Err(Error::Validation(format!(
                "Interval '{}' not supported by {}. Supported intervals: {}",
                request.interval,
                descriptor.name,
                supported.join(", ")
            )));
        }

        self.validate_ticker(&request.ticker)?;

        // Suffixes only make sense for stock listings.
        let market = if descriptor.requires_exchange {
            MarketConfig::lookup("crypto")?
        } else {
            let name = request.market.as_deref().unwrap_or(&self.settings.default_market);
            MarketConfig::lookup(name)?
        };
        let final_ticker = market.apply_suffix(&request.ticker);

        let timespan = request.timespan.as_deref().map(str::parse::<Timespan>).transpose()?;
        let range =
            DateRange::resolve(timespan, request.start.as_deref(), request.end.as_deref(), today)?;
        if range.start >= range.end {
            return Err(Error::Validation("Start date must be before end date".to_string()));
        }

        // A timespan names the file only when it decided the dates.
        let explicit_dates = request.start.is_some() || request.end.is_some();
        let period = match timespan {
            Some(ts) if !explicit_dates => ts.file_label().to_string(),
            _ => format!("{}_{}", range.start_str(), range.end_str()),
        };
        let qualifier = match &exchange {
            Some(exchange) => Some(exchange.as_str()),
            None if !market.is_default() => Some(market.name),
            None => None,
        };

        let output_path = match &request.output {
            Some(path) => path.clone(),
            None => self.settings.datasets_dir().join(
                FileName {
                    ticker: &request.ticker,
                    datasource: descriptor.name,
                    qualifier,
                    period: &period,
                    interval: &timeframe,
                    format: request.format,
                    include_datasource: request.include_datasource,
                }
                .to_string(),
            ),
        };

        Ok(DownloadPlan {
            datasource: descriptor.name.to_string(),
            ticker: request.ticker.clone(),
            final_ticker,
            exchange,
            market,
            timeframe,
            timespan: timespan.filter(|_| !explicit_dates),
            start: range.start,
            end: range.end,
            format: request.format,
            output_path,
        })
    }

    /// Fetches the planned series and writes it. Nothing is written unless
    /// at least one bar came back.
    pub async fn download(&self, request: &DownloadRequest) -> Result<DownloadResult, Error> {
        let plan = self.preview(request)?;
        self.execute(plan).await
    }

    /// Runs an already validated plan.
    pub async fn execute(&self, plan: DownloadPlan) -> Result<DownloadResult, Error> {
        let descriptor = self.descriptor(&plan.datasource)?;
        info!(
            datasource = %plan.datasource,
            ticker = %plan.final_ticker,
            interval = %plan.timeframe,
            start = %plan.start,
            end = %plan.end,
            "starting download"
        );

        let options = self.options.clone().with_exchange(plan.exchange.clone());
        let provider = self
            .registry
            .create(&plan.datasource, &options)
            .ok_or_else(|| {
                Error::Validation(format!("Unknown datasource '{}'", plan.datasource))
            })??;

        let params = plan.request_params(descriptor);
        let series = provider.fetch_bars(&params).await?;
        let (Some(first), Some(last)) = (series.first_timestamp(), series.last_timestamp()) else {
            return Err(Error::NotFound(format!(
                "No data found for {} in the specified date range",
                plan.final_ticker
            )));
        };
        info!(rows = series.len(), %first, %last, "retrieved bars");

        let path = write_series(plan.format, plan.output_path.clone(), &series).await?;
        info!(path = %path.display(), "download completed");
        Ok(DownloadResult {
            rows: series.len(),
            first,
            last,
            path,
            plan,
        })
    }

    /// Files in the datasets directory, newest first.
    pub fn list_downloaded_files(&self, filter: &FileFilter) -> Result<Vec<DownloadedFile>, Error> {
        let dir = self.settings.datasets_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            match DownloadedFile::from_path(&path) {
                Some(file) if filter.matches(&file) => files.push(file),
                Some(_) => {}
                None => debug!(path = %path.display(), "skipping unrecognized file"),
            }
        }
        files.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
        Ok(files)
    }

    /// Deletes a file inside the datasets directory. Relative paths are
    /// taken relative to that directory. Returns `false` when the file does
    /// not exist.
    pub fn delete_downloaded_file(&self, path: &Path) -> Result<bool, Error> {
        let dir = self.settings.datasets_dir();
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "no downloads yet, nothing to delete");
            return Ok(false);
        }
        let candidate = if path.is_relative() { dir.join(path) } else { path.to_path_buf() };

        let root = dir.canonicalize().ok();
        let parent = candidate.parent().and_then(|p| p.canonicalize().ok());
        let inside = match (root, parent) {
            (Some(root), Some(parent)) => parent.starts_with(root),
            _ => false,
        };
        if !inside || candidate.file_name().is_none() {
            return Err(Error::Validation(format!(
                "{} is not in the downloads directory {}",
                candidate.display(),
                dir.display()
            )));
        }
        if !candidate.is_file() {
            return Ok(false);
        }
        fs::remove_file(&candidate)?;
        info!(path = %candidate.display(), "deleted download");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn service(dir: &TempDir) -> DownloadService {
        DownloadService::new(Settings::with_home(dir.path()))
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    #[test]
    fn ticker_rules() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        for ok in ["AAPL", "BRK.B", "BHP-AU", "BTC/USDT"] {
            assert!(svc.validate_ticker(ok).is_ok(), "{ok}");
        }
        for bad in ["", "AAPL$", "A B", "ABCDEFGHIJKLMNOPQRSTU"] {
            assert!(matches!(svc.validate_ticker(bad), Err(Error::Validation(_))), "{bad}");
        }
    }

    #[test]
    fn file_names() {
        let hourly: TimeFrame = "1h".parse().unwrap();
        let name = FileName {
            ticker: "BTC/USDT",
            datasource: "crypto",
            qualifier: Some("binance"),
            period: "1day",
            interval: &hourly,
            format: OutputFormat::Csv,
            include_datasource: false,
        };
        assert_eq!(name.to_string(), "BTC-USDT_binance_1day_1h.csv");

        let daily = TimeFrame::day();
        let name = FileName {
            ticker: "BHP",
            datasource: "yahoo",
            qualifier: Some("australia"),
            period: "2023-01-01_2023-12-31",
            interval: &daily,
            format: OutputFormat::Json,
            include_datasource: true,
        };
        assert_eq!(name.to_string(), "BHP_australia_yahoo_2023-01-01_2023-12-31_1d.json");
    }

    #[test]
    fn preview_default_market_and_timespan() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let mut req = DownloadRequest::new("yahoo", "AAPL");
        req.timespan = Some("6M".into());

        let plan = svc.preview_as_of(&req, today()).unwrap();
        assert_eq!(plan.final_ticker, "AAPL");
        assert_eq!(plan.end, today());
        assert_eq!((plan.end - plan.start).num_days(), 180);
        assert_eq!(plan.file_name(), "AAPL_6months_1d.csv");
        assert!(plan.output_path.starts_with(dir.path().join("downloads").join("datasets")));
    }

    #[test]
    fn preview_applies_market_suffix() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let mut req = DownloadRequest::new("yahoo", "BHP");
        req.market = Some("australia".into());
        req.start = Some("2023-01-01".into());
        req.end = Some("2023-12-31".into());
        req.include_datasource = true;

        let plan = svc.preview_as_of(&req, today()).unwrap();
        assert_eq!(plan.final_ticker, "BHP.AX");
        assert_eq!(plan.file_name(), "BHP_australia_yahoo_2023-01-01_2023-12-31_1d.csv");
    }

    #[test]
    fn preview_rejections() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);

        let req = DownloadRequest::new("bloomberg", "AAPL");
        let err = svc.preview_as_of(&req, today()).unwrap_err();
        assert!(err.to_string().contains("yahoo, polygon, finnhub, fmp, crypto"));

        let req = DownloadRequest::new("crypto", "BTC/USDT");
        let err = svc.preview_as_of(&req, today()).unwrap_err();
        assert!(err.to_string().contains("Exchange is required"));

        let mut req = DownloadRequest::new("yahoo", "AAPL");
        req.interval = "1h".into();
        assert!(matches!(svc.preview_as_of(&req, today()), Err(Error::Validation(_))));

        let mut req = DownloadRequest::new("yahoo", "AAPL");
        req.market = Some("mars".into());
        assert!(matches!(svc.preview_as_of(&req, today()), Err(Error::Validation(_))));

        let mut req = DownloadRequest::new("yahoo", "AAPL");
        req.start = Some("2024-02-01".into());
        req.end = Some("2024-02-01".into());
        assert!(svc.preview_as_of(&req, today()).unwrap_err().to_string().contains("before end"));

        let mut req = DownloadRequest::new("yahoo", "AAPL");
        req.timespan = Some("7X".into());
        assert!(matches!(svc.preview_as_of(&req, today()), Err(Error::Validation(_))));
    }

    #[test]
    fn crypto_names_use_the_exchange() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let mut req = DownloadRequest::new("crypto", "BTC/USDT");
        req.exchange = Some("Binance".into());
        req.interval = "1h".into();
        req.timespan = Some("1D".into());

        let plan = svc.preview_as_of(&req, today()).unwrap();
        assert_eq!(plan.exchange.as_deref(), Some("binance"));
        assert_eq!(plan.final_ticker, "BTC/USDT");
        assert_eq!(plan.file_name(), "BTC-USDT_binance_1day_1h.csv");
    }

    #[test]
    fn listing_and_deleting() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        assert!(svc.list_downloaded_files(&FileFilter::default()).unwrap().is_empty());

        let datasets = svc.settings().datasets_dir();
        fs::create_dir_all(&datasets).unwrap();
        fs::write(datasets.join("AAPL_1year_1d.csv"), "date\n").unwrap();
        fs::write(datasets.join("BTC-USDT_binance_1day_1h.json"), "[]").unwrap();
        fs::write(datasets.join("notes.txt"), "x").unwrap();

        let all = svc.list_downloaded_files(&FileFilter::default()).unwrap();
        assert_eq!(all.len(), 2);

        let binance = svc
            .list_downloaded_files(&FileFilter {
                ticker: Some("BTC/USDT".into()),
                qualifier: Some("binance".into()),
            })
            .unwrap();
        assert_eq!(binance.len(), 1);
        assert_eq!(binance[0].format, OutputFormat::Json);
        assert_eq!(binance[0].interval.to_string(), "1h");

        assert!(svc.delete_downloaded_file(Path::new("AAPL_1year_1d.csv")).unwrap());
        assert!(!svc.delete_downloaded_file(Path::new("AAPL_1year_1d.csv")).unwrap());
        assert!(svc.delete_downloaded_file(&dir.path().join("elsewhere.csv")).is_err());
        assert!(svc.delete_downloaded_file(Path::new("../escape.csv")).is_err());
    }

    #[test]
    fn deleting_before_any_download_reports_missing() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        assert!(!svc.settings().datasets_dir().exists());
        assert!(!svc.delete_downloaded_file(Path::new("AAPL_1year_1d.csv")).unwrap());
    }
}
