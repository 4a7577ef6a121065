use std::path::PathBuf;

use clap::{CommandFactory, Parser, error::ErrorKind};

use crate::io::OutputFormat;
use crate::service::DownloadRequest;

#[derive(Parser, Debug)]
#[command(
    name = "market-data-download",
    author,
    version,
    about = "Download historical OHLCV data for stocks and crypto pairs"
)]
pub struct Cli {
    /// List the available data sources and exit
    #[arg(long)]
    pub list_datasources: bool,

    /// List the market configurations and exit
    #[arg(long)]
    pub list_markets: bool,

    /// List the shorthand timespans and exit
    #[arg(long)]
    pub list_timespans: bool,

    /// List previously downloaded files (filtered by --ticker/--exchange/--market) and exit
    #[arg(long)]
    pub list_files: bool,

    /// Delete a downloaded file (name or path inside the datasets directory) and exit
    #[arg(long, value_name = "FILE")]
    pub delete_file: Option<PathBuf>,

    /// Data source (yahoo, polygon, finnhub, fmp, crypto)
    #[arg(short, long)]
    pub datasource: Option<String>,

    /// Ticker symbol (e.g. AAPL, BHP, BTC/USDT)
    #[arg(short, long)]
    pub ticker: Option<String>,

    /// Exchange for the crypto data source (binance, kraken, coinbase)
    #[arg(short, long)]
    pub exchange: Option<String>,

    /// Market configuration (defaults to $DOWNLOAD_MARKET or america)
    #[arg(short, long)]
    pub market: Option<String>,

    /// Start date (YYYY-MM-DD)
    #[arg(long)]
    pub start: Option<String>,

    /// End date (YYYY-MM-DD)
    #[arg(long)]
    pub end: Option<String>,

    /// Shorthand timespan (1D 5D 10D 1W 2W 1M 3M 6M YTD 1Y 2Y 3Y 5Y); default 1Y
    #[arg(long)]
    pub timespan: Option<String>,

    /// Bar interval (1m 5m 15m 30m 1h 2h 4h 6h 12h 1d 1wk 1mo)
    #[arg(short, long, default_value = "1d")]
    pub interval: String,

    /// Output format
    #[arg(short, long, default_value = "csv")]
    pub format: OutputFormat,

    /// Output file (defaults to a generated name in the datasets directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Add the data source name to the generated file name
    #[arg(long)]
    pub include_datasource: bool,

    /// Validate and print the download plan without fetching
    #[arg(long)]
    pub dry_run: bool,

    /// Print plans, results and listings as JSON
    #[arg(long)]
    pub json: bool,

    /// Settings file (defaults to $MARKET_DATA_HOME/config.toml)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Whether the invocation only lists or deletes and needs no download arguments.
    pub fn is_maintenance(&self) -> bool {
        self.list_datasources
            || self.list_markets
            || self.list_timespans
            || self.list_files
            || self.delete_file.is_some()
    }

    /// Builds the download request, or a usage error naming the missing flags.
    pub fn download_request(&self) -> Result<DownloadRequest, clap::Error> {
        let (Some(datasource), Some(ticker)) = (&self.datasource, &self.ticker) else {
            let missing: Vec<&str> = [
                self.datasource.is_none().then_some("--datasource"),
                self.ticker.is_none().then_some("--ticker"),
            ]
            .into_iter()
            .flatten()
            .collect();
            return Err(Cli::command().error(
                ErrorKind::MissingRequiredArgument,
                format!("{} required unless listing", missing.join(" and ")),
            ));
        };

        Ok(DownloadRequest {
            datasource: datasource.clone(),
            ticker: ticker.clone(),
            interval: self.interval.clone(),
            timespan: self.timespan.clone(),
            start: self.start.clone(),
            end: self.end.clone(),
            exchange: self.exchange.clone(),
            market: self.market.clone(),
            format: self.format,
            output: self.output.clone(),
            include_datasource: self.include_datasource,
        })
    }
}
