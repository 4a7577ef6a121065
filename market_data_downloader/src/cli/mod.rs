//! Command-line front end.

pub mod commands;

use std::io::{self, Write};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

pub use commands::Cli;

use crate::config::Settings;
use crate::service::{DownloadService, FileFilter};

/// Executes a parsed command line, printing to stdout.
pub async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    debug!(?settings, "using settings");
    let service = DownloadService::new(settings);
    execute(&cli, &service, &mut io::stdout()).await
}

/// Executes a parsed command line against `service`, writing the report to `out`.
pub async fn execute<W: Write>(cli: &Cli, service: &DownloadService, out: &mut W) -> Result<()> {
    if cli.is_maintenance() {
        return maintenance(cli, service, out);
    }

    let request = cli.download_request()?;
    if cli.dry_run {
        let plan = service.preview(&request)?;
        if cli.json {
            return write_json(out, &plan);
        }
        writeln!(out, "Datasource:   {}", plan.datasource)?;
        writeln!(out, "Ticker:       {} (requested as {})", plan.final_ticker, plan.ticker)?;
        if let Some(exchange) = &plan.exchange {
            writeln!(out, "Exchange:     {exchange}")?;
        }
        writeln!(out, "Market:       {}", plan.market.label)?;
        writeln!(out, "Range:        {} to {}", plan.start, plan.end)?;
        writeln!(out, "Interval:     {}", plan.timeframe)?;
        writeln!(out, "Output:       {}", plan.output_path.display())?;
        return Ok(());
    }

    let result = service.download(&request).await?;
    if cli.json {
        return write_json(out, &result);
    }
    writeln!(
        out,
        "Downloaded {} rows for {} ({} to {})",
        result.rows,
        result.plan.final_ticker,
        result.first.format("%Y-%m-%d"),
        result.last.format("%Y-%m-%d")
    )?;
    writeln!(out, "Saved to {}", result.path.display())?;
    Ok(())
}

fn write_json<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn maintenance<W: Write>(cli: &Cli, service: &DownloadService, out: &mut W) -> Result<()> {
    if cli.list_datasources {
        let infos = service.datasource_info();
        if cli.json {
            write_json(out, &infos)?;
        } else {
            writeln!(out, "Available data sources:")?;
            for info in infos {
                let mut notes = Vec::new();
                if let Some(env) = info.api_key_env {
                    notes.push(format!("API key: ${env}"));
                }
                if info.requires_exchange {
                    notes.push("requires --exchange".to_string());
                }
                let intervals: Vec<String> =
                    info.timeframes.iter().map(ToString::to_string).collect();
                writeln!(out, "  {:<8} {}", info.name, info.description)?;
                writeln!(out, "           intervals: {}", intervals.join(", "))?;
                if !notes.is_empty() {
                    writeln!(out, "           {}", notes.join("; "))?;
                }
            }
        }
    }

    if cli.list_markets {
        if cli.json {
            write_json(out, service.markets())?;
        } else {
            writeln!(out, "Available markets:")?;
            for market in service.markets() {
                let suffix = match market.ticker_suffix {
                    "" => "-",
                    suffix => suffix,
                };
                writeln!(out, "  {:<10} {:<24} suffix {suffix}", market.name, market.label)?;
            }
        }
    }

    if cli.list_timespans {
        if cli.json {
            let spans: Vec<_> = service
                .timespans()
                .iter()
                .map(|ts| json!({ "token": ts, "description": ts.description() }))
                .collect();
            write_json(out, &spans)?;
        } else {
            writeln!(out, "Available timespans:")?;
            for ts in service.timespans() {
                writeln!(out, "  {:<4} {}", ts.token(), ts.description())?;
            }
        }
    }

    if cli.list_files {
        let filter = FileFilter {
            ticker: cli.ticker.clone(),
            qualifier: cli.exchange.clone().or_else(|| cli.market.clone()),
        };
        let files = service.list_downloaded_files(&filter)?;
        if cli.json {
            write_json(out, &files)?;
        } else {
            if files.is_empty() {
                let dir = service.settings().datasets_dir();
                writeln!(out, "No downloaded files in {}", dir.display())?;
            }
            for file in files {
                writeln!(
                    out,
                    "  {:<48} {:>10} bytes  {}",
                    file.file_name,
                    file.size_bytes,
                    file.modified.format("%Y-%m-%d %H:%M")
                )?;
            }
        }
    }

    if let Some(path) = &cli.delete_file {
        if !service.delete_downloaded_file(path)? {
            anyhow::bail!("{} does not exist", path.display());
        }
        if cli.json {
            write_json(out, &json!({ "deleted": path }))?;
        } else {
            writeln!(out, "Deleted {}", path.display())?;
        }
    }

    Ok(())
}
