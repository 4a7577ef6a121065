use std::{
    fs,
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
};

use market_data_downloader::{
    Error,
    config::Settings,
    io::OutputFormat,
    models::{asset::AssetClass, timeframe::TimeFrame},
    providers::{
        MissingExchangeSnafu,
        registry::{ProviderDescriptor, ProviderOptions, ProviderRegistry},
    },
    service::{DownloadRequest, DownloadService, FileFilter},
};
use mockito::{Matcher, Server, ServerGuard};
use tempfile::TempDir;

const JAN_1_MS: i64 = 1_704_067_200_000;
const HOUR_MS: i64 = 3_600_000;

/// A Binance kline row for the hour starting at `open_ms`.
fn kline(open_ms: i64, price: f64) -> String {
    format!(
        r#"[{open_ms},"{price:.2}","{:.2}","{:.2}","{:.2}","1.5",{},
        "63000.0",120,"0.7","29400.0","0"]"#,
        price + 10.0,
        price - 10.0,
        price + 5.0,
        open_ms + HOUR_MS - 1,
    )
}

fn klines(hours: std::ops::Range<i64>) -> String {
    let rows: Vec<String> = hours
        .map(|h| kline(JAN_1_MS + h * HOUR_MS, 42_000.0 + h as f64))
        .collect();
    format!("[{}]", rows.join(","))
}

fn service(home: &TempDir, server: &ServerGuard) -> DownloadService {
    DownloadService::new(Settings::with_home(home.path()))
        .with_provider_options(ProviderOptions::default().with_base_url(server.url()))
}

fn btc_request() -> DownloadRequest {
    let mut request = DownloadRequest::new("crypto", "BTC/USDT");
    request.exchange = Some("binance".into());
    request.interval = "1h".into();
    request.start = Some("2024-01-01".into());
    request.end = Some("2024-01-02".into());
    request
}

fn start_time(ms: i64) -> Matcher {
    Matcher::AllOf(vec![
        Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
        Matcher::UrlEncoded("interval".into(), "1h".into()),
        Matcher::UrlEncoded("startTime".into(), ms.to_string()),
    ])
}

#[tokio::test]
async fn hourly_crypto_download_writes_one_row_per_candle() {
    let home = TempDir::new().unwrap();
    let mut server = Server::new_async().await;
    let first = server
        .mock("GET", "/api/v3/klines")
        .match_query(start_time(JAN_1_MS))
        .with_status(200)
        .with_body(klines(0..24))
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("GET", "/api/v3/klines")
        .match_query(start_time(JAN_1_MS + 23 * HOUR_MS + 1))
        .with_status(200)
        .with_body("[]")
        .expect(1)
        .create_async()
        .await;

    let result = service(&home, &server).download(&btc_request()).await.unwrap();

    first.assert_async().await;
    second.assert_async().await;
    assert_eq!(result.rows, 24);
    assert_eq!(
        result.path.file_name().unwrap().to_str().unwrap(),
        "BTC-USDT_binance_2024-01-01_2024-01-02_1h.csv"
    );
    assert!(result.path.starts_with(home.path().join("downloads").join("datasets")));

    let contents = fs::read_to_string(&result.path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 25);
    assert_eq!(lines[0], "date,open,high,low,close,volume");
    assert!(lines[1].starts_with("2024-01-01T00:00:00Z,42000"), "{}", lines[1]);
    assert!(lines[24].starts_with("2024-01-01T23:00:00Z,"), "{}", lines[24]);
    assert!(lines[1..].iter().all(|l| l.split(',').count() == 6));
}

#[tokio::test]
async fn overlapping_pages_are_merged_without_duplicates() {
    let home = TempDir::new().unwrap();
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/v3/klines")
        .match_query(start_time(JAN_1_MS))
        .with_body(klines(0..13))
        .create_async()
        .await;
    // This page repeats the 12:00 candle the first page ended with.
    server
        .mock("GET", "/api/v3/klines")
        .match_query(start_time(JAN_1_MS + 12 * HOUR_MS + 1))
        .with_body(klines(12..24))
        .create_async()
        .await;
    server
        .mock("GET", "/api/v3/klines")
        .match_query(start_time(JAN_1_MS + 23 * HOUR_MS + 1))
        .with_body("[]")
        .create_async()
        .await;

    let mut request = btc_request();
    request.format = OutputFormat::Json;
    let result = service(&home, &server).download(&request).await.unwrap();

    assert_eq!(result.rows, 24);
    assert_eq!(result.path.extension().unwrap(), "json");
    let rows: Vec<serde_json::Value> =
        serde_json::from_str(&fs::read_to_string(&result.path).unwrap()).unwrap();
    assert_eq!(rows.len(), 24);
    let dates: Vec<&str> = rows.iter().map(|r| r["date"].as_str().unwrap()).collect();
    let mut unique = dates.clone();
    unique.dedup();
    assert_eq!(unique.len(), 24);
    assert_eq!(dates[12], "2024-01-01T12:00:00Z");
}

#[tokio::test]
async fn empty_result_is_not_found_and_writes_nothing() {
    let home = TempDir::new().unwrap();
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/v3/klines")
        .match_query(Matcher::Any)
        .with_body("[]")
        .create_async()
        .await;

    let svc = service(&home, &server);
    let plan = svc.preview(&btc_request()).unwrap();
    let err = svc.download(&btc_request()).await.unwrap_err();

    assert!(matches!(err, Error::NotFound(_)), "{err:?}");
    assert!(!plan.output_path.exists());
    assert!(svc.list_downloaded_files(&FileFilter::default()).unwrap().is_empty());
}

static CONSTRUCTED: AtomicUsize = AtomicUsize::new(0);

#[tokio::test]
async fn unknown_datasource_is_rejected_before_any_request() {
    let home = TempDir::new().unwrap();
    let mut server = Server::new_async().await;
    let mock = server.mock("GET", Matcher::Any).expect(0).create_async().await;

    let mut registry = ProviderRegistry::empty();
    registry.register(
        ProviderDescriptor {
            name: "counting",
            description: "counts constructor calls",
            asset_class: AssetClass::Stock,
            api_key_env: None,
            requires_exchange: false,
            timeframes: vec![TimeFrame::day()],
        },
        |_| {
            CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
            MissingExchangeSnafu { provider: "counting" }.fail()
        },
    );
    let svc = DownloadService::with_registry(Settings::with_home(home.path()), registry)
        .with_provider_options(ProviderOptions::default().with_base_url(server.url()));

    let err = svc
        .download(&DownloadRequest::new("bloomberg", "AAPL"))
        .await
        .unwrap_err();

    match err {
        Error::Validation(msg) => {
            assert!(msg.contains("Unknown datasource 'bloomberg'"), "{msg}");
            assert!(msg.contains("counting"), "{msg}");
        }
        other => panic!("expected a validation error, got {other:?}"),
    }
    assert_eq!(CONSTRUCTED.load(Ordering::SeqCst), 0);
    mock.assert_async().await;
}

#[tokio::test]
async fn missing_exchange_is_a_validation_error() {
    let home = TempDir::new().unwrap();
    let server = Server::new_async().await;
    let mut request = btc_request();
    request.exchange = None;

    let err = service(&home, &server).download(&request).await.unwrap_err();
    assert!(
        matches!(err, Error::Validation(ref m) if m.contains("Exchange is required")),
        "{err:?}"
    );
}

#[tokio::test]
async fn downloaded_files_can_be_listed_and_deleted() {
    let home = TempDir::new().unwrap();
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/v3/klines")
        .match_query(start_time(JAN_1_MS))
        .with_body(klines(0..24))
        .create_async()
        .await;
    server
        .mock("GET", "/api/v3/klines")
        .match_query(start_time(JAN_1_MS + 23 * HOUR_MS + 1))
        .with_body("[]")
        .create_async()
        .await;

    let svc = service(&home, &server);
    let result = svc.download(&btc_request()).await.unwrap();

    let files = svc
        .list_downloaded_files(&FileFilter {
            ticker: Some("BTC/USDT".into()),
            qualifier: Some("binance".into()),
        })
        .unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, result.path);
    assert_eq!(files[0].interval.to_string(), "1h");
    assert_eq!(files[0].format, OutputFormat::Csv);

    let name = files[0].file_name.clone();
    assert!(svc.delete_downloaded_file(Path::new(&name)).unwrap());
    assert!(!result.path.exists());
    assert!(!svc.delete_downloaded_file(Path::new(&name)).unwrap());
}
