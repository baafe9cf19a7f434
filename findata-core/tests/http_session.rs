//! Yahoo source and retrying HTTP session against a local mock server.
//!
//! The session is a blocking client, so every fetch runs inside
//! `spawn_blocking` while the mock server lives on the async runtime.

use findata_core::data::{
    FetchClient, FetchError, FetchRequest, HttpSession, NetworkOptions, NoPacing, Period,
    PriceTable, ProviderError, TimeRange, YahooSource,
};
use std::time::{Duration, Instant};
use wiremock::matchers::{header_exists, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CHART_PATH: &str = "/v8/finance/chart/ACME";
const DOWNLOAD_PATH: &str = "/v7/finance/download/ACME";

fn load_fixture(name: &str) -> String {
    let path = format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"));
    std::fs::read_to_string(path).unwrap()
}

fn fast_options(max_retries: u32) -> NetworkOptions {
    NetworkOptions {
        timeout_seconds: 5,
        max_retries,
        retry_backoff_factor: 0.01,
        jittered_delay_range: (0.0, 0.0),
        ..NetworkOptions::default()
    }
}

async fn fetch_from(
    server: &MockServer,
    options: NetworkOptions,
    request: FetchRequest,
) -> Result<PriceTable, FetchError> {
    let base = server.uri();
    tokio::task::spawn_blocking(move || {
        let source = YahooSource::with_base_urls(&options, &base, &base).unwrap();
        FetchClient::new(Box::new(source), Box::new(NoPacing)).fetch(&request)
    })
    .await
    .unwrap()
}

fn acme_1y() -> FetchRequest {
    FetchRequest::new("ACME", TimeRange::Period(Period::OneYear)).with_auto_adjust(false)
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.map(|r| r.len()).unwrap_or(0)
}

// ── Chart endpoint ──────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn chart_success_sends_range_and_browser_headers() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(CHART_PATH))
        .and(query_param("range", "1y"))
        .and(query_param("interval", "1d"))
        .and(header_exists("user-agent"))
        .and(header_exists("referer"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(load_fixture("chart_daily.json"), "application/json"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let table = fetch_from(&server, fast_options(0), acme_1y()).await.unwrap();
    assert_eq!(table.len(), 5);
    assert_eq!(
        table.column_names(),
        vec!["date", "open", "high", "low", "close", "volume", "adj_close"]
    );
    assert_eq!(table.bars()[0].open, 187.15);
    assert_eq!(table.bars()[4].volume, 59_144_500);
}

#[tokio::test(flavor = "multi_thread")]
async fn not_found_ticker_is_reported_as_invalid() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/v8/finance/chart/"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_raw(load_fixture("chart_not_found.json"), "application/json"),
        )
        .mount(&server)
        .await;

    let err = fetch_from(&server, fast_options(2), acme_1y())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::TickerInvalidOrDelisted { .. }));
    // Data request plus probe, 404 is never retried.
    assert_eq!(request_count(&server).await, 2);
}

// ── Retries ─────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn transient_503_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(CHART_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(CHART_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(load_fixture("chart_daily.json"), "application/json"),
        )
        .mount(&server)
        .await;

    let table = fetch_from(&server, fast_options(3), acme_1y()).await.unwrap();
    assert_eq!(table.len(), 5);
    assert_eq!(request_count(&server).await, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_after_header_overrides_backoff() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(CHART_PATH))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(CHART_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(load_fixture("chart_daily.json"), "application/json"),
        )
        .mount(&server)
        .await;

    // A computed backoff of 60s would blow the time budget below.
    let options = NetworkOptions {
        retry_backoff_factor: 60.0,
        ..fast_options(1)
    };
    let started = Instant::now();
    let table = fetch_from(&server, options, acme_1y()).await.unwrap();
    assert_eq!(table.len(), 5);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_on_both_entry_points() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = fetch_from(&server, fast_options(2), acme_1y())
        .await
        .unwrap_err();
    let FetchError::Upstream {
        primary, fallback, ..
    } = err
    else {
        panic!("expected an Upstream error");
    };
    assert!(matches!(
        primary,
        ProviderError::RetriesExhausted {
            status: 503,
            attempts: 3
        }
    ));
    assert!(matches!(
        fallback,
        ProviderError::RetriesExhausted { status: 503, .. }
    ));
    assert_eq!(request_count(&server).await, 6);
}

#[tokio::test(flavor = "multi_thread")]
async fn session_returns_non_retryable_status_untouched() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/anything"))
        .respond_with(ResponseTemplate::new(401).set_body_string("denied"))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/anything", server.uri());
    let resp = tokio::task::spawn_blocking(move || {
        HttpSession::new(&fast_options(3)).unwrap().get(&url, &[])
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(resp.status, 401);
    assert_eq!(resp.body, "denied");
    assert!(!resp.is_success());
}

#[tokio::test(flavor = "multi_thread")]
async fn timeouts_are_retried_then_reported() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let options = NetworkOptions {
        timeout_seconds: 1,
        ..fast_options(2)
    };
    let url = format!("{}/slow", server.uri());
    let result =
        tokio::task::spawn_blocking(move || HttpSession::new(&options).unwrap().get(&url, &[]))
            .await
            .unwrap();
    assert!(matches!(result, Err(ProviderError::Network(_))));
    assert_eq!(request_count(&server).await, 3);
}

// ── Proxy ───────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn requests_route_through_bare_host_port_proxy() {
    let proxy = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/ACME"))
        .respond_with(ResponseTemplate::new(200).set_body_string("via proxy"))
        .expect(1)
        .mount(&proxy)
        .await;

    // No scheme: the session has to add one.
    let options = NetworkOptions {
        proxy: Some(proxy.address().to_string()),
        ..fast_options(0)
    };
    let resp = tokio::task::spawn_blocking(move || {
        HttpSession::new(&options)
            .unwrap()
            .get("http://finance.invalid/v8/finance/chart/ACME", &[])
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, "via proxy");
}

// ── Fallback ────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn malformed_chart_falls_back_to_download() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(CHART_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not valid json}"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(DOWNLOAD_PATH))
        .and(query_param("interval", "1d"))
        .and(query_param("events", "history"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(load_fixture("download_daily.csv"), "text/csv"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let table = fetch_from(&server, fast_options(0), acme_1y()).await.unwrap();
    assert_eq!(table.len(), 3);
    assert!(table.has_adj_close());
    assert_eq!(table.date_label(&table.bars()[2]), "2024-01-04");
}

#[tokio::test(flavor = "multi_thread")]
async fn html_from_both_entry_points_is_an_invalid_response_type() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><body>Will be right back</body></html>", "text/html"),
        )
        .mount(&server)
        .await;

    let err = fetch_from(&server, fast_options(0), acme_1y())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FetchError::InvalidResponseType { ref kind, .. } if kind.starts_with("text/html")
    ));
}
