//! Yahoo Finance price source.
//!
//! Two call shapes against the same provider:
//! - chart (primary): `/v8/finance/chart/{ticker}`, JSON, accepts a named
//!   `range` or explicit `period1`/`period2` epoch seconds;
//! - download (fallback): `/v7/finance/download/{ticker}`, CSV, explicit
//!   epochs only, so named periods are resolved against today's date first.
//!
//! Yahoo Finance has no official API and is subject to unannounced format
//! changes. Anything the chart parser cannot make sense of is reported as a
//! provider error so the fetch client moves on to the download shape.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::network::{HttpResponse, HttpSession, NetworkOptions};
use super::provider::{Bar, PriceSource, ProviderError, SourceResponse};
use super::request::{FetchRequest, Interval, TimeRange};

pub const DEFAULT_CHART_BASE: &str = "https://query2.finance.yahoo.com";
pub const DEFAULT_DOWNLOAD_BASE: &str = "https://query1.finance.yahoo.com";

/// Yahoo Finance v8 chart API response.
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
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// One row of the download endpoint's CSV.
#[derive(Debug, Deserialize)]
struct DownloadRow {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Open", default, deserialize_with = "csv::invalid_option")]
    open: Option<f64>,
    #[serde(rename = "High", default, deserialize_with = "csv::invalid_option")]
    high: Option<f64>,
    #[serde(rename = "Low", default, deserialize_with = "csv::invalid_option")]
    low: Option<f64>,
    #[serde(rename = "Close", default, deserialize_with = "csv::invalid_option")]
    close: Option<f64>,
    #[serde(rename = "Adj Close", default, deserialize_with = "csv::invalid_option")]
    adj_close: Option<f64>,
    #[serde(rename = "Volume", default, deserialize_with = "csv::invalid_option")]
    volume: Option<f64>,
}

/// Yahoo Finance price source.
pub struct YahooSource {
    session: HttpSession,
    chart_base: String,
    download_base: String,
}

impl YahooSource {
    /// Source pointing at the production endpoints.
    pub fn new(options: &NetworkOptions) -> Result<Self, ProviderError> {
        Self::with_base_urls(options, DEFAULT_CHART_BASE, DEFAULT_DOWNLOAD_BASE)
    }

    /// Source with custom base URLs. Used for testing with wiremock.
    pub fn with_base_urls(
        options: &NetworkOptions,
        chart_base: &str,
        download_base: &str,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            session: HttpSession::new(options)?,
            chart_base: chart_base.trim_end_matches('/').to_string(),
            download_base: download_base.trim_end_matches('/').to_string(),
        })
    }

    fn chart_url(&self, ticker: &str) -> String {
        format!("{}/v8/finance/chart/{ticker}", self.chart_base)
    }

    fn download_url(&self, ticker: &str) -> String {
        format!("{}/v7/finance/download/{ticker}", self.download_base)
    }
}

impl PriceSource for YahooSource {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn chart(&self, request: &FetchRequest) -> Result<SourceResponse, ProviderError> {
        let url = self.chart_url(&request.ticker);
        let resp = self.session.get(&url, &chart_query(request))?;
        debug!(ticker = %request.ticker, status = resp.status, bytes = resp.body.len(), "chart response");
        parse_chart(&url, &resp, request.interval)
    }

    fn download(&self, request: &FetchRequest) -> Result<SourceResponse, ProviderError> {
        let url = self.download_url(&request.ticker);
        let today = Utc::now().date_naive();
        let resp = self.session.get(&url, &download_query(request, today))?;
        debug!(ticker = %request.ticker, status = resp.status, bytes = resp.body.len(), "download response");
        parse_download(&url, &resp)
    }
}

/// Epoch seconds covering `[start 00:00:00, end 23:59:59]` UTC.
fn epoch_window(start: NaiveDate, end: NaiveDate) -> (i64, i64) {
    let start_ts = start.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
    let end_ts = end
        .and_hms_opt(23, 59, 59)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(start_ts);
    (start_ts, end_ts)
}

fn chart_query(request: &FetchRequest) -> Vec<(&'static str, String)> {
    let mut query = Vec::with_capacity(6);
    match request.range {
        TimeRange::Period(p) => query.push(("range", p.as_str().to_string())),
        TimeRange::Between { start, end } => {
            let (p1, p2) = epoch_window(start, end);
            query.push(("period1", p1.to_string()));
            query.push(("period2", p2.to_string()));
        }
    }
    query.push(("interval", request.interval.as_str().to_string()));
    query.push(("includePrePost", request.include_extended_hours.to_string()));
    query.push(("events", "div,splits".to_string()));
    query.push(("includeAdjustedClose", "true".to_string()));
    query
}

fn download_query(request: &FetchRequest, today: NaiveDate) -> Vec<(&'static str, String)> {
    let (start, end) = request.range.window(today);
    let (p1, p2) = epoch_window(start, end);
    vec![
        ("period1", p1.to_string()),
        ("period2", p2.to_string()),
        ("interval", request.interval.as_str().to_string()),
        ("events", "history".to_string()),
        ("includeAdjustedClose", "true".to_string()),
        ("includePrePost", request.include_extended_hours.to_string()),
    ]
}

/// Exchange-local bar time. Daily-or-coarser bars are pinned to midnight.
fn bar_time(ts: i64, gmtoffset: i64, interval: Interval) -> Option<NaiveDateTime> {
    let local = DateTime::from_timestamp(ts.checked_add(gmtoffset)?, 0)?.naive_utc();
    if interval.is_intraday() {
        Some(local)
    } else {
        Some(local.date().and_time(chrono::NaiveTime::MIN))
    }
}

/// Parse the chart API response into a source response.
fn parse_chart(
    url: &str,
    resp: &HttpResponse,
    interval: Interval,
) -> Result<SourceResponse, ProviderError> {
    if resp.body.trim().is_empty() {
        if resp.is_success() {
            return Ok(SourceResponse::Missing);
        }
        return Err(ProviderError::HttpStatus {
            status: resp.status,
            url: url.to_string(),
        });
    }

    let chart: ChartResponse = match serde_json::from_str(&resp.body) {
        Ok(c) => c,
        Err(_) if !resp.is_success() => {
            return Err(ProviderError::HttpStatus {
                status: resp.status,
                url: url.to_string(),
            })
        }
        Err(e) => return Err(ProviderError::Malformed(format!("chart JSON: {e}"))),
    };

    if let Some(err) = chart.chart.error {
        if err.code == "Not Found" {
            return Ok(SourceResponse::Table(Vec::new()));
        }
        return Err(ProviderError::Rejected {
            code: err.code,
            description: err.description,
        });
    }

    let Some(data) = chart.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(SourceResponse::Missing);
    };

    let Some(timestamps) = data.timestamp else {
        return Ok(SourceResponse::Table(Vec::new()));
    };

    let quote = data.indicators.quote.into_iter().next().unwrap_or_default();
    let adj_closes = data
        .indicators
        .adjclose
        .and_then(|v| v.into_iter().next())
        .map(|a| a.adjclose);

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let timestamp = bar_time(ts, data.meta.gmtoffset, interval)
            .ok_or_else(|| ProviderError::Malformed(format!("invalid timestamp: {ts}")))?;

        let open = quote.open.get(i).copied().flatten();
        let high = quote.high.get(i).copied().flatten();
        let low = quote.low.get(i).copied().flatten();
        let close = quote.close.get(i).copied().flatten();
        let volume = quote.volume.get(i).copied().flatten();
        let adj_close = adj_closes.as_ref().and_then(|v| v.get(i).copied().flatten());

        // Skip bars where all OHLCV are None (holidays/non-trading days)
        if open.is_none() && high.is_none() && low.is_none() && close.is_none() && volume.is_none()
        {
            continue;
        }

        bars.push(Bar {
            timestamp,
            open: open.unwrap_or(f64::NAN),
            high: high.unwrap_or(f64::NAN),
            low: low.unwrap_or(f64::NAN),
            close: close.unwrap_or(f64::NAN),
            volume: volume.unwrap_or(0),
            adj_close,
        });
    }

    Ok(SourceResponse::Table(bars))
}

/// Parse the download endpoint's CSV into a source response.
fn parse_download(url: &str, resp: &HttpResponse) -> Result<SourceResponse, ProviderError> {
    if resp.status == 404 {
        return Ok(SourceResponse::Table(Vec::new()));
    }
    if !resp.is_success() {
        return Err(ProviderError::HttpStatus {
            status: resp.status,
            url: url.to_string(),
        });
    }
    if resp.body.trim().is_empty() {
        return Ok(SourceResponse::Missing);
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(resp.body.as_bytes());

    let has_date = reader
        .headers()
        .map(|h| h.iter().any(|name| name == "Date"))
        .unwrap_or(false);
    if !has_date {
        let kind = resp
            .content_type
            .clone()
            .unwrap_or_else(|| "body without a Date column".to_string());
        return Ok(SourceResponse::Unrecognized(kind));
    }

    let mut bars = Vec::new();
    for (line, row) in reader.deserialize::<DownloadRow>().enumerate() {
        let row = row.map_err(|e| ProviderError::Malformed(format!("CSV row {}: {e}", line + 1)))?;

        if row.open.is_none()
            && row.high.is_none()
            && row.low.is_none()
            && row.close.is_none()
            && row.volume.is_none()
        {
            continue;
        }

        bars.push(Bar {
            timestamp: parse_download_date(&row.date)?,
            open: row.open.unwrap_or(f64::NAN),
            high: row.high.unwrap_or(f64::NAN),
            low: row.low.unwrap_or(f64::NAN),
            close: row.close.unwrap_or(f64::NAN),
            volume: row.volume.map(|v| v.max(0.0).round() as u64).unwrap_or(0),
            adj_close: row.adj_close,
        });
    }

    Ok(SourceResponse::Table(bars))
}

/// Dates come as `YYYY-MM-DD` for daily data and with a time and UTC offset
/// for intraday data. Offsets are dropped to keep exchange-local time.
fn parse_download_date(raw: &str) -> Result<NaiveDateTime, ProviderError> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
        return Ok(dt.naive_local());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map_err(|_| ProviderError::Malformed(format!("unparseable date '{raw}'")))
}
