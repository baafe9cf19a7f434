//! Price source trait, the tabular price model, and structured provider errors.
//!
//! A `PriceSource` exposes the two upstream call shapes the fetch client knows
//! how to use: the chart entry point (primary) and the download entry point
//! (fallback). Sources only talk to the provider; validation and fallback
//! ordering live in [`super::fetch`].

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::request::{FetchRequest, Interval};

/// One OHLCV row as delivered by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub adj_close: Option<f64>,
}

impl Bar {
    /// Rescale open/high/low by `adj_close / close` and replace close with the
    /// adjusted close. Bars without a usable adjusted close are returned as is.
    pub fn auto_adjusted(self) -> Self {
        let Some(adj) = self.adj_close else {
            return self;
        };
        if self.close == 0.0 || !self.close.is_finite() || !adj.is_finite() {
            return self;
        }
        let ratio = adj / self.close;
        Self {
            open: self.open * ratio,
            high: self.high * ratio,
            low: self.low * ratio,
            close: adj,
            adj_close: None,
            ..self
        }
    }
}

/// Price history for a single ticker, indexed by bar timestamp.
///
/// Rows keep the order the provider returned them in.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    ticker: String,
    interval: Interval,
    bars: Vec<Bar>,
}

impl PriceTable {
    pub fn new(ticker: impl Into<String>, interval: Interval, bars: Vec<Bar>) -> Self {
        Self {
            ticker: ticker.into(),
            interval,
            bars,
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Whether the table carries an `adj_close` column.
    pub fn has_adj_close(&self) -> bool {
        self.bars.iter().any(|b| b.adj_close.is_some())
    }

    /// Column names in output order. `date` is the index and always comes first.
    pub fn column_names(&self) -> Vec<&'static str> {
        let mut cols = vec!["date", "open", "high", "low", "close", "volume"];
        if self.has_adj_close() {
            cols.push("adj_close");
        }
        cols
    }

    /// Render a bar's index value: a calendar date for daily-or-coarser data,
    /// a full timestamp for intraday data.
    pub fn date_label(&self, bar: &Bar) -> String {
        if self.interval.is_intraday() {
            bar.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
        } else {
            bar.timestamp.date().format("%Y-%m-%d").to_string()
        }
    }

    /// Apply [`Bar::auto_adjusted`] to every row.
    pub fn into_auto_adjusted(self) -> Self {
        Self {
            bars: self.bars.into_iter().map(Bar::auto_adjusted).collect(),
            ..self
        }
    }
}

/// What an upstream entry point produced when the call itself went through.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceResponse {
    /// The provider answered with nothing at all.
    Missing,
    /// The provider answered with something that is not a price table.
    Unrecognized(String),
    /// A price table, possibly empty.
    Table(Vec<Bar>),
}

/// Result of the minimal recent-window request used to tell an unknown
/// ticker apart from an empty window.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    HasData,
    Empty,
    ProviderError(String),
}

/// Structured error types for provider calls.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("gave up after {attempts} attempts: last status HTTP {status}")]
    RetriesExhausted { status: u16, attempts: u32 },

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("provider rejected the request: {code}: {description}")]
    Rejected { code: String, description: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("session setup failed: {0}")]
    Setup(String),
}

/// An upstream price provider with a primary and a fallback call shape.
///
/// Both entry points take the same request and must honour the same ticker,
/// range, interval and flags.
pub trait PriceSource: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Primary entry point: the whole window in one structured call.
    fn chart(&self, request: &FetchRequest) -> Result<SourceResponse, ProviderError>;

    /// Fallback entry point with equivalent semantics and a different shape.
    fn download(&self, request: &FetchRequest) -> Result<SourceResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(day: u32, close: f64, adj: Option<f64>) -> Bar {
        Bar {
            timestamp: NaiveDate::from_ymd_opt(2024, 1, day)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            open: 100.0,
            high: 110.0,
            low: 90.0,
            close,
            volume: 1_000,
            adj_close: adj,
        }
    }

    #[test]
    fn auto_adjust_scales_ohlc() {
        let adjusted = bar(2, 100.0, Some(50.0)).auto_adjusted();
        assert_eq!(adjusted.open, 50.0);
        assert_eq!(adjusted.high, 55.0);
        assert_eq!(adjusted.low, 45.0);
        assert_eq!(adjusted.close, 50.0);
        assert_eq!(adjusted.adj_close, None);
        assert_eq!(adjusted.volume, 1_000);
    }

    #[test]
    fn auto_adjust_without_adj_close_is_identity() {
        let b = bar(2, 100.0, None);
        assert_eq!(b.clone().auto_adjusted(), b);
    }

    #[test]
    fn auto_adjust_skips_zero_close() {
        let b = bar(2, 0.0, Some(1.0));
        assert_eq!(b.clone().auto_adjusted(), b);
    }

    #[test]
    fn adj_close_column_only_when_present() {
        let plain = PriceTable::new("SPY", Interval::OneDay, vec![bar(2, 1.0, None)]);
        assert_eq!(plain.column_names().len(), 6);
        assert!(!plain.has_adj_close());

        let with_adj = PriceTable::new("SPY", Interval::OneDay, vec![bar(2, 1.0, Some(1.0))]);
        assert_eq!(with_adj.column_names().last(), Some(&"adj_close"));
    }

    #[test]
    fn date_label_depends_on_interval() {
        let b = Bar {
            timestamp: NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
            ..bar(1, 1.0, None)
        };
        let daily = PriceTable::new("SPY", Interval::OneDay, vec![b.clone()]);
        let minute = PriceTable::new("SPY", Interval::FiveMinutes, vec![b.clone()]);
        assert_eq!(daily.date_label(&b), "2024-03-01");
        assert_eq!(minute.date_label(&b), "2024-03-01 09:30:00");
    }
}
