//! Fetch client: pacing, primary → fallback ordering, and result validation.
//!
//! The session's retry policy absorbs transient HTTP failures. What reaches
//! this layer as an error from the chart entry point is a failure of that
//! call's shape (unparsable body, rejected parameters, exhausted retries),
//! and is answered by trying the download entry point once. Results are all
//! or nothing: a fetch either yields a non-empty table or an error.

use thiserror::Error;
use tracing::{error, info, warn};

use super::network::NetworkOptions;
use super::pacing::{JitteredPacer, Pacer};
use super::provider::{PriceSource, PriceTable, ProbeOutcome, ProviderError, SourceResponse};
use super::request::FetchRequest;
use super::yahoo::YahooSource;

/// Why no dataset could be produced.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("network session setup failed: {0}")]
    Session(String),

    #[error("no data received for {ticker}")]
    NoData { ticker: String },

    #[error("invalid response type for {ticker}: {kind}")]
    InvalidResponseType { ticker: String, kind: String },

    #[error("ticker invalid or delisted: {ticker}")]
    TickerInvalidOrDelisted { ticker: String },

    #[error("no data for requested parameters: {ticker} has no rows in that window/interval")]
    NoDataForParameters { ticker: String },

    #[error("both fetch strategies failed for {ticker} (primary: {primary}; fallback: {fallback})")]
    Upstream {
        ticker: String,
        primary: ProviderError,
        fallback: ProviderError,
    },
}

/// Fetches one ticker's history through a [`PriceSource`].
pub struct FetchClient {
    source: Box<dyn PriceSource>,
    pacer: Box<dyn Pacer>,
}

impl FetchClient {
    pub fn new(source: Box<dyn PriceSource>, pacer: Box<dyn Pacer>) -> Self {
        Self { source, pacer }
    }

    /// Yahoo Finance client with a session and pacer built from `options`.
    pub fn yahoo(options: &NetworkOptions) -> Result<Self, FetchError> {
        options.validate().map_err(FetchError::InvalidRequest)?;
        let source =
            YahooSource::new(options).map_err(|e| FetchError::Session(e.to_string()))?;
        Ok(Self::new(
            Box::new(source),
            Box::new(JitteredPacer::from_options(options)),
        ))
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Fetch the requested history. Never returns an empty table.
    pub fn fetch(&self, request: &FetchRequest) -> Result<PriceTable, FetchError> {
        let ticker = request.ticker.as_str();
        if let Err(reason) = request.validate() {
            return Err(logged(ticker, FetchError::InvalidRequest(reason)));
        }

        info!(
            ticker,
            range = %request.range,
            interval = %request.interval,
            source = self.source.name(),
            "fetching price history"
        );

        let bars = match self.call_with_fallback(request)? {
            SourceResponse::Missing => {
                return Err(logged(ticker, FetchError::NoData { ticker: ticker.into() }))
            }
            SourceResponse::Unrecognized(kind) => {
                return Err(logged(
                    ticker,
                    FetchError::InvalidResponseType {
                        ticker: ticker.into(),
                        kind,
                    },
                ))
            }
            SourceResponse::Table(bars) => bars,
        };

        if bars.is_empty() {
            let err = match self.probe(request) {
                ProbeOutcome::Empty => FetchError::TickerInvalidOrDelisted {
                    ticker: ticker.into(),
                },
                ProbeOutcome::HasData => FetchError::NoDataForParameters {
                    ticker: ticker.into(),
                },
                ProbeOutcome::ProviderError(reason) => {
                    warn!(ticker, reason = %reason, "probe failed, cannot rule the ticker out");
                    FetchError::NoDataForParameters {
                        ticker: ticker.into(),
                    }
                }
            };
            return Err(logged(ticker, err));
        }

        let table = PriceTable::new(ticker, request.interval, bars);
        let table = if request.auto_adjust {
            table.into_auto_adjusted()
        } else {
            table
        };
        info!(ticker, rows = table.len(), "fetched price history");
        Ok(table)
    }

    /// Check whether the ticker has any recent data at all.
    pub fn probe(&self, request: &FetchRequest) -> ProbeOutcome {
        let probe = request.probe();
        self.pacer.pause();
        match self.source.chart(&probe) {
            Ok(SourceResponse::Table(bars)) if !bars.is_empty() => ProbeOutcome::HasData,
            Ok(_) => ProbeOutcome::Empty,
            Err(e) => ProbeOutcome::ProviderError(e.to_string()),
        }
    }

    fn call_with_fallback(&self, request: &FetchRequest) -> Result<SourceResponse, FetchError> {
        let ticker = request.ticker.as_str();

        self.pacer.pause();
        let primary = match self.source.chart(request) {
            Ok(resp) => return Ok(resp),
            Err(e) => e,
        };
        warn!(ticker, error = %primary, "primary fetch failed, trying fallback");

        self.pacer.pause();
        self.source.download(request).map_err(|fallback| {
            logged(
                ticker,
                FetchError::Upstream {
                    ticker: ticker.into(),
                    primary,
                    fallback,
                },
            )
        })
    }
}

/// Build a Yahoo client from the request's own network options and fetch.
pub fn fetch(request: &FetchRequest) -> Result<PriceTable, FetchError> {
    FetchClient::yahoo(&request.network)
        .map_err(|e| logged(&request.ticker, e))?
        .fetch(request)
}

fn logged(ticker: &str, err: FetchError) -> FetchError {
    error!(ticker, error = %err, "fetch failed");
    err
}
