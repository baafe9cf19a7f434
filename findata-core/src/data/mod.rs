//! Data acquisition: request types, network session, pacing, price sources
//! and the fetch client.

pub mod fetch;
pub mod network;
pub mod pacing;
pub mod provider;
pub mod request;
pub mod yahoo;

pub use fetch::{fetch, FetchClient, FetchError};
pub use network::{normalize_proxy, HttpSession, NetworkOptions, RetryPolicy};
pub use pacing::{JitteredPacer, NoPacing, Pacer};
pub use provider::{Bar, PriceSource, PriceTable, ProbeOutcome, ProviderError, SourceResponse};
pub use request::{FetchRequest, Interval, Period, TimeRange};
pub use yahoo::YahooSource;
