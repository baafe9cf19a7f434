//! FinData Core: market data acquisition and persistence.
//!
//! - `data`: request types, the retrying HTTP session, request pacing, and the
//!   fetch client that drives the Yahoo Finance chart and download endpoints
//! - `output`: format encoders and the atomic file writer
//! - `config`: optional TOML defaults for network and output settings
//!
//! The library only emits `tracing` events; installing a subscriber is the
//! binary's job.

pub mod config;
pub mod data;
pub mod output;

pub use config::{ConfigError, FileConfig};
pub use data::{fetch, FetchClient, FetchError, FetchRequest, Interval, Period, PriceTable, TimeRange};
pub use output::{save, OutputFormat, OutputTarget, WriteError};
