//! Optional TOML configuration file.
//!
//! ```toml
//! [network]
//! proxy = "127.0.0.1:8080"
//! timeout_seconds = 20
//! max_retries = 5
//! retry_backoff_factor = 1.0
//! retryable_status_codes = [429, 503]
//! min_delay_seconds = 0.5
//! max_delay_seconds = 2.0
//!
//! [output]
//! directory = "data"
//! format = "parquet"
//! compress = true
//! ```
//!
//! Every key is optional. Unknown keys are rejected so typos surface early.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::data::NetworkOptions;
use crate::output::OutputFormat;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {}: {message}", .path.display())]
    Read { path: PathBuf, message: String },

    #[error("parse config TOML: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkSection {
    pub proxy: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_backoff_factor: Option<f64>,
    pub retryable_status_codes: Option<BTreeSet<u16>>,
    pub min_delay_seconds: Option<f64>,
    pub max_delay_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSection {
    pub directory: Option<PathBuf>,
    pub format: Option<OutputFormat>,
    pub compress: Option<bool>,
}

/// The complete configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub output: OutputSection,
}

impl FileConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.network_options().map(|_| config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Built-in network defaults with this file's values laid over them.
    pub fn network_options(&self) -> Result<NetworkOptions, ConfigError> {
        let mut options = NetworkOptions::default();
        self.network.apply(&mut options);
        options.validate().map_err(ConfigError::Invalid)?;
        Ok(options)
    }
}

impl NetworkSection {
    /// Overwrite the fields of `options` that this section sets.
    pub fn apply(&self, options: &mut NetworkOptions) {
        if let Some(proxy) = &self.proxy {
            options.proxy = Some(proxy.clone());
        }
        if let Some(timeout) = self.timeout_seconds {
            options.timeout_seconds = timeout;
        }
        if let Some(retries) = self.max_retries {
            options.max_retries = retries;
        }
        if let Some(factor) = self.retry_backoff_factor {
            options.retry_backoff_factor = factor;
        }
        if let Some(codes) = &self.retryable_status_codes {
            options.retryable_status_codes = codes.clone();
        }
        let (min, max) = options.jittered_delay_range;
        options.jittered_delay_range = (
            self.min_delay_seconds.unwrap_or(min),
            self.max_delay_seconds.unwrap_or(max),
        );
    }
}
