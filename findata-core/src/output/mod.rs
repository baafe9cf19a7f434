//! Persistence writer: one price table, one file.
//!
//! Writes are atomic: bytes go to `{path}.tmp` and are renamed into place,
//! so a failed save never leaves a partial output file behind. Existing files
//! are only replaced when the target asks for it.

pub mod encode;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{error, info};

use crate::data::PriceTable;

pub use encode::{encode, to_dataframe};

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Json,
    Parquet,
    Feather,
    Xlsx,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 5] = [
        OutputFormat::Csv,
        OutputFormat::Json,
        OutputFormat::Parquet,
        OutputFormat::Feather,
        OutputFormat::Xlsx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
            OutputFormat::Parquet => "parquet",
            OutputFormat::Feather => "feather",
            OutputFormat::Xlsx => "xlsx",
        }
    }

    /// File extension, without the dot.
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// csv and json are gzip-wrapped; parquet uses its gzip codec.
    pub fn supports_compression(&self) -> bool {
        matches!(
            self,
            OutputFormat::Csv | OutputFormat::Json | OutputFormat::Parquet
        )
    }

    /// Whether compression wraps the whole file (and so earns a `.gz` suffix).
    pub fn gzip_wrapped(&self) -> bool {
        matches!(self, OutputFormat::Csv | OutputFormat::Json)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = WriteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        OutputFormat::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or(WriteError::UnsupportedFormat(s))
    }
}

/// Where and how to write a price table.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTarget {
    pub path: PathBuf,
    pub format: OutputFormat,
    pub compress: bool,
    pub overwrite: bool,
}

impl OutputTarget {
    /// Uncompressed, never overwriting.
    pub fn new(path: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            path: path.into(),
            format,
            compress: false,
            overwrite: false,
        }
    }

    pub fn compressed(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn overwriting(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("no data to write")]
    NoData,

    #[error("output file already exists: {} (pass overwrite to replace it)", .0.display())]
    AlreadyExists(PathBuf),

    #[error("unsupported format '{0}'. Valid: csv, json, parquet, feather, xlsx")]
    UnsupportedFormat(String),

    #[error("compression unsupported for {0} output")]
    CompressionUnsupported(OutputFormat),

    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("I/O error on {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },
}

/// Write `data` to `target`.
///
/// Checks run cheapest-first: empty data and format/compression mismatches
/// are rejected before the filesystem is touched.
pub fn save(data: &PriceTable, target: &OutputTarget) -> Result<(), WriteError> {
    save_inner(data, target).map_err(|e| {
        error!(path = %target.path.display(), error = %e, "save failed");
        e
    })
}

fn save_inner(data: &PriceTable, target: &OutputTarget) -> Result<(), WriteError> {
    if data.is_empty() {
        return Err(WriteError::NoData);
    }
    if target.compress && !target.format.supports_compression() {
        return Err(WriteError::CompressionUnsupported(target.format));
    }
    if target.path.exists() && !target.overwrite {
        return Err(WriteError::AlreadyExists(target.path.clone()));
    }

    let bytes = encode(data, target.format, target.compress)?;

    if let Some(parent) = target.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| WriteError::Io {
            path: parent.to_path_buf(),
            message: format!("failed to create directory: {e}"),
        })?;
    }

    write_atomic(&target.path, &bytes)?;

    info!(
        path = %target.path.display(),
        ticker = data.ticker(),
        rows = data.len(),
        format = %target.format,
        compressed = target.compress,
        "saved price history"
    );
    Ok(())
}

/// Write to a temporary sibling, then rename into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), WriteError> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, bytes).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        WriteError::Io {
            path: tmp_path.clone(),
            message: format!("write failed: {e}"),
        }
    })?;

    fs::rename(&tmp_path, path).map_err(|e| {
        // Clean up temp file on rename failure
        let _ = fs::remove_file(&tmp_path);
        WriteError::Io {
            path: path.to_path_buf(),
            message: format!("atomic rename failed: {e}"),
        }
    })
}
