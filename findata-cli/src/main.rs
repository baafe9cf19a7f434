//! FinData CLI: download one ticker's price history to a file.
//!
//! ```text
//! findata AAPL --period 1y
//! findata MSFT --start 2020-01-01 --end 2020-12-31 --format parquet --compress
//! findata ^GSPC --years 5 --interval 1wk --format xlsx --output-dir data
//! ```

use anyhow::{Context, Result};
use chrono::{Months, NaiveDate};
use clap::{ArgGroup, Parser};
use findata_core::config::{FileConfig, NetworkSection};
use findata_core::data::{fetch, FetchRequest, Interval, NetworkOptions, Period, TimeRange};
use findata_core::output::{save, OutputFormat, OutputTarget};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "findata",
    version,
    about = "Download stock price history from Yahoo Finance"
)]
#[command(group(
    ArgGroup::new("range")
        .required(true)
        .args(["period", "start", "years"]),
))]
struct Cli {
    /// Ticker symbol (e.g., AAPL, ^GSPC, BRK-B).
    ticker: String,

    /// Named period: 1d, 5d, 1mo, 3mo, 6mo, 1y, 2y, 5y, 10y, ytd, max.
    #[arg(long)]
    period: Option<Period>,

    /// Start date (YYYY-MM-DD).
    #[arg(long)]
    start: Option<NaiveDate>,

    /// End date (YYYY-MM-DD). Defaults to today.
    #[arg(long, requires = "start")]
    end: Option<NaiveDate>,

    /// Window of the last N years, ending today.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=100))]
    years: Option<u32>,

    /// Bar interval: 1m, 2m, 5m, 15m, 30m, 60m, 90m, 1h, 1d, 5d, 1wk, 1mo, 3mo.
    #[arg(long, default_value = "1d")]
    interval: Interval,

    /// Include pre- and post-market bars (intraday only).
    #[arg(long, default_value_t = false)]
    prepost: bool,

    /// Keep raw prices and the adj_close column instead of auto-adjusting.
    #[arg(long, default_value_t = false)]
    no_adjust: bool,

    /// Output format: csv, json, parquet, feather, xlsx. Defaults to csv.
    #[arg(long)]
    format: Option<OutputFormat>,

    /// Output directory. Defaults to the current directory.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Output file name. Defaults to {TICKER}_{range}_{interval}.{ext}.
    #[arg(long)]
    filename: Option<String>,

    /// Compress the output (csv, json, parquet only).
    #[arg(long, default_value_t = false)]
    compress: bool,

    /// Write uncompressed output even when the config file asks for compression.
    #[arg(long, default_value_t = false, conflicts_with = "compress")]
    no_compress: bool,

    /// Replace the output file if it already exists.
    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// Proxy URL; `http://` is assumed when no scheme is given.
    #[arg(long)]
    proxy: Option<String>,

    /// Request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Retries for rate-limited or failing requests.
    #[arg(long)]
    retries: Option<u32>,

    /// Retry backoff factor in seconds.
    #[arg(long)]
    backoff: Option<f64>,

    /// Minimum random pause before each request, in seconds.
    #[arg(long)]
    min_delay: Option<f64>,

    /// Maximum random pause before each request, in seconds.
    #[arg(long)]
    max_delay: Option<f64>,

    /// TOML file with [network] and [output] defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Debug-level logging.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Cli {
    /// Resolve the argument group into a time range, with `today` as the
    /// implicit end.
    fn time_range(&self, today: NaiveDate) -> Result<TimeRange> {
        if let Some(years) = self.years {
            let start = today
                .checked_sub_months(Months::new(12 * years))
                .with_context(|| format!("{years} years before {today} is out of range"))?;
            return TimeRange::between(start, today).map_err(anyhow::Error::msg);
        }
        let end = self.start.map(|_| self.end.unwrap_or(today));
        TimeRange::from_parts(self.period, self.start, end).map_err(anyhow::Error::msg)
    }

    /// Command-line network flags, in the shape of a config file section.
    fn network_overrides(&self) -> NetworkSection {
        NetworkSection {
            proxy: self.proxy.clone(),
            timeout_seconds: self.timeout,
            max_retries: self.retries,
            retry_backoff_factor: self.backoff,
            retryable_status_codes: None,
            min_delay_seconds: self.min_delay,
            max_delay_seconds: self.max_delay,
        }
    }

    fn network_options(&self, config: &FileConfig) -> Result<NetworkOptions> {
        let mut options = config.network_options()?;
        self.network_overrides().apply(&mut options);
        options
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid network options: {e}"))?;
        Ok(options)
    }

    fn output_target(&self, config: &FileConfig, range: &TimeRange) -> OutputTarget {
        let format = self
            .format
            .or(config.output.format)
            .unwrap_or(OutputFormat::Csv);
        let compress = if self.no_compress {
            false
        } else {
            self.compress || config.output.compress.unwrap_or(false)
        };
        let dir = self
            .output_dir
            .clone()
            .or_else(|| config.output.directory.clone())
            .unwrap_or_else(|| PathBuf::from("."));
        let name = self.filename.clone().unwrap_or_else(|| {
            default_filename(&self.ticker, range, self.interval, format, compress)
        });

        OutputTarget::new(dir.join(name), format)
            .compressed(compress)
            .overwriting(self.overwrite)
    }
}

/// `{TICKER}_{range}_{interval}.{ext}`, plus `.gz` when csv/json is compressed.
fn default_filename(
    ticker: &str,
    range: &TimeRange,
    interval: Interval,
    format: OutputFormat,
    compress: bool,
) -> String {
    let mut name = format!(
        "{}_{}_{}.{}",
        sanitize_ticker(ticker),
        range.label(),
        interval,
        format.extension()
    );
    if compress && format.gzip_wrapped() {
        name.push_str(".gz");
    }
    name
}

/// Upper-case the ticker and replace characters unsafe in file names.
fn sanitize_ticker(ticker: &str) -> String {
    ticker
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

/// Filter directives: `RUST_LOG` verbatim when set, otherwise this crate and
/// the core library at info, or debug with `-v`.
fn log_directives(verbose: bool, rust_log: Option<&str>) -> String {
    match rust_log.map(str::trim).filter(|d| !d.is_empty()) {
        Some(directives) => directives.to_string(),
        None => {
            let level = if verbose { "debug" } else { "info" };
            format!("findata_core={level},findata={level}")
        }
    }
}

fn init_logging(verbose: bool) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = EnvFilter::builder().parse_lossy(log_directives(verbose, rust_log.as_deref()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };

    let today = chrono::Local::now().date_naive();
    let range = cli.time_range(today)?;
    let network = cli.network_options(&config)?;
    let target = cli.output_target(&config, &range);

    let request = FetchRequest::new(cli.ticker.clone(), range)
        .with_interval(cli.interval)
        .with_extended_hours(cli.prepost)
        .with_auto_adjust(!cli.no_adjust)
        .with_network(network);

    let table = fetch(&request)?;
    save(&table, &target)?;

    info!(rows = table.len(), path = %target.path.display(), "done");
    println!("{}", target.path.display());
    Ok(())
}
