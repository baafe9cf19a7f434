//! Format encoders. Each turns a price table into the exact bytes that land
//! on disk.

use chrono::{Datelike, NaiveDate, Timelike};
use flate2::write::GzEncoder;
use flate2::Compression;
use polars::prelude::*;
use rust_xlsxwriter::{ExcelDateTime, Format, Workbook, XlsxError};
use serde::Serialize;
use std::io::Write;

use super::{OutputFormat, WriteError};
use crate::data::{Bar, PriceTable};

/// Encode `table` in `format`. `compress` must already be validated against
/// the format.
pub fn encode(table: &PriceTable, format: OutputFormat, compress: bool) -> Result<Vec<u8>, WriteError> {
    match format {
        OutputFormat::Csv => maybe_gzip(encode_csv(table)?, compress),
        OutputFormat::Json => maybe_gzip(encode_json(table)?, compress),
        OutputFormat::Parquet => encode_parquet(table, compress),
        OutputFormat::Feather => encode_feather(table),
        OutputFormat::Xlsx => encode_xlsx(table),
    }
}

fn maybe_gzip(bytes: Vec<u8>, compress: bool) -> Result<Vec<u8>, WriteError> {
    if !compress {
        return Ok(bytes);
    }
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 4), Compression::default());
    encoder
        .write_all(&bytes)
        .map_err(|e| WriteError::Encode(format!("gzip: {e}")))?;
    encoder
        .finish()
        .map_err(|e| WriteError::Encode(format!("gzip: {e}")))
}

// ── CSV / JSON ──────────────────────────────────────────────────────

/// CSV with the date index as the leading column.
pub fn encode_csv(table: &PriceTable) -> Result<Vec<u8>, WriteError> {
    let csv_err = |e: csv::Error| WriteError::Encode(format!("csv: {e}"));
    let with_adj = table.has_adj_close();
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record(table.column_names()).map_err(csv_err)?;

    for bar in table.bars() {
        let mut record = vec![
            table.date_label(bar),
            bar.open.to_string(),
            bar.high.to_string(),
            bar.low.to_string(),
            bar.close.to_string(),
            bar.volume.to_string(),
        ];
        if with_adj {
            record.push(bar.adj_close.map(|v| v.to_string()).unwrap_or_default());
        }
        wtr.write_record(&record).map_err(csv_err)?;
    }

    wtr.into_inner()
        .map_err(|e| WriteError::Encode(format!("failed to flush CSV writer: {e}")))
}

#[derive(Serialize)]
struct JsonRow {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
    // Outer `None` drops the column, inner `None` is a null cell.
    #[serde(skip_serializing_if = "Option::is_none")]
    adj_close: Option<Option<f64>>,
}

/// JSON array of row objects, one per bar.
pub fn encode_json(table: &PriceTable) -> Result<Vec<u8>, WriteError> {
    let with_adj = table.has_adj_close();
    let rows: Vec<JsonRow> = table
        .bars()
        .iter()
        .map(|bar| JsonRow {
            date: table.date_label(bar),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            adj_close: with_adj.then_some(bar.adj_close),
        })
        .collect();
    serde_json::to_vec_pretty(&rows).map_err(|e| WriteError::Encode(format!("json: {e}")))
}

// ── Parquet / Feather ───────────────────────────────────────────────

/// Convert a price table to a Polars DataFrame with `date` as a regular column.
pub fn to_dataframe(table: &PriceTable) -> Result<DataFrame, WriteError> {
    let bars = table.bars();
    let date_column = if table.interval().is_intraday() {
        let millis: Vec<i64> = bars
            .iter()
            .map(|b| b.timestamp.and_utc().timestamp_millis())
            .collect();
        Column::new("date".into(), millis)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
    } else {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
        let days: Vec<i32> = bars
            .iter()
            .map(|b| (b.timestamp.date() - epoch).num_days() as i32)
            .collect();
        Column::new("date".into(), days).cast(&DataType::Date)
    };
    let date = date_column.map_err(|e| WriteError::Encode(format!("date cast: {e}")))?;

    let col = |name: &str, f: fn(&Bar) -> f64| -> Column {
        Column::new(name.into(), bars.iter().map(f).collect::<Vec<f64>>())
    };

    let mut columns = vec![
        date,
        col("open", |b| b.open),
        col("high", |b| b.high),
        col("low", |b| b.low),
        col("close", |b| b.close),
        Column::new(
            "volume".into(),
            bars.iter().map(|b| b.volume).collect::<Vec<u64>>(),
        ),
    ];
    if table.has_adj_close() {
        columns.push(Column::new(
            "adj_close".into(),
            bars.iter().map(|b| b.adj_close).collect::<Vec<Option<f64>>>(),
        ));
    }

    DataFrame::new(columns).map_err(|e| WriteError::Encode(format!("dataframe creation: {e}")))
}

/// Parquet, gzip column codec when `compress` is set.
pub fn encode_parquet(table: &PriceTable, compress: bool) -> Result<Vec<u8>, WriteError> {
    let mut df = to_dataframe(table)?;
    let compression = if compress {
        ParquetCompression::Gzip(None)
    } else {
        ParquetCompression::Uncompressed
    };
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf)
        .with_compression(compression)
        .finish(&mut df)
        .map_err(|e| WriteError::Encode(format!("write parquet: {e}")))?;
    Ok(buf)
}

/// Feather v2, i.e. the Arrow IPC file format.
pub fn encode_feather(table: &PriceTable) -> Result<Vec<u8>, WriteError> {
    let mut df = to_dataframe(table)?;
    let mut buf = Vec::new();
    IpcWriter::new(&mut buf)
        .finish(&mut df)
        .map_err(|e| WriteError::Encode(format!("write feather: {e}")))?;
    Ok(buf)
}

// ── XLSX ────────────────────────────────────────────────────────────

fn excel_datetime(bar: &Bar) -> Result<ExcelDateTime, XlsxError> {
    let ts = bar.timestamp;
    ExcelDateTime::from_ymd(ts.year() as u16, ts.month() as u8, ts.day() as u8)?.and_hms(
        ts.hour() as u16,
        ts.minute() as u8,
        ts.second() as u8,
    )
}

/// Single worksheet: header row, native date cells in the first column.
pub fn encode_xlsx(table: &PriceTable) -> Result<Vec<u8>, WriteError> {
    let xlsx_err = |e: XlsxError| WriteError::Encode(format!("xlsx: {e}"));
    let with_adj = table.has_adj_close();
    let date_format = Format::new().set_num_format(if table.interval().is_intraday() {
        "yyyy-mm-dd hh:mm:ss"
    } else {
        "yyyy-mm-dd"
    });

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();

    for (col, name) in table.column_names().into_iter().enumerate() {
        sheet.write_string(0, col as u16, name).map_err(xlsx_err)?;
    }

    for (i, bar) in table.bars().iter().enumerate() {
        let row = i as u32 + 1;
        let date = excel_datetime(bar).map_err(xlsx_err)?;
        sheet
            .write_datetime_with_format(row, 0, &date, &date_format)
            .map_err(xlsx_err)?;
        sheet.write_number(row, 1, bar.open).map_err(xlsx_err)?;
        sheet.write_number(row, 2, bar.high).map_err(xlsx_err)?;
        sheet.write_number(row, 3, bar.low).map_err(xlsx_err)?;
        sheet.write_number(row, 4, bar.close).map_err(xlsx_err)?;
        sheet.write_number(row, 5, bar.volume as f64).map_err(xlsx_err)?;
        if let (true, Some(adj)) = (with_adj, bar.adj_close) {
            sheet.write_number(row, 6, adj).map_err(xlsx_err)?;
        }
    }
    sheet.set_column_width(0, 20).map_err(xlsx_err)?;

    workbook.save_to_buffer().map_err(xlsx_err)
}
