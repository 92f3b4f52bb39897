//! Tabular CSV export of analytics output
//!
//! One header line, then one row per timestamp. Timestamps are RFC 3339 UTC
//! with millisecond precision; missing values are empty cells.

use super::engine::{ExportRow, PairSnapshot};
use super::types::Observation;
use chrono::{DateTime, SecondsFormat};
use std::io::{self, Write};

pub const PAIR_HEADER: [&str; 6] = ["timestamp", "price_y", "price_x", "spread", "zscore", "correlation"];

/// Aligned prices, spread, z-score and correlation; returns rows written
pub fn write_csv<W: Write>(rows: &[ExportRow], mut writer: W) -> io::Result<usize> {
    writeln!(writer, "{}", PAIR_HEADER.join(","))?;
    for row in rows {
        writeln!(
            writer,
            "{},{},{},{},{},{}",
            format_timestamp(row.timestamp_ms),
            format_value(row.price_y),
            format_value(row.price_x),
            format_value(row.spread),
            format_value(row.zscore),
            format_value(row.correlation)
        )?;
    }
    writer.flush()?;
    Ok(rows.len())
}

/// Aligned close prices with one column per symbol
pub fn write_prices_csv<W: Write>(snapshot: &PairSnapshot, mut writer: W) -> io::Result<usize> {
    writeln!(
        writer,
        "timestamp,{},{}",
        escape(&snapshot.symbol_y),
        escape(&snapshot.symbol_x)
    )?;

    let mut written = 0;
    for (y, x) in snapshot.aligned_y.iter().zip(&snapshot.aligned_x) {
        writeln!(
            writer,
            "{},{},{}",
            format_timestamp(y.timestamp_ms),
            format_value(y.value),
            format_value(x.value)
        )?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

/// A single named series, e.g. `spread` or `zscore`
pub fn write_series_csv<W: Write>(
    name: &str,
    series: &[Observation],
    mut writer: W,
) -> io::Result<usize> {
    writeln!(writer, "timestamp,{}", escape(name))?;
    for obs in series {
        writeln!(
            writer,
            "{},{}",
            format_timestamp(obs.timestamp_ms),
            format_value(obs.value)
        )?;
    }
    writer.flush()?;
    Ok(series.len())
}

fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| timestamp_ms.to_string())
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => v.to_string(),
        _ => String::new(),
    }
}

/// Quote a header cell when it contains CSV metacharacters
fn escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}
