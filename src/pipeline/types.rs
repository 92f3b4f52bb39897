//! Core data types shared by the ingestion and analytics paths
//!
//! `Trade` is the only persisted record. Everything else (`Bar`,
//! `Observation`, `Signal`) is derived per analytics cycle and never stored.

use serde::{Deserialize, Serialize};

/// A single normalized trade tick
///
/// Immutable once created: produced by the stream ingestor, staged by the
/// ingestion buffer, persisted by the trade store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Venue trade time, epoch milliseconds
    pub timestamp_ms: i64,
    /// Instrument identifier as sent by the venue (e.g. "BTCUSDT")
    pub symbol: String,
    pub price: f64,
    pub quantity: f64,
}

impl Trade {
    pub fn new(timestamp_ms: i64, symbol: impl Into<String>, price: f64, quantity: f64) -> Self {
        Self {
            timestamp_ms,
            symbol: symbol.into(),
            price,
            quantity,
        }
    }
}

/// Open-high-low-close-volume summary of one resampling bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bar {
    pub bucket_start_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One point of a derived series
///
/// `value == None` is the missing value: warm-up positions of rolling
/// statistics, or points whose inputs were themselves missing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Observation {
    pub timestamp_ms: i64,
    pub value: Option<f64>,
}

impl Observation {
    pub fn new(timestamp_ms: i64, value: f64) -> Self {
        Self {
            timestamp_ms,
            value: Some(value),
        }
    }

    pub fn missing(timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            value: None,
        }
    }
}

/// Discrete pairs-trading signal derived from the latest z-score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Signal {
    /// Spread is cheap: buy Y, sell beta units of X
    Buy,
    /// Spread is rich: sell Y, buy beta units of X
    Sell,
    None,
}

impl From<Signal> for &'static str {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::Buy => "BUY",
            Signal::Sell => "SELL",
            Signal::None => "NONE",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(<&str>::from(*self))
    }
}
