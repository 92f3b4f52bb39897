//! Inbound message normalization
//!
//! Combined-stream messages look like:
//!
//! ```text
//! {"stream":"btcusdt@trade",
//!  "data":{"e":"trade","E":1700000000001,"s":"BTCUSDT","t":12345,
//!          "p":"37000.10","q":"0.015","T":1700000000000,"m":true}}
//! ```
//!
//! Price and quantity arrive string-encoded from the venue but plain JSON
//! numbers are accepted too. Anything that does not yield a complete, positive
//! trade is rejected with a `ParseError`; the ingestor logs and drops it.

use crate::pipeline::types::Trade;
use serde::Deserialize;

pub const TRADE_EVENT: &str = "trade";

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message has no data payload")]
    MissingData,

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Unsupported event type '{0}'")]
    UnsupportedEvent(String),

    #[error("Field '{field}' is not numeric: '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Field '{0}' must be positive")]
    NonPositive(&'static str),
}

#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    #[serde(default)]
    data: Option<TradePayload>,
}

#[derive(Debug, Deserialize)]
struct TradePayload {
    #[serde(rename = "e")]
    event_type: Option<String>,
    #[serde(rename = "s")]
    symbol: Option<String>,
    #[serde(rename = "p")]
    price: Option<NumericField>,
    #[serde(rename = "q")]
    quantity: Option<NumericField>,
    #[serde(rename = "T")]
    trade_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumericField {
    Number(f64),
    Text(String),
}

impl NumericField {
    fn to_positive(&self, field: &'static str) -> Result<f64, ParseError> {
        let value = match self {
            NumericField::Number(n) => *n,
            NumericField::Text(s) => s.trim().parse::<f64>().map_err(|_| {
                ParseError::InvalidNumber {
                    field,
                    value: s.clone(),
                }
            })?,
        };

        if !value.is_finite() {
            return Err(ParseError::InvalidNumber {
                field,
                value: value.to_string(),
            });
        }
        if value <= 0.0 {
            return Err(ParseError::NonPositive(field));
        }
        Ok(value)
    }
}

/// Parse one raw text frame into a normalized `Trade`
pub fn parse_trade_message(text: &str) -> Result<Trade, ParseError> {
    let envelope: StreamEnvelope = serde_json::from_str(text)?;
    let payload = envelope.data.ok_or(ParseError::MissingData)?;

    let event_type = payload.event_type.ok_or(ParseError::MissingField("e"))?;
    if event_type != TRADE_EVENT {
        return Err(ParseError::UnsupportedEvent(event_type));
    }

    let symbol = payload
        .symbol
        .filter(|s| !s.trim().is_empty())
        .ok_or(ParseError::MissingField("s"))?;
    let price = payload
        .price
        .ok_or(ParseError::MissingField("p"))?
        .to_positive("p")?;
    let quantity = payload
        .quantity
        .ok_or(ParseError::MissingField("q"))?
        .to_positive("q")?;
    let timestamp_ms = payload.trade_time.ok_or(ParseError::MissingField("T"))?;

    Ok(Trade {
        timestamp_ms,
        symbol: symbol.trim().to_uppercase(),
        price,
        quantity,
    })
}
