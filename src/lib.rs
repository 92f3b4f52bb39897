//! pairflow - live trade ingestion and pairs-trading analytics
//!
//! Two independent paths share one SQLite trade store:
//!
//! ```text
//! write path:  WebSocket → StreamIngestor → IngestionBuffer → TradeStore
//! read path:   TradeStore → resample → pairs statistics → Signal
//! ```
//!
//! - `streamer_core` - connection lifecycle, message parsing, buffered writes
//! - `store` - durable trade log (`TradeStore` trait, SQLite backend)
//! - `pipeline` - resampling, analytics, signals, scheduling, export
//! - `telemetry` - injected log sink

pub mod pipeline;
pub mod sqlite_pragma;
pub mod store;
pub mod streamer_core;
pub mod telemetry;

pub use pipeline::types::{Bar, Observation, Signal, Trade};
pub use store::{SqliteTradeStore, StorageError, TradeStore};
pub use telemetry::{LogCrateSink, LogSink, MemorySink, SharedSink};
