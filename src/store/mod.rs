//! Time-series trade store
//!
//! Durable append-only trade log shared by the ingestion path (writes) and
//! the analytics path (reads). The store is constructed explicitly and
//! injected into both paths as an `Arc<dyn TradeStore>`.
//!
//! Guarantees every implementation must provide:
//! - `insert_batch` is atomic: a batch is fully visible or not at all
//! - reads only ever observe fully committed batches
//! - records are immutable once inserted (no update/delete path)

pub mod sqlite_store;

pub use sqlite_store::SqliteTradeStore;

use crate::pipeline::types::Trade;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store connection lock poisoned")]
    LockPoisoned,

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Atomically append a batch, returning the number of records written
    async fn insert_batch(&self, records: &[Trade]) -> Result<usize, StorageError>;

    /// Trades for `symbol` with `since_ms <= timestamp_ms <= until_ms`,
    /// ascending by timestamp (insertion order on ties).
    /// `until_ms = None` means "up to now".
    async fn query_range(
        &self,
        symbol: &str,
        since_ms: i64,
        until_ms: Option<i64>,
    ) -> Result<Vec<Trade>, StorageError>;

    /// The trade with the greatest timestamp for `symbol`
    async fn latest(&self, symbol: &str) -> Result<Option<Trade>, StorageError>;

    /// Number of stored trades, optionally restricted to one symbol
    async fn count(&self, symbol: Option<&str>) -> Result<u64, StorageError>;

    /// Backend name for logging
    fn backend_type(&self) -> &'static str;
}
