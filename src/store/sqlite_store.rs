use super::{StorageError, TradeStore};
use crate::pipeline::types::Trade;
use crate::sqlite_pragma::apply_optimized_pragmas;
use crate::telemetry::SharedSink;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const COMPONENT: &str = "store";

/// SQLite-backed trade store
///
/// Holds two connections to the same WAL database:
/// - `writer` runs every batch inside one transaction
/// - `reader` is `query_only` and sees the last committed snapshot
///
/// WAL snapshot isolation is what keeps the analytics path from ever
/// observing a half-written batch while ingestion is committing.
pub struct SqliteTradeStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    sink: SharedSink,
}

impl SqliteTradeStore {
    pub fn open(db_path: impl AsRef<Path>, sink: SharedSink) -> Result<Self, StorageError> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer = Connection::open(db_path)?;
        apply_optimized_pragmas(&writer)?;
        Self::create_schema(&writer)?;

        let reader = Connection::open(db_path)?;
        apply_optimized_pragmas(&reader)?;
        reader.pragma_update(None, "query_only", "ON")?;

        sink.info(
            COMPONENT,
            format_args!("SQLite trade store ready at {} (WAL mode)", db_path.display()),
        );

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            sink,
        })
    }

    fn create_schema(conn: &Connection) -> Result<(), StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp_ms INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                price REAL NOT NULL,
                quantity REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_symbol_ts ON trades(symbol, timestamp_ms);
            CREATE INDEX IF NOT EXISTS idx_trades_ts ON trades(timestamp_ms);",
        )?;
        Ok(())
    }

    fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
        conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn row_to_trade(row: &rusqlite::Row<'_>) -> rusqlite::Result<Trade> {
        Ok(Trade {
            timestamp_ms: row.get(0)?,
            symbol: row.get(1)?,
            price: row.get(2)?,
            quantity: row.get(3)?,
        })
    }
}

#[async_trait]
impl TradeStore for SqliteTradeStore {
    async fn insert_batch(&self, records: &[Trade]) -> Result<usize, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = Self::lock(&self.writer)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO trades (timestamp_ms, symbol, price, quantity)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for trade in records {
                stmt.execute(params![
                    trade.timestamp_ms,
                    trade.symbol,
                    trade.price,
                    trade.quantity
                ])?;
            }
        }
        // Dropping `tx` without commit rolls the whole batch back
        tx.commit()?;

        self.sink
            .debug(COMPONENT, format_args!("Committed batch of {} trades", records.len()));
        Ok(records.len())
    }

    async fn query_range(
        &self,
        symbol: &str,
        since_ms: i64,
        until_ms: Option<i64>,
    ) -> Result<Vec<Trade>, StorageError> {
        let until_ms = until_ms.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

        let conn = Self::lock(&self.reader)?;
        let mut stmt = conn.prepare_cached(
            "SELECT timestamp_ms, symbol, price, quantity
             FROM trades
             WHERE symbol = ?1 AND timestamp_ms >= ?2 AND timestamp_ms <= ?3
             ORDER BY timestamp_ms ASC, id ASC",
        )?;

        let trades = stmt
            .query_map(params![symbol, since_ms, until_ms], Self::row_to_trade)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(trades)
    }

    async fn latest(&self, symbol: &str) -> Result<Option<Trade>, StorageError> {
        let conn = Self::lock(&self.reader)?;
        let trade = conn
            .query_row(
                "SELECT timestamp_ms, symbol, price, quantity
                 FROM trades
                 WHERE symbol = ?1
                 ORDER BY timestamp_ms DESC, id DESC
                 LIMIT 1",
                params![symbol],
                Self::row_to_trade,
            )
            .optional()?;
        Ok(trade)
    }

    async fn count(&self, symbol: Option<&str>) -> Result<u64, StorageError> {
        let conn = Self::lock(&self.reader)?;
        let count: i64 = match symbol {
            Some(symbol) => conn.query_row(
                "SELECT COUNT(*) FROM trades WHERE symbol = ?1",
                params![symbol],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0))?,
        };
        Ok(count.max(0) as u64)
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}
