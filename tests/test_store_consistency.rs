//! Concurrent reader/writer against one SQLite file
//!
//! The ingestion path commits fixed-size batches while the analytics path
//! keeps querying; every read must land on a batch boundary.

#[cfg(test)]
mod store_consistency_tests {
    use pairflow::store::{SqliteTradeStore, TradeStore};
    use pairflow::telemetry::MemorySink;
    use pairflow::Trade;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    const BATCH: usize = 50;
    const BATCHES: usize = 40;

    fn batch(n: usize) -> Vec<Trade> {
        (0..BATCH)
            .map(|i| {
                let ts = (n * BATCH + i) as i64;
                Trade::new(ts, "BTCUSDT", 30_000.0 + i as f64, 0.001)
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reads_never_observe_partial_batches() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            SqliteTradeStore::open(dir.path().join("concurrent.db"), MemorySink::new()).unwrap(),
        );
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let store = store.clone();
            let done = done.clone();
            tokio::spawn(async move {
                for n in 0..BATCHES {
                    assert_eq!(store.insert_batch(&batch(n)).await.unwrap(), BATCH);
                    tokio::task::yield_now().await;
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let reader = {
            let store = store.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let mut reads = 0usize;
                let mut last_seen = 0usize;
                while !done.load(Ordering::SeqCst) {
                    let trades = store.query_range("BTCUSDT", 0, None).await.unwrap();
                    assert_eq!(trades.len() % BATCH, 0, "partial batch visible");
                    assert!(trades.len() >= last_seen, "committed rows disappeared");
                    assert!(trades
                        .windows(2)
                        .all(|w| w[0].timestamp_ms <= w[1].timestamp_ms));
                    last_seen = trades.len();
                    reads += 1;
                    tokio::task::yield_now().await;
                }
                reads
            })
        };

        writer.await.unwrap();
        let reads = reader.await.unwrap();
        assert!(reads > 0);

        assert_eq!(store.count(None).await.unwrap() as usize, BATCH * BATCHES);
        let latest = store.latest("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(latest.timestamp_ms, (BATCH * BATCHES - 1) as i64);
    }

    #[tokio::test]
    async fn test_reopen_sees_committed_history() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen.db");

        {
            let store = SqliteTradeStore::open(&path, MemorySink::new()).unwrap();
            store.insert_batch(&batch(0)).await.unwrap();
            store.insert_batch(&batch(1)).await.unwrap();
        }

        let store = SqliteTradeStore::open(&path, MemorySink::new()).unwrap();
        assert_eq!(store.count(Some("BTCUSDT")).await.unwrap() as usize, 2 * BATCH);
        assert_eq!(store.count(Some("ETHUSDT")).await.unwrap(), 0);

        let window = store.query_range("BTCUSDT", 10, Some(19)).await.unwrap();
        assert_eq!(window.len(), 10);
        assert_eq!(window.first().unwrap().timestamp_ms, 10);
        assert_eq!(window.last().unwrap().timestamp_ms, 19);
    }
}
