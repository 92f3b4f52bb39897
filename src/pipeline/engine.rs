//! Analytics engine - one read → resample → statistics → signal cycle
//!
//! ```text
//! TradeStore::query_range (Y, X)
//!     ↓
//! resample (configured timeframe)
//!     ↓
//! align closes on shared bucket starts
//!     ↓
//! hedge_ratio → spread → rolling z-score / correlation → ADF
//!     ↓
//! evaluate_latest → PairSnapshot
//! ```
//!
//! The engine holds no state between cycles: every snapshot is recomputed
//! from the store. Read failures degrade to "no data this cycle".

use super::adf::{adf_test, AdfResult};
use super::analytics::{
    align, closes, hedge_ratio, rolling_correlation, rolling_zscore, spread, SpreadStats,
};
use super::config::PipelineConfig;
use super::resample::resample;
use super::signals::evaluate_latest;
use super::types::{Bar, Observation, Signal};
use crate::store::TradeStore;
use crate::telemetry::SharedSink;
use serde::Serialize;
use std::sync::Arc;

const COMPONENT: &str = "analytics";

/// Why a cycle produced no snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitReason {
    /// No bars in the lookback window for this symbol
    MissingSymbol { symbol: String },
    /// Fewer shared buckets than the rolling window needs
    InsufficientHistory { have: usize, need: usize },
}

impl std::fmt::Display for WaitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitReason::MissingSymbol { symbol } => write!(f, "waiting for data for {}", symbol),
            WaitReason::InsufficientHistory { have, need } => {
                write!(f, "not enough data points yet ({}/{})", have, need)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Waiting(WaitReason),
    Ready(PairSnapshot),
}

impl CycleOutcome {
    pub fn snapshot(&self) -> Option<&PairSnapshot> {
        match self {
            CycleOutcome::Ready(snapshot) => Some(snapshot),
            CycleOutcome::Waiting(_) => None,
        }
    }
}

/// Everything the presentation layer needs from one cycle
#[derive(Debug, Clone, Serialize)]
pub struct PairSnapshot {
    pub computed_at_ms: i64,
    pub symbol_y: String,
    pub symbol_x: String,
    pub bars_y: Vec<Bar>,
    pub bars_x: Vec<Bar>,
    /// Most recent trade price per leg
    pub latest_price_y: Option<f64>,
    pub latest_price_x: Option<f64>,
    pub hedge_ratio: f64,
    /// Close prices on the shared buckets
    pub aligned_y: Vec<Observation>,
    pub aligned_x: Vec<Observation>,
    pub spread: Vec<Observation>,
    pub zscore: Vec<Observation>,
    pub correlation: Vec<Observation>,
    pub spread_stats: Option<SpreadStats>,
    pub adf: Option<AdfResult>,
    pub latest_zscore: Option<f64>,
    pub signal: Signal,
}

/// One timestamp-indexed row of the tabular export
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExportRow {
    pub timestamp_ms: i64,
    pub price_y: Option<f64>,
    pub price_x: Option<f64>,
    pub spread: Option<f64>,
    pub zscore: Option<f64>,
    pub correlation: Option<f64>,
}

impl PairSnapshot {
    /// Aligned prices, spread, z-score and correlation, one row per shared bucket
    pub fn export_rows(&self) -> Vec<ExportRow> {
        let value_at = |series: &[Observation], i: usize| series.get(i).and_then(|o| o.value);

        self.aligned_y
            .iter()
            .enumerate()
            .map(|(i, obs)| ExportRow {
                timestamp_ms: obs.timestamp_ms,
                price_y: obs.value,
                price_x: value_at(&self.aligned_x, i),
                spread: value_at(&self.spread, i),
                zscore: value_at(&self.zscore, i),
                correlation: value_at(&self.correlation, i),
            })
            .collect()
    }
}

pub struct AnalyticsEngine {
    store: Arc<dyn TradeStore>,
    config: PipelineConfig,
    sink: SharedSink,
}

impl AnalyticsEngine {
    pub fn new(store: Arc<dyn TradeStore>, config: PipelineConfig, sink: SharedSink) -> Self {
        Self {
            store,
            config,
            sink,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one cycle against the store as of `now_ms`
    pub async fn run_cycle(&self, now_ms: i64) -> CycleOutcome {
        let since_ms = now_ms.saturating_sub(self.config.lookback_ms());

        let bars_y = self.load_bars(&self.config.symbol_y, since_ms, now_ms).await;
        if bars_y.is_empty() {
            return self.waiting(WaitReason::MissingSymbol {
                symbol: self.config.symbol_y.clone(),
            });
        }
        let bars_x = self.load_bars(&self.config.symbol_x, since_ms, now_ms).await;
        if bars_x.is_empty() {
            return self.waiting(WaitReason::MissingSymbol {
                symbol: self.config.symbol_x.clone(),
            });
        }

        let latest_y = self.latest_price(&self.config.symbol_y).await;
        let latest_x = self.latest_price(&self.config.symbol_x).await;

        self.analyze(now_ms, bars_y, bars_x, latest_y, latest_x)
    }

    /// Statistics over already-resampled bars
    pub fn analyze(
        &self,
        now_ms: i64,
        bars_y: Vec<Bar>,
        bars_x: Vec<Bar>,
        latest_y: Option<f64>,
        latest_x: Option<f64>,
    ) -> CycleOutcome {
        let aligned = align(&closes(&bars_y), &closes(&bars_x));
        let need = self.config.window;
        if aligned.len() < need {
            return self.waiting(WaitReason::InsufficientHistory {
                have: aligned.len(),
                need,
            });
        }

        let aligned_y: Vec<Observation> = aligned
            .iter()
            .map(|p| Observation {
                timestamp_ms: p.timestamp_ms,
                value: p.y,
            })
            .collect();
        let aligned_x: Vec<Observation> = aligned
            .iter()
            .map(|p| Observation {
                timestamp_ms: p.timestamp_ms,
                value: p.x,
            })
            .collect();

        let (ys, xs): (Vec<f64>, Vec<f64>) = aligned.iter().filter_map(|p| p.y.zip(p.x)).unzip();
        let beta = hedge_ratio(&ys, &xs);

        let spread = spread(&aligned_y, &aligned_x, beta);
        let zscore = rolling_zscore(&spread, self.config.window);
        let correlation = rolling_correlation(&aligned_y, &aligned_x, self.config.window);
        let spread_stats = SpreadStats::from_series(&spread);
        let adf = if self.config.adf_enabled {
            adf_test(&spread)
        } else {
            None
        };

        let latest_zscore = zscore.last().and_then(|o| o.value);
        let signal = evaluate_latest(&zscore, self.config.z_threshold);

        self.sink.debug(
            COMPONENT,
            format_args!(
                "{}/{}: {} shared bars, beta={:.4}, z={:?}, signal={}",
                self.config.symbol_y,
                self.config.symbol_x,
                aligned.len(),
                beta,
                latest_zscore,
                signal
            ),
        );

        let latest_price_y = latest_y.or_else(|| bars_y.last().map(|b| b.close));
        let latest_price_x = latest_x.or_else(|| bars_x.last().map(|b| b.close));

        CycleOutcome::Ready(PairSnapshot {
            computed_at_ms: now_ms,
            symbol_y: self.config.symbol_y.clone(),
            symbol_x: self.config.symbol_x.clone(),
            bars_y,
            bars_x,
            latest_price_y,
            latest_price_x,
            hedge_ratio: beta,
            aligned_y,
            aligned_x,
            spread,
            zscore,
            correlation,
            spread_stats,
            adf,
            latest_zscore,
            signal,
        })
    }

    async fn load_bars(&self, symbol: &str, since_ms: i64, until_ms: i64) -> Vec<Bar> {
        match self.store.query_range(symbol, since_ms, Some(until_ms)).await {
            Ok(trades) => resample(&trades, self.config.timeframe.duration()),
            Err(e) => {
                self.sink.warn(
                    COMPONENT,
                    format_args!("Read of {} failed, skipping this cycle: {}", symbol, e),
                );
                Vec::new()
            }
        }
    }

    async fn latest_price(&self, symbol: &str) -> Option<f64> {
        match self.store.latest(symbol).await {
            Ok(trade) => trade.map(|t| t.price),
            Err(e) => {
                self.sink
                    .warn(COMPONENT, format_args!("Latest lookup for {} failed: {}", symbol, e));
                None
            }
        }
    }

    fn waiting(&self, reason: WaitReason) -> CycleOutcome {
        self.sink.debug(
            COMPONENT,
            format_args!(
                "{}/{}: {}",
                self.config.symbol_y, self.config.symbol_x, reason
            ),
        );
        CycleOutcome::Waiting(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::resample::Timeframe;
    use crate::pipeline::types::Trade;
    use crate::store::testing::ReadFailingStore;
    use crate::store::{SqliteTradeStore, StorageError};
    use crate::telemetry::MemorySink;
    use async_trait::async_trait;
    use tempfile::tempdir;

    const BASE_MS: i64 = 1_700_000_000_000;

    fn config(window: usize) -> PipelineConfig {
        PipelineConfig {
            timeframe: Timeframe::ONE_SECOND,
            window,
            lookback: std::time::Duration::from_secs(3600),
            ..PipelineConfig::new("yyy", "xxx")
        }
    }

    fn x_price(i: i64) -> f64 {
        100.0 + ((i * 37) % 23) as f64 * 0.5
    }

    /// One trade per second per leg; y tracks 2·x plus a small wobble
    fn pair_trades(seconds: i64) -> Vec<Trade> {
        let mut trades = Vec::new();
        for i in 0..seconds {
            let x = x_price(i);
            let wobble = ((i * 13) % 17) as f64 * 0.05 - 0.4;
            trades.push(Trade::new(BASE_MS + i * 1_000, "XXX", x, 1.0));
            trades.push(Trade::new(BASE_MS + i * 1_000 + 10, "YYY", 2.0 * x + wobble, 1.0));
        }
        trades
    }

    async fn store_with(trades: &[Trade]) -> (tempfile::TempDir, Arc<SqliteTradeStore>) {
        let dir = tempdir().unwrap();
        let store =
            Arc::new(SqliteTradeStore::open(dir.path().join("engine.db"), MemorySink::new()).unwrap());
        store.insert_batch(trades).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_missing_symbol_waits() {
        let trades: Vec<Trade> = pair_trades(30)
            .into_iter()
            .filter(|t| t.symbol == "YYY")
            .collect();
        let (_dir, store) = store_with(&trades).await;
        let engine = AnalyticsEngine::new(store, config(5), MemorySink::new());

        match engine.run_cycle(BASE_MS + 60_000).await {
            CycleOutcome::Waiting(WaitReason::MissingSymbol { symbol }) => {
                assert_eq!(symbol, "XXX")
            }
            other => panic!("expected MissingSymbol, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_insufficient_history_waits() {
        let (_dir, store) = store_with(&pair_trades(8)).await;
        let engine = AnalyticsEngine::new(store, config(20), MemorySink::new());

        match engine.run_cycle(BASE_MS + 60_000).await {
            CycleOutcome::Waiting(WaitReason::InsufficientHistory { have, need }) => {
                assert_eq!(have, 8);
                assert_eq!(need, 20);
            }
            other => panic!("expected InsufficientHistory, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ready_snapshot() {
        let (_dir, store) = store_with(&pair_trades(40)).await;
        let engine = AnalyticsEngine::new(store, config(10), MemorySink::new());

        let outcome = engine.run_cycle(BASE_MS + 60_000).await;
        let snapshot = outcome.snapshot().expect("snapshot");

        assert_eq!(snapshot.bars_y.len(), 40);
        assert_eq!(snapshot.aligned_y.len(), 40);
        assert!((snapshot.hedge_ratio - 2.0).abs() < 0.1);
        assert_eq!(snapshot.spread.len(), 40);
        assert!(snapshot.zscore[..9].iter().all(|o| o.value.is_none()));
        assert!(snapshot.zscore[9].value.is_some());
        assert_eq!(snapshot.latest_price_x, Some(x_price(39)));
        assert!(snapshot.spread_stats.is_some());
        assert!(snapshot.adf.is_some());
        assert_eq!(snapshot.latest_zscore, snapshot.zscore[39].value);

        let rows = snapshot.export_rows();
        assert_eq!(rows.len(), 40);
        assert_eq!(rows[0].timestamp_ms, BASE_MS);
        assert_eq!(rows[0].zscore, None);
        assert!(rows[39].correlation.is_some());
    }

    #[tokio::test]
    async fn test_lookback_excludes_old_trades() {
        let (_dir, store) = store_with(&pair_trades(40)).await;
        let mut cfg = config(10);
        cfg.lookback = std::time::Duration::from_secs(15);
        let engine = AnalyticsEngine::new(store, cfg, MemorySink::new());

        // Trades span BASE..BASE+39s; window covers the last 15 seconds
        let snapshot = match engine.run_cycle(BASE_MS + 39_500).await {
            CycleOutcome::Ready(s) => s,
            other => panic!("expected Ready, got {:?}", other),
        };
        assert_eq!(snapshot.bars_x.len(), 15);
        assert_eq!(snapshot.bars_x[0].bucket_start_ms, BASE_MS + 25_000);
    }

    #[tokio::test]
    async fn test_adf_disabled() {
        let (_dir, store) = store_with(&pair_trades(30)).await;
        let mut cfg = config(10);
        cfg.adf_enabled = false;
        let engine = AnalyticsEngine::new(store, cfg, MemorySink::new());

        let outcome = engine.run_cycle(BASE_MS + 60_000).await;
        assert!(outcome.snapshot().unwrap().adf.is_none());
    }

    #[tokio::test]
    async fn test_read_failure_is_no_data_this_cycle() {
        let (_dir, store) = store_with(&pair_trades(30)).await;
        let flaky = Arc::new(ReadFailingStore::new(store));
        let sink = MemorySink::new();
        let engine = AnalyticsEngine::new(flaky.clone(), config(10), sink.clone());

        flaky.set_failing(true);
        match engine.run_cycle(BASE_MS + 60_000).await {
            CycleOutcome::Waiting(WaitReason::MissingSymbol { symbol }) => {
                assert_eq!(symbol, "YYY")
            }
            other => panic!("expected MissingSymbol, got {:?}", other),
        }
        assert_eq!(sink.count_matching(log::Level::Warn, "Read of YYY failed"), 1);

        // Next cycle recovers once reads succeed again
        flaky.set_failing(false);
        assert!(engine.run_cycle(BASE_MS + 60_000).await.snapshot().is_some());
    }

    #[test]
    fn test_signal_from_extreme_last_bar() {
        struct NoStore;

        #[async_trait]
        impl TradeStore for NoStore {
            async fn insert_batch(&self, _r: &[Trade]) -> Result<usize, StorageError> {
                Ok(0)
            }
            async fn query_range(
                &self,
                _s: &str,
                _a: i64,
                _b: Option<i64>,
            ) -> Result<Vec<Trade>, StorageError> {
                Ok(Vec::new())
            }
            async fn latest(&self, _s: &str) -> Result<Option<Trade>, StorageError> {
                Ok(None)
            }
            async fn count(&self, _s: Option<&str>) -> Result<u64, StorageError> {
                Ok(0)
            }
            fn backend_type(&self) -> &'static str {
                "None"
            }
        }

        let bar = |i: i64, close: f64| Bar {
            bucket_start_ms: i * 1_000,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        };
        // x moves, y stays flat until a final jump
        let bars_x: Vec<Bar> = (0..12).map(|i| bar(i, 10.0 + (i % 3) as f64)).collect();
        let mut bars_y: Vec<Bar> = (0..12).map(|i| bar(i, 50.0 + (i % 2) as f64 * 0.1)).collect();
        bars_y[11] = bar(11, 80.0);

        let engine = AnalyticsEngine::new(Arc::new(NoStore), config(10), MemorySink::new());
        match engine.analyze(12_000, bars_y, bars_x, None, None) {
            CycleOutcome::Ready(snapshot) => {
                assert!(snapshot.latest_zscore.unwrap() > 2.0);
                assert_eq!(snapshot.signal, Signal::Sell);
                assert_eq!(snapshot.latest_price_y, Some(80.0));
            }
            other => panic!("expected Ready, got {:?}", other),
        }
    }
}
