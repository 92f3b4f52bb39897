//! Pipeline Runtime - live ingestion plus periodic pairs analytics
//!
//! This binary wires the two paths around one SQLite store:
//! - StreamIngestor: combined trade stream → buffer → store
//! - AnalyticsLoop: store → bars → spread/z-score → signal
//!
//! Usage:
//!   cargo run --release --bin pipeline_runtime
//!
//! Environment variables:
//!   SYMBOLS - comma-separated instruments (default: btcusdt,ethusdt)
//!   PAIR_Y / PAIR_X - legs of the pair (default: first two SYMBOLS)
//!   PAIRFLOW_DB_PATH - SQLite database path (default: market_data.db)
//!   TIMEFRAME / ROLLING_WINDOW / Z_THRESHOLD - analytics parameters
//!   FLUSH_COUNT_THRESHOLD / FLUSH_INTERVAL_MS - buffer flush policy
//!
//! If the store becomes unwritable, ingestion stops but analytics keeps
//! publishing from what is already stored until CTRL+C.

use dotenv::dotenv;
use log::{error, info, warn};
use pairflow::pipeline::{
    config::PipelineConfig, engine::AnalyticsEngine, engine::PairSnapshot,
    scheduler::AnalyticsLoop,
};
use pairflow::store::SqliteTradeStore;
use pairflow::streamer_core::{
    IngestorConfig, IngestorHandle, IngestorState, RuntimeConfig, StreamIngestor, WsConnector,
};
use pairflow::telemetry::LogCrateSink;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let runtime_config = RuntimeConfig::from_env()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&runtime_config.rust_log),
    )
    .target(env_logger::Target::Stderr)
    .init();

    // Initialize rustls crypto provider (required for wss:// connections)
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let pipeline_config = PipelineConfig::from_env()?;

    info!("🚀 Pipeline Runtime");
    info!("   ├─ Stream: {}", runtime_config.subscription_url());
    info!("   ├─ Database: {}", runtime_config.db_path);
    info!(
        "   ├─ Flush: {} trades / {:?}",
        runtime_config.buffer.count_threshold, runtime_config.buffer.time_threshold
    );
    info!(
        "   ├─ Pair: {} ~ {}",
        pipeline_config.symbol_y, pipeline_config.symbol_x
    );
    info!(
        "   └─ Analytics: {} bars, window {}, z ±{}",
        pipeline_config.timeframe, pipeline_config.window, pipeline_config.z_threshold
    );

    let sink = LogCrateSink::shared();
    let store = Arc::new(SqliteTradeStore::open(&runtime_config.db_path, sink.clone())?);
    info!("✅ Store ready");

    // Write path
    let connector = Arc::new(WsConnector::new(runtime_config.subscription_url()));
    let ingestor = StreamIngestor::new(
        connector,
        store.clone(),
        IngestorConfig::from(&runtime_config),
        sink.clone(),
    )
    .start();
    let ingest_token = ingestor.cancellation_token();
    let ingest_state = ingestor.subscribe();
    let ingest_task = tokio::spawn(watch_ingestion(ingestor));
    info!("✅ Ingestion task spawned");

    // Read path
    let analytics_cancel = CancellationToken::new();
    let (snapshot_tx, snapshot_rx) = watch::channel::<Option<PairSnapshot>>(None);
    let engine = Arc::new(AnalyticsEngine::new(
        store.clone(),
        pipeline_config.clone(),
        sink.clone(),
    ));
    let analytics_task = tokio::spawn(
        AnalyticsLoop::new(engine, pipeline_config.interval, sink.clone())
            .run(analytics_cancel.clone(), snapshot_tx),
    );
    info!("✅ Analytics loop spawned");

    let status_task = tokio::spawn(report_status(
        snapshot_rx,
        ingest_state,
        analytics_cancel.clone(),
    ));

    info!("🔄 Press CTRL+C to shutdown gracefully");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
        Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
    }

    // Ingestion first so the final drain lands before the last analytics cycle
    ingest_token.cancel();
    let ingest_result = ingest_task.await?;

    analytics_cancel.cancel();
    let cycles = analytics_task.await?;
    status_task.await?;

    info!("✅ Pipeline runtime stopped ({} analytics cycles)", cycles);
    ingest_result.map(|_| ()).map_err(Into::into)
}

/// Wait for the ingestor to finish and log how it ended
async fn watch_ingestion(
    handle: IngestorHandle,
) -> Result<pairflow::streamer_core::IngestionSummary, pairflow::streamer_core::IngestError> {
    let result = handle.join().await;
    match &result {
        Ok(summary) => info!(
            "📥 Ingestion stopped: {} connects, {} trades, {} malformed, {} persisted",
            summary.connect_attempts,
            summary.trades_received,
            summary.malformed_messages,
            summary.trades_persisted
        ),
        Err(e) => error!(
            "❌ Ingestion stopped: {} (analytics keeps serving stored data)",
            e
        ),
    }
    result
}

/// Periodic one-line status of both paths
async fn report_status(
    snapshots: watch::Receiver<Option<PairSnapshot>>,
    ingest_state: watch::Receiver<IngestorState>,
    cancel: CancellationToken,
) {
    let mut timer = interval(STATUS_INTERVAL);
    timer.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = timer.tick() => {}
        }

        let state = *ingest_state.borrow();
        if state != IngestorState::Streaming {
            warn!("📊 Ingestion state: {:?}", state);
        }

        match snapshots.borrow().as_ref() {
            Some(s) => info!(
                "📊 {}/{} | {:?} / {:?} | beta {:.4} | z {} | {} | ADF p {}",
                s.symbol_y,
                s.symbol_x,
                s.latest_price_y,
                s.latest_price_x,
                s.hedge_ratio,
                s.latest_zscore
                    .map(|z| format!("{:.2}", z))
                    .unwrap_or_else(|| "n/a".to_string()),
                s.signal,
                s.adf
                    .map(|a| format!("{:.3}", a.p_value))
                    .unwrap_or_else(|| "n/a".to_string()),
            ),
            None => info!("📊 Waiting for enough data to compute analytics"),
        }
    }
}
