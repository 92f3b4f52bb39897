//! Pair Report - one analytics cycle against an existing database
//!
//! Usage:
//!   cargo run --bin pair_report -- [--output <PATH>] [--table pair|prices|spread|zscore]
//!
//! Reads the same `PAIRFLOW_DB_PATH` / `PAIR_Y` / `PAIR_X` / `TIMEFRAME`
//! settings as `pipeline_runtime` and writes the selected table as CSV to
//! `PATH` (stdout when omitted). Logs go to stderr.

use dotenv::dotenv;
use log::{info, warn};
use pairflow::pipeline::{
    config::PipelineConfig,
    engine::{AnalyticsEngine, CycleOutcome, PairSnapshot},
    export::{write_csv, write_prices_csv, write_series_csv},
};
use pairflow::store::{SqliteTradeStore, TradeStore};
use pairflow::streamer_core::RuntimeConfig;
use pairflow::telemetry::LogCrateSink;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Table {
    Pair,
    Prices,
    Spread,
    ZScore,
}

#[derive(Debug)]
struct ReportArgs {
    output: Option<String>,
    table: Table,
}

impl ReportArgs {
    fn from_args() -> Result<Self, Box<dyn std::error::Error>> {
        let args: Vec<String> = std::env::args().collect();

        let output = args
            .windows(2)
            .find(|w| w[0] == "--output")
            .map(|w| w[1].clone());

        let table = match args
            .windows(2)
            .find(|w| w[0] == "--table")
            .map(|w| w[1].to_lowercase())
            .as_deref()
        {
            None | Some("pair") => Table::Pair,
            Some("prices") => Table::Prices,
            Some("spread") => Table::Spread,
            Some("zscore") => Table::ZScore,
            Some(other) => {
                return Err(format!(
                    "unknown table '{}'. Valid tables: pair, prices, spread, zscore",
                    other
                )
                .into())
            }
        };

        Ok(Self { output, table })
    }
}

fn write_table<W: Write>(table: Table, snapshot: &PairSnapshot, writer: W) -> io::Result<usize> {
    match table {
        Table::Pair => write_csv(&snapshot.export_rows(), writer),
        Table::Prices => write_prices_csv(snapshot, writer),
        Table::Spread => write_series_csv("spread", &snapshot.spread, writer),
        Table::ZScore => write_series_csv("zscore", &snapshot.zscore, writer),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let runtime_config = RuntimeConfig::from_env()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&runtime_config.rust_log),
    )
    .target(env_logger::Target::Stderr)
    .init();

    let args = ReportArgs::from_args()?;
    let pipeline_config = PipelineConfig::from_env()?;

    let sink = LogCrateSink::shared();
    let store = Arc::new(SqliteTradeStore::open(&runtime_config.db_path, sink.clone())?);
    info!(
        "📂 {} ({} trades stored)",
        runtime_config.db_path,
        store.count(None).await?
    );

    let engine = AnalyticsEngine::new(store, pipeline_config, sink);
    let now_ms = chrono::Utc::now().timestamp_millis();

    let snapshot = match engine.run_cycle(now_ms).await {
        CycleOutcome::Ready(snapshot) => snapshot,
        CycleOutcome::Waiting(reason) => {
            warn!("⚠️  No report: {}", reason);
            return Ok(());
        }
    };

    info!(
        "📊 {}/{}: beta {:.4}, z {:?}, signal {}",
        snapshot.symbol_y,
        snapshot.symbol_x,
        snapshot.hedge_ratio,
        snapshot.latest_zscore,
        snapshot.signal
    );
    if let Some(stats) = snapshot.spread_stats {
        info!("   ├─ Spread mean {:.4}, std {:.4}", stats.mean, stats.std);
    }
    if let Some(adf) = snapshot.adf {
        info!(
            "   └─ ADF {:.3} (p={:.4}, lag {}, 5% crit {:.3})",
            adf.statistic, adf.p_value, adf.used_lag, adf.critical_values.five_pct
        );
    }

    let rows = match &args.output {
        Some(path) => {
            let rows = write_table(args.table, &snapshot, BufWriter::new(File::create(path)?))?;
            info!("✓ Exported {} rows to {}", rows, path);
            rows
        }
        None => write_table(args.table, &snapshot, io::stdout().lock())?,
    };
    if rows == 0 {
        warn!("⚠ Export contained no rows");
    }

    Ok(())
}
