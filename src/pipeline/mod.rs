//! # Pairs analytics pipeline
//!
//! Read path of the system. Each cycle:
//! 1. Reads the lookback window of trades for both legs from the store
//! 2. Resamples them to OHLCV bars on the configured timeframe
//! 3. Aligns closes on shared bucket starts (intersection, no interpolation)
//! 4. Computes hedge ratio, spread, rolling z-score, rolling correlation and
//!    an advisory ADF test on the spread
//! 5. Maps the latest z-score to a BUY / SELL / NONE signal
//!
//! The analytics path shares nothing with ingestion except the store, and
//! treats "not enough data yet" as a normal state rather than an error.
//!
//! ## Module Organization
//!
//! - `types` - Trade, Bar, Observation, Signal
//! - `resample` - tick → OHLCV, timeframe parsing
//! - `analytics` - alignment, hedge ratio, spread, rolling statistics
//! - `adf` - Augmented Dickey-Fuller test
//! - `signals` - z-score → signal
//! - `engine` - one analytics cycle → `PairSnapshot`
//! - `scheduler` - periodic cycle runner publishing on a watch channel
//! - `export` - CSV export of snapshot series
//! - `config` - environment configuration

pub mod adf;
pub mod analytics;
pub mod config;
pub mod engine;
pub mod export;
pub mod resample;
pub mod scheduler;
pub mod signals;
pub mod types;

pub use adf::{adf_test, AdfResult, CriticalValues};
pub use analytics::{hedge_ratio, rolling_correlation, rolling_zscore, spread, SpreadStats};
pub use config::PipelineConfig;
pub use engine::{AnalyticsEngine, CycleOutcome, ExportRow, PairSnapshot, WaitReason};
pub use resample::{resample, Timeframe};
pub use scheduler::{run_analytics_loop, AnalyticsLoop};
pub use signals::{evaluate, evaluate_latest};
pub use types::{Bar, Observation, Signal, Trade};
