//! Analytics configuration from environment variables

use super::resample::Timeframe;
use crate::streamer_core::config::{parse_symbols, parse_var, ConfigError, DEFAULT_SYMBOLS};
use std::env;
use std::time::Duration;

/// Configuration for the analytics path
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Dependent leg, as stored (upper-case)
    pub symbol_y: String,
    /// Independent leg, as stored (upper-case)
    pub symbol_x: String,
    pub timeframe: Timeframe,
    /// Rolling window for z-score and correlation, in bars
    pub window: usize,
    pub z_threshold: f64,
    /// How far back each cycle reads trades
    pub lookback: Duration,
    /// Cadence of the analytics loop
    pub interval: Duration,
    pub adf_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            symbol_y: "BTCUSDT".to_string(),
            symbol_x: "ETHUSDT".to_string(),
            timeframe: Timeframe::ONE_MINUTE,
            window: 20,
            z_threshold: 2.0,
            lookback: Duration::from_secs(60 * 60),
            interval: Duration::from_millis(1_000),
            adf_enabled: true,
        }
    }
}

impl PipelineConfig {
    pub fn new(symbol_y: impl Into<String>, symbol_x: impl Into<String>) -> Self {
        Self {
            symbol_y: symbol_y.into().to_uppercase(),
            symbol_x: symbol_x.into().to_uppercase(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `PAIR_Y`, `PAIR_X` (default: first and second entries of `SYMBOLS`)
    /// - `TIMEFRAME` (default: 1min)
    /// - `ROLLING_WINDOW` (default: 20)
    /// - `Z_THRESHOLD` (default: 2.0)
    /// - `LOOKBACK_MINUTES` (default: 60)
    /// - `ANALYTICS_INTERVAL_MS` (default: 1000)
    /// - `ENABLE_ADF` (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let symbols = parse_symbols(
            &env::var("SYMBOLS").unwrap_or_else(|_| DEFAULT_SYMBOLS.to_string()),
        );
        let symbol_y = env::var("PAIR_Y")
            .ok()
            .or_else(|| symbols.first().cloned())
            .ok_or_else(|| ConfigError::MissingVariable("PAIR_Y".to_string()))?;
        let symbol_x = env::var("PAIR_X")
            .ok()
            .or_else(|| symbols.get(1).cloned())
            .ok_or_else(|| ConfigError::MissingVariable("PAIR_X".to_string()))?;

        let symbol_y = symbol_y.trim().to_uppercase();
        let symbol_x = symbol_x.trim().to_uppercase();
        if symbol_y == symbol_x {
            return Err(ConfigError::InvalidValue(format!(
                "PAIR_Y and PAIR_X must differ (both {})",
                symbol_y
            )));
        }

        let timeframe = match env::var("TIMEFRAME") {
            Ok(raw) => raw
                .parse::<Timeframe>()
                .map_err(|e| ConfigError::InvalidValue(e.to_string()))?,
            Err(_) => defaults.timeframe,
        };

        let window: usize = parse_var("ROLLING_WINDOW", defaults.window)?;
        if window < 2 {
            return Err(ConfigError::InvalidValue(
                "ROLLING_WINDOW must be at least 2".to_string(),
            ));
        }

        let z_threshold: f64 = parse_var("Z_THRESHOLD", defaults.z_threshold)?;
        if !z_threshold.is_finite() || z_threshold < 0.0 {
            return Err(ConfigError::InvalidValue(
                "Z_THRESHOLD must be a non-negative number".to_string(),
            ));
        }

        let lookback_minutes: u64 =
            parse_var("LOOKBACK_MINUTES", defaults.lookback.as_secs() / 60)?;
        let lookback_secs = lookback_minutes
            .checked_mul(60)
            .filter(|secs| *secs <= i64::MAX as u64 / 1_000)
            .ok_or_else(|| {
                ConfigError::InvalidValue(format!(
                    "LOOKBACK_MINUTES is out of range: {}",
                    lookback_minutes
                ))
            })?;
        let interval_ms: u64 =
            parse_var("ANALYTICS_INTERVAL_MS", defaults.interval.as_millis() as u64)?;

        Ok(Self {
            symbol_y,
            symbol_x,
            timeframe,
            window,
            z_threshold,
            lookback: Duration::from_secs(lookback_secs),
            interval: Duration::from_millis(interval_ms.max(1)),
            adf_enabled: parse_var("ENABLE_ADF", defaults.adf_enabled)?,
        })
    }

    pub fn lookback_ms(&self) -> i64 {
        i64::try_from(self.lookback.as_millis()).unwrap_or(i64::MAX)
    }
}
