use std::env;
use std::time::Duration;

pub const DEFAULT_STREAM_URL: &str = "wss://fstream.binance.com/stream";
pub const DEFAULT_SYMBOLS: &str = "btcusdt,ethusdt";
pub const DEFAULT_DB_PATH: &str = "market_data.db";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Ingestion-side runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Combined-stream endpoint, without the `?streams=` query
    pub stream_url: String,
    /// Lower-cased symbols subscribed on the single connection
    pub symbols: Vec<String>,
    pub db_path: String,
    pub rust_log: String,
    pub buffer: BufferConfig,
    pub reconnect_delay: Duration,
    /// Capacity of the reader → buffer channel
    pub channel_buffer: usize,
}

/// Flush policy for the ingestion buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferConfig {
    /// Flush once this many trades are pending
    pub count_threshold: usize,
    /// Flush on append once this much time passed since the last good flush
    pub time_threshold: Duration,
    /// Consecutive failed flushes before the store is declared unwritable
    pub max_consecutive_failures: u32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            count_threshold: 100,
            time_threshold: Duration::from_secs(1),
            max_consecutive_failures: 5,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stream_url: DEFAULT_STREAM_URL.to_string(),
            symbols: parse_symbols(DEFAULT_SYMBOLS),
            db_path: DEFAULT_DB_PATH.to_string(),
            rust_log: "info".to_string(),
            buffer: BufferConfig::default(),
            reconnect_delay: Duration::from_secs(1),
            channel_buffer: 1000,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `STREAM_URL` (default: wss://fstream.binance.com/stream)
    /// - `SYMBOLS` (default: btcusdt,ethusdt)
    /// - `PAIRFLOW_DB_PATH` (default: market_data.db)
    /// - `FLUSH_COUNT_THRESHOLD` (default: 100)
    /// - `FLUSH_INTERVAL_MS` (default: 1000)
    /// - `MAX_FLUSH_FAILURES` (default: 5)
    /// - `RECONNECT_DELAY_MS` (default: 1000)
    /// - `STREAMER_CHANNEL_BUFFER` (default: 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let stream_url = env::var("STREAM_URL").unwrap_or(defaults.stream_url);
        if !stream_url.starts_with("ws://") && !stream_url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue(
                "STREAM_URL must start with ws:// or wss://".to_string(),
            ));
        }

        let symbols = parse_symbols(
            &env::var("SYMBOLS").unwrap_or_else(|_| DEFAULT_SYMBOLS.to_string()),
        );
        if symbols.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SYMBOLS must name at least one instrument".to_string(),
            ));
        }

        let buffer = BufferConfig {
            count_threshold: parse_var("FLUSH_COUNT_THRESHOLD", defaults.buffer.count_threshold)?,
            time_threshold: Duration::from_millis(parse_var(
                "FLUSH_INTERVAL_MS",
                defaults.buffer.time_threshold.as_millis() as u64,
            )?),
            max_consecutive_failures: parse_var(
                "MAX_FLUSH_FAILURES",
                defaults.buffer.max_consecutive_failures,
            )?,
        };
        if buffer.count_threshold == 0 {
            return Err(ConfigError::InvalidValue(
                "FLUSH_COUNT_THRESHOLD must be at least 1".to_string(),
            ));
        }

        let channel_buffer = parse_var("STREAMER_CHANNEL_BUFFER", defaults.channel_buffer)?;
        if channel_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "STREAMER_CHANNEL_BUFFER must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            stream_url,
            symbols,
            db_path: env::var("PAIRFLOW_DB_PATH").unwrap_or(defaults.db_path),
            rust_log: env::var("RUST_LOG").unwrap_or(defaults.rust_log),
            buffer,
            reconnect_delay: Duration::from_millis(parse_var(
                "RECONNECT_DELAY_MS",
                defaults.reconnect_delay.as_millis() as u64,
            )?),
            channel_buffer,
        })
    }

    /// Full combined-stream URL, e.g. `.../stream?streams=btcusdt@trade/ethusdt@trade`
    pub fn subscription_url(&self) -> String {
        let streams: Vec<String> = self.symbols.iter().map(|s| format!("{}@trade", s)).collect();
        format!("{}?streams={}", self.stream_url, streams.join("/"))
    }
}

/// Comma-separated symbol list, trimmed and lower-cased, empties dropped
pub fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse an optional environment variable, falling back to `default` when unset
pub(crate) fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(format!("{} has unparseable value '{}'", name, raw))
        }),
        Err(_) => Ok(default),
    }
}
