//! Injected log sink
//!
//! Components never configure logging themselves. Each one receives an
//! `Arc<dyn LogSink>` at construction and tags its records with a component
//! name. Binaries hand out `LogCrateSink` (forwards to the `log` facade, which
//! `env_logger` renders); tests hand out `MemorySink` to assert on records.

use log::Level;
use std::fmt;
use std::sync::{Arc, Mutex};

pub type SharedSink = Arc<dyn LogSink>;

/// Structured log destination shared by the ingestion and analytics paths
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, component: &'static str, message: fmt::Arguments<'_>);

    fn debug(&self, component: &'static str, message: fmt::Arguments<'_>) {
        self.log(Level::Debug, component, message);
    }

    fn info(&self, component: &'static str, message: fmt::Arguments<'_>) {
        self.log(Level::Info, component, message);
    }

    fn warn(&self, component: &'static str, message: fmt::Arguments<'_>) {
        self.log(Level::Warn, component, message);
    }

    fn error(&self, component: &'static str, message: fmt::Arguments<'_>) {
        self.log(Level::Error, component, message);
    }
}

/// Forwards records to the `log` facade, using the component as the target
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCrateSink;

impl LogCrateSink {
    pub fn shared() -> SharedSink {
        Arc::new(Self)
    }
}

impl LogSink for LogCrateSink {
    fn log(&self, level: Level, component: &'static str, message: fmt::Arguments<'_>) {
        log::log!(target: component, level, "{}", message);
    }
}

/// A captured log record
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: Level,
    pub component: &'static str,
    pub message: String,
}

/// In-memory sink, mainly for tests
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<LogRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Records at `level` whose message contains `needle`
    pub fn count_matching(&self, level: Level, needle: &str) -> usize {
        self.records()
            .iter()
            .filter(|r| r.level == level && r.message.contains(needle))
            .count()
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: Level, component: &'static str, message: fmt::Arguments<'_>) {
        let record = LogRecord {
            level,
            component,
            message: message.to_string(),
        };
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}
