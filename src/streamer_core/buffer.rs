//! Ingestion buffer - bounded staging area between the stream reader and the store
//!
//! Flush policy:
//! - pending length reaches `count_threshold`, or
//! - `time_threshold` has elapsed since the last successful flush
//!
//! Both triggers are evaluated on `append` only. Idle periods are covered by
//! the owner calling `flush()` on its own timer (the ingestion writer task
//! does this from the same task, so the buffer never needs a lock).
//!
//! Failure policy: retain-for-retry. A failed insert puts the batch back at
//! the head of the pending sequence and surfaces the error; nothing is dropped.
//! The owner decides when repeated failures become fatal via
//! `consecutive_failures()`.

use super::config::BufferConfig;
use crate::pipeline::types::Trade;
use crate::store::{StorageError, TradeStore};
use crate::telemetry::SharedSink;
use std::sync::Arc;
use tokio::time::Instant;

const COMPONENT: &str = "buffer";

pub struct IngestionBuffer {
    store: Arc<dyn TradeStore>,
    pending: Vec<Trade>,
    config: BufferConfig,
    last_flush: Instant,
    consecutive_failures: u32,
    total_flushed: u64,
    sink: SharedSink,
}

impl IngestionBuffer {
    pub fn new(store: Arc<dyn TradeStore>, config: BufferConfig, sink: SharedSink) -> Self {
        Self {
            store,
            pending: Vec::with_capacity(config.count_threshold),
            config,
            last_flush: Instant::now(),
            consecutive_failures: 0,
            total_flushed: 0,
            sink,
        }
    }

    /// Stage a trade and flush if the policy says so
    ///
    /// Returns `Some(written)` when a flush ran and succeeded.
    pub async fn append(&mut self, trade: Trade) -> Result<Option<usize>, StorageError> {
        self.pending.push(trade);

        if self.should_flush() {
            self.flush().await.map(Some)
        } else {
            Ok(None)
        }
    }

    fn should_flush(&self) -> bool {
        self.pending.len() >= self.config.count_threshold
            || self.last_flush.elapsed() >= self.config.time_threshold
    }

    /// Write every pending trade to the store as one batch
    pub async fn flush(&mut self) -> Result<usize, StorageError> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        // Hand the full vector to the store and keep appending into a fresh one
        let batch = std::mem::replace(
            &mut self.pending,
            Vec::with_capacity(self.config.count_threshold),
        );

        match self.store.insert_batch(&batch).await {
            Ok(written) => {
                self.last_flush = Instant::now();
                self.consecutive_failures = 0;
                self.total_flushed += written as u64;
                self.sink.debug(
                    COMPONENT,
                    format_args!("Flushed {} trades to {}", written, self.store.backend_type()),
                );
                Ok(written)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                let retained = batch.len();

                let mut restored = batch;
                restored.append(&mut self.pending);
                self.pending = restored;

                self.sink.warn(
                    COMPONENT,
                    format_args!(
                        "Flush of {} trades failed (attempt {}), retaining {} pending: {}",
                        retained,
                        self.consecutive_failures,
                        self.pending.len(),
                        e
                    ),
                );
                Err(e)
            }
        }
    }

    /// Final flush before the ingestion path terminates
    pub async fn drain_on_shutdown(&mut self) -> Result<usize, StorageError> {
        let pending = self.pending.len();
        match self.flush().await {
            Ok(written) => {
                self.sink.info(
                    COMPONENT,
                    format_args!("Drained {} pending trades on shutdown", written),
                );
                Ok(written)
            }
            Err(e) => {
                self.sink.error(
                    COMPONENT,
                    format_args!("Shutdown drain failed, {} trades not persisted: {}", pending, e),
                );
                Err(e)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> &[Trade] {
        &self.pending
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// True once consecutive failures reached the configured limit
    pub fn store_unwritable(&self) -> bool {
        self.consecutive_failures >= self.config.max_consecutive_failures
    }

    pub fn total_flushed(&self) -> u64 {
        self.total_flushed
    }
}
