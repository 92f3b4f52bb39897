//! Stream ingestor - connection lifecycle, normalization and hand-off to the buffer
//!
//! Two tasks per running ingestor:
//!
//! ```text
//! reader task:  Connector → MessageStream → parse_trade_message → mpsc (bounded)
//! writer task:  mpsc → IngestionBuffer::append → TradeStore::insert_batch
//! ```
//!
//! The bounded channel is the backpressure point: when store writes stall,
//! the writer stops draining, the channel fills, and the reader's `send`
//! waits before reading the next frame.
//!
//! State machine (published on a watch channel):
//! `Disconnected → Connecting → Streaming → Reconnecting → Connecting ...`,
//! and `Stopped` once the stop signal was observed and the buffer drained.

use super::buffer::IngestionBuffer;
use super::config::{BufferConfig, RuntimeConfig};
use super::trade_parser::parse_trade_message;
use super::transport::{Connector, MessageStream};
use crate::pipeline::types::Trade;
use crate::store::{StorageError, TradeStore};
use crate::telemetry::SharedSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const COMPONENT: &str = "ingestor";

/// Upper bound on waiting for a close handshake before abandoning the socket
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngestorState {
    Disconnected,
    Connecting,
    Streaming,
    Reconnecting,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Store unwritable after {consecutive_failures} consecutive failed flushes")]
    StoreUnavailable { consecutive_failures: u32 },

    #[error("Ingestion task failed: {0}")]
    Task(String),
}

/// Counters reported when the ingestor stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionSummary {
    pub connect_attempts: u64,
    pub trades_received: u64,
    pub malformed_messages: u64,
    pub trades_persisted: u64,
}

#[derive(Debug, Clone)]
pub struct IngestorConfig {
    pub buffer: BufferConfig,
    /// Fixed wait between a lost connection and the next connect attempt
    pub reconnect_delay: Duration,
    /// Capacity of the reader → writer channel
    pub channel_buffer: usize,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            buffer: BufferConfig::default(),
            reconnect_delay: Duration::from_secs(1),
            channel_buffer: 1000,
        }
    }
}

impl From<&RuntimeConfig> for IngestorConfig {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            buffer: config.buffer,
            reconnect_delay: config.reconnect_delay,
            channel_buffer: config.channel_buffer,
        }
    }
}

pub struct StreamIngestor {
    connector: Arc<dyn Connector>,
    store: Arc<dyn TradeStore>,
    config: IngestorConfig,
    sink: SharedSink,
    state_tx: watch::Sender<IngestorState>,
}

impl StreamIngestor {
    pub fn new(
        connector: Arc<dyn Connector>,
        store: Arc<dyn TradeStore>,
        config: IngestorConfig,
        sink: SharedSink,
    ) -> Self {
        let (state_tx, _) = watch::channel(IngestorState::Disconnected);
        Self {
            connector,
            store,
            config,
            sink,
            state_tx,
        }
    }

    pub fn state(&self) -> IngestorState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<IngestorState> {
        self.state_tx.subscribe()
    }

    /// Spawn the reader and writer tasks
    pub fn start(self) -> IngestorHandle {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel::<Trade>(self.config.channel_buffer.max(1));
        let state_rx = self.state_tx.subscribe();

        self.sink.info(
            COMPONENT,
            format_args!(
                "Starting ingestion from {} (flush at {} trades / {:?}, reconnect delay {:?})",
                self.connector.endpoint(),
                self.config.buffer.count_threshold,
                self.config.buffer.time_threshold,
                self.config.reconnect_delay
            ),
        );

        let reader = StreamReader {
            connector: self.connector,
            tx,
            cancel: cancel.clone(),
            state_tx: self.state_tx.clone(),
            reconnect_delay: self.config.reconnect_delay,
            sink: self.sink.clone(),
            stats: IngestionSummary::default(),
        };

        let writer = BufferWriter {
            rx,
            buffer: IngestionBuffer::new(self.store, self.config.buffer, self.sink.clone()),
            cancel: cancel.clone(),
            idle_flush: self.config.buffer.time_threshold,
            sink: self.sink.clone(),
            trades_received: 0,
        };

        let state_tx = self.state_tx;
        let sink = self.sink;
        let task = tokio::spawn(async move {
            let reader_handle = tokio::spawn(reader.run());
            let writer_result = writer.run().await;
            let reader_result = reader_handle.await;

            // Terminal: nothing publishes after this point
            state_tx.send_replace(IngestorState::Stopped);

            let reader_stats = reader_result.map_err(|e| IngestError::Task(e.to_string()))?;
            let persisted = writer_result?;
            let summary = IngestionSummary {
                trades_persisted: persisted,
                ..reader_stats
            };

            sink.info(
                COMPONENT,
                format_args!(
                    "Ingestion stopped: {} connects, {} trades received, {} malformed, {} persisted",
                    summary.connect_attempts,
                    summary.trades_received,
                    summary.malformed_messages,
                    summary.trades_persisted
                ),
            );
            Ok(summary)
        });

        IngestorHandle {
            cancel,
            state_rx,
            task,
        }
    }
}

/// Control handle for a running ingestor
pub struct IngestorHandle {
    cancel: CancellationToken,
    state_rx: watch::Receiver<IngestorState>,
    task: JoinHandle<Result<IngestionSummary, IngestError>>,
}

impl IngestorHandle {
    pub fn state(&self) -> IngestorState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<IngestorState> {
        self.state_rx.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signal stop, interrupt any in-flight receive, and wait for the drain
    pub async fn stop(self) -> Result<IngestionSummary, IngestError> {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the ingestor to finish on its own (fatal error or external cancel)
    pub async fn join(self) -> Result<IngestionSummary, IngestError> {
        self.task
            .await
            .map_err(|e| IngestError::Task(e.to_string()))?
    }
}

enum StreamEnd {
    /// Stop signal observed mid-stream
    Stopped,
    /// Connection ended or errored; eligible for reconnect
    Lost(String),
    /// Writer task is gone, nothing left to feed
    ConsumerGone,
}

struct StreamReader {
    connector: Arc<dyn Connector>,
    tx: mpsc::Sender<Trade>,
    cancel: CancellationToken,
    state_tx: watch::Sender<IngestorState>,
    reconnect_delay: Duration,
    sink: SharedSink,
    stats: IngestionSummary,
}

impl StreamReader {
    fn set_state(&self, state: IngestorState) {
        self.state_tx.send_replace(state);
    }

    async fn run(mut self) -> IngestionSummary {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(IngestorState::Connecting);
            self.stats.connect_attempts += 1;

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.connector.connect() => result,
            };

            match connected {
                Ok(mut stream) => {
                    self.set_state(IngestorState::Streaming);
                    self.sink.info(
                        COMPONENT,
                        format_args!("Connected to {}", self.connector.endpoint()),
                    );

                    let end = self.stream_trades(stream.as_mut()).await;

                    if tokio::time::timeout(CLOSE_TIMEOUT, stream.close()).await.is_err() {
                        self.sink.debug(COMPONENT, format_args!("Transport close timed out"));
                    }

                    match end {
                        StreamEnd::Stopped => break,
                        StreamEnd::ConsumerGone => {
                            self.sink.warn(
                                COMPONENT,
                                format_args!("Trade consumer dropped, stopping reader"),
                            );
                            break;
                        }
                        StreamEnd::Lost(reason) => {
                            self.sink.warn(
                                COMPONENT,
                                format_args!("Connection lost: {}", reason),
                            );
                        }
                    }
                }
                Err(e) => {
                    self.sink
                        .warn(COMPONENT, format_args!("Connect attempt failed: {}", e));
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(IngestorState::Reconnecting);
            self.sink.info(
                COMPONENT,
                format_args!("Reconnecting in {:?}", self.reconnect_delay),
            );
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.stats
    }

    async fn stream_trades(&mut self, stream: &mut dyn MessageStream) -> StreamEnd {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return StreamEnd::Stopped,
                next = stream.next_text() => next,
            };

            let text = match next {
                None => return StreamEnd::Lost("connection closed".to_string()),
                Some(Err(e)) => return StreamEnd::Lost(e.to_string()),
                Some(Ok(text)) => text,
            };

            match parse_trade_message(&text) {
                Ok(trade) => {
                    self.stats.trades_received += 1;
                    if self.tx.send(trade).await.is_err() {
                        return StreamEnd::ConsumerGone;
                    }
                }
                Err(e) => {
                    self.stats.malformed_messages += 1;
                    self.sink
                        .warn(COMPONENT, format_args!("Discarding malformed message: {}", e));
                    self.sink.debug(COMPONENT, format_args!("Raw message: {}", text));
                }
            }
        }
    }
}

struct BufferWriter {
    rx: mpsc::Receiver<Trade>,
    buffer: IngestionBuffer,
    cancel: CancellationToken,
    idle_flush: Duration,
    sink: SharedSink,
    trades_received: u64,
}

impl BufferWriter {
    /// Drain the channel into the buffer until the reader hangs up
    ///
    /// Returns the number of trades persisted over the writer's lifetime.
    async fn run(mut self) -> Result<u64, IngestError> {
        let mut idle_flush = tokio::time::interval(self.idle_flush.max(Duration::from_millis(1)));
        idle_flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        idle_flush.tick().await;

        let mut fatal = false;
        loop {
            let flushed = tokio::select! {
                maybe = self.rx.recv() => match maybe {
                    Some(trade) => {
                        self.trades_received += 1;
                        self.buffer.append(trade).await.map(|_| ())
                    }
                    None => break,
                },
                _ = idle_flush.tick() => self.buffer.flush().await.map(|_| ()),
            };

            if flushed.is_err() && self.buffer.store_unwritable() {
                self.sink.error(
                    COMPONENT,
                    format_args!(
                        "Store unwritable after {} consecutive failures, stopping ingestion",
                        self.buffer.consecutive_failures()
                    ),
                );
                fatal = true;
                self.cancel.cancel();
                break;
            }
        }

        if fatal {
            // Unblock the reader; anything still queued cannot be persisted
            self.rx.close();
            let dropped = std::iter::from_fn(|| self.rx.try_recv().ok()).count();
            let last_error = match self.buffer.drain_on_shutdown().await {
                Ok(_) => "final drain succeeded".to_string(),
                Err(e) => e.to_string(),
            };
            self.sink.error(
                COMPONENT,
                format_args!(
                    "{} queued and {} buffered trades were not persisted (last store error: {})",
                    dropped,
                    self.buffer.len(),
                    last_error
                ),
            );
            return Err(IngestError::StoreUnavailable {
                consecutive_failures: self.buffer.consecutive_failures(),
            });
        }

        self.buffer.drain_on_shutdown().await?;
        self.sink.debug(
            COMPONENT,
            format_args!("Writer finished after {} trades", self.trades_received),
        );
        Ok(self.buffer.total_flushed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteTradeStore;
    use crate::streamer_core::transport::TransportError;
    use crate::telemetry::MemorySink;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use tokio::time::Instant;

    /// Stream fed by a test-held sender; dropping the sender closes the connection
    struct ScriptedStream {
        rx: mpsc::UnboundedReceiver<String>,
    }

    #[async_trait]
    impl MessageStream for ScriptedStream {
        async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
            self.rx.recv().await.map(Ok)
        }

        async fn close(&mut self) {
            self.rx.close();
        }
    }

    /// Hands out pre-scripted streams; fails once they run out
    struct ScriptedConnector {
        streams: Mutex<VecDeque<ScriptedStream>>,
        attempts: mpsc::UnboundedSender<Instant>,
    }

    impl ScriptedConnector {
        fn new(
            count: usize,
        ) -> (
            Arc<Self>,
            Vec<mpsc::UnboundedSender<String>>,
            mpsc::UnboundedReceiver<Instant>,
        ) {
            let mut streams = VecDeque::new();
            let mut senders = Vec::new();
            for _ in 0..count {
                let (tx, rx) = mpsc::unbounded_channel();
                streams.push_back(ScriptedStream { rx });
                senders.push(tx);
            }
            let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();
            let connector = Arc::new(Self {
                streams: Mutex::new(streams),
                attempts: attempts_tx,
            });
            (connector, senders, attempts_rx)
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> Result<Box<dyn MessageStream>, TransportError> {
            let _ = self.attempts.send(Instant::now());
            match self.streams.lock().unwrap().pop_front() {
                Some(stream) => Ok(Box::new(stream)),
                None => Err(TransportError::Connect("no more scripted streams".to_string())),
            }
        }

        fn endpoint(&self) -> String {
            "scripted://test".to_string()
        }
    }

    fn trade_msg(symbol: &str, price: &str, ts: i64) -> String {
        format!(
            r#"{{"stream":"x@trade","data":{{"e":"trade","s":"{}","p":"{}","q":"1.5","T":{}}}}}"#,
            symbol, price, ts
        )
    }

    fn test_config(reconnect_delay: Duration) -> IngestorConfig {
        IngestorConfig {
            buffer: BufferConfig {
                count_threshold: 100,
                time_threshold: Duration::from_secs(3600),
                max_consecutive_failures: 3,
            },
            reconnect_delay,
            channel_buffer: 16,
        }
    }

    async fn wait_for_state(rx: &mut watch::Receiver<IngestorState>, state: IngestorState) {
        rx.wait_for(|s| *s == state).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_close_triggers_one_reconnect_after_delay() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            SqliteTradeStore::open(dir.path().join("ingest.db"), MemorySink::new()).unwrap(),
        );
        let (connector, mut senders, mut attempts) = ScriptedConnector::new(2);
        let delay = Duration::from_secs(1);

        let ingestor =
            StreamIngestor::new(connector, store, test_config(delay), MemorySink::new());
        assert_eq!(ingestor.state(), IngestorState::Disconnected);
        let handle = ingestor.start();
        let mut state = handle.subscribe();

        attempts.recv().await.unwrap();
        wait_for_state(&mut state, IngestorState::Streaming).await;

        // Peer closes the first connection
        let closed_at = Instant::now();
        drop(senders.remove(0));

        let second = attempts.recv().await.unwrap();
        assert!(second.duration_since(closed_at) >= delay);
        wait_for_state(&mut state, IngestorState::Streaming).await;

        // Second connection stays open: no further attempts
        tokio::time::sleep(delay * 10).await;
        assert!(attempts.try_recv().is_err());

        let summary = handle.stop().await.unwrap();
        assert_eq!(summary.connect_attempts, 2);
        assert_eq!(*state.borrow(), IngestorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_close_does_not_reconnect() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            SqliteTradeStore::open(dir.path().join("ingest.db"), MemorySink::new()).unwrap(),
        );
        let (connector, mut senders, mut attempts) = ScriptedConnector::new(2);

        let handle = StreamIngestor::new(
            connector,
            store,
            test_config(Duration::from_secs(1)),
            MemorySink::new(),
        )
        .start();
        let mut state = handle.subscribe();

        attempts.recv().await.unwrap();
        wait_for_state(&mut state, IngestorState::Streaming).await;

        let token = handle.cancellation_token();
        token.cancel();
        drop(senders.remove(0));

        let summary = handle.join().await.unwrap();
        assert_eq!(summary.connect_attempts, 1);
        assert!(attempts.try_recv().is_err());
        assert_eq!(*state.borrow(), IngestorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_blocked_receive() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            SqliteTradeStore::open(dir.path().join("ingest.db"), MemorySink::new()).unwrap(),
        );
        let (connector, _senders, mut attempts) = ScriptedConnector::new(1);

        let handle = StreamIngestor::new(
            connector,
            store,
            test_config(Duration::from_secs(1)),
            MemorySink::new(),
        )
        .start();
        let mut state = handle.subscribe();
        attempts.recv().await.unwrap();
        wait_for_state(&mut state, IngestorState::Streaming).await;

        // The sender is still alive, so the reader is parked in next_text()
        let summary = tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .expect("stop must not wait for the next message")
            .unwrap();
        assert_eq!(summary.connect_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trades_persisted_and_malformed_discarded() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            SqliteTradeStore::open(dir.path().join("ingest.db"), MemorySink::new()).unwrap(),
        );
        let sink = MemorySink::new();
        let (connector, mut senders, mut attempts) = ScriptedConnector::new(1);

        let handle = StreamIngestor::new(
            connector,
            store.clone(),
            test_config(Duration::from_secs(1)),
            sink.clone(),
        )
        .start();
        let mut state = handle.subscribe();
        attempts.recv().await.unwrap();
        wait_for_state(&mut state, IngestorState::Streaming).await;

        let tx = senders.remove(0);
        tx.send(trade_msg("BTCUSDT", "100.5", 1_000)).unwrap();
        tx.send(r#"{"data":{"e":"trade","s":"BTCUSDT","p":"oops","q":"1","T":2}}"#.to_string())
            .unwrap();
        tx.send(trade_msg("ETHUSDT", "20.25", 2_000)).unwrap();
        tx.send(trade_msg("BTCUSDT", "101.0", 3_000)).unwrap();
        drop(tx);

        // All frames consumed once the reader notices the close
        wait_for_state(&mut state, IngestorState::Reconnecting).await;

        let summary = handle.stop().await.unwrap();
        assert_eq!(summary.trades_received, 3);
        assert_eq!(summary.malformed_messages, 1);
        assert_eq!(summary.trades_persisted, 3);

        // Below the count threshold: only the shutdown drain wrote these
        let btc = store.query_range("BTCUSDT", 0, Some(10_000)).await.unwrap();
        assert_eq!(btc.len(), 2);
        assert_eq!(btc[0].price, 100.5);
        assert_eq!(store.count(Some("ETHUSDT")).await.unwrap(), 1);
        assert_eq!(sink.count_matching(log::Level::Warn, "malformed"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timer_flushes_quiet_stream() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            SqliteTradeStore::open(dir.path().join("ingest.db"), MemorySink::new()).unwrap(),
        );
        let (connector, mut senders, mut attempts) = ScriptedConnector::new(1);
        let mut config = test_config(Duration::from_secs(1));
        config.buffer.time_threshold = Duration::from_secs(2);

        let handle = StreamIngestor::new(connector, store.clone(), config, MemorySink::new())
            .start();
        let mut state = handle.subscribe();
        attempts.recv().await.unwrap();
        wait_for_state(&mut state, IngestorState::Streaming).await;

        // Well under the count threshold, then the stream goes quiet
        let tx = senders.remove(0);
        for i in 0..3 {
            tx.send(trade_msg("BTCUSDT", "100.0", i)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(store.count(None).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.count(None).await.unwrap(), 3);

        let summary = handle.stop().await.unwrap();
        assert_eq!(summary.trades_persisted, 3);
        drop(tx);
    }

    /// Store that rejects every write
    struct BrokenStore;

    #[async_trait]
    impl TradeStore for BrokenStore {
        async fn insert_batch(&self, _records: &[Trade]) -> Result<usize, StorageError> {
            Err(StorageError::Unavailable("read-only filesystem".to_string()))
        }

        async fn query_range(
            &self,
            _symbol: &str,
            _since_ms: i64,
            _until_ms: Option<i64>,
        ) -> Result<Vec<Trade>, StorageError> {
            Ok(Vec::new())
        }

        async fn latest(&self, _symbol: &str) -> Result<Option<Trade>, StorageError> {
            Ok(None)
        }

        async fn count(&self, _symbol: Option<&str>) -> Result<u64, StorageError> {
            Ok(0)
        }

        fn backend_type(&self) -> &'static str {
            "Broken"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unwritable_store_is_fatal_to_ingestion() {
        let (connector, mut senders, mut attempts) = ScriptedConnector::new(1);
        let mut config = test_config(Duration::from_secs(1));
        config.buffer.count_threshold = 1;

        let sink = MemorySink::new();
        let handle = StreamIngestor::new(connector, Arc::new(BrokenStore), config, sink.clone())
            .start();
        let mut state = handle.subscribe();
        attempts.recv().await.unwrap();
        wait_for_state(&mut state, IngestorState::Streaming).await;

        let tx = senders.remove(0);
        for i in 0..5 {
            let _ = tx.send(trade_msg("BTCUSDT", "1.0", i));
        }

        match handle.join().await {
            Err(IngestError::StoreUnavailable {
                consecutive_failures,
            }) => assert!(consecutive_failures >= 3),
            other => panic!("expected StoreUnavailable, got {:?}", other),
        }
        assert_eq!(*state.borrow(), IngestorState::Stopped);
        assert_eq!(
            sink.count_matching(log::Level::Error, "last store error: Store unavailable: read-only filesystem"),
            1
        );
    }
}
