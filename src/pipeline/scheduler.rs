//! Periodic analytics task
//!
//! Runs `AnalyticsEngine::run_cycle` on a fixed cadence and publishes the
//! latest snapshot on a watch channel. A cycle that has to wait for data
//! leaves the last published snapshot in place, so consumers keep serving
//! last-known values while the store catches up (or while ingestion is down).

use super::engine::{AnalyticsEngine, CycleOutcome, PairSnapshot};
use super::types::Signal;
use crate::telemetry::SharedSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const COMPONENT: &str = "scheduler";

type NowFn = Box<dyn Fn() -> i64 + Send + Sync>;

pub struct AnalyticsLoop {
    engine: Arc<AnalyticsEngine>,
    interval: Duration,
    sink: SharedSink,
    /// Timestamp function (for testing with mock time)
    now_fn: NowFn,
}

impl AnalyticsLoop {
    /// Uses wall-clock time (`chrono::Utc::now()`) for cycle timestamps
    pub fn new(engine: Arc<AnalyticsEngine>, interval: Duration, sink: SharedSink) -> Self {
        Self {
            engine,
            interval,
            sink,
            now_fn: Box::new(|| chrono::Utc::now().timestamp_millis()),
        }
    }

    pub fn with_now_fn<F>(mut self, now_fn: F) -> Self
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        self.now_fn = Box::new(now_fn);
        self
    }

    /// Run until `cancel` fires; returns the number of cycles executed
    pub async fn run(
        self,
        cancel: CancellationToken,
        tx: watch::Sender<Option<PairSnapshot>>,
    ) -> u64 {
        let config = self.engine.config();
        self.sink.info(
            COMPONENT,
            format_args!(
                "⏰ Analytics loop for {}/{} every {:?} (timeframe {}, window {}, z ±{})",
                config.symbol_y,
                config.symbol_x,
                self.interval,
                config.timeframe,
                config.window,
                config.z_threshold
            ),
        );

        let mut timer = interval(self.interval.max(Duration::from_millis(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut cycles = 0u64;
        let mut last_signal = Signal::None;
        let mut last_wait: Option<String> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            let now_ms = (self.now_fn)();
            cycles += 1;

            match self.engine.run_cycle(now_ms).await {
                CycleOutcome::Ready(snapshot) => {
                    last_wait = None;
                    if snapshot.signal != last_signal {
                        self.report_signal(&snapshot);
                        last_signal = snapshot.signal;
                    }
                    tx.send_replace(Some(snapshot));
                }
                CycleOutcome::Waiting(reason) => {
                    // Log each distinct wait reason once
                    let reason = reason.to_string();
                    if last_wait.as_deref() != Some(reason.as_str()) {
                        self.sink
                            .info(COMPONENT, format_args!("Analytics {}", reason));
                        last_wait = Some(reason);
                    }
                }
            }
        }

        self.sink.info(
            COMPONENT,
            format_args!("Analytics loop stopped after {} cycles", cycles),
        );
        cycles
    }

    fn report_signal(&self, snapshot: &PairSnapshot) {
        let z = snapshot.latest_zscore.unwrap_or(f64::NAN);
        let threshold = self.engine.config().z_threshold;
        match snapshot.signal {
            Signal::Sell => self.sink.info(
                COMPONENT,
                format_args!(
                    "🔴 SELL signal {}/{}: z-score {:.2} > {}",
                    snapshot.symbol_y, snapshot.symbol_x, z, threshold
                ),
            ),
            Signal::Buy => self.sink.info(
                COMPONENT,
                format_args!(
                    "🟢 BUY signal {}/{}: z-score {:.2} < -{}",
                    snapshot.symbol_y, snapshot.symbol_x, z, threshold
                ),
            ),
            Signal::None => self.sink.debug(
                COMPONENT,
                format_args!(
                    "Signal cleared {}/{}: z-score {:.2}",
                    snapshot.symbol_y, snapshot.symbol_x, z
                ),
            ),
        }
    }
}

/// Run the analytics loop against wall-clock time
pub async fn run_analytics_loop(
    engine: Arc<AnalyticsEngine>,
    interval: Duration,
    cancel: CancellationToken,
    tx: watch::Sender<Option<PairSnapshot>>,
    sink: SharedSink,
) -> u64 {
    AnalyticsLoop::new(engine, interval, sink)
        .run(cancel, tx)
        .await
}
