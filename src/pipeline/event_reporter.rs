//! Aggregation of processing signals into [`Telemetry`] plus a periodic snapshot log.
//!
//! Publishing never blocks: when the event channel is full the sample is dropped, so
//! reporting cannot slow down transaction processing.

use super::delay_queue::DelayQueue;
use super::job::ProcessingJob;
use crate::runtime::health::HealthMonitor;
use crate::runtime::telemetry::Telemetry;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub(crate) const EVENT_REPORTER_TASK: &str = "event_reporter";

/// Default bound of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherEvent {
    /// Height of the latest message processed by a transaction worker.
    ProcessedHeight(u64),
    /// Time from discovery to confirmation of a transaction that carried a message.
    TxLatency(Duration),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<WatcherEvent>,
}

pub fn event_channel(capacity: usize) -> (EventSender, mpsc::Receiver<WatcherEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender { tx }, rx)
}

impl EventSender {
    pub fn processed_height(&self, height: u64) {
        self.publish(WatcherEvent::ProcessedHeight(height));
    }

    pub fn tx_latency(&self, latency: Duration) {
        self.publish(WatcherEvent::TxLatency(latency));
    }

    fn publish(&self, event: WatcherEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::trace!(?event, "event channel full; dropping sample");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

pub struct EventReporter {
    events: mpsc::Receiver<WatcherEvent>,
    telemetry: Arc<Telemetry>,
    queue: Arc<DelayQueue<ProcessingJob>>,
    health: Arc<HealthMonitor>,
    interval: Duration,
    shutdown: CancellationToken,
}

pub struct EventReporterParams {
    pub events: mpsc::Receiver<WatcherEvent>,
    pub telemetry: Arc<Telemetry>,
    pub queue: Arc<DelayQueue<ProcessingJob>>,
    pub health: Arc<HealthMonitor>,
    pub interval: Duration,
    pub shutdown: CancellationToken,
}

impl EventReporter {
    pub fn new(params: EventReporterParams) -> Self {
        Self {
            events: params.events,
            telemetry: params.telemetry,
            queue: params.queue,
            health: params.health,
            interval: params.interval,
            shutdown: params.shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = self.telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!(target: "nearwatch::metrics", "event reporter shutting down");
                    break;
                }
                Some(event) = self.events.recv() => {
                    self.apply(event);
                }
                _ = ticker.tick() => {
                    self.health.pulse(EVENT_REPORTER_TASK);

                    let current = self.telemetry.snapshot();
                    let forwarded_delta = current
                        .observations_forwarded
                        .saturating_sub(last_snapshot.observations_forwarded);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        forwarded_delta as f64 / elapsed
                    };
                    let queue_len = self.queue.len().await;

                    tracing::info!(
                        target: "nearwatch::metrics",
                        throughput = format!("{throughput:.2}"),
                        last_processed_height = current.last_processed_height,
                        queue_len,
                        chunks_emitted = current.chunks_emitted,
                        jobs_scheduled = current.jobs_scheduled,
                        observations = current.observations_forwarded,
                        retries = current.tx_retries,
                        retries_exhausted = current.tx_retries_exhausted,
                        queue_overflows = current.queue_overflows,
                        chunk_fetch_errors = current.chunk_fetch_errors,
                        avg_latency_ms = format!("{:.1}", current.average_latency_ms),
                        "watcher metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }

        Ok(())
    }

    fn apply(&self, event: WatcherEvent) {
        match event {
            WatcherEvent::ProcessedHeight(height) => self.telemetry.record_processed_height(height),
            WatcherEvent::TxLatency(latency) => self.telemetry.record_latency(latency),
        }
    }
}
