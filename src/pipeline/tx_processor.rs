use super::backoff::{RetryBackoff, RetryDisposition};
use super::delay_queue::DelayQueue;
use super::event_reporter::EventSender;
use super::job::ProcessingJob;
use crate::runtime::chain::{FinalizationReport, Finalizer, MessagePublication};
use crate::runtime::health::{HealthMonitor, PULSE_INTERVAL};
use crate::runtime::telemetry::Telemetry;
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// What happened to a job after one finalization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Confirmed { forwarded: bool },
    Rescheduled { retry: u32, delay: Duration },
    Dropped,
    Cancelled,
}

pub struct TxProcessor {
    worker_id: usize,
    task_name: String,
    finalizer: Arc<dyn Finalizer>,
    queue: Arc<DelayQueue<ProcessingJob>>,
    backoff: RetryBackoff,
    msg_tx: mpsc::Sender<MessagePublication>,
    events: EventSender,
    telemetry: Arc<Telemetry>,
    health: Arc<HealthMonitor>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

pub struct TxProcessorParams {
    pub finalizer: Arc<dyn Finalizer>,
    pub queue: Arc<DelayQueue<ProcessingJob>>,
    pub backoff: RetryBackoff,
    pub msg_tx: mpsc::Sender<MessagePublication>,
    pub events: EventSender,
    pub telemetry: Arc<Telemetry>,
    pub health: Arc<HealthMonitor>,
    pub poll_interval: Duration,
    pub shutdown: CancellationToken,
}

impl TxProcessor {
    pub fn new(worker_id: usize, params: TxProcessorParams) -> Self {
        Self {
            worker_id,
            task_name: format!("tx_processor_{worker_id}"),
            finalizer: params.finalizer,
            queue: params.queue,
            backoff: params.backoff,
            msg_tx: params.msg_tx,
            events: params.events,
            telemetry: params.telemetry,
            health: params.health,
            poll_interval: params.poll_interval,
            shutdown: params.shutdown,
        }
    }

    pub async fn run(self) -> Result<()> {
        let mut last_pulse: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    break;
                }
                _ = sleep(self.poll_interval) => {}
            }

            if last_pulse.map_or(true, |at| at.elapsed() >= PULSE_INTERVAL) {
                self.health.pulse(&self.task_name);
                last_pulse = Some(Instant::now());
            }

            self.drain_ready().await;
        }

        tracing::debug!(worker = self.worker_id, "tx processor stopped");
        Ok(())
    }

    /// Processes every job that is ready right now, returning how many were handled.
    pub async fn drain_ready(&self) -> usize {
        let mut handled = 0;
        while !self.shutdown.is_cancelled() {
            let Some(job) = self.queue.pop_if_ready().await else {
                break;
            };
            self.process(job).await;
            handled += 1;
        }
        handled
    }

    pub async fn process(&self, mut job: ProcessingJob) -> TxOutcome {
        let result = tokio::select! {
            _ = self.shutdown.cancelled() => {
                tracing::debug!(
                    worker = self.worker_id,
                    tx_hash = %job.tx_hash,
                    "finalization check abandoned on shutdown"
                );
                return TxOutcome::Cancelled;
            }
            result = self
                .finalizer
                .check_finalization(&job.tx_hash, &job.sender_account_id) => result,
        };

        let failure = match result {
            Ok(report) if report.finalized => return self.confirm(job, report).await,
            Ok(_) => anyhow!("transaction receipts not finalized yet"),
            Err(err) => err,
        };

        match self.backoff.advance(&mut job) {
            RetryDisposition::Retry(delay) => {
                let retry = job.retry_count;
                tracing::info!(
                    worker = self.worker_id,
                    tx_hash = %job.tx_hash,
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure,
                    "transaction processing failed; retrying"
                );
                self.telemetry.record_tx_retry();
                self.queue.schedule(job, Instant::now() + delay).await;
                TxOutcome::Rescheduled { retry, delay }
            }
            RetryDisposition::Exhausted => {
                tracing::warn!(
                    worker = self.worker_id,
                    tx_hash = %job.tx_hash,
                    retries = job.retry_count,
                    error = %failure,
                    "transaction processing retries exhausted; dropping"
                );
                self.telemetry.record_tx_retries_exhausted();
                TxOutcome::Dropped
            }
        }
    }

    async fn confirm(&self, mut job: ProcessingJob, report: FinalizationReport) -> TxOutcome {
        job.has_message = report.has_message;
        job.message_block_height = report.message_height;

        let mut forwarded = false;
        if let Some(message) = report.message {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return TxOutcome::Cancelled;
                }
                sent = self.msg_tx.send(message) => {
                    match sent {
                        Ok(()) => {
                            forwarded = true;
                            self.telemetry.record_observation_forwarded();
                            tracing::info!(
                                worker = self.worker_id,
                                tx_hash = %job.tx_hash,
                                height = job.message_block_height,
                                "message observed"
                            );
                        }
                        Err(_) => {
                            tracing::warn!(
                                worker = self.worker_id,
                                tx_hash = %job.tx_hash,
                                "message channel closed; observation not delivered"
                            );
                        }
                    }
                }
            }
        }

        if job.has_message {
            self.events.tx_latency(job.creation_time.elapsed());
        }
        self.events.processed_height(job.message_block_height);

        TxOutcome::Confirmed { forwarded }
    }
}
