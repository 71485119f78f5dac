use super::delay_queue::DelayQueue;
use super::job::{ChunkDescriptor, ProcessingJob};
use crate::runtime::chain::ChainApi;
use crate::runtime::health::{HealthMonitor, PULSE_INTERVAL};
use crate::runtime::telemetry::Telemetry;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Receiving half of the chunk channel, shared by every chunk fetcher.
pub type SharedChunkReceiver = Arc<Mutex<mpsc::Receiver<ChunkDescriptor>>>;

/// Outcome of turning one chunk into processing jobs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub candidates: usize,
    pub scheduled: usize,
    pub dropped: usize,
}

pub struct ChunkFetcher {
    worker_id: usize,
    task_name: String,
    chain: Arc<dyn ChainApi>,
    chunks: SharedChunkReceiver,
    queue: Arc<DelayQueue<ProcessingJob>>,
    contract_account: String,
    initial_delay: Duration,
    telemetry: Arc<Telemetry>,
    health: Arc<HealthMonitor>,
    shutdown: CancellationToken,
}

pub struct ChunkFetcherParams {
    pub chain: Arc<dyn ChainApi>,
    pub chunks: SharedChunkReceiver,
    pub queue: Arc<DelayQueue<ProcessingJob>>,
    pub contract_account: String,
    pub initial_delay: Duration,
    pub telemetry: Arc<Telemetry>,
    pub health: Arc<HealthMonitor>,
    pub shutdown: CancellationToken,
}

impl ChunkFetcher {
    pub fn new(worker_id: usize, params: ChunkFetcherParams) -> Self {
        Self {
            worker_id,
            task_name: format!("chunk_fetcher_{worker_id}"),
            chain: params.chain,
            chunks: params.chunks,
            queue: params.queue,
            contract_account: params.contract_account,
            initial_delay: params.initial_delay,
            telemetry: params.telemetry,
            health: params.health,
            shutdown: params.shutdown,
        }
    }

    pub async fn run(self) -> Result<()> {
        let mut pulse = interval(PULSE_INTERVAL);
        pulse.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    break;
                }
                _ = pulse.tick() => {
                    self.health.pulse(&self.task_name);
                }
                next = recv_shared(&self.chunks) => {
                    let Some(descriptor) = next else {
                        tracing::debug!(worker = self.worker_id, "chunk channel closed");
                        break;
                    };
                    self.process_chunk(&descriptor).await;
                }
            }
        }

        tracing::debug!(worker = self.worker_id, "chunk fetcher stopped");
        Ok(())
    }

    /// Fetches one chunk and schedules a job per transaction addressed to the contract.
    ///
    /// A failed fetch is counted and not retried. Shutdown abandons the fetch. When the queue is full the remaining
    /// candidates of this chunk are dropped; jobs scheduled before that stay queued.
    pub async fn process_chunk(&self, descriptor: &ChunkDescriptor) -> ChunkOutcome {
        let fetched = tokio::select! {
            _ = self.shutdown.cancelled() => {
                return ChunkOutcome::default();
            }
            fetched = self.chain.chunk(&descriptor.chunk_hash) => fetched,
        };
        let chunk = match fetched {
            Ok(chunk) => chunk,
            Err(err) => {
                self.telemetry.record_chunk_fetch_error();
                tracing::warn!(
                    worker = self.worker_id,
                    chunk_hash = %descriptor.chunk_hash,
                    height = descriptor.block_height,
                    error = %err,
                    "chunk fetch failed"
                );
                return ChunkOutcome::default();
            }
        };

        let candidates: Vec<ProcessingJob> = chunk
            .transactions
            .into_iter()
            .filter(|tx| tx.receiver_id == self.contract_account)
            .map(|tx| ProcessingJob::new(tx.hash, tx.signer_id, self.initial_delay))
            .collect();

        let mut outcome = ChunkOutcome {
            candidates: candidates.len(),
            ..ChunkOutcome::default()
        };

        for job in candidates {
            let tx_hash = job.tx_hash.clone();
            let ready_at = Instant::now() + self.initial_delay;
            match self.queue.try_schedule(job, ready_at).await {
                Ok(()) => {
                    outcome.scheduled += 1;
                    self.telemetry.record_job_scheduled();
                    tracing::debug!(
                        worker = self.worker_id,
                        tx_hash = %tx_hash,
                        height = descriptor.block_height,
                        "scheduled transaction"
                    );
                }
                Err(_) => {
                    outcome.dropped = outcome.candidates - outcome.scheduled;
                    self.telemetry.record_queue_overflow(outcome.dropped as u64);
                    tracing::warn!(
                        worker = self.worker_id,
                        chunk_hash = %descriptor.chunk_hash,
                        dropped = outcome.dropped,
                        capacity = self.queue.capacity(),
                        "transaction queue full; skipping remaining transactions of chunk"
                    );
                    break;
                }
            }
        }

        outcome
    }
}

async fn recv_shared(chunks: &SharedChunkReceiver) -> Option<ChunkDescriptor> {
    chunks.lock().await.recv().await
}
