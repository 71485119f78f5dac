//! Final block polling with gap handling.
//!
//! The poller owns the watermark (highest final height fully emitted). Each tick it
//! fetches the final block, walks parent hashes back to the watermark and emits one
//! [`ChunkDescriptor`] per new chunk in increasing height order.

use super::job::ChunkDescriptor;
use crate::runtime::chain::{BlockSummary, ChainApi};
use crate::runtime::health::HealthMonitor;
use crate::runtime::telemetry::Telemetry;
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub(crate) const BLOCK_POLLER_TASK: &str = "block_poller";

pub struct BlockPoller {
    chain: Arc<dyn ChainApi>,
    chunk_tx: mpsc::Sender<ChunkDescriptor>,
    poll_interval: Duration,
    max_fall_behind_blocks: u64,
    telemetry: Arc<Telemetry>,
    health: Arc<HealthMonitor>,
    shutdown: CancellationToken,
}

pub struct BlockPollerParams {
    pub chain: Arc<dyn ChainApi>,
    pub chunk_tx: mpsc::Sender<ChunkDescriptor>,
    pub poll_interval: Duration,
    pub max_fall_behind_blocks: u64,
    pub telemetry: Arc<Telemetry>,
    pub health: Arc<HealthMonitor>,
    pub shutdown: CancellationToken,
}

enum Emission {
    Complete(usize),
    Cancelled,
}

impl BlockPoller {
    pub fn new(params: BlockPollerParams) -> Self {
        Self {
            chain: params.chain,
            chunk_tx: params.chunk_tx,
            poll_interval: params.poll_interval,
            max_fall_behind_blocks: params.max_fall_behind_blocks,
            telemetry: params.telemetry,
            health: params.health,
            shutdown: params.shutdown,
        }
    }

    /// Watermark to start from: one below the current final height so the current
    /// final block is still processed.
    pub async fn initial_watermark(chain: &dyn ChainApi) -> Result<u64> {
        let block = chain
            .final_block()
            .await
            .context("failed to fetch the initial final block")?;
        if block.height == 0 {
            bail!("final block height is 0; cannot derive a starting watermark");
        }

        tracing::info!(
            height = block.height,
            hash = %block.hash,
            "fetched initial final block"
        );
        Ok(block.height - 1)
    }

    /// Runs the polling loop until shutdown, starting from `watermark`.
    pub async fn run(self, mut watermark: u64) -> Result<()> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    break;
                }
                _ = ticker.tick() => {
                    self.health.pulse(BLOCK_POLLER_TASK);
                    if self.chunk_tx.is_closed() {
                        if self.shutdown.is_cancelled() {
                            break;
                        }
                        bail!("chunk channel closed while the block poller is running");
                    }

                    let polled = tokio::select! {
                        _ = self.shutdown.cancelled() => None,
                        polled = self.poll_once(watermark) => Some(polled),
                    };
                    let Some(polled) = polled else {
                        break;
                    };

                    match polled {
                        Ok(next) => watermark = next,
                        Err(err) => {
                            self.telemetry.record_block_poll_error();
                            tracing::warn!(
                                watermark,
                                error = %err,
                                "block poll failed; retrying on next tick"
                            );
                        }
                    }
                }
            }
        }

        tracing::info!(watermark, "block poller stopped");
        Ok(())
    }

    /// Performs one polling cycle and returns the new watermark.
    ///
    /// On error the caller must keep the previous watermark so the range is retried.
    pub async fn poll_once(&self, watermark: u64) -> Result<u64> {
        let final_block = self
            .chain
            .final_block()
            .await
            .context("failed to fetch final block")?;
        let final_height = final_block.height;

        if final_height <= watermark {
            return Ok(watermark);
        }

        let mut watermark = watermark;
        if final_height - watermark > self.max_fall_behind_blocks {
            tracing::warn!(
                watermark,
                final_height,
                max_fall_behind_blocks = self.max_fall_behind_blocks,
                skipped = final_height - watermark - 1,
                "fell too far behind the final block; skipping unreachable range"
            );
            self.telemetry.record_gap_reset();
            watermark = final_height - 1;
        }

        let blocks = self.collect_range(final_block, watermark).await?;
        match self.emit_chunks(&blocks).await? {
            Emission::Complete(emitted) => {
                self.telemetry.record_chunks_emitted(emitted as u64);
                tracing::debug!(
                    from = watermark + 1,
                    to = final_height,
                    blocks = blocks.len(),
                    chunks = emitted,
                    "emitted chunks for final blocks"
                );
                Ok(final_height)
            }
            Emission::Cancelled => Ok(watermark),
        }
    }

    /// Fetches every block above `watermark` up to and including `final_block`,
    /// returned in increasing height order.
    async fn collect_range(
        &self,
        final_block: BlockSummary,
        watermark: u64,
    ) -> Result<Vec<BlockSummary>> {
        let mut blocks = vec![final_block];

        loop {
            let Some(last) = blocks.last() else {
                break;
            };
            if last.height <= watermark.saturating_add(1) {
                break;
            }

            let parent = self
                .chain
                .block_by_hash(&last.prev_hash)
                .await
                .with_context(|| {
                    format!(
                        "failed to fetch block {} (parent of height {})",
                        last.prev_hash, last.height
                    )
                })?;

            if parent.height >= last.height {
                bail!(
                    "block {} at height {} has parent at non-decreasing height {}",
                    last.hash,
                    last.height,
                    parent.height
                );
            }
            if parent.height <= watermark {
                break;
            }
            blocks.push(parent);
        }

        blocks.reverse();
        Ok(blocks)
    }

    async fn emit_chunks(&self, blocks: &[BlockSummary]) -> Result<Emission> {
        let mut emitted = 0usize;
        for block in blocks {
            for chunk in block.new_chunks() {
                let descriptor = ChunkDescriptor {
                    chunk_hash: chunk.chunk_hash.clone(),
                    block_height: block.height,
                };

                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        return Ok(Emission::Cancelled);
                    }
                    sent = self.chunk_tx.send(descriptor) => {
                        if sent.is_err() {
                            bail!("chunk channel closed while emitting height {}", block.height);
                        }
                    }
                }
                emitted += 1;
            }
        }
        Ok(Emission::Complete(emitted))
    }
}
