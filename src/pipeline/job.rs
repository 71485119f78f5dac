use std::time::Duration;
use tokio::time::Instant;

/// One chunk of one finalized block, handed from the poller to a chunk fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub chunk_hash: String,
    pub block_height: u64,
}

/// Retryable unit of work: resolve one candidate transaction into a confirmed message.
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub tx_hash: String,
    /// Shard routing hint for the RPC layer. Not necessarily the real signer.
    pub sender_account_id: String,
    pub creation_time: Instant,
    pub retry_count: u32,
    pub next_delay: Duration,

    // filled in while processing, reporting only
    pub has_message: bool,
    pub message_block_height: u64,
}

impl ProcessingJob {
    pub fn new(
        tx_hash: impl Into<String>,
        sender_account_id: impl Into<String>,
        initial_delay: Duration,
    ) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            sender_account_id: sender_account_id.into(),
            creation_time: Instant::now(),
            retry_count: 0,
            next_delay: initial_delay,
            has_message: false,
            message_block_height: 0,
        }
    }
}
