//! Collaborator interfaces consumed by the watcher pipeline: the chain API used to
//! discover blocks and chunks, and the finalizer that resolves a transaction into a
//! confirmed message.

use anyhow::Result;
use core::future::Future;
use core::pin::Pin;

/// Wormhole chain id assigned to NEAR.
pub const NEAR_CHAIN_ID: u16 = 15;

pub type ChainFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Header of a chunk as listed inside a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub chunk_hash: String,
    pub shard_id: u64,
    pub height_included: u64,
}

/// The subset of a block the poller needs to walk the chain and enumerate chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSummary {
    pub height: u64,
    pub hash: String,
    pub prev_hash: String,
    pub chunks: Vec<ChunkHeader>,
}

impl BlockSummary {
    /// Chunks produced in this block. Chunks carried over from an earlier height were
    /// already reported with the block that included them.
    pub fn new_chunks(&self) -> impl Iterator<Item = &ChunkHeader> + '_ {
        self.chunks
            .iter()
            .filter(move |chunk| chunk.height_included == self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTransaction {
    pub hash: String,
    pub signer_id: String,
    pub receiver_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSummary {
    pub chunk_hash: String,
    pub transactions: Vec<ChunkTransaction>,
}

/// A message emitted by the watched contract that passed the finalization check.
///
/// Built by the [`Finalizer`]; the pipeline only forwards it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePublication {
    pub tx_hash: String,
    pub block_height: u64,
    pub timestamp: u64,
    pub nonce: u32,
    pub sequence: u64,
    pub consistency_level: u8,
    pub emitter_chain: u16,
    pub emitter_address: [u8; 32],
    pub payload: Vec<u8>,
}

/// Outcome of a finalization check for one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizationReport {
    pub finalized: bool,
    pub has_message: bool,
    pub message_height: u64,
    pub message: Option<MessagePublication>,
}

impl FinalizationReport {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn without_message() -> Self {
        Self {
            finalized: true,
            ..Self::default()
        }
    }

    pub fn with_message(message: MessagePublication) -> Self {
        Self {
            finalized: true,
            has_message: true,
            message_height: message.block_height,
            message: Some(message),
        }
    }
}

/// Re-observation request delivered by the network layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationRequest {
    pub chain_id: u16,
    pub tx_hash: Vec<u8>,
}

/// Read access to the remote chain. Every error is treated as transient by the caller.
pub trait ChainApi: Send + Sync + 'static {
    fn final_block(&self) -> ChainFuture<'_, BlockSummary>;

    fn block_by_hash<'a>(&'a self, hash: &'a str) -> ChainFuture<'a, BlockSummary>;

    fn chunk<'a>(&'a self, chunk_hash: &'a str) -> ChainFuture<'a, ChunkSummary>;
}

/// Decides whether all receipts of a transaction are final and extracts its message.
pub trait Finalizer: Send + Sync + 'static {
    fn check_finalization<'a>(
        &'a self,
        tx_hash: &'a str,
        sender_account_id: &'a str,
    ) -> ChainFuture<'a, FinalizationReport>;
}
