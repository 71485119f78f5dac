//! Serde views of the NEAR JSON-RPC responses the watcher reads. Only the fields the
//! pipeline needs are modelled; everything else in the response is ignored.

use crate::runtime::chain::{BlockSummary, ChunkHeader, ChunkSummary, ChunkTransaction};
use serde::Deserialize;

/// `final_execution_status` reported once every receipt of a transaction is final.
pub const FINAL_EXECUTION_STATUS: &str = "FINAL";

#[derive(Debug, Clone, Deserialize)]
pub struct BlockView {
    pub header: BlockHeaderView,
    #[serde(default)]
    pub chunks: Vec<ChunkHeaderView>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeaderView {
    pub height: u64,
    pub hash: String,
    pub prev_hash: String,
    /// Nanoseconds since the unix epoch.
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkHeaderView {
    pub chunk_hash: String,
    pub shard_id: u64,
    pub height_included: u64,
    #[serde(default)]
    pub height_created: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkView {
    pub header: ChunkHeaderView,
    #[serde(default)]
    pub transactions: Vec<SignedTransactionView>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignedTransactionView {
    pub hash: String,
    pub signer_id: String,
    pub receiver_id: String,
    #[serde(default)]
    pub nonce: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxStatusView {
    #[serde(default)]
    pub final_execution_status: Option<String>,
    #[serde(default)]
    pub status: serde_json::Value,
    pub transaction: SignedTransactionView,
    pub transaction_outcome: ExecutionOutcomeWithIdView,
    #[serde(default)]
    pub receipts_outcome: Vec<ExecutionOutcomeWithIdView>,
}

impl TxStatusView {
    pub fn is_final(&self) -> bool {
        self.final_execution_status.as_deref() == Some(FINAL_EXECUTION_STATUS)
    }

    /// Logs emitted by receipts executed on `account_id`, in receipt order.
    pub fn logs_of<'a>(&'a self, account_id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.receipts_outcome
            .iter()
            .filter(move |receipt| receipt.outcome.executor_id == account_id)
            .flat_map(|receipt| receipt.outcome.logs.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionOutcomeWithIdView {
    pub id: String,
    pub block_hash: String,
    pub outcome: ExecutionOutcomeView,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionOutcomeView {
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub receipt_ids: Vec<String>,
    pub executor_id: String,
    #[serde(default)]
    pub status: serde_json::Value,
}

impl From<ChunkHeaderView> for ChunkHeader {
    fn from(view: ChunkHeaderView) -> Self {
        Self {
            chunk_hash: view.chunk_hash,
            shard_id: view.shard_id,
            height_included: view.height_included,
        }
    }
}

impl From<BlockView> for BlockSummary {
    fn from(view: BlockView) -> Self {
        Self {
            height: view.header.height,
            hash: view.header.hash,
            prev_hash: view.header.prev_hash,
            chunks: view.chunks.into_iter().map(ChunkHeader::from).collect(),
        }
    }
}

impl From<SignedTransactionView> for ChunkTransaction {
    fn from(view: SignedTransactionView) -> Self {
        Self {
            hash: view.hash,
            signer_id: view.signer_id,
            receiver_id: view.receiver_id,
        }
    }
}

impl From<ChunkView> for ChunkSummary {
    fn from(view: ChunkView) -> Self {
        Self {
            chunk_hash: view.header.chunk_hash,
            transactions: view
                .transactions
                .into_iter()
                .map(ChunkTransaction::from)
                .collect(),
        }
    }
}
