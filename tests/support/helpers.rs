use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{bail, Result};
use nearwatch::{
    ChainApi, ChainFuture, FinalizationReport, Finalizer, MessagePublication, NearRpcClient,
    NEAR_CHAIN_ID,
};
use once_cell::sync::Lazy;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Finalizer over the NEAR RPC client: a transaction is confirmed once its status is
/// `FINAL`; the first log emitted by the contract becomes the message payload and the
/// height of the block that executed it becomes the message height.
pub struct ContractLogFinalizer {
    client: Arc<NearRpcClient>,
    contract: String,
}

impl ContractLogFinalizer {
    pub fn new(client: Arc<NearRpcClient>, contract: impl Into<String>) -> Self {
        Self {
            client,
            contract: contract.into(),
        }
    }
}

impl Finalizer for ContractLogFinalizer {
    fn check_finalization<'a>(
        &'a self,
        tx_hash: &'a str,
        sender_account_id: &'a str,
    ) -> ChainFuture<'a, FinalizationReport> {
        Box::pin(async move {
            let status = self.client.tx_status(tx_hash, sender_account_id).await?;
            if !status.is_final() {
                return Ok(FinalizationReport::pending());
            }

            let Some(receipt) = status
                .receipts_outcome
                .iter()
                .find(|receipt| {
                    receipt.outcome.executor_id == self.contract && !receipt.outcome.logs.is_empty()
                })
            else {
                return Ok(FinalizationReport::without_message());
            };

            let block = ChainApi::block_by_hash(self.client.as_ref(), &receipt.block_hash).await?;
            Ok(FinalizationReport::with_message(MessagePublication {
                tx_hash: tx_hash.to_string(),
                block_height: block.height,
                timestamp: 0,
                nonce: 0,
                sequence: 0,
                consistency_level: 0,
                emitter_chain: NEAR_CHAIN_ID,
                emitter_address: [0u8; 32],
                payload: receipt.outcome.logs[0].clone().into_bytes(),
            }))
        })
    }
}

pub async fn wait_for<F>(mut condition: F, timeout: Duration, what: &str) -> Result<()>
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    loop {
        if condition() {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("{what} not reached within {:?}", timeout);
        }
        sleep(Duration::from_millis(20)).await;
    }
}
