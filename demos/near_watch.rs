use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use nearwatch::{
    ChainFuture, FinalizationReport, Finalizer, MessagePublication, NearRpcClient, Network,
    Runner, WatcherConfig, NEAR_CHAIN_ID,
};
use tokio::sync::mpsc;

const DEFAULT_LOG_DIRECTIVE: &str = "info";
const DEFAULT_CHUNK_WORKERS: usize = 4;
const DEFAULT_TX_WORKERS: usize = 20;
const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
const DEFAULT_INITIAL_DELAY_MS: u64 = 3_000;

#[tokio::main]
async fn main() -> Result<()> {
    init_example_tracing();

    let config = config_from_env()?;
    println!(
        "Watching {} on {} via {}",
        config.contract_account(),
        config.network(),
        config.rpc_url()
    );

    let client = Arc::new(NearRpcClient::from_config(&config)?);
    let finalizer = Arc::new(ContractLogFinalizer {
        client: client.clone(),
        contract: config.contract_account().to_owned(),
    });

    let (msg_tx, mut msg_rx) = mpsc::channel::<MessagePublication>(256);
    // Requests are never sent; the sender stays alive so the handler keeps running.
    let (_obsv_tx, obsv_rx) = mpsc::channel(16);

    let printer = tokio::spawn(async move {
        while let Some(message) = msg_rx.recv().await {
            println!(
                "message tx={} height={} payload={}",
                message.tx_hash,
                message.block_height,
                String::from_utf8_lossy(&message.payload)
            );
        }
    });

    let mut runner = Runner::new(config, client.clone(), finalizer, msg_tx, obsv_rx);
    let result = runner.run_until_ctrl_c().await;
    drop(runner);
    let _ = printer.await;

    let metrics = client.metrics();
    println!(
        "rpc: requests={} errors={} timeouts={} avg_latency_ms={:.2}",
        metrics.total_requests,
        metrics.total_errors,
        metrics.total_timeouts,
        metrics.average_latency_ms
    );
    result
}

fn init_example_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    nearwatch::init_tracing();
}

fn config_from_env() -> Result<WatcherConfig> {
    let network = match env::var("NEARWATCH_NETWORK") {
        Ok(value) => Network::from_str(&value)?,
        Err(_) => Network::default(),
    };

    let mut builder = WatcherConfig::builder()
        .network(network)
        .chunk_workers(parse_env_with_default(
            "NEARWATCH_CHUNK_WORKERS",
            DEFAULT_CHUNK_WORKERS,
        )?)
        .tx_workers(parse_env_with_default("NEARWATCH_TX_WORKERS", DEFAULT_TX_WORKERS)?)
        .queue_capacity(parse_env_with_default(
            "NEARWATCH_QUEUE_CAPACITY",
            DEFAULT_QUEUE_CAPACITY,
        )?)
        .initial_tx_delay(Duration::from_millis(parse_env_with_default(
            "NEARWATCH_INITIAL_DELAY_MS",
            DEFAULT_INITIAL_DELAY_MS,
        )?));

    if let Ok(url) = env::var("NEARWATCH_RPC_URL") {
        builder = builder.rpc_url(url);
    }
    if let Ok(contract) = env::var("NEARWATCH_CONTRACT") {
        builder = builder.contract_account(contract);
    }

    builder.build()
}

fn parse_env_with_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("failed to parse {key}='{value}'")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("failed to read {key}")),
    }
}

/// Confirms a transaction once NEAR reports it `FINAL` and forwards the first log the
/// contract emitted as the message payload.
struct ContractLogFinalizer {
    client: Arc<NearRpcClient>,
    contract: String,
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

            let Some(receipt) = status.receipts_outcome.iter().find(|receipt| {
                receipt.outcome.executor_id == self.contract && !receipt.outcome.logs.is_empty()
            }) else {
                return Ok(FinalizationReport::without_message());
            };

            let block = self.client.block_by_hash(&receipt.block_hash).await?;
            Ok(FinalizationReport::with_message(MessagePublication {
                tx_hash: tx_hash.to_string(),
                block_height: block.header.height,
                timestamp: block.header.timestamp / 1_000_000_000,
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
