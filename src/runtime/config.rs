use crate::runtime::telemetry;
use anyhow::{bail, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
const DEFAULT_INITIAL_TX_DELAY_SECS: u64 = 3;
const DEFAULT_TX_RETRY_LIMIT: u32 = 4;
const DEFAULT_CHUNK_WORKERS: usize = 20;
const DEFAULT_TX_WORKERS: usize = 100;
const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
const DEFAULT_MAX_FALL_BEHIND_BLOCKS: u64 = 200;
const DEFAULT_TX_POLL_INTERVAL_MS: u64 = 1;
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;

/// Which NEAR network the watcher observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl Network {
    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://rpc.mainnet.near.org",
            Network::Testnet => "https://rpc.testnet.near.org",
        }
    }

    pub fn default_contract_account(&self) -> &'static str {
        match self {
            Network::Mainnet => "contract.wormhole_crypto.near",
            Network::Testnet => "wormhole_crypto.testnet",
        }
    }

    pub fn is_mainnet(&self) -> bool {
        matches!(self, Network::Mainnet)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => f.write_str("mainnet"),
            Network::Testnet => f.write_str("testnet"),
        }
    }
}

impl FromStr for Network {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => bail!("unknown network '{other}' (expected mainnet or testnet)"),
        }
    }
}

/// Runtime configuration for the watcher pipeline.
///
/// Instances are built through [`WatcherConfig::builder`] so invariants are validated
/// before any component reads the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    network: Network,
    rpc_url: String,
    contract_account: String,
    poll_interval: Duration,
    initial_tx_delay: Duration,
    tx_retry_limit: u32,
    chunk_workers: usize,
    tx_workers: usize,
    queue_capacity: usize,
    max_fall_behind_blocks: u64,
    tx_poll_interval: Duration,
    metrics_interval: Duration,
    rpc_timeout: Duration,
}

impl WatcherConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> WatcherConfigBuilder {
        WatcherConfigBuilder::default()
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// JSON-RPC endpoint of the NEAR node.
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Account id of the contract whose transactions are watched.
    pub fn contract_account(&self) -> &str {
        &self.contract_account
    }

    /// Interval between final block polls.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Delay between discovering a transaction and the first finalization check.
    pub fn initial_tx_delay(&self) -> Duration {
        self.initial_tx_delay
    }

    pub fn tx_retry_limit(&self) -> u32 {
        self.tx_retry_limit
    }

    pub fn chunk_workers(&self) -> usize {
        self.chunk_workers
    }

    pub fn tx_workers(&self) -> usize {
        self.tx_workers
    }

    /// Bound of both the chunk channel and the transaction delay queue.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Largest distance between watermark and final height that is still backfilled.
    pub fn max_fall_behind_blocks(&self) -> u64 {
        self.max_fall_behind_blocks
    }

    /// Sleep between queue drains in each transaction worker.
    pub fn tx_poll_interval(&self) -> Duration {
        self.tx_poll_interval
    }

    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    pub fn validate(&self) -> Result<()> {
        validate_url(&self.rpc_url)?;
        ensure_not_empty(&self.contract_account, "contract_account")?;

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be greater than 0");
        }

        if self.initial_tx_delay.is_zero() {
            bail!("initial_tx_delay must be greater than 0");
        }

        if self.chunk_workers == 0 {
            bail!("chunk_workers must be greater than 0");
        }

        if self.tx_workers == 0 {
            bail!("tx_workers must be greater than 0");
        }

        if self.queue_capacity == 0 {
            bail!("queue_capacity must be greater than 0");
        }

        if self.max_fall_behind_blocks == 0 {
            bail!("max_fall_behind_blocks must be greater than 0");
        }

        if self.tx_poll_interval.is_zero() {
            bail!("tx_poll_interval must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if self.rpc_timeout.is_zero() {
            bail!("rpc_timeout must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct WatcherConfigBuilder {
    network: Option<Network>,
    rpc_url: Option<String>,
    contract_account: Option<String>,
    poll_interval: Option<Duration>,
    initial_tx_delay: Option<Duration>,
    tx_retry_limit: Option<u32>,
    chunk_workers: Option<usize>,
    tx_workers: Option<usize>,
    queue_capacity: Option<usize>,
    max_fall_behind_blocks: Option<u64>,
    tx_poll_interval: Option<Duration>,
    metrics_interval: Option<Duration>,
    rpc_timeout: Option<Duration>,
}

impl WatcherConfigBuilder {
    pub fn network(mut self, network: Network) -> Self {
        self.network = Some(network);
        self
    }

    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = Some(url.into());
        self
    }

    pub fn contract_account(mut self, account: impl Into<String>) -> Self {
        self.contract_account = Some(account.into());
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn initial_tx_delay(mut self, delay: Duration) -> Self {
        self.initial_tx_delay = Some(delay);
        self
    }

    pub fn tx_retry_limit(mut self, limit: u32) -> Self {
        self.tx_retry_limit = Some(limit);
        self
    }

    pub fn chunk_workers(mut self, count: usize) -> Self {
        self.chunk_workers = Some(count);
        self
    }

    pub fn tx_workers(mut self, count: usize) -> Self {
        self.tx_workers = Some(count);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn max_fall_behind_blocks(mut self, blocks: u64) -> Self {
        self.max_fall_behind_blocks = Some(blocks);
        self
    }

    pub fn tx_poll_interval(mut self, interval: Duration) -> Self {
        self.tx_poll_interval = Some(interval);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<WatcherConfig> {
        let network = self.network.unwrap_or_default();
        let config = WatcherConfig {
            network,
            rpc_url: self
                .rpc_url
                .map(trimmed_string)
                .unwrap_or_else(|| network.default_rpc_url().to_owned()),
            contract_account: self
                .contract_account
                .map(trimmed_string)
                .unwrap_or_else(|| network.default_contract_account().to_owned()),
            poll_interval: self
                .poll_interval
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)),
            initial_tx_delay: self
                .initial_tx_delay
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_INITIAL_TX_DELAY_SECS)),
            tx_retry_limit: self.tx_retry_limit.unwrap_or(DEFAULT_TX_RETRY_LIMIT),
            chunk_workers: self.chunk_workers.unwrap_or(DEFAULT_CHUNK_WORKERS),
            tx_workers: self.tx_workers.unwrap_or(DEFAULT_TX_WORKERS),
            queue_capacity: self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            max_fall_behind_blocks: self
                .max_fall_behind_blocks
                .unwrap_or(DEFAULT_MAX_FALL_BEHIND_BLOCKS),
            tx_poll_interval: self
                .tx_poll_interval
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_TX_POLL_INTERVAL_MS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            rpc_timeout: self
                .rpc_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS)),
        };

        config.validate()?;
        Ok(config)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("rpc_url must start with http:// or https://");
    }
    Ok(())
}
