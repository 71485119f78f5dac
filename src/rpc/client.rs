//! JSON-RPC client for NEAR archival/RPC nodes. Every call passes through the circuit
//! breaker, is bounded by the request timeout and recorded in [`RpcMetrics`]. Failures
//! are returned to the caller without retrying.

use crate::rpc::circuit_breaker::{CircuitBreakerError, RpcCircuitBreaker};
use crate::rpc::metrics::{RpcMetrics, RpcMetricsSnapshot};
use crate::rpc::options::RpcClientOptions;
use crate::rpc::types::{BlockView, ChunkView, TxStatusView};
use crate::runtime::chain::{BlockSummary, ChainApi, ChainFuture, ChunkSummary};
use crate::runtime::config::WatcherConfig;
use anyhow::{anyhow, Context, Result};
use jsonrpsee::core::{
    client::{ClientT, Error as JsonRpcError},
    http_helpers::HttpError,
    params::ObjectParams,
};
use jsonrpsee::http_client::transport::Error as HttpTransportError;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{timeout, Instant};

#[derive(Debug)]
pub enum RpcError {
    Timeout { method: &'static str },
    CircuitOpen,
    ResponseTooLarge { method: &'static str },
    Call { method: &'static str, code: i32, message: String },
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Timeout { method } => write!(f, "rpc method {method} timed out"),
            RpcError::CircuitOpen => write!(f, "rpc circuit breaker is open"),
            RpcError::ResponseTooLarge { method } => {
                write!(f, "rpc {method} response exceeded HTTP size limits")
            }
            RpcError::Call {
                method,
                code,
                message,
            } => write!(f, "rpc {method} call failed (code={code}, message={message})"),
        }
    }
}

impl std::error::Error for RpcError {}

#[derive(Debug, Clone)]
pub struct NearRpcClient {
    rpc_url: Arc<String>,
    client: HttpClient,
    options: RpcClientOptions,
    metrics: Arc<RpcMetrics>,
    breaker: Arc<RpcCircuitBreaker>,
}

impl NearRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_options(url, RpcClientOptions::default())
    }

    pub fn with_options(url: impl Into<String>, options: RpcClientOptions) -> Result<Self> {
        Self::with_options_and_breaker(url, options, Arc::new(RpcCircuitBreaker::default()))
    }

    pub fn with_options_and_breaker(
        url: impl Into<String>,
        options: RpcClientOptions,
        breaker: Arc<RpcCircuitBreaker>,
    ) -> Result<Self> {
        options.validate()?;

        let rpc_url = url.into();
        let max_request_body_size = options.max_request_body_bytes.min(u32::MAX as usize) as u32;
        let max_response_body_size = options.max_response_body_bytes.min(u32::MAX as usize) as u32;

        let client = HttpClientBuilder::default()
            .request_timeout(options.request_timeout)
            .max_concurrent_requests(options.max_concurrent_requests)
            .max_request_size(max_request_body_size)
            .max_response_size(max_response_body_size)
            .build(&rpc_url)
            .map_err(|err| anyhow!("failed to build NEAR RPC client: {err}"))?;

        Ok(Self {
            rpc_url: Arc::new(rpc_url),
            client,
            options,
            metrics: Arc::new(RpcMetrics::default()),
            breaker,
        })
    }

    pub fn from_config(config: &WatcherConfig) -> Result<Self> {
        config.validate()?;
        Self::with_options(
            config.rpc_url().to_owned(),
            RpcClientOptions::from_config(config),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.rpc_url
    }

    pub fn metrics(&self) -> RpcMetricsSnapshot {
        let mut snapshot = self.metrics.snapshot();
        snapshot.breaker_state = self.breaker.snapshot().state;
        snapshot
    }

    /// Latest block with `final` finality.
    pub async fn final_block(&self) -> Result<BlockView> {
        let params = object_params([("finality", "final")])?;
        self.call("block", params).await
    }

    pub async fn block_by_hash(&self, hash: &str) -> Result<BlockView> {
        let params = object_params([("block_id", hash)])?;
        self.call("block", params).await
    }

    pub async fn block_by_height(&self, height: u64) -> Result<BlockView> {
        let params = object_params([("block_id", height)])?;
        self.call("block", params).await
    }

    pub async fn chunk(&self, chunk_hash: &str) -> Result<ChunkView> {
        let params = object_params([("chunk_id", chunk_hash)])?;
        self.call("chunk", params).await
    }

    /// Transaction status including every receipt outcome. Does not wait for execution.
    pub async fn tx_status(&self, tx_hash: &str, sender_account_id: &str) -> Result<TxStatusView> {
        let params = object_params([
            ("tx_hash", tx_hash),
            ("sender_account_id", sender_account_id),
            ("wait_until", "NONE"),
        ])?;
        self.call("tx", params).await
    }

    async fn call<R>(&self, method: &'static str, params: ObjectParams) -> Result<R>
    where
        R: DeserializeOwned,
    {
        if let Err(CircuitBreakerError::CircuitOpen) = self.breaker.before_request() {
            self.metrics.record_rejected();
            tracing::debug!(method, "rpc call rejected by open circuit breaker");
            return Err(RpcError::CircuitOpen.into());
        }

        let start = Instant::now();
        let outcome = timeout(
            self.options.request_timeout,
            self.client.request(method, params),
        )
        .await;
        let elapsed = start.elapsed();

        match outcome {
            Ok(Ok(value)) => {
                self.metrics.record_success(elapsed);
                self.breaker.record_success();
                tracing::trace!(
                    method,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "rpc call completed"
                );
                Ok(value)
            }
            Ok(Err(err)) => {
                self.metrics.record_failure(elapsed);
                if is_application_error(&err) {
                    self.breaker.record_reachable();
                } else {
                    self.breaker.record_failure();
                }
                Err(map_rpc_error(method, err))
            }
            Err(_) => {
                self.metrics.record_timeout(elapsed);
                self.breaker.record_failure();
                Err(RpcError::Timeout { method }.into())
            }
        }
    }
}

impl ChainApi for NearRpcClient {
    fn final_block(&self) -> ChainFuture<'_, BlockSummary> {
        Box::pin(async move { Ok(NearRpcClient::final_block(self).await?.into()) })
    }

    fn block_by_hash<'a>(&'a self, hash: &'a str) -> ChainFuture<'a, BlockSummary> {
        Box::pin(async move { Ok(NearRpcClient::block_by_hash(self, hash).await?.into()) })
    }

    fn chunk<'a>(&'a self, chunk_hash: &'a str) -> ChainFuture<'a, ChunkSummary> {
        Box::pin(async move { Ok(NearRpcClient::chunk(self, chunk_hash).await?.into()) })
    }
}

fn object_params<V, const N: usize>(entries: [(&str, V); N]) -> Result<ObjectParams>
where
    V: Serialize,
{
    let mut params = ObjectParams::new();
    for (name, value) in entries {
        params
            .insert(name, value)
            .with_context(|| format!("failed to serialize rpc param {name}"))?;
    }
    Ok(params)
}

fn is_application_error(err: &JsonRpcError) -> bool {
    matches!(err, JsonRpcError::Call(_))
}

fn map_rpc_error(method: &'static str, err: JsonRpcError) -> anyhow::Error {
    if response_too_large(&err) {
        return RpcError::ResponseTooLarge { method }.into();
    }
    match err {
        JsonRpcError::Call(object) => RpcError::Call {
            method,
            code: object.code(),
            message: object.message().to_owned(),
        }
        .into(),
        JsonRpcError::RequestTimeout => RpcError::Timeout { method }.into(),
        other => anyhow!("rpc {method} call failed: {other}"),
    }
}

fn response_too_large(err: &JsonRpcError) -> bool {
    match err {
        JsonRpcError::Transport(inner) => {
            if let Some(transport_err) = inner.downcast_ref::<HttpTransportError>() {
                match transport_err {
                    HttpTransportError::Http(http_err) => matches!(http_err, HttpError::TooLarge),
                    HttpTransportError::RequestTooLarge => true,
                    _ => false,
                }
            } else {
                false
            }
        }
        _ => false,
    }
}
