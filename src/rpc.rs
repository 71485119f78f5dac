//! NEAR JSON-RPC plumbing: the HTTP client, response views, circuit breaker,
//! metrics and client options.

pub mod circuit_breaker;
pub mod client;
pub mod metrics;
pub mod options;
pub mod types;

pub use circuit_breaker::{
    CircuitBreakerError, CircuitBreakerSnapshot, CircuitState, RpcCircuitBreaker,
};
pub use client::{NearRpcClient, RpcError};
pub use metrics::RpcMetricsSnapshot;
pub use options::RpcClientOptions;
pub use types::{BlockView, ChunkView, TxStatusView};
