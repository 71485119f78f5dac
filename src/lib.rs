pub mod pipeline;
pub mod rpc;
pub mod runtime;

pub use pipeline::backoff::RetryBackoff;
pub use pipeline::delay_queue::DelayQueue;
pub use pipeline::job::{ChunkDescriptor, ProcessingJob};
pub use pipeline::observation::ObservationRequestError;
pub use rpc::circuit_breaker::{CircuitBreakerSnapshot, CircuitState, RpcCircuitBreaker};
pub use rpc::{NearRpcClient, RpcClientOptions, RpcError, TxStatusView};
pub use runtime::chain::{
    BlockSummary, ChainApi, ChainFuture, ChunkHeader, ChunkSummary, ChunkTransaction,
    FinalizationReport, Finalizer, MessagePublication, ObservationRequest, NEAR_CHAIN_ID,
};
pub use runtime::config::{Network, WatcherConfig, WatcherConfigBuilder};
pub use runtime::fatal::FatalErrorHandler;
pub use runtime::health::HealthMonitor;
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use runtime::watcher::Watcher;
