use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Default interval used by the event reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(10);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters shared by every pipeline stage.
#[derive(Default, Debug)]
pub struct Telemetry {
    chunks_emitted: AtomicU64,
    block_poll_errors: AtomicU64,
    gap_resets: AtomicU64,
    chunk_fetch_errors: AtomicU64,
    jobs_scheduled: AtomicU64,
    queue_overflows: AtomicU64,
    tx_retries: AtomicU64,
    tx_retries_exhausted: AtomicU64,
    observations_forwarded: AtomicU64,
    observation_requests: AtomicU64,
    last_processed_height: AtomicU64,
    latency_samples: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_max_ms: AtomicU64,
}

impl Telemetry {
    pub fn record_chunks_emitted(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.chunks_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_block_poll_error(&self) {
        self.block_poll_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gap_reset(&self) {
        self.gap_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk_fetch_error(&self) {
        self.chunk_fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_scheduled(&self) {
        self.jobs_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_overflow(&self, dropped_jobs: u64) {
        self.queue_overflows.fetch_add(dropped_jobs, Ordering::Relaxed);
    }

    pub fn record_tx_retry(&self) {
        self.tx_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tx_retries_exhausted(&self) {
        self.tx_retries_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_observation_forwarded(&self) {
        self.observations_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_observation_request(&self) {
        self.observation_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed_height(&self, height: u64) {
        self.last_processed_height
            .fetch_max(height, Ordering::Relaxed);
    }

    pub fn record_latency(&self, latency: Duration) {
        let millis = latency.as_millis().min(u128::from(u64::MAX)) as u64;
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
        self.latency_total_ms.fetch_add(millis, Ordering::Relaxed);
        self.latency_max_ms.fetch_max(millis, Ordering::Relaxed);
    }

    /// Errors in the sense of the network layer's per-chain error counter.
    pub fn error_count(&self) -> u64 {
        self.chunk_fetch_errors.load(Ordering::Relaxed)
            + self.queue_overflows.load(Ordering::Relaxed)
            + self.tx_retries_exhausted.load(Ordering::Relaxed)
    }

    pub fn last_processed_height(&self) -> u64 {
        self.last_processed_height.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let latency_samples = self.latency_samples.load(Ordering::Relaxed);
        let latency_total_ms = self.latency_total_ms.load(Ordering::Relaxed);
        let average_latency_ms = if latency_samples == 0 {
            0.0
        } else {
            latency_total_ms as f64 / latency_samples as f64
        };

        TelemetrySnapshot {
            chunks_emitted: self.chunks_emitted.load(Ordering::Relaxed),
            block_poll_errors: self.block_poll_errors.load(Ordering::Relaxed),
            gap_resets: self.gap_resets.load(Ordering::Relaxed),
            chunk_fetch_errors: self.chunk_fetch_errors.load(Ordering::Relaxed),
            jobs_scheduled: self.jobs_scheduled.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            tx_retries: self.tx_retries.load(Ordering::Relaxed),
            tx_retries_exhausted: self.tx_retries_exhausted.load(Ordering::Relaxed),
            observations_forwarded: self.observations_forwarded.load(Ordering::Relaxed),
            observation_requests: self.observation_requests.load(Ordering::Relaxed),
            last_processed_height: self.last_processed_height.load(Ordering::Relaxed),
            latency_samples,
            average_latency_ms,
            max_latency_ms: self.latency_max_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default)]
pub struct TelemetrySnapshot {
    pub chunks_emitted: u64,
    pub block_poll_errors: u64,
    pub gap_resets: u64,
    pub chunk_fetch_errors: u64,
    pub jobs_scheduled: u64,
    pub queue_overflows: u64,
    pub tx_retries: u64,
    pub tx_retries_exhausted: u64,
    pub observations_forwarded: u64,
    pub observation_requests: u64,
    pub last_processed_height: u64,
    pub latency_samples: u64,
    pub average_latency_ms: f64,
    pub max_latency_ms: u64,
}
