use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

const DEFAULT_FAILURE_THRESHOLD: usize = 5;
const DEFAULT_COOLDOWN_SECS: u64 = 30;
const DEFAULT_HALF_OPEN_SAMPLE: usize = 1;

/// Represents the current state of the RPC circuit breaker.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Snapshot of breaker internals for observability.
#[derive(Debug, Copy, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub opened_at: Option<Instant>,
    pub rejected_requests: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
    half_open_in_flight: usize,
    rejected_requests: u64,
}

/// Error returned when the breaker refuses to allow an RPC attempt.
#[derive(Debug)]
pub enum CircuitBreakerError {
    CircuitOpen,
}

impl std::fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "NEAR RPC circuit breaker is open"),
        }
    }
}

impl std::error::Error for CircuitBreakerError {}

/// Guards the NEAR RPC endpoint with Closed/Open/Half-Open transitions.
///
/// Only availability failures (timeouts, transport errors) count towards opening the
/// circuit. Application-level JSON-RPC errors, such as a transaction the node does not
/// know yet, prove the node is reachable and are recorded with [`record_reachable`].
///
/// [`record_reachable`]: RpcCircuitBreaker::record_reachable
#[derive(Debug, Clone)]
pub struct RpcCircuitBreaker {
    state: Arc<Mutex<BreakerState>>,
    failure_threshold: usize,
    cooldown: Duration,
    half_open_sample: usize,
}

impl Default for RpcCircuitBreaker {
    fn default() -> Self {
        Self::new(
            DEFAULT_FAILURE_THRESHOLD,
            Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            DEFAULT_HALF_OPEN_SAMPLE,
        )
    }
}

impl RpcCircuitBreaker {
    pub fn new(failure_threshold: usize, cooldown: Duration, half_open_sample: usize) -> Self {
        let cooldown = if cooldown.is_zero() {
            Duration::from_secs(1)
        } else {
            cooldown
        };

        Self {
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_in_flight: 0,
                rejected_requests: 0,
            })),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            half_open_sample: half_open_sample.max(1),
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let guard = self.lock();
        CircuitBreakerSnapshot {
            state: guard.state,
            consecutive_failures: guard.consecutive_failures,
            opened_at: guard.opened_at,
            rejected_requests: guard.rejected_requests,
        }
    }

    /// Checks whether a new RPC attempt is allowed and reserves a Half-Open slot if needed.
    pub fn before_request(&self) -> Result<CircuitState, CircuitBreakerError> {
        let mut state = self.lock();

        if state.state == CircuitState::Open {
            let cooled_down = state
                .opened_at
                .map(|opened_at| opened_at.elapsed() >= self.cooldown)
                .unwrap_or(false);
            if !cooled_down {
                state.rejected_requests = state.rejected_requests.saturating_add(1);
                return Err(CircuitBreakerError::CircuitOpen);
            }
            self.transition(&mut state, CircuitState::HalfOpen);
            state.half_open_in_flight = 0;
        }

        if state.state == CircuitState::HalfOpen {
            if state.half_open_in_flight >= self.half_open_sample {
                state.rejected_requests = state.rejected_requests.saturating_add(1);
                return Err(CircuitBreakerError::CircuitOpen);
            }
            state.half_open_in_flight += 1;
        }

        Ok(state.state)
    }

    /// Records a successful RPC call and closes a Half-Open circuit.
    pub fn record_success(&self) {
        let mut state = self.lock();
        Self::release_half_open_slot(&mut state);
        state.consecutive_failures = 0;

        if state.state == CircuitState::HalfOpen {
            state.opened_at = None;
            self.transition(&mut state, CircuitState::Closed);
        }
    }

    /// Records a call that failed at the application level but reached the node.
    pub fn record_reachable(&self) {
        self.record_success();
    }

    /// Records an availability failure, potentially opening the circuit.
    pub fn record_failure(&self) {
        let mut state = self.lock();
        Self::release_half_open_slot(&mut state);
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        let reopen = state.state == CircuitState::HalfOpen;
        let trip = state.state == CircuitState::Closed
            && state.consecutive_failures >= self.failure_threshold;
        if reopen || trip {
            state.opened_at = Some(Instant::now());
            state.half_open_in_flight = 0;
            self.transition(&mut state, CircuitState::Open);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release_half_open_slot(state: &mut BreakerState) {
        if state.state == CircuitState::HalfOpen && state.half_open_in_flight > 0 {
            state.half_open_in_flight -= 1;
        }
    }

    fn transition(&self, state: &mut BreakerState, next: CircuitState) {
        if state.state != next {
            tracing::warn!(
                previous = ?state.state,
                next = ?next,
                consecutive_failures = state.consecutive_failures,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "NEAR RPC circuit breaker state changed"
            );
            state.state = next;
        }
    }
}
