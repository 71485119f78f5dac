use super::delay_queue::DelayQueue;
use super::job::ProcessingJob;
use crate::runtime::chain::{ObservationRequest, NEAR_CHAIN_ID};
use crate::runtime::health::{HealthMonitor, PULSE_INTERVAL};
use crate::runtime::telemetry::Telemetry;
use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub(crate) const OBSERVATION_HANDLER_TASK: &str = "observation_request_handler";

/// Violations of the re-observation request contract. These are never recovered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservationRequestError {
    ForeignChain { chain_id: u16 },
}

impl fmt::Display for ObservationRequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservationRequestError::ForeignChain { chain_id } => write!(
                f,
                "re-observation request addressed to chain {chain_id}, expected {NEAR_CHAIN_ID}"
            ),
        }
    }
}

impl std::error::Error for ObservationRequestError {}

pub struct ObservationRequestHandler {
    requests: mpsc::Receiver<ObservationRequest>,
    queue: Arc<DelayQueue<ProcessingJob>>,
    contract_account: String,
    initial_delay: Duration,
    telemetry: Arc<Telemetry>,
    health: Arc<HealthMonitor>,
    shutdown: CancellationToken,
}

pub struct ObservationRequestHandlerParams {
    pub requests: mpsc::Receiver<ObservationRequest>,
    pub queue: Arc<DelayQueue<ProcessingJob>>,
    pub contract_account: String,
    pub initial_delay: Duration,
    pub telemetry: Arc<Telemetry>,
    pub health: Arc<HealthMonitor>,
    pub shutdown: CancellationToken,
}

impl ObservationRequestHandler {
    pub fn new(params: ObservationRequestHandlerParams) -> Self {
        Self {
            requests: params.requests,
            queue: params.queue,
            contract_account: params.contract_account,
            initial_delay: params.initial_delay,
            telemetry: params.telemetry,
            health: params.health,
            shutdown: params.shutdown,
        }
    }

    /// Consumes requests until shutdown. A request for another chain ends the task
    /// with an error.
    pub async fn run(mut self) -> Result<()> {
        let mut pulse = interval(PULSE_INTERVAL);
        pulse.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    break;
                }
                _ = pulse.tick() => {
                    self.health.pulse(OBSERVATION_HANDLER_TASK);
                }
                request = self.requests.recv() => {
                    let Some(request) = request else {
                        tracing::info!("observation request channel closed");
                        break;
                    };
                    self.handle(request).await?;
                }
            }
        }

        Ok(())
    }

    /// Schedules a fresh job for the requested transaction, ready immediately.
    pub async fn handle(&self, request: ObservationRequest) -> Result<(), ObservationRequestError> {
        if request.chain_id != NEAR_CHAIN_ID {
            return Err(ObservationRequestError::ForeignChain {
                chain_id: request.chain_id,
            });
        }

        let tx_hash = bs58::encode(&request.tx_hash).into_string();
        tracing::info!(tx_hash = %tx_hash, "received observation request");

        // The real sender is not part of the request; the contract account only serves
        // as a shard routing hint for the RPC node.
        let job = ProcessingJob::new(
            tx_hash,
            self.contract_account.clone(),
            self.initial_delay,
        );
        let ready_at = Instant::now()
            .checked_sub(Duration::from_nanos(1))
            .unwrap_or_else(Instant::now);
        self.queue.schedule(job, ready_at).await;
        self.telemetry.record_observation_request();
        Ok(())
    }
}
