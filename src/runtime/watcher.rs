//! Watcher orchestration.
//!
//! `Watcher` owns the shared pipeline state (delay queue, telemetry, health) and wires
//! the stages together on `start`:
//! - one block poller feeding the bounded chunk channel,
//! - `chunk_workers` chunk fetchers sharing the channel receiver,
//! - `tx_workers` transaction processors draining the delay queue,
//! - the observation request handler and the event reporter.
//!
//! Every task runs under the supervisor, so an error or panic in any of them captures a
//! fatal error and cancels the whole run.

use crate::pipeline::backoff::RetryBackoff;
use crate::pipeline::block_poller::{BlockPoller, BlockPollerParams, BLOCK_POLLER_TASK};
use crate::pipeline::chunk_fetcher::{ChunkFetcher, ChunkFetcherParams};
use crate::pipeline::delay_queue::DelayQueue;
use crate::pipeline::event_reporter::{
    event_channel, EventReporter, EventReporterParams, DEFAULT_EVENT_CAPACITY,
    EVENT_REPORTER_TASK,
};
use crate::pipeline::job::{ChunkDescriptor, ProcessingJob};
use crate::pipeline::observation::{
    ObservationRequestHandler, ObservationRequestHandlerParams, OBSERVATION_HANDLER_TASK,
};
use crate::pipeline::tx_processor::{TxProcessor, TxProcessorParams};
use crate::runtime::chain::{ChainApi, Finalizer, MessagePublication, ObservationRequest};
use crate::runtime::config::WatcherConfig;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::health::HealthMonitor;
use crate::runtime::supervisor::spawn_supervised;
use crate::runtime::telemetry::Telemetry;
use anyhow::{bail, Context, Result};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Watcher {
    config: WatcherConfig,
    chain: Arc<dyn ChainApi>,
    finalizer: Arc<dyn Finalizer>,
    msg_tx: mpsc::Sender<MessagePublication>,
    obsv_rx: Option<mpsc::Receiver<ObservationRequest>>,
    queue: Arc<DelayQueue<ProcessingJob>>,
    telemetry: Arc<Telemetry>,
    health: Arc<HealthMonitor>,
    shutdown_root: CancellationToken,
    run: Option<RunHandles>,
}

struct RunHandles {
    run_token: CancellationToken,
    fatal_handler: Arc<FatalErrorHandler>,
    tasks: Vec<JoinHandle<()>>,
}

impl Watcher {
    /// Creates a watcher with its own root cancellation token.
    pub fn new(
        config: WatcherConfig,
        chain: Arc<dyn ChainApi>,
        finalizer: Arc<dyn Finalizer>,
        msg_tx: mpsc::Sender<MessagePublication>,
        obsv_rx: mpsc::Receiver<ObservationRequest>,
    ) -> Self {
        Self::with_cancellation_token(
            config,
            chain,
            finalizer,
            msg_tx,
            obsv_rx,
            CancellationToken::new(),
        )
    }

    /// Creates a watcher whose run is derived from `shutdown_token`. Cancelling the
    /// token stops every task; a fatal error cancels it in turn.
    pub fn with_cancellation_token(
        config: WatcherConfig,
        chain: Arc<dyn ChainApi>,
        finalizer: Arc<dyn Finalizer>,
        msg_tx: mpsc::Sender<MessagePublication>,
        obsv_rx: mpsc::Receiver<ObservationRequest>,
        shutdown_token: CancellationToken,
    ) -> Self {
        let queue = Arc::new(DelayQueue::with_capacity(config.queue_capacity()));
        Self {
            config,
            chain,
            finalizer,
            msg_tx,
            obsv_rx: Some(obsv_rx),
            queue,
            telemetry: Arc::new(Telemetry::default()),
            health: Arc::new(HealthMonitor::new()),
            shutdown_root: shutdown_token,
            run: None,
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<DelayQueue<ProcessingJob>> {
        &self.queue
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn health(&self) -> Arc<HealthMonitor> {
        self.health.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_root.clone()
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Fatal error captured during the current run, if any.
    pub fn fatal_error(&self) -> Option<anyhow::Error> {
        self.run
            .as_ref()
            .and_then(|run| run.fatal_handler.error())
    }

    /// Resolves once the current run has been cancelled, either by a fatal error or
    /// through the root token.
    pub async fn cancelled(&self) {
        match &self.run {
            Some(run) => run.run_token.cancelled().await,
            None => self.shutdown_root.cancelled().await,
        }
    }

    /// Fetches the current final block, marks the watcher ready and spawns every task.
    ///
    /// Failing to fetch a usable initial block is fatal and returned here.
    pub async fn start(&mut self) -> Result<()> {
        if self.run.is_some() {
            bail!("watcher already running");
        }

        let Some(obsv_rx) = self.obsv_rx.take() else {
            bail!("watcher cannot be restarted; build a new watcher");
        };

        tracing::info!(
            network = %self.config.network(),
            rpc_url = self.config.rpc_url(),
            contract = self.config.contract_account(),
            "starting NEAR watcher"
        );

        let watermark = BlockPoller::initial_watermark(self.chain.as_ref())
            .await
            .context("watcher startup failed")?;
        self.health.set_ready();

        let run_token = self.shutdown_root.child_token();
        let fatal_handler = Arc::new(FatalErrorHandler::new(
            self.shutdown_root.clone(),
            run_token.clone(),
        ));
        let mut tasks = Vec::new();
        let supervise = |name: String, task: BoxFuture<'static, Result<()>>, tasks: &mut Vec<JoinHandle<()>>| {
            tasks.push(spawn_supervised(
                name,
                task,
                fatal_handler.clone(),
                run_token.clone(),
            ));
        };

        let (events, events_rx) = event_channel(DEFAULT_EVENT_CAPACITY);
        let reporter = EventReporter::new(EventReporterParams {
            events: events_rx,
            telemetry: self.telemetry.clone(),
            queue: self.queue.clone(),
            health: self.health.clone(),
            interval: self.config.metrics_interval(),
            shutdown: run_token.clone(),
        });
        supervise(EVENT_REPORTER_TASK.to_string(), reporter.run().boxed(), &mut tasks);

        let (chunk_tx, chunk_rx) = mpsc::channel::<ChunkDescriptor>(self.config.queue_capacity());
        let poller = BlockPoller::new(BlockPollerParams {
            chain: self.chain.clone(),
            chunk_tx,
            poll_interval: self.config.poll_interval(),
            max_fall_behind_blocks: self.config.max_fall_behind_blocks(),
            telemetry: self.telemetry.clone(),
            health: self.health.clone(),
            shutdown: run_token.clone(),
        });
        supervise(BLOCK_POLLER_TASK.to_string(), poller.run(watermark).boxed(), &mut tasks);

        let handler = ObservationRequestHandler::new(ObservationRequestHandlerParams {
            requests: obsv_rx,
            queue: self.queue.clone(),
            contract_account: self.config.contract_account().to_owned(),
            initial_delay: self.config.initial_tx_delay(),
            telemetry: self.telemetry.clone(),
            health: self.health.clone(),
            shutdown: run_token.clone(),
        });
        supervise(
            OBSERVATION_HANDLER_TASK.to_string(),
            handler.run().boxed(),
            &mut tasks,
        );

        let chunk_rx = Arc::new(Mutex::new(chunk_rx));
        for worker_id in 0..self.config.chunk_workers() {
            let fetcher = ChunkFetcher::new(
                worker_id,
                ChunkFetcherParams {
                    chain: self.chain.clone(),
                    chunks: chunk_rx.clone(),
                    queue: self.queue.clone(),
                    contract_account: self.config.contract_account().to_owned(),
                    initial_delay: self.config.initial_tx_delay(),
                    telemetry: self.telemetry.clone(),
                    health: self.health.clone(),
                    shutdown: run_token.clone(),
                },
            );
            supervise(
                format!("chunk_fetcher_{worker_id}"),
                fetcher.run().boxed(),
                &mut tasks,
            );
        }

        let backoff = RetryBackoff::new(self.config.initial_tx_delay(), self.config.tx_retry_limit());
        for worker_id in 0..self.config.tx_workers() {
            let processor = TxProcessor::new(
                worker_id,
                TxProcessorParams {
                    finalizer: self.finalizer.clone(),
                    queue: self.queue.clone(),
                    backoff,
                    msg_tx: self.msg_tx.clone(),
                    events: events.clone(),
                    telemetry: self.telemetry.clone(),
                    health: self.health.clone(),
                    poll_interval: self.config.tx_poll_interval(),
                    shutdown: run_token.clone(),
                },
            );
            supervise(
                format!("tx_processor_{worker_id}"),
                processor.run().boxed(),
                &mut tasks,
            );
        }

        tracing::info!(
            watermark,
            chunk_workers = self.config.chunk_workers(),
            tx_workers = self.config.tx_workers(),
            "NEAR watcher started"
        );

        self.run = Some(RunHandles {
            run_token,
            fatal_handler,
            tasks,
        });
        Ok(())
    }

    /// Cancels every task, waits for them and returns the fatal error of the run, if any.
    /// Pending jobs are abandoned.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(run) = self.run.take() else {
            return Ok(());
        };

        tracing::info!("stopping NEAR watcher");
        run.run_token.cancel();

        let results = join_all(run.tasks).await;
        for (idx, result) in results.into_iter().enumerate() {
            if let Err(err) = result {
                tracing::warn!(task = idx, error = %err, "watcher task terminated unexpectedly");
            }
        }

        self.health.reset();
        self.queue.clear().await;

        if let Some(err) = run.fatal_handler.error() {
            return Err(err).context("NEAR watcher aborted");
        }

        tracing::info!("NEAR watcher stopped");
        Ok(())
    }
}
