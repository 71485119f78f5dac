use crate::runtime::chain::{ChainApi, Finalizer, MessagePublication, ObservationRequest};
use crate::runtime::config::WatcherConfig;
use crate::runtime::watcher::Watcher;
use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Coordinates the watcher lifecycle and handles OS signals for graceful shutdowns.
pub struct Runner {
    watcher: Watcher,
    shutdown: CancellationToken,
    started: bool,
}

impl Runner {
    /// Creates a new runner and wires a root [`CancellationToken`] that propagates
    /// through every watcher task.
    pub fn new(
        config: WatcherConfig,
        chain: Arc<dyn ChainApi>,
        finalizer: Arc<dyn Finalizer>,
        msg_tx: mpsc::Sender<MessagePublication>,
        obsv_rx: mpsc::Receiver<ObservationRequest>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let watcher = Watcher::with_cancellation_token(
            config,
            chain,
            finalizer,
            msg_tx,
            obsv_rx,
            shutdown.clone(),
        );
        Self {
            watcher,
            shutdown,
            started: false,
        }
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        self.watcher.start().await?;
        self.started = true;
        Ok(())
    }

    /// Cancels the root token and waits for the watcher. Returns the fatal error of the
    /// run, if one occurred.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }

        self.shutdown.cancel();
        self.started = false;
        self.watcher.stop().await
    }

    /// Runs until Ctrl-C (SIGINT), external cancellation of the shutdown token or a
    /// fatal watcher error.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        self.stop().await
    }
}
