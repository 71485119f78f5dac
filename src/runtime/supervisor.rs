//! Spawns long-running pipeline tasks and turns their failures into fatal errors.

use crate::runtime::fatal::FatalErrorHandler;
use anyhow::Result;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runs `task` on the runtime. An `Err` or a panic triggers `fatal_handler` unless the
/// watcher is already shutting down.
pub(crate) fn spawn_supervised<F>(
    name: String,
    task: F,
    fatal_handler: Arc<FatalErrorHandler>,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let result = std::panic::AssertUnwindSafe(task).catch_unwind().await;

        match result {
            Ok(Ok(())) => {
                tracing::debug!(task = %name, "task finished");
            }
            Ok(Err(err)) => {
                if shutdown.is_cancelled() && !fatal_handler.is_triggered() {
                    tracing::debug!(task = %name, error = %err, "task exited during shutdown");
                    return;
                }
                tracing::error!(task = %name, error = %err, "task exited with error");
                let err = err.context(format!("{name} exited with error"));
                fatal_handler.trigger(&name, err);
            }
            Err(panic_payload) => {
                let panic_msg = panic_message(panic_payload.as_ref());
                tracing::error!(task = %name, panic = %panic_msg, "task panicked");
                let panic_error = anyhow::anyhow!("{name} panicked: {panic_msg}");
                fatal_handler.trigger(&name, panic_error);
            }
        }
    })
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
