//! Fire-and-forget command dispatch onto worker threads.
//!
//! A dispatched command runs on a blocking worker (the tokio blocking pool
//! or a dedicated OS thread) and reports completion back over a `oneshot`
//! channel. The caller gets an [`ExecutionHandle`] immediately and is never
//! blocked by the dispatch itself.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::command::Command;
use crate::error::DispatchError;

/// Where asynchronously dispatched commands run.
#[derive(Debug, Clone, Default)]
pub enum DispatchMode {
    /// Use the blocking pool of the runtime the caller is running in, or a
    /// dedicated thread when called outside any runtime.
    #[default]
    Auto,
    /// Always use the blocking pool of this runtime.
    Runtime(Handle),
    /// Always spawn a dedicated OS thread per dispatch.
    Thread,
}

/// Configuration for a [`CommandAggregator`](crate::CommandAggregator).
///
/// # Examples
///
/// ```
/// use command_aggregator::{AggregatorConfig, DispatchMode};
///
/// let config = AggregatorConfig {
///     dispatch: DispatchMode::Thread,
///     ..AggregatorConfig::default()
/// };
/// assert_eq!(config.thread_name, "command-worker");
/// ```
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Worker selection for `execute_async`.
    ///
    /// Default: [`DispatchMode::Auto`].
    pub dispatch: DispatchMode,

    /// Name given to dedicated worker threads.
    ///
    /// Default: `"command-worker"`.
    pub thread_name: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchMode::Auto,
            thread_name: "command-worker".to_owned(),
        }
    }
}

/// Completion handle for a dispatched command.
///
/// Await it (it implements [`Future`]) or call
/// [`wait_blocking`](ExecutionHandle::wait_blocking) from synchronous code.
/// Dropping the handle does not cancel the command.
#[derive(Debug)]
#[must_use = "dropping the handle detaches the command; await it to observe completion"]
pub struct ExecutionHandle {
    key: String,
    reply: oneshot::Receiver<Result<(), DispatchError>>,
}

impl ExecutionHandle {
    /// Registry key the command was dispatched under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Block the current thread until the command has finished.
    ///
    /// # Errors
    ///
    /// * [`DispatchError::Panicked`] -- the action or a hook panicked.
    /// * [`DispatchError::WorkerGone`] -- the worker exited without replying.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context; use
    /// `.await` there instead.
    pub fn wait_blocking(self) -> Result<(), DispatchError> {
        let key = self.key;
        self.reply
            .blocking_recv()
            .unwrap_or(Err(DispatchError::WorkerGone { key }))
    }

    /// A handle that is already complete. Used when there is nothing to run.
    pub(crate) fn completed(key: &str) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(()));
        Self {
            key: key.to_owned(),
            reply: rx,
        }
    }
}

impl Future for ExecutionHandle {
    type Output = Result<(), DispatchError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.reply).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(DispatchError::WorkerGone {
                    key: this.key.clone(),
                })
            })
        })
    }
}

/// Run `command` with `parameter` on a worker chosen by `config`.
///
/// Panics inside the command are caught on the worker and reported as
/// [`DispatchError::Panicked`] through the returned handle.
pub(crate) fn dispatch(
    config: &AggregatorConfig,
    key: &str,
    command: Arc<dyn Command>,
    parameter: Value,
) -> ExecutionHandle {
    let (tx, rx) = oneshot::channel();
    let job_key = key.to_owned();
    let job = move || {
        let _span = tracing::info_span!("execute", key = %job_key).entered();
        let result = panic::catch_unwind(AssertUnwindSafe(|| command.execute(&parameter)))
            .map_err(|payload| DispatchError::Panicked {
                key: job_key.clone(),
                message: panic_message(payload.as_ref()),
            });
        if let Err(err) = &result {
            tracing::warn!(error = %err, "dispatched command failed");
        }
        // The caller may have dropped the handle; nobody is waiting then.
        let _ = tx.send(result);
    };

    let runtime = match &config.dispatch {
        DispatchMode::Auto => Handle::try_current().ok(),
        DispatchMode::Runtime(handle) => Some(handle.clone()),
        DispatchMode::Thread => None,
    };

    tracing::trace!(key = %key, on_runtime = runtime.is_some(), "dispatching command");
    match runtime {
        Some(handle) => {
            // Detached: completion is reported through `tx`.
            drop(handle.spawn_blocking(job));
        }
        None => {
            // On spawn failure the job (and `tx`) is dropped, so the handle
            // resolves to `WorkerGone`.
            if let Err(err) = thread::Builder::new()
                .name(config.thread_name.clone())
                .spawn(job)
            {
                tracing::error!(key = %key, error = %err, "failed to spawn command worker");
            }
        }
    }

    ExecutionHandle {
        key: key.to_owned(),
        reply: rx,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
