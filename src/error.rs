//! Crate-level error types for command construction and asynchronous dispatch.

/// Error raised when a command or registry is misconfigured.
///
/// These are programmer errors surfaced at construction time. They are
/// never produced by the UI-facing lookup and execution paths, which
/// degrade to no-op defaults instead.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A command was built without an execute delegate.
    ///
    /// Every command must have an action to run; the guard and the
    /// pre/post hooks are optional.
    #[error("execute delegate is required for a command")]
    MissingExecute,

    /// A registered registry implementation could not be constructed.
    ///
    /// Returned by [`AggregatorFactory`](crate::AggregatorFactory) when the
    /// constructor registered for a custom registry type fails.
    #[error("registered aggregator implementation '{name}' could not be constructed: {reason}")]
    Implementation {
        /// Name of the registered implementation (usually its type name).
        name: String,
        /// Why construction failed.
        reason: String,
    },
}

/// Error reported through an [`ExecutionHandle`](crate::ExecutionHandle)
/// when a dispatched command did not complete normally.
///
/// Dispatch itself never fails: `execute_async` always hands back a
/// handle. Only awaiting that handle can observe one of these variants.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The command's action (or one of its hooks) panicked on the worker.
    #[error("command '{key}' panicked: {message}")]
    Panicked {
        /// Registry key the command was dispatched under.
        key: String,
        /// Panic payload rendered as text, when it was a string.
        message: String,
    },

    /// The worker exited without reporting completion.
    ///
    /// Happens when the worker thread or runtime was torn down before the
    /// command finished.
    #[error("worker for command '{key}' is no longer running")]
    WorkerGone {
        /// Registry key the command was dispatched under.
        key: String,
    },
}
