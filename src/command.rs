//! Command trait and the delegate-backed [`RelayCommand`].
//!
//! A command is the unit of work a UI control binds to: an action taking a
//! type-erased parameter plus a guard the control polls to decide whether
//! it is enabled. Observers learn that the guard may have flipped through a
//! `watch` generation counter rather than a callback list, so signalling
//! never blocks and never fails when nobody listens.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::watch;

use crate::error::ConfigError;

/// Shared action invoked with the command parameter.
pub type ExecuteFn = Arc<dyn Fn(&Value) + Send + Sync>;

/// Shared guard predicate consulted by [`Command::can_execute`].
pub type CanExecuteFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Shared parameterless hook run before or after the action.
pub type HookFn = Arc<dyn Fn() + Send + Sync>;

/// An executable unit with a guard predicate, consumed by UI bindings.
///
/// # Contract
///
/// - [`execute`](Command::execute) always runs the action, whatever the
///   guard says. The guard is advisory.
/// - [`can_execute`](Command::can_execute) must be pure: bindings may poll
///   it before every render.
/// - Neither method may panic for any parameter value.
pub trait Command: Send + Sync + 'static {
    /// Run the command with `parameter` (`Value::Null` when there is none).
    fn execute(&self, parameter: &Value);

    /// Whether the command is currently executable for `parameter`.
    fn can_execute(&self, parameter: &Value) -> bool;

    /// Subscribe to "execution state may have changed" signals.
    ///
    /// The receiver observes a generation counter; every bump means the
    /// bound control should re-query [`can_execute`](Command::can_execute).
    /// The default implementation returns a receiver that never changes.
    fn subscribe_can_execute_changed(&self) -> watch::Receiver<u64> {
        watch::channel(0).1
    }
}

/// Pre/post hooks, swappable after construction.
#[derive(Default, Clone)]
struct Hooks {
    pre: Option<HookFn>,
    post: Option<HookFn>,
}

/// Command backed by closures: an action, an optional guard, and optional
/// pre/post hooks.
///
/// `execute` runs `pre -> action -> post`, then bumps the
/// can-execute-changed generation.
///
/// # Examples
///
/// ```
/// use command_aggregator::{Command, RelayCommand};
/// use serde_json::Value;
///
/// let cmd = RelayCommand::with_guard(|_| {}, |p: &Value| p.is_string());
/// assert!(cmd.can_execute(&Value::from("doc.txt")));
/// assert!(!cmd.can_execute(&Value::Null));
/// ```
pub struct RelayCommand {
    execute: ExecuteFn,
    can_execute: Option<CanExecuteFn>,
    hooks: RwLock<Hooks>,
    changed: watch::Sender<u64>,
}

// Manual `Debug` because the delegates are opaque closures.
impl fmt::Debug for RelayCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hooks = self.hooks();
        f.debug_struct("RelayCommand")
            .field("has_guard", &self.can_execute.is_some())
            .field("has_pre_hook", &hooks.pre.is_some())
            .field("has_post_hook", &hooks.post.is_some())
            .field("generation", &*self.changed.borrow())
            .finish()
    }
}

impl RelayCommand {
    /// Create a command that is always executable.
    pub fn new(execute: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        Self::from_parts(Arc::new(execute), None)
    }

    /// Create a command whose executability is decided by `guard`.
    pub fn with_guard(
        execute: impl Fn(&Value) + Send + Sync + 'static,
        guard: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::from_parts(Arc::new(execute), Some(Arc::new(guard)))
    }

    /// Start building a command with hooks.
    ///
    /// [`RelayCommandBuilder::build`] fails with
    /// [`ConfigError::MissingExecute`] if no action was supplied.
    pub fn builder() -> RelayCommandBuilder {
        RelayCommandBuilder::default()
    }

    /// The safe default substituted wherever a command is absent.
    ///
    /// Executing it does nothing; `can_execute` is always `true`.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub(crate) fn from_parts(execute: ExecuteFn, can_execute: Option<CanExecuteFn>) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            execute,
            can_execute,
            hooks: RwLock::new(Hooks::default()),
            changed,
        }
    }

    /// Replace the pre-hook (or clear it with `None`).
    ///
    /// Signals "execution state may have changed" so bound controls
    /// re-query the guard.
    pub fn override_pre_hook(&self, hook: Option<HookFn>) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .pre = hook;
        self.raise_can_execute_changed();
    }

    /// Replace the post-hook (or clear it with `None`).
    ///
    /// Signals "execution state may have changed" so bound controls
    /// re-query the guard.
    pub fn override_post_hook(&self, hook: Option<HookFn>) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .post = hook;
        self.raise_can_execute_changed();
    }

    /// Bump the can-execute-changed generation.
    ///
    /// Safe with zero subscribers.
    pub fn raise_can_execute_changed(&self) {
        self.changed.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    fn hooks(&self) -> Hooks {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Command for RelayCommand {
    fn execute(&self, parameter: &Value) {
        // Snapshot the hooks so a hook may override hooks without deadlocking.
        let hooks = self.hooks();
        if let Some(pre) = &hooks.pre {
            pre();
        }
        (self.execute)(parameter);
        if let Some(post) = &hooks.post {
            post();
        }
        self.raise_can_execute_changed();
    }

    fn can_execute(&self, parameter: &Value) -> bool {
        self.can_execute
            .as_ref()
            .is_none_or(|guard| guard(parameter))
    }

    fn subscribe_can_execute_changed(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }
}

/// Builder for [`RelayCommand`] with optional guard and hooks.
///
/// # Examples
///
/// ```
/// use command_aggregator::{ConfigError, RelayCommand};
///
/// let err = RelayCommand::builder().pre_hook(|| {}).build().unwrap_err();
/// assert!(matches!(err, ConfigError::MissingExecute));
/// ```
#[derive(Default)]
pub struct RelayCommandBuilder {
    execute: Option<ExecuteFn>,
    can_execute: Option<CanExecuteFn>,
    pre: Option<HookFn>,
    post: Option<HookFn>,
}

impl RelayCommandBuilder {
    /// Set the action run by [`Command::execute`].
    pub fn execute(mut self, execute: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.execute = Some(Arc::new(execute));
        self
    }

    /// Set the guard consulted by [`Command::can_execute`].
    pub fn can_execute(mut self, guard: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.can_execute = Some(Arc::new(guard));
        self
    }

    /// Set the hook run before the action.
    pub fn pre_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.pre = Some(Arc::new(hook));
        self
    }

    /// Set the hook run after the action.
    pub fn post_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.post = Some(Arc::new(hook));
        self
    }

    /// Finish the command.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingExecute`] if
    /// [`execute`](RelayCommandBuilder::execute) was never called.
    pub fn build(self) -> Result<RelayCommand, ConfigError> {
        let execute = self.execute.ok_or(ConfigError::MissingExecute)?;
        let command = RelayCommand::from_parts(execute, self.can_execute);
        *command
            .hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Hooks {
            pre: self.pre,
            post: self.post,
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn log() -> Arc<Mutex<String>> {
        Arc::new(Mutex::new(String::new()))
    }

    #[test]
    fn execute_passes_parameter_to_action() {
        let out = log();
        let sink = Arc::clone(&out);
        let cmd = RelayCommand::new(move |p| {
            *sink.lock().unwrap() = p.as_str().unwrap_or_default().to_string();
        });

        cmd.execute(&Value::from("defaulttest"));
        assert_eq!(*out.lock().unwrap(), "defaulttest");
    }

    #[test]
    fn missing_guard_means_always_executable() {
        let cmd = RelayCommand::new(|_| {});
        assert!(cmd.can_execute(&Value::Null));
        assert!(cmd.can_execute(&Value::from(42)));
    }

    #[test]
    fn false_guard_does_not_block_execute() {
        let out = log();
        let sink = Arc::clone(&out);
        let cmd = RelayCommand::with_guard(move |_| sink.lock().unwrap().push('C'), |_| false);

        assert!(!cmd.can_execute(&Value::Null));
        cmd.execute(&Value::Null);
        assert_eq!(*out.lock().unwrap(), "C");
    }

    #[test]
    fn pre_hook_runs_before_action() {
        let out = log();
        let pre_sink = Arc::clone(&out);
        let act_sink = Arc::clone(&out);
        let cmd = RelayCommand::builder()
            .execute(move |p| act_sink.lock().unwrap().push_str(p.as_str().unwrap()))
            .pre_hook(move || *pre_sink.lock().unwrap() = "start".into())
            .build()
            .unwrap();

        cmd.execute(&Value::from("pretest"));
        assert_eq!(*out.lock().unwrap(), "startpretest");
    }

    #[test]
    fn post_hook_runs_after_action() {
        let out = log();
        let post_sink = Arc::clone(&out);
        let act_sink = Arc::clone(&out);
        let cmd = RelayCommand::builder()
            .execute(move |p| act_sink.lock().unwrap().push_str(p.as_str().unwrap()))
            .post_hook(move || post_sink.lock().unwrap().push_str("end"))
            .build()
            .unwrap();

        cmd.execute(&Value::from("posttest"));
        assert_eq!(*out.lock().unwrap(), "posttestend");
    }

    #[test]
    fn hooks_run_once_per_execute_in_order() {
        let out = log();
        let (pre, act, post) = (Arc::clone(&out), Arc::clone(&out), Arc::clone(&out));
        let cmd = RelayCommand::builder()
            .pre_hook(move || pre.lock().unwrap().push('<'))
            .execute(move |_| act.lock().unwrap().push('x'))
            // The post hook reads state the action just wrote.
            .post_hook(move || {
                let mut s = post.lock().unwrap();
                let last = s.chars().last().unwrap();
                s.push(if last == 'x' { '>' } else { '!' });
            })
            .build()
            .unwrap();

        cmd.execute(&Value::Null);
        cmd.execute(&Value::Null);
        assert_eq!(*out.lock().unwrap(), "<x><x>");
    }

    #[test]
    fn builder_without_execute_is_a_config_error() {
        let result = RelayCommand::builder().can_execute(|_| true).build();
        assert!(matches!(result, Err(ConfigError::MissingExecute)));
    }

    #[test]
    fn execute_bumps_generation_without_subscribers() {
        let cmd = RelayCommand::noop();
        cmd.execute(&Value::Null);
        let rx = cmd.subscribe_can_execute_changed();
        assert_eq!(*rx.borrow(), 1);
    }

    #[test]
    fn overriding_hooks_signals_subscribers() {
        let cmd = RelayCommand::noop();
        let mut rx = cmd.subscribe_can_execute_changed();
        assert!(!rx.has_changed().unwrap());

        cmd.override_pre_hook(Some(Arc::new(|| {})));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);

        cmd.override_post_hook(None);
        assert_eq!(*rx.borrow_and_update(), 2);
    }

    #[test]
    fn overridden_pre_hook_replaces_previous_one() {
        let out = log();
        let first = Arc::clone(&out);
        let second = Arc::clone(&out);
        let cmd = RelayCommand::builder()
            .execute(|_| {})
            .pre_hook(move || first.lock().unwrap().push('1'))
            .build()
            .unwrap();

        cmd.override_pre_hook(Some(Arc::new(move || second.lock().unwrap().push('2'))));
        cmd.execute(&Value::Null);
        assert_eq!(*out.lock().unwrap(), "2");
    }

    #[test]
    fn default_subscription_never_changes() {
        struct Bare;
        impl Command for Bare {
            fn execute(&self, _: &Value) {}
            fn can_execute(&self, _: &Value) -> bool {
                true
            }
        }

        let rx = Bare.subscribe_can_execute_changed();
        assert_eq!(*rx.borrow(), 0);
    }

    #[test]
    fn debug_format_reports_hooks() {
        let cmd = RelayCommand::builder()
            .execute(|_| {})
            .post_hook(|| {})
            .build()
            .unwrap();
        let debug_output = format!("{cmd:?}");
        assert!(debug_output.contains("has_post_hook: true"));
        assert!(debug_output.contains("has_pre_hook: false"));
    }
}
