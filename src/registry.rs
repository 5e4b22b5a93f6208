//! Thread-safe named command storage with null-safe lookup.
//!
//! [`CommandRegistry`] is the contract every registry implementation
//! satisfies; [`CommandAggregator`] is the standard one. Lookups never fail:
//! an unknown key yields a container wrapping the no-op command, so UI
//! bindings can bind blindly to any key.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use crate::command::{CanExecuteFn, Command, ExecuteFn, RelayCommand};
use crate::container::CommandContainer;
use crate::dispatch::{AggregatorConfig, DispatchMode, ExecutionHandle, dispatch};

/// Registered entries. `None` is a deliberately stored absent container.
type ContainerMap = HashMap<String, Option<CommandContainer>>;

/// The registry contract consumed by view-models and UI bindings.
///
/// Mutating calls with an empty key are silently ignored, lookups of
/// unknown keys degrade to the no-op container, and no method panics.
/// Implementations must be safe to share across threads.
pub trait CommandRegistry: Send + Sync + 'static {
    /// Store `container` under `key`, replacing any previous entry.
    ///
    /// Unlike the command overloads, `None` *is* stored: the key then
    /// exists and both [`has_null_command_container`] and
    /// [`has_null_command`] report `true` for it.
    ///
    /// [`has_null_command_container`]: CommandRegistry::has_null_command_container
    /// [`has_null_command`]: CommandRegistry::has_null_command
    fn add_or_set_container(&self, key: &str, container: Option<CommandContainer>);

    /// The container registered under `key`, or a no-op container.
    ///
    /// Never fails. A deliberately stored absent container is also
    /// returned as a no-op container.
    fn get(&self, key: &str) -> CommandContainer;

    /// Whether `key` is registered, regardless of what it holds.
    fn exists(&self, key: &str) -> bool;

    /// `true` iff `key` is registered with an absent container.
    fn has_null_command_container(&self, key: &str) -> bool;

    /// `true` iff `key` is registered and holds no real command, either
    /// because the container is absent or because it wraps no command.
    fn has_null_command(&self, key: &str) -> bool;

    /// Number of registered keys.
    fn count(&self) -> usize;

    /// Delete `key` if present.
    fn remove(&self, key: &str);

    /// Delete every entry.
    fn remove_all(&self);

    /// Run the command registered under `key` on a worker.
    ///
    /// Never fails: an unknown key dispatches nothing and returns a handle
    /// that is already complete.
    fn execute_async(&self, key: &str, parameter: Value) -> ExecutionHandle;

    /// Whether any key is registered.
    fn has_any(&self) -> bool {
        self.count() > 0
    }

    /// Store `command` under `key` with empty settings.
    fn add_or_set_command(&self, key: &str, command: Arc<dyn Command>) {
        self.add_or_set_container(key, Some(CommandContainer::new(command)));
    }

    /// Store `command` under `key` with `settings`.
    fn add_or_set_command_with_settings(
        &self,
        key: &str,
        command: Arc<dyn Command>,
        settings: HashMap<String, Value>,
    ) {
        self.add_or_set_container(key, Some(CommandContainer::with_settings(command, settings)));
    }

    /// Store a [`RelayCommand`] built from delegates.
    ///
    /// A missing `execute` delegate makes this a silent no-op; nothing is
    /// stored and any existing entry is left untouched.
    fn add_or_set_delegates(
        &self,
        key: &str,
        execute: Option<ExecuteFn>,
        can_execute: Option<CanExecuteFn>,
    ) {
        self.add_or_set_delegates_with_settings(key, execute, can_execute, HashMap::new());
    }

    /// Store a [`RelayCommand`] built from delegates, with `settings`.
    ///
    /// A missing `execute` delegate makes this a silent no-op.
    fn add_or_set_delegates_with_settings(
        &self,
        key: &str,
        execute: Option<ExecuteFn>,
        can_execute: Option<CanExecuteFn>,
        settings: HashMap<String, Value>,
    ) {
        let Some(execute) = execute else {
            tracing::trace!(key = %key, "ignoring registration without execute delegate");
            return;
        };
        let command = RelayCommand::from_parts(execute, can_execute);
        self.add_or_set_command_with_settings(key, Arc::new(command), settings);
    }
}

/// Standard [`CommandRegistry`]: a lock-guarded map from key to container.
///
/// All operations take `&self` and are safe to call from any thread.
/// Dropping the aggregator clears its entries.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use command_aggregator::{CommandAggregator, CommandRegistry, RelayCommand};
/// use serde_json::Value;
///
/// let commands = CommandAggregator::new();
/// commands.add_or_set_command("Cancel", Arc::new(RelayCommand::with_guard(|_| {}, |_| false)));
///
/// assert!(!commands.get("Cancel").command().can_execute(&Value::Null));
/// // Unknown keys degrade to an always-executable no-op.
/// assert!(commands.get("Unknown").command().can_execute(&Value::Null));
/// ```
pub struct CommandAggregator {
    containers: RwLock<ContainerMap>,
    config: AggregatorConfig,
}

// Manual `Debug`: keys only, containers hold opaque closures.
impl fmt::Debug for CommandAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandAggregator")
            .field("keys", &self.keys())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for CommandAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandAggregator {
    /// Create an empty aggregator with the default configuration.
    pub fn new() -> Self {
        Self::with_config(AggregatorConfig::default())
    }

    /// Create an empty aggregator with `config`.
    pub fn with_config(config: AggregatorConfig) -> Self {
        Self {
            containers: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Start building an aggregator.
    pub fn builder() -> CommandAggregatorBuilder {
        CommandAggregatorBuilder::new()
    }

    /// The configuration this aggregator dispatches with.
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Sorted snapshot of the registered keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn read(&self) -> RwLockReadGuard<'_, ContainerMap> {
        self.containers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ContainerMap> {
        self.containers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CommandRegistry for CommandAggregator {
    fn add_or_set_container(&self, key: &str, container: Option<CommandContainer>) {
        if key.is_empty() {
            tracing::trace!("ignoring registration with empty key");
            return;
        }
        let stored_absent = container.is_none();
        let replaced = self.write().insert(key.to_owned(), container).is_some();
        tracing::debug!(key = %key, replaced, stored_absent, "command registered");
    }

    fn get(&self, key: &str) -> CommandContainer {
        if let Some(Some(container)) = self.read().get(key) {
            return container.clone();
        }
        tracing::trace!(key = %key, "no command registered, returning no-op container");
        CommandContainer::noop()
    }

    fn exists(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    fn has_null_command_container(&self, key: &str) -> bool {
        matches!(self.read().get(key), Some(None))
    }

    fn has_null_command(&self, key: &str) -> bool {
        match self.read().get(key) {
            Some(Some(container)) => !container.has_command(),
            Some(None) => true,
            None => false,
        }
    }

    fn count(&self) -> usize {
        self.read().len()
    }

    fn remove(&self, key: &str) {
        if self.write().remove(key).is_some() {
            tracing::debug!(key = %key, "command removed");
        }
    }

    fn remove_all(&self) {
        let mut containers = self.write();
        let removed = containers.len();
        containers.clear();
        tracing::debug!(removed, "all commands removed");
    }

    fn execute_async(&self, key: &str, parameter: Value) -> ExecutionHandle {
        // Resolve under the read lock, run outside it: the command may
        // itself touch this registry.
        let command = match self.read().get(key) {
            Some(Some(container)) => container.command(),
            Some(None) | None => {
                tracing::trace!(key = %key, "nothing to dispatch");
                return ExecutionHandle::completed(key);
            }
        };
        dispatch(&self.config, key, command, parameter)
    }
}

impl Drop for CommandAggregator {
    fn drop(&mut self) {
        let containers = self
            .containers
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if !containers.is_empty() {
            tracing::trace!(count = containers.len(), "dropping command aggregator");
            containers.clear();
        }
    }
}

/// Builder for a [`CommandAggregator`], optionally pre-populated.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use command_aggregator::{
///     CommandAggregator, CommandContainer, CommandRegistry, DispatchMode, RelayCommand,
/// };
///
/// let commands = CommandAggregator::builder()
///     .dispatch_mode(DispatchMode::Thread)
///     .entry("A", Some(CommandContainer::new(Arc::new(RelayCommand::noop()))))
///     .entry("", Some(CommandContainer::noop()))
///     .entry("B", None)
///     .build();
///
/// // Empty keys and absent containers are skipped.
/// assert_eq!(commands.count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct CommandAggregatorBuilder {
    config: AggregatorConfig,
    entries: Vec<(String, CommandContainer)>,
}

impl CommandAggregatorBuilder {
    /// Create a builder with the default configuration and no entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: AggregatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set how `execute_async` picks its worker.
    pub fn dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.config.dispatch = mode;
        self
    }

    /// Add an initial entry. Empty keys and `None` containers are skipped.
    pub fn entry(mut self, key: impl Into<String>, container: Option<CommandContainer>) -> Self {
        let key = key.into();
        if let Some(container) = container
            && !key.is_empty()
        {
            self.entries.push((key, container));
        }
        self
    }

    /// Add initial entries in order. Later duplicates replace earlier ones.
    pub fn entries<K, I>(self, entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Option<CommandContainer>)>,
    {
        entries
            .into_iter()
            .fold(self, |builder, (key, container)| builder.entry(key, container))
    }

    /// Build the aggregator.
    pub fn build(self) -> CommandAggregator {
        let aggregator = CommandAggregator::with_config(self.config);
        for (key, container) in self.entries {
            aggregator.add_or_set_container(&key, Some(container));
        }
        aggregator
    }
}


#[cfg(test)]
mod tests {
    use std::thread;

    use serde_json::json;

    use super::test_fixtures::{appender, guarded_appender, log};
    use super::*;

    fn five_commands(commands: &CommandAggregator) -> test_fixtures::Log {
        let out = log();
        for (key, text) in [("C1", "1"), ("C2", "2"), ("C3", "3"), ("C4", "4"), ("C5", "5")] {
            commands.add_or_set_command(key, appender(&out, text));
        }
        out
    }

    #[test]
    fn add_and_exists() {
        let commands = CommandAggregator::new();
        commands.add_or_set_command("TestCommand1", appender(&log(), "1"));
        commands.add_or_set_delegates("TestCommand2", Some(Arc::new(|_: &Value| {})), Some(Arc::new(|_: &Value| true)));

        assert!(commands.exists("TestCommand1"));
        assert!(commands.exists("TestCommand2"));
        assert!(!commands.exists("TestCommand3"));
    }

    #[test]
    fn empty_key_is_silently_ignored() {
        let commands = CommandAggregator::new();
        commands.add_or_set_command("", appender(&log(), "x"));
        commands.add_or_set_container("", None);
        assert_eq!(commands.count(), 0);
        assert!(!commands.has_any());
    }

    #[test]
    fn delegates_without_execute_store_nothing() {
        let commands = CommandAggregator::new();
        commands.add_or_set_delegates("Missing", None, Some(Arc::new(|_: &Value| true)));
        assert!(!commands.exists("Missing"));

        // An existing entry is left untouched as well.
        let out = log();
        commands.add_or_set_command("Kept", appender(&out, "k"));
        commands.add_or_set_delegates("Kept", None, None);
        commands.get("Kept").command().execute(&Value::Null);
        assert_eq!(*out.lock().unwrap(), "k");
    }

    #[test]
    fn absent_container_is_stored_and_observable() {
        let commands = CommandAggregator::new();
        commands.add_or_set_container("TestCommand1", None);
        commands.add_or_set_command("TestCommand2", appender(&log(), "2"));

        assert!(commands.exists("TestCommand1"));
        assert!(commands.has_null_command_container("TestCommand1"));
        assert!(!commands.has_null_command_container("TestCommand2"));
        assert!(commands.has_null_command("TestCommand1"));
        assert!(!commands.has_null_command("TestCommand2"));

        // Reads still degrade to a usable no-op.
        assert!(commands.get("TestCommand1").command().can_execute(&Value::Null));
    }

    #[test]
    fn container_without_command_reports_null_command_only() {
        let commands = CommandAggregator::new();
        commands.add_or_set_container("Bare", Some(CommandContainer::from_optional(None, HashMap::new())));
        assert!(!commands.has_null_command_container("Bare"));
        assert!(commands.has_null_command("Bare"));
    }

    #[test]
    fn null_queries_are_false_for_unregistered_keys() {
        let commands = CommandAggregator::new();
        assert!(!commands.has_null_command_container("Nope"));
        assert!(!commands.has_null_command("Nope"));
    }

    #[test]
    fn count_tracks_distinct_keys() {
        let commands = CommandAggregator::new();
        assert_eq!(commands.count(), 0);
        commands.add_or_set_command("A", appender(&log(), "a"));
        commands.add_or_set_command("B", appender(&log(), "b"));
        commands.add_or_set_command("A", appender(&log(), "c"));
        assert_eq!(commands.count(), 2);
    }

    #[test]
    fn remove_and_remove_all() {
        let commands = CommandAggregator::new();
        five_commands(&commands);
        assert_eq!(commands.count(), 5);

        commands.remove("C3");
        commands.remove("NotThere");
        assert_eq!(commands.count(), 4);
        assert!(commands.exists("C1"));
        assert!(!commands.exists("C3"));
        assert!(commands.exists("C5"));

        commands.remove_all();
        assert_eq!(commands.count(), 0);
        for key in ["C1", "C2", "C3", "C4", "C5"] {
            assert!(!commands.exists(key));
        }
    }

    #[test]
    fn get_returns_registered_command() {
        let commands = CommandAggregator::new();
        let out = five_commands(&commands);

        commands.get("C5").command().execute(&Value::Null);
        assert_eq!(*out.lock().unwrap(), "5");
        out.lock().unwrap().clear();

        commands.get("C2").command().execute(&Value::Null);
        assert_eq!(*out.lock().unwrap(), "2");
    }

    #[test]
    fn get_unknown_key_yields_noop_container() {
        let commands = CommandAggregator::new();
        let container = commands.get("Ghost");
        assert!(container.has_command());
        assert_eq!(container.settings_len(), 0);
        assert!(container.command().can_execute(&json!({"any": "thing"})));
        container.command().execute(&Value::Null);
        // Looking up never registers anything.
        assert!(!commands.exists("Ghost"));
    }

    #[test]
    fn can_execute_reflects_guards() {
        let commands = CommandAggregator::new();
        let out = log();
        commands.add_or_set_command("C1", guarded_appender(&out, "1", true));
        commands.add_or_set_command("C2", guarded_appender(&out, "2", false));

        assert!(commands.get("C1").command().can_execute(&Value::Null));
        assert!(!commands.get("C2").command().can_execute(&Value::Null));
    }

    #[test]
    fn re_registration_replaces_command() {
        let commands = CommandAggregator::new();
        let out = log();
        commands.add_or_set_command("TestCommand1", guarded_appender(&out, "1", true));
        commands.add_or_set_command("TestCommand2", guarded_appender(&out, "2", false));
        commands.add_or_set_command("TestCommand1", guarded_appender(&out, "3", true));
        let sink = Arc::clone(&out);
        commands.add_or_set_delegates(
            "TestCommand2",
            Some(Arc::new(move |_: &Value| sink.lock().unwrap().push('4'))),
            Some(Arc::new(|_: &Value| true)),
        );

        commands.get("TestCommand1").command().execute(&Value::Null);
        commands.get("TestCommand2").command().execute(&Value::Null);
        assert_eq!(*out.lock().unwrap(), "34");
        assert!(commands.get("TestCommand2").command().can_execute(&Value::Null));
    }

    #[test]
    fn re_registration_does_not_merge_settings() {
        let commands = CommandAggregator::new();
        commands.add_or_set_command_with_settings(
            "Save",
            appender(&log(), "s"),
            HashMap::from([("Old".to_string(), json!(1))]),
        );
        commands.add_or_set_command_with_settings(
            "Save",
            appender(&log(), "s"),
            HashMap::from([("New".to_string(), json!(2))]),
        );

        let container = commands.get("Save");
        assert_eq!(container.get("Old"), None);
        assert_eq!(container.get("New"), Some(json!(2)));
    }

    #[test]
    fn settings_added_through_lookup_are_visible_to_later_lookups() {
        let commands = CommandAggregator::new();
        commands.add_or_set_command("Open", appender(&log(), "o"));
        commands.get("Open").insert_setting("Shortcut", json!("Ctrl+O"));
        assert_eq!(commands.get("Open").get("Shortcut"), Some(json!("Ctrl+O")));
    }

    #[test]
    fn keys_are_sorted() {
        let commands = CommandAggregator::new();
        commands.add_or_set_command("b", appender(&log(), "b"));
        commands.add_or_set_container("a", None);
        assert_eq!(commands.keys(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn builder_skips_empty_keys_and_absent_containers() {
        let commands = CommandAggregator::builder()
            .entries([
                ("A", Some(CommandContainer::noop())),
                ("B", Some(CommandContainer::noop())),
                ("", Some(CommandContainer::noop())),
                ("C", None),
            ])
            .build();
        assert!(commands.exists("A"));
        assert!(commands.exists("B"));
        assert!(!commands.exists("C"));
        assert_eq!(commands.count(), 2);
    }

    #[test]
    fn execute_async_waits_for_each_command_once() {
        let commands = CommandAggregator::builder()
            .dispatch_mode(DispatchMode::Thread)
            .build();
        let out = five_commands(&commands);

        let handles: Vec<_> = ["C1", "C2", "C3", "C4", "C5"]
            .into_iter()
            .map(|key| commands.execute_async(key, Value::Null))
            .collect();
        for handle in handles {
            handle.wait_blocking().unwrap();
        }

        let mut ran: Vec<char> = out.lock().unwrap().chars().collect();
        ran.sort();
        assert_eq!(ran, vec!['1', '2', '3', '4', '5']);
    }

    #[test]
    fn execute_async_on_unknown_or_absent_key_is_a_completed_noop() {
        let commands = CommandAggregator::new();
        commands.add_or_set_container("Absent", None);
        commands.execute_async("Unknown", Value::Null).wait_blocking().unwrap();
        commands.execute_async("Absent", Value::Null).wait_blocking().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn execute_async_passes_parameter() {
        let commands = CommandAggregator::new();
        let out = log();
        let sink = Arc::clone(&out);
        commands.add_or_set_delegates(
            "Echo",
            Some(Arc::new(move |p: &Value| sink.lock().unwrap().push_str(p.as_str().unwrap_or("?")))),
            None,
        );

        commands.execute_async("Echo", json!("hello")).await.unwrap();
        assert_eq!(*out.lock().unwrap(), "hello");
    }

    #[test]
    fn concurrent_writers_and_readers_observe_every_key() {
        let commands = Arc::new(CommandAggregator::new());
        let writers: Vec<_> = (0..8)
            .map(|t| {
                let commands = Arc::clone(&commands);
                thread::spawn(move || {
                    for i in 0..50 {
                        let key = format!("cmd-{t}-{i}");
                        commands.add_or_set_command(&key, Arc::new(RelayCommand::noop()));
                        assert!(commands.exists(&key));
                        assert!(commands.get(&key).has_command());
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(commands.count(), 400);
    }

    #[test]
    fn command_may_use_registry_while_dispatched() {
        let commands = Arc::new(CommandAggregator::builder().dispatch_mode(DispatchMode::Thread).build());
        let inner = Arc::clone(&commands);
        commands.add_or_set_delegates(
            "Register",
            Some(Arc::new(move |_: &Value| {
                inner.add_or_set_command("Late", Arc::new(RelayCommand::noop()));
            })),
            None,
        );

        commands.execute_async("Register", Value::Null).wait_blocking().unwrap();
        assert!(commands.exists("Late"));
    }
}
