//! Command container: one command plus an open-ended settings map.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};

use crate::command::{Command, RelayCommand};

/// A command bundled with arbitrary key/value settings.
///
/// The settings map is shared: clones of a container (including the one
/// handed out by a registry lookup) see each other's additions. No
/// validation is performed on setting keys or values.
///
/// A container built without a command still yields one from
/// [`command`](CommandContainer::command) -- the no-op command -- while
/// [`has_command`](CommandContainer::has_command) reports the absence.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use command_aggregator::{CommandContainer, RelayCommand};
/// use serde_json::json;
///
/// let container = CommandContainer::new(Arc::new(RelayCommand::noop()));
/// container.insert_setting("Tooltip", json!("Save the document"));
/// assert_eq!(container.get("Tooltip"), Some(json!("Save the document")));
/// assert_eq!(container.get("Missing"), None);
/// ```
#[derive(Clone)]
pub struct CommandContainer {
    command: Option<Arc<dyn Command>>,
    settings: Arc<RwLock<HashMap<String, Value>>>,
}

impl fmt::Debug for CommandContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContainer")
            .field("has_command", &self.has_command())
            .field("settings", &self.settings_snapshot())
            .finish()
    }
}

impl CommandContainer {
    /// Wrap `command` with an empty settings map.
    pub fn new(command: Arc<dyn Command>) -> Self {
        Self::with_settings(command, HashMap::new())
    }

    /// Wrap `command` together with `settings`.
    pub fn with_settings(command: Arc<dyn Command>, settings: HashMap<String, Value>) -> Self {
        Self {
            command: Some(command),
            settings: Arc::new(RwLock::new(settings)),
        }
    }

    /// Build a container whose command may be absent.
    ///
    /// `None` is remembered (see [`has_command`](CommandContainer::has_command))
    /// but reads still yield the no-op command.
    pub fn from_optional(command: Option<Arc<dyn Command>>, settings: HashMap<String, Value>) -> Self {
        Self {
            command,
            settings: Arc::new(RwLock::new(settings)),
        }
    }

    /// Container wrapping the no-op command, returned for unknown keys.
    pub fn noop() -> Self {
        Self::new(Arc::new(RelayCommand::noop()))
    }

    /// The wrapped command, or the no-op command if none was supplied.
    pub fn command(&self) -> Arc<dyn Command> {
        match &self.command {
            Some(command) => Arc::clone(command),
            None => Arc::new(RelayCommand::noop()),
        }
    }

    /// Whether a real command was supplied at construction.
    pub fn has_command(&self) -> bool {
        self.command.is_some()
    }

    /// Look up a setting.
    ///
    /// Returns `None` both for unknown keys and for keys mapped to
    /// `Value::Null`.
    pub fn get(&self, setting_key: &str) -> Option<Value> {
        self.read_settings()
            .get(setting_key)
            .filter(|value| !value.is_null())
            .cloned()
    }

    /// Add or replace a setting, returning the previous value.
    pub fn insert_setting(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value)
    }

    /// Remove a setting, returning its value if it was present.
    pub fn remove_setting(&self, key: &str) -> Option<Value> {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Number of settings entries, including `Null`-valued ones.
    pub fn settings_len(&self) -> usize {
        self.read_settings().len()
    }

    /// Copy of the current settings as a JSON object.
    pub fn settings_snapshot(&self) -> Map<String, Value> {
        self.read_settings()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn read_settings(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Value>> {
        self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }
}
