//! Swappable construction of command registries.
//!
//! An [`AggregatorFactory`] produces the standard [`CommandAggregator`]
//! unless an alternate implementation has been registered on it, in which
//! case every subsequent call constructs that implementation until the
//! registration is cleared. The factory is an ordinary value handed to
//! whatever constructs view-models, so independent factories never see
//! each other's registrations.

use std::any::{TypeId, type_name};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::container::CommandContainer;
use crate::dispatch::AggregatorConfig;
use crate::error::ConfigError;
use crate::registry::{CommandAggregator, CommandRegistry};

/// Constructor for a custom registry implementation.
///
/// Returning `Err` makes the factory fail with
/// [`ConfigError::Implementation`].
pub type RegistryConstructor =
    Arc<dyn Fn() -> Result<Box<dyn CommandRegistry>, String> + Send + Sync>;

/// The currently registered alternate implementation.
#[derive(Clone)]
struct Registration {
    /// Set when registered by type, so unregistering by type can match.
    type_id: Option<TypeId>,
    name: String,
    construct: RegistryConstructor,
}

/// Produces command registries, standard or custom.
///
/// Registration, unregistration and clearing are idempotent and affect all
/// later calls on this factory. Concurrent registration and construction
/// is memory-safe, but which implementation a racing call observes is
/// last-writer-wins.
///
/// # Examples
///
/// ```
/// use command_aggregator::{AggregatorFactory, CommandAggregator, CommandRegistry};
///
/// #[derive(Default)]
/// struct Audited(CommandAggregator);
/// # impl CommandRegistry for Audited {
/// #     fn add_or_set_container(&self, k: &str, c: Option<command_aggregator::CommandContainer>) { self.0.add_or_set_container(k, c) }
/// #     fn get(&self, k: &str) -> command_aggregator::CommandContainer { self.0.get(k) }
/// #     fn exists(&self, k: &str) -> bool { self.0.exists(k) }
/// #     fn has_null_command_container(&self, k: &str) -> bool { self.0.has_null_command_container(k) }
/// #     fn has_null_command(&self, k: &str) -> bool { self.0.has_null_command(k) }
/// #     fn count(&self) -> usize { self.0.count() }
/// #     fn remove(&self, k: &str) { self.0.remove(k) }
/// #     fn remove_all(&self) { self.0.remove_all() }
/// #     fn execute_async(&self, k: &str, p: serde_json::Value) -> command_aggregator::ExecutionHandle { self.0.execute_async(k, p) }
/// # }
///
/// let factory = AggregatorFactory::new();
/// factory.register_implementation::<Audited>();
/// assert!(factory.has_registration());
///
/// let registry = factory.get_new_command_aggregator().unwrap();
/// assert_eq!(registry.count(), 0);
///
/// factory.unregister_implementation::<Audited>();
/// assert!(!factory.has_registration());
/// ```
#[derive(Default)]
pub struct AggregatorFactory {
    registration: RwLock<Option<Registration>>,
    config: AggregatorConfig,
}

impl fmt::Debug for AggregatorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregatorFactory")
            .field("registered", &self.registered_name())
            .field("config", &self.config)
            .finish()
    }
}

impl AggregatorFactory {
    /// Create a factory producing default-configured [`CommandAggregator`]s.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory whose standard aggregators use `config`.
    ///
    /// Custom implementations are constructed by their own constructor and
    /// do not receive this configuration.
    pub fn with_config(config: AggregatorConfig) -> Self {
        Self {
            registration: RwLock::new(None),
            config,
        }
    }

    /// Make every later call construct `R` via its `Default` impl.
    pub fn register_implementation<R>(&self)
    where
        R: CommandRegistry + Default,
    {
        self.set(Some(Registration {
            type_id: Some(TypeId::of::<R>()),
            name: type_name::<R>().to_owned(),
            construct: Arc::new(|| Ok(Box::new(R::default()) as Box<dyn CommandRegistry>)),
        }));
    }

    /// Make every later call construct a registry with `construct`.
    ///
    /// # Arguments
    ///
    /// * `name` - Label used in logs and in [`ConfigError::Implementation`].
    /// * `construct` - Fallible constructor for the custom registry.
    pub fn register_constructor(&self, name: impl Into<String>, construct: RegistryConstructor) {
        self.set(Some(Registration {
            type_id: None,
            name: name.into(),
            construct,
        }));
    }

    /// Drop the registration if `R` is the registered implementation.
    ///
    /// Unregistering a type that is not registered leaves the current
    /// registration in place.
    pub fn unregister_implementation<R>(&self)
    where
        R: CommandRegistry,
    {
        let mut registration = self.write();
        if registration
            .as_ref()
            .is_some_and(|r| r.type_id == Some(TypeId::of::<R>()))
        {
            *registration = None;
            tracing::debug!(implementation = type_name::<R>(), "aggregator implementation unregistered");
        }
    }

    /// Drop any registration; later calls produce the standard aggregator.
    pub fn clear_registration(&self) {
        if self.write().take().is_some() {
            tracing::debug!("aggregator implementation registration cleared");
        }
    }

    /// Whether an alternate implementation is registered.
    pub fn has_registration(&self) -> bool {
        self.read().is_some()
    }

    /// Name of the registered alternate implementation, if any.
    pub fn registered_name(&self) -> Option<String> {
        self.read().as_ref().map(|r| r.name.clone())
    }

    /// Construct a new, empty registry.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Implementation`] if a registered constructor
    /// fails. The standard aggregator never fails.
    pub fn get_new_command_aggregator(&self) -> Result<Box<dyn CommandRegistry>, ConfigError> {
        // Clone out of the lock so the constructor may use this factory.
        let registration = self.read().clone();
        match registration {
            None => Ok(Box::new(CommandAggregator::with_config(self.config.clone()))),
            Some(registration) => (registration.construct)().map_err(|reason| {
                tracing::error!(
                    implementation = %registration.name,
                    reason = %reason,
                    "registered aggregator implementation failed to construct"
                );
                ConfigError::Implementation {
                    name: registration.name,
                    reason,
                }
            }),
        }
    }

    /// Construct a registry pre-populated from `entries`, in order.
    ///
    /// Entries with an empty key or an absent container are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Implementation`] if a registered constructor
    /// fails.
    pub fn get_new_command_aggregator_with<K, I>(
        &self,
        entries: I,
    ) -> Result<Box<dyn CommandRegistry>, ConfigError>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Option<CommandContainer>)>,
    {
        let registry = self.get_new_command_aggregator()?;
        for (key, container) in entries {
            let key = key.as_ref();
            if key.is_empty() {
                continue;
            }
            if let Some(container) = container {
                registry.add_or_set_container(key, Some(container));
            }
        }
        Ok(registry)
    }

    fn set(&self, registration: Option<Registration>) {
        if let Some(r) = &registration {
            tracing::debug!(implementation = %r.name, "aggregator implementation registered");
        }
        *self.write() = registration;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<Registration>> {
        self.registration.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<Registration>> {
        self.registration.write().unwrap_or_else(PoisonError::into_inner)
    }
}
