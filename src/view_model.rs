//! Base view-model behaviour: owned command registry plus dependency-aware
//! change notification.
//!
//! A concrete view-model embeds a [`ViewModelBase`] and implements
//! [`ViewModel`]. Mutations go through the base, which compares old and new
//! values, notifies subscribers for the changed property, then for every
//! property the type declared as depending on it.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::dependency::{DependencyDeclarations, DependencyGraph};
use crate::error::ConfigError;
use crate::factory::AggregatorFactory;
use crate::registry::{CommandAggregator, CommandRegistry};

/// Property name of the built-in window result.
const WINDOW_RESULT: &str = "WindowResult";

/// Identifies a change subscription for [`ViewModelBase::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Change notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyChanged {
    /// Name of the property whose value changed.
    pub property: String,
}

type Handler = Arc<dyn Fn(&PropertyChanged) + Send + Sync>;

/// Boxed values of the generic property store.
type ValueStore = HashMap<String, Box<dyn Any + Send + Sync>>;

/// A concrete view-model type.
///
/// # Contract
///
/// - [`DEPENDENCIES`](ViewModel::DEPENDENCIES) lists, for each dependent
///   property, the properties it is computed from. It is read once per
///   type and cached for the process lifetime.
/// - [`init_commands`](ViewModel::init_commands) registers the type's
///   commands. It runs exactly once, from [`initialized`](ViewModel::initialized).
///
/// # Examples
///
/// ```
/// use command_aggregator::{DependencyDeclarations, ViewModel, ViewModelBase};
///
/// struct Rectangle {
///     base: ViewModelBase,
///     width: u32,
/// }
///
/// impl ViewModel for Rectangle {
///     const DEPENDENCIES: DependencyDeclarations = &[("Area", &["Width", "Height"])];
///
///     fn base(&self) -> &ViewModelBase {
///         &self.base
///     }
/// }
///
/// impl Rectangle {
///     fn set_width(&mut self, width: u32) {
///         self.base.set_field(&mut self.width, width, "Width");
///     }
/// }
///
/// let mut rect = Rectangle { base: ViewModelBase::new::<Rectangle>(), width: 0 }.initialized();
/// let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// rect.base.subscribe(move |e| sink.lock().unwrap().push(e.property.clone()));
///
/// rect.set_width(3);
/// assert_eq!(*seen.lock().unwrap(), ["Width", "Area"]);
/// ```
pub trait ViewModel: Send + Sync + 'static {
    /// `(dependent, &[sources])` pairs, in declaration order.
    const DEPENDENCIES: DependencyDeclarations = &[];

    /// The embedded base.
    fn base(&self) -> &ViewModelBase;

    /// Register this view-model's commands. Default: none.
    fn init_commands(&self, _commands: &dyn CommandRegistry) {}

    /// Shortcut to the base's command registry.
    fn commands(&self) -> &dyn CommandRegistry {
        self.base().commands()
    }

    /// Finish construction by running [`init_commands`](ViewModel::init_commands).
    ///
    /// Calling it again on the same instance does nothing.
    fn initialized(self) -> Self
    where
        Self: Sized,
    {
        if self.base().claim_command_init() {
            self.init_commands(self.base().commands());
        }
        self
    }
}

/// Shared state embedded in every view-model.
pub struct ViewModelBase {
    commands: Box<dyn CommandRegistry>,
    dependencies: Arc<DependencyGraph>,
    values: RwLock<ValueStore>,
    subscribers: RwLock<Vec<(SubscriptionId, Handler)>>,
    next_subscription: AtomicU64,
    suppress: AtomicBool,
    commands_initialized: AtomicBool,
}

// Manual `Debug` because handlers and boxed values are opaque.
impl fmt::Debug for ViewModelBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewModelBase")
            .field("commands", &self.commands.count())
            .field("subscribers", &self.read_subscribers().len())
            .field("suppress_notifications", &self.suppress_notifications())
            .finish()
    }
}

impl ViewModelBase {
    /// Base for view-model type `V` with a standard [`CommandAggregator`].
    pub fn new<V: ViewModel>() -> Self {
        Self::with_registry::<V>(Box::new(CommandAggregator::new()))
    }

    /// Base for view-model type `V` whose registry comes from `factory`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Implementation`] if the factory's registered
    /// registry implementation fails to construct.
    pub fn with_factory<V: ViewModel>(factory: &AggregatorFactory) -> Result<Self, ConfigError> {
        Ok(Self::with_registry::<V>(factory.get_new_command_aggregator()?))
    }

    /// Base for view-model type `V` using an existing registry.
    pub fn with_registry<V: ViewModel>(commands: Box<dyn CommandRegistry>) -> Self {
        tracing::trace!(view_model = type_name::<V>(), "view-model base created");
        Self {
            commands,
            dependencies: DependencyGraph::for_type::<V>(),
            values: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
            suppress: AtomicBool::new(false),
            commands_initialized: AtomicBool::new(false),
        }
    }

    /// The command registry owned by this view-model.
    pub fn commands(&self) -> &dyn CommandRegistry {
        self.commands.as_ref()
    }

    /// The dependency graph of the concrete view-model type.
    pub fn dependencies(&self) -> &DependencyGraph {
        &self.dependencies
    }

    /// Register a change handler. Handlers run synchronously, in
    /// subscription order, on the thread performing the mutation.
    pub fn subscribe(
        &self,
        handler: impl Fn(&PropertyChanged) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a change handler. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    /// Whether all change notification is currently disabled.
    pub fn suppress_notifications(&self) -> bool {
        self.suppress.load(Ordering::Acquire)
    }

    /// Disable (`true`) or re-enable (`false`) all change notification.
    ///
    /// Writes still happen while suppressed.
    pub fn set_suppress_notifications(&self, suppress: bool) {
        self.suppress.store(suppress, Ordering::Release);
    }

    /// Suppress notifications until the returned guard is dropped.
    ///
    /// The previous flag is restored on drop, so scopes nest.
    pub fn suppress_scope(&self) -> SuppressGuard<'_> {
        let previous = self.suppress.swap(true, Ordering::AcqRel);
        SuppressGuard {
            base: self,
            previous,
        }
    }

    /// Notify `property`, then each property declared as depending on it,
    /// without comparing values. Dependents of dependents are not notified.
    ///
    /// Meant for computed properties that have no backing field.
    pub fn notify_changed(&self, property: &str) {
        if self.suppress_notifications() {
            return;
        }
        self.raise(property);
        for dependent in self.dependencies.direct_dependents(property) {
            self.raise(dependent);
        }
    }

    /// Write `value` into `field`, notifying if it differed.
    ///
    /// Returns `true` if the value changed. Notifications are skipped when
    /// the value is equal or notifications are suppressed; the write
    /// happens regardless.
    pub fn set_field<T: PartialEq>(&self, field: &mut T, value: T, property: &str) -> bool {
        let changed = *field != value;
        *field = value;
        if changed {
            self.notify_changed(property);
        }
        changed
    }

    /// [`set_field`](ViewModelBase::set_field) bracketed by hooks.
    ///
    /// `pre` runs before the compare-and-set, `post` after notification.
    /// Both run whether or not the value changed.
    pub fn set_field_with_hooks<T: PartialEq>(
        &self,
        field: &mut T,
        value: T,
        property: &str,
        pre: impl FnOnce(),
        post: impl FnOnce(),
    ) -> bool {
        pre();
        let changed = self.set_field(field, value, property);
        post();
        changed
    }

    /// Read a property from the generic store.
    ///
    /// The first read of an unset property stores and returns
    /// `T::default()`. A property stored with a different type also reads
    /// as `T::default()`.
    pub fn get_value<T>(&self, property: &str) -> T
    where
        T: Clone + Default + Send + Sync + 'static,
    {
        if let Some(stored) = self.read_values().get(property) {
            return downcast_or_default::<T>(property, stored.as_ref());
        }
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        let stored = values
            .entry(property.to_owned())
            .or_insert_with(|| Box::new(T::default()));
        downcast_or_default::<T>(property, stored.as_ref())
    }

    /// Write a property into the generic store, notifying if it differed.
    ///
    /// Returns `true` if the value changed. An unset property, or one stored
    /// with a different type, compares as `T::default()`. The compare and
    /// the write happen under one lock; notification runs after it is
    /// released.
    pub fn set_value<T>(&self, property: &str, value: T) -> bool
    where
        T: Clone + Default + PartialEq + Send + Sync + 'static,
    {
        let changed = {
            let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
            let changed = match values.get(property).and_then(|v| v.downcast_ref::<T>()) {
                Some(current) => *current != value,
                None => T::default() != value,
            };
            values.insert(property.to_owned(), Box::new(value));
            changed
        };
        if changed {
            self.notify_changed(property);
        }
        changed
    }

    /// [`set_value`](ViewModelBase::set_value) bracketed by hooks that run
    /// whether or not the value changed.
    pub fn set_value_with_hooks<T>(
        &self,
        property: &str,
        value: T,
        pre: impl FnOnce(),
        post: impl FnOnce(),
    ) -> bool
    where
        T: Clone + Default + PartialEq + Send + Sync + 'static,
    {
        pre();
        let changed = self.set_value(property, value);
        post();
        changed
    }

    /// Result a hosting window should close with; `None` keeps it open.
    pub fn window_result(&self) -> Option<bool> {
        self.get_value(WINDOW_RESULT)
    }

    /// Ask the hosting window to close with `result` (`None` does not close).
    pub fn set_window_result(&self, result: Option<bool>) {
        self.set_value(WINDOW_RESULT, result);
    }

    /// Explicit end of life: drop every command and change handler.
    pub fn teardown(&self) {
        self.commands.remove_all();
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        tracing::trace!("view-model torn down");
    }

    /// Returns `true` exactly once per instance.
    pub(crate) fn claim_command_init(&self) -> bool {
        !self.commands_initialized.swap(true, Ordering::AcqRel)
    }

    fn raise(&self, property: &str) {
        if self.suppress_notifications() || property.trim().is_empty() {
            return;
        }
        // Snapshot so handlers may (un)subscribe or mutate the view-model.
        let handlers: Vec<Handler> = self
            .read_subscribers()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        if handlers.is_empty() {
            return;
        }
        let event = PropertyChanged {
            property: property.to_owned(),
        };
        for handler in handlers {
            handler(&event);
        }
    }

    fn read_values(&self) -> std::sync::RwLockReadGuard<'_, ValueStore> {
        self.values.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_subscribers(&self) -> std::sync::RwLockReadGuard<'_, Vec<(SubscriptionId, Handler)>> {
        self.subscribers.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn downcast_or_default<T>(property: &str, stored: &(dyn Any + Send + Sync)) -> T
where
    T: Clone + Default + 'static,
{
    match stored.downcast_ref::<T>() {
        Some(value) => value.clone(),
        None => {
            tracing::warn!(
                property = %property,
                requested = type_name::<T>(),
                "stored property has a different type, reading default"
            );
            T::default()
        }
    }
}

/// Restores the previous suppression flag when dropped.
#[derive(Debug)]
#[must_use = "notifications are only suppressed while the guard is alive"]
pub struct SuppressGuard<'a> {
    base: &'a ViewModelBase,
    previous: bool,
}

impl Drop for SuppressGuard<'_> {
    fn drop(&mut self) {
        self.base.set_suppress_notifications(self.previous);
    }
}
