//! Keyed command registries and dependency-aware change notification for
//! view-models.

mod command;
pub use command::{CanExecuteFn, Command, ExecuteFn, HookFn, RelayCommand, RelayCommandBuilder};
mod container;
pub use container::CommandContainer;
mod dependency;
mod dispatch;
mod error;
mod factory;
mod registry;
mod view_model;

pub use dependency::{DependencyDeclarations, DependencyGraph};
pub use dispatch::{AggregatorConfig, DispatchMode, ExecutionHandle};
pub use error::{ConfigError, DispatchError};
pub use factory::{AggregatorFactory, RegistryConstructor};
pub use registry::{CommandAggregator, CommandAggregatorBuilder, CommandRegistry};
pub use view_model::{PropertyChanged, SubscriptionId, SuppressGuard, ViewModel, ViewModelBase};
