//! Per-type property dependency graphs.
//!
//! A view-model type declares, for each computed property, the properties
//! it depends on. The graph stores the inverse: for each source property,
//! the dependents whose change notification must follow its own. Graphs
//! are built once per concrete type and shared for the rest of the process.

use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::view_model::ViewModel;

/// Static dependency table: `(dependent, &[sources])` pairs in declaration
/// order.
pub type DependencyDeclarations = &'static [(&'static str, &'static [&'static str])];

/// Process-wide cache keyed by concrete view-model type.
type GraphCache = HashMap<TypeId, Arc<DependencyGraph>>;

fn graph_cache() -> &'static RwLock<GraphCache> {
    static GRAPHS: OnceLock<RwLock<GraphCache>> = OnceLock::new();
    GRAPHS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Mapping from a property to the properties that depend on it.
///
/// # Examples
///
/// ```
/// use command_aggregator::DependencyGraph;
///
/// let graph = DependencyGraph::from_declarations([
///     ("FullName", &["FirstName", "LastName"][..]),
///     ("Greeting", &["FullName"][..]),
/// ]);
/// assert_eq!(graph.direct_dependents("FirstName"), ["FullName"]);
/// // Dependents of dependents are not followed.
/// assert_eq!(graph.direct_dependents("FullName"), ["Greeting"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    dependents: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build the inverse mapping from `(dependent, sources)` declarations.
    ///
    /// Dependents are recorded per source in declaration order; a repeated
    /// declaration of the same edge is recorded once.
    pub fn from_declarations<'a, I>(declarations: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [&'a str])>,
    {
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for (dependent, sources) in declarations {
            for source in sources {
                let entry = dependents.entry((*source).to_owned()).or_default();
                if !entry.iter().any(|d| d == dependent) {
                    entry.push(dependent.to_owned());
                }
            }
        }
        Self { dependents }
    }

    /// The cached graph for view-model type `V`.
    ///
    /// The first call for a type builds the graph from
    /// [`ViewModel::DEPENDENCIES`]; later calls return the same `Arc`. Two
    /// threads racing on the first call may both build, but only one graph
    /// is ever stored.
    pub fn for_type<V: ViewModel>() -> Arc<Self> {
        let key = TypeId::of::<V>();

        // Fast path: read lock.
        if let Some(graph) = graph_cache()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Arc::clone(graph);
        }

        // Slow path: build outside the lock, then insert if still absent.
        let built = Arc::new(Self::from_declarations(V::DEPENDENCIES.iter().copied()));
        let mut cache = graph_cache().write().unwrap_or_else(PoisonError::into_inner);
        let graph = cache.entry(key).or_insert_with(|| {
            tracing::debug!(
                view_model = type_name::<V>(),
                sources = built.dependents.len(),
                "dependency graph built"
            );
            built
        });
        Arc::clone(graph)
    }

    /// Dependents declared directly on `property`, in declaration order.
    ///
    /// Unknown properties have no dependents.
    pub fn direct_dependents(&self, property: &str) -> &[String] {
        self.dependents
            .get(property)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether no dependencies were declared.
    pub fn is_empty(&self) -> bool {
        self.dependents.is_empty()
    }
}
