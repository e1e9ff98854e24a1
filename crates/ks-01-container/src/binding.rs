//! # Bindings
//!
//! How a registered slot produces its value.

use crate::container::Container;
use crate::error::ContainerResult;
use crate::injection::Instance;
use parking_lot::RwLock;
use std::sync::Arc;

/// Type-erased constructor, invoked with the container that owns the binding.
pub(crate) type Factory =
    Arc<dyn Fn(&Container<'_>) -> ContainerResult<Instance> + Send + Sync>;

pub(crate) enum Binding {
    /// Concrete type built lazily; first instance cached in the owning container.
    Type {
        factory: Factory,
        cached: RwLock<Option<Instance>>,
    },
    /// Fixed value.
    Instance(Instance),
    /// Concrete type built anew on every resolution.
    Fresh { factory: Factory },
}

impl Binding {
    pub(crate) fn singleton(factory: Factory) -> Self {
        Self::Type {
            factory,
            cached: RwLock::new(None),
        }
    }

    pub(crate) fn fresh(factory: Factory) -> Self {
        Self::Fresh { factory }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Type { .. } => "type",
            Self::Instance(_) => "instance",
            Self::Fresh { .. } => "fresh",
        }
    }
}
