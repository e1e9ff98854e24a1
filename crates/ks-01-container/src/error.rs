//! # Container Errors
//!
//! `BindingConflict` is a setup-time failure; `UnresolvedDependency` is
//! recoverable and is surfaced per request by the pipeline boundary.

use thiserror::Error;

/// Render a capability slot for messages: `Type` or `Type["name"]`.
pub(crate) fn slot_label(capability: &str, name: Option<&str>) -> String {
    match name {
        Some(name) => format!("{capability}[\"{name}\"]"),
        None => capability.to_string(),
    }
}

/// Errors raised while registering or resolving bindings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContainerError {
    /// The (capability, name) slot is already bound in this container.
    #[error("binding conflict: {} is already registered in this container", slot_label(.capability, .name.as_deref()))]
    BindingConflict {
        /// Rust type name of the capability.
        capability: &'static str,
        /// Binding name, if the slot is named.
        name: Option<String>,
    },

    /// No binding for a required injection point in this container or its ancestors.
    #[error("unresolved dependency: {}", slot_label(.capability, .name.as_deref()))]
    UnresolvedDependency {
        /// Rust type name of the capability.
        capability: &'static str,
        /// Binding name, if the point was named.
        name: Option<String>,
    },

    /// Building a capability re-entered its own construction.
    #[error("circular dependency while constructing {capability}")]
    CircularDependency {
        /// Rust type name of the capability.
        capability: &'static str,
    },

    /// A type's constructor rejected its resolved dependencies.
    #[error("failed to construct {capability}: {reason}")]
    Construction {
        /// Rust type name of the constructed type.
        capability: &'static str,
        /// Constructor-supplied reason.
        reason: String,
    },
}

impl ContainerError {
    /// Shortcut for an unnamed unresolved capability.
    pub fn unresolved<C: ?Sized + 'static>() -> Self {
        Self::UnresolvedDependency {
            capability: std::any::type_name::<C>(),
            name: None,
        }
    }

    /// Shortcut for a constructor failure.
    pub fn construction<T: ?Sized + 'static>(reason: impl Into<String>) -> Self {
        Self::Construction {
            capability: std::any::type_name::<T>(),
            reason: reason.into(),
        }
    }

    /// Whether this error happened at setup time rather than during resolution.
    #[must_use]
    pub fn is_setup_error(&self) -> bool {
        matches!(self, Self::BindingConflict { .. })
    }
}

/// Result alias for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;
