//! # Injection Points
//!
//! Types built by the container declare their dependencies up front as a list
//! of [`InjectionPoint`] descriptors. The container resolves every point
//! before calling [`Injectable::construct`], so a missing required binding
//! fails with `UnresolvedDependency` naming the point instead of surfacing
//! half-way through a constructor.

use crate::error::{ContainerError, ContainerResult};
use std::any::{type_name, Any, TypeId};
use std::sync::Arc;

/// Type-erased resolved value. The inner `Any` is always an `Arc<C>`.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Registration key: capability type plus optional binding name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Slot {
    pub(crate) capability: TypeId,
    pub(crate) name: Option<String>,
}

/// Descriptor for one dependency of a constructible type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionPoint {
    capability: TypeId,
    capability_name: &'static str,
    name: Option<String>,
    fresh: bool,
    optional: bool,
}

impl InjectionPoint {
    /// Required, unnamed, cached dependency on capability `C`.
    #[must_use]
    pub fn of<C: ?Sized + Send + Sync + 'static>() -> Self {
        Self {
            capability: TypeId::of::<C>(),
            capability_name: type_name::<C>(),
            name: None,
            fresh: false,
            optional: false,
        }
    }

    /// Select a named binding instead of the unnamed one.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Always construct a new instance, bypassing any singleton cache.
    #[must_use]
    pub fn fresh(mut self) -> Self {
        self.fresh = true;
        self
    }

    /// Resolve to nothing instead of failing when unbound.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Rust type name of the capability.
    #[must_use]
    pub fn capability_name(&self) -> &'static str {
        self.capability_name
    }

    /// Binding name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub(crate) fn slot(&self) -> Slot {
        Slot {
            capability: self.capability,
            name: self.name.clone(),
        }
    }

    pub(crate) fn unresolved(&self) -> ContainerError {
        ContainerError::UnresolvedDependency {
            capability: self.capability_name,
            name: self.name.clone(),
        }
    }

    fn matches<C: ?Sized + 'static>(&self, name: Option<&str>) -> bool {
        self.capability == TypeId::of::<C>() && self.name.as_deref() == name
    }
}

/// A type the container knows how to build.
///
/// Rust has no runtime reflection, so the constructible shape is an explicit
/// declaration: `injection_points` lists what `construct` will read.
///
/// ```ignore
/// struct ChatController { clock: Arc<dyn Clock>, store: Arc<dyn Store> }
///
/// impl Injectable for ChatController {
///     fn injection_points() -> Vec<InjectionPoint> {
///         vec![
///             InjectionPoint::of::<dyn Clock>(),
///             InjectionPoint::of::<dyn Store>().named("primary"),
///         ]
///     }
///
///     fn construct(deps: &Dependencies) -> ContainerResult<Self> {
///         Ok(Self {
///             clock: deps.get::<dyn Clock>()?,
///             store: deps.get_named::<dyn Store>("primary")?,
///         })
///     }
/// }
/// ```
pub trait Injectable: Sized + Send + Sync + 'static {
    /// Dependencies read by [`Injectable::construct`].
    fn injection_points() -> Vec<InjectionPoint> {
        Vec::new()
    }

    /// Build the value from resolved dependencies.
    fn construct(deps: &Dependencies) -> ContainerResult<Self>;
}

/// Dependencies resolved for one construction, keyed by injection point.
pub struct Dependencies {
    resolved: Vec<(InjectionPoint, Option<Instance>)>,
}

impl Dependencies {
    pub(crate) fn new(resolved: Vec<(InjectionPoint, Option<Instance>)>) -> Self {
        Self { resolved }
    }

    /// Unnamed dependency on `C`.
    pub fn get<C: ?Sized + Send + Sync + 'static>(&self) -> ContainerResult<Arc<C>> {
        self.lookup::<C>(None)
    }

    /// Named dependency on `C`.
    pub fn get_named<C: ?Sized + Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> ContainerResult<Arc<C>> {
        self.lookup::<C>(Some(name))
    }

    /// Unnamed optional dependency on `C`; `None` when it was not bound.
    pub fn get_optional<C: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<C>> {
        self.lookup::<C>(None).ok()
    }

    /// Number of declared points, resolved or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    fn lookup<C: ?Sized + Send + Sync + 'static>(
        &self,
        name: Option<&str>,
    ) -> ContainerResult<Arc<C>> {
        self.resolved
            .iter()
            .find(|(point, _)| point.matches::<C>(name))
            .and_then(|(_, instance)| instance.as_ref())
            .and_then(downcast::<C>)
            .ok_or_else(|| ContainerError::UnresolvedDependency {
                capability: type_name::<C>(),
                name: name.map(str::to_string),
            })
    }
}

/// Recover the typed `Arc<C>` stored inside an [`Instance`].
pub(crate) fn downcast<C: ?Sized + Send + Sync + 'static>(instance: &Instance) -> Option<Arc<C>> {
    instance.downcast_ref::<Arc<C>>().cloned()
}

/// Erase a typed `Arc<C>` into an [`Instance`].
pub(crate) fn erase<C: ?Sized + Send + Sync + 'static>(value: Arc<C>) -> Instance {
    Arc::new(value)
}
