//! # Container
//!
//! Hierarchical object-resolution registry.
//!
//! ```text
//!            ┌──────────────────────┐
//!            │ root (process life)  │  singletons cached here
//!            └──────────┬───────────┘
//!        ┌──────────────┼──────────────┐
//!        ▼              ▼              ▼
//!   child (req 1)  child (req 2)  child (req 3)   discarded with the request
//! ```
//!
//! A child borrows its parent (`&'p Container`), so the tree never forms a
//! shared-ownership cycle and the borrow checker keeps every child inside its
//! parent's lifetime. The parent keeps no list of its children and cannot
//! enumerate or dispose of them: a child is owned by whoever created it (the
//! pipeline, for a request scope), and dropping it discards the whole scope,
//! bindings and cached singletons together.

use crate::binding::{Binding, Factory};
use crate::error::{ContainerError, ContainerResult};
use crate::injection::{downcast, erase, Dependencies, Injectable, InjectionPoint, Instance, Slot};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Hierarchical dependency container.
pub struct Container<'p> {
    parent: Option<&'p Container<'p>>,
    bindings: RwLock<HashMap<Slot, Arc<Binding>>>,
    /// Serialises first construction of singletons so racing resolvers build once.
    construction: ReentrantMutex<()>,
    /// Slots currently under construction on the thread holding `construction`.
    in_progress: Mutex<Vec<(Slot, &'static str)>>,
}

impl Container<'static> {
    /// Create the process-wide root container.
    #[must_use]
    pub fn new_root() -> Self {
        Self::with_parent(None)
    }
}

impl Default for Container<'static> {
    fn default() -> Self {
        Self::new_root()
    }
}

impl<'p> Container<'p> {
    fn with_parent(parent: Option<&'p Container<'p>>) -> Self {
        Self {
            parent,
            bindings: RwLock::new(HashMap::new()),
            construction: ReentrantMutex::new(()),
            in_progress: Mutex::new(Vec::new()),
        }
    }

    /// Create a non-root container whose parent is `self`.
    #[must_use]
    pub fn new_child(&self) -> Container<'_> {
        Container::with_parent(Some(self))
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Container<'p>> {
        self.parent
    }

    /// Distance to the root (root is 0).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.parent.map_or(0, |parent| parent.depth() + 1)
    }

    /// Number of bindings registered directly in this container.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.bindings.read().len()
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Bind capability `C` to concrete type `T`, built lazily and cached here.
    ///
    /// `upcast` converts the concrete `Arc<T>` to the capability, usually
    /// `|t| t as Arc<dyn Capability>`.
    pub fn register_type<C, T>(&self, upcast: fn(Arc<T>) -> Arc<C>) -> ContainerResult<()>
    where
        C: ?Sized + Send + Sync + 'static,
        T: Injectable,
    {
        self.bind::<C>(None, Binding::singleton(factory_for(upcast)))
    }

    /// Named variant of [`Container::register_type`].
    pub fn register_type_named<C, T>(
        &self,
        name: impl Into<String>,
        upcast: fn(Arc<T>) -> Arc<C>,
    ) -> ContainerResult<()>
    where
        C: ?Sized + Send + Sync + 'static,
        T: Injectable,
    {
        self.bind::<C>(Some(name.into()), Binding::singleton(factory_for(upcast)))
    }

    /// Self-binding shortcut: `T` is its own capability.
    pub fn register_self<T: Injectable>(&self) -> ContainerResult<()> {
        self.register_type::<T, T>(|value| value)
    }

    /// Bind capability `C` to `T`, constructing a new instance per resolution.
    pub fn register_fresh<C, T>(&self, upcast: fn(Arc<T>) -> Arc<C>) -> ContainerResult<()>
    where
        C: ?Sized + Send + Sync + 'static,
        T: Injectable,
    {
        self.bind::<C>(None, Binding::fresh(factory_for(upcast)))
    }

    /// Bind `T` to a fixed value shared by this container and its descendants.
    pub fn register_instance<T: Send + Sync + 'static>(&self, value: T) -> ContainerResult<()> {
        self.register_shared::<T>(Arc::new(value))
    }

    /// Bind capability `C` to an already-shared value (e.g. `Arc<dyn Trait>`).
    pub fn register_shared<C: ?Sized + Send + Sync + 'static>(
        &self,
        value: Arc<C>,
    ) -> ContainerResult<()> {
        self.bind::<C>(None, Binding::Instance(erase(value)))
    }

    /// Named variant of [`Container::register_shared`].
    pub fn register_shared_named<C: ?Sized + Send + Sync + 'static>(
        &self,
        name: impl Into<String>,
        value: Arc<C>,
    ) -> ContainerResult<()> {
        self.bind::<C>(Some(name.into()), Binding::Instance(erase(value)))
    }

    fn bind<C: ?Sized + 'static>(&self, name: Option<String>, binding: Binding) -> ContainerResult<()> {
        let slot = Slot {
            capability: TypeId::of::<C>(),
            name,
        };
        let mut bindings = self.bindings.write();
        if bindings.contains_key(&slot) {
            return Err(ContainerError::BindingConflict {
                capability: type_name::<C>(),
                name: slot.name,
            });
        }
        debug!(
            capability = type_name::<C>(),
            name = ?slot.name,
            kind = binding.kind(),
            root = self.is_root(),
            "Registered binding"
        );
        bindings.insert(slot, Arc::new(binding));
        Ok(())
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve `C`, searching ancestors when absent locally.
    pub fn resolve<C: ?Sized + Send + Sync + 'static>(&self) -> ContainerResult<Arc<C>> {
        self.resolve_with::<C>(true)
    }

    /// Resolve `C`; ancestors are consulted only when `search_parent` is set.
    pub fn resolve_with<C: ?Sized + Send + Sync + 'static>(
        &self,
        search_parent: bool,
    ) -> ContainerResult<Arc<C>> {
        self.resolve_typed(&InjectionPoint::of::<C>(), search_parent)
    }

    /// Resolve the binding of `C` registered under `name`.
    pub fn resolve_named<C: ?Sized + Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> ContainerResult<Arc<C>> {
        self.resolve_typed(&InjectionPoint::of::<C>().named(name), true)
    }

    /// Resolve `C`, forcing new construction even for cached bindings.
    pub fn resolve_fresh<C: ?Sized + Send + Sync + 'static>(&self) -> ContainerResult<Arc<C>> {
        self.resolve_typed(&InjectionPoint::of::<C>().fresh(), true)
    }

    /// Whether `C` is bound here or in an ancestor.
    #[must_use]
    pub fn contains<C: ?Sized + 'static>(&self) -> bool {
        self.has_slot(
            &Slot {
                capability: TypeId::of::<C>(),
                name: None,
            },
            true,
        )
    }

    /// Build an unregistered [`Injectable`] from this container's bindings.
    pub fn construct<T: Injectable>(&self) -> ContainerResult<T> {
        let mut resolved = Vec::new();
        for point in T::injection_points() {
            let instance = self.resolve_point(&point, true)?;
            if instance.is_none() && !point.is_optional() {
                return Err(point.unresolved());
            }
            resolved.push((point, instance));
        }
        T::construct(&Dependencies::new(resolved))
    }

    /// Required injection points of `T` with no binding in reach.
    ///
    /// Inspects declarations only; nothing is constructed.
    #[must_use]
    pub fn missing_dependencies<T: Injectable>(&self) -> Vec<InjectionPoint> {
        T::injection_points()
            .into_iter()
            .filter(|point| !point.is_optional() && !self.has_slot(&point.slot(), true))
            .collect()
    }

    fn resolve_typed<C: ?Sized + Send + Sync + 'static>(
        &self,
        point: &InjectionPoint,
        search_parent: bool,
    ) -> ContainerResult<Arc<C>> {
        let instance = self
            .resolve_point(point, search_parent)?
            .ok_or_else(|| point.unresolved())?;
        downcast::<C>(&instance).ok_or_else(|| point.unresolved())
    }

    /// Resolve one point: locally first, then up the parent chain if allowed.
    pub(crate) fn resolve_point(
        &self,
        point: &InjectionPoint,
        search_parent: bool,
    ) -> ContainerResult<Option<Instance>> {
        let slot = point.slot();
        let local = self.bindings.read().get(&slot).cloned();
        if let Some(binding) = local {
            return self.produce(&binding, &slot, point).map(Some);
        }
        match self.parent {
            Some(parent) if search_parent => parent.resolve_point(point, true),
            _ => Ok(None),
        }
    }

    fn has_slot(&self, slot: &Slot, search_parent: bool) -> bool {
        if self.bindings.read().contains_key(slot) {
            return true;
        }
        match self.parent {
            Some(parent) if search_parent => parent.has_slot(slot, true),
            _ => false,
        }
    }

    /// Produce a value from a binding owned by `self`; dependencies resolve in
    /// the owner's scope.
    fn produce(
        &self,
        binding: &Binding,
        slot: &Slot,
        point: &InjectionPoint,
    ) -> ContainerResult<Instance> {
        match binding {
            Binding::Instance(value) => Ok(Arc::clone(value)),
            Binding::Fresh { factory } => self.build(factory, slot, point),
            Binding::Type { factory, cached } => {
                if point.is_fresh() {
                    return self.build(factory, slot, point);
                }
                if let Some(value) = cached.read().as_ref() {
                    return Ok(Arc::clone(value));
                }
                let _guard = self.construction.lock();
                // Another resolver may have finished while we waited.
                if let Some(value) = cached.read().as_ref() {
                    return Ok(Arc::clone(value));
                }
                let value = self.build(factory, slot, point)?;
                *cached.write() = Some(Arc::clone(&value));
                trace!(capability = point.capability_name(), "Cached singleton");
                Ok(value)
            }
        }
    }

    fn build(&self, factory: &Factory, slot: &Slot, point: &InjectionPoint) -> ContainerResult<Instance> {
        let _guard = self.construction.lock();
        {
            let mut in_progress = self.in_progress.lock();
            if in_progress.iter().any(|(pending, _)| pending == slot) {
                return Err(ContainerError::CircularDependency {
                    capability: point.capability_name(),
                });
            }
            in_progress.push((slot.clone(), point.capability_name()));
        }
        let _pending = PendingConstruction {
            in_progress: &self.in_progress,
        };
        factory(self)
    }
}

/// Pops the innermost in-progress slot when construction finishes or fails.
struct PendingConstruction<'a> {
    in_progress: &'a Mutex<Vec<(Slot, &'static str)>>,
}

impl Drop for PendingConstruction<'_> {
    fn drop(&mut self) {
        self.in_progress.lock().pop();
    }
}

fn factory_for<C, T>(upcast: fn(Arc<T>) -> Arc<C>) -> Factory
where
    C: ?Sized + Send + Sync + 'static,
    T: Injectable,
{
    Arc::new(move |container: &Container<'_>| {
        let value = container.construct::<T>()?;
        Ok(erase(upcast(Arc::new(value))))
    })
}
