//! # KS-01 Container - Hierarchical Dependency Resolution
//!
//! A root container lives for the whole process; the HTTP pipeline creates a
//! child per request and drops it when the request completes.
//!
//! ## Binding kinds
//!
//! | Registration | Produces |
//! |--------------|----------|
//! | `register_type::<C, T>` | `T` built on first resolve, cached in the registering container |
//! | `register_self::<T>` | same, with `T` as its own capability |
//! | `register_fresh::<C, T>` | new `T` per resolve |
//! | `register_instance` / `register_shared` | fixed value |
//!
//! ## Resolution rules
//!
//! - Local bindings win; ancestors are searched when allowed.
//! - At most one binding per (capability, name) slot per container;
//!   a child may shadow a parent's slot.
//! - Concurrent first resolutions of a singleton construct exactly once.
//! - A missing required injection point is `UnresolvedDependency`, never a panic.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

mod binding;
pub mod container;
pub mod error;
pub mod injection;

pub use container::Container;
pub use error::{ContainerError, ContainerResult};
pub use injection::{Dependencies, Injectable, InjectionPoint, Instance};

/// The process-wide root container type.
pub type RootContainer = Container<'static>;
