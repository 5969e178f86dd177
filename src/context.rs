//! Opaque, type-keyed service lookup.
//!
//! Units and access units accept a [`ServiceContext`] so they can resolve
//! host-provided dependencies at execution time without the core crate
//! knowing anything about a dependency-injection container. The container
//! itself (constructing and owning the factories) is host code, out of
//! scope for this crate -- we only specify `get(type) -> instance`.

use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{Result, TaskError};

/// A concurrent, type-keyed map of shared service instances.
///
/// Cloning a [`ServiceContext`] is cheap (`Arc`-backed) and shares the same
/// underlying registrations -- the same pattern the kernel crate's
/// `AdapterRegistry` uses for its `DashMap`-backed state.
#[derive(Clone, Default)]
pub struct ServiceContext {
    services: Arc<DashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ServiceContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service instance, keyed by its concrete type.
    ///
    /// Registering the same type twice replaces the previous instance.
    pub fn insert<T: Send + Sync + 'static>(&self, value: T) {
        self.services.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Look up a previously registered service by type.
    ///
    /// Returns [`TaskError::NoSuchService`] if nothing of that type was
    /// registered.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
            .ok_or(TaskError::NoSuchService {
                type_name: std::any::type_name::<T>(),
            })
    }

    /// Fork a child context that shares all current registrations with its
    /// parent. Used to hand each task execution its own fresh per-task
    /// scope, without requiring a real DI container underneath.
    #[must_use]
    pub fn child_scope(&self) -> Self {
        Self {
            services: Arc::clone(&self.services),
        }
    }
}
