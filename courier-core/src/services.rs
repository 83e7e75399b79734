//! Typed service scope used to construct handlers.
//!
//! Handler factories registered with
//! [`HandlerCatalog::handler_factory`](crate::HandlerCatalog::handler_factory)
//! receive the active `Services` on every dispatch and pull their
//! dependencies out of it. The dispatcher owns a root scope; callers can pass
//! a narrower one per request with
//! [`Dispatcher::send_scoped`](crate::Dispatcher::send_scoped).
//!
//! ```rust
//! use courier_core::Services;
//!
//! struct UserStore {
//!     users: Vec<String>,
//! }
//!
//! let mut services = Services::new();
//! services.insert(UserStore { users: vec!["alice".into()] });
//!
//! let store = services.get::<UserStore>().unwrap();
//! assert_eq!(store.users.len(), 1);
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Type-keyed service container.
///
/// Cloning is cheap: values are shared behind `Arc`.
#[derive(Clone, Default)]
pub struct Services {
    map: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Services {
    /// Create a new empty scope.
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Insert a typed value, replacing any existing value of that type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.insert_arc(Arc::new(value));
    }

    /// Insert an Arc-wrapped value directly.
    pub fn insert_arc<T: Send + Sync + 'static>(&mut self, value: Arc<T>) {
        self.map
            .insert(TypeId::of::<T>(), value as Arc<dyn Any + Send + Sync>);
    }

    /// Builder-style insert.
    pub fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    /// Get a reference to a typed value.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|arc| arc.downcast_ref::<T>())
    }

    /// Get a shared handle to a typed value.
    pub fn get_arc<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|arc| arc.clone().downcast::<T>().ok())
    }

    /// Check if a value of this type exists.
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.map.contains_key(&TypeId::of::<T>())
    }

    /// Remove a typed value.
    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<Arc<T>> {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|arc| arc.downcast::<T>().ok())
    }

    /// Derive a child scope: everything in `self`, overridden by `overrides`.
    pub fn scoped(&self, overrides: Services) -> Services {
        let mut scope = self.clone();
        scope.map.extend(overrides.map);
        scope
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if the scope is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("len", &self.map.len())
            .finish()
    }
}
