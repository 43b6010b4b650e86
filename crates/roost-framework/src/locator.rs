//! Typed service registry.
//!
//! Services are registered into a mutable [`ServiceRegistry`] during the
//! initialization phase, which is then frozen into an immutable
//! [`ServiceLocator`]. After freezing there is no way to add or replace a
//! service, so lookups need no lock.
//!
//! The key is the `TypeId` of the *capability* type, which is usually a trait
//! object:
//!
//! ```rust,ignore
//! let mut registry = ServiceRegistry::new();
//! registry.register::<dyn AskBackend>(Arc::new(MyBackend::new()))?;
//! registry.register(Arc::new(TokenService::new(ttl)))?;
//! let locator = registry.freeze();
//!
//! let backend: Arc<dyn AskBackend> = locator.get::<dyn AskBackend>()?;
//! ```
//!
//! Internally each value is an `Arc<C>` upcast to `dyn Any`; lookups
//! downcast it back to `Arc<C>`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use roost_core::{CoreError, CoreResult};

use crate::sweep::Sweep;

/// Type alias for the heterogeneous values stored in the registry.
pub type ServiceArc = Arc<dyn Any + Send + Sync>;

struct Entry {
    name: &'static str,
    service: ServiceArc,
}

/// Mutable registry used during startup.
#[derive(Default)]
pub struct ServiceRegistry {
    entries: HashMap<TypeId, Entry>,
    sweepers: Vec<Arc<dyn Sweep>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `instance` as the implementation of capability `C`.
    ///
    /// Fails with [`CoreError::Configuration`] if `C` already has one.
    pub fn register<C>(&mut self, instance: Arc<C>) -> CoreResult<()>
    where
        C: ?Sized + Send + Sync + 'static,
    {
        let name = std::any::type_name::<C>();
        let key = TypeId::of::<C>();
        if self.entries.contains_key(&key) {
            return Err(CoreError::configuration(format!(
                "capability '{name}' is already registered"
            )));
        }
        self.entries.insert(
            key,
            Entry {
                name,
                service: Arc::new(instance),
            },
        );
        debug!(capability = name, "Service registered");
        Ok(())
    }

    /// Adds a periodic maintenance hook.
    pub fn register_sweeper(&mut self, sweeper: Arc<dyn Sweep>) {
        self.sweepers.push(sweeper);
    }

    /// Returns `true` if capability `C` is registered.
    pub fn contains<C: ?Sized + 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<C>())
    }

    /// Looks up a capability before the registry is frozen.
    ///
    /// Lets an init hook build its own services on top of earlier ones.
    pub fn get<C: ?Sized + Send + Sync + 'static>(&self) -> CoreResult<Arc<C>> {
        lookup(&self.entries)
    }

    /// Ends the initialization phase.
    pub fn freeze(self) -> ServiceLocator {
        ServiceLocator {
            inner: Arc::new(Frozen {
                entries: self.entries,
                sweepers: self.sweepers,
            }),
        }
    }
}

struct Frozen {
    entries: HashMap<TypeId, Entry>,
    sweepers: Vec<Arc<dyn Sweep>>,
}

/// Read-only view of the registered services. Cheap to clone.
#[derive(Clone)]
pub struct ServiceLocator {
    inner: Arc<Frozen>,
}

impl ServiceLocator {
    /// Returns the implementation of capability `C`.
    ///
    /// Fails with [`CoreError::NotRegistered`] when absent.
    pub fn get<C: ?Sized + Send + Sync + 'static>(&self) -> CoreResult<Arc<C>> {
        lookup(&self.inner.entries)
    }

    pub fn contains<C: ?Sized + 'static>(&self) -> bool {
        self.inner.entries.contains_key(&TypeId::of::<C>())
    }

    /// Number of registered capabilities.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Type names of the registered capabilities, sorted.
    pub fn capabilities(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.inner.entries.values().map(|e| e.name).collect();
        names.sort_unstable();
        names
    }

    /// Registered maintenance hooks.
    pub fn sweepers(&self) -> &[Arc<dyn Sweep>] {
        &self.inner.sweepers
    }
}

impl std::fmt::Debug for ServiceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceLocator")
            .field("capabilities", &self.capabilities())
            .field("sweepers", &self.inner.sweepers.len())
            .finish()
    }
}

fn lookup<C: ?Sized + Send + Sync + 'static>(
    entries: &HashMap<TypeId, Entry>,
) -> CoreResult<Arc<C>> {
    entries
        .get(&TypeId::of::<C>())
        .and_then(|e| e.service.downcast_ref::<Arc<C>>())
        .map(Arc::clone)
        .ok_or(CoreError::NotRegistered {
            capability: std::any::type_name::<C>(),
        })
}
