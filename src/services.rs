//! Lifetime-scoped capability resolution.
//!
//! Stages and handlers never construct their collaborators. They ask the
//! dispatch's [`Scope`] for a capability type, and the [`Registry`] decides
//! how an instance is produced:
//!
//! | Lifetime | Instances |
//! |---|---|
//! | [`Lifetime::PerProcess`] | one, built on first resolution, shared by every dispatch |
//! | [`Lifetime::PerDispatch`] | one per dispatch, shared by every stage in it |
//! | [`Lifetime::PerResolution`] | a fresh one on every `resolve` call |
//!
//! Capabilities are keyed by type, usually a trait object:
//!
//! ```rust
//! use std::sync::Arc;
//! use relay::{Lifetime, Registry};
//!
//! trait Clock: Send + Sync { fn now(&self) -> u64; }
//! struct Fixed;
//! impl Clock for Fixed { fn now(&self) -> u64 { 7 } }
//!
//! let mut registry = Registry::new();
//! registry.register::<dyn Clock>(Lifetime::PerProcess, |_| Ok(Arc::new(Fixed)));
//!
//! let scope = Arc::new(registry).scope();
//! assert_eq!(scope.resolve::<dyn Clock>().unwrap().now(), 7);
//! ```

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::Error;

type Instance = Box<dyn Any + Send + Sync>;
type Factory = Box<dyn Fn(&Scope) -> Result<Instance, Error> + Send + Sync>;

/// How long a resolved instance lives.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Lifetime {
    PerProcess,
    PerDispatch,
    PerResolution,
}

struct Registration {
    capability: &'static str,
    lifetime: Lifetime,
    factory: Factory,
    shared: OnceCell<Instance>,
}

/// The registration table: capability type → construction policy.
///
/// Filled once at startup and handed to
/// [`PipelineBuilder::services`](crate::PipelineBuilder::services). After
/// that it is only read; the lazily-built PerProcess instances sit behind
/// a [`OnceCell`] each.
#[derive(Default)]
pub struct Registry {
    entries: HashMap<TypeId, Registration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` as the way to build capability `T`.
    ///
    /// A later registration for the same `T` replaces the earlier one.
    /// Factories receive the resolving scope, so they can pull in their own
    /// dependencies.
    pub fn register<T>(
        &mut self,
        lifetime: Lifetime,
        factory: impl Fn(&Scope) -> Result<Arc<T>, Error> + Send + Sync + 'static,
    ) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let capability = type_name::<T>();
        let factory: Factory = Box::new(move |scope: &Scope| Ok(Box::new(factory(scope)?) as Instance));
        let replaced = self.entries.insert(
            TypeId::of::<T>(),
            Registration { capability, lifetime, factory, shared: OnceCell::new() },
        );
        debug!(capability, ?lifetime, replaced = replaced.is_some(), "capability registered");
        self
    }

    /// Registers an already-built PerProcess instance.
    pub fn instance<T>(&mut self, value: Arc<T>) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register::<T>(Lifetime::PerProcess, move |_| Ok(Arc::clone(&value)))
    }

    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Opens a resolution scope. The pipeline opens one per dispatch.
    pub fn scope(self: &Arc<Self>) -> Scope {
        Scope(Arc::new(ScopeInner {
            registry: Arc::clone(self),
            dispatch: Mutex::new(HashMap::new()),
        }))
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.values().map(|r| (r.capability, r.lifetime)))
            .finish()
    }
}

struct ScopeInner {
    registry: Arc<Registry>,
    dispatch: Mutex<HashMap<TypeId, Instance>>,
}

/// A resolution scope: the registry plus the PerDispatch instance cache.
///
/// Cheap to clone; clones share the same cache.
#[derive(Clone)]
pub struct Scope(Arc<ScopeInner>);

impl Scope {
    /// A scope over an empty registry. Every resolution fails.
    pub(crate) fn detached() -> Self {
        Arc::new(Registry::new()).scope()
    }

    /// Resolves capability `T` according to its registered lifetime.
    pub fn resolve<T>(&self) -> Result<Arc<T>, Error>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let id = TypeId::of::<T>();
        let unregistered = || Error::UnregisteredCapability { capability: type_name::<T>() };
        let registration = self.0.registry.entries.get(&id).ok_or_else(unregistered)?;

        let resolved = match registration.lifetime {
            Lifetime::PerProcess => {
                let shared = registration.shared.get_or_try_init(|| (registration.factory)(self))?;
                downcast::<T>(shared)
            }
            Lifetime::PerDispatch => {
                if let Some(cached) = self.0.dispatch.lock().get(&id) {
                    return downcast::<T>(cached).ok_or_else(unregistered);
                }
                // Build outside the lock: the factory may resolve through this scope.
                let built = (registration.factory)(self)?;
                let mut cache = self.0.dispatch.lock();
                downcast::<T>(cache.entry(id).or_insert(built))
            }
            Lifetime::PerResolution => downcast::<T>(&(registration.factory)(self)?),
        };
        resolved.ok_or_else(unregistered)
    }

    /// Drops every PerDispatch instance. Called when a dispatch ends.
    pub(crate) fn close(&self) {
        let dropped = std::mem::take(&mut *self.0.dispatch.lock());
        if !dropped.is_empty() {
            debug!(instances = dropped.len(), "dispatch scope closed");
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("registrations", &self.0.registry.len())
            .field("dispatch_instances", &self.0.dispatch.lock().len())
            .finish()
    }
}

fn downcast<T: ?Sized + Send + Sync + 'static>(instance: &Instance) -> Option<Arc<T>> {
    instance.downcast_ref::<Arc<T>>().map(Arc::clone)
}
