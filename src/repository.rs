//! In-memory entity store, the usual process-lifetime capability.
//!
//! Register one [`MemoryRepository`] per entity type with
//! [`Lifetime::PerProcess`](crate::Lifetime::PerProcess). Concurrent
//! dispatches share it, so the list and the id counter live behind one
//! lock: every `add` gets the next id exactly once.

use parking_lot::Mutex;

use crate::error::Fault;
use crate::handler::BoxFuture;

/// A stored record with a numeric id.
pub trait Entity: Clone + Send + Sync + 'static {
    fn id(&self) -> u64;
    fn set_id(&mut self, id: u64);
}

/// Existence check used by [`EnsureExists`](crate::middleware::validate::EnsureExists).
///
/// Async because real lookups cross I/O; that is where a dispatch suspends.
pub trait Lookup: Send + Sync + 'static {
    fn exists(&self, id: u64) -> BoxFuture<'_, Result<bool, Fault>>;
}

/// CRUD over entities of type `E`.
pub trait Repository<E: Entity>: Send + Sync {
    fn exists(&self, id: u64) -> bool;
    fn get(&self, id: u64) -> Option<E>;
    fn all(&self) -> Vec<E>;
    /// Stores `entity` under the next sequential id and returns the stored copy.
    fn add(&self, entity: E) -> E;
    /// Replaces the entity with the same id. `false` if there is none.
    fn update(&self, entity: E) -> bool;
    fn delete(&self, id: u64) -> bool;
}

struct Store<E> {
    rows: Vec<E>,
    last_id: u64,
}

/// A list-backed [`Repository`]. Linear scans; ids start at 1.
pub struct MemoryRepository<E> {
    store: Mutex<Store<E>>,
}

impl<E: Entity> MemoryRepository<E> {
    pub fn new() -> Self {
        Self { store: Mutex::new(Store { rows: Vec::new(), last_id: 0 }) }
    }

    /// Pre-populates the store. Seeded ids are kept; new ids continue after the highest.
    pub fn seeded(rows: impl IntoIterator<Item = E>) -> Self {
        let rows: Vec<E> = rows.into_iter().collect();
        let last_id = rows.iter().map(Entity::id).max().unwrap_or(0);
        Self { store: Mutex::new(Store { rows, last_id }) }
    }

    pub fn len(&self) -> usize {
        self.store.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Entity> Default for MemoryRepository<E> {
    fn default() -> Self { Self::new() }
}

impl<E: Entity> Repository<E> for MemoryRepository<E> {
    fn exists(&self, id: u64) -> bool {
        self.store.lock().rows.iter().any(|e| e.id() == id)
    }

    fn get(&self, id: u64) -> Option<E> {
        self.store.lock().rows.iter().find(|e| e.id() == id).cloned()
    }

    fn all(&self) -> Vec<E> {
        self.store.lock().rows.clone()
    }

    fn add(&self, mut entity: E) -> E {
        let mut store = self.store.lock();
        store.last_id += 1;
        entity.set_id(store.last_id);
        store.rows.push(entity.clone());
        entity
    }

    fn update(&self, entity: E) -> bool {
        let mut store = self.store.lock();
        match store.rows.iter_mut().find(|e| e.id() == entity.id()) {
            Some(slot) => {
                *slot = entity;
                true
            }
            None => false,
        }
    }

    fn delete(&self, id: u64) -> bool {
        let mut store = self.store.lock();
        let before = store.rows.len();
        store.rows.retain(|e| e.id() != id);
        store.rows.len() != before
    }
}

impl<E: Entity> Lookup for MemoryRepository<E> {
    fn exists(&self, id: u64) -> BoxFuture<'_, Result<bool, Fault>> {
        let found = Repository::exists(self, id);
        Box::pin(async move { Ok(found) })
    }
}
