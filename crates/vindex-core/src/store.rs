//! Entity storage seen by the vector indices.
//!
//! The entity store is an external collaborator: a map keyed by a
//! monotonically increasing `u64` id. The indices only need random access,
//! a size, ordered iteration, the basic mutations and the store-wide lock
//! that serializes every graph mutation. [`MemoryEntityStore`] is the
//! in-process implementation used by embedded deployments and tests.
//!
//! [`VectorStore`] is the companion collection of [`VectorEntry`] values used
//! when an index computes vectors instead of reading them from the entity.

use parking_lot::{ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Store-wide lock held by every graph mutation.
///
/// Reentrant, so a registry fan-out that already holds it can call index
/// operations that take it again.
pub type StoreLock = ReentrantMutex<()>;

/// Shared vector handle.
pub type VectorRef = Arc<[f32]>;

/// Contract the vector indices require from the entity store.
pub trait EntityStore<E>: Send + Sync {
    /// Returns the entity stored under `id`.
    fn get(&self, id: u64) -> Option<Arc<E>>;

    /// Number of live entities.
    fn size(&self) -> usize;

    /// Visits every entity in ascending id order.
    fn iterate_indexed(&self, f: &mut dyn FnMut(u64, &Arc<E>));

    /// Adds an entity and returns its newly assigned id.
    fn add(&self, entity: E) -> u64;

    /// Replaces the entity under `id`, returning the previous one.
    fn set(&self, id: u64, entity: E) -> Option<Arc<E>>;

    /// Removes the entity under `id`.
    fn remove_by_id(&self, id: u64) -> Option<Arc<E>>;

    /// Removes every entity. Ids are never reused.
    fn clear(&self);

    /// The store-wide lock.
    fn lock(&self) -> &StoreLock;
}

/// In-memory entity store with monotonically increasing ids starting at 0.
pub struct MemoryEntityStore<E> {
    entities: RwLock<BTreeMap<u64, Arc<E>>>,
    next_id: AtomicU64,
    lock: StoreLock,
}

impl<E> Default for MemoryEntityStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> MemoryEntityStore<E> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(0),
            lock: ReentrantMutex::new(()),
        }
    }

    /// Returns true if the store holds no entity.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }
}

impl<E: Send + Sync> EntityStore<E> for MemoryEntityStore<E> {
    fn get(&self, id: u64) -> Option<Arc<E>> {
        self.entities.read().get(&id).cloned()
    }

    fn size(&self) -> usize {
        self.entities.read().len()
    }

    fn iterate_indexed(&self, f: &mut dyn FnMut(u64, &Arc<E>)) {
        // Snapshot first so the callback may call back into the store.
        let snapshot: Vec<(u64, Arc<E>)> = self
            .entities
            .read()
            .iter()
            .map(|(id, e)| (*id, Arc::clone(e)))
            .collect();
        for (id, entity) in &snapshot {
            f(*id, entity);
        }
    }

    fn add(&self, entity: E) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entities.write().insert(id, Arc::new(entity));
        id
    }

    fn set(&self, id: u64, entity: E) -> Option<Arc<E>> {
        self.next_id.fetch_max(id + 1, Ordering::Relaxed);
        self.entities.write().insert(id, Arc::new(entity))
    }

    fn remove_by_id(&self, id: u64) -> Option<Arc<E>> {
        self.entities.write().remove(&id)
    }

    fn clear(&self) {
        self.entities.write().clear();
    }

    fn lock(&self) -> &StoreLock {
        &self.lock
    }
}

/// A computed vector and the entity it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    /// Id of the source entity.
    pub source_entity_id: u64,
    /// The vector.
    pub vector: Vec<f32>,
}

/// Id-indexed collection of computed vectors.
///
/// Entries are keyed by `source_entity_id + 1`; key 0 is reserved.
/// Entries are replaced wholesale on update.
#[derive(Default)]
pub struct VectorStore {
    entries: RwLock<BTreeMap<u64, VectorRef>>,
}

impl VectorStore {
    /// Creates an empty vector store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from persisted entries.
    #[must_use]
    pub fn from_entries(entries: Vec<VectorEntry>) -> Self {
        let map = entries
            .into_iter()
            .map(|e| (Self::key(e.source_entity_id), VectorRef::from(e.vector)))
            .collect();
        Self {
            entries: RwLock::new(map),
        }
    }

    #[inline]
    fn key(entity_id: u64) -> u64 {
        entity_id + 1
    }

    /// Inserts or replaces the vector of `entity_id`.
    pub fn upsert(&self, entity_id: u64, vector: VectorRef) {
        self.entries.write().insert(Self::key(entity_id), vector);
    }

    /// Returns the vector of `entity_id`.
    #[must_use]
    pub fn get(&self, entity_id: u64) -> Option<VectorRef> {
        self.entries.read().get(&Self::key(entity_id)).cloned()
    }

    /// Removes the vector of `entity_id`.
    pub fn remove(&self, entity_id: u64) -> Option<VectorRef> {
        self.entries.write().remove(&Self::key(entity_id))
    }

    /// Number of stored vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no vector is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Removes every vector.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Visits every `(entity_id, vector)` pair in ascending id order.
    pub fn for_each(&self, mut f: impl FnMut(u64, &VectorRef)) {
        let snapshot: Vec<(u64, VectorRef)> = self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k - 1, Arc::clone(v)))
            .collect();
        for (id, vector) in &snapshot {
            f(*id, vector);
        }
    }

    /// Copies the entries out for persistence.
    #[must_use]
    pub fn entries(&self) -> Vec<VectorEntry> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| VectorEntry {
                source_entity_id: k - 1,
                vector: v.to_vec(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_assigns_monotonic_ids() {
        let store = MemoryEntityStore::new();
        assert_eq!(store.add("a"), 0);
        assert_eq!(store.add("b"), 1);
        store.remove_by_id(1);
        assert_eq!(store.add("c"), 2);
        assert_eq!(store.size(), 2);
    }

    #[test]
    fn test_memory_store_clear_keeps_ids_monotonic() {
        let store = MemoryEntityStore::new();
        store.add(1);
        store.add(2);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.add(3), 2);
    }

    #[test]
    fn test_memory_store_iterates_in_id_order() {
        let store = MemoryEntityStore::new();
        for v in [10, 20, 30] {
            store.add(v);
        }
        let mut seen = Vec::new();
        store.iterate_indexed(&mut |id, e| seen.push((id, **e)));
        assert_eq!(seen, vec![(0, 10), (1, 20), (2, 30)]);
    }

    #[test]
    fn test_store_lock_is_reentrant() {
        let store: MemoryEntityStore<u8> = MemoryEntityStore::new();
        let _outer = store.lock().lock();
        let _inner = store.lock().lock();
    }

    #[test]
    fn test_vector_store_keys_are_offset_by_one() {
        let store = VectorStore::new();
        store.upsert(0, VectorRef::from(vec![1.0, 2.0]));
        assert_eq!(store.get(0).as_deref(), Some(&[1.0, 2.0][..]));

        let entries = store.entries();
        assert_eq!(entries[0].source_entity_id, 0);

        let restored = VectorStore::from_entries(entries);
        assert_eq!(restored.len(), 1);
        assert!(restored.get(0).is_some());
    }

    #[test]
    fn test_vector_store_replaces_wholesale() {
        let store = VectorStore::new();
        store.upsert(5, VectorRef::from(vec![1.0]));
        store.upsert(5, VectorRef::from(vec![2.0]));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(5).as_deref(), Some(&[2.0][..]));
        store.remove(5);
        assert!(store.is_empty());
    }
}
