//! Named vector indices attached to one entity store.
//!
//! The registry fans every entity mutation out to each index in
//! registration order, under the store lock. A failing index aborts the
//! fan-out and the error is returned.
//!
//! The store-mutating wrappers (`add`, `add_all`, `set`) undo their store
//! change and the work of the indices already reached when a later index
//! rejects the entity. The `internal_*` methods do not; they mirror a
//! store change the caller has already made.

use crate::config::VectorIndexConfig;
use crate::error::{Error, Result};
use crate::index::vector_index::VectorIndex;
use crate::store::EntityStore;
use crate::vectorizer::Vectorizer;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

const MAX_NAME_LEN: usize = 255;
const RESERVED_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Checks that `name` can be used as an on-disk file name prefix.
///
/// # Errors
///
/// Returns [`Error::InvalidIndexName`] for empty names, `.` and `..`,
/// names over 255 bytes, names with surrounding whitespace, and names
/// containing path separators, control characters or characters reserved
/// on common file systems.
pub fn validate_index_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name != "."
        && name != ".."
        && name.trim() == name
        && !name
            .chars()
            .any(|c| c.is_control() || RESERVED_CHARS.contains(&c));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidIndexName(name.to_string()))
    }
}

/// Vector indices of one entity store, keyed by name.
pub struct VectorIndices<E> {
    store: Arc<dyn EntityStore<E>>,
    indices: RwLock<IndexMap<String, VectorIndex<E>>>,
}

impl<E> fmt::Debug for VectorIndices<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorIndices")
            .field("indices", &self.indices.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<E: Send + Sync + 'static> VectorIndices<E> {
    /// Creates an empty registry over `store`.
    pub fn new(store: Arc<dyn EntityStore<E>>) -> Self {
        Self {
            store,
            indices: RwLock::new(IndexMap::new()),
        }
    }

    pub(crate) fn from_indices(
        store: Arc<dyn EntityStore<E>>,
        indices: IndexMap<String, VectorIndex<E>>,
    ) -> Self {
        Self {
            store,
            indices: RwLock::new(indices),
        }
    }

    /// The entity store shared by every index.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EntityStore<E>> {
        &self.store
    }

    /// Creates an index named `name` and builds it over the current
    /// entities.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexAlreadyExists`] if the name is taken,
    /// [`Error::InvalidIndexName`] or [`Error::Config`] for bad input, and
    /// build errors.
    pub fn add_index(
        &self,
        name: &str,
        config: VectorIndexConfig,
        vectorizer: Arc<dyn Vectorizer<E>>,
    ) -> Result<VectorIndex<E>> {
        validate_index_name(name)?;
        let _store = self.store.lock().lock();
        if self.indices.read().contains_key(name) {
            return Err(Error::IndexAlreadyExists(name.to_string()));
        }

        let index = VectorIndex::new(name, config, Arc::clone(&self.store), vectorizer)?;
        self.indices.write().insert(name.to_string(), index.clone());
        tracing::info!(index = %name, "Vector index registered");
        Ok(index)
    }

    /// Gets an index by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<VectorIndex<E>> {
        self.indices.read().get(name).cloned()
    }

    /// Unregisters and closes an index. Its files stay on disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexNotFound`] if no index has this name.
    pub fn remove_index(&self, name: &str) -> Result<()> {
        let index = self
            .indices
            .write()
            .shift_remove(name)
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))?;
        index.close();
        tracing::info!(index = %name, "Vector index removed");
        Ok(())
    }

    /// Index names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.indices.read().keys().cloned().collect()
    }

    /// Number of registered indices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.read().len()
    }

    /// Returns true if no index is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.read().is_empty()
    }

    fn snapshot(&self) -> Vec<VectorIndex<E>> {
        self.indices.read().values().cloned().collect()
    }

    /// Adds an entity to the store and to every index.
    ///
    /// # Errors
    ///
    /// Returns the first index error; the entity is not kept in that case.
    pub fn add(&self, entity: E) -> Result<u64> {
        let _store = self.store.lock().lock();
        let id = self.store.add(entity);
        let Some(stored) = self.store.get(id) else {
            return Ok(id);
        };

        let indices = self.snapshot();
        for (reached, index) in indices.iter().enumerate() {
            if let Err(e) = index.internal_add(id, &stored) {
                for applied in &indices[..reached] {
                    log_undo_failure(applied, applied.internal_remove(id));
                }
                self.store.remove_by_id(id);
                return Err(e);
            }
        }
        Ok(id)
    }

    /// Adds entities to the store and to every index, one lock acquisition
    /// per index.
    ///
    /// # Errors
    ///
    /// Returns the first index error; none of the entities is kept in that
    /// case.
    pub fn add_all(&self, entities: Vec<E>) -> Result<Vec<u64>> {
        let _store = self.store.lock().lock();
        let added: Vec<(u64, Arc<E>)> = entities
            .into_iter()
            .filter_map(|entity| {
                let id = self.store.add(entity);
                self.store.get(id).map(|stored| (id, stored))
            })
            .collect();

        let indices = self.snapshot();
        for (reached, index) in indices.iter().enumerate() {
            if let Err(e) = index.internal_add_all(&added) {
                for applied in &indices[..reached] {
                    for (id, _) in &added {
                        log_undo_failure(applied, applied.internal_remove(*id));
                    }
                }
                for (id, _) in &added {
                    self.store.remove_by_id(*id);
                }
                return Err(e);
            }
        }
        Ok(added.into_iter().map(|(id, _)| id).collect())
    }

    /// Replaces an entity and re-indexes it everywhere.
    ///
    /// # Errors
    ///
    /// Returns the first index error; the previous entity is restored in
    /// that case.
    pub fn set(&self, id: u64, entity: E) -> Result<Option<Arc<E>>>
    where
        E: Clone,
    {
        let _store = self.store.lock().lock();
        let previous = self.store.set(id, entity);
        let Some(stored) = self.store.get(id) else {
            return Ok(previous);
        };

        let indices = self.snapshot();
        for (reached, index) in indices.iter().enumerate() {
            if let Err(e) = index.internal_update(id, &stored) {
                self.restore(id, previous.as_deref(), &indices[..reached]);
                return Err(e);
            }
        }
        Ok(previous)
    }

    fn restore(&self, id: u64, previous: Option<&E>, applied: &[VectorIndex<E>])
    where
        E: Clone,
    {
        match previous {
            Some(old) => {
                self.store.set(id, old.clone());
                for index in applied {
                    log_undo_failure(index, index.internal_update(id, old));
                }
            }
            None => {
                self.store.remove_by_id(id);
                for index in applied {
                    log_undo_failure(index, index.internal_remove(id));
                }
            }
        }
    }

    /// Removes an entity from the store and from every index.
    ///
    /// # Errors
    ///
    /// Returns the first index error.
    pub fn remove_by_id(&self, id: u64) -> Result<Option<Arc<E>>> {
        let _store = self.store.lock().lock();
        let removed = self.store.remove_by_id(id);
        if removed.is_some() {
            self.internal_remove(id)?;
        }
        Ok(removed)
    }

    /// Clears the store and every index.
    ///
    /// # Errors
    ///
    /// Returns the first index error.
    pub fn remove_all(&self) -> Result<()> {
        let _store = self.store.lock().lock();
        self.store.clear();
        self.internal_remove_all()
    }

    /// Fans an entity addition out to every index.
    ///
    /// # Errors
    ///
    /// Returns the first index error; later indices are not reached.
    pub fn internal_add(&self, id: u64, entity: &E) -> Result<()> {
        let _store = self.store.lock().lock();
        self.snapshot()
            .iter()
            .try_for_each(|index| index.internal_add(id, entity))
    }

    /// Fans a batch addition out to every index.
    ///
    /// # Errors
    ///
    /// Returns the first index error; later indices are not reached.
    pub fn internal_add_all(&self, entities: &[(u64, Arc<E>)]) -> Result<()> {
        let _store = self.store.lock().lock();
        self.snapshot()
            .iter()
            .try_for_each(|index| index.internal_add_all(entities))
    }

    /// Fans an entity update out to every index.
    ///
    /// # Errors
    ///
    /// Returns the first index error; later indices are not reached.
    pub fn internal_update(&self, id: u64, entity: &E) -> Result<()> {
        let _store = self.store.lock().lock();
        self.snapshot()
            .iter()
            .try_for_each(|index| index.internal_update(id, entity))
    }

    /// Fans an entity removal out to every index.
    ///
    /// # Errors
    ///
    /// Returns the first index error; later indices are not reached.
    pub fn internal_remove(&self, id: u64) -> Result<()> {
        let _store = self.store.lock().lock();
        self.snapshot()
            .iter()
            .try_for_each(|index| index.internal_remove(id))
    }

    /// Fans a full clear out to every index.
    ///
    /// # Errors
    ///
    /// Returns the first index error; later indices are not reached.
    pub fn internal_remove_all(&self) -> Result<()> {
        let _store = self.store.lock().lock();
        self.snapshot()
            .iter()
            .try_for_each(VectorIndex::internal_remove_all)
    }

    /// Closes every index. Do not call while holding the store lock.
    pub fn close(&self) {
        for index in self.snapshot() {
            index.close();
        }
    }
}

fn log_undo_failure<E: Send + Sync + 'static>(index: &VectorIndex<E>, result: Result<()>) {
    if let Err(e) = result {
        tracing::warn!(index = %index.name(), error = %e, "Failed to undo a partial fan-out");
    }
}

#[cfg(test)]
#[allow(clippy::cast_precision_loss)]
mod tests {
    use super::*;
    use crate::store::MemoryEntityStore;
    use crate::vectorizer::FnVectorizer;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        title: String,
        short: Vec<f32>,
        long: Vec<f32>,
    }

    fn item(title: &str, short: &[f32], long: &[f32]) -> Item {
        Item {
            title: title.to_string(),
            short: short.to_vec(),
            long: long.to_vec(),
        }
    }

    fn registry() -> VectorIndices<Item> {
        let store: Arc<MemoryEntityStore<Item>> = Arc::new(MemoryEntityStore::new());
        let indices = VectorIndices::new(store);
        indices
            .add_index(
                "short",
                VectorIndexConfig::builder(2).build().unwrap(),
                Arc::new(FnVectorizer::embedded(|i: &Item| Some(i.short.clone()))),
            )
            .unwrap();
        indices
            .add_index(
                "long",
                VectorIndexConfig::builder(3).build().unwrap(),
                Arc::new(FnVectorizer::computed(|i: &Item| {
                    (!i.long.is_empty()).then(|| i.long.clone())
                })),
            )
            .unwrap();
        indices
    }

    #[test]
    fn test_validate_index_name() {
        for ok in ["docs", "embeddings-v2", "a.b", "名前"] {
            assert!(validate_index_name(ok).is_ok(), "{ok}");
        }
        let long = "x".repeat(256);
        for bad in ["", ".", "..", "a/b", "a\\b", "a\0b", " pad", "tab\t", "a:b", long.as_str()] {
            assert!(
                matches!(validate_index_name(bad), Err(Error::InvalidIndexName(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn test_registration_order_and_uniqueness() {
        let indices = registry();
        assert_eq!(indices.names(), vec!["short", "long"]);
        assert_eq!(indices.len(), 2);

        let dup = indices.add_index(
            "short",
            VectorIndexConfig::builder(2).build().unwrap(),
            Arc::new(FnVectorizer::embedded(|i: &Item| Some(i.short.clone()))),
        );
        assert!(matches!(dup, Err(Error::IndexAlreadyExists(_))));

        indices.remove_index("short").unwrap();
        assert_eq!(indices.names(), vec!["long"]);
        assert!(matches!(
            indices.remove_index("short"),
            Err(Error::IndexNotFound(_))
        ));
    }

    #[test]
    fn test_fan_out_reaches_every_index() {
        let indices = registry();
        let a = indices.add(item("a", &[1.0, 0.0], &[1.0, 0.0, 0.0])).unwrap();
        let b = indices.add(item("b", &[0.0, 1.0], &[0.0, 0.0, 1.0])).unwrap();

        let short = indices.get("short").unwrap();
        let long = indices.get("long").unwrap();
        assert_eq!(short.search(&[1.0, 0.0], 1).unwrap()[0].entity_id(), a);
        assert_eq!(long.search(&[0.0, 0.0, 1.0], 1).unwrap()[0].entity_id(), b);

        indices.remove_by_id(a).unwrap();
        assert_eq!(short.stats().live_count, 1);
        assert_eq!(long.stats().live_count, 1);
        assert!(long.vector_store().unwrap().get(a).is_none());
    }

    #[test]
    fn test_failed_add_leaves_no_trace() {
        let indices = registry();
        let err = indices.add(item("broken", &[1.0, 0.0], &[]));
        assert!(matches!(err, Err(Error::NullVector { .. })));

        assert_eq!(indices.store().size(), 0);
        let short = indices.get("short").unwrap();
        assert_eq!(short.stats().live_count, 0);
    }

    #[test]
    fn test_failed_set_restores_previous_entity() {
        let indices = registry();
        let id = indices.add(item("a", &[1.0, 0.0], &[1.0, 0.0, 0.0])).unwrap();

        let err = indices.set(id, item("a2", &[0.0, 1.0], &[1.0]));
        assert!(matches!(err, Err(Error::DimensionMismatch { .. })));

        let stored = indices.store().get(id).unwrap();
        assert_eq!(stored.title, "a");
        let short = indices.get("short").unwrap();
        assert_eq!(short.search(&[1.0, 0.0], 1).unwrap()[0].entity_id(), id);
    }

    #[test]
    fn test_add_all_and_remove_all() {
        let indices = registry();
        let ids = indices
            .add_all(
                (0..10)
                    .map(|i| item(&i.to_string(), &[i as f32, 1.0], &[1.0, i as f32, 0.0]))
                    .collect(),
            )
            .unwrap();
        assert_eq!(ids.len(), 10);
        assert_eq!(indices.get("long").unwrap().stats().live_count, 10);

        indices.remove_all().unwrap();
        indices.remove_all().unwrap();
        for name in indices.names() {
            let index = indices.get(&name).unwrap();
            assert_eq!(index.stats().node_count, 0);
            assert!(index.search(&vec![1.0; index.config().dimension], 3).unwrap().is_empty());
        }
    }

    #[test]
    fn test_close_closes_all() {
        let indices = registry();
        indices.close();
        let short = indices.get("short").unwrap();
        assert!(short.search(&[1.0, 0.0], 1).is_err());
    }
}
