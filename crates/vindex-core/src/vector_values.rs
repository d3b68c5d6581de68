//! Random-access views over index vectors.
//!
//! A [`VectorValues`] presents `size`, `dimension` and `get_vector(ordinal)`
//! no matter where the vectors live:
//!
//! - [`EntityVectorValues`]: vectors embedded in entities of the entity store
//! - [`StoredVectorValues`]: vectors in the index's own [`VectorStore`]
//! - [`ListVectorValues`]: an in-memory list, used for PQ training
//!
//! Two decorators wrap any of them. [`CachingVectorValues`] memoizes lookups
//! for the duration of one traversal. [`NullSafeVectorValues`] substitutes a
//! tiny non-zero placeholder for missing nodes where a vector must exist for
//! every ordinal (disk encoding, PQ encoding).

use crate::index::hnsw::NodeId;
use crate::store::{EntityStore, VectorRef, VectorStore};
use crate::vectorizer::Vectorizer;
use dashmap::DashMap;
use std::sync::Arc;

/// Component value of the null-safety placeholder vector.
pub const PLACEHOLDER_COMPONENT: f32 = 1e-6;

/// Uniform random-access view over vectors keyed by graph ordinal.
pub trait VectorValues: Send + Sync {
    /// Number of vectors currently available.
    fn size(&self) -> usize;

    /// Dimension of every vector.
    fn dimension(&self) -> usize;

    /// Returns the vector of `ordinal`, or `None` if it is missing.
    fn get_vector(&self, ordinal: NodeId) -> Option<VectorRef>;

    /// Returns an independent view over the same storage.
    ///
    /// Decorators start with fresh state; the backing storage is shared.
    fn copy(&self) -> Self
    where
        Self: Sized;
}

/// Vectors embedded in the entities of an entity store.
pub struct EntityVectorValues<E> {
    store: Arc<dyn EntityStore<E>>,
    vectorizer: Arc<dyn Vectorizer<E>>,
    dimension: usize,
}

impl<E> EntityVectorValues<E> {
    /// Creates a view reading vectors through `vectorizer`.
    pub fn new(
        store: Arc<dyn EntityStore<E>>,
        vectorizer: Arc<dyn Vectorizer<E>>,
        dimension: usize,
    ) -> Self {
        Self {
            store,
            vectorizer,
            dimension,
        }
    }
}

impl<E: Send + Sync> VectorValues for EntityVectorValues<E> {
    fn size(&self) -> usize {
        self.store.size()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn get_vector(&self, ordinal: NodeId) -> Option<VectorRef> {
        let entity = self.store.get(u64::from(ordinal))?;
        let vector = self.vectorizer.vectorize(&entity)?;
        (vector.len() == self.dimension).then(|| VectorRef::from(vector))
    }

    fn copy(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            vectorizer: Arc::clone(&self.vectorizer),
            dimension: self.dimension,
        }
    }
}

/// Vectors held in a separate [`VectorStore`].
#[derive(Clone)]
pub struct StoredVectorValues {
    store: Arc<VectorStore>,
    dimension: usize,
}

impl StoredVectorValues {
    /// Creates a view over `store`.
    pub fn new(store: Arc<VectorStore>, dimension: usize) -> Self {
        Self { store, dimension }
    }
}

impl VectorValues for StoredVectorValues {
    fn size(&self) -> usize {
        self.store.len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn get_vector(&self, ordinal: NodeId) -> Option<VectorRef> {
        self.store.get(u64::from(ordinal))
    }

    fn copy(&self) -> Self {
        self.clone()
    }
}

/// In-memory list of vectors; the ordinal is the list position.
#[derive(Clone)]
pub struct ListVectorValues {
    vectors: Arc<[VectorRef]>,
    dimension: usize,
}

impl ListVectorValues {
    /// Creates a view over `vectors`.
    pub fn new(vectors: Vec<VectorRef>, dimension: usize) -> Self {
        Self {
            vectors: vectors.into(),
            dimension,
        }
    }

    /// Iterates the vectors in list order.
    pub fn iter(&self) -> impl Iterator<Item = &VectorRef> {
        self.vectors.iter()
    }
}

impl VectorValues for ListVectorValues {
    fn size(&self) -> usize {
        self.vectors.len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn get_vector(&self, ordinal: NodeId) -> Option<VectorRef> {
        self.vectors.get(ordinal as usize).cloned()
    }

    fn copy(&self) -> Self {
        self.clone()
    }
}

/// Memoizes lookups of the wrapped view, misses included.
///
/// Meant to live for one search or one batch of graph mutations; create a
/// fresh one with [`VectorValues::copy`].
pub struct CachingVectorValues<V> {
    inner: V,
    cache: DashMap<NodeId, Option<VectorRef>>,
}

impl<V: VectorValues> CachingVectorValues<V> {
    /// Wraps `inner` with an empty cache.
    pub fn new(inner: V) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    /// Number of cached ordinals.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

impl<V: VectorValues> VectorValues for CachingVectorValues<V> {
    fn size(&self) -> usize {
        self.inner.size()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn get_vector(&self, ordinal: NodeId) -> Option<VectorRef> {
        if let Some(hit) = self.cache.get(&ordinal) {
            return hit.clone();
        }
        let vector = self.inner.get_vector(ordinal);
        self.cache.insert(ordinal, vector.clone());
        vector
    }

    fn copy(&self) -> Self {
        Self::new(self.inner.copy())
    }
}

/// Never returns `None`: missing vectors become a placeholder whose
/// components are all [`PLACEHOLDER_COMPONENT`].
///
/// A zero vector would turn cosine scores into NaN; the placeholder keeps
/// every score finite. Deleted nodes are excluded from results separately.
pub struct NullSafeVectorValues<V> {
    inner: V,
    placeholder: VectorRef,
}

impl<V: VectorValues> NullSafeVectorValues<V> {
    /// Wraps `inner`.
    pub fn new(inner: V) -> Self {
        let placeholder = VectorRef::from(vec![PLACEHOLDER_COMPONENT; inner.dimension()]);
        Self { inner, placeholder }
    }

    /// The placeholder vector.
    pub fn placeholder(&self) -> &VectorRef {
        &self.placeholder
    }
}

impl<V: VectorValues> VectorValues for NullSafeVectorValues<V> {
    fn size(&self) -> usize {
        self.inner.size()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn get_vector(&self, ordinal: NodeId) -> Option<VectorRef> {
        Some(
            self.inner
                .get_vector(ordinal)
                .unwrap_or_else(|| self.placeholder.clone()),
        )
    }

    fn copy(&self) -> Self {
        Self::new(self.inner.copy())
    }
}

/// Borrowed views forward to the referenced view.
impl<V: VectorValues + ?Sized> VectorValues for &V {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn get_vector(&self, ordinal: NodeId) -> Option<VectorRef> {
        (**self).get_vector(ordinal)
    }

    fn copy(&self) -> Self {
        *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceMetric;
    use crate::store::MemoryEntityStore;
    use crate::vectorizer::FnVectorizer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingValues {
        hits: Arc<AtomicUsize>,
    }

    impl VectorValues for CountingValues {
        fn size(&self) -> usize {
            1
        }
        fn dimension(&self) -> usize {
            2
        }
        fn get_vector(&self, ordinal: NodeId) -> Option<VectorRef> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            (ordinal == 0).then(|| VectorRef::from(vec![1.0, 0.0]))
        }
        fn copy(&self) -> Self {
            Self {
                hits: Arc::clone(&self.hits),
            }
        }
    }

    #[test]
    fn test_entity_values_read_through_vectorizer() {
        let store: Arc<MemoryEntityStore<Vec<f32>>> = Arc::new(MemoryEntityStore::new());
        store.add(vec![1.0, 2.0]);
        store.add(vec![1.0]);
        let values = EntityVectorValues::new(
            store,
            Arc::new(FnVectorizer::embedded(|v: &Vec<f32>| Some(v.clone()))),
            2,
        );
        assert_eq!(values.get_vector(0).as_deref(), Some(&[1.0, 2.0][..]));
        // Wrong dimension reads as missing.
        assert!(values.get_vector(1).is_none());
        assert!(values.get_vector(7).is_none());
    }

    #[test]
    fn test_caching_values_memoize_misses() {
        let hits = Arc::new(AtomicUsize::new(0));
        let cached = CachingVectorValues::new(CountingValues {
            hits: Arc::clone(&hits),
        });
        for _ in 0..3 {
            assert!(cached.get_vector(0).is_some());
            assert!(cached.get_vector(5).is_none());
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(cached.cached(), 2);

        let fresh = cached.copy();
        assert_eq!(fresh.cached(), 0);
    }

    #[test]
    fn test_null_safe_placeholder_keeps_cosine_finite() {
        let values = NullSafeVectorValues::new(ListVectorValues::new(
            vec![VectorRef::from(vec![0.5, 0.5])],
            2,
        ));
        let missing = values.get_vector(3).expect("placeholder");
        assert!(missing.iter().all(|&x| x == PLACEHOLDER_COMPONENT));

        let score = DistanceMetric::Cosine.similarity(&missing, &[0.0, 1.0]);
        assert!(score.is_finite());
    }

    #[test]
    fn test_stored_values_follow_store_updates() {
        let store = Arc::new(VectorStore::new());
        let values = StoredVectorValues::new(Arc::clone(&store), 1);
        assert!(values.get_vector(4).is_none());
        store.upsert(4, VectorRef::from(vec![3.0]));
        assert_eq!(values.get_vector(4).as_deref(), Some(&[3.0][..]));
        assert_eq!(values.size(), 1);
    }
}
