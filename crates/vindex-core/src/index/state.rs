//! Persistent state of indices, kept apart from their runtime handles.
//!
//! An external serializer stores [`VectorIndexState`] / [`VectorIndicesState`]
//! and, after loading them, calls `activate` to rebuild the graphs, the disk
//! readers and the background workers. Vectorizers are code, not data, and
//! are supplied again at activation.

use crate::config::VectorIndexConfig;
use crate::error::{Error, Result};
use crate::index::registry::VectorIndices;
use crate::index::vector_index::VectorIndex;
use crate::store::{EntityStore, VectorEntry, VectorStore};
use crate::vectorizer::Vectorizer;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Persistent fields of one [`VectorIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndexState {
    /// Index name.
    pub name: String,
    /// Index configuration.
    pub config: VectorIndexConfig,
    /// Computed vectors; `None` for embedded vectorizers.
    pub vectors: Option<Vec<VectorEntry>>,
}

/// Persistent fields of a [`VectorIndices`] registry, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorIndicesState {
    /// One entry per index.
    pub indices: Vec<VectorIndexState>,
}

impl VectorIndicesState {
    /// Encodes the state with bincode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decodes state written by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] on malformed input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl<E: Send + Sync + 'static> VectorIndex<E> {
    /// Snapshot of the persistent fields, taken under the store lock.
    #[must_use]
    pub fn persistent_state(&self) -> VectorIndexState {
        let _store = self.store().lock().lock();
        VectorIndexState {
            name: self.name().to_string(),
            config: self.config().clone(),
            vectors: self.vector_store().map(|vs| vs.entries()),
        }
    }

    /// Rebuilds a runnable index from persisted state.
    ///
    /// # Errors
    ///
    /// Same as [`VectorIndex::new`].
    pub fn activate(
        state: VectorIndexState,
        store: Arc<dyn EntityStore<E>>,
        vectorizer: Arc<dyn Vectorizer<E>>,
    ) -> Result<Self> {
        let index = Self::create(
            state.name,
            state.config,
            store,
            vectorizer,
            state.vectors.map(VectorStore::from_entries),
        )?;
        index.ensure_index_initialized()?;
        Ok(index)
    }
}

impl<E: Send + Sync + 'static> VectorIndices<E> {
    /// Snapshot of every index, in registration order.
    #[must_use]
    pub fn persistent_state(&self) -> VectorIndicesState {
        let _store = self.store().lock().lock();
        let indices = self
            .names()
            .iter()
            .filter_map(|name| self.get(name))
            .map(|index| index.persistent_state())
            .collect();
        VectorIndicesState { indices }
    }

    /// Rebuilds a registry from persisted state.
    ///
    /// The whole index table is restored before any index initializes.
    /// `vectorizers` maps an index name to its vectorizer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no vectorizer is supplied for an index,
    /// [`Error::IndexAlreadyExists`] for duplicate names, and index build
    /// errors.
    pub fn activate(
        state: VectorIndicesState,
        store: Arc<dyn EntityStore<E>>,
        vectorizers: impl Fn(&str) -> Option<Arc<dyn Vectorizer<E>>>,
    ) -> Result<Self> {
        let mut table = IndexMap::with_capacity(state.indices.len());
        for index_state in state.indices {
            let name = index_state.name.clone();
            if table.contains_key(&name) {
                return Err(Error::IndexAlreadyExists(name));
            }
            let vectorizer = vectorizers(&name)
                .ok_or_else(|| Error::Config(format!("no vectorizer for index '{name}'")))?;
            let index = VectorIndex::create(
                index_state.name,
                index_state.config,
                Arc::clone(&store),
                vectorizer,
                index_state.vectors.map(VectorStore::from_entries),
            )?;
            table.insert(name, index);
        }

        let registry = Self::from_indices(store, table);
        for name in registry.names() {
            if let Some(index) = registry.get(&name) {
                index.ensure_index_initialized()?;
            }
        }
        tracing::info!(indices = registry.len(), "Vector indices activated");
        Ok(registry)
    }
}
