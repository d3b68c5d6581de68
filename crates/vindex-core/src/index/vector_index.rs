//! The vector index: one HNSW graph over the entities of an entity store.
//!
//! # Locking
//!
//! Lock order is store lock → persistence lock → runtime lock.
//!
//! - Every graph mutation (add, update, remove, optimize, persist, full
//!   clear) runs under the entity store's reentrant lock.
//! - The persistence lock lets searches run concurrently (read side) while
//!   a persist excludes them (write side).
//! - The runtime lock guards the graph, the PQ state and the disk reader.
//!
//! `close`, `optimize` and `persist_to_disk` wait on the background worker,
//! which itself takes the store lock. Do not call them while holding it.

use crate::config::VectorIndexConfig;
use crate::error::{Error, Result};
use crate::index::background::{
    BackgroundConfig, BackgroundTaskManager, GraphMutationSink, IndexingOp, Optimizable,
    Persistable, QueuedOp,
};
use crate::index::disk::{DiskGraph, DiskIndexManager, DiskVectorValues};
use crate::index::hnsw::{search, CleanupStats, ExactScorer, HnswGraph, NodeId, MAX_ORDINAL};
use crate::index::pq::{EncodedVectors, PqCodes, PqCompressionManager, VectorSampleSource};
use crate::index::registry::validate_index_name;
use crate::store::{EntityStore, VectorRef, VectorStore};
use crate::vector_values::{
    CachingVectorValues, EntityVectorValues, ListVectorValues, StoredVectorValues, VectorValues,
};
use crate::vectorizer::Vectorizer;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Lifecycle state of a [`VectorIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    /// Constructed or restored; no graph yet.
    Uninitialized,
    /// Loading from disk or building in memory.
    Initializing,
    /// Serving searches and mutations.
    Ready,
    /// Shutting down the background worker.
    Closing,
    /// Resources released.
    Closed,
}

/// Point-in-time statistics of one index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    /// Index name.
    pub name: String,
    /// Lifecycle state.
    pub state: IndexState,
    /// Graph nodes, tombstones included.
    pub node_count: usize,
    /// Live graph nodes.
    pub live_count: usize,
    /// Deleted nodes awaiting optimization.
    pub tombstone_count: usize,
    /// Queued graph mutations not yet applied.
    pub pending_indexing: usize,
    /// Completed optimizations, direct and background.
    pub optimize_count: u64,
    /// Completed persists, direct and background.
    pub persist_count: u64,
    /// Searches are served by the memory-mapped disk graph.
    pub disk_loaded: bool,
    /// A PQ codebook is trained.
    pub pq_trained: bool,
}

/// One search hit. The entity is resolved lazily from the store.
pub struct SearchResult<E> {
    entity_id: u64,
    score: f32,
    store: Arc<dyn EntityStore<E>>,
}

impl<E> SearchResult<E> {
    /// Id of the matching entity.
    #[must_use]
    pub fn entity_id(&self) -> u64 {
        self.entity_id
    }

    /// Similarity score, higher is closer.
    #[must_use]
    pub fn score(&self) -> f32 {
        self.score
    }

    /// Loads the entity; `None` if it was removed since the search.
    #[must_use]
    pub fn entity(&self) -> Option<Arc<E>> {
        self.store.get(self.entity_id)
    }
}

impl<E> Clone for SearchResult<E> {
    fn clone(&self) -> Self {
        Self {
            entity_id: self.entity_id,
            score: self.score,
            store: Arc::clone(&self.store),
        }
    }
}

impl<E> fmt::Debug for SearchResult<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchResult")
            .field("entity_id", &self.entity_id)
            .field("score", &self.score)
            .finish_non_exhaustive()
    }
}

/// Checks that `entity_id` fits in a graph ordinal.
pub(crate) fn to_ordinal(entity_id: u64) -> Result<NodeId> {
    if entity_id > MAX_ORDINAL {
        return Err(Error::OrdinalOverflow(entity_id));
    }
    NodeId::try_from(entity_id).map_err(|_| Error::OrdinalOverflow(entity_id))
}

/// Where the index reads exact vectors from.
enum IndexVectors<E> {
    Embedded(EntityVectorValues<E>),
    Stored(StoredVectorValues),
}

impl<E: Send + Sync> VectorValues for IndexVectors<E> {
    fn size(&self) -> usize {
        match self {
            Self::Embedded(v) => v.size(),
            Self::Stored(v) => v.size(),
        }
    }

    fn dimension(&self) -> usize {
        match self {
            Self::Embedded(v) => v.dimension(),
            Self::Stored(v) => v.dimension(),
        }
    }

    fn get_vector(&self, ordinal: NodeId) -> Option<VectorRef> {
        match self {
            Self::Embedded(v) => v.get_vector(ordinal),
            Self::Stored(v) => v.get_vector(ordinal),
        }
    }

    fn copy(&self) -> Self {
        match self {
            Self::Embedded(v) => Self::Embedded(v.copy()),
            Self::Stored(v) => Self::Stored(v.copy()),
        }
    }
}

/// Transient state rebuilt by initialization.
struct Runtime {
    graph: HnswGraph,
    pq: Option<PqCompressionManager>,
    codes: EncodedVectors,
    disk: Option<DiskIndexManager>,
    /// The loaded disk graph serves searches until the first mutation.
    serve_from_disk: bool,
}

impl Runtime {
    fn empty(config: &VectorIndexConfig) -> Self {
        Self {
            graph: HnswGraph::new(config.hnsw, config.metric),
            pq: None,
            codes: EncodedVectors::default(),
            disk: None,
            serve_from_disk: false,
        }
    }

    fn disk_graph(&self) -> Option<Arc<DiskGraph>> {
        if !self.serve_from_disk {
            return None;
        }
        self.disk.as_ref()?.graph().cloned()
    }

    fn trained_pq(&self) -> Option<&PqCompressionManager> {
        self.pq.as_ref().filter(|pq| pq.is_trained())
    }

    fn retire_disk_reader(&mut self, name: &str) {
        if !self.serve_from_disk {
            return;
        }
        self.serve_from_disk = false;
        if let Some(disk) = self.disk.as_mut() {
            disk.close();
        }
        tracing::debug!(index = %name, "Searches moved to the in-memory graph");
    }

    fn encode_all(&mut self, values: &dyn VectorValues) {
        if let Some(pq) = self.pq.as_ref().and_then(PqCompressionManager::quantizer) {
            self.codes = EncodedVectors::encode_all(pq, values, &self.graph.ordinals());
        }
    }
}

struct IndexCore<E> {
    name: String,
    config: VectorIndexConfig,
    store: Arc<dyn EntityStore<E>>,
    vectorizer: Arc<dyn Vectorizer<E>>,
    vector_store: Option<Arc<VectorStore>>,
    vectors: IndexVectors<E>,
    state: Mutex<IndexState>,
    runtime: RwLock<Runtime>,
    persist_lock: RwLock<()>,
    background: RwLock<Option<Arc<BackgroundTaskManager>>>,
    /// Bumped by a full clear; queued operations of older generations are dropped.
    generation: AtomicU64,
    optimize_count: AtomicU64,
    persist_count: AtomicU64,
}

/// A named vector index over one entity store.
///
/// Cheap to clone; clones share the same index.
pub struct VectorIndex<E> {
    core: Arc<IndexCore<E>>,
}

impl<E> Clone for VectorIndex<E> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<E> fmt::Debug for VectorIndex<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorIndex")
            .field("name", &self.core.name)
            .field("state", &*self.core.state.lock())
            .finish_non_exhaustive()
    }
}

impl<E: Send + Sync + 'static> VectorIndex<E> {
    /// Creates an index and builds it over the entities already in `store`.
    ///
    /// # Errors
    ///
    /// Fails on an invalid name or configuration, on an entity whose vector
    /// is missing or has the wrong dimension, or on an entity id beyond the
    /// ordinal ceiling.
    pub fn new(
        name: impl Into<String>,
        config: VectorIndexConfig,
        store: Arc<dyn EntityStore<E>>,
        vectorizer: Arc<dyn Vectorizer<E>>,
    ) -> Result<Self> {
        let index = Self::create(name.into(), config, store, vectorizer, None)?;
        index.ensure_index_initialized()?;
        Ok(index)
    }

    /// Creates an uninitialized index. `vectors` restores a persisted
    /// vector store for computed vectorizers.
    pub(crate) fn create(
        name: String,
        config: VectorIndexConfig,
        store: Arc<dyn EntityStore<E>>,
        vectorizer: Arc<dyn Vectorizer<E>>,
        vectors: Option<VectorStore>,
    ) -> Result<Self> {
        validate_index_name(&name)?;
        config.validate()?;

        let dimension = config.dimension;
        let (vector_store, vector_values) = if vectorizer.is_embedded() {
            let values = EntityVectorValues::new(
                Arc::clone(&store),
                Arc::clone(&vectorizer),
                dimension,
            );
            (None, IndexVectors::Embedded(values))
        } else {
            let vector_store = Arc::new(vectors.unwrap_or_default());
            let values = StoredVectorValues::new(Arc::clone(&vector_store), dimension);
            (Some(vector_store), IndexVectors::Stored(values))
        };

        let runtime = Runtime::empty(&config);
        Ok(Self {
            core: Arc::new(IndexCore {
                name,
                config,
                store,
                vectorizer,
                vector_store,
                vectors: vector_values,
                state: Mutex::new(IndexState::Uninitialized),
                runtime: RwLock::new(runtime),
                persist_lock: RwLock::new(()),
                background: RwLock::new(None),
                generation: AtomicU64::new(0),
                optimize_count: AtomicU64::new(0),
                persist_count: AtomicU64::new(0),
            }),
        })
    }

    /// Index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Index configuration.
    #[must_use]
    pub fn config(&self) -> &VectorIndexConfig {
        &self.core.config
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> IndexState {
        *self.core.state.lock()
    }

    /// The entity store this index covers.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EntityStore<E>> {
        &self.core.store
    }

    /// The separate vector store, for computed vectorizers.
    #[must_use]
    pub fn vector_store(&self) -> Option<&Arc<VectorStore>> {
        self.core.vector_store.as_ref()
    }

    /// Builds the transient graph state if it is not built yet.
    ///
    /// Loads the on-disk graph when its metadata matches, otherwise builds
    /// the graph in memory, then starts the background worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexClosed`] after `close`, and build errors.
    pub fn ensure_index_initialized(&self) -> Result<()> {
        self.core.ensure_ready()
    }

    /// Returns the `k` entities most similar to `query`, best first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] for a query of the wrong length.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult<E>>> {
        let core = &self.core;
        core.check_dimension(query.len())?;
        core.ensure_ready()?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let metric = core.config.metric;
        let ef = core.config.search_quality.ef_search(k);
        let hits = {
            let _reading = core.persist_lock.read();
            let rt = core.runtime.read();
            match rt.disk_graph() {
                Some(disk) => {
                    let exact = DiskVectorValues::new(Arc::clone(&disk));
                    match rt.trained_pq() {
                        Some(pq) => pq.search_with_rerank(query, k, ef, &*disk, &exact),
                        None => search(
                            &*disk,
                            &ExactScorer::new(query, metric, &exact),
                            k,
                            ef,
                        ),
                    }
                }
                None => {
                    let values = CachingVectorValues::new(&core.vectors);
                    search(&rt.graph, &ExactScorer::new(query, metric, &values), k, ef)
                }
            }
        };
        Ok(core.to_results(hits))
    }

    /// Like [`search`](Self::search) but scores candidates through PQ codes
    /// only, without exact reranking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Quantization`] if PQ is disabled or not trained yet,
    /// and [`Error::DimensionMismatch`] for a query of the wrong length.
    pub fn search_approximate(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult<E>>> {
        let core = &self.core;
        core.check_dimension(query.len())?;
        core.ensure_ready()?;

        let ef = core.config.search_quality.ef_search(k);
        let hits = {
            let _reading = core.persist_lock.read();
            let rt = core.runtime.read();
            let pq = rt
                .pq
                .as_ref()
                .ok_or_else(|| Error::Quantization("PQ compression is not enabled".into()))?;
            match rt.disk_graph().filter(|d| d.has_pq_codes()) {
                Some(disk) => pq.search_approximate(query, k, ef, &*disk, &*disk)?,
                None => pq.search_approximate(query, k, ef, &rt.graph, &rt.codes)?,
            }
        };
        Ok(core.to_results(hits))
    }

    /// Indexes a newly added entity.
    ///
    /// # Errors
    ///
    /// Fails without touching the index if the entity has no vector, a
    /// vector of the wrong dimension, or an id beyond the ordinal ceiling.
    pub fn internal_add(&self, entity_id: u64, entity: &E) -> Result<()> {
        let core = &self.core;
        let ordinal = to_ordinal(entity_id)?;
        let vector = core.vectorize(entity_id, entity)?;

        let _store = core.store.lock().lock();
        core.ensure_ready()?;
        if let Some(vs) = &core.vector_store {
            vs.upsert(entity_id, Arc::clone(&vector));
        }
        core.submit(vec![IndexingOp::Add { ordinal, vector }]);
        Ok(())
    }

    /// Indexes a batch of new entities under one lock acquisition.
    ///
    /// Vectorization runs in parallel before the lock is taken.
    ///
    /// # Errors
    ///
    /// Fails without touching the index if any entity is rejected.
    pub fn internal_add_all(&self, entities: &[(u64, Arc<E>)]) -> Result<()> {
        let core = &self.core;
        let prepared = entities
            .par_iter()
            .map(|(id, entity)| {
                let ordinal = to_ordinal(*id)?;
                Ok((*id, ordinal, core.vectorize(*id, entity)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let _store = core.store.lock().lock();
        core.ensure_ready()?;
        if let Some(vs) = &core.vector_store {
            for (id, _, vector) in &prepared {
                vs.upsert(*id, Arc::clone(vector));
            }
        }
        let ops = prepared
            .into_iter()
            .map(|(_, ordinal, vector)| IndexingOp::Add { ordinal, vector })
            .collect();
        core.submit(ops);
        Ok(())
    }

    /// Re-indexes an updated entity: its node is removed and inserted again
    /// under the same ordinal.
    ///
    /// # Errors
    ///
    /// Same as [`internal_add`](Self::internal_add).
    pub fn internal_update(&self, entity_id: u64, entity: &E) -> Result<()> {
        let core = &self.core;
        let ordinal = to_ordinal(entity_id)?;
        let vector = core.vectorize(entity_id, entity)?;

        let _store = core.store.lock().lock();
        core.ensure_ready()?;
        if let Some(vs) = &core.vector_store {
            vs.upsert(entity_id, Arc::clone(&vector));
        }
        core.submit(vec![IndexingOp::Update { ordinal, vector }]);
        Ok(())
    }

    /// Tombstones the node of a removed entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OrdinalOverflow`] for an id beyond the ceiling.
    pub fn internal_remove(&self, entity_id: u64) -> Result<()> {
        let core = &self.core;
        let ordinal = to_ordinal(entity_id)?;

        let _store = core.store.lock().lock();
        core.ensure_ready()?;
        if let Some(vs) = &core.vector_store {
            vs.remove(entity_id);
        }
        core.submit(vec![IndexingOp::Remove { ordinal }]);
        Ok(())
    }

    /// Drops every vector and rebuilds the index in place.
    ///
    /// The background worker is stopped without a final optimize or persist
    /// and its queue is discarded. The index is usable again afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexClosed`] after `close`, and rebuild errors.
    pub fn internal_remove_all(&self) -> Result<()> {
        let core = &self.core;
        let _store = core.store.lock().lock();
        {
            let mut state = core.state.lock();
            if matches!(*state, IndexState::Closing | IndexState::Closed) {
                return Err(Error::IndexClosed(core.name.clone()));
            }
            *state = IndexState::Uninitialized;
        }

        core.generation.fetch_add(1, Ordering::AcqRel);
        let background = core.background.write().take();
        if let Some(background) = background {
            background.shutdown_now();
        }
        if let Some(vs) = &core.vector_store {
            vs.clear();
        }
        *core.runtime.write() = Runtime::empty(&core.config);

        tracing::info!(index = %core.name, "Vector index cleared, rebuilding");
        core.ensure_ready()
    }

    /// Removes tombstones and trims neighbor lists grown during construction.
    ///
    /// Pending queued mutations are applied first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexClosed`] after `close`, or a worker error.
    pub fn optimize(&self) -> Result<CleanupStats> {
        let core = &self.core;
        core.ensure_ready()?;
        core.drain_background()?;
        let _store = core.store.lock().lock();
        Ok(core.optimize_locked())
    }

    /// Optimizes, then writes the graph and metadata files.
    ///
    /// No-op for in-memory indices. Searches wait while the files are
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the files cannot be written.
    pub fn persist_to_disk(&self) -> Result<()> {
        let core = &self.core;
        if !core.config.on_disk {
            return Ok(());
        }
        core.ensure_ready()?;
        core.drain_background()?;
        let _store = core.store.lock().lock();
        core.persist_locked()
    }

    /// Blocks until queued graph mutations are applied, for at most
    /// [`DRAIN_TIMEOUT`](crate::index::background::DRAIN_TIMEOUT).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Worker`] if the worker exits mid-drain or times out,
    /// which happens when the caller holds the store lock.
    pub fn drain_queue(&self) -> Result<()> {
        self.core.drain_background()
    }

    /// Queued graph mutations not yet applied.
    #[must_use]
    pub fn pending_indexing_count(&self) -> usize {
        self.core
            .background
            .read()
            .as_ref()
            .map_or(0, |bg| bg.pending_count())
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        let core = &self.core;
        let rt = core.runtime.read();
        IndexStats {
            name: core.name.clone(),
            state: *core.state.lock(),
            node_count: rt.graph.node_count(),
            live_count: rt.graph.live_count(),
            tombstone_count: rt.graph.tombstone_count(),
            pending_indexing: self.pending_indexing_count(),
            optimize_count: core.optimize_count.load(Ordering::Relaxed),
            persist_count: core.persist_count.load(Ordering::Relaxed),
            disk_loaded: rt.disk_graph().is_some(),
            pq_trained: rt.trained_pq().is_some(),
        }
    }

    /// Stops the worker, draining the queue and running the configured
    /// shutdown optimize and persist, then releases the graph and the disk
    /// reader. Idempotent.
    pub fn close(&self) {
        let core = &self.core;
        {
            let mut state = core.state.lock();
            if matches!(*state, IndexState::Closing | IndexState::Closed) {
                return;
            }
            *state = IndexState::Closing;
        }

        let background = core.background.write().take();
        if let Some(background) = background {
            background.shutdown(
                true,
                core.config.optimize_on_shutdown,
                core.config.persist_on_shutdown,
            );
        }

        *core.runtime.write() = Runtime::empty(&core.config);
        *core.state.lock() = IndexState::Closed;
        tracing::info!(index = %core.name, "Vector index closed");
    }
}

impl<E: Send + Sync + 'static> IndexCore<E> {
    fn check_dimension(&self, actual: usize) -> Result<()> {
        if actual == self.config.dimension {
            Ok(())
        } else {
            Err(Error::DimensionMismatch {
                expected: self.config.dimension,
                actual,
            })
        }
    }

    fn vectorize(&self, entity_id: u64, entity: &E) -> Result<VectorRef> {
        let vector = self
            .vectorizer
            .vectorize(entity)
            .ok_or(Error::NullVector { entity_id })?;
        self.check_dimension(vector.len())?;
        Ok(VectorRef::from(vector))
    }

    fn to_results(&self, hits: Vec<(NodeId, f32)>) -> Vec<SearchResult<E>> {
        hits.into_iter()
            .map(|(ordinal, score)| SearchResult {
                entity_id: u64::from(ordinal),
                score,
                store: Arc::clone(&self.store),
            })
            .collect()
    }

    fn ensure_ready(self: &Arc<Self>) -> Result<()> {
        if *self.state.lock() == IndexState::Ready {
            return Ok(());
        }
        // Initialization holds the store lock; waiting on it also waits
        // for an initialization running on another thread.
        let _store = self.store.lock().lock();
        {
            let mut state = self.state.lock();
            match *state {
                IndexState::Ready | IndexState::Initializing => return Ok(()),
                IndexState::Closing | IndexState::Closed => {
                    return Err(Error::IndexClosed(self.name.clone()));
                }
                IndexState::Uninitialized => *state = IndexState::Initializing,
            }
        }

        let result = self.build_runtime().and_then(|runtime| {
            *self.runtime.write() = runtime;
            self.start_background()
        });
        match result {
            Ok(()) => {
                *self.state.lock() = IndexState::Ready;
                let rt = self.runtime.read();
                tracing::info!(
                    index = %self.name,
                    nodes = rt.graph.node_count(),
                    from_disk = rt.serve_from_disk,
                    pq_trained = rt.trained_pq().is_some(),
                    "Vector index ready"
                );
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = IndexState::Uninitialized;
                Err(e)
            }
        }
    }

    /// Vectorizes entities missing from the separate vector store.
    fn backfill_vector_store(&self) -> Result<()> {
        let Some(vs) = &self.vector_store else {
            return Ok(());
        };
        let mut result = Ok(());
        let mut added = 0usize;
        self.store.iterate_indexed(&mut |id, entity| {
            if result.is_err() || vs.get(id).is_some() {
                return;
            }
            match self.vectorize(id, entity) {
                Ok(vector) => {
                    vs.upsert(id, vector);
                    added += 1;
                }
                Err(e) => result = Err(e),
            }
        });
        if added > 0 {
            tracing::debug!(index = %self.name, added, "Backfilled vector store");
        }
        result
    }

    /// Every indexed `(entity_id, vector)` in ascending id order.
    fn indexed_vectors(&self) -> Result<Vec<(u64, VectorRef)>> {
        let mut out = Vec::new();
        match &self.vector_store {
            Some(vs) => {
                out.reserve(vs.len());
                vs.for_each(|id, v| out.push((id, Arc::clone(v))));
            }
            None => {
                let mut result = Ok(());
                self.store.iterate_indexed(&mut |id, entity| {
                    if result.is_ok() {
                        match self.vectorize(id, entity) {
                            Ok(v) => out.push((id, v)),
                            Err(e) => result = Err(e),
                        }
                    }
                });
                result?;
            }
        }
        Ok(out)
    }

    fn build_runtime(&self) -> Result<Runtime> {
        self.backfill_vector_store()?;
        let vectors = self.indexed_vectors()?;
        let config = &self.config;

        let mut runtime = Runtime::empty(config);
        runtime.pq = config.pq_enabled.then(|| {
            PqCompressionManager::new(config.dimension, config.pq_subspace_count(), config.metric)
        });
        runtime.disk = match (&config.index_directory, config.on_disk) {
            (Some(dir), true) => Some(DiskIndexManager::new(
                self.name.clone(),
                dir.clone(),
                config.dimension,
                config.parallel_disk_write,
            )),
            _ => None,
        };

        if !self.load_from_disk(&mut runtime, vectors.len()) {
            let values = CachingVectorValues::new(&self.vectors);
            for (id, vector) in &vectors {
                runtime.graph.insert(to_ordinal(*id)?, vector, &values);
            }
        }

        if let Some(pq) = runtime.pq.as_mut() {
            if !pq.is_trained() && pq.train_if_needed(self)? {
                runtime.encode_all(&self.vectors);
            }
        }
        Ok(runtime)
    }

    /// Hydrates `runtime` from a matching disk graph. Any failure is logged
    /// and leaves `runtime` untouched apart from a closed disk reader.
    fn load_from_disk(&self, runtime: &mut Runtime, expected_count: usize) -> bool {
        let Some(disk) = runtime.disk.as_mut() else {
            return false;
        };
        if !disk.try_load(expected_count) {
            return false;
        }
        let Some(graph) = disk.graph().cloned() else {
            return false;
        };

        let hydrated = graph.to_graph(self.config.hnsw).and_then(|hnsw| {
            let mut codes = EncodedVectors::default();
            if let (Some(pq), Some(quantizer)) = (runtime.pq.as_mut(), graph.quantizer()) {
                pq.mark_trained(quantizer.clone())?;
                for node in hnsw.ordinals() {
                    if let Some(code) = graph.pq_code(node) {
                        codes.insert(node, code.into_owned());
                    }
                }
            }
            Ok((hnsw, codes))
        });

        match hydrated {
            Ok((hnsw, codes)) => {
                runtime.graph = hnsw;
                runtime.codes = codes;
                runtime.serve_from_disk = true;
                true
            }
            Err(e) => {
                tracing::warn!(index = %self.name, error = %e, "Failed to hydrate disk graph, rebuilding in memory");
                if let Some(pq) = runtime.pq.as_mut() {
                    pq.reset();
                }
                if let Some(disk) = runtime.disk.as_mut() {
                    disk.close();
                }
                false
            }
        }
    }

    fn start_background(self: &Arc<Self>) -> Result<()> {
        let config = BackgroundConfig::from_index_config(&self.config);
        if !config.is_needed() {
            return Ok(());
        }
        let weak = Arc::downgrade(self);
        let sink: Weak<dyn GraphMutationSink> = weak.clone();
        let optimizer: Weak<dyn Optimizable> = weak.clone();
        let persister: Weak<dyn Persistable> = weak;
        let manager = BackgroundTaskManager::start(&self.name, config, sink, optimizer, persister)?;
        *self.background.write() = Some(Arc::new(manager));
        Ok(())
    }

    fn drain_background(&self) -> Result<()> {
        let background = self.background.read().clone();
        match background {
            Some(bg) => bg.drain_queue(),
            None => Ok(()),
        }
    }

    /// Applies `ops` now, or queues them under eventual indexing.
    /// The caller holds the store lock.
    fn submit(&self, ops: Vec<IndexingOp>) {
        let count = ops.len() as u64;
        let background = self.background.read().clone();
        match background.as_ref().filter(|_| self.config.eventual_indexing) {
            Some(bg) => {
                let generation = self.generation.load(Ordering::Acquire);
                for op in ops {
                    bg.enqueue(QueuedOp { op, generation });
                }
            }
            None => {
                let mut rt = self.runtime.write();
                for op in ops {
                    self.apply_op(&mut rt, op);
                }
            }
        }
        if let Some(bg) = background {
            bg.mark_changed(count);
        }
    }

    fn apply_op(&self, rt: &mut Runtime, op: IndexingOp) {
        rt.retire_disk_reader(&self.name);
        match op {
            IndexingOp::Add { ordinal, vector } | IndexingOp::Update { ordinal, vector } => {
                let values = CachingVectorValues::new(&self.vectors);
                rt.graph.insert(ordinal, &vector, &values);
                if let Some(pq) = rt.pq.as_ref().and_then(PqCompressionManager::quantizer) {
                    let code = pq.encode(&vector);
                    rt.codes.insert(ordinal, code);
                }
            }
            IndexingOp::Remove { ordinal } => {
                rt.graph.mark_deleted(ordinal);
                rt.codes.remove(ordinal);
            }
        }
    }

    /// Graph cleanup. The caller holds the store lock.
    fn optimize_locked(&self) -> CleanupStats {
        let mut rt = self.runtime.write();
        rt.retire_disk_reader(&self.name);
        let values = CachingVectorValues::new(&self.vectors);
        let stats = rt.graph.cleanup(&values);
        self.optimize_count.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            index = %self.name,
            removed = stats.removed,
            repaired = stats.repaired,
            "Vector index optimized"
        );
        stats
    }

    /// Optimize, train PQ if possible, write files. The caller holds the
    /// store lock.
    fn persist_locked(&self) -> Result<()> {
        let _exclusive = self.persist_lock.write();
        self.optimize_locked();

        let mut guard = self.runtime.write();
        let rt = &mut *guard;
        if let Some(pq) = rt.pq.as_mut() {
            if pq.train_if_needed(self)? {
                rt.encode_all(&self.vectors);
            }
        }
        let Some(disk) = rt.disk.as_mut() else {
            return Ok(());
        };
        let written = disk.write_index(&rt.graph, &self.vectors, rt.pq.as_ref())?;
        rt.serve_from_disk = false;

        self.persist_count.fetch_add(1, Ordering::Relaxed);
        tracing::info!(index = %self.name, vectors = written, "Vector index persisted");
        Ok(())
    }
}

impl<E: Send + Sync + 'static> VectorSampleSource for IndexCore<E> {
    fn sample_vectors(&self) -> ListVectorValues {
        let vectors = self.indexed_vectors().unwrap_or_else(|e| {
            tracing::warn!(index = %self.name, error = %e, "Cannot collect PQ training vectors");
            Vec::new()
        });
        ListVectorValues::new(
            vectors.into_iter().map(|(_, v)| v).collect(),
            self.config.dimension,
        )
    }
}

impl<E: Send + Sync + 'static> GraphMutationSink for IndexCore<E> {
    fn apply_batch(&self, batch: Vec<QueuedOp>) -> Result<()> {
        let _store = self.store.lock().lock();
        let generation = self.generation.load(Ordering::Acquire);
        let mut rt = self.runtime.write();
        let mut stale = 0usize;
        for queued in batch {
            if queued.generation == generation {
                self.apply_op(&mut rt, queued.op);
            } else {
                stale += 1;
            }
        }
        if stale > 0 {
            tracing::debug!(index = %self.name, stale, "Dropped operations queued before a full clear");
        }
        Ok(())
    }
}

impl<E: Send + Sync + 'static> Optimizable for IndexCore<E> {
    fn optimize_in_background(&self) -> Result<()> {
        let _store = self.store.lock().lock();
        self.optimize_locked();
        Ok(())
    }
}

impl<E: Send + Sync + 'static> Persistable for IndexCore<E> {
    fn persist_in_background(&self) -> Result<()> {
        let _store = self.store.lock().lock();
        self.persist_locked()
    }
}
