//! End-to-end behaviour of vector indices: identity of ids, dimension
//! checks, disk round trips, eventual indexing, tombstones, PQ search and
//! full clears.

#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use vindex_core::{
    EntityStore, Error, FnVectorizer, IndexState, MemoryEntityStore, VectorIndex,
    VectorIndexConfig, VectorIndices, Vectorizer, MAX_ORDINAL,
};

const DIM: usize = 16;

type Doc = Vec<f32>;

fn random_vectors(n: usize, seed: u64) -> Vec<Doc> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..DIM).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

fn embedded() -> Arc<dyn Vectorizer<Doc>> {
    Arc::new(FnVectorizer::embedded(|d: &Doc| Some(d.clone())))
}

fn computed() -> Arc<dyn Vectorizer<Doc>> {
    Arc::new(FnVectorizer::computed(|d: &Doc| Some(d.clone())))
}

fn on_disk(dir: &Path) -> VectorIndexConfig {
    VectorIndexConfig::builder(DIM)
        .on_disk(dir)
        .build()
        .expect("valid config")
}

/// Fills a store with `docs` and builds an index over it.
fn populated(
    config: VectorIndexConfig,
    docs: &[Doc],
) -> (Arc<MemoryEntityStore<Doc>>, VectorIndex<Doc>) {
    let store = Arc::new(MemoryEntityStore::new());
    for doc in docs {
        store.add(doc.clone());
    }
    let index = VectorIndex::new("docs", config, store.clone(), embedded()).expect("index");
    (store, index)
}

#[test]
fn test_self_search_returns_the_entity_id() {
    let store: Arc<MemoryEntityStore<Doc>> = Arc::new(MemoryEntityStore::new());
    let config = VectorIndexConfig::builder(DIM).build().unwrap();
    let index = VectorIndex::new("ids", config, store, computed()).unwrap();

    let ids = [0, 5, 1_000, 77_777, 1 << 20, MAX_ORDINAL];
    let docs = random_vectors(ids.len(), 1);
    for (id, doc) in ids.iter().zip(&docs) {
        index.internal_add(*id, doc).unwrap();
    }

    for (id, doc) in ids.iter().zip(&docs) {
        let hit = &index.search(doc, 1).unwrap()[0];
        assert_eq!(hit.entity_id(), *id);
        assert!((hit.score() - 1.0).abs() < 1e-4, "self score {}", hit.score());
    }
}

#[test]
fn test_wrong_query_dimension_is_rejected() {
    let (_store, index) = populated(
        VectorIndexConfig::builder(DIM).build().unwrap(),
        &random_vectors(20, 2),
    );
    let before = index.stats();

    for len in [0, DIM - 1, DIM + 1] {
        let err = index.search(&vec![0.5; len], 3).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch { expected: DIM, actual } if actual == len
        ));
    }
    assert_eq!(index.stats(), before);
}

#[test]
fn test_disk_round_trip_reproduces_results() {
    let dir = TempDir::new().unwrap();
    let docs = random_vectors(200, 3);
    let (store, index) = populated(on_disk(dir.path()), &docs);

    index.persist_to_disk().unwrap();
    assert!(dir.path().join("docs.graph").exists());
    assert!(dir.path().join("docs.meta").exists());

    let before: Vec<_> = docs
        .iter()
        .map(|q| index.search(q, 5).unwrap())
        .collect();
    index.close();

    let reopened = VectorIndex::new("docs", on_disk(dir.path()), store, embedded()).unwrap();
    assert!(reopened.stats().disk_loaded);

    for (query, expected) in docs.iter().zip(&before) {
        let actual = reopened.search(query, 5).unwrap();
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert_eq!(a.entity_id(), e.entity_id());
            assert!((a.score() - e.score()).abs() < 1e-5);
        }
    }
}

#[test]
fn test_metadata_count_mismatch_forces_rebuild() {
    let dir = TempDir::new().unwrap();
    let docs = random_vectors(50, 4);
    let (store, index) = populated(on_disk(dir.path()), &docs);
    index.persist_to_disk().unwrap();
    index.close();

    // Layout: i32 version, i32 dimension, i64 count (little-endian).
    let meta_path = dir.path().join("docs.meta");
    let mut meta = fs::read(&meta_path).unwrap();
    let count = i64::from_le_bytes(meta[8..16].try_into().unwrap());
    assert_eq!(count, 50);
    meta[8..16].copy_from_slice(&(count + 1).to_le_bytes());
    fs::write(&meta_path, meta).unwrap();

    let reopened = VectorIndex::new("docs", on_disk(dir.path()), store, embedded()).unwrap();
    let stats = reopened.stats();
    assert!(!stats.disk_loaded);
    assert_eq!(stats.live_count, 50);
    assert_eq!(reopened.search(&docs[7], 1).unwrap()[0].entity_id(), 7);
}

#[test]
fn test_eventual_indexing_converges_after_drain() {
    let store: Arc<MemoryEntityStore<Doc>> = Arc::new(MemoryEntityStore::new());
    let indices = VectorIndices::new(store);
    let config = VectorIndexConfig::builder(DIM)
        .eventual_indexing(true)
        .build()
        .unwrap();
    let index = indices.add_index("docs", config, embedded()).unwrap();

    let docs = random_vectors(150, 5);
    let ids = indices.add_all(docs.clone()).unwrap();

    index.drain_queue().unwrap();
    assert_eq!(index.pending_indexing_count(), 0);
    for (id, doc) in ids.iter().zip(&docs) {
        assert_eq!(index.search(doc, 1).unwrap()[0].entity_id(), *id);
    }
    indices.close();
}

#[test]
fn test_optimize_implies_drain() {
    let store: Arc<MemoryEntityStore<Doc>> = Arc::new(MemoryEntityStore::new());
    let indices = VectorIndices::new(store);
    let config = VectorIndexConfig::builder(DIM)
        .eventual_indexing(true)
        .build()
        .unwrap();
    let index = indices.add_index("docs", config, embedded()).unwrap();

    for doc in random_vectors(40, 6) {
        indices.add(doc).unwrap();
    }
    index.optimize().unwrap();
    assert_eq!(index.pending_indexing_count(), 0);
    assert_eq!(index.stats().live_count, 40);
    indices.close();
}

#[test]
fn test_removed_entity_never_returned() {
    let docs = random_vectors(100, 7);
    let (store, index) = populated(VectorIndexConfig::builder(DIM).build().unwrap(), &docs);

    for victim in [0_u64, 13, 42, 99] {
        store.remove_by_id(victim);
        index.internal_remove(victim).unwrap();
        let results = index.search(&docs[victim as usize], 10).unwrap();
        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| r.entity_id() != victim));
    }
    assert_eq!(index.stats().tombstone_count, 4);
}

#[test]
fn test_pq_rerank_returns_sorted_exact_scores() {
    let dir = TempDir::new().unwrap();
    let config = VectorIndexConfig::builder(DIM)
        .on_disk(dir.path())
        .pq_compression(Some(4))
        .build()
        .unwrap();
    let docs = random_vectors(300, 8);
    let (store, index) = populated(config.clone(), &docs);
    assert!(index.stats().pq_trained);

    index.persist_to_disk().unwrap();
    index.close();

    let reopened = VectorIndex::new("docs", config, store, embedded()).unwrap();
    let stats = reopened.stats();
    assert!(stats.disk_loaded);
    assert!(stats.pq_trained);

    let results = reopened.search(&docs[10], 5).unwrap();
    assert_eq!(results.len(), 5);
    assert!(results.windows(2).all(|w| w[0].score() >= w[1].score()));
    assert_eq!(results[0].entity_id(), 10);

    let approximate = reopened.search_approximate(&docs[10], 5).unwrap();
    assert_eq!(approximate.len(), 5);
}

#[test]
fn test_pq_disk_round_trip_reproduces_results() {
    let dir = TempDir::new().unwrap();
    let config = VectorIndexConfig::builder(DIM)
        .on_disk(dir.path())
        .pq_compression(Some(4))
        .build()
        .unwrap();
    let docs = random_vectors(600, 11);
    let (store, index) = populated(config.clone(), &docs);
    index.persist_to_disk().unwrap();

    let queries = random_vectors(60, 12);
    let before: Vec<_> = queries
        .iter()
        .map(|q| index.search(q, 10).unwrap())
        .collect();
    index.close();

    let reopened = VectorIndex::new("docs", config, store, embedded()).unwrap();
    let stats = reopened.stats();
    assert!(stats.disk_loaded);
    assert!(stats.pq_trained);

    for (query, expected) in queries.iter().zip(&before) {
        let actual = reopened.search(query, 10).unwrap();
        let actual_ids: Vec<u64> = actual.iter().map(|r| r.entity_id()).collect();
        let expected_ids: Vec<u64> = expected.iter().map(|r| r.entity_id()).collect();
        assert_eq!(actual_ids, expected_ids);
        for (a, e) in actual.iter().zip(expected) {
            assert!((a.score() - e.score()).abs() < 1e-5);
        }
    }
}

#[test]
fn test_full_clear_discards_queued_operations() {
    let store: Arc<MemoryEntityStore<Doc>> = Arc::new(MemoryEntityStore::new());
    let config = VectorIndexConfig::builder(DIM)
        .eventual_indexing(true)
        .build()
        .unwrap();
    let index = VectorIndex::new("docs", config, store.clone(), embedded()).unwrap();

    let docs = random_vectors(2_000, 13);
    for doc in &docs {
        let id = store.add(doc.clone());
        index.internal_add(id, doc).unwrap();
    }

    store.clear();
    index.internal_remove_all().unwrap();

    let id = store.add(docs[0].clone());
    index.internal_add(id, &docs[0]).unwrap();
    index.drain_queue().unwrap();

    let stats = index.stats();
    assert_eq!(stats.live_count, 1);
    assert_eq!(stats.node_count, 1);
    assert_eq!(stats.pending_indexing, 0);
    assert_eq!(index.search(&docs[0], 5).unwrap()[0].entity_id(), id);
    index.close();
}

#[test]
fn test_full_clear_leaves_usable_empty_index() {
    let docs = random_vectors(30, 9);
    let (store, index) = populated(VectorIndexConfig::builder(DIM).build().unwrap(), &docs);

    store.clear();
    index.internal_remove_all().unwrap();
    assert!(index.search(&docs[0], 5).unwrap().is_empty());
    index.internal_remove_all().unwrap();
    assert!(index.search(&docs[0], 5).unwrap().is_empty());
    assert_eq!(index.state(), IndexState::Ready);

    let id = store.add(docs[3].clone());
    index.internal_add(id, &docs[3]).unwrap();
    assert_eq!(index.search(&docs[3], 5).unwrap()[0].entity_id(), id);
}

#[test]
fn test_background_persistence_writes_files_on_close() {
    let dir = TempDir::new().unwrap();
    let config = VectorIndexConfig::builder(DIM)
        .on_disk(dir.path())
        .background_persistence(std::time::Duration::from_secs(3600), 1)
        .build()
        .unwrap();
    let store: Arc<MemoryEntityStore<Doc>> = Arc::new(MemoryEntityStore::new());
    let indices = VectorIndices::new(store);
    indices.add_index("docs", config, embedded()).unwrap();
    indices.add_all(random_vectors(25, 10)).unwrap();

    indices.close();
    assert!(dir.path().join("docs.graph").exists());
    assert!(dir.path().join("docs.meta").exists());
}
