//! Benchmarks for index construction and search.
//!
//! Measures:
//! - In-memory graph build through the registry
//! - Exact-scored search at several `k`
//! - Approximate PQ-scored search

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use vindex_core::{
    FnVectorizer, MemoryEntityStore, VectorIndex, VectorIndexConfig, VectorIndices, Vectorizer,
};

const DIM: usize = 64;

/// Deterministic LCG vectors in [-1, 1).
fn generate_vectors(n: usize) -> Vec<Vec<f32>> {
    let mut seed = 42u64;
    (0..n)
        .map(|_| {
            (0..DIM)
                .map(|_| {
                    seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                    #[allow(clippy::cast_precision_loss)]
                    let unit = (seed >> 40) as f32 / (1u64 << 24) as f32;
                    unit * 2.0 - 1.0
                })
                .collect()
        })
        .collect()
}

fn vectorizer() -> Arc<dyn Vectorizer<Vec<f32>>> {
    Arc::new(FnVectorizer::embedded(|v: &Vec<f32>| Some(v.clone())))
}

fn build_index(config: VectorIndexConfig, vectors: &[Vec<f32>]) -> VectorIndex<Vec<f32>> {
    let store = Arc::new(MemoryEntityStore::new());
    let indices = VectorIndices::new(store);
    let index = indices
        .add_index("bench", config, vectorizer())
        .expect("index");
    indices.add_all(vectors.to_vec()).expect("add");
    index
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_build");
    group.sample_size(10);
    for n in [1_000usize, 5_000] {
        let vectors = generate_vectors(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &vectors, |b, vectors| {
            b.iter(|| {
                let config = VectorIndexConfig::builder(DIM).build().expect("config");
                black_box(build_index(config, vectors));
            });
        });
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let vectors = generate_vectors(10_000);
    let config = VectorIndexConfig::builder(DIM).build().expect("config");
    let index = build_index(config, &vectors);
    let queries = generate_vectors(100);

    let mut group = c.benchmark_group("index_search");
    for k in [1usize, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(k), &k, |b, &k| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % queries.len();
                black_box(index.search(&queries[i], k).expect("search"));
            });
        });
    }
    group.finish();
}

fn bench_search_approximate(c: &mut Criterion) {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let vectors = generate_vectors(5_000);
    let config = VectorIndexConfig::builder(DIM)
        .on_disk(dir.path())
        .pq_compression(None)
        .build()
        .expect("config");
    let index = build_index(config, &vectors);
    index.persist_to_disk().expect("persist");
    let queries = generate_vectors(100);

    c.bench_function("index_search_approximate_k10", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % queries.len();
            black_box(index.search_approximate(&queries[i], 10).expect("search"));
        });
    });
}

criterion_group!(benches, bench_build, bench_search, bench_search_approximate);
criterion_main!(benches);
