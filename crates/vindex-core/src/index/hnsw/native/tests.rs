//! Tests for the native HNSW graph.

#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]

use super::{search, ExactScorer, GraphView, HnswGraph, NodeId};
use crate::distance::DistanceMetric;
use crate::index::hnsw::HnswParams;
use crate::store::{VectorRef, VectorStore};
use crate::vector_values::{StoredVectorValues, VectorValues};
use std::sync::Arc;

fn wave(i: u32, dim: usize) -> Vec<f32> {
    (0..dim)
        .map(|j| ((i as usize * dim + j) as f32 * 0.001).sin())
        .collect()
}

/// Builds a graph over `ordinals`, returning it with its vector view.
fn build(
    ordinals: impl IntoIterator<Item = NodeId>,
    dim: usize,
    metric: DistanceMetric,
) -> (HnswGraph, StoredVectorValues) {
    let store = Arc::new(VectorStore::new());
    let values = StoredVectorValues::new(Arc::clone(&store), dim);
    let mut graph = HnswGraph::new(HnswParams::default(), metric);
    for ordinal in ordinals {
        let v = wave(ordinal, dim);
        store.upsert(u64::from(ordinal), VectorRef::from(v.clone()));
        graph.insert(ordinal, &v, &values);
    }
    (graph, values)
}

fn knn(
    graph: &HnswGraph,
    values: &dyn VectorValues,
    query: &[f32],
    k: usize,
) -> Vec<(NodeId, f32)> {
    let scorer = ExactScorer::new(query, graph.metric(), values);
    search(graph, &scorer, k, 128)
}

#[test]
fn test_empty_graph_returns_nothing() {
    let (graph, values) = build([], 8, DistanceMetric::Cosine);
    assert!(knn(&graph, &values, &[0.0; 8], 5).is_empty());
    assert_eq!(graph.entry_point(), None);
}

#[test]
fn test_self_match_uses_entity_ordinals() {
    // Sparse, non-contiguous ordinals
    let ordinals: Vec<NodeId> = (0..150).map(|i| i * 7 + 3).collect();
    let (graph, values) = build(ordinals.iter().copied(), 32, DistanceMetric::Euclidean);

    assert_eq!(graph.node_count(), 150);
    for &ordinal in ordinals.iter().step_by(10) {
        let results = knn(&graph, &values, &wave(ordinal, 32), 1);
        assert_eq!(results[0].0, ordinal);
        assert!((results[0].1 - 1.0).abs() < 1e-5);
    }
}

#[test]
fn test_results_sorted_by_descending_score() {
    let (graph, values) = build(0..100, 16, DistanceMetric::Cosine);
    let results = knn(&graph, &values, &wave(42, 16), 10);
    assert_eq!(results.len(), 10);
    assert!(results.windows(2).all(|w| w[0].1 >= w[1].1));
}

#[test]
fn test_recall_against_brute_force() {
    let dim = 64;
    let (graph, values) = build(0..300, dim, DistanceMetric::Cosine);
    let k = 10;
    let mut total_recall = 0.0;
    let n_queries = 5;

    for q in 0..n_queries {
        let query = wave(q * 60 + 1, dim);
        let found: Vec<NodeId> = knn(&graph, &values, &query, k)
            .iter()
            .map(|(id, _)| *id)
            .collect();

        let mut truth: Vec<(NodeId, f32)> = (0..300)
            .map(|i| (i, DistanceMetric::Cosine.similarity(&query, &wave(i, dim))))
            .collect();
        truth.sort_by(|a, b| b.1.total_cmp(&a.1));
        let truth: Vec<NodeId> = truth.iter().take(k).map(|(i, _)| *i).collect();

        let hits = found.iter().filter(|id| truth.contains(id)).count();
        total_recall += hits as f64 / k as f64;
    }

    let avg_recall = total_recall / f64::from(n_queries);
    assert!(
        avg_recall >= 0.8,
        "Recall should be at least 80%, got {:.1}%",
        avg_recall * 100.0
    );
}

#[test]
fn test_tombstones_route_but_never_return() {
    let (mut graph, values) = build(0..80, 16, DistanceMetric::Euclidean);
    let victim = 17;
    assert!(graph.mark_deleted(victim));
    assert!(!graph.mark_deleted(victim));

    assert_eq!(graph.tombstone_count(), 1);
    assert!(graph.contains(victim));

    let results = knn(&graph, &values, &wave(victim, 16), 10);
    assert_eq!(results.len(), 10);
    assert!(results.iter().all(|(id, _)| *id != victim));
}

#[test]
fn test_cleanup_removes_tombstones_and_trims_degree() {
    let (mut graph, values) = build(0..200, 16, DistanceMetric::Euclidean);
    for victim in (0..200).step_by(4) {
        graph.mark_deleted(victim);
    }

    let stats = graph.cleanup(&values);
    assert_eq!(stats.removed, 50);
    assert_eq!(graph.node_count(), 150);
    assert_eq!(graph.tombstone_count(), 0);

    let params = *graph.params();
    assert!(graph.max_out_degree(0) <= params.degree_for_layer(0));
    assert!(graph.max_out_degree(1) <= params.degree_for_layer(1));

    for ordinal in graph.ordinals() {
        for &neighbor in graph.neighbors_at(ordinal, 0) {
            assert!(graph.contains(neighbor), "dangling edge {ordinal} -> {neighbor}");
        }
    }

    // Survivors are still reachable.
    let results = knn(&graph, &values, &wave(101, 16), 1);
    assert_eq!(results[0].0, 101);
}

#[test]
fn test_overflow_tolerated_until_cleanup() {
    let (graph, _) = build(0..300, 8, DistanceMetric::Euclidean);
    let params = *graph.params();
    assert!(graph.max_out_degree(0) <= params.overflow_degree(0));
}

#[test]
fn test_reinsert_keeps_ordinal_and_moves_node() {
    let dim = 16;
    let (mut graph, values) = build(0..60, dim, DistanceMetric::Euclidean);

    // Move node 5 to where node 50 lives.
    let moved: Vec<f32> = wave(50, dim).iter().map(|x| x + 1e-4).collect();
    let store_values = values.copy();
    graph.insert(5, &moved, &store_values);

    assert_eq!(graph.node_count(), 60);
    assert!(graph.is_live(5));
}

#[test]
fn test_cleanup_of_everything_leaves_empty_graph() {
    let (mut graph, values) = build(0..10, 4, DistanceMetric::Cosine);
    for n in 0..10 {
        graph.mark_deleted(n);
    }
    graph.cleanup(&values);
    assert!(graph.is_empty());
    assert_eq!(graph.entry_point(), None);
    assert!(knn(&graph, &values, &[1.0; 4], 3).is_empty());
}

#[test]
fn test_from_parts_restores_topology() {
    let (graph, values) = build(0..50, 8, DistanceMetric::Cosine);
    let nodes = graph.ordinals().into_iter().map(|n| {
        let level = graph.level_of(n).unwrap_or(0);
        let lists = (0..=level)
            .map(|l| graph.neighbors_at(n, l).to_vec())
            .collect();
        (n, graph.is_live(n), lists)
    });
    let restored = HnswGraph::from_parts(
        *graph.params(),
        graph.metric(),
        graph.entry_point(),
        nodes,
    );

    assert_eq!(restored.node_count(), graph.node_count());
    assert_eq!(restored.entry_point(), graph.entry_point());
    let q = wave(9, 8);
    assert_eq!(knn(&restored, &values, &q, 5), knn(&graph, &values, &q, 5));
}
