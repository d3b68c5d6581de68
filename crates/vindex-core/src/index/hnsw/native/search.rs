//! Layered best-first search, shared by the in-memory and on-disk graphs.

use super::distance::NodeScorer;
use super::layer::NodeId;
use super::ordered_float::OrderedFloat;
use rustc_hash::FxHashSet;
use std::borrow::Cow;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Read-only topology of an HNSW graph.
pub trait GraphView {
    /// Top-level entry node, `None` when the graph is empty.
    fn entry_point(&self) -> Option<NodeId>;

    /// Level of the entry node.
    fn max_level(&self) -> usize;

    /// Neighbors of `node` on `level`.
    fn neighbors(&self, node: NodeId, level: usize) -> Cow<'_, [NodeId]>;

    /// Returns true if `node` may appear in results (not a tombstone).
    fn is_live(&self, node: NodeId) -> bool;
}

/// Finds the `k` live nodes scoring highest against the query.
///
/// Results are sorted by descending score. Tombstones are traversed for
/// connectivity but never returned.
pub fn search<G, S>(graph: &G, scorer: &S, k: usize, ef: usize) -> Vec<(NodeId, f32)>
where
    G: GraphView + ?Sized,
    S: NodeScorer + ?Sized,
{
    if k == 0 {
        return Vec::new();
    }
    let Some(entry) = graph.entry_point() else {
        return Vec::new();
    };

    let mut current = entry;
    for level in (1..=graph.max_level()).rev() {
        current = greedy_closest(graph, scorer, current, level);
    }

    let mut hits = search_layer(graph, scorer, &[current], ef.max(k), 0, |n| {
        graph.is_live(n)
    });
    hits.truncate(k);
    hits
}

#[inline]
fn score_or_floor<S: NodeScorer + ?Sized>(scorer: &S, node: NodeId) -> f32 {
    scorer.score(node).unwrap_or(f32::NEG_INFINITY)
}

/// Greedy hill climb on one layer.
pub(crate) fn greedy_closest<G, S>(graph: &G, scorer: &S, entry: NodeId, level: usize) -> NodeId
where
    G: GraphView + ?Sized,
    S: NodeScorer + ?Sized,
{
    let mut best = entry;
    let mut best_score = score_or_floor(scorer, entry);

    loop {
        let mut improved = false;
        for &neighbor in graph.neighbors(best, level).iter() {
            if let Some(score) = scorer.score(neighbor) {
                if score > best_score {
                    best = neighbor;
                    best_score = score;
                    improved = true;
                }
            }
        }
        if !improved {
            return best;
        }
    }
}

/// Beam search over one layer keeping the `ef` best accepted nodes.
///
/// Nodes rejected by `accept` still expand the frontier. Unscorable nodes
/// are expanded only while the result set is not full.
pub(crate) fn search_layer<G, S, A>(
    graph: &G,
    scorer: &S,
    entries: &[NodeId],
    ef: usize,
    level: usize,
    accept: A,
) -> Vec<(NodeId, f32)>
where
    G: GraphView + ?Sized,
    S: NodeScorer + ?Sized,
    A: Fn(NodeId) -> bool,
{
    let mut visited: FxHashSet<NodeId> = FxHashSet::default();
    // Max-heap: best candidate first.
    let mut candidates: BinaryHeap<(OrderedFloat, NodeId)> = BinaryHeap::new();
    // Min-heap: worst kept result on top.
    let mut results: BinaryHeap<Reverse<(OrderedFloat, NodeId)>> = BinaryHeap::new();

    for &ep in entries {
        if !visited.insert(ep) {
            continue;
        }
        match scorer.score(ep) {
            Some(score) => {
                candidates.push((OrderedFloat(score), ep));
                if accept(ep) {
                    results.push(Reverse((OrderedFloat(score), ep)));
                }
            }
            None => candidates.push((OrderedFloat(f32::NEG_INFINITY), ep)),
        }
    }

    while let Some((OrderedFloat(c_score), c_node)) = candidates.pop() {
        let worst = results.peek().map_or(f32::NEG_INFINITY, |r| r.0 .0 .0);
        if results.len() >= ef && c_score < worst {
            break;
        }

        for &neighbor in graph.neighbors(c_node, level).iter() {
            if !visited.insert(neighbor) {
                continue;
            }
            let Some(score) = scorer.score(neighbor) else {
                if results.len() < ef {
                    candidates.push((OrderedFloat(f32::NEG_INFINITY), neighbor));
                }
                continue;
            };

            let worst = results.peek().map_or(f32::NEG_INFINITY, |r| r.0 .0 .0);
            if results.len() < ef || score > worst {
                candidates.push((OrderedFloat(score), neighbor));
                if accept(neighbor) {
                    results.push(Reverse((OrderedFloat(score), neighbor)));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }
    }

    let mut hits: Vec<(NodeId, f32)> = results
        .into_iter()
        .map(|Reverse((score, node))| (node, score.0))
        .collect();
    hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    hits
}
