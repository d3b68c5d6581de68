//! HNSW Graph Structure
//!
//! Hierarchical navigable small world graph (Malkov & Yashunin) whose node
//! ordinals are entity ids. The graph stores topology only; vectors are read
//! through a [`VectorValues`](crate::vector_values::VectorValues) view.
//!
//! # Module Organization
//!
//! - `insert`: node insertion, re-insertion and layer growth
//! - `neighbors`: alpha-diverse neighbor selection and back-links
//! - `cleanup`: tombstone removal and degree trimming
//!
//! Removal is soft: [`HnswGraph::mark_deleted`] clears the live bit and the
//! node keeps routing searches until [`HnswGraph::cleanup`] drops it.

mod cleanup;
mod insert;
mod neighbors;

pub use cleanup::CleanupStats;

use super::layer::{Layer, NodeId};
use super::search::GraphView;
use crate::distance::DistanceMetric;
use crate::index::hnsw::HnswParams;
use roaring::RoaringBitmap;
use rustc_hash::FxHashMap;
use std::borrow::Cow;

/// Deepest layer a node can be assigned to.
const MAX_LEVEL: usize = 15;

/// Seed of the layer-assignment PRNG.
const RNG_SEED: u64 = 0x5DEE_CE66_D1A4_B5B5;

/// Native in-memory HNSW graph.
///
/// Not internally synchronized: mutation takes `&mut self` and the owning
/// index serializes writers under the store lock.
#[derive(Debug, Clone)]
pub struct HnswGraph {
    params: HnswParams,
    metric: DistanceMetric,
    /// Hierarchical layers (layer 0 = bottom, holds every node)
    layers: Vec<Layer>,
    /// Top level of every node, tombstones included
    levels: FxHashMap<NodeId, usize>,
    entry_point: Option<NodeId>,
    /// Live (non-deleted) ordinals
    live: RoaringBitmap,
    rng_state: u64,
    /// Level multiplier for layer selection (1/ln(M))
    level_mult: f64,
}

impl HnswGraph {
    /// Creates an empty graph.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(params: HnswParams, metric: DistanceMetric) -> Self {
        let m = params.max_degree.max(2);
        Self {
            params,
            metric,
            layers: vec![Layer::new()],
            levels: FxHashMap::default(),
            entry_point: None,
            live: RoaringBitmap::new(),
            rng_state: RNG_SEED,
            level_mult: 1.0 / (m as f64).ln(),
        }
    }

    /// Rebuilds a graph from stored topology.
    ///
    /// `nodes` yields `(ordinal, live, neighbors per level)`; the number of
    /// lists gives the node's level.
    pub fn from_parts(
        params: HnswParams,
        metric: DistanceMetric,
        entry_point: Option<NodeId>,
        nodes: impl IntoIterator<Item = (NodeId, bool, Vec<Vec<NodeId>>)>,
    ) -> Self {
        let mut graph = Self::new(params, metric);
        for (node, live, lists) in nodes {
            if lists.is_empty() {
                continue;
            }
            let level = lists.len() - 1;
            graph.ensure_layers(level);
            for (l, list) in lists.into_iter().enumerate() {
                graph.layers[l].set_neighbors(node, list);
            }
            graph.levels.insert(node, level);
            if live {
                graph.live.insert(node);
            }
        }
        let stored_entry = entry_point.filter(|ep| graph.levels.contains_key(ep));
        graph.entry_point = stored_entry.or_else(|| graph.highest_node());
        graph
    }

    /// Build parameters.
    #[must_use]
    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    /// Similarity function used for construction.
    #[must_use]
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Number of physical nodes, tombstones included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.levels.len()
    }

    /// Number of live nodes.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn live_count(&self) -> usize {
        self.live.len() as usize
    }

    /// Number of deleted nodes awaiting cleanup.
    #[must_use]
    pub fn tombstone_count(&self) -> usize {
        self.node_count() - self.live_count()
    }

    /// Returns true if the graph has no node at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Returns true if `node` is physically present.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.levels.contains_key(&node)
    }

    /// Live ordinals.
    #[must_use]
    pub fn live_nodes(&self) -> &RoaringBitmap {
        &self.live
    }

    /// Top level of `node`.
    #[must_use]
    pub fn level_of(&self, node: NodeId) -> Option<usize> {
        self.levels.get(&node).copied()
    }

    /// Every physical ordinal in ascending order.
    #[must_use]
    pub fn ordinals(&self) -> Vec<NodeId> {
        let mut ordinals: Vec<NodeId> = self.levels.keys().copied().collect();
        ordinals.sort_unstable();
        ordinals
    }

    /// Neighbors of `node` on `level`.
    #[must_use]
    pub fn neighbors_at(&self, node: NodeId, level: usize) -> &[NodeId] {
        self.layers
            .get(level)
            .map_or(&[], |layer| layer.get_neighbors(node))
    }

    /// Largest neighbor list on `level`.
    #[must_use]
    pub fn max_out_degree(&self, level: usize) -> usize {
        self.layers.get(level).map_or(0, Layer::max_out_degree)
    }

    /// Marks `node` deleted. Returns false if it was not live.
    pub fn mark_deleted(&mut self, node: NodeId) -> bool {
        self.live.remove(node)
    }

    /// Drops every node.
    pub fn clear(&mut self) {
        self.layers = vec![Layer::new()];
        self.levels.clear();
        self.entry_point = None;
        self.live.clear();
    }

    fn ensure_layers(&mut self, level: usize) {
        while self.layers.len() <= level {
            self.layers.push(Layer::new());
        }
    }

    /// Node with the highest level, lowest ordinal on ties.
    fn highest_node(&self) -> Option<NodeId> {
        self.levels
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(node, _)| *node)
    }

    // Layer selection uses an exponential distribution capped at MAX_LEVEL.
    // - cast_precision_loss: u64 to f64 is fine for a PRNG sample
    // - cast_possible_truncation: floor() result is capped, fits in usize
    // - cast_sign_loss: -ln(uniform) is positive since uniform is in (0, 1]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn random_level(&mut self) -> usize {
        let mut state = self.rng_state;
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        self.rng_state = state;

        let uniform = ((state as f64) / (u64::MAX as f64)).max(f64::MIN_POSITIVE);
        let level = (-uniform.ln() * self.level_mult).floor() as usize;
        level.min(MAX_LEVEL)
    }
}

impl GraphView for HnswGraph {
    fn entry_point(&self) -> Option<NodeId> {
        self.entry_point
    }

    fn max_level(&self) -> usize {
        self.entry_point
            .and_then(|ep| self.level_of(ep))
            .unwrap_or(0)
    }

    fn neighbors(&self, node: NodeId, level: usize) -> Cow<'_, [NodeId]> {
        Cow::Borrowed(self.neighbors_at(node, level))
    }

    fn is_live(&self, node: NodeId) -> bool {
        self.live.contains(node)
    }
}
