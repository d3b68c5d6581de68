//! One layer of the HNSW hierarchy.

use rustc_hash::FxHashMap;

/// Graph node identifier. Numerically equal to the owning entity id.
pub type NodeId = u32;

/// Largest entity id usable as a graph ordinal.
pub const MAX_ORDINAL: u64 = i32::MAX as u64;

/// Adjacency lists of the nodes present on one layer.
///
/// Ordinals are sparse (entity ids with gaps), so lists are keyed by ordinal
/// rather than stored in a dense vector.
#[derive(Debug, Default, Clone)]
pub struct Layer {
    neighbors: FxHashMap<NodeId, Vec<NodeId>>,
}

impl Layer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns true if `node` lives on this layer.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.neighbors.contains_key(&node)
    }

    /// Neighbors of `node`, empty if it is not on this layer.
    #[must_use]
    pub fn get_neighbors(&self, node: NodeId) -> &[NodeId] {
        self.neighbors.get(&node).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn set_neighbors(&mut self, node: NodeId, neighbors: Vec<NodeId>) {
        self.neighbors.insert(node, neighbors);
    }

    pub(crate) fn neighbors_mut(&mut self, node: NodeId) -> Option<&mut Vec<NodeId>> {
        self.neighbors.get_mut(&node)
    }

    pub(crate) fn add_node(&mut self, node: NodeId) {
        self.neighbors.entry(node).or_default();
    }

    pub(crate) fn remove_node(&mut self, node: NodeId) -> Option<Vec<NodeId>> {
        self.neighbors.remove(&node)
    }

    /// Number of nodes on this layer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    /// Returns true if no node lives on this layer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Iterates `(node, neighbors)` in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &[NodeId])> {
        self.neighbors.iter().map(|(n, list)| (*n, list.as_slice()))
    }

    /// Largest neighbor list on this layer.
    #[must_use]
    pub fn max_out_degree(&self) -> usize {
        self.neighbors.values().map(Vec::len).max().unwrap_or(0)
    }
}
