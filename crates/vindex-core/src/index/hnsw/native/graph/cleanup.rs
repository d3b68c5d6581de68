//! Tombstone removal and degree trimming.

use super::super::layer::{Layer, NodeId};
use super::HnswGraph;
use crate::vector_values::VectorValues;
use rustc_hash::FxHashSet;

/// Outcome of [`HnswGraph::cleanup`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    /// Tombstones physically removed.
    pub removed: usize,
    /// Neighbor lists rewritten.
    pub repaired: usize,
}

impl HnswGraph {
    /// Removes tombstones and trims every neighbor list to its layer degree.
    ///
    /// A list pointing at a deleted node inherits that node's live neighbors
    /// before alpha-diverse reselection, so routing through the removed node
    /// is preserved. Lists grown past the degree during construction, and
    /// edges left dangling by re-insertion, are repaired the same way.
    pub fn cleanup(&mut self, values: &dyn VectorValues) -> CleanupStats {
        let deleted: FxHashSet<NodeId> = self
            .levels
            .keys()
            .copied()
            .filter(|n| !self.live.contains(*n))
            .collect();
        let mut stats = CleanupStats {
            removed: deleted.len(),
            repaired: 0,
        };

        for level in 0..self.layers.len() {
            let max_degree = self.params.degree_for_layer(level);
            let layer = &self.layers[level];
            let mut updates: Vec<(NodeId, Vec<NodeId>)> = Vec::new();

            for (node, list) in layer.iter() {
                if deleted.contains(&node) {
                    continue;
                }
                let needs_repair = list.len() > max_degree
                    || list
                        .iter()
                        .any(|n| deleted.contains(n) || !layer.contains(*n));
                if !needs_repair {
                    continue;
                }

                let mut pool: FxHashSet<NodeId> = FxHashSet::default();
                for &neighbor in list {
                    if deleted.contains(&neighbor) {
                        pool.extend(layer.get_neighbors(neighbor).iter().copied().filter(
                            |c| *c != node && !deleted.contains(c) && layer.contains(*c),
                        ));
                    } else if layer.contains(neighbor) {
                        pool.insert(neighbor);
                    }
                }

                let repaired = match values.get_vector(node) {
                    Some(base) => {
                        let scored = self.score_against(&base, pool, values);
                        self.select_neighbors(&scored, max_degree, values)
                    }
                    None => {
                        let mut kept: Vec<NodeId> =
                            list.iter().copied().filter(|n| pool.contains(n)).collect();
                        kept.truncate(max_degree);
                        kept
                    }
                };
                updates.push((node, repaired));
            }

            stats.repaired += updates.len();
            for (node, list) in updates {
                self.layers[level].set_neighbors(node, list);
            }
        }

        for node in &deleted {
            if let Some(level) = self.levels.remove(node) {
                for layer in &mut self.layers[..=level] {
                    layer.remove_node(*node);
                }
            }
        }
        while self.layers.len() > 1 && self.layers.last().is_some_and(Layer::is_empty) {
            self.layers.pop();
        }
        if self
            .entry_point
            .map_or(true, |ep| !self.levels.contains_key(&ep))
        {
            self.entry_point = self.highest_node();
        }

        tracing::debug!(
            removed = stats.removed,
            repaired = stats.repaired,
            nodes = self.node_count(),
            "HNSW cleanup complete"
        );
        stats
    }
}
