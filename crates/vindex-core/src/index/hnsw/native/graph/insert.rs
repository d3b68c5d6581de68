//! HNSW insert operations.

use super::super::distance::ExactScorer;
use super::super::layer::NodeId;
use super::super::search::{greedy_closest, search_layer, GraphView};
use super::HnswGraph;
use crate::vector_values::VectorValues;

impl HnswGraph {
    /// Inserts `node` with `vector`, linking it to its nearest live nodes.
    ///
    /// An ordinal already present is detached and inserted again, so an
    /// update keeps its ordinal.
    pub fn insert(&mut self, node: NodeId, vector: &[f32], values: &dyn VectorValues) {
        if self.contains(node) {
            self.detach(node);
        }

        let node_level = self.random_level();
        self.ensure_layers(node_level);
        for layer in &mut self.layers[..=node_level] {
            layer.add_node(node);
        }
        self.levels.insert(node, node_level);
        self.live.insert(node);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(node);
            return;
        };

        let max_level = self.max_level();
        let scorer = ExactScorer::new(vector, self.metric, values);

        let mut current = entry;
        for level in (node_level + 1..=max_level).rev() {
            current = greedy_closest(self, &scorer, current, level);
        }

        let mut entries = vec![current];
        for level in (0..=node_level.min(max_level)).rev() {
            let candidates = search_layer(
                self,
                &scorer,
                &entries,
                self.params.beam_width,
                level,
                |n| n != node && self.live.contains(n),
            );
            let selected =
                self.select_neighbors(&candidates, self.params.degree_for_layer(level), values);
            for &neighbor in &selected {
                self.add_connection(neighbor, node, level, values);
            }
            self.layers[level].set_neighbors(node, selected);

            if !candidates.is_empty() {
                entries = candidates.iter().map(|(n, _)| *n).collect();
            }
        }

        if node_level > max_level {
            self.entry_point = Some(node);
        }
    }

    /// Removes `node` and its outgoing edges.
    ///
    /// Incoming edges are left in place: they become valid again when the
    /// ordinal is re-inserted, and cleanup drops those that stay dangling.
    pub(crate) fn detach(&mut self, node: NodeId) {
        let Some(level) = self.levels.remove(&node) else {
            return;
        };
        for layer in &mut self.layers[..=level] {
            layer.remove_node(node);
        }
        self.live.remove(node);

        if self.entry_point == Some(node) {
            self.entry_point = self.highest_node();
        }
    }
}
