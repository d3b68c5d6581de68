//! HNSW neighbor selection and back-link management.

use super::super::layer::NodeId;
use super::HnswGraph;
use crate::store::VectorRef;
use crate::vector_values::VectorValues;

impl HnswGraph {
    /// Alpha-diverse neighbor selection (VAMANA robust prune, in similarity
    /// form).
    ///
    /// `candidates` must be sorted by descending score against the base
    /// node. A candidate is kept if no already selected neighbor is more
    /// similar to it than `alpha` times its own score; free slots are then
    /// filled with the best remaining candidates.
    pub(crate) fn select_neighbors(
        &self,
        candidates: &[(NodeId, f32)],
        max_neighbors: usize,
        values: &dyn VectorValues,
    ) -> Vec<NodeId> {
        if candidates.len() <= max_neighbors {
            return candidates.iter().map(|(id, _)| *id).collect();
        }

        let alpha = self.params.alpha;
        let mut selected: Vec<NodeId> = Vec::with_capacity(max_neighbors);
        let mut selected_vecs: Vec<VectorRef> = Vec::with_capacity(max_neighbors);

        for &(candidate, score) in candidates {
            if selected.len() >= max_neighbors {
                break;
            }
            let Some(candidate_vec) = values.get_vector(candidate) else {
                continue;
            };
            let is_diverse = selected_vecs.iter().all(|selected_vec| {
                self.metric.similarity(&candidate_vec, selected_vec) <= alpha * score
            });
            if is_diverse || selected.is_empty() {
                selected.push(candidate);
                selected_vecs.push(candidate_vec);
            }
        }

        if selected.len() < max_neighbors {
            for &(candidate, _) in candidates {
                if selected.len() >= max_neighbors {
                    break;
                }
                if !selected.contains(&candidate) {
                    selected.push(candidate);
                }
            }
        }

        selected
    }

    /// Scores `nodes` against `base`, dropping unscorable ones, best first.
    pub(crate) fn score_against(
        &self,
        base: &[f32],
        nodes: impl IntoIterator<Item = NodeId>,
        values: &dyn VectorValues,
    ) -> Vec<(NodeId, f32)> {
        let mut scored: Vec<(NodeId, f32)> = nodes
            .into_iter()
            .filter_map(|n| {
                values
                    .get_vector(n)
                    .map(|v| (n, self.metric.similarity(base, &v)))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored
    }

    /// Adds the edge `from -> to` on `level`.
    ///
    /// Lists may grow up to the overflow degree; past it the list is pruned
    /// back to the layer degree.
    pub(crate) fn add_connection(
        &mut self,
        from: NodeId,
        to: NodeId,
        level: usize,
        values: &dyn VectorValues,
    ) {
        let overflow = self.params.overflow_degree(level);
        let Some(list) = self.layers[level].neighbors_mut(from) else {
            return;
        };
        if list.contains(&to) {
            return;
        }
        list.push(to);
        if list.len() <= overflow {
            return;
        }

        let current = list.clone();
        let Some(base) = values.get_vector(from) else {
            return;
        };
        let scored = self.score_against(&base, current, values);
        let pruned =
            self.select_neighbors(&scored, self.params.degree_for_layer(level), values);
        self.layers[level].set_neighbors(from, pruned);
    }
}
