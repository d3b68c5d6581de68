//! Node scoring for graph traversal.
//!
//! Traversal never touches vectors directly: it asks a [`NodeScorer`] for the
//! similarity between the query and a node. Exact vectors, PQ lookup tables
//! and inline disk vectors each provide one.

use super::layer::NodeId;
use crate::distance::DistanceMetric;
use crate::vector_values::VectorValues;

/// Similarity of one node to the current query; higher is closer.
pub trait NodeScorer {
    /// Returns the score of `node`, or `None` if it cannot be scored
    /// (missing vector). Unscorable nodes are traversed, never returned.
    fn score(&self, node: NodeId) -> Option<f32>;
}

impl<F> NodeScorer for F
where
    F: Fn(NodeId) -> Option<f32>,
{
    fn score(&self, node: NodeId) -> Option<f32> {
        self(node)
    }
}

/// Scores nodes with the exact similarity function.
pub struct ExactScorer<'a> {
    query: &'a [f32],
    metric: DistanceMetric,
    values: &'a dyn VectorValues,
}

impl<'a> ExactScorer<'a> {
    /// Creates a scorer for `query` over `values`.
    pub fn new(query: &'a [f32], metric: DistanceMetric, values: &'a dyn VectorValues) -> Self {
        Self {
            query,
            metric,
            values,
        }
    }
}

impl NodeScorer for ExactScorer<'_> {
    #[inline]
    fn score(&self, node: NodeId) -> Option<f32> {
        self.values
            .get_vector(node)
            .map(|v| self.metric.similarity(self.query, &v))
    }
}
