//! Native HNSW implementation.
//!
//! - `graph`: the mutable in-memory graph
//! - `layer`: per-layer adjacency lists and the ordinal type
//! - `distance`: node scoring used during traversal
//! - `search`: layered search over any [`GraphView`]

mod distance;
mod graph;
mod layer;
mod ordered_float;
mod search;

#[cfg(test)]
mod tests;

pub use distance::{ExactScorer, NodeScorer};
pub use graph::{CleanupStats, HnswGraph};
pub use layer::{Layer, NodeId, MAX_ORDINAL};
pub use search::{search, GraphView};
