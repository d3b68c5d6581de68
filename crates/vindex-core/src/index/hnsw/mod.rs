//! HNSW graph construction and search.

pub mod native;
mod params;

pub use native::{
    search, CleanupStats, ExactScorer, GraphView, HnswGraph, NodeId, NodeScorer, MAX_ORDINAL,
};
pub use params::{HnswParams, SearchQuality, PQ_MAX_DEGREE};
