//! # vindex core
//!
//! Concurrent HNSW vector indices over an application's entity store.
//!
//! Each index vectorizes the entities of a store and keeps an HNSW graph
//! whose node ids are the entity ids, so search hits map straight back to
//! entities without a translation table.
//!
//! ## Features
//!
//! - **3 similarity functions**: cosine, Euclidean, dot product
//! - **Eventual indexing**: graph updates applied by a background worker
//! - **Background maintenance**: threshold and interval driven optimize and persist
//! - **Disk persistence**: memory-mapped graph files reused across restarts
//! - **Product quantization**: compressed search with exact reranking
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vindex_core::{FnVectorizer, MemoryEntityStore, VectorIndexConfig, VectorIndices};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryEntityStore::<Vec<f32>>::new());
//!     let indices = VectorIndices::new(store);
//!
//!     indices.add_index(
//!         "embeddings",
//!         VectorIndexConfig::builder(3).build()?,
//!         Arc::new(FnVectorizer::embedded(|v: &Vec<f32>| Some(v.clone()))),
//!     )?;
//!
//!     indices.add(vec![1.0, 0.0, 0.0])?;
//!     indices.add(vec![0.0, 1.0, 0.0])?;
//!
//!     let index = indices.get("embeddings").ok_or("index not found")?;
//!     for hit in index.search(&[0.9, 0.1, 0.0], 1)? {
//!         println!("{} scored {}", hit.entity_id(), hit.score());
//!     }
//!
//!     indices.close();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
// Clippy lints configured in workspace Cargo.toml [workspace.lints.clippy]
#![cfg_attr(
    test,
    allow(
        clippy::doc_markdown,
        clippy::uninlined_format_args,
        clippy::single_match_else,
        clippy::cast_lossless,
        clippy::manual_assert
    )
)]

pub mod config;
pub mod distance;
pub mod error;
pub mod index;
pub mod store;
pub mod vector_values;
pub mod vectorizer;

pub use config::{VectorIndexConfig, VectorIndexConfigBuilder};
pub use distance::DistanceMetric;
pub use error::{Error, Result};
pub use index::{
    CleanupStats, HnswParams, IndexState, IndexStats, SearchQuality, SearchResult, VectorIndex,
    VectorIndexState, VectorIndices, VectorIndicesState, MAX_ORDINAL,
};
pub use store::{EntityStore, MemoryEntityStore, StoreLock, VectorEntry, VectorRef, VectorStore};
pub use vector_values::VectorValues;
pub use vectorizer::{FnVectorizer, Vectorizer};
