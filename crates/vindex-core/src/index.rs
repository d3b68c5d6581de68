//! Vector index implementation.
//!
//! - `hnsw`: the graph keyed by entity id
//! - `pq`: product quantization and compressed search
//! - `disk`: graph and metadata files
//! - `background`: the per-index maintenance worker
//! - `vector_index`: the index lifecycle tying these together
//! - `registry` and `state`: named indices over one store and their
//!   persistent form

pub mod background;
pub mod disk;
pub mod hnsw;
pub mod pq;
pub mod registry;
pub mod state;
pub mod vector_index;

pub use background::{BackgroundConfig, BackgroundTaskManager, IndexingOp, MaintenanceSchedule};
pub use disk::{DiskGraph, DiskIndexManager, IndexMetadata};
pub use hnsw::{CleanupStats, HnswGraph, HnswParams, NodeId, SearchQuality, MAX_ORDINAL};
pub use pq::{PqCompressionManager, ProductQuantizer};
pub use registry::{validate_index_name, VectorIndices};
pub use state::{VectorIndexState, VectorIndicesState};
pub use vector_index::{IndexState, IndexStats, SearchResult, VectorIndex};
