//! Fuzz target for the graph file and metadata parsers.
//!
//! Arbitrary bytes get a valid CRC trailer so they reach the header, table
//! and record parsers instead of stopping at the checksum. Opening,
//! hydrating and reading vectors must fail cleanly, never panic.
//!
//! # Running
//!
//! ```bash
//! cd fuzz
//! cargo +nightly fuzz run fuzz_graph_file
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Write;
use vindex_core::index::disk::{crc32_hash, DiskGraph, IndexMetadata};
use vindex_core::HnswParams;

fuzz_target!(|data: &[u8]| {
    let _ = IndexMetadata::from_bytes(data);

    let Ok(mut file) = tempfile::NamedTempFile::new() else {
        return;
    };
    let crc = crc32_hash(data);
    if file.write_all(data).is_err() || file.write_all(&crc.to_le_bytes()).is_err() {
        return;
    }

    let Ok(graph) = DiskGraph::open(file.path()) else {
        return;
    };
    if let Ok(hydrated) = graph.to_graph(HnswParams::default()) {
        for node in hydrated.ordinals() {
            let _ = graph.vector(node);
        }
    }
});
