//! Builds an on-disk index with background maintenance, closes it and
//! reopens it from the persisted graph.
//!
//! ```bash
//! RUST_LOG=debug cargo run --example persistent_index -- /tmp/vindex-demo
//! ```

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vindex_core::{FnVectorizer, MemoryEntityStore, VectorIndexConfig, VectorIndices, Vectorizer};

#[derive(Debug, Clone)]
struct Article {
    title: String,
    embedding: Vec<f32>,
}

#[allow(clippy::cast_precision_loss)]
fn embedding(i: usize) -> Vec<f32> {
    let phase = i as f32 * 0.37;
    (0..8).map(|j| (phase + j as f32).sin()).collect()
}

fn vectorizer() -> Arc<dyn Vectorizer<Article>> {
    Arc::new(FnVectorizer::embedded(|a: &Article| Some(a.embedding.clone())))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| std::env::temp_dir().join("vindex-demo").display().to_string());
    let config = VectorIndexConfig::builder(8)
        .on_disk(&dir)
        .eventual_indexing(true)
        .background_optimization(Duration::from_secs(5), 100)
        .background_persistence(Duration::from_secs(10), 100)
        .build()?;

    let store = Arc::new(MemoryEntityStore::new());
    let indices = VectorIndices::new(store.clone());
    indices.add_index("articles", config.clone(), vectorizer())?;
    indices.add_all(
        (0..500)
            .map(|i| Article {
                title: format!("article {i}"),
                embedding: embedding(i),
            })
            .collect(),
    )?;

    let index = indices.get("articles").ok_or("index not registered")?;
    index.drain_queue()?;
    tracing::info!(stats = ?index.stats(), "Index built");
    indices.close();

    let reopened = VectorIndices::new(store);
    let index = reopened.add_index("articles", config, vectorizer())?;
    tracing::info!(disk_loaded = index.stats().disk_loaded, "Index reopened");

    for hit in index.search(&embedding(42), 3)? {
        let title = hit.entity().map(|a| a.title.clone()).unwrap_or_default();
        tracing::info!(id = hit.entity_id(), score = hit.score(), %title, "Hit");
    }
    reopened.close();
    Ok(())
}
