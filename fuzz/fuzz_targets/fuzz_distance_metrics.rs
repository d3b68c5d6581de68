//! Fuzz target for similarity scoring.
//!
//! Feeds arbitrary vectors (NaN, Inf, denormals, huge magnitudes) through
//! every metric and the raw-score conversion. None may panic.
//!
//! # Running
//!
//! ```bash
//! cd fuzz
//! cargo +nightly fuzz run fuzz_distance_metrics
//! ```

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use vindex_core::distance::{cosine, dot_product, norm, squared_euclidean};
use vindex_core::DistanceMetric;

#[derive(Arbitrary, Debug)]
struct DistanceInput {
    vec_a: Vec<f32>,
    /// Truncated or zero-padded to the length of `vec_a`.
    vec_b: Vec<f32>,
    raw: f32,
}

fuzz_target!(|input: DistanceInput| {
    if input.vec_a.is_empty() {
        return;
    }

    // Bound memory use
    let dim = input.vec_a.len().min(2048);
    let a: Vec<f32> = input.vec_a.into_iter().take(dim).collect();
    let mut b: Vec<f32> = input.vec_b.into_iter().take(dim).collect();
    b.resize(dim, 0.0);

    let _ = cosine(&a, &b);
    let _ = dot_product(&a, &b);
    let _ = squared_euclidean(&a, &b);
    let _ = norm(&a);

    for metric in [
        DistanceMetric::Cosine,
        DistanceMetric::Euclidean,
        DistanceMetric::DotProduct,
    ] {
        let _ = metric.similarity(&a, &b);
        let _ = metric.score_from_raw(input.raw);
        assert_eq!(DistanceMetric::from_u8(metric.as_u8()), Some(metric));
    }
});
