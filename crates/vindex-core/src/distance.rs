//! Similarity functions used by the graph, the quantizer and reranking.
//!
//! Every metric is exposed as a *similarity score* where higher means closer,
//! so graph traversal, PQ lookup tables and exact reranking all order results
//! the same way:
//!
//! | Metric | Raw measure | Score |
//! |--------|-------------|-------|
//! | Euclidean | squared L2 distance `d` | `1 / (1 + d)` |
//! | DotProduct | dot product `p` | `(1 + p) / 2` |
//! | Cosine | cosine `c` in `[-1, 1]` | `(1 + c) / 2` |

use serde::{Deserialize, Serialize};

/// Similarity function of a vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Direction-only similarity (default).
    #[default]
    Cosine,
    /// Straight-line distance, converted to a similarity score.
    Euclidean,
    /// Unbounded, magnitude-sensitive inner product.
    DotProduct,
}

impl DistanceMetric {
    /// Computes the similarity score between two vectors of equal length.
    #[inline]
    #[must_use]
    pub fn similarity(self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "Dimension mismatch in similarity");
        match self {
            Self::Euclidean => 1.0 / (1.0 + squared_euclidean(a, b)),
            Self::DotProduct => (1.0 + dot_product(a, b)) / 2.0,
            Self::Cosine => (1.0 + cosine(a, b)) / 2.0,
        }
    }

    /// Converts a raw per-metric measure into the similarity score.
    ///
    /// Used by PQ lookup tables, which accumulate the raw measure subspace by
    /// subspace and convert once per candidate.
    #[inline]
    #[must_use]
    pub fn score_from_raw(self, raw: f32) -> f32 {
        match self {
            Self::Euclidean => 1.0 / (1.0 + raw),
            Self::DotProduct | Self::Cosine => (1.0 + raw) / 2.0,
        }
    }

    /// Stable on-disk discriminant.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Cosine => 0,
            Self::Euclidean => 1,
            Self::DotProduct => 2,
        }
    }

    /// Inverse of [`DistanceMetric::as_u8`].
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Cosine),
            1 => Some(Self::Euclidean),
            2 => Some(Self::DotProduct),
            _ => None,
        }
    }
}

// =============================================================================
// Scalar kernels
// =============================================================================

/// Dot product of two vectors.
#[inline]
#[must_use]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Squared Euclidean distance.
#[inline]
#[must_use]
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum()
}

/// Cosine of the angle between two vectors.
///
/// Returns `0.0` when either vector has zero magnitude.
#[inline]
#[must_use]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = (norm_a * norm_b).sqrt();
    if denom == 0.0 || !denom.is_finite() {
        0.0
    } else {
        (dot / denom).clamp(-1.0, 1.0)
    }
}

/// Euclidean norm of a vector.
#[inline]
#[must_use]
pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_self_similarity_is_maximal() {
        let v = vec![0.3, -1.2, 4.0, 0.5];
        assert!((DistanceMetric::Cosine.similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!((DistanceMetric::Euclidean.similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite_vectors_score_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!(DistanceMetric::Cosine.similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector_is_finite() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 2.0, 3.0];
        let score = DistanceMetric::Cosine.similarity(&a, &b);
        assert!(score.is_finite());
        assert!((score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_dot_product_is_magnitude_sensitive() {
        let q = vec![1.0, 1.0];
        let small = vec![1.0, 1.0];
        let large = vec![2.0, 2.0];
        assert!(
            DistanceMetric::DotProduct.similarity(&q, &large)
                > DistanceMetric::DotProduct.similarity(&q, &small)
        );
    }

    #[test]
    fn test_score_from_raw_matches_similarity() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![2.0, 0.5, -1.0];
        let raw = squared_euclidean(&a, &b);
        assert!(
            (DistanceMetric::Euclidean.score_from_raw(raw)
                - DistanceMetric::Euclidean.similarity(&a, &b))
            .abs()
                < 1e-6
        );
    }

    #[test]
    fn test_metric_discriminant_roundtrip() {
        for metric in [
            DistanceMetric::Cosine,
            DistanceMetric::Euclidean,
            DistanceMetric::DotProduct,
        ] {
            assert_eq!(DistanceMetric::from_u8(metric.as_u8()), Some(metric));
        }
        assert_eq!(DistanceMetric::from_u8(9), None);
    }

    proptest! {
        #[test]
        fn prop_similarity_is_symmetric(
            pair in (1usize..32).prop_flat_map(|dim| (
                prop::collection::vec(-100.0f32..100.0, dim),
                prop::collection::vec(-100.0f32..100.0, dim),
            ))
        ) {
            let (a, b) = pair;
            for metric in [DistanceMetric::Cosine, DistanceMetric::Euclidean, DistanceMetric::DotProduct] {
                let ab = metric.similarity(&a, &b);
                let ba = metric.similarity(&b, &a);
                prop_assert!((ab - ba).abs() <= 1e-3 * ab.abs().max(1.0));
            }
        }

        #[test]
        fn prop_bounded_metrics_stay_in_unit_range(
            pair in (1usize..32).prop_flat_map(|dim| (
                prop::collection::vec(-100.0f32..100.0, dim),
                prop::collection::vec(-100.0f32..100.0, dim),
            ))
        ) {
            let (a, b) = pair;
            let cos = DistanceMetric::Cosine.similarity(&a, &b);
            let l2 = DistanceMetric::Euclidean.similarity(&a, &b);
            prop_assert!((0.0..=1.0).contains(&cos));
            prop_assert!(l2 > 0.0 && l2 <= 1.0);
        }
    }
}
