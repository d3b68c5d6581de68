//! HNSW build parameters and search quality profiles.

use serde::{Deserialize, Serialize};

/// Maximum node degree required when compressed vectors are embedded in the
/// on-disk graph.
pub const PQ_MAX_DEGREE: usize = 32;

/// HNSW index parameters, passed through unchanged to graph construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswParams {
    /// Maximum number of neighbors kept per node after cleanup (M parameter).
    /// Layer 0 keeps twice as many.
    pub max_degree: usize,
    /// Size of the dynamic candidate list during construction (efConstruction).
    pub beam_width: usize,
    /// Multiplier on `max_degree` tolerated during incremental construction
    /// before a neighbor list is pruned. Cleanup trims back to `max_degree`.
    pub neighbor_overflow: f32,
    /// Diversity factor for neighbor selection (>= 1.0; higher keeps more
    /// long-range edges).
    pub alpha: f32,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            max_degree: 16,
            beam_width: 100,
            neighbor_overflow: 1.2,
            alpha: 1.2,
        }
    }
}

impl HnswParams {
    /// Creates custom parameters.
    #[must_use]
    pub const fn custom(
        max_degree: usize,
        beam_width: usize,
        neighbor_overflow: f32,
        alpha: f32,
    ) -> Self {
        Self {
            max_degree,
            beam_width,
            neighbor_overflow,
            alpha,
        }
    }

    /// Neighbor list size that triggers pruning during construction.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn overflow_degree(&self, layer: usize) -> usize {
        // Reason: degrees are small (< 1024) and overflow is validated >= 1.0
        let base = self.degree_for_layer(layer);
        ((base as f32) * self.neighbor_overflow).ceil() as usize
    }

    /// Neighbor list size enforced by cleanup.
    #[must_use]
    pub fn degree_for_layer(&self, layer: usize) -> usize {
        if layer == 0 {
            self.max_degree * 2
        } else {
            self.max_degree
        }
    }
}

/// Search quality profile controlling the recall/latency tradeoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchQuality {
    /// Fast search with `ef_search=64`.
    Fast,
    /// Balanced search with `ef_search=128`.
    #[default]
    Balanced,
    /// Accurate search with `ef_search=256`.
    Accurate,
    /// High recall search with `ef_search=512`.
    HighRecall,
    /// Custom `ef_search` value.
    Custom(usize),
}

impl SearchQuality {
    /// Returns the `ef_search` value for this quality profile.
    #[must_use]
    pub fn ef_search(&self, k: usize) -> usize {
        match self {
            Self::Fast => 64.max(k.saturating_mul(2)),
            Self::Balanced => 128.max(k.saturating_mul(4)),
            Self::Accurate => 256.max(k.saturating_mul(8)),
            Self::HighRecall => 512.max(k.saturating_mul(16)),
            Self::Custom(ef) => (*ef).max(k),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hnsw_params_default() {
        let params = HnswParams::default();
        assert_eq!(params.max_degree, 16);
        assert_eq!(params.beam_width, 100);
    }

    #[test]
    fn test_layer_zero_doubles_degree() {
        let params = HnswParams::default();
        assert_eq!(params.degree_for_layer(0), 32);
        assert_eq!(params.degree_for_layer(3), 16);
    }

    #[test]
    fn test_overflow_degree_rounds_up() {
        let params = HnswParams::custom(10, 100, 1.25, 1.0);
        assert_eq!(params.overflow_degree(1), 13);
        assert_eq!(params.overflow_degree(0), 25);
    }

    #[test]
    fn test_search_quality_ef_search() {
        assert_eq!(SearchQuality::Fast.ef_search(10), 64);
        assert_eq!(SearchQuality::Balanced.ef_search(10), 128);
        assert_eq!(SearchQuality::Accurate.ef_search(10), 256);
        assert_eq!(SearchQuality::Custom(50).ef_search(10), 50);
        assert_eq!(SearchQuality::Custom(5).ef_search(10), 10);
    }

    #[test]
    fn test_ef_search_saturates_for_huge_k() {
        assert_eq!(SearchQuality::Fast.ef_search(usize::MAX), usize::MAX);
        assert_eq!(SearchQuality::HighRecall.ef_search(usize::MAX / 2), usize::MAX);
        assert_eq!(SearchQuality::Custom(64).ef_search(usize::MAX), usize::MAX);
    }
}
