//! Vector index configuration.
//!
//! [`VectorIndexConfig`] is an immutable value object. It is produced either by
//! [`VectorIndexConfig::builder`] or by layered loading with figment
//! (defaults → TOML file → `VINDEX_` environment variables); both paths end in
//! the same validation.
//!
//! # Example
//!
//! ```rust
//! use vindex_core::{DistanceMetric, VectorIndexConfig};
//!
//! let config = VectorIndexConfig::builder(384)
//!     .metric(DistanceMetric::Cosine)
//!     .max_degree(24)
//!     .eventual_indexing(true)
//!     .build()
//!     .expect("valid config");
//! assert_eq!(config.hnsw.max_degree, 24);
//! ```

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::index::hnsw::{HnswParams, SearchQuality, PQ_MAX_DEGREE};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "VINDEX_";

/// Complete configuration of one vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorIndexConfig {
    /// Vector dimension.
    pub dimension: usize,
    /// Similarity function.
    pub metric: DistanceMetric,
    /// Graph construction parameters.
    pub hnsw: HnswParams,
    /// Beam width profile for queries.
    pub search_quality: SearchQuality,
    /// Persist the graph to `index_directory`.
    pub on_disk: bool,
    /// Directory holding `{name}.graph` and `{name}.meta`.
    pub index_directory: Option<PathBuf>,
    /// Enable product quantization (requires `on_disk`).
    pub pq_enabled: bool,
    /// PQ subspace count; `None` means `dimension / 4`.
    pub pq_subspaces: Option<usize>,
    /// Background persistence tick in milliseconds (0 disables).
    pub persistence_interval_ms: u64,
    /// Changes required before a persistence tick writes.
    pub persistence_threshold: u64,
    /// Persist pending changes when the index closes.
    pub persist_on_shutdown: bool,
    /// Background optimization tick in milliseconds (0 disables).
    pub optimization_interval_ms: u64,
    /// Changes required before an optimization tick runs cleanup.
    pub optimization_threshold: u64,
    /// Run cleanup on pending changes when the index closes.
    pub optimize_on_shutdown: bool,
    /// Defer graph mutations to the background worker.
    pub eventual_indexing: bool,
    /// Encode disk records in parallel.
    pub parallel_disk_write: bool,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            dimension: 0,
            metric: DistanceMetric::default(),
            hnsw: HnswParams::default(),
            search_quality: SearchQuality::default(),
            on_disk: false,
            index_directory: None,
            pq_enabled: false,
            pq_subspaces: None,
            persistence_interval_ms: 0,
            persistence_threshold: 1000,
            persist_on_shutdown: true,
            optimization_interval_ms: 0,
            optimization_threshold: 1000,
            optimize_on_shutdown: true,
            eventual_indexing: false,
            parallel_disk_write: false,
        }
    }
}

impl VectorIndexConfig {
    /// Starts a builder for the given dimension.
    #[must_use]
    pub fn builder(dimension: usize) -> VectorIndexConfigBuilder {
        VectorIndexConfigBuilder {
            config: Self {
                dimension,
                ..Self::default()
            },
        }
    }

    /// Loads configuration from a TOML file with `VINDEX_` environment overrides.
    ///
    /// Nested keys use a double underscore, e.g. `VINDEX_HNSW__MAX_DEGREE=32`.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validated()
    }

    /// Parses configuration from a TOML string (no environment overrides).
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml))
            .extract()?;
        config.validated()
    }

    /// Applies the derived settings and validates the result.
    fn validated(mut self) -> Result<Self> {
        if self.pq_enabled {
            self.hnsw.max_degree = PQ_MAX_DEGREE;
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks every cross-field constraint.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::Config("dimension must be greater than 0".into()));
        }
        if self.hnsw.max_degree < 2 {
            return Err(Error::Config("max_degree must be at least 2".into()));
        }
        if self.hnsw.beam_width == 0 {
            return Err(Error::Config("beam_width must be at least 1".into()));
        }
        if self.hnsw.neighbor_overflow.is_nan() || self.hnsw.neighbor_overflow < 1.0 {
            return Err(Error::Config("neighbor_overflow must be >= 1.0".into()));
        }
        if self.hnsw.alpha.is_nan() || self.hnsw.alpha < 1.0 {
            return Err(Error::Config("alpha must be >= 1.0".into()));
        }
        if self.on_disk && self.index_directory.is_none() {
            return Err(Error::Config(
                "on_disk requires an index_directory".into(),
            ));
        }
        if self.pq_enabled {
            if !self.on_disk {
                return Err(Error::Config(
                    "PQ compression requires on_disk mode".into(),
                ));
            }
            if self.hnsw.max_degree != PQ_MAX_DEGREE {
                return Err(Error::Config(format!(
                    "PQ compression requires max_degree {PQ_MAX_DEGREE}"
                )));
            }
            let subspaces = self.pq_subspace_count();
            if subspaces == 0 || self.dimension % subspaces != 0 {
                return Err(Error::Config(format!(
                    "PQ subspace count {subspaces} must evenly divide dimension {}",
                    self.dimension
                )));
            }
        }
        if self.persistence_interval_ms > 0 && !self.on_disk {
            return Err(Error::Config(
                "background persistence requires on_disk mode".into(),
            ));
        }
        Ok(())
    }

    /// Effective PQ subspace count.
    #[must_use]
    pub fn pq_subspace_count(&self) -> usize {
        self.pq_subspaces.unwrap_or((self.dimension / 4).max(1))
    }

    /// Background persistence interval, if enabled.
    #[must_use]
    pub fn persistence_interval(&self) -> Option<Duration> {
        (self.persistence_interval_ms > 0)
            .then(|| Duration::from_millis(self.persistence_interval_ms))
    }

    /// Background optimization interval, if enabled.
    #[must_use]
    pub fn optimization_interval(&self) -> Option<Duration> {
        (self.optimization_interval_ms > 0)
            .then(|| Duration::from_millis(self.optimization_interval_ms))
    }
}

/// Builder for [`VectorIndexConfig`].
#[derive(Debug, Clone)]
#[must_use]
pub struct VectorIndexConfigBuilder {
    config: VectorIndexConfig,
}

impl VectorIndexConfigBuilder {
    /// Sets the similarity function.
    pub fn metric(mut self, metric: DistanceMetric) -> Self {
        self.config.metric = metric;
        self
    }

    /// Sets all graph construction parameters at once.
    pub fn hnsw(mut self, params: HnswParams) -> Self {
        self.config.hnsw = params;
        self
    }

    /// Sets the maximum node degree (M).
    pub fn max_degree(mut self, max_degree: usize) -> Self {
        self.config.hnsw.max_degree = max_degree;
        self
    }

    /// Sets the construction beam width (efConstruction).
    pub fn beam_width(mut self, beam_width: usize) -> Self {
        self.config.hnsw.beam_width = beam_width;
        self
    }

    /// Sets the neighbor overflow factor.
    pub fn neighbor_overflow(mut self, overflow: f32) -> Self {
        self.config.hnsw.neighbor_overflow = overflow;
        self
    }

    /// Sets the diversity factor.
    pub fn alpha(mut self, alpha: f32) -> Self {
        self.config.hnsw.alpha = alpha;
        self
    }

    /// Sets the query beam width profile.
    pub fn search_quality(mut self, quality: SearchQuality) -> Self {
        self.config.search_quality = quality;
        self
    }

    /// Enables on-disk persistence in `directory`.
    pub fn on_disk(mut self, directory: impl Into<PathBuf>) -> Self {
        self.config.on_disk = true;
        self.config.index_directory = Some(directory.into());
        self
    }

    /// Enables product quantization with an optional subspace count.
    pub fn pq_compression(mut self, subspaces: Option<usize>) -> Self {
        self.config.pq_enabled = true;
        self.config.pq_subspaces = subspaces;
        self
    }

    /// Configures background persistence.
    pub fn background_persistence(mut self, interval: Duration, threshold: u64) -> Self {
        self.config.persistence_interval_ms = duration_millis(interval);
        self.config.persistence_threshold = threshold;
        self
    }

    /// Configures background optimization.
    pub fn background_optimization(mut self, interval: Duration, threshold: u64) -> Self {
        self.config.optimization_interval_ms = duration_millis(interval);
        self.config.optimization_threshold = threshold;
        self
    }

    /// Persist pending changes on close.
    pub fn persist_on_shutdown(mut self, enabled: bool) -> Self {
        self.config.persist_on_shutdown = enabled;
        self
    }

    /// Optimize pending changes on close.
    pub fn optimize_on_shutdown(mut self, enabled: bool) -> Self {
        self.config.optimize_on_shutdown = enabled;
        self
    }

    /// Defers graph mutations to the background worker.
    pub fn eventual_indexing(mut self, enabled: bool) -> Self {
        self.config.eventual_indexing = enabled;
        self
    }

    /// Encodes disk records in parallel.
    pub fn parallel_disk_write(mut self, enabled: bool) -> Self {
        self.config.parallel_disk_write = enabled;
        self
    }

    /// Validates and returns the configuration.
    ///
    /// Enabling PQ forces `max_degree` to [`PQ_MAX_DEGREE`].
    pub fn build(self) -> Result<VectorIndexConfig> {
        self.config.validated()
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
