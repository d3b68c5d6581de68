//! Error types for vindex.

use thiserror::Error;

/// Vector index error types.
#[derive(Error, Debug)]
pub enum Error {
    /// A vector (query or vectorizer output) does not match the configured dimension.
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Dimension actually supplied.
        actual: usize,
    },

    /// The vectorizer produced no vector for an entity.
    #[error("Vectorizer returned no vector for entity {entity_id}")]
    NullVector {
        /// Id of the entity that failed to vectorize.
        entity_id: u64,
    },

    /// Entity id does not fit in a 31-bit graph ordinal.
    #[error("Entity id {0} exceeds the maximum graph ordinal ({max})", max = i32::MAX)]
    OrdinalOverflow(u64),

    /// Index name is not usable as a file name prefix.
    #[error("Invalid index name '{0}': must be a non-empty file name segment")]
    InvalidIndexName(String),

    /// An index with this name is already registered.
    #[error("Vector index '{0}' already exists")]
    IndexAlreadyExists(String),

    /// No index with this name is registered.
    #[error("Vector index '{0}' not found")]
    IndexNotFound(String),

    /// Configuration validation or loading failure.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation on an index that has been closed.
    #[error("Vector index '{0}' is closed")]
    IndexClosed(String),

    /// On-disk graph data failed validation.
    #[error("Corrupt index file: {0}")]
    CorruptIndex(String),

    /// Product quantization training or encoding failure.
    #[error("Quantization error: {0}")]
    Quantization(String),

    /// Persistent state could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Background worker could not be reached.
    #[error("Background worker error: {0}")]
    Worker(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type alias for vector index operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::DimensionMismatch {
            expected: 128,
            actual: 64,
        };
        assert_eq!(
            err.to_string(),
            "Vector dimension mismatch: expected 128, got 64"
        );
    }

    #[test]
    fn test_ordinal_overflow_mentions_ceiling() {
        let err = Error::OrdinalOverflow(u64::from(u32::MAX));
        assert!(err.to_string().contains("2147483647"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
