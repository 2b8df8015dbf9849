//! Error types for engys.

use thiserror::Error;

/// Errors that can occur during store, index or search operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Requested entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Unique constraint violated on create.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Malformed command (empty patch, k < 1, bad index params, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Filter spec failed to compile (unknown operator, malformed operand).
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// Zero-norm or non-finite embedding.
    #[error("invalid vector: {0}")]
    InvalidVector(String),

    /// New vector dimension disagrees with the library's dimension.
    #[error("dimension mismatch: library has {expected} dimensions, vector has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// The external embedding provider failed.
    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),

    /// Startup configuration problem (missing credential, ...).
    #[error("configuration error: {0}")]
    Config(String),

    /// Invariant violation; a bug if it ever surfaces.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// HTTP status the boundary layer should map this kind to.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            StoreError::NotFound(_) => 404,
            StoreError::AlreadyExists(_) => 409,
            StoreError::InvalidRequest(_) | StoreError::InvalidFilter(_) => 400,
            StoreError::InvalidVector(_) | StoreError::DimensionMismatch { .. } => 422,
            StoreError::EmbeddingFailure(_) => 502,
            StoreError::Config(_) | StoreError::Internal(_) => 500,
        }
    }
}

/// Result type alias for engys operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_boundary_contract() {
        assert_eq!(StoreError::NotFound("library".into()).status_code(), 404);
        assert_eq!(StoreError::InvalidFilter("bad op".into()).status_code(), 400);
        assert_eq!(
            StoreError::DimensionMismatch { expected: 4, got: 3 }.status_code(),
            422
        );
        assert_eq!(
            StoreError::EmbeddingFailure("timeout".into()).status_code(),
            502
        );
    }
}
