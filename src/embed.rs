//! Embedding provider contract.
//!
//! The core never talks to a model itself; it consumes an [`Embedder`] the
//! environment supplies. The contract: `embed` turns text into a unit-norm
//! vector of a fixed dimension, is safe to call from many threads, and may
//! block on network I/O, so callers must invoke it outside any library lock.

use crate::error::{Result, StoreError};

/// Environment variable holding the embedding provider credential.
pub const API_KEY_ENV: &str = "COHERE_API_KEY";

/// Output dimensions supported by the provider.
pub const VALID_DIMENSIONS: [usize; 4] = [256, 512, 1024, 1536];

const DEFAULT_MODEL: &str = "embed-v4.0";
const DEFAULT_DIMENSION: usize = 1024;

/// Turns text into fixed-dimension unit-norm vectors.
pub trait Embedder: Send + Sync {
    /// Embed a single text. Failures surface as `EmbeddingFailure`.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch; the default loops over [`Embedder::embed`].
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Provider configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    pub api_key: String,
    pub model: String,
    pub dimension: usize,
}

impl EmbedderConfig {
    /// Read the provider credential from the environment.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| StoreError::Config(format!("{API_KEY_ENV} is not set")))?;
        Ok(Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            dimension: DEFAULT_DIMENSION,
        })
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Select an output dimension the provider supports.
    pub fn with_dimension(mut self, dimension: usize) -> Result<Self> {
        if !VALID_DIMENSIONS.contains(&dimension) {
            return Err(StoreError::Config(format!(
                "invalid embedding dimension {dimension}, valid: {VALID_DIMENSIONS:?}"
            )));
        }
        self.dimension = dimension;
        Ok(self)
    }
}
