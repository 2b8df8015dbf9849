//! Nearest-neighbor indexes and their common contract.
//!
//! Three interchangeable implementations: [`LinearIndex`] (exact scan),
//! [`IvfIndex`] (inverted file with k-means clustering) and [`NswIndex`]
//! (navigable small-world graph). The library coordinator talks to all of
//! them through [`VectorIndex`] and never cares which one it holds.

pub mod ivf;
pub mod linear;
pub mod nsw;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::value::{Metadata, Value};

pub use ivf::{IvfIndex, IvfParams};
pub use linear::LinearIndex;
pub use nsw::{NswIndex, NswParams};

/// Common contract implemented by every index.
///
/// The index owns the library's vector table: `chunk_id -> vector` plus the
/// metadata snapshot filters evaluate against. Queries never filter; they
/// return up to `k` candidates by descending cosine similarity with ties
/// broken by ascending id.
pub trait VectorIndex: Send + Sync {
    /// Insert a chunk. Re-adding an existing id removes the old entry first.
    fn add(&mut self, id: Uuid, vector: Vec<f32>, metadata: Metadata) -> Result<()>;

    /// Re-link a chunk in place. A new vector implies new topology; a
    /// metadata-only update refreshes the snapshot.
    fn update(&mut self, id: Uuid, vector: Option<Vec<f32>>, metadata: Option<Metadata>)
        -> Result<()>;

    /// Remove a chunk. Unknown ids are no-ops.
    fn remove(&mut self, id: Uuid);

    /// Consolidate the index. Callable repeatedly; a no-op for indexes that
    /// stay current incrementally.
    fn build(&mut self) -> Result<()>;

    /// Top-k candidates by descending similarity, ties by ascending id.
    fn query(&self, query: &[f32], k: usize) -> Vec<(Uuid, f32)>;

    /// Whether the chunk is anywhere in the searchable state.
    fn contains(&self, id: Uuid) -> bool;

    /// Metadata snapshot as of the chunk's last successful add/update.
    fn metadata(&self, id: Uuid) -> Option<&Metadata>;

    /// Stored vector for a chunk.
    fn vector(&self, id: Uuid) -> Option<&[f32]>;

    /// Vector dimension, fixed by the first insert.
    fn dimension(&self) -> Option<usize>;

    /// Number of chunks in the searchable state.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Introspection snapshot.
    fn stats(&self) -> IndexStats;
}

/// Statistics about an index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub kind: IndexKind,
    pub num_vectors: usize,
    pub dimension: Option<usize>,
    /// Chunks staged but not yet clustered (IVF only).
    pub pending: usize,
    /// Trained centroids (IVF only; zero before the first build).
    pub clusters: usize,
}

/// The index algorithm a library was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Linear,
    Ivf,
    Nsw,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Linear => write!(f, "linear"),
            IndexKind::Ivf => write!(f, "ivf"),
            IndexKind::Nsw => write!(f, "nsw"),
        }
    }
}

impl FromStr for IndexKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(IndexKind::Linear),
            "ivf" => Ok(IndexKind::Ivf),
            "nsw" => Ok(IndexKind::Nsw),
            other => Err(StoreError::InvalidRequest(format!(
                "unsupported index kind: {other}"
            ))),
        }
    }
}

/// Build an index instance for a library. Unknown parameter keys are
/// ignored; wrongly typed ones are rejected.
pub fn create_index(kind: IndexKind, params: &Metadata) -> Result<Box<dyn VectorIndex>> {
    match kind {
        IndexKind::Linear => Ok(Box::new(LinearIndex::new())),
        IndexKind::Ivf => Ok(Box::new(IvfIndex::new(IvfParams::from_metadata(params)?))),
        IndexKind::Nsw => Ok(Box::new(NswIndex::new(NswParams::from_metadata(params)?))),
    }
}

pub(crate) fn param_usize(params: &Metadata, key: &str) -> Result<Option<usize>> {
    match params.get(key) {
        None => Ok(None),
        Some(Value::Number(n)) if n.fract() == 0.0 && *n >= 0.0 => Ok(Some(*n as usize)),
        Some(other) => Err(StoreError::InvalidRequest(format!(
            "index param `{key}` must be a non-negative integer, got {other:?}"
        ))),
    }
}

pub(crate) fn param_u64(params: &Metadata, key: &str) -> Result<Option<u64>> {
    Ok(param_usize(params, key)?.map(|n| n as u64))
}

pub(crate) fn param_f32(params: &Metadata, key: &str) -> Result<Option<f32>> {
    match params.get(key) {
        None => Ok(None),
        Some(Value::Number(n)) if n.is_finite() => Ok(Some(*n as f32)),
        Some(other) => Err(StoreError::InvalidRequest(format!(
            "index param `{key}` must be a finite number, got {other:?}"
        ))),
    }
}
