//! Domain models: library, document, chunk, and the typed search surface.
//!
//! Ownership is modelled as id-keyed maps with child sets on the parent; a
//! child stores its parent's id as a value, never a reference. Child sets
//! are `BTreeSet`s so listings iterate in a stable order.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::filter::FilterSpec;
use crate::index::IndexKind;
use crate::value::Metadata;

/// A named collection with one index; the unit of isolation and concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    pub id: Uuid,
    pub name: String,
    pub index_kind: IndexKind,
    /// Immutable after creation; consumed by the index factory.
    pub index_params: Metadata,
    pub documents: BTreeSet<Uuid>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl Library {
    pub(crate) fn new(
        name: String,
        index_kind: IndexKind,
        index_params: Metadata,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            index_kind,
            index_params,
            documents: BTreeSet::new(),
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// A grouping of chunks under one library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub library_id: Uuid,
    pub chunks: BTreeSet<Uuid>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub(crate) fn new(library_id: Uuid, metadata: Metadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            library_id,
            chunks: BTreeSet::new(),
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// A text unit with metadata and an embedding; the atomic search target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub library_id: Uuid,
    pub text: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    pub(crate) fn new(
        library_id: Uuid,
        document_id: Uuid,
        text: String,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            library_id,
            text,
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of an explicit index build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub library_id: Uuid,
    pub message: String,
    pub last_built_at: DateTime<Utc>,
}

/// One search hit: score plus the chunk snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: Uuid,
    pub score: f32,
    pub chunk: Chunk,
}

/// Full search answer, echoing the query parameters.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub library_id: Uuid,
    pub query: String,
    pub k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterSpec>,
    pub results: Vec<SearchResult>,
}
