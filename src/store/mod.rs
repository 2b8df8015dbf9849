//! The store: entity registries and the per-library coordinator.
//!
//! One registry per entity kind (libraries, documents, chunks), each behind
//! its own mutex with short critical sections for identity and parent
//! lookups only. The searchable state of a library lives in a
//! [`LibraryHandle`] behind a reader/writer lock; libraries never share a
//! lock, so traffic on one library cannot stall another.
//!
//! Lock discipline: a registry mutex is never held while acquiring a library
//! state lock. The reverse nesting (state lock, then a registry mutex) is
//! allowed and used by chunk mutations.

mod library;
mod models;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::embed::Embedder;
use crate::error::{Result, StoreError};
use crate::filter::{Filter, FilterSpec};
use crate::index::{create_index, IndexKind, IndexStats};
use crate::similarity::l2_normalize;
use crate::value::{Metadata, Value};

use library::LibraryHandle;

pub use models::{BuildReport, Chunk, Document, Library, SearchResponse, SearchResult};

struct LibraryEntry {
    info: Library,
    handle: Arc<LibraryHandle>,
}

/// In-memory vector store: registries plus one index per library.
pub struct VectorStore {
    embedder: Arc<dyn Embedder>,
    libraries: Mutex<BTreeMap<Uuid, LibraryEntry>>,
    documents: Mutex<BTreeMap<Uuid, Document>>,
    chunks: Mutex<BTreeMap<Uuid, Chunk>>,
}

impl VectorStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            libraries: Mutex::new(BTreeMap::new()),
            documents: Mutex::new(BTreeMap::new()),
            chunks: Mutex::new(BTreeMap::new()),
        }
    }

    fn handle(&self, library_id: Uuid) -> Result<Arc<LibraryHandle>> {
        self.libraries
            .lock()
            .get(&library_id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| StoreError::NotFound(format!("library {library_id}")))
    }

    /// Embed and normalize outside any library lock.
    fn embed_unit(&self, text: &str) -> Result<Vec<f32>> {
        l2_normalize(self.embedder.embed(text)?)
    }

    // ── Libraries ───────────────────────────────────────────────────────

    pub fn create_library(
        &self,
        name: &str,
        index_kind: IndexKind,
        index_params: Option<Metadata>,
        metadata: Option<Metadata>,
    ) -> Result<Library> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidRequest(
                "library name must not be empty".to_string(),
            ));
        }
        let index_params = index_params.unwrap_or_default();
        let index = create_index(index_kind, &index_params)?;

        let library = Library::new(
            name.to_string(),
            index_kind,
            index_params,
            metadata.unwrap_or_default(),
        );
        info!(library = %library.id, kind = %index_kind, "library created");

        self.libraries.lock().insert(
            library.id,
            LibraryEntry {
                info: library.clone(),
                handle: Arc::new(LibraryHandle::new(index)),
            },
        );
        Ok(library)
    }

    pub fn get_library(&self, library_id: Uuid) -> Result<Library> {
        self.libraries
            .lock()
            .get(&library_id)
            .map(|entry| entry.info.clone())
            .ok_or_else(|| StoreError::NotFound(format!("library {library_id}")))
    }

    /// All libraries in stable id order.
    pub fn list_libraries(&self) -> Vec<Library> {
        self.libraries
            .lock()
            .values()
            .map(|entry| entry.info.clone())
            .collect()
    }

    pub fn update_library(
        &self,
        library_id: Uuid,
        name: Option<&str>,
        metadata: Option<Metadata>,
    ) -> Result<Library> {
        if name.is_none() && metadata.is_none() {
            return Err(StoreError::InvalidRequest(
                "empty update patch".to_string(),
            ));
        }
        if name.is_some_and(|n| n.trim().is_empty()) {
            return Err(StoreError::InvalidRequest(
                "library name must not be empty".to_string(),
            ));
        }

        let mut libraries = self.libraries.lock();
        let entry = libraries
            .get_mut(&library_id)
            .ok_or_else(|| StoreError::NotFound(format!("library {library_id}")))?;
        if let Some(name) = name {
            entry.info.name = name.to_string();
        }
        if let Some(metadata) = metadata {
            entry.info.metadata = metadata;
        }
        Ok(entry.info.clone())
    }

    /// Destroy a library, its documents, chunks and index. Idempotent.
    pub fn delete_library(&self, library_id: Uuid) -> Result<()> {
        let Some(entry) = self.libraries.lock().remove(&library_id) else {
            return Ok(());
        };

        let mut chunk_ids = Vec::new();
        {
            let mut documents = self.documents.lock();
            for doc_id in &entry.info.documents {
                if let Some(document) = documents.remove(doc_id) {
                    chunk_ids.extend(document.chunks);
                }
            }
        }
        {
            let mut chunks = self.chunks.lock();
            for chunk_id in &chunk_ids {
                chunks.remove(chunk_id);
            }
        }
        info!(library = %library_id, chunks = chunk_ids.len(), "library deleted");
        Ok(())
    }

    // ── Documents ───────────────────────────────────────────────────────

    pub fn create_document(
        &self,
        library_id: Uuid,
        metadata: Option<Metadata>,
    ) -> Result<Document> {
        let document = Document::new(library_id, metadata.unwrap_or_default());
        {
            let mut libraries = self.libraries.lock();
            let entry = libraries
                .get_mut(&library_id)
                .ok_or_else(|| StoreError::NotFound(format!("library {library_id}")))?;
            entry.info.documents.insert(document.id);
        }
        self.documents.lock().insert(document.id, document.clone());
        Ok(document)
    }

    pub fn get_document(&self, document_id: Uuid, library_id: Uuid) -> Result<Document> {
        self.documents
            .lock()
            .get(&document_id)
            .filter(|d| d.library_id == library_id)
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "document {document_id} in library {library_id}"
                ))
            })
    }

    pub fn update_document_metadata(
        &self,
        document_id: Uuid,
        library_id: Uuid,
        metadata: Metadata,
    ) -> Result<Document> {
        let mut documents = self.documents.lock();
        let document = documents
            .get_mut(&document_id)
            .filter(|d| d.library_id == library_id)
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "document {document_id} in library {library_id}"
                ))
            })?;
        document.metadata = metadata;
        Ok(document.clone())
    }

    /// Destroy a document and cascade to its chunks. Idempotent.
    pub fn delete_document(&self, document_id: Uuid, library_id: Uuid) -> Result<()> {
        let handle = self.handle(library_id)?;
        let Some(document) = self
            .documents
            .lock()
            .get(&document_id)
            .filter(|d| d.library_id == library_id)
            .cloned()
        else {
            return Ok(());
        };

        {
            let mut state = handle.state.write();
            for chunk_id in &document.chunks {
                state.index.remove(*chunk_id);
            }
        }
        {
            let mut chunks = self.chunks.lock();
            for chunk_id in &document.chunks {
                chunks.remove(chunk_id);
            }
        }
        self.documents.lock().remove(&document_id);
        if let Some(entry) = self.libraries.lock().get_mut(&library_id) {
            entry.info.documents.remove(&document_id);
        }
        debug!(document = %document_id, chunks = document.chunks.len(), "document deleted");
        Ok(())
    }

    // ── Chunks ──────────────────────────────────────────────────────────

    pub fn create_chunk(
        &self,
        library_id: Uuid,
        text: &str,
        metadata: Option<Metadata>,
        document_id: Option<Uuid>,
        document_metadata: Option<Metadata>,
    ) -> Result<Chunk> {
        if text.trim().is_empty() {
            return Err(StoreError::InvalidRequest(
                "chunk text must not be empty".to_string(),
            ));
        }
        let handle = self.handle(library_id)?;
        if let Some(doc_id) = document_id {
            // Fail before paying for the embedding.
            self.get_document(doc_id, library_id)?;
        }

        let vector = self.embed_unit(text)?;

        let mut state = handle.state.write();
        if let Some(dim) = state.index.dimension() {
            if dim != vector.len() {
                return Err(StoreError::DimensionMismatch {
                    expected: dim,
                    got: vector.len(),
                });
            }
        }

        let (document_id, auto_created) = match document_id {
            Some(doc_id) => {
                // Revalidate under the write lock; the document may have
                // been deleted while we were embedding.
                self.get_document(doc_id, library_id)?;
                (doc_id, false)
            }
            None => {
                let document =
                    Document::new(library_id, document_metadata.unwrap_or_default());
                let doc_id = document.id;
                {
                    let mut libraries = self.libraries.lock();
                    let entry = libraries
                        .get_mut(&library_id)
                        .ok_or_else(|| StoreError::NotFound(format!("library {library_id}")))?;
                    entry.info.documents.insert(doc_id);
                }
                self.documents.lock().insert(doc_id, document);
                (doc_id, true)
            }
        };

        let chunk = Chunk::new(
            library_id,
            document_id,
            text.to_string(),
            metadata.unwrap_or_default(),
        );
        if let Err(e) = state.index.add(chunk.id, vector, index_snapshot(&chunk)) {
            if auto_created {
                self.documents.lock().remove(&document_id);
                if let Some(entry) = self.libraries.lock().get_mut(&library_id) {
                    entry.info.documents.remove(&document_id);
                }
            }
            return Err(e);
        }

        if let Some(document) = self.documents.lock().get_mut(&document_id) {
            document.chunks.insert(chunk.id);
        }
        self.chunks.lock().insert(chunk.id, chunk.clone());
        Ok(chunk)
    }

    pub fn get_chunk(&self, chunk_id: Uuid, library_id: Uuid) -> Result<Chunk> {
        self.chunks
            .lock()
            .get(&chunk_id)
            .filter(|c| c.library_id == library_id)
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound(format!("chunk {chunk_id} in library {library_id}"))
            })
    }

    pub fn update_chunk(
        &self,
        chunk_id: Uuid,
        library_id: Uuid,
        text: Option<&str>,
        metadata: Option<Metadata>,
    ) -> Result<Chunk> {
        if text.is_none() && metadata.is_none() {
            return Err(StoreError::InvalidRequest(
                "empty update patch".to_string(),
            ));
        }
        if text.is_some_and(|t| t.trim().is_empty()) {
            return Err(StoreError::InvalidRequest(
                "chunk text must not be empty".to_string(),
            ));
        }

        let handle = self.handle(library_id)?;
        let existing = self.get_chunk(chunk_id, library_id)?;

        // Identical text is not a content change; skip the re-embed and
        // leave the index topology untouched.
        let vector = match text {
            Some(t) if t != existing.text => Some(self.embed_unit(t)?),
            _ => None,
        };

        let mut updated = existing;
        if let Some(t) = text {
            updated.text = t.to_string();
        }
        let metadata_changed = metadata.is_some();
        if let Some(m) = metadata {
            updated.metadata = m;
        }

        let mut state = handle.state.write();
        if vector.is_some() || metadata_changed {
            let snapshot = metadata_changed.then(|| index_snapshot(&updated));
            state.index.update(chunk_id, vector, snapshot)?;
        }
        drop(state);

        self.chunks.lock().insert(chunk_id, updated.clone());
        Ok(updated)
    }

    /// Remove a chunk from the index, the tables and its parent document.
    /// Unknown ids are idempotent no-ops.
    pub fn delete_chunk(&self, chunk_id: Uuid, library_id: Uuid) -> Result<()> {
        let handle = self.handle(library_id)?;
        let Some(chunk) = self
            .chunks
            .lock()
            .get(&chunk_id)
            .filter(|c| c.library_id == library_id)
            .cloned()
        else {
            return Ok(());
        };

        handle.state.write().index.remove(chunk_id);
        if let Some(document) = self.documents.lock().get_mut(&chunk.document_id) {
            document.chunks.remove(&chunk_id);
        }
        self.chunks.lock().remove(&chunk_id);
        Ok(())
    }

    // ── Index and search ────────────────────────────────────────────────

    pub fn build_index(&self, library_id: Uuid) -> Result<BuildReport> {
        let handle = self.handle(library_id)?;
        let mut state = handle.state.write();
        state.index.build()?;
        let now = Utc::now();
        state.last_built_at = Some(now);
        Ok(BuildReport {
            library_id,
            message: "index built".to_string(),
            last_built_at: now,
        })
    }

    pub fn index_stats(&self, library_id: Uuid) -> Result<IndexStats> {
        let handle = self.handle(library_id)?;
        let state = handle.state.read();
        Ok(state.index.stats())
    }

    pub fn search(
        &self,
        library_id: Uuid,
        query: &str,
        k: usize,
        filters: Option<&FilterSpec>,
    ) -> Result<SearchResponse> {
        if k < 1 {
            return Err(StoreError::InvalidRequest(
                "k must be at least 1".to_string(),
            ));
        }
        let filter = match filters {
            Some(spec) => Filter::compile(spec)?,
            None => Filter::universal(),
        };
        let handle = self.handle(library_id)?;
        let vector = self.embed_unit(query)?;

        let hits = {
            let state = handle.state.read();
            state.filtered_query(&vector, k, &filter)
        };

        let chunks = self.chunks.lock();
        let results = hits
            .into_iter()
            .filter_map(|(chunk_id, score)| {
                chunks.get(&chunk_id).map(|chunk| SearchResult {
                    chunk_id,
                    score,
                    chunk: chunk.clone(),
                })
            })
            .collect();

        Ok(SearchResponse {
            library_id,
            query: query.to_string(),
            k,
            filters: filters.cloned(),
            results,
        })
    }
}

/// The metadata snapshot an index keeps for filtering: the chunk's own
/// metadata plus its parent ids, so filters can target `document_id` and
/// `library_id` like any other field.
fn index_snapshot(chunk: &Chunk) -> Metadata {
    let mut snapshot = chunk.metadata.clone();
    snapshot.insert(
        "document_id".to_string(),
        Value::String(chunk.document_id.to_string()),
    );
    snapshot.insert(
        "library_id".to_string(),
        Value::String(chunk.library_id.to_string()),
    );
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic embedder: hashes text into a fixed-dimension unit
    /// vector, so equal texts collide exactly and search is reproducible.
    struct HashEmbedder {
        dimension: usize,
    }

    impl Embedder for HashEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut seed = 0xcbf2_9ce4_8422_2325u64;
            for b in text.bytes() {
                seed ^= b as u64;
                seed = seed.wrapping_mul(0x0000_0100_0000_01b3);
            }
            let v: Vec<f32> = (0..self.dimension)
                .map(|i| {
                    let mut x = seed.wrapping_add((i as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15));
                    x ^= x >> 33;
                    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
                    x ^= x >> 33;
                    (x as f64 / u64::MAX as f64 * 2.0 - 1.0) as f32
                })
                .collect();
            l2_normalize(v)
        }
    }

    fn store() -> VectorStore {
        VectorStore::new(Arc::new(HashEmbedder { dimension: 8 }))
    }

    #[test]
    fn create_and_search_round_trip() {
        let store = store();
        let lib = store
            .create_library("docs", IndexKind::Linear, None, None)
            .unwrap();
        let chunk = store
            .create_chunk(lib.id, "hello world", None, None, None)
            .unwrap();

        let response = store.search(lib.id, "hello world", 1, None).unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].chunk_id, chunk.id);
        assert!((response.results[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_name_and_zero_k_are_invalid() {
        let store = store();
        assert!(matches!(
            store.create_library("  ", IndexKind::Linear, None, None),
            Err(StoreError::InvalidRequest(_))
        ));
        let lib = store
            .create_library("docs", IndexKind::Linear, None, None)
            .unwrap();
        assert!(matches!(
            store.search(lib.id, "q", 0, None),
            Err(StoreError::InvalidRequest(_))
        ));
    }

    #[test]
    fn empty_update_patches_are_rejected() {
        let store = store();
        let lib = store
            .create_library("docs", IndexKind::Linear, None, None)
            .unwrap();
        let chunk = store
            .create_chunk(lib.id, "alpha", None, None, None)
            .unwrap();
        assert!(matches!(
            store.update_chunk(chunk.id, lib.id, None, None),
            Err(StoreError::InvalidRequest(_))
        ));
        assert!(matches!(
            store.update_library(lib.id, None, None),
            Err(StoreError::InvalidRequest(_))
        ));
    }

    #[test]
    fn delete_of_absent_ids_is_idempotent_success() {
        let store = store();
        let lib = store
            .create_library("docs", IndexKind::Linear, None, None)
            .unwrap();
        assert!(store.delete_chunk(Uuid::new_v4(), lib.id).is_ok());
        assert!(store.delete_document(Uuid::new_v4(), lib.id).is_ok());
        assert!(store.delete_library(Uuid::new_v4()).is_ok());
    }

    #[test]
    fn snapshot_carries_parent_ids() {
        let store = store();
        let lib = store
            .create_library("docs", IndexKind::Linear, None, None)
            .unwrap();
        let chunk = store
            .create_chunk(lib.id, "alpha", None, None, None)
            .unwrap();

        let spec: FilterSpec = serde_json::json!({
            "document_id": chunk.document_id.to_string()
        })
        .as_object()
        .unwrap()
        .clone();
        let response = store.search(lib.id, "alpha", 1, Some(&spec)).unwrap();
        assert_eq!(response.results.len(), 1);
    }
}
