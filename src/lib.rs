//! engys: the indexing and search core of a small vector database.
//!
//! Given a stream of text chunks with metadata, engys maintains one of three
//! interchangeable nearest-neighbor indexes per library and answers top-k
//! cosine queries subject to metadata predicates:
//!
//! - **Exact**: [`index::LinearIndex`] — brute-force scan, the ground truth
//! - **Partition-based**: [`index::IvfIndex`] — k-means inverted lists with
//!   an unclustered buffer between builds
//! - **Graph-based**: [`index::NswIndex`] — incremental navigable
//!   small-world graph
//!
//! # Which Index Should I Use?
//!
//! | Situation | Recommendation |
//! |-----------|----------------|
//! | Small libraries (< 10K chunks) | [`index::LinearIndex`] |
//! | Batch-loaded corpora, explicit rebuilds are fine | [`index::IvfIndex`] |
//! | Continuous inserts, no rebuild window | [`index::NswIndex`] |
//!
//! The [`store::VectorStore`] coordinator owns the library/document/chunk
//! registries, routes CRUD to the right index, and runs the search pipeline:
//! embed outside the lock, over-fetch, post-filter, expand when a filter
//! starves the result set.
//!
//! ```rust
//! use std::sync::Arc;
//! use engys::embed::Embedder;
//! use engys::error::Result;
//! use engys::index::IndexKind;
//! use engys::similarity::l2_normalize;
//! use engys::store::VectorStore;
//!
//! struct ToyEmbedder;
//!
//! impl Embedder for ToyEmbedder {
//!     fn embed(&self, text: &str) -> Result<Vec<f32>> {
//!         let b = text.bytes().fold(7u32, |acc, x| acc.wrapping_mul(31).wrapping_add(x as u32));
//!         l2_normalize(vec![b as f32 % 97.0 + 1.0, b as f32 % 89.0 + 1.0])
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! let store = VectorStore::new(Arc::new(ToyEmbedder));
//! let library = store.create_library("notes", IndexKind::Linear, None, None)?;
//! store.create_chunk(library.id, "small worlds", None, None, None)?;
//! let hits = store.search(library.id, "small worlds", 1, None)?;
//! assert_eq!(hits.results.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! Parallel threads with shared memory. Each library has a reader/writer
//! lock: searches share it, mutations serialize on it, and libraries never
//! share locks with each other. Embedding calls may block on network I/O
//! and therefore always run before a lock is taken.

pub mod embed;
pub mod error;
pub mod filter;
pub mod index;
pub mod kmeans;
pub mod similarity;
pub mod store;
pub mod value;

// Re-exports
pub use error::{Result, StoreError};
pub use index::{IndexKind, VectorIndex};
pub use store::VectorStore;
