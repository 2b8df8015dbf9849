//! Shared test fixtures.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use engys::embed::Embedder;
use engys::error::{Result, StoreError};
use engys::similarity::l2_normalize;
use engys::store::VectorStore;

/// Deterministic embedder: hashes text into a fixed-dimension unit vector.
/// Equal texts embed identically, so querying with a stored chunk's text
/// scores that chunk at exactly 1.0.
pub struct HashEmbedder {
    pub dimension: usize,
}

impl HashEmbedder {
    pub fn vector_for(text: &str, dimension: usize) -> Vec<f32> {
        let mut seed = 0xcbf2_9ce4_8422_2325u64;
        for b in text.bytes() {
            seed ^= b as u64;
            seed = seed.wrapping_mul(0x0000_0100_0000_01b3);
        }
        let v: Vec<f32> = (0..dimension)
            .map(|i| {
                let mut x = seed.wrapping_add((i as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15));
                x ^= x >> 33;
                x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
                x ^= x >> 33;
                (x as f64 / u64::MAX as f64 * 2.0 - 1.0) as f32
            })
            .collect();
        l2_normalize(v).expect("hash vector is never zero")
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::vector_for(text, self.dimension))
    }
}

/// Embedder whose output dimension can be flipped mid-test, to provoke
/// dimension mismatches the way a misconfigured provider would.
pub struct SwitchableEmbedder {
    pub dimension: AtomicUsize,
}

impl Embedder for SwitchableEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(HashEmbedder::vector_for(
            text,
            self.dimension.load(Ordering::SeqCst),
        ))
    }
}

/// Embedder that can be told to fail, standing in for provider outages.
pub struct FlakyEmbedder {
    pub failing: AtomicBool,
    pub dimension: usize,
}

impl Embedder for FlakyEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::EmbeddingFailure(
                "provider unavailable".to_string(),
            ));
        }
        Ok(HashEmbedder::vector_for(text, self.dimension))
    }
}

pub fn hash_store(dimension: usize) -> VectorStore {
    VectorStore::new(Arc::new(HashEmbedder { dimension }))
}
