//! Exact brute-force index.
//!
//! Ground truth for the approximate indexes: a dense SoA table scanned in
//! full on every query, O(nD). `remove` swap-pops the last row into the hole
//! so the table stays dense.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::similarity::{dot, TopK};
use crate::value::Metadata;

use super::{IndexKind, IndexStats, VectorIndex};

/// Brute-force cosine top-k over a dense vector table.
#[derive(Default)]
pub struct LinearIndex {
    ids: Vec<Uuid>,
    /// Flat SoA storage, `ids.len() * dimension` floats.
    vectors: Vec<f32>,
    slots: HashMap<Uuid, usize>,
    metadata: HashMap<Uuid, Metadata>,
    dimension: Option<usize>,
}

impl LinearIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check_dimension(&mut self, len: usize) -> Result<usize> {
        match self.dimension {
            Some(dim) if dim != len => Err(StoreError::DimensionMismatch {
                expected: dim,
                got: len,
            }),
            Some(dim) => Ok(dim),
            None => {
                self.dimension = Some(len);
                Ok(len)
            }
        }
    }

    fn row(&self, slot: usize) -> &[f32] {
        let dim = self.dimension.unwrap_or(0);
        &self.vectors[slot * dim..(slot + 1) * dim]
    }
}

impl VectorIndex for LinearIndex {
    fn add(&mut self, id: Uuid, vector: Vec<f32>, metadata: Metadata) -> Result<()> {
        let dim = self.check_dimension(vector.len())?;
        if self.slots.contains_key(&id) {
            self.remove(id);
        }

        let slot = self.ids.len();
        self.ids.push(id);
        self.vectors.extend_from_slice(&vector);
        debug_assert_eq!(self.vectors.len(), (slot + 1) * dim);
        self.slots.insert(id, slot);
        self.metadata.insert(id, metadata);
        Ok(())
    }

    fn update(
        &mut self,
        id: Uuid,
        vector: Option<Vec<f32>>,
        metadata: Option<Metadata>,
    ) -> Result<()> {
        let slot = *self
            .slots
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("chunk {id}")))?;

        if let Some(vector) = vector {
            let dim = self.check_dimension(vector.len())?;
            self.vectors[slot * dim..(slot + 1) * dim].copy_from_slice(&vector);
        }
        if let Some(metadata) = metadata {
            self.metadata.insert(id, metadata);
        }
        Ok(())
    }

    fn remove(&mut self, id: Uuid) {
        let Some(slot) = self.slots.remove(&id) else {
            return;
        };
        self.metadata.remove(&id);

        let dim = self.dimension.unwrap_or(0);
        let last = self.ids.len() - 1;
        self.ids.swap_remove(slot);
        if slot != last {
            let (head, tail) = self.vectors.split_at_mut(last * dim);
            head[slot * dim..(slot + 1) * dim].copy_from_slice(&tail[..dim]);
            self.slots.insert(self.ids[slot], slot);
        }
        self.vectors.truncate(last * dim);
    }

    fn build(&mut self) -> Result<()> {
        Ok(())
    }

    fn query(&self, query: &[f32], k: usize) -> Vec<(Uuid, f32)> {
        let mut top = TopK::new(k);
        for (slot, &id) in self.ids.iter().enumerate() {
            top.push(id, dot(query, self.row(slot)));
        }
        top.into_sorted()
    }

    fn contains(&self, id: Uuid) -> bool {
        self.slots.contains_key(&id)
    }

    fn metadata(&self, id: Uuid) -> Option<&Metadata> {
        self.metadata.get(&id)
    }

    fn vector(&self, id: Uuid) -> Option<&[f32]> {
        self.slots.get(&id).map(|&slot| self.row(slot))
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            kind: IndexKind::Linear,
            num_vectors: self.ids.len(),
            dimension: self.dimension,
            pending: 0,
            clusters: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::l2_normalize;

    fn uid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn unit(v: Vec<f32>) -> Vec<f32> {
        l2_normalize(v).unwrap()
    }

    #[test]
    fn query_ranks_by_similarity() {
        let mut index = LinearIndex::new();
        index.add(uid(1), unit(vec![1.0, 0.0]), Metadata::new()).unwrap();
        index.add(uid(2), unit(vec![0.0, 1.0]), Metadata::new()).unwrap();
        index.add(uid(3), unit(vec![1.0, 0.2]), Metadata::new()).unwrap();

        let results = index.query(&unit(vec![1.0, 0.0]), 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, uid(1));
        assert_eq!(results[1].0, uid(3));
    }

    #[test]
    fn swap_pop_remove_keeps_table_dense() {
        let mut index = LinearIndex::new();
        for n in 1..=4u128 {
            index
                .add(uid(n), unit(vec![n as f32, 1.0]), Metadata::new())
                .unwrap();
        }
        index.remove(uid(2));
        assert_eq!(index.len(), 3);
        assert!(!index.contains(uid(2)));
        // Remaining rows still resolve to their own vectors.
        for n in [1u128, 3, 4] {
            let v = index.vector(uid(n)).unwrap();
            let expected = unit(vec![n as f32, 1.0]);
            assert!((v[0] - expected[0]).abs() < 1e-6);
        }
        // Removing the same id twice is a no-op.
        index.remove(uid(2));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn re_add_replaces_existing_entry() {
        let mut index = LinearIndex::new();
        index.add(uid(1), unit(vec![1.0, 0.0]), Metadata::new()).unwrap();
        index.add(uid(1), unit(vec![0.0, 1.0]), Metadata::new()).unwrap();
        assert_eq!(index.len(), 1);
        let v = index.vector(uid(1)).unwrap();
        assert!(v[1] > 0.99);
    }

    #[test]
    fn dimension_is_locked_by_first_insert() {
        let mut index = LinearIndex::new();
        index.add(uid(1), unit(vec![1.0, 0.0]), Metadata::new()).unwrap();
        let err = index
            .add(uid(2), unit(vec![1.0, 0.0, 0.0]), Metadata::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 2, got: 3 }));
        assert_eq!(index.len(), 1);
    }
}
