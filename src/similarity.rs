//! Vector math shared by all indexes.
//!
//! Every stored embedding is L2-normalized at the door, so cosine similarity
//! reduces to a plain dot product and higher is always better. Ranking ties
//! are broken by ascending chunk id; that ordering is part of the public
//! contract, not an implementation detail.

use uuid::Uuid;

use crate::error::{Result, StoreError};

const NORM_EPSILON: f32 = 1e-9;

/// Dot product of two vectors.
///
/// Mismatched lengths score `f32::NEG_INFINITY` so the pair is never selected
/// as a nearest neighbor.
#[inline]
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::NEG_INFINITY;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2 norm of a vector.
#[inline]
#[must_use]
pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity with norm computation.
///
/// Does not require pre-normalized inputs. Used where centroids are raw means
/// (mid-training); everywhere else prefer [`dot`] on unit vectors.
#[inline]
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::NEG_INFINITY;
    }
    let na = norm(a);
    let nb = norm(b);
    if na > NORM_EPSILON && nb > NORM_EPSILON {
        (dot(a, b) / (na * nb)).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Normalize a vector to unit L2 norm.
///
/// Zero-norm and non-finite inputs are rejected with `InvalidVector`.
pub fn l2_normalize(mut v: Vec<f32>) -> Result<Vec<f32>> {
    if v.is_empty() {
        return Err(StoreError::InvalidVector("empty vector".to_string()));
    }
    if v.iter().any(|x| !x.is_finite()) {
        return Err(StoreError::InvalidVector(
            "vector contains non-finite components".to_string(),
        ));
    }
    let n = norm(&v);
    if n < NORM_EPSILON {
        return Err(StoreError::InvalidVector("zero-norm vector".to_string()));
    }
    for x in &mut v {
        *x /= n;
    }
    Ok(v)
}

/// L2-normalized arithmetic mean of a set of vectors.
pub fn centroid<'a, I>(vectors: I) -> Result<Vec<f32>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut it = vectors.into_iter();
    let first = it
        .next()
        .ok_or_else(|| StoreError::InvalidVector("centroid of empty set".to_string()))?;
    let mut sums = first.to_vec();
    let mut count = 1usize;
    for v in it {
        for (s, x) in sums.iter_mut().zip(v.iter()) {
            *s += x;
        }
        count += 1;
    }
    for s in &mut sums {
        *s /= count as f32;
    }
    l2_normalize(sums)
}

/// Sort scored candidates by descending score, ascending id on ties.
pub fn sort_scored(results: &mut [(Uuid, f32)]) {
    results.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
}

/// Bounded selection of the k best-scored candidates.
///
/// A max-heap keyed so that the *worst* surviving candidate sits on top:
/// lower score is worse, and among equal scores a larger id is worse. Pushing
/// past capacity evicts that candidate in O(log k).
pub struct TopK {
    heap: std::collections::BinaryHeap<ScoredEntry>,
    k: usize,
}

#[derive(Clone, PartialEq)]
struct ScoredEntry {
    id: Uuid,
    score: f32,
}

impl Eq for ScoredEntry {}

impl PartialOrd for ScoredEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Greater = worse, so the heap top is the eviction candidate.
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl TopK {
    #[must_use]
    pub fn new(k: usize) -> Self {
        Self {
            heap: std::collections::BinaryHeap::with_capacity(k + 1),
            k,
        }
    }

    pub fn push(&mut self, id: Uuid, score: f32) {
        if self.k == 0 {
            return;
        }
        self.heap.push(ScoredEntry { id, score });
        if self.heap.len() > self.k {
            self.heap.pop();
        }
    }

    /// Worst score currently retained, if the heap is full.
    #[must_use]
    pub fn threshold(&self) -> Option<f32> {
        if self.heap.len() == self.k {
            self.heap.peek().map(|e| e.score)
        } else {
            None
        }
    }

    /// Candidates ordered by score descending, id ascending.
    #[must_use]
    pub fn into_sorted(self) -> Vec<(Uuid, f32)> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|e| (e.id, e.score))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn dot_of_unit_vectors_matches_cosine() {
        let a = l2_normalize(vec![3.0, 4.0]).unwrap();
        let b = l2_normalize(vec![6.0, 8.0]).unwrap();
        assert!((dot(&a, &b) - cosine_similarity(&a, &b)).abs() < 1e-6);
        assert!((dot(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_rejects_degenerate_input() {
        assert!(matches!(
            l2_normalize(vec![0.0, 0.0]),
            Err(StoreError::InvalidVector(_))
        ));
        assert!(matches!(
            l2_normalize(vec![1.0, f32::NAN]),
            Err(StoreError::InvalidVector(_))
        ));
    }

    #[test]
    fn centroid_is_unit_norm() {
        let vs = [vec![1.0, 0.0], vec![0.0, 1.0]];
        let c = centroid(vs.iter().map(|v| v.as_slice())).unwrap();
        assert!((norm(&c) - 1.0).abs() < 1e-6);
        assert!((c[0] - c[1]).abs() < 1e-6);
    }

    #[test]
    fn topk_orders_by_score_then_id() {
        let mut top = TopK::new(3);
        top.push(uid(2), 0.5);
        top.push(uid(1), 0.5);
        top.push(uid(3), 0.9);
        top.push(uid(4), 0.1);
        let out = top.into_sorted();
        assert_eq!(
            out.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            vec![uid(3), uid(1), uid(2)]
        );
    }

    #[test]
    fn topk_evicts_worst_on_overflow() {
        let mut top = TopK::new(2);
        for (n, s) in [(1u128, 0.1f32), (2, 0.9), (3, 0.5), (4, 0.7)] {
            top.push(uid(n), s);
        }
        let out = top.into_sorted();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].0, uid(2));
        assert_eq!(out[1].0, uid(4));
    }
}
