//! k-means clustering for IVF training.
//!
//! Operates on flat SoA storage (`num_vectors * dimension` floats). Uses
//! cosine distance for assignment, k-means++ initialization and Lloyd
//! refinement. Deterministic for a given seed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Result, StoreError};
use crate::similarity;

const DEFAULT_SEED: u64 = 42;
const DEFAULT_MAX_ITER: usize = 25;
const DEFAULT_TOLERANCE: f32 = 1e-4;

/// k-means clustering over unit-norm vectors.
pub struct KMeans {
    centroids: Vec<Vec<f32>>,
    dimension: usize,
    k: usize,
    max_iter: usize,
    tolerance: f32,
    seed: u64,
}

impl KMeans {
    /// Create new k-means with k clusters.
    pub fn new(dimension: usize, k: usize) -> Result<Self> {
        if dimension == 0 || k == 0 {
            return Err(StoreError::Internal(
                "kmeans requires dimension > 0 and k > 0".to_string(),
            ));
        }
        Ok(Self {
            centroids: Vec::new(),
            dimension,
            k,
            max_iter: DEFAULT_MAX_ITER,
            tolerance: DEFAULT_TOLERANCE,
            seed: DEFAULT_SEED,
        })
    }

    /// Configure a deterministic seed for k-means++ initialization.
    ///
    /// Repeated `fit(...)` calls on the same inputs produce identical results.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Configure iteration cap and convergence tolerance.
    #[must_use]
    pub fn with_limits(mut self, max_iter: usize, tolerance: f32) -> Self {
        self.max_iter = max_iter;
        self.tolerance = tolerance;
        self
    }

    /// Train on `num_vectors` vectors and return the final assignments.
    pub fn fit(&mut self, vectors: &[f32], num_vectors: usize) -> Result<Vec<usize>> {
        if vectors.len() < num_vectors * self.dimension {
            return Err(StoreError::Internal("insufficient vectors".to_string()));
        }
        if num_vectors < self.k {
            return Err(StoreError::Internal(format!(
                "cannot fit {} clusters to {} vectors",
                self.k, num_vectors
            )));
        }

        self.centroids = self.kmeans_plus_plus(vectors, num_vectors);

        for _iteration in 0..self.max_iter {
            let assignments = self.assign_clusters(vectors, num_vectors);
            let new_centroids = self.update_centroids(vectors, num_vectors, &assignments);

            let total_shift: f32 = self
                .centroids
                .iter()
                .zip(new_centroids.iter())
                .map(|(old, new)| {
                    old.iter()
                        .zip(new.iter())
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum::<f32>()
                        .sqrt()
                })
                .sum();

            self.centroids = new_centroids;
            if total_shift < self.tolerance {
                break;
            }
        }

        Ok(self.assign_clusters(vectors, num_vectors))
    }

    /// k-means++ initialization.
    ///
    /// First centroid uniform at random; each subsequent centroid sampled
    /// with probability proportional to squared distance to the nearest
    /// already-chosen centroid.
    fn kmeans_plus_plus(&self, vectors: &[f32], num_vectors: usize) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = Vec::with_capacity(self.k);

        let first_idx = rng.random_range(0..num_vectors);
        centroids.push(self.get_vector(vectors, first_idx).to_vec());

        while centroids.len() < self.k {
            let mut weights = Vec::with_capacity(num_vectors);
            let mut total = 0.0f64;
            for i in 0..num_vectors {
                let vec = self.get_vector(vectors, i);
                let min_dist = centroids
                    .iter()
                    .map(|c| self.distance(vec, c))
                    .fold(f32::INFINITY, f32::min);
                let w = (min_dist as f64).powi(2);
                weights.push(w);
                total += w;
            }

            // All remaining points coincide with a centroid; any pick will do.
            if total <= 0.0 {
                let idx = rng.random_range(0..num_vectors);
                centroids.push(self.get_vector(vectors, idx).to_vec());
                continue;
            }

            let threshold = rng.random::<f64>() * total;
            let mut cumulative = 0.0;
            let mut chosen = num_vectors - 1;
            for (i, &w) in weights.iter().enumerate() {
                cumulative += w;
                if cumulative >= threshold {
                    chosen = i;
                    break;
                }
            }
            centroids.push(self.get_vector(vectors, chosen).to_vec());
        }

        centroids
    }

    /// Assign each vector to its nearest centroid.
    pub fn assign_clusters(&self, vectors: &[f32], num_vectors: usize) -> Vec<usize> {
        let mut assignments = Vec::with_capacity(num_vectors);
        for i in 0..num_vectors {
            let vec = self.get_vector(vectors, i);
            let mut best_cluster = 0;
            let mut best_dist = f32::INFINITY;
            for (cluster_idx, centroid) in self.centroids.iter().enumerate() {
                let dist = self.distance(vec, centroid);
                if dist < best_dist {
                    best_dist = dist;
                    best_cluster = cluster_idx;
                }
            }
            assignments.push(best_cluster);
        }
        assignments
    }

    /// Recompute centroids as cluster means; re-seed empty clusters to the
    /// point currently farthest from its assigned centroid.
    fn update_centroids(
        &self,
        vectors: &[f32],
        num_vectors: usize,
        assignments: &[usize],
    ) -> Vec<Vec<f32>> {
        let mut sums = vec![vec![0.0f32; self.dimension]; self.k];
        let mut counts = vec![0usize; self.k];

        for (i, &cluster) in assignments.iter().enumerate().take(num_vectors) {
            counts[cluster] += 1;
            let vec = self.get_vector(vectors, i);
            for (s, &x) in sums[cluster].iter_mut().zip(vec.iter()) {
                *s += x;
            }
        }

        let mut new_centroids: Vec<Vec<f32>> = sums
            .iter()
            .zip(counts.iter())
            .enumerate()
            .map(|(idx, (sum, &count))| {
                if count > 0 {
                    sum.iter().map(|&s| s / count as f32).collect()
                } else {
                    self.centroids[idx].clone()
                }
            })
            .collect();

        let empties: Vec<usize> = counts
            .iter()
            .enumerate()
            .filter(|(_, &c)| c == 0)
            .map(|(i, _)| i)
            .collect();
        if !empties.is_empty() {
            let mut point_dists: Vec<(usize, f32)> = (0..num_vectors)
                .map(|i| {
                    let vec = self.get_vector(vectors, i);
                    (i, self.distance(vec, &self.centroids[assignments[i]]))
                })
                .collect();
            point_dists.sort_unstable_by(|a, b| b.1.total_cmp(&a.1));
            for (empty_idx, (point, _)) in empties.iter().zip(point_dists.iter()) {
                new_centroids[*empty_idx] = self.get_vector(vectors, *point).to_vec();
            }
        }

        new_centroids
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        1.0 - similarity::cosine_similarity(a, b)
    }

    fn get_vector<'a>(&self, vectors: &'a [f32], idx: usize) -> &'a [f32] {
        let start = idx * self.dimension;
        &vectors[start..start + self.dimension]
    }

    /// Trained centroids.
    #[must_use]
    pub fn centroids(&self) -> &[Vec<f32>] {
        &self.centroids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn l2_normalize_in_place(vecs: &mut [f32], num_vectors: usize, dimension: usize) {
        for i in 0..num_vectors {
            let v = &mut vecs[i * dimension..(i + 1) * dimension];
            let n: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if n > 0.0 {
                for x in v {
                    *x /= n;
                }
            } else if !v.is_empty() {
                v[0] = 1.0;
            }
        }
    }

    #[test]
    fn separates_two_obvious_clusters() {
        // Two bundles around orthogonal axes.
        let mut data = Vec::new();
        for i in 0..10 {
            let wiggle = i as f32 * 0.01;
            data.extend_from_slice(&[1.0, wiggle, 0.0]);
            data.extend_from_slice(&[0.0, wiggle, 1.0]);
        }
        l2_normalize_in_place(&mut data, 20, 3);

        let mut km = KMeans::new(3, 2).unwrap().with_seed(7);
        let labels = km.fit(&data, 20).unwrap();

        // Even indexes landed near x, odd near z; labels must split that way.
        let first = labels[0];
        for (i, &l) in labels.iter().enumerate() {
            if i % 2 == 0 {
                assert_eq!(l, first);
            } else {
                assert_ne!(l, first);
            }
        }
    }

    #[test]
    fn rejects_degenerate_construction() {
        assert!(KMeans::new(0, 3).is_err());
        assert!(KMeans::new(4, 0).is_err());
    }

    #[test]
    fn fit_rejects_fewer_vectors_than_clusters() {
        let data = [0.6f32, 0.8, 0.0, 1.0];
        let mut km = KMeans::new(2, 3).unwrap().with_seed(1);
        assert!(km.fit(&data, 2).is_err());
    }

    #[test]
    fn fit_rejects_truncated_storage() {
        // Three vectors claimed, only two rows of floats provided.
        let data = [1.0f32, 0.0, 0.0, 1.0];
        let mut km = KMeans::new(2, 2).unwrap().with_seed(1);
        assert!(km.fit(&data, 3).is_err());
    }

    #[test]
    fn identical_points_still_fit() {
        let mut data = Vec::new();
        for _ in 0..6 {
            data.extend_from_slice(&[0.6, 0.8]);
        }
        let mut km = KMeans::new(2, 3).unwrap().with_seed(1);
        let labels = km.fit(&data, 6).unwrap();
        assert_eq!(labels.len(), 6);
        assert_eq!(km.centroids().len(), 3);
    }

    proptest! {
        #[test]
        fn prop_fit_is_deterministic_given_seed(
            seed in any::<u64>(),
            dimension in 1usize..12,
            num_vectors in 2usize..48,
            k in 1usize..12,
            raw in proptest::collection::vec(-1.0f32..1.0f32, 2usize..(48 * 12)),
        ) {
            prop_assume!(k <= num_vectors);
            let needed = num_vectors * dimension;
            prop_assume!(raw.len() >= needed);

            let mut vectors = raw[..needed].to_vec();
            l2_normalize_in_place(&mut vectors, num_vectors, dimension);

            let mut km1 = KMeans::new(dimension, k).unwrap().with_seed(seed);
            let mut km2 = KMeans::new(dimension, k).unwrap().with_seed(seed);

            let a1 = km1.fit(&vectors, num_vectors).unwrap();
            let a2 = km2.fit(&vectors, num_vectors).unwrap();
            prop_assert_eq!(a1, a2);
        }
    }
}
