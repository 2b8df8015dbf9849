//! Inverted-file index with k-means clustering.
//!
//! Inserts land in an unprocessed buffer; `build` trains k-means over
//! everything and redistributes it into per-centroid inverted lists. Queries
//! probe the `n_probes` closest centroids and always scan the buffer on top,
//! so the window between insert and rebuild degrades recall gracefully
//! instead of losing chunks. Before the first build, queries fall back to a
//! full scan.

use std::collections::HashMap;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::kmeans::KMeans;
use crate::similarity::{self, dot, TopK};
use crate::value::Metadata;

use super::{param_f32, param_u64, param_usize, IndexKind, IndexStats, VectorIndex};

const DEFAULT_CLUSTER_RATIO: f32 = 0.05;
const DEFAULT_N_PROBES: usize = 1;
const DEFAULT_MAX_ITER: usize = 25;
const DEFAULT_TOLERANCE: f32 = 1e-4;
const DEFAULT_SEED: u64 = 42;

/// IVF tuning parameters, parsed from a library's `index_params`.
#[derive(Debug, Clone)]
pub struct IvfParams {
    /// Fixed cluster count; when absent, `cluster_ratio` of the current size
    /// is used at build time.
    pub n_clusters: Option<usize>,
    pub cluster_ratio: f32,
    pub n_probes: usize,
    pub max_iter: usize,
    pub tolerance: f32,
    pub seed: u64,
}

impl Default for IvfParams {
    fn default() -> Self {
        Self {
            n_clusters: None,
            cluster_ratio: DEFAULT_CLUSTER_RATIO,
            n_probes: DEFAULT_N_PROBES,
            max_iter: DEFAULT_MAX_ITER,
            tolerance: DEFAULT_TOLERANCE,
            seed: DEFAULT_SEED,
        }
    }
}

impl IvfParams {
    pub fn from_metadata(params: &Metadata) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            n_clusters: param_usize(params, "n_clusters")?,
            cluster_ratio: param_f32(params, "cluster_ratio")?
                .unwrap_or(defaults.cluster_ratio)
                .max(0.0),
            n_probes: param_usize(params, "n_probes")?
                .unwrap_or(defaults.n_probes)
                .max(1),
            max_iter: param_usize(params, "max_iter")?
                .unwrap_or(defaults.max_iter)
                .max(1),
            tolerance: param_f32(params, "tolerance")?.unwrap_or(defaults.tolerance),
            seed: param_u64(params, "seed")?.unwrap_or(defaults.seed),
        })
    }
}

/// Inverted-file index.
pub struct IvfIndex {
    params: IvfParams,
    centroids: Vec<Vec<f32>>,
    /// One inverted list per centroid.
    lists: Vec<Vec<(Uuid, Vec<f32>)>>,
    /// `id -> (list, offset)`; avoids scanning the lists on remove.
    locations: HashMap<Uuid, (usize, usize)>,
    /// Inserts not yet clustered.
    buffer: HashMap<Uuid, Vec<f32>>,
    metadata: HashMap<Uuid, Metadata>,
    dimension: Option<usize>,
}

impl IvfIndex {
    #[must_use]
    pub fn new(params: IvfParams) -> Self {
        Self {
            params,
            centroids: Vec::new(),
            lists: Vec::new(),
            locations: HashMap::new(),
            buffer: HashMap::new(),
            metadata: HashMap::new(),
            dimension: None,
        }
    }

    /// Number of trained centroids; zero before the first build.
    #[must_use]
    pub fn num_centroids(&self) -> usize {
        self.centroids.len()
    }

    fn check_dimension(&mut self, len: usize) -> Result<()> {
        match self.dimension {
            Some(dim) if dim != len => Err(StoreError::DimensionMismatch {
                expected: dim,
                got: len,
            }),
            Some(_) => Ok(()),
            None => {
                self.dimension = Some(len);
                Ok(())
            }
        }
    }

    /// Pull a clustered entry back out of its inverted list.
    fn detach(&mut self, id: Uuid) -> Option<Vec<f32>> {
        let (list_idx, offset) = self.locations.remove(&id)?;
        let list = &mut self.lists[list_idx];
        let (_, vector) = list.swap_remove(offset);
        if offset < list.len() {
            let moved = list[offset].0;
            self.locations.insert(moved, (list_idx, offset));
        }
        Some(vector)
    }

    /// Everything currently searchable, in stable id order.
    fn gather(&self) -> Vec<(Uuid, Vec<f32>)> {
        let mut all: Vec<(Uuid, Vec<f32>)> = self
            .buffer
            .iter()
            .map(|(&id, v)| (id, v.clone()))
            .chain(
                self.lists
                    .iter()
                    .flatten()
                    .map(|(id, v)| (*id, v.clone())),
            )
            .collect();
        all.sort_unstable_by_key(|(id, _)| *id);
        all
    }

    /// Single-cluster layout used when training is degenerate.
    fn collapse_to_single_cluster(&mut self, entries: Vec<(Uuid, Vec<f32>)>) -> Result<()> {
        let centroid = similarity::centroid(entries.iter().map(|(_, v)| v.as_slice()))
            .unwrap_or_else(|_| entries[0].1.clone());
        self.centroids = vec![centroid];
        self.locations = entries
            .iter()
            .enumerate()
            .map(|(offset, (id, _))| (*id, (0, offset)))
            .collect();
        self.lists = vec![entries];
        self.buffer.clear();
        Ok(())
    }
}

impl VectorIndex for IvfIndex {
    fn add(&mut self, id: Uuid, vector: Vec<f32>, metadata: Metadata) -> Result<()> {
        self.check_dimension(vector.len())?;
        if self.contains(id) {
            self.remove(id);
        }
        self.buffer.insert(id, vector);
        self.metadata.insert(id, metadata);
        Ok(())
    }

    fn update(
        &mut self,
        id: Uuid,
        vector: Option<Vec<f32>>,
        metadata: Option<Metadata>,
    ) -> Result<()> {
        if !self.contains(id) {
            return Err(StoreError::NotFound(format!("chunk {id}")));
        }
        if let Some(vector) = vector {
            self.check_dimension(vector.len())?;
            // New position means the old cluster assignment is stale; stage
            // the chunk for the next build.
            self.detach(id);
            self.buffer.insert(id, vector);
        }
        if let Some(metadata) = metadata {
            self.metadata.insert(id, metadata);
        }
        Ok(())
    }

    fn remove(&mut self, id: Uuid) {
        if self.buffer.remove(&id).is_none() {
            self.detach(id);
        }
        self.metadata.remove(&id);
    }

    fn build(&mut self) -> Result<()> {
        let entries = self.gather();
        if entries.is_empty() {
            self.centroids.clear();
            self.lists.clear();
            self.locations.clear();
            self.buffer.clear();
            return Ok(());
        }

        let n = entries.len();
        let dim = entries[0].1.len();
        let target = self
            .params
            .n_clusters
            .unwrap_or_else(|| ((n as f32 * self.params.cluster_ratio).round() as usize).max(1));
        let k = target.clamp(1, n);

        let mut flat = Vec::with_capacity(n * dim);
        for (_, v) in &entries {
            flat.extend_from_slice(v);
        }

        let mut km = KMeans::new(dim, k)?
            .with_seed(self.params.seed)
            .with_limits(self.params.max_iter, self.params.tolerance);
        let assignments = match km.fit(&flat, n) {
            Ok(assignments) => assignments,
            Err(e) => {
                warn!(error = %e, "k-means training degenerated, falling back to a single cluster");
                return self.collapse_to_single_cluster(entries);
            }
        };

        self.centroids = km
            .centroids()
            .iter()
            .map(|c| similarity::l2_normalize(c.clone()).unwrap_or_else(|_| c.clone()))
            .collect();

        self.lists = vec![Vec::new(); k];
        self.locations = HashMap::with_capacity(n);
        for ((id, vector), &cluster) in entries.into_iter().zip(assignments.iter()) {
            let list = &mut self.lists[cluster];
            self.locations.insert(id, (cluster, list.len()));
            list.push((id, vector));
        }
        self.buffer.clear();

        info!(clusters = k, vectors = n, "ivf index built");
        Ok(())
    }

    fn query(&self, query: &[f32], k: usize) -> Vec<(Uuid, f32)> {
        let mut top = TopK::new(k);

        if self.centroids.is_empty() {
            // Never built: correctness over speed, scan everything.
            for (&id, vector) in &self.buffer {
                top.push(id, dot(query, vector));
            }
            for (id, vector) in self.lists.iter().flatten() {
                top.push(*id, dot(query, vector));
            }
            return top.into_sorted();
        }

        let mut ranked: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(idx, c)| (idx, dot(query, c)))
            .collect();
        ranked.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let probes = self.params.n_probes.min(self.centroids.len());
        debug!(probes, "probing ivf lists");
        for (list_idx, _) in ranked.iter().take(probes) {
            for (id, vector) in &self.lists[*list_idx] {
                top.push(*id, dot(query, vector));
            }
        }
        for (&id, vector) in &self.buffer {
            top.push(id, dot(query, vector));
        }
        top.into_sorted()
    }

    fn contains(&self, id: Uuid) -> bool {
        self.buffer.contains_key(&id) || self.locations.contains_key(&id)
    }

    fn metadata(&self, id: Uuid) -> Option<&Metadata> {
        self.metadata.get(&id)
    }

    fn vector(&self, id: Uuid) -> Option<&[f32]> {
        if let Some(v) = self.buffer.get(&id) {
            return Some(v);
        }
        let (list_idx, offset) = *self.locations.get(&id)?;
        Some(&self.lists[list_idx][offset].1)
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn len(&self) -> usize {
        self.buffer.len() + self.locations.len()
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            kind: IndexKind::Ivf,
            num_vectors: self.len(),
            dimension: self.dimension,
            pending: self.buffer.len(),
            clusters: self.centroids.len(),
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

    fn axis_bundle(axis: usize, count: usize, start_id: u128) -> Vec<(Uuid, Vec<f32>)> {
        (0..count)
            .map(|i| {
                let mut v = vec![0.05 * i as f32; 3];
                v[axis] = 1.0;
                (uid(start_id + i as u128), unit(v))
            })
            .collect()
    }

    fn params_with_clusters(n: usize, probes: usize) -> IvfParams {
        IvfParams {
            n_clusters: Some(n),
            n_probes: probes,
            ..IvfParams::default()
        }
    }

    #[test]
    fn unbuilt_index_falls_back_to_full_scan() {
        let mut index = IvfIndex::new(IvfParams::default());
        for (id, v) in axis_bundle(0, 5, 1) {
            index.add(id, v, Metadata::new()).unwrap();
        }
        let results = index.query(&unit(vec![1.0, 0.0, 0.0]), 3);
        assert_eq!(results.len(), 3);
        assert_eq!(index.stats().pending, 5);
    }

    #[test]
    fn build_forms_clusters_and_clears_buffer() {
        let mut index = IvfIndex::new(params_with_clusters(3, 1));
        for axis in 0..3 {
            for (id, v) in axis_bundle(axis, 8, (axis as u128 + 1) * 100) {
                index.add(id, v, Metadata::new()).unwrap();
            }
        }
        index.build().unwrap();
        assert_eq!(index.num_centroids(), 3);
        assert_eq!(index.stats().pending, 0);
        assert_eq!(index.len(), 24);

        // Probing one cluster finds the bundle on the queried axis.
        let results = index.query(&unit(vec![0.0, 1.0, 0.0]), 4);
        assert_eq!(results.len(), 4);
        for (id, _) in &results {
            let n = id.as_u128();
            assert!((200..300).contains(&n), "unexpected id {n}");
        }
    }

    #[test]
    fn inserts_after_build_stay_searchable() {
        let mut index = IvfIndex::new(params_with_clusters(2, 1));
        for (id, v) in axis_bundle(0, 6, 1) {
            index.add(id, v, Metadata::new()).unwrap();
        }
        index.build().unwrap();

        let fresh = uid(999);
        index
            .add(fresh, unit(vec![0.0, 0.0, 1.0]), Metadata::new())
            .unwrap();
        let results = index.query(&unit(vec![0.0, 0.0, 1.0]), 1);
        assert_eq!(results[0].0, fresh);
    }

    #[test]
    fn fewer_vectors_than_clusters_degenerates_cleanly() {
        let mut index = IvfIndex::new(params_with_clusters(10, 2));
        for (id, v) in axis_bundle(0, 3, 1) {
            index.add(id, v, Metadata::new()).unwrap();
        }
        index.build().unwrap();
        assert_eq!(index.num_centroids(), 3);
        assert_eq!(index.query(&unit(vec![1.0, 0.1, 0.1]), 10).len(), 3);
    }

    #[test]
    fn single_cluster_fallback_keeps_everything_searchable() {
        let mut index = IvfIndex::new(params_with_clusters(3, 1));
        for (id, v) in axis_bundle(0, 4, 1) {
            index.add(id, v, Metadata::new()).unwrap();
        }
        let entries = index.gather();
        index.collapse_to_single_cluster(entries).unwrap();

        assert_eq!(index.num_centroids(), 1);
        assert_eq!(index.len(), 4);
        assert_eq!(index.stats().pending, 0);
        let results = index.query(&unit(vec![1.0, 0.0, 0.0]), 10);
        assert_eq!(results.len(), 4);
        for n in 1..=4u128 {
            assert!(index.contains(uid(n)));
        }
    }

    #[test]
    fn remove_from_list_keeps_locations_consistent() {
        let mut index = IvfIndex::new(params_with_clusters(1, 1));
        let entries = axis_bundle(0, 5, 1);
        for (id, v) in &entries {
            index.add(*id, v.clone(), Metadata::new()).unwrap();
        }
        index.build().unwrap();

        index.remove(uid(1));
        index.remove(uid(3));
        assert_eq!(index.len(), 3);
        for n in [2u128, 4, 5] {
            assert!(index.contains(uid(n)));
            assert!(index.vector(uid(n)).is_some());
        }
        let results = index.query(&unit(vec![1.0, 0.0, 0.0]), 10);
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn vector_update_moves_chunk_back_to_buffer() {
        let mut index = IvfIndex::new(params_with_clusters(1, 1));
        for (id, v) in axis_bundle(0, 4, 1) {
            index.add(id, v, Metadata::new()).unwrap();
        }
        index.build().unwrap();
        assert_eq!(index.stats().pending, 0);

        index
            .update(uid(2), Some(unit(vec![0.0, 1.0, 0.0])), None)
            .unwrap();
        assert_eq!(index.stats().pending, 1);
        assert_eq!(index.len(), 4);

        let results = index.query(&unit(vec![0.0, 1.0, 0.0]), 1);
        assert_eq!(results[0].0, uid(2));
    }

    #[test]
    fn rebuild_is_repeatable_and_deterministic() {
        let mut index = IvfIndex::new(params_with_clusters(2, 2));
        for axis in 0..2 {
            for (id, v) in axis_bundle(axis, 6, (axis as u128 + 1) * 10) {
                index.add(id, v, Metadata::new()).unwrap();
            }
        }
        index.build().unwrap();
        let before = index.query(&unit(vec![1.0, 0.0, 0.0]), 5);
        index.build().unwrap();
        let after = index.query(&unit(vec![1.0, 0.0, 0.0]), 5);
        assert_eq!(before, after);
    }
}
