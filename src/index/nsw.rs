//! Navigable small-world graph index.
//!
//! A flat (single-layer) neighborhood graph grown incrementally: each insert
//! beam-searches for its `ef_construction` nearest nodes, links to at most
//! `m` of them chosen by a diversification heuristic, and over-full
//! neighbors are re-pruned with the same heuristic. The graph is always
//! current, so `build` is a no-op.
//!
//! Edges are kept symmetric. Removing a node drops its back-edges and
//! re-links any neighbor that lost its last edge, so the graph never strands
//! reachable chunks behind a deleted hub.

use std::collections::{BinaryHeap, HashMap, HashSet};

use smallvec::SmallVec;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::similarity::{dot, TopK};
use crate::value::Metadata;

use super::{param_u64, param_usize, IndexKind, IndexStats, VectorIndex};

const DEFAULT_M: usize = 16;
const DEFAULT_EF_CONSTRUCTION: usize = 100;
const DEFAULT_EF_SEARCH: usize = 50;
const DEFAULT_SEED: u64 = 42;

type Adjacency = SmallVec<[(Uuid, f32); 16]>;

/// NSW tuning parameters, parsed from a library's `index_params`.
#[derive(Debug, Clone)]
pub struct NswParams {
    /// Neighbors kept per node.
    pub m: usize,
    /// Beam breadth while linking a new node.
    pub ef_construction: usize,
    /// Beam breadth at query time.
    pub ef_search: usize,
    /// Reserved for stochastic neighbor selection; the shipped heuristic is
    /// deterministic.
    pub seed: u64,
}

impl Default for NswParams {
    fn default() -> Self {
        Self {
            m: DEFAULT_M,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            ef_search: DEFAULT_EF_SEARCH,
            seed: DEFAULT_SEED,
        }
    }
}

impl NswParams {
    pub fn from_metadata(params: &Metadata) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            m: param_usize(params, "m")?.unwrap_or(defaults.m).max(1),
            ef_construction: param_usize(params, "ef_construction")?
                .unwrap_or(defaults.ef_construction)
                .max(1),
            ef_search: param_usize(params, "ef_search")?
                .unwrap_or(defaults.ef_search)
                .max(1),
            seed: param_u64(params, "seed")?.unwrap_or(defaults.seed),
        })
    }
}

struct Node {
    vector: Vec<f32>,
    /// `(neighbor, similarity)`, symmetric with the neighbor's own list.
    neighbors: Adjacency,
}

/// Incremental small-world graph index.
pub struct NswIndex {
    params: NswParams,
    nodes: HashMap<Uuid, Node>,
    metadata: HashMap<Uuid, Metadata>,
    entry_point: Option<Uuid>,
    dimension: Option<usize>,
}

/// Search frontier candidate; max-heap by score, smaller id wins ties.
#[derive(Clone, PartialEq)]
struct Candidate {
    id: Uuid,
    score: f32,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl NswIndex {
    #[must_use]
    pub fn new(params: NswParams) -> Self {
        Self {
            params,
            nodes: HashMap::new(),
            metadata: HashMap::new(),
            entry_point: None,
            dimension: None,
        }
    }

    /// Current entry point, if the graph is non-empty.
    #[must_use]
    pub fn entry_point(&self) -> Option<Uuid> {
        self.entry_point
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

    /// Beam search from `start`: the `ef` best-scored nodes reachable,
    /// ordered by descending similarity, ascending id on ties.
    fn beam_search(&self, query: &[f32], ef: usize, start: Uuid) -> Vec<(Uuid, f32)> {
        let Some(start_node) = self.nodes.get(&start) else {
            return Vec::new();
        };

        let mut visited: HashSet<Uuid> = HashSet::with_capacity(ef * 2);
        let mut frontier = BinaryHeap::with_capacity(ef * 2);
        let mut results = TopK::new(ef);

        let start_score = dot(query, &start_node.vector);
        visited.insert(start);
        frontier.push(Candidate {
            id: start,
            score: start_score,
        });
        results.push(start, start_score);

        while let Some(current) = frontier.pop() {
            if let Some(worst) = results.threshold() {
                if current.score < worst {
                    break;
                }
            }
            let Some(node) = self.nodes.get(&current.id) else {
                continue;
            };
            for &(neighbor, _) in &node.neighbors {
                if !visited.insert(neighbor) {
                    continue;
                }
                let Some(neighbor_node) = self.nodes.get(&neighbor) else {
                    continue;
                };
                let score = dot(query, &neighbor_node.vector);
                let admit = results.threshold().is_none_or(|worst| score > worst);
                if admit {
                    frontier.push(Candidate {
                        id: neighbor,
                        score,
                    });
                    results.push(neighbor, score);
                }
            }
        }

        results.into_sorted()
    }

    /// Diversified neighbor selection.
    ///
    /// Walk candidates in descending similarity to the base vector; accept
    /// one iff it is closer to the base than to every already-accepted
    /// neighbor. Remaining slots are backfilled with the closest rejects so
    /// a node never ends up under-connected just because its neighborhood is
    /// tight.
    fn select_diverse(
        &self,
        base: &[f32],
        candidates: &[(Uuid, f32)],
        m: usize,
    ) -> Vec<(Uuid, f32)> {
        let mut selected: Vec<(Uuid, f32)> = Vec::with_capacity(m.min(candidates.len()));

        for &(candidate, sim_to_base) in candidates {
            if selected.len() >= m {
                break;
            }
            let Some(candidate_node) = self.nodes.get(&candidate) else {
                continue;
            };
            let diverse = selected.iter().all(|(accepted, _)| {
                let accepted_vec = &self.nodes[accepted].vector;
                sim_to_base > dot(&candidate_node.vector, accepted_vec)
            });
            if diverse {
                selected.push((candidate, sim_to_base));
            }
        }

        if selected.len() < m {
            for &(candidate, sim_to_base) in candidates {
                if selected.len() >= m {
                    break;
                }
                if self.nodes.contains_key(&candidate)
                    && !selected.iter().any(|(id, _)| *id == candidate)
                {
                    selected.push((candidate, sim_to_base));
                }
            }
        }

        selected
    }

    /// Link a node that is already present in `nodes` but has no edges.
    fn link(&mut self, id: Uuid, prune: bool) {
        let Some(start) = self.start_for(id) else {
            return;
        };
        let vector = self.nodes[&id].vector.clone();
        let ef = self.params.ef_construction.max(self.params.m);
        let mut candidates = self.beam_search(&vector, ef, start);
        candidates.retain(|(cid, _)| *cid != id);
        let selected = self.select_diverse(&vector, &candidates, self.params.m);

        // Drop any edges the node still holds so symmetry survives re-linking.
        let stale: Vec<Uuid> = self.nodes[&id].neighbors.iter().map(|(x, _)| *x).collect();
        for neighbor in stale {
            if let Some(node) = self.nodes.get_mut(&neighbor) {
                node.neighbors.retain(|(x, _)| *x != id);
            }
        }

        self.nodes.get_mut(&id).unwrap().neighbors = selected.iter().copied().collect();
        for &(neighbor, score) in &selected {
            if let Some(node) = self.nodes.get_mut(&neighbor) {
                if !node.neighbors.iter().any(|(x, _)| *x == id) {
                    node.neighbors.push((id, score));
                }
            }
        }

        if prune {
            let overfull: Vec<Uuid> = selected
                .iter()
                .map(|(nid, _)| *nid)
                .filter(|nid| {
                    self.nodes
                        .get(nid)
                        .is_some_and(|n| n.neighbors.len() > self.params.m)
                })
                .collect();
            for nid in overfull {
                self.prune_neighbors(nid);
            }
        }
    }

    /// Re-run the selection heuristic on an over-full node's edge list,
    /// keeping the graph symmetric by dropping the reverse edges too.
    fn prune_neighbors(&mut self, id: Uuid) {
        let (kept, dropped) = {
            let node = &self.nodes[&id];
            let mut candidates: Vec<(Uuid, f32)> = node.neighbors.to_vec();
            candidates
                .sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            let kept = self.select_diverse(&node.vector, &candidates, self.params.m);
            let dropped: Vec<Uuid> = candidates
                .iter()
                .map(|(cid, _)| *cid)
                .filter(|cid| !kept.iter().any(|(kid, _)| kid == cid))
                .collect();
            (kept, dropped)
        };

        self.nodes.get_mut(&id).unwrap().neighbors = kept.into_iter().collect();
        let mut orphaned = Vec::new();
        for cid in dropped {
            if let Some(node) = self.nodes.get_mut(&cid) {
                node.neighbors.retain(|(x, _)| *x != id);
                if node.neighbors.is_empty() {
                    orphaned.push(cid);
                }
            }
        }
        // Re-link without pruning so a repair cannot cascade.
        for cid in orphaned {
            self.link(cid, false);
        }
    }

    /// A node to start a beam search from, other than `exclude`.
    fn start_for(&self, exclude: Uuid) -> Option<Uuid> {
        match self.entry_point {
            Some(entry) if entry != exclude => Some(entry),
            _ => self
                .nodes
                .keys()
                .filter(|&&id| id != exclude)
                .min()
                .copied(),
        }
    }

    /// Detach all of a node's edges, keeping the node itself.
    fn detach_edges(&mut self, id: Uuid) {
        let Some(neighbors) = self
            .nodes
            .get_mut(&id)
            .map(|n| std::mem::take(&mut n.neighbors))
        else {
            return;
        };
        let mut orphaned = Vec::new();
        for (neighbor, _) in neighbors {
            if let Some(node) = self.nodes.get_mut(&neighbor) {
                node.neighbors.retain(|(x, _)| *x != id);
                if node.neighbors.is_empty() {
                    orphaned.push(neighbor);
                }
            }
        }
        if self.nodes.len() > 2 {
            for neighbor in orphaned {
                self.link(neighbor, false);
            }
        }
    }
}

impl VectorIndex for NswIndex {
    fn add(&mut self, id: Uuid, vector: Vec<f32>, metadata: Metadata) -> Result<()> {
        self.check_dimension(vector.len())?;
        if self.nodes.contains_key(&id) {
            self.remove(id);
        }

        self.nodes.insert(
            id,
            Node {
                vector,
                neighbors: Adjacency::new(),
            },
        );
        self.metadata.insert(id, metadata);

        if self.entry_point.is_none() {
            self.entry_point = Some(id);
        } else {
            self.link(id, true);
        }
        Ok(())
    }

    fn update(
        &mut self,
        id: Uuid,
        vector: Option<Vec<f32>>,
        metadata: Option<Metadata>,
    ) -> Result<()> {
        if !self.nodes.contains_key(&id) {
            return Err(StoreError::NotFound(format!("chunk {id}")));
        }
        if let Some(vector) = vector {
            self.check_dimension(vector.len())?;
            // Topology must reflect the new position: detach and re-link.
            self.detach_edges(id);
            self.nodes.get_mut(&id).unwrap().vector = vector;
            self.link(id, true);
        }
        if let Some(metadata) = metadata {
            self.metadata.insert(id, metadata);
        }
        Ok(())
    }

    fn remove(&mut self, id: Uuid) {
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        self.metadata.remove(&id);

        let mut orphaned = Vec::new();
        for (neighbor, _) in &node.neighbors {
            if let Some(nb) = self.nodes.get_mut(neighbor) {
                nb.neighbors.retain(|(x, _)| *x != id);
                if nb.neighbors.is_empty() {
                    orphaned.push(*neighbor);
                }
            }
        }

        if self.entry_point == Some(id) {
            self.entry_point = self.nodes.keys().min().copied();
        }

        if self.nodes.len() > 1 {
            for neighbor in orphaned {
                self.link(neighbor, false);
            }
        }
    }

    fn build(&mut self) -> Result<()> {
        Ok(())
    }

    fn query(&self, query: &[f32], k: usize) -> Vec<(Uuid, f32)> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };
        let ef = self.params.ef_search.max(k);
        let mut results = self.beam_search(query, ef, entry);

        // A disconnected component can leave the beam short; top up from a
        // scan so an unfiltered query always yields min(k, len) results.
        if results.len() < k && results.len() < self.nodes.len() {
            let found: HashSet<Uuid> = results.iter().map(|(id, _)| *id).collect();
            let mut top = TopK::new(k);
            for (id, score) in &results {
                top.push(*id, *score);
            }
            for (id, node) in &self.nodes {
                if !found.contains(id) {
                    top.push(*id, dot(query, &node.vector));
                }
            }
            return top.into_sorted();
        }

        results.truncate(k);
        results
    }

    fn contains(&self, id: Uuid) -> bool {
        self.nodes.contains_key(&id)
    }

    fn metadata(&self, id: Uuid) -> Option<&Metadata> {
        self.metadata.get(&id)
    }

    fn vector(&self, id: Uuid) -> Option<&[f32]> {
        self.nodes.get(&id).map(|n| n.vector.as_slice())
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            kind: IndexKind::Nsw,
            num_vectors: self.nodes.len(),
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

    /// Deterministic pseudo-random unit vector.
    fn pseudo_vector(i: usize, dim: usize) -> Vec<f32> {
        let v: Vec<f32> = (0..dim)
            .map(|j| (((i * 31 + j * 17 + 7) % 101) as f32 / 101.0) - 0.5)
            .collect();
        unit(v)
    }

    fn small_graph(n: usize) -> NswIndex {
        let mut index = NswIndex::new(NswParams {
            m: 6,
            ef_construction: 32,
            ef_search: 64,
            seed: 42,
        });
        for i in 0..n {
            index
                .add(uid(i as u128 + 1), pseudo_vector(i, 8), Metadata::new())
                .unwrap();
        }
        index
    }

    #[test]
    fn first_insert_becomes_entry_point() {
        let mut index = NswIndex::new(NswParams::default());
        index
            .add(uid(7), unit(vec![1.0, 0.0]), Metadata::new())
            .unwrap();
        assert_eq!(index.entry_point(), Some(uid(7)));
        let results = index.query(&unit(vec![1.0, 0.0]), 3);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, uid(7));
    }

    #[test]
    fn edges_stay_symmetric_and_bounded() {
        let index = small_graph(50);
        for (id, node) in &index.nodes {
            assert!(
                node.neighbors.len() <= index.params.m,
                "node {id} has {} neighbors",
                node.neighbors.len()
            );
            for (neighbor, _) in &node.neighbors {
                let back = &index.nodes[neighbor].neighbors;
                assert!(
                    back.iter().any(|(x, _)| x == id),
                    "edge {id} -> {neighbor} has no reverse"
                );
            }
        }
    }

    #[test]
    fn query_finds_exact_match_and_fills_k() {
        let index = small_graph(60);
        let target = pseudo_vector(17, 8);
        let results = index.query(&target, 10);
        assert_eq!(results.len(), 10);
        assert_eq!(results[0].0, uid(18));
        assert!((results[0].1 - 1.0).abs() < 1e-5);
        // Ordered by score descending.
        for pair in results.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn removing_entry_point_keeps_graph_searchable() {
        let mut index = small_graph(40);
        let entry = index.entry_point().unwrap();
        index.remove(entry);
        assert_eq!(index.len(), 39);
        assert!(index.entry_point().is_some());
        assert_ne!(index.entry_point(), Some(entry));

        let results = index.query(&pseudo_vector(3, 8), 5);
        assert_eq!(results.len(), 5);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut index = small_graph(10);
        index.remove(uid(4));
        index.remove(uid(4));
        assert_eq!(index.len(), 9);
    }

    #[test]
    fn vector_update_relocates_node() {
        let mut index = small_graph(30);
        let far = unit(vec![1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0, -1.0]);
        index.update(uid(5), Some(far.clone()), None).unwrap();

        let results = index.query(&far, 1);
        assert_eq!(results[0].0, uid(5));
        assert!((results[0].1 - 1.0).abs() < 1e-5);
    }

    #[test]
    fn metadata_only_update_keeps_topology() {
        let mut index = small_graph(20);
        let before = index.query(&pseudo_vector(2, 8), 5);
        let mut meta = Metadata::new();
        meta.insert("tag".to_string(), "fresh".into());
        index.update(uid(9), None, Some(meta)).unwrap();
        let after = index.query(&pseudo_vector(2, 8), 5);
        assert_eq!(before, after);
        assert!(index.metadata(uid(9)).unwrap().contains_key("tag"));
    }

    #[test]
    fn update_of_unknown_id_is_not_found() {
        let mut index = small_graph(5);
        let err = index.update(uid(99), None, Some(Metadata::new())).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
