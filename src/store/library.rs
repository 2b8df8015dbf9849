//! Per-library searchable state and the over-fetch search pipeline.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::filter::Filter;
use crate::index::VectorIndex;

/// Over-fetch factor applied to k when filters are present, so
/// post-filtering can still fill k results.
pub(crate) const FILTER_OVERFETCH_MULTIPLIER: usize = 10;

/// Bound on multiplier doublings when a filter turns out more aggressive
/// than the over-fetch allowed for.
pub(crate) const MAX_FILTER_EXPANSIONS: usize = 3;

/// A library's index behind its reader/writer lock.
///
/// Searches take the read side for the index traversal only; every mutation
/// (add/update/remove/build) takes the write side, which makes writes
/// linearizable in lock-grant order. Embedding always happens before the
/// lock is acquired.
pub(crate) struct LibraryHandle {
    pub state: RwLock<LibraryState>,
}

pub(crate) struct LibraryState {
    pub index: Box<dyn VectorIndex>,
    pub last_built_at: Option<DateTime<Utc>>,
}

impl LibraryHandle {
    pub fn new(index: Box<dyn VectorIndex>) -> Self {
        Self {
            state: RwLock::new(LibraryState {
                index,
                last_built_at: None,
            }),
        }
    }
}

impl LibraryState {
    /// Query the index with over-fetch, stream candidates through the
    /// predicate in score order, and expand if the filter starved the
    /// result set.
    pub fn filtered_query(&self, query: &[f32], k: usize, filter: &Filter) -> Vec<(Uuid, f32)> {
        let size = self.index.len();
        if size == 0 || k == 0 {
            return Vec::new();
        }

        let mut multiplier = if filter.is_empty() {
            1
        } else {
            FILTER_OVERFETCH_MULTIPLIER
        };

        for expansion in 0.. {
            let k_effective = k.saturating_mul(multiplier).min(size);
            let candidates = self.index.query(query, k_effective);

            let mut accepted = Vec::with_capacity(k);
            for (id, score) in candidates {
                if accepted.len() >= k {
                    break;
                }
                if self
                    .index
                    .metadata(id)
                    .is_some_and(|meta| filter.matches(meta))
                {
                    accepted.push((id, score));
                }
            }

            let saturated = k_effective >= size;
            if accepted.len() >= k || saturated || expansion >= MAX_FILTER_EXPANSIONS {
                return accepted;
            }

            multiplier *= 2;
            debug!(
                expansion = expansion + 1,
                multiplier, "filter starved results, expanding over-fetch"
            );
        }
        unreachable!("expansion loop always returns");
    }
}
