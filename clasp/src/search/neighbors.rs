//! Candidate patches for the nearest-point search.
//!
//! Every secondary point carries a precomputed list of primary candidates
//! ordered by expected proximity. The ordering is a heuristic: it is computed
//! from positions at build time and goes stale as the solution moves the
//! points. The search tolerates a stale ordering; it only becomes a problem
//! when minima keep landing near the end of the lists, which is what
//! [`PatchRebuildPolicy`] watches for.

use ahash::AHashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::geom::Point;
use crate::Real;

/// Map from secondary point id to its ordered primary candidate ids.
#[derive(Clone, Debug, Default)]
pub struct NeighborList {
    patches: AHashMap<usize, Vec<usize>>,
}

impl NeighborList {
    pub fn new() -> Self {
        NeighborList {
            patches: AHashMap::new(),
        }
    }

    /// Builds patches of the `patch_size` nearest primaries for every
    /// secondary point, ordered closest first at build time.
    pub fn build<T: Real>(
        secondary: &[Point<T>],
        primary: &[Point<T>],
        patch_size: usize,
    ) -> Self {
        let patches = secondary
            .par_iter()
            .map(|s| {
                let mut by_distance: Vec<(T, usize)> =
                    primary.iter().map(|p| (s.distance_to(p), p.id)).collect();
                by_distance.sort_unstable_by(|a, b| {
                    a.0.partial_cmp(&b.0)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.1.cmp(&b.1))
                });
                by_distance.truncate(patch_size);
                (s.id, by_distance.into_iter().map(|(_, id)| id).collect())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .collect();
        NeighborList { patches }
    }

    pub fn insert(&mut self, secondary: usize, candidates: Vec<usize>) {
        self.patches.insert(secondary, candidates);
    }

    /// Candidate ids for `secondary`, or `None` when the point has no patch.
    pub fn candidates(&self, secondary: usize) -> Option<&[usize]> {
        self.patches.get(&secondary).map(|c| c.as_slice())
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn secondary_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.patches.keys().copied()
    }
}

/// Decides when candidate patches are worn out and should be rebuilt.
///
/// The search reports how deep into the worst candidate list it had to scan
/// before the minimum stopped improving. Once that fraction exceeds
/// `rebuild_fraction`, minima are landing near the end of the lists and the
/// true nearest point may lie beyond them.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchRebuildPolicy {
    pub rebuild_fraction: f64,
}

impl Default for PatchRebuildPolicy {
    fn default() -> Self {
        PatchRebuildPolicy {
            rebuild_fraction: 0.8,
        }
    }
}

impl PatchRebuildPolicy {
    pub fn needs_rebuild(&self, max_patch_fraction: f64) -> bool {
        max_patch_fraction > self.rebuild_fraction
    }
}
