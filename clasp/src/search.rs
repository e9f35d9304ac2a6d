//! Parallel nearest-point search over precomputed candidate patches.
//!
//! Each secondary point is paired with the closest primary point among its
//! candidates. The work range is split recursively and the halves are joined
//! with [`SearchOutcome::combine`], so the result is identical regardless of
//! how the range was partitioned.

mod neighbors;

pub use neighbors::{NeighborList, PatchRebuildPolicy};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geom::{contact_frame, ContactFrame, Dim, PointSet};
use crate::Real;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Smallest range of secondary points a worker will process without
    /// splitting further.
    pub min_grain_size: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams { min_grain_size: 16 }
    }
}

impl SearchParams {
    pub fn validated(self) -> Result<Self, crate::Error> {
        if self.min_grain_size == 0 {
            return Err(crate::Error::InvalidParameter {
                name: "min_grain_size".to_string(),
            });
        }
        Ok(self)
    }

    /// Grain size for a range of `num_points` spread over the available
    /// threads, never below `min_grain_size`.
    pub fn grain_for(&self, num_points: usize) -> usize {
        let threads = num_cpus::get().max(1);
        (num_points / threads).max(self.min_grain_size).max(1)
    }
}

/// Nearest primary pairing found for one secondary point.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NearestPointInfo<T> {
    /// Id of the paired primary point.
    pub primary: usize,
    /// Distance between the pair.
    pub distance: T,
    /// Fraction of the candidate list scanned before the minimum stopped
    /// improving. Values near one mean the patch ordering has gone stale.
    pub patch_fraction: f64,
}

/// Pairings produced by one search pass together with the staleness
/// diagnostic over all of them.
#[derive(Clone, Debug, Default)]
pub struct SearchOutcome<T> {
    nearest: AHashMap<usize, NearestPointInfo<T>>,
    max_patch_fraction: f64,
}

impl<T: Real> SearchOutcome<T> {
    pub fn nearest(&self, secondary: usize) -> Option<&NearestPointInfo<T>> {
        self.nearest.get(&secondary)
    }

    pub fn len(&self) -> usize {
        self.nearest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nearest.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &NearestPointInfo<T>)> {
        self.nearest.iter().map(|(&id, info)| (id, info))
    }

    /// Worst patch fraction over all pairings, zero for an empty outcome.
    pub fn max_patch_fraction(&self) -> f64 {
        self.max_patch_fraction
    }

    /// Merges the outcome of a disjoint range into this one.
    ///
    /// Combining is associative and commutative, so the recursive splits in
    /// [`find_nearest`] may join in any order.
    pub fn combine(mut self, other: SearchOutcome<T>) -> SearchOutcome<T> {
        for (id, info) in other.nearest {
            let prev = self.nearest.insert(id, info);
            debug_assert!(prev.is_none(), "secondary {} searched twice", id);
        }
        self.max_patch_fraction = self.max_patch_fraction.max(other.max_patch_fraction);
        self
    }

    /// Builds the contact frame of every pairing whose normal direction is
    /// well defined; coincident pairs are skipped.
    pub fn contact_frames(&self, dim: Dim, points: &PointSet<T>) -> AHashMap<usize, ContactFrame<T>> {
        self.nearest
            .iter()
            .filter_map(|(&sid, info)| {
                let s = points.get(sid)?;
                let p = points.get(info.primary)?;
                contact_frame(dim, s.pos, p.pos).map(|frame| (sid, frame))
            })
            .collect()
    }

    /// Checks the staleness diagnostic against `policy`, logging when the
    /// candidate patches should be rebuilt.
    pub fn check_patches(&self, policy: &PatchRebuildPolicy) -> bool {
        let rebuild = policy.needs_rebuild(self.max_patch_fraction);
        if rebuild {
            log::warn!(
                "Candidate patches stale: max patch fraction {:.3} exceeds {:.3}",
                self.max_patch_fraction,
                policy.rebuild_fraction
            );
        }
        rebuild
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SearchError {
    /// A secondary point has an empty or missing candidate patch.
    #[error("Secondary point {id} has no nearest-point candidates")]
    EmptyCandidateSet { id: usize },
    /// Every candidate distance came out non-finite.
    #[error("Nearest-point search diverged at secondary point {id}: non-finite candidates {offenders:?}")]
    Diverged { id: usize, offenders: Vec<usize> },
    /// A candidate or secondary id with no position in the point set.
    #[error("Point {id} is missing from the search point set")]
    MissingPoint { id: usize },
}

/// Pairs every secondary id in `range` with its nearest candidate primary.
///
/// Candidates are scanned in patch order and the running minimum keeps the
/// first of equally distant candidates. The range is split recursively until
/// it fits the grain size and the halves run under `rayon::join`.
pub fn find_nearest<T: Real>(
    range: &[usize],
    neighbors: &NeighborList,
    points: &PointSet<T>,
    params: SearchParams,
) -> Result<SearchOutcome<T>, SearchError> {
    let grain = params.grain_for(range.len());
    find_nearest_split(range, neighbors, points, grain)
}

fn find_nearest_split<T: Real>(
    range: &[usize],
    neighbors: &NeighborList,
    points: &PointSet<T>,
    grain: usize,
) -> Result<SearchOutcome<T>, SearchError> {
    if range.len() <= grain {
        return scan_range(range, neighbors, points);
    }
    let (lo, hi) = range.split_at(range.len() / 2);
    let (a, b) = rayon::join(
        || find_nearest_split(lo, neighbors, points, grain),
        || find_nearest_split(hi, neighbors, points, grain),
    );
    Ok(a?.combine(b?))
}

fn scan_range<T: Real>(
    range: &[usize],
    neighbors: &NeighborList,
    points: &PointSet<T>,
) -> Result<SearchOutcome<T>, SearchError> {
    let mut nearest = AHashMap::with_capacity(range.len());
    let mut max_patch_fraction = 0.0f64;

    for &sid in range {
        let s = points.get(sid).ok_or(SearchError::MissingPoint { id: sid })?;
        let candidates = neighbors
            .candidates(sid)
            .filter(|c| !c.is_empty())
            .ok_or(SearchError::EmptyCandidateSet { id: sid })?;

        let mut best: Option<(usize, T)> = None;
        let mut last_improved = 0;
        for (i, &pid) in candidates.iter().enumerate() {
            let p = points.get(pid).ok_or(SearchError::MissingPoint { id: pid })?;
            let d = s.distance_to(p);
            if d.is_finite() && best.map_or(true, |(_, bd)| d < bd) {
                best = Some((pid, d));
                last_improved = i;
            }
        }

        let (primary, distance) = best.ok_or_else(|| {
            let offenders = candidates
                .iter()
                .filter(|&&pid| {
                    points
                        .get(pid)
                        .map_or(false, |p| !s.distance_to(p).is_finite())
                })
                .copied()
                .collect();
            SearchError::Diverged { id: sid, offenders }
        })?;

        let patch_fraction = (last_improved + 1) as f64 / candidates.len() as f64;
        max_patch_fraction = max_patch_fraction.max(patch_fraction);
        nearest.insert(
            sid,
            NearestPointInfo {
                primary,
                distance,
                patch_fraction,
            },
        );
    }

    Ok(SearchOutcome {
        nearest,
        max_patch_fraction,
    })
}
