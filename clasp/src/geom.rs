//! Point storage and the small amount of vector geometry the search needs.
//!
//! Positions are always stored with three coordinates; planar problems embed
//! in the `z = 0` plane. Point ids are stable mesh-wide identifiers and are
//! not required to be dense.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::Real;

/// Spatial dimension of the problem.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dim {
    Two,
    Three,
}

/// A mesh point on one side of a candidate contact interface.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point<T> {
    /// Stable identifier of this point.
    pub id: usize,
    pub pos: [T; 3],
    /// Partition (rank) that owns this point.
    pub owner: usize,
}

impl<T: Real> Point<T> {
    pub fn new(id: usize, pos: [T; 3]) -> Self {
        Point { id, pos, owner: 0 }
    }

    pub fn with_owner(mut self, owner: usize) -> Self {
        self.owner = owner;
        self
    }

    pub fn distance_to(&self, other: &Point<T>) -> T {
        distance(self.pos, other.pos)
    }
}

/// Id-keyed storage for the positions of all points visible to a search pass.
///
/// Immutable during one search pass; the enclosing solve moves positions
/// between outer iterations by rebuilding or updating the set.
#[derive(Clone, Debug, Default)]
pub struct PointSet<T> {
    points: AHashMap<usize, Point<T>>,
}

impl<T: Real> PointSet<T> {
    pub fn new() -> Self {
        PointSet {
            points: AHashMap::new(),
        }
    }

    pub fn insert(&mut self, point: Point<T>) {
        self.points.insert(point.id, point);
    }

    pub fn get(&self, id: usize) -> Option<&Point<T>> {
        self.points.get(&id)
    }

    pub fn contains(&self, id: usize) -> bool {
        self.points.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.points.keys().copied()
    }
}

impl<T: Real> FromIterator<Point<T>> for PointSet<T> {
    fn from_iter<I: IntoIterator<Item = Point<T>>>(iter: I) -> Self {
        PointSet {
            points: iter.into_iter().map(|p| (p.id, p)).collect(),
        }
    }
}

pub fn distance<T: Real>(a: [T; 3], b: [T; 3]) -> T {
    let d = sub(a, b);
    dot(d, d).sqrt()
}

/// Tangential directions at a contact pair, keyed on the spatial dimension.
///
/// Planar problems carry a single tangent; spatial problems carry two. This
/// replaces a nullable "second tangent" representation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TangentBasis<T> {
    Planar { t: [T; 3] },
    Spatial { t1: [T; 3], t2: [T; 3] },
}

impl<T: Real> TangentBasis<T> {
    /// Builds an orthonormal tangent basis for the given contact normal.
    ///
    /// Returns `None` when the normal is degenerate (zero or non-finite).
    pub fn from_normal(dim: Dim, normal: [T; 3]) -> Option<Self> {
        let n = normalized(normal)?;
        match dim {
            Dim::Two => {
                // In-plane perpendicular of the projected normal.
                let t = normalized([-n[1], n[0], T::zero()])?;
                Some(TangentBasis::Planar { t })
            }
            Dim::Three => {
                let t1 = normalized(cross(seed_axis(n), n))?;
                let t2 = cross(n, t1);
                Some(TangentBasis::Spatial { t1, t2 })
            }
        }
    }
}

/// Contact normal and tangent basis for a secondary/primary pair.
///
/// For node-to-node contact the normal points from the secondary point
/// towards its paired primary point.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ContactFrame<T> {
    pub normal: [T; 3],
    pub tangents: TangentBasis<T>,
}

/// Builds the contact frame for a paired secondary/primary point.
///
/// Returns `None` for coincident or non-finite positions, where no normal
/// direction exists.
pub fn contact_frame<T: Real>(dim: Dim, secondary: [T; 3], primary: [T; 3]) -> Option<ContactFrame<T>> {
    let normal = normalized(sub(primary, secondary))?;
    let tangents = TangentBasis::from_normal(dim, normal)?;
    Some(ContactFrame { normal, tangents })
}

fn sub<T: Real>(a: [T; 3], b: [T; 3]) -> [T; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot<T: Real>(a: [T; 3], b: [T; 3]) -> T {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross<T: Real>(a: [T; 3], b: [T; 3]) -> [T; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalized<T: Real>(v: [T; 3]) -> Option<[T; 3]> {
    let norm = dot(v, v).sqrt();
    if !norm.is_finite() || norm == T::zero() {
        return None;
    }
    Some([v[0] / norm, v[1] / norm, v[2] / norm])
}

/// Coordinate axis least aligned with `n`, used to seed the first tangent.
fn seed_axis<T: Real>(n: [T; 3]) -> [T; 3] {
    let ax = n[0].abs();
    let ay = n[1].abs();
    let az = n[2].abs();
    if ax <= ay && ax <= az {
        [T::one(), T::zero(), T::zero()]
    } else if ay <= az {
        [T::zero(), T::one(), T::zero()]
    } else {
        [T::zero(), T::zero(), T::one()]
    }
}
