//! Contact resolution for a distributed nonlinear finite element solve.
//!
//! Two pieces make up this crate. The geometric half pairs every "secondary"
//! surface point with its closest "primary" counterpart by scanning
//! precomputed candidate patches in parallel (see [`search`]). The numeric
//! half is a damped Newton globalization that stays robust while the active
//! contact set changes discontinuously between trial points (see
//! [`linesearch`]).
//!
//! Residual evaluation, mesh discretization and the linear solver itself are
//! external collaborators reached through the traits in [`problem`].

pub mod contact;
pub mod geom;
pub mod linesearch;
pub mod problem;
pub mod search;

use thiserror::Error;

pub use self::contact::{ContactStateSet, ContactStateTracker};
pub use self::geom::{contact_frame, ContactFrame, Dim, Point, PointSet, TangentBasis};
pub use self::linesearch::{AcceptedStep, ContactLineSearch, LineSearchParams, StepError};
pub use self::problem::{ContactProblem, LinearToleranceControl, StepAdjuster};
pub use self::search::{
    find_nearest, NearestPointInfo, NeighborList, PatchRebuildPolicy, SearchError, SearchOutcome,
    SearchParams,
};

/// Scalar type accepted by the computational entry points of this crate.
///
/// Positions and residual vectors are stored in `T`; norms and step lengths
/// are accumulated in `f64` regardless.
pub trait Real:
    num_traits::Float
    + num_traits::FromPrimitive
    + num_traits::ToPrimitive
    + std::fmt::Debug
    + Send
    + Sync
    + 'static
{
}

impl<T> Real for T where
    T: num_traits::Float
        + num_traits::FromPrimitive
        + num_traits::ToPrimitive
        + std::fmt::Debug
        + Send
        + Sync
        + 'static
{
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Search error: {source}")]
    Search {
        #[from]
        source: SearchError,
    },
    #[error("Line search error: {source}")]
    LineSearch {
        #[from]
        source: StepError,
    },
    #[error("Invalid parameter: {name:?}")]
    InvalidParameter { name: String },
}

pub(crate) fn two_norm<T: Real>(v: &[T]) -> f64 {
    v.iter()
        .map(|&x| {
            let x = x.to_f64().unwrap_or(f64::NAN);
            x * x
        })
        .sum::<f64>()
        .sqrt()
}
