//! Traits through which the external collaborators of the solve are reached.
//!
//! Residual assembly, the linear solver and step constraint logic all live
//! outside this crate. The line search only needs the three narrow surfaces
//! defined here.

use ahash::AHashSet;

use crate::Real;

/// Residual evaluator for the nonlinear contact problem.
///
/// In a distributed solve `residual` is a collective operation: every rank
/// calls it in lockstep with the same trial point, and the returned domain
/// error flag and residual entries must already be agreed across ranks
/// (logical OR for the flag) before the call returns. The line search
/// branches on the returned values, so rank-local disagreement would
/// desynchronize the collective call pattern.
pub trait ContactProblem<T: Real> {
    /// Number of unknowns in the solution vector.
    fn num_variables(&self) -> usize;

    /// Evaluates the residual at `x` into `r`.
    ///
    /// Returns `true` when the evaluation hit a domain error, typically an
    /// internal sub-solve that failed to converge under excessive
    /// penetration. The residual entries may be meaningless in that case.
    ///
    /// As a side effect every evaluation refreshes the active-contact side
    /// channel read by [`active_contact`](ContactProblem::active_contact).
    fn residual(&mut self, x: &[T], r: &mut [T]) -> bool;

    /// Secondary point ids whose contact constraint was active during the
    /// most recent [`residual`](ContactProblem::residual) call.
    fn active_contact(&self) -> &AHashSet<usize>;
}

/// Relative tolerance control of the enclosing linear solver.
pub trait LinearToleranceControl {
    fn tolerance(&self) -> f32;
    fn set_tolerance(&mut self, tolerance: f32);
}

/// Hook that may veto or mutate a proposed step, e.g. to enforce bound
/// constraints. Both checks return `true` when they mutated anything so the
/// line search can re-evaluate and keep its bookkeeping consistent with the
/// step it actually returns.
pub trait StepAdjuster<T: Real> {
    /// Runs before the full step is formed and may mutate the direction `y`.
    fn pre_check(&mut self, _x: &[T], _y: &mut [T]) -> bool {
        false
    }

    /// Runs on the accepted `(lambda, w)` and may mutate either.
    fn post_check(&mut self, x: &[T], lambda: &mut f64, w: &mut [T]) -> bool;
}
