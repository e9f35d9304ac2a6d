//! Damped Newton globalization aware of the active contact set.
//!
//! One invocation per outer nonlinear iteration: take the full Newton step,
//! then keep halving the step length as long as each halving still improves
//! the residual. The active contact set is snapshotted after every residual
//! evaluation; a change against the previously accepted set marks the next
//! Newton direction as unreliable and relaxes the linear solver tolerance.
//!
//! Domain errors reported by the evaluator (an internal sub-solve failing
//! under excessive penetration) are absorbed per trial. A domain-errored
//! trial compares worse than any finite trial and its numeric residual norm
//! never participates in comparisons, but it does not terminate the
//! backtrack loop; only a non-improving comparison or the halving budget
//! does.

use std::cell::RefCell;

use lazycell::LazyCell;
use serde::{Deserialize, Serialize};

use crate::contact::{ContactStateSet, ContactStateTracker};
use crate::problem::{ContactProblem, LinearToleranceControl, StepAdjuster};
use crate::{two_norm, Error, Real};

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineSearchParams {
    /// Cap on the number of step halvings per invocation.
    pub allowed_step_halvings: u32,
    /// Whether contact set changes drive linear solver tolerance relaxation.
    pub affect_linear_tolerance: bool,
    /// Relative tolerance written for the next linear solve after the
    /// contact set changed.
    pub relaxed_tolerance: f32,
}

impl Default for LineSearchParams {
    fn default() -> Self {
        LineSearchParams {
            allowed_step_halvings: 5,
            affect_linear_tolerance: false,
            relaxed_tolerance: 1e-4,
        }
    }
}

impl LineSearchParams {
    pub fn validated(self) -> Result<Self, Error> {
        if self.allowed_step_halvings == 0 {
            return Err(Error::InvalidParameter {
                name: "allowed_step_halvings".to_string(),
            });
        }
        if !(self.relaxed_tolerance > 0.0) {
            return Err(Error::InvalidParameter {
                name: "relaxed_tolerance".to_string(),
            });
        }
        Ok(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    /// The halving budget ran out with every trial reporting a domain error,
    /// so no finite residual exists to return.
    #[error("No usable step: all {evaluations} residual evaluations reported domain errors")]
    NoUsableStep { evaluations: usize },
}

/// Step accepted by one line search invocation.
///
/// The accepted point is written back into `x` and its residual into `r`;
/// this summarizes what happened on the way there.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AcceptedStep {
    /// Step length actually taken, in `(0, 1]`.
    pub lambda: f64,
    /// Two-norm of the residual at the accepted point.
    pub residual_norm: f64,
    /// Halvings baked into the accepted `lambda`.
    pub halvings: u32,
    /// Whether the full-step contact set differed from the previously
    /// accepted one.
    pub state_changed: bool,
    /// Whether the re-evaluation after a step adjustment hook reported a
    /// domain error. Always `false` when no hook mutated the step.
    pub domain_error: bool,
}

/// Linear solver tolerance bookkeeping for one solve.
///
/// The baseline is snapshotted from the caller's configuration at the first
/// invocation and never overwritten afterwards.
struct ToleranceState {
    baseline: LazyCell<f32>,
    relaxed: f32,
}

impl ToleranceState {
    fn new(relaxed: f32) -> Self {
        ToleranceState {
            baseline: LazyCell::new(),
            relaxed,
        }
    }

    fn baseline<C: LinearToleranceControl + ?Sized>(&self, control: &C) -> f32 {
        *self.baseline.borrow_with(|| control.tolerance())
    }

    fn write<C: LinearToleranceControl + ?Sized>(&self, control: &mut C, state_changed: bool) {
        let tolerance = if state_changed {
            self.relaxed
        } else {
            self.baseline(control)
        };
        control.set_tolerance(tolerance);
    }
}

#[derive(Copy, Clone, Debug)]
struct Trial {
    lambda: f64,
    residual_norm: f64,
    domain_error: bool,
    halvings: u32,
}

impl Trial {
    /// Strict improvement over `best`. A domain-errored trial never wins; a
    /// finite trial always beats a domain-errored best. Numeric norms are
    /// only compared when both trials are finite.
    fn improves(&self, best: &Trial) -> bool {
        if self.domain_error {
            false
        } else if best.domain_error {
            true
        } else {
            self.residual_norm < best.residual_norm
        }
    }
}

struct LineSearchWorkspace<T> {
    w: Vec<T>,
    best_w: Vec<T>,
    r_trial: Vec<T>,
}

/// Contact-aware backtracking line search. One value lives as long as one
/// nonlinear solve; the accepted contact set and the tolerance baseline are
/// carried across invocations.
pub struct ContactLineSearch<T> {
    params: LineSearchParams,
    tracker: ContactStateTracker,
    tolerance: ToleranceState,
    adjusters: Vec<Box<dyn StepAdjuster<T>>>,
    workspace: RefCell<LineSearchWorkspace<T>>,
    previous_residual_norm: Option<f64>,
    invocations: u64,
}

impl<T: Real> ContactLineSearch<T> {
    pub fn new(params: LineSearchParams) -> Result<Self, Error> {
        let params = params.validated()?;
        Ok(ContactLineSearch {
            params,
            tracker: ContactStateTracker::new(),
            tolerance: ToleranceState::new(params.relaxed_tolerance),
            adjusters: Vec::new(),
            workspace: RefCell::new(LineSearchWorkspace {
                w: Vec::new(),
                best_w: Vec::new(),
                r_trial: Vec::new(),
            }),
            previous_residual_norm: None,
            invocations: 0,
        })
    }

    pub fn params(&self) -> &LineSearchParams {
        &self.params
    }

    /// Contact set accepted by the previous invocation, empty before the
    /// first one.
    pub fn previous_state(&self) -> &ContactStateSet {
        self.tracker.previous()
    }

    /// Residual norm accepted by the previous invocation.
    pub fn previous_residual_norm(&self) -> Option<f64> {
        self.previous_residual_norm
    }

    /// Registers a step adjustment hook, run in registration order.
    pub fn add_adjuster(&mut self, adjuster: Box<dyn StepAdjuster<T>>) {
        self.adjusters.push(adjuster);
    }

    /// Damps the Newton step `y` from the iterate `x`.
    ///
    /// On success the accepted point is written into `x` and its residual
    /// into `r`; `y` may have been mutated by a pre-check hook. The accepted
    /// residual norm and contact set become the "previous" values of the
    /// next invocation.
    pub fn search<P>(
        &mut self,
        x: &mut [T],
        y: &mut [T],
        r: &mut [T],
        problem: &mut P,
    ) -> Result<AcceptedStep, StepError>
    where
        P: ContactProblem<T> + LinearToleranceControl,
    {
        debug_assert_eq!(problem.num_variables(), x.len());
        debug_assert_eq!(y.len(), x.len());
        debug_assert_eq!(r.len(), x.len());

        let LineSearchWorkspace { w, best_w, r_trial } = &mut *self.workspace.borrow_mut();
        w.clear();
        w.resize(x.len(), T::zero());
        best_w.clear();
        best_w.resize(x.len(), T::zero());
        r_trial.clear();
        r_trial.resize(x.len(), T::zero());

        // Snapshot the baseline tolerance exactly once per solve.
        let _ = self.tolerance.baseline(problem);

        for adjuster in self.adjusters.iter_mut() {
            if adjuster.pre_check(x, y) {
                log::trace!("Step direction mutated by a pre-check hook");
            }
        }

        if self.invocations == 0 {
            log_debug_stats_header();
        }

        // Full Newton step first; its residual lands in the caller's `r` so
        // `r` always holds the best trial's residual.
        let mut lambda = 1.0;
        take_step(w, x, y, lambda);
        let domain_error = problem.residual(w, r);
        let mut evaluations = 1usize;
        let mut best = Trial {
            lambda,
            residual_norm: two_norm(r),
            domain_error,
            halvings: 0,
        };
        best_w.copy_from_slice(w);
        let mut state_now = ContactStateSet::capture(problem);

        let state_changed = self.tracker.changed(&state_now);
        if state_changed {
            log::info!(
                "Active contact set changed: {} -> {} points",
                self.tracker.previous().len(),
                state_now.len()
            );
        }
        if self.params.affect_linear_tolerance {
            self.tolerance.write(problem, state_changed);
        }

        let mut halvings = 0u32;
        while halvings < self.params.allowed_step_halvings {
            halvings += 1;
            lambda *= 0.5;
            take_step(w, x, y, lambda);
            let trial_domain_error = problem.residual(w, r_trial);
            evaluations += 1;
            let trial = Trial {
                lambda,
                residual_norm: two_norm(r_trial),
                domain_error: trial_domain_error,
                halvings,
            };
            log::trace!(
                "Trial lambda {:.3e}: residual {:10.3e} (domain error: {})",
                trial.lambda,
                trial.residual_norm,
                trial.domain_error
            );

            if trial.improves(&best) {
                best = trial;
                best_w.copy_from_slice(w);
                r.copy_from_slice(r_trial);
                state_now = ContactStateSet::capture(problem);
            } else if best.domain_error && trial.domain_error {
                // Nothing to compare yet; keep halving until the budget runs
                // out or a finite residual appears.
                continue;
            } else {
                break;
            }
        }

        if best.domain_error {
            return Err(StepError::NoUsableStep { evaluations });
        }

        let mut adjusted = false;
        for adjuster in self.adjusters.iter_mut() {
            adjusted |= adjuster.post_check(x, &mut best.lambda, best_w);
        }
        let mut post_domain_error = false;
        if adjusted {
            // The hooks changed the step; one re-evaluation keeps the
            // residual and contact bookkeeping consistent with what is
            // returned.
            post_domain_error = problem.residual(best_w, r);
            best.residual_norm = two_norm(r);
            state_now = ContactStateSet::capture(problem);
            if post_domain_error {
                log::warn!("Residual evaluation after step adjustment reported a domain error");
            }
        }

        x.copy_from_slice(best_w);
        self.tracker.commit(state_now);
        self.invocations += 1;
        log_debug_stats(
            self.invocations,
            &best,
            state_changed,
            self.previous_residual_norm,
        );
        self.previous_residual_norm = Some(best.residual_norm);

        Ok(AcceptedStep {
            lambda: best.lambda,
            residual_norm: best.residual_norm,
            halvings: best.halvings,
            state_changed,
            domain_error: post_domain_error,
        })
    }
}

/// `w = x - lambda * y`.
fn take_step<T: Real>(w: &mut [T], x: &[T], y: &[T], lambda: f64) {
    let neg_lambda = T::from(-lambda).unwrap();
    for ((w, &x), &y) in w.iter_mut().zip(x.iter()).zip(y.iter()) {
        *w = num_traits::Float::mul_add(y, neg_lambda, x);
    }
}

fn log_debug_stats_header() {
    log::debug!("    i |   lambda  |   res-2   |  res-2/prev  | cuts | state changed ");
    log::debug!("------+-----------+-----------+--------------+------+---------------");
}

fn log_debug_stats(i: u64, accepted: &Trial, state_changed: bool, previous_norm: Option<f64>) {
    let reduction = previous_norm.map_or(f64::NAN, |prev| accepted.residual_norm / prev);
    log::debug!(
        "{i:>5} | {lambda:9.2e} | {res:9.2e} | {red:12.5e} | {cuts:>4} | {changed:>13} ",
        i = i,
        lambda = accepted.lambda,
        res = accepted.residual_norm,
        red = reduction,
        cuts = accepted.halvings,
        changed = state_changed,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trial(residual_norm: f64, domain_error: bool) -> Trial {
        Trial {
            lambda: 1.0,
            residual_norm,
            domain_error,
            halvings: 0,
        }
    }

    #[test]
    fn domain_error_trials_lose_every_comparison() {
        // The numeric norm of a domain-errored trial is meaningless and must
        // never decide a comparison.
        assert!(!trial(1e-12, true).improves(&trial(1e6, false)));
        assert!(trial(1e6, false).improves(&trial(1e-12, true)));
        assert!(!trial(0.5, true).improves(&trial(1.0, true)));
    }

    #[test]
    fn finite_comparison_is_strict() {
        assert!(trial(0.5, false).improves(&trial(1.0, false)));
        assert!(!trial(1.0, false).improves(&trial(1.0, false)));
        assert!(!trial(2.0, false).improves(&trial(1.0, false)));
    }

    #[test]
    fn params_are_validated() {
        assert!(LineSearchParams::default().validated().is_ok());
        assert!(LineSearchParams {
            allowed_step_halvings: 0,
            ..Default::default()
        }
        .validated()
        .is_err());
        assert!(LineSearchParams {
            relaxed_tolerance: 0.0,
            ..Default::default()
        }
        .validated()
        .is_err());
    }

    #[test]
    fn take_step_is_a_damped_update() {
        let x = [1.0f64, 2.0, 3.0];
        let y = [2.0f64, 2.0, 2.0];
        let mut w = [0.0f64; 3];
        take_step(&mut w, &x, &y, 0.5);
        assert_eq!(w, [0.0, 1.0, 2.0]);
    }
}
