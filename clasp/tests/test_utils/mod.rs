use std::collections::VecDeque;

use ahash::AHashSet;
use clasp::{ContactProblem, LinearToleranceControl};

pub fn init_logger() {
    let _ = env_logger::Builder::from_env("CLASP_LOG")
        .is_test(true)
        .try_init();
}

/// One scripted residual evaluation.
#[allow(dead_code)]
#[derive(Clone, Debug)]
pub struct ScriptedEvaluation {
    pub residual_norm: f64,
    pub domain_error: bool,
    pub active_contact: Vec<usize>,
}

#[allow(dead_code)]
impl ScriptedEvaluation {
    pub fn ok(residual_norm: f64) -> Self {
        ScriptedEvaluation {
            residual_norm,
            domain_error: false,
            active_contact: Vec::new(),
        }
    }

    /// A domain-errored evaluation. The norm is still reported by the
    /// evaluator but is meaningless; tests pass deceptive values on purpose.
    pub fn failed(residual_norm: f64) -> Self {
        ScriptedEvaluation {
            residual_norm,
            domain_error: true,
            active_contact: Vec::new(),
        }
    }

    pub fn with_contacts(mut self, ids: &[usize]) -> Self {
        self.active_contact = ids.to_vec();
        self
    }
}

/// Problem double that replays a fixed evaluation script and records what
/// the line search did to it.
#[allow(dead_code)]
pub struct ScriptedProblem {
    num_variables: usize,
    script: VecDeque<ScriptedEvaluation>,
    active: AHashSet<usize>,
    tolerance: f32,
    /// Every point the residual was evaluated at, in call order.
    pub evaluated_at: Vec<Vec<f64>>,
    /// Every tolerance written through `set_tolerance`, in call order.
    pub tolerance_writes: Vec<f32>,
}

#[allow(dead_code)]
impl ScriptedProblem {
    pub fn new(num_variables: usize, script: Vec<ScriptedEvaluation>) -> Self {
        ScriptedProblem {
            num_variables,
            script: script.into(),
            active: AHashSet::new(),
            tolerance: 1e-8,
            evaluated_at: Vec::new(),
            tolerance_writes: Vec::new(),
        }
    }

    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn push_script(&mut self, script: Vec<ScriptedEvaluation>) {
        self.script.extend(script);
    }

    pub fn script_exhausted(&self) -> bool {
        self.script.is_empty()
    }

    pub fn num_evaluations(&self) -> usize {
        self.evaluated_at.len()
    }
}

impl ContactProblem<f64> for ScriptedProblem {
    fn num_variables(&self) -> usize {
        self.num_variables
    }

    fn residual(&mut self, x: &[f64], r: &mut [f64]) -> bool {
        let eval = self
            .script
            .pop_front()
            .expect("scripted problem ran out of evaluations");
        self.evaluated_at.push(x.to_vec());
        // A residual whose two-norm equals the scripted value.
        r.fill(0.0);
        r[0] = eval.residual_norm;
        self.active = eval.active_contact.iter().copied().collect();
        eval.domain_error
    }

    fn active_contact(&self) -> &AHashSet<usize> {
        &self.active
    }
}

impl LinearToleranceControl for ScriptedProblem {
    fn tolerance(&self) -> f32 {
        self.tolerance
    }

    fn set_tolerance(&mut self, tolerance: f32) {
        self.tolerance = tolerance;
        self.tolerance_writes.push(tolerance);
    }
}
