use crate::convergence::{contains_nan, dot, norm, ConvergenceParams};
use crate::error::{OptError, Result};
use crate::float::Float;
use crate::lbfgs::LbfgsState;
use crate::line_search::{armijo_wolfe, WolfeParams};
use crate::oracle::Oracle;

/// Stop the inner loop as soon as the convergence measure drops below
/// `uo_stop` instead of spending the remaining step budget.
const BREAK_EARLY: bool = true;

/// Outcome of one inner (unconstrained) optimization run.
///
/// The energy, gradient, and per-term fields describe the most recent
/// evaluation before any position update, so `norm_grad` is the measure the
/// caller tests against `uo_stop`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MinimizeResult<F> {
    /// Final point.
    pub x: Vec<F>,
    /// Energy `ϕ` at the most recent evaluation.
    pub energy: F,
    /// Convergence measure `⟨g, g_pre⟩` at the most recent evaluation.
    pub norm_grad: F,
    /// Gradient at the most recent evaluation.
    pub gradient: Vec<F>,
    /// Preconditioned gradient at the most recent evaluation.
    pub preconditioned: Vec<F>,
    /// A recoverable numerical failure (NaN energy) was detected.
    pub failed: bool,
    /// Per-objective-term energies at the most recent evaluation.
    pub obj_energies: Vec<F>,
    /// Per-constraint-term penalties at the most recent evaluation.
    pub constr_energies: Vec<F>,
    /// Loop iterations consumed.
    pub iterations: usize,
}

/// Run up to `num_steps` L-BFGS iterations of `oracle` starting at `x0`.
///
/// Each iteration evaluates the oracle, preconditions the gradient through
/// `lbfgs`, and walks along `−g_pre` by a step length from the
/// Armijo/weak-Wolfe line search. The loop ends early once
/// `⟨g, g_pre⟩ < uo_stop`.
///
/// NaN in the incoming point or the returned gradient is fatal. NaN in the
/// energy is recoverable: the run stops and reports `failed` so the outer
/// driver can park the state instead of unwinding.
pub fn minimize<F: Float>(
    oracle: &dyn Oracle<F>,
    x0: &[F],
    lbfgs: &mut LbfgsState<F>,
    num_steps: usize,
    convergence: &ConvergenceParams<F>,
    line_search: &WolfeParams<F>,
) -> Result<MinimizeResult<F>> {
    if num_steps < 1 {
        return Err(OptError::InsufficientSteps(num_steps));
    }

    let n = x0.len();
    let mut x = x0.to_vec();
    let mut energy = F::infinity();
    let mut gradient: Vec<F> = Vec::new();
    let mut preconditioned: Vec<F> = Vec::new();
    let mut obj_energies: Vec<F> = Vec::new();
    let mut constr_energies: Vec<F> = Vec::new();
    let mut norm_grad = F::infinity();
    let mut failed = false;
    let mut iterations = 0;

    for _ in 0..num_steps {
        iterations += 1;

        if contains_nan(&x) {
            return Err(OptError::NanInState);
        }

        let eval = oracle.eval(&x);
        if contains_nan(&eval.gradient) {
            return Err(OptError::NanInGradient);
        }

        let g_pre = lbfgs.step(&x, &eval.gradient)?;
        norm_grad = dot(&eval.gradient, &g_pre);

        energy = eval.energy;
        gradient = eval.gradient;
        preconditioned = g_pre;
        obj_energies = eval.obj_energies;
        constr_energies = eval.constr_energies;

        if BREAK_EARLY && norm_grad < convergence.uo_stop {
            break;
        }

        let direction: Vec<F> = preconditioned.iter().map(|&v| F::zero() - v).collect();
        let t = armijo_wolfe(oracle, &x, &direction, energy, &gradient, line_search);

        if energy.is_nan() || norm(&gradient).is_nan() {
            log::warn!("NaN energy after {} iterations, stopping inner loop", iterations);
            failed = true;
            break;
        }

        for i in 0..n {
            x[i] = x[i] - t * preconditioned[i];
        }
    }

    Ok(MinimizeResult {
        x,
        energy,
        norm_grad,
        gradient,
        preconditioned,
        failed,
        obj_energies,
        constr_energies,
        iterations,
    })
}
