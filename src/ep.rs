use std::fmt;
use std::rc::Rc;

use crate::convergence::{ep_converged, ConvergenceParams};
use crate::error::{OptError, Result};
use crate::float::Float;
use crate::lbfgs::{LbfgsParams, LbfgsState};
use crate::line_search::WolfeParams;
use crate::minimize::minimize;
use crate::oracle::{FrozenSet, OracleFactory, SharedOracle};

/// Where the exterior-point state machine currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OptStatus {
    /// Weights and oracle will be (re)initialized on the next step.
    NewIter,
    /// An unconstrained round at the current weight is in progress.
    UnconstrainedRunning,
    /// The current unconstrained round has converged.
    UnconstrainedConverged,
    /// Successive rounds agree; the optimization is finished.
    EpConverged,
    /// A recoverable numerical failure occurred; the state is parked.
    Error,
}

impl fmt::Display for OptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptStatus::NewIter => write!(f, "awaiting initialization"),
            OptStatus::UnconstrainedRunning => write!(f, "unconstrained round running"),
            OptStatus::UnconstrainedConverged => write!(f, "unconstrained round converged"),
            OptStatus::EpConverged => write!(f, "exterior point converged"),
            OptStatus::Error => write!(f, "numerical failure"),
        }
    }
}

/// Tunables for a whole optimization problem.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OptConfig<F> {
    /// Fixed multiplier on the constraint penalty sum (default: 1e4).
    pub constraint_scale: F,
    /// Exterior-point weight for the first round (default: 1e-2).
    pub init_constraint_weight: F,
    /// Per-round weight multiplier (default: 10).
    pub weight_growth_factor: F,
    /// Convergence thresholds.
    pub convergence: ConvergenceParams<F>,
    /// Preconditioner tunables.
    pub lbfgs: LbfgsParams<F>,
    /// Line search parameters.
    pub line_search: WolfeParams<F>,
}

impl Default for OptConfig<f64> {
    fn default() -> Self {
        OptConfig {
            constraint_scale: 1e4,
            init_constraint_weight: 1e-2,
            weight_growth_factor: 10.0,
            convergence: ConvergenceParams::default(),
            lbfgs: LbfgsParams::default(),
            line_search: WolfeParams::default(),
        }
    }
}

impl Default for OptConfig<f32> {
    fn default() -> Self {
        OptConfig {
            constraint_scale: 1e4,
            init_constraint_weight: 1e-2,
            weight_growth_factor: 10.0,
            convergence: ConvergenceParams::default(),
            lbfgs: LbfgsParams::default(),
            line_search: WolfeParams::default(),
        }
    }
}

/// Everything the driver carries between [`step`] invocations.
///
/// Snapshot energies start at `+∞` and snapshot states empty; they are
/// never compared before `ep_round > 1`, by which point both have been
/// written by completed rounds.
#[derive(Clone)]
pub struct OptParams<F: Float> {
    /// Current exterior-point penalty weight `w`.
    pub weight: F,
    /// Inner runs completed at the current weight.
    pub uo_round: usize,
    /// Completed exterior-point rounds.
    pub ep_round: usize,
    /// State-machine position.
    pub status: OptStatus,
    /// Point after the most recent inner run.
    pub last_uo_state: Vec<F>,
    /// Energy after the most recent inner run.
    pub last_uo_energy: F,
    /// Point snapshot from the prior exterior-point round.
    pub last_ep_state: Vec<F>,
    /// Energy snapshot from the prior exterior-point round.
    pub last_ep_energy: F,
    /// Gradient at the most recent inner evaluation.
    pub last_gradient: Vec<F>,
    /// Preconditioned gradient at the most recent inner evaluation.
    pub last_gradient_preconditioned: Vec<F>,
    /// Per-objective-term energies at the most recent inner evaluation.
    pub last_obj_energies: Vec<F>,
    /// Per-constraint-term penalties at the most recent inner evaluation.
    pub last_constr_energies: Vec<F>,
    /// Preconditioner history carried across invocations.
    pub lbfgs_info: LbfgsState<F>,
    /// Oracle bound to the current weight and frozen set.
    pub curr_oracle: SharedOracle<F>,
    /// Produces an oracle for a given weight and frozen set.
    pub oracle_factory: OracleFactory<F>,
    /// Tunables the problem was built with.
    pub config: OptConfig<F>,
}

impl<F: Float> fmt::Debug for OptParams<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptParams")
            .field("weight", &self.weight)
            .field("uo_round", &self.uo_round)
            .field("ep_round", &self.ep_round)
            .field("status", &self.status)
            .field("last_uo_energy", &self.last_uo_energy)
            .field("last_ep_energy", &self.last_ep_energy)
            .field("lbfgs_info", &self.lbfgs_info)
            .finish_non_exhaustive()
    }
}

/// One resumable optimization problem: the parameter vector, the indices
/// pinned to their current values, and the driver bookkeeping.
///
/// A `State` is handed off by value: [`step`] consumes it and returns its
/// successor. The state is terminal once the status is
/// [`EpConverged`](OptStatus::EpConverged) or [`Error`](OptStatus::Error).
#[derive(Debug, Clone)]
pub struct State<F: Float> {
    /// Parameter vector `x`.
    pub varying_values: Vec<F>,
    /// Indices treated as constants during optimization.
    pub frozen_values: FrozenSet,
    /// Driver bookkeeping.
    pub params: OptParams<F>,
}

impl<F: Float> State<F> {
    /// Start a problem at `x0` with nothing frozen.
    pub fn new(varying_values: Vec<F>, params: OptParams<F>) -> Self {
        State {
            varying_values,
            frozen_values: FrozenSet::new(),
            params,
        }
    }

    /// Start a problem at `x0` with the given indices pinned.
    ///
    /// The oracle is rebound through the factory so gradient masking
    /// reflects the frozen set from the first evaluation.
    pub fn with_frozen(
        varying_values: Vec<F>,
        frozen_values: FrozenSet,
        mut params: OptParams<F>,
    ) -> Self {
        let oracle = (params.oracle_factory)(params.config.init_constraint_weight, &frozen_values);
        params.curr_oracle = oracle;
        State {
            varying_values,
            frozen_values,
            params,
        }
    }

    /// True once no further step will change the state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.params.status,
            OptStatus::EpConverged | OptStatus::Error
        )
    }
}

/// Advance the exterior-point state machine by one transition.
///
/// At most `steps` inner iterations are performed (only in the
/// [`UnconstrainedRunning`](OptStatus::UnconstrainedRunning) arm); every
/// other arm is bookkeeping. The caller chooses the budget per invocation,
/// which is what keeps a long optimization interruptible from an outer
/// event loop.
///
/// Terminal states pass through unchanged. `steps < 1` is refused loudly.
pub fn step<F: Float>(state: State<F>, steps: usize) -> Result<State<F>> {
    if steps < 1 {
        return Err(OptError::InsufficientSteps(steps));
    }

    let State {
        mut varying_values,
        frozen_values,
        mut params,
    } = state;

    match params.status {
        OptStatus::NewIter => {
            let weight = params.config.init_constraint_weight;
            log::debug!("initializing exterior-point run at weight {weight}");
            params.curr_oracle = (params.oracle_factory)(weight, &frozen_values);
            params.weight = weight;
            params.uo_round = 0;
            params.ep_round = 0;
            params.lbfgs_info = LbfgsState::new(params.config.lbfgs.clone());
            params.status = OptStatus::UnconstrainedRunning;
        }

        OptStatus::UnconstrainedRunning => {
            let oracle = Rc::clone(&params.curr_oracle);
            let result = minimize(
                oracle.as_ref(),
                &varying_values,
                &mut params.lbfgs_info,
                steps,
                &params.config.convergence,
                &params.config.line_search,
            )?;

            varying_values = result.x;
            params.last_uo_state = varying_values.clone();
            params.last_uo_energy = result.energy;
            params.last_gradient = result.gradient;
            params.last_gradient_preconditioned = result.preconditioned;
            params.last_obj_energies = result.obj_energies;
            params.last_constr_energies = result.constr_energies;
            params.uo_round += 1;

            if result.failed {
                log::warn!(
                    "inner loop failed in exterior-point round {}, parking state",
                    params.ep_round
                );
                params.status = OptStatus::Error;
            } else if result.norm_grad < params.config.convergence.uo_stop {
                log::debug!(
                    "unconstrained round converged after {} iterations, energy {}",
                    result.iterations,
                    result.energy
                );
                params.status = OptStatus::UnconstrainedConverged;
                params.lbfgs_info = LbfgsState::new(params.config.lbfgs.clone());
            }
        }

        OptStatus::UnconstrainedConverged => {
            let converged = params.ep_round > 1
                && ep_converged(
                    &params.last_ep_state,
                    &params.last_uo_state,
                    params.last_ep_energy,
                    params.last_uo_energy,
                    params.config.convergence.ep_stop,
                );

            if converged {
                log::debug!(
                    "exterior point converged after {} rounds at energy {}",
                    params.ep_round,
                    params.last_uo_energy
                );
                params.status = OptStatus::EpConverged;
            } else {
                params.weight = params.config.weight_growth_factor * params.weight;
                params.curr_oracle = (params.oracle_factory)(params.weight, &frozen_values);
                params.uo_round = 0;
                params.ep_round += 1;
                params.status = OptStatus::UnconstrainedRunning;
                log::debug!(
                    "starting exterior-point round {} at weight {}",
                    params.ep_round,
                    params.weight
                );
            }

            params.last_ep_state = params.last_uo_state.clone();
            params.last_ep_energy = params.last_uo_energy;
        }

        OptStatus::EpConverged | OptStatus::Error => {}
    }

    Ok(State {
        varying_values,
        frozen_values,
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::InputMeta;
    use crate::problem::{build_problem, CompiledTerm};

    /// o(x) = 0.5 * sum(x_i^2)
    struct Sphere;

    impl CompiledTerm<f64> for Sphere {
        fn eval_grad(&self, x: &[f64]) -> (f64, Vec<f64>) {
            let value = 0.5 * x.iter().map(|&xi| xi * xi).sum::<f64>();
            (value, x.to_vec())
        }
    }

    fn sphere_state(x0: Vec<f64>) -> State<f64> {
        let inputs = vec![InputMeta::Optimized; x0.len()];
        let params = build_problem(&inputs, vec![Rc::new(Sphere)], vec![], OptConfig::default());
        State::new(x0, params)
    }

    #[test]
    fn zero_step_budget_is_refused() {
        let state = sphere_state(vec![1.0]);
        let err = step(state, 0).unwrap_err();
        assert_eq!(err, OptError::InsufficientSteps(0));
    }

    #[test]
    fn running_round_converges_and_resets_preconditioner() {
        let state = sphere_state(vec![5.0, -3.0]);
        let state = step(state, 50).unwrap();

        assert_eq!(state.params.status, OptStatus::UnconstrainedConverged);
        assert_eq!(state.params.uo_round, 1);
        assert_eq!(state.params.lbfgs_info.num_steps(), 0);
        assert_eq!(state.params.last_uo_state, state.varying_values);
    }

    #[test]
    fn new_iter_rebinds_without_moving() {
        let mut state = sphere_state(vec![4.0]);
        state.params.status = OptStatus::NewIter;
        state.params.weight = 77.0;
        state.params.ep_round = 9;

        let state = step(state, 50).unwrap();

        assert_eq!(state.params.status, OptStatus::UnconstrainedRunning);
        assert_eq!(state.params.weight, state.params.config.init_constraint_weight);
        assert_eq!(state.params.ep_round, 0);
        assert_eq!(state.params.uo_round, 0);
        assert_eq!(state.varying_values, vec![4.0]);
    }

    #[test]
    fn terminal_states_pass_through_unchanged() {
        for terminal in [OptStatus::EpConverged, OptStatus::Error] {
            let mut state = sphere_state(vec![2.0]);
            state.params.status = terminal;
            state.params.weight = 123.0;

            let stepped = step(state, 10).unwrap();

            assert_eq!(stepped.params.status, terminal);
            assert_eq!(stepped.params.weight, 123.0);
            assert_eq!(stepped.varying_values, vec![2.0]);
            assert!(stepped.is_terminal());
        }
    }

    #[test]
    fn full_run_reaches_ep_convergence() {
        let mut state = sphere_state(vec![5.0, -3.0]);
        let mut guard = 0;
        while !state.is_terminal() {
            state = step(state, 50).unwrap();
            guard += 1;
            assert!(guard < 100, "driver failed to terminate");
        }

        assert_eq!(state.params.status, OptStatus::EpConverged);
        assert!(state.params.ep_round >= 2);
        assert!(state.varying_values[0].abs() < 1e-2);
        assert!(state.varying_values[1].abs() < 1e-2);
    }

    #[test]
    fn status_display_is_human_readable() {
        assert_eq!(
            OptStatus::UnconstrainedRunning.to_string(),
            "unconstrained round running"
        );
        assert_eq!(OptStatus::EpConverged.to_string(), "exterior point converged");
    }
}
