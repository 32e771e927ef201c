use std::cell::Cell;
use std::rc::Rc;

use approx::assert_relative_eq;
use vellum_optim::{
    build_problem, step, CompiledTerm, ConvergenceParams, FrozenSet, InputMeta, OptConfig,
    OptError, OptStatus, State,
};

// ============================================================
// Compiled terms standing in for the graph engine
// ============================================================

/// o(x) = (x0 - 3)^2
struct OffsetSquare;

impl CompiledTerm<f64> for OffsetSquare {
    fn eval_grad(&self, x: &[f64]) -> (f64, Vec<f64>) {
        ((x[0] - 3.0).powi(2), vec![2.0 * (x[0] - 3.0)])
    }
}

/// o(x) = (1 - x0)^2 + 100*(x1 - x0^2)^2
struct Rosenbrock;

impl CompiledTerm<f64> for Rosenbrock {
    fn eval_grad(&self, x: &[f64]) -> (f64, Vec<f64>) {
        let a = 1.0 - x[0];
        let b = x[1] - x[0] * x[0];
        (
            a * a + 100.0 * b * b,
            vec![-2.0 * a - 400.0 * x[0] * b, 200.0 * b],
        )
    }
}

/// o(x) = x0
struct Identity;

impl CompiledTerm<f64> for Identity {
    fn eval_grad(&self, x: &[f64]) -> (f64, Vec<f64>) {
        (x[0], vec![1.0])
    }
}

/// c(x) = -x0, the inequality x0 >= 0.
struct NonNegative;

impl CompiledTerm<f64> for NonNegative {
    fn eval_grad(&self, x: &[f64]) -> (f64, Vec<f64>) {
        (-x[0], vec![-1.0])
    }
}

/// o(x) = (x0 - 1)^2 + (x1 - 2)^2
struct TwoWells;

impl CompiledTerm<f64> for TwoWells {
    fn eval_grad(&self, x: &[f64]) -> (f64, Vec<f64>) {
        (
            (x[0] - 1.0).powi(2) + (x[1] - 2.0).powi(2),
            vec![2.0 * (x[0] - 1.0), 2.0 * (x[1] - 2.0)],
        )
    }
}

fn run_to_terminal(mut state: State<f64>, budget: usize) -> State<f64> {
    let mut guard = 0;
    while !state.is_terminal() {
        state = step(state, budget).unwrap();
        guard += 1;
        assert!(guard < 500, "driver failed to terminate");
    }
    state
}

// ============================================================
// 1-D quadratic
// ============================================================

#[test]
fn quadratic_converges_in_one_invocation() {
    let params = build_problem(
        &[InputMeta::Optimized],
        vec![Rc::new(OffsetSquare)],
        vec![],
        OptConfig::default(),
    );
    let state = State::new(vec![0.0], params);

    let state = step(state, 50).unwrap();

    assert_eq!(state.params.status, OptStatus::UnconstrainedConverged);
    assert_relative_eq!(state.varying_values[0], 3.0, epsilon = 1e-3);
}

// ============================================================
// 2-D Rosenbrock
// ============================================================

#[test]
fn rosenbrock_terminates_at_the_minimum() {
    // The default uo_stop is loose; tighten it for banana-valley accuracy
    let config = OptConfig {
        convergence: ConvergenceParams {
            uo_stop: 1e-5,
            ..Default::default()
        },
        ..Default::default()
    };
    let params = build_problem(
        &[InputMeta::Optimized, InputMeta::Optimized],
        vec![Rc::new(Rosenbrock)],
        vec![],
        config,
    );
    let state = State::new(vec![-1.2, 1.0], params);

    let state = run_to_terminal(state, 200);

    assert_eq!(state.params.status, OptStatus::EpConverged);
    assert_relative_eq!(state.varying_values[0], 1.0, epsilon = 1e-2);
    assert_relative_eq!(state.varying_values[1], 1.0, epsilon = 1e-2);
}

#[test]
fn rosenbrock_with_default_tuning_still_finds_the_valley() {
    let params = build_problem(
        &[InputMeta::Optimized, InputMeta::Optimized],
        vec![Rc::new(Rosenbrock)],
        vec![],
        OptConfig::default(),
    );
    let state = State::new(vec![-1.2, 1.0], params);

    let state = run_to_terminal(state, 200);

    assert_eq!(state.params.status, OptStatus::EpConverged);
    assert!(
        state.params.last_uo_energy < 5e-2,
        "energy = {}",
        state.params.last_uo_energy
    );
}

// ============================================================
// Linear objective with one inequality
// ============================================================

#[test]
fn penalty_weight_drives_the_constrained_minimum() {
    // The growing penalty weight sharpens the energy landscape each round;
    // give the bracketing search enough updates to keep up with it
    let config = OptConfig {
        line_search: vellum_optim::WolfeParams {
            max_steps: 40,
            ..Default::default()
        },
        ..Default::default()
    };
    let params = build_problem(
        &[InputMeta::Optimized],
        vec![Rc::new(Identity)],
        vec![Rc::new(NonNegative)],
        config,
    );
    let init_weight = params.config.init_constraint_weight;
    let state = State::new(vec![-5.0], params);

    // Weight must never decrease while the driver runs
    let mut state = state;
    let mut last_weight = init_weight;
    let mut guard = 0;
    while !state.is_terminal() {
        state = step(state, 100).unwrap();
        assert!(
            state.params.weight >= last_weight,
            "weight decreased from {} to {}",
            last_weight,
            state.params.weight
        );
        last_weight = state.params.weight;
        guard += 1;
        assert!(guard < 500, "driver failed to terminate");
    }

    assert_eq!(state.params.status, OptStatus::EpConverged);
    assert!(state.params.ep_round >= 2, "ep_round = {}", state.params.ep_round);
    assert!(
        state.params.weight > init_weight,
        "weight never grew past {}",
        init_weight
    );
    assert!(
        state.varying_values[0].abs() < 1e-2,
        "x = {}",
        state.varying_values[0]
    );
}

// ============================================================
// Frozen parameter
// ============================================================

#[test]
fn frozen_parameter_is_bitwise_immutable() {
    let params = build_problem(
        &[InputMeta::Optimized, InputMeta::Optimized],
        vec![Rc::new(TwoWells)],
        vec![],
        OptConfig::default(),
    );
    let frozen: FrozenSet = [1].into_iter().collect();
    let mut state = State::with_frozen(vec![10.0, 7.0], frozen, params);

    let mut guard = 0;
    while !state.is_terminal() {
        state = step(state, 50).unwrap();
        assert_eq!(
            state.varying_values[1], 7.0,
            "frozen parameter moved on invocation {}",
            guard
        );
        guard += 1;
        assert!(guard < 500, "driver failed to terminate");
    }

    assert_eq!(state.params.status, OptStatus::EpConverged);
    assert_relative_eq!(state.varying_values[0], 1.0, epsilon = 1e-2);
    assert_eq!(state.varying_values[1], 7.0);
}

// ============================================================
// NaN injection
// ============================================================

#[test]
fn nan_gradient_from_the_oracle_is_fatal() {
    /// Healthy (x0 - 3)^2 for the first two evaluations, NaN gradient after.
    struct Flaky {
        calls: Cell<usize>,
    }

    impl CompiledTerm<f64> for Flaky {
        fn eval_grad(&self, x: &[f64]) -> (f64, Vec<f64>) {
            let n = self.calls.get() + 1;
            self.calls.set(n);
            let value = (x[0] - 3.0).powi(2);
            if n >= 3 {
                (value, vec![f64::NAN])
            } else {
                (value, vec![2.0 * (x[0] - 3.0)])
            }
        }
    }

    let params = build_problem(
        &[InputMeta::Optimized],
        vec![Rc::new(Flaky {
            calls: Cell::new(0),
        })],
        vec![],
        OptConfig::default(),
    );
    let state = State::new(vec![0.0], params);

    let err = step(state, 50).unwrap_err();
    assert_eq!(err, OptError::NanInGradient);
}

// ============================================================
// Terminal stickiness
// ============================================================

#[test]
fn converged_and_failed_states_are_sticky() {
    for terminal in [OptStatus::EpConverged, OptStatus::Error] {
        let params = build_problem(
            &[InputMeta::Optimized],
            vec![Rc::new(OffsetSquare)],
            vec![],
            OptConfig::default(),
        );
        let mut state = State::new(vec![0.7], params);
        state.params.status = terminal;
        state.params.weight = 42.0;
        state.params.ep_round = 5;

        let once = step(state, 10).unwrap();
        let twice = step(once, 25).unwrap();

        assert_eq!(twice.params.status, terminal);
        assert_eq!(twice.params.weight, 42.0);
        assert_eq!(twice.params.ep_round, 5);
        assert_eq!(twice.varying_values, vec![0.7]);
    }
}

// ============================================================
// Diagnostics surface
// ============================================================

#[test]
fn driver_records_per_term_energies() {
    let params = build_problem(
        &[InputMeta::Optimized],
        vec![Rc::new(Identity)],
        vec![Rc::new(NonNegative)],
        OptConfig::default(),
    );
    let state = State::new(vec![-5.0], params);

    let state = step(state, 3).unwrap();

    assert_eq!(state.params.last_obj_energies.len(), 1);
    assert_eq!(state.params.last_constr_energies.len(), 1);
    assert_eq!(
        state.params.last_gradient.len(),
        state.params.last_gradient_preconditioned.len()
    );
    assert_eq!(state.params.uo_round, 1);
}
