use std::rc::Rc;

use crate::ep::{OptConfig, OptParams, OptStatus};
use crate::float::Float;
use crate::lbfgs::LbfgsState;
use crate::oracle::{FrozenSet, InputMeta, Oracle, OracleEval, OracleFactory, SharedOracle};

/// A differentiable scalar term compiled by the external graph engine.
///
/// One term is either an objective energy or a raw constraint value. The
/// compiled artifact evaluates the term together with its gradient in a
/// single pass. A gradient shorter than the parameter vector means the
/// term does not read the trailing parameters; missing entries are zero.
pub trait CompiledTerm<F: Float> {
    /// Evaluate the term and its gradient at `x`.
    fn eval_grad(&self, x: &[F]) -> (F, Vec<F>);
}

/// Quadratic exterior penalty: zero while the constraint value is
/// non-positive (satisfied), quadratic in the violation otherwise.
pub fn penalty<F: Float>(v: F) -> F {
    let violation = v.max(F::zero());
    violation * violation
}

/// Oracle assembled by [`build_problem`]: the scalarized energy
/// `Σⱼ oⱼ(x) + c₀·w·Σᵢ penalty(cᵢ(x))`, its gradient masked at frozen and
/// non-optimized indices, and every term value as a secondary output.
pub struct PenaltyOracle<F: Float> {
    objectives: Vec<Rc<dyn CompiledTerm<F>>>,
    constraints: Vec<Rc<dyn CompiledTerm<F>>>,
    /// Effective penalty multiplier `c₀·w`, folded at construction.
    scale: F,
    /// `mask[i]` is true when gradient may flow into parameter `i`.
    mask: Vec<bool>,
}

impl<F: Float> Oracle<F> for PenaltyOracle<F> {
    fn eval(&self, x: &[F]) -> OracleEval<F> {
        let n = x.len();
        let two = F::one() + F::one();

        let mut energy = F::zero();
        let mut gradient = vec![F::zero(); n];
        let mut obj_energies = Vec::with_capacity(self.objectives.len());
        let mut constr_energies = Vec::with_capacity(self.constraints.len());

        for term in &self.objectives {
            let (value, grad) = term.eval_grad(x);
            energy = energy + value;
            for (i, &gi) in grad.iter().enumerate().take(n) {
                gradient[i] = gradient[i] + gi;
            }
            obj_energies.push(value);
        }

        for term in &self.constraints {
            let (value, grad) = term.eval_grad(x);
            let pen = penalty(value);
            energy = energy + self.scale * pen;
            constr_energies.push(pen);

            // d/dx max(c, 0)^2 = 2·max(c, 0)·∇c, nonzero only when violated
            if value > F::zero() {
                let coeff = self.scale * two * value;
                for (i, &gi) in grad.iter().enumerate().take(n) {
                    gradient[i] = gradient[i] + coeff * gi;
                }
            }
        }

        for (i, g) in gradient.iter_mut().enumerate() {
            if !self.mask.get(i).copied().unwrap_or(false) {
                *g = F::zero();
            }
        }

        OracleEval {
            energy,
            gradient,
            obj_energies,
            constr_energies,
        }
    }
}

/// Wire compiled objective and constraint terms into an oracle factory and
/// the initial driver bookkeeping.
///
/// The factory bakes the fixed constraint scale `c₀` and the input metadata
/// into every oracle it produces; the exterior-point weight and the frozen
/// set vary per call. The returned [`OptParams`] starts a fresh run: status
/// [`UnconstrainedRunning`](OptStatus::UnconstrainedRunning), the initial
/// weight, zeroed round counters, empty preconditioner history, and an
/// oracle bound to the empty frozen set.
pub fn build_problem<F: Float>(
    inputs: &[InputMeta],
    objectives: Vec<Rc<dyn CompiledTerm<F>>>,
    constraints: Vec<Rc<dyn CompiledTerm<F>>>,
    config: OptConfig<F>,
) -> OptParams<F> {
    let metas: Vec<InputMeta> = inputs.to_vec();
    let c0 = config.constraint_scale;

    let factory: OracleFactory<F> = Rc::new(move |weight, frozen: &FrozenSet| {
        let mask = metas
            .iter()
            .enumerate()
            .map(|(i, meta)| *meta == InputMeta::Optimized && !frozen.contains(&i))
            .collect();
        Rc::new(PenaltyOracle {
            objectives: objectives.clone(),
            constraints: constraints.clone(),
            scale: c0 * weight,
            mask,
        }) as SharedOracle<F>
    });

    let curr_oracle = factory(config.init_constraint_weight, &FrozenSet::new());

    OptParams {
        weight: config.init_constraint_weight,
        uo_round: 0,
        ep_round: 0,
        status: OptStatus::UnconstrainedRunning,
        last_uo_state: Vec::new(),
        last_uo_energy: F::infinity(),
        last_ep_state: Vec::new(),
        last_ep_energy: F::infinity(),
        last_gradient: Vec::new(),
        last_gradient_preconditioned: Vec::new(),
        last_obj_energies: Vec::new(),
        last_constr_energies: Vec::new(),
        lbfgs_info: LbfgsState::new(config.lbfgs.clone()),
        curr_oracle,
        oracle_factory: factory,
        config,
    }
}
