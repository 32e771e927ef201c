use std::collections::HashSet;
use std::rc::Rc;

use crate::float::Float;

/// Indices of parameters pinned to their current value during optimization.
pub type FrozenSet = HashSet<usize>;

/// Whether a parameter participates in optimization or is held as a
/// constant supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InputMeta {
    /// The parameter is varied by the optimizer.
    Optimized,
    /// The parameter is a pending constant; its gradient entry is zeroed.
    Pending,
}

/// Everything one oracle evaluation produces.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OracleEval<F> {
    /// Total scalarized energy `ϕ(x)`.
    pub energy: F,
    /// Gradient `∇ϕ(x)`, already zeroed at frozen and non-optimized indices.
    pub gradient: Vec<F>,
    /// Value of each objective term `oⱼ(x)`.
    pub obj_energies: Vec<F>,
    /// Unweighted penalty of each constraint term, `max(cᵢ(x), 0)²`.
    pub constr_energies: Vec<F>,
}

/// Evaluates energy, gradient, and per-term energies at a point.
///
/// Oracles are pure: the same `x` always yields the same result, and
/// evaluation has no observable side effects. An oracle is bound to a fixed
/// penalty weight at construction time; changing the weight means asking the
/// factory for a new oracle.
pub trait Oracle<F: Float> {
    /// Evaluate at `x` (length `n`).
    fn eval(&self, x: &[F]) -> OracleEval<F>;
}

/// Shared handle to a pure oracle.
pub type SharedOracle<F> = Rc<dyn Oracle<F>>;

/// Produces an oracle bound to a penalty weight and a frozen-index set.
pub type OracleFactory<F> = Rc<dyn Fn(F, &FrozenSet) -> SharedOracle<F>>;
