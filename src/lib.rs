//! Exterior-point optimization core for the vellum layout engine.
//!
//! Given an objective energy and a set of inequality-style constraints,
//! each a differentiable function of a parameter vector, this crate drives
//! the vector toward a local minimum of the scalarized energy
//! `Σⱼ oⱼ(x) + c₀·w·Σᵢ max(cᵢ(x), 0)²` while the exterior-point weight `w`
//! grows round over round.
//!
//! The pieces, innermost first: a bracketing Armijo/weak-Wolfe line search
//! ([`armijo_wolfe`]), a limited-memory quasi-Newton preconditioner
//! ([`LbfgsState`]), a bounded inner minimizer ([`minimize`]), and a
//! resumable outer state machine ([`step`]) that the caller drives with a
//! per-invocation iteration budget. [`build_problem`] wires compiled
//! energy terms from the graph engine into an oracle factory and the
//! initial driver bookkeeping.
//!
//! ```
//! use std::rc::Rc;
//! use vellum_optim::{build_problem, step, CompiledTerm, InputMeta, OptConfig, State};
//!
//! /// o(x) = (x - 3)^2
//! struct Offset;
//!
//! impl CompiledTerm<f64> for Offset {
//!     fn eval_grad(&self, x: &[f64]) -> (f64, Vec<f64>) {
//!         ((x[0] - 3.0).powi(2), vec![2.0 * (x[0] - 3.0)])
//!     }
//! }
//!
//! let params = build_problem(
//!     &[InputMeta::Optimized],
//!     vec![Rc::new(Offset)],
//!     vec![],
//!     OptConfig::default(),
//! );
//! let mut state = State::new(vec![0.0], params);
//! while !state.is_terminal() {
//!     state = step(state, 50).unwrap();
//! }
//! assert!((state.varying_values[0] - 3.0).abs() < 1e-3);
//! ```

pub mod convergence;
pub mod ep;
pub mod error;
pub mod float;
pub mod lbfgs;
pub mod line_search;
pub mod minimize;
pub mod oracle;
pub mod problem;

pub use convergence::ConvergenceParams;
pub use ep::{step, OptConfig, OptParams, OptStatus, State};
pub use error::{OptError, Result};
pub use float::Float;
pub use lbfgs::{LbfgsParams, LbfgsState};
pub use line_search::{armijo_wolfe, WolfeParams};
pub use minimize::{minimize, MinimizeResult};
pub use oracle::{FrozenSet, InputMeta, Oracle, OracleEval, OracleFactory, SharedOracle};
pub use problem::{build_problem, penalty, CompiledTerm, PenaltyOracle};
