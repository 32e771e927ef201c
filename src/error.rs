//! Error types for the optimizer.

use thiserror::Error;

/// Fatal optimizer failures.
///
/// Recoverable numerical trouble (a NaN energy after evaluation) is not an
/// error: the inner minimizer reports it through its `failed` flag and the
/// driver parks the state in [`OptStatus::Error`](crate::ep::OptStatus).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptError {
    /// NaN detected in the parameter vector before evaluation.
    #[error("NaN in parameter vector before evaluation")]
    NanInState,

    /// NaN detected in the gradient returned by the oracle.
    #[error("NaN in gradient returned by the oracle")]
    NanInGradient,

    /// L-BFGS bookkeeping is inconsistent: steps were recorded but the
    /// previous point or gradient is missing.
    #[error("inconsistent L-BFGS state after {0} recorded steps")]
    InvalidLbfgsState(usize),

    /// The caller requested fewer than one inner iteration.
    #[error("step budget must be at least 1, got {0}")]
    InsufficientSteps(usize),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, OptError>;
