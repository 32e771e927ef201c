use std::collections::VecDeque;

use crate::convergence::dot;
use crate::error::{OptError, Result};
use crate::float::Float;

/// Tunables for the limited-memory preconditioner.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LbfgsParams<F> {
    /// Number of recent `(s, y)` correction pairs to keep (default: 17).
    pub memory: usize,
    /// Safety epsilon added to curvature denominators (default: 1e-11).
    pub eps: F,
}

impl Default for LbfgsParams<f64> {
    fn default() -> Self {
        LbfgsParams {
            memory: 17,
            eps: 1e-11,
        }
    }
}

impl Default for LbfgsParams<f32> {
    fn default() -> Self {
        LbfgsParams {
            memory: 17,
            eps: 1e-7,
        }
    }
}

/// Limited-memory inverse-Hessian approximation.
///
/// Holds the previous point and gradient plus a bounded history of
/// correction pairs `sᵢ = xᵢ₊₁ − xᵢ`, `yᵢ = ∇ϕ(xᵢ₊₁) − ∇ϕ(xᵢ)`, newest
/// first. [`step`](LbfgsState::step) folds in the newest pair and returns
/// the preconditioned gradient `g_pre ≈ H⁻¹∇ϕ` via the two-loop recursion.
///
/// The state is plain data so an optimization can be suspended and resumed
/// across calls without losing curvature information.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LbfgsState<F> {
    params: LbfgsParams<F>,
    last_x: Option<Vec<F>>,
    last_grad: Option<Vec<F>>,
    s_list: VecDeque<Vec<F>>,
    y_list: VecDeque<Vec<F>>,
    num_unconstr_steps: usize,
}

impl<F: Float> LbfgsState<F> {
    /// Fresh state with no history.
    pub fn new(params: LbfgsParams<F>) -> Self {
        LbfgsState {
            params,
            last_x: None,
            last_grad: None,
            s_list: VecDeque::new(),
            y_list: VecDeque::new(),
            num_unconstr_steps: 0,
        }
    }

    /// Number of stored correction pairs.
    pub fn history_len(&self) -> usize {
        debug_assert_eq!(self.s_list.len(), self.y_list.len());
        self.s_list.len()
    }

    /// Number of accepted preconditioning calls since the last reset.
    pub fn num_steps(&self) -> usize {
        self.num_unconstr_steps
    }

    /// Precondition `grad` at the point `x`, updating the stored history.
    ///
    /// The first call (and the first call after a reset) performs identity
    /// preconditioning. Later calls run the two-loop recursion over the
    /// stored pairs; if the resulting `−g_pre` fails to be a descent
    /// direction the history is discarded and the raw gradient is returned,
    /// restarting from a steepest-descent baseline.
    pub fn step(&mut self, x: &[F], grad: &[F]) -> Result<Vec<F>> {
        if self.num_unconstr_steps == 0 {
            self.install(x, grad);
            return Ok(grad.to_vec());
        }

        let (s, y) = match (&self.last_x, &self.last_grad) {
            (Some(lx), Some(lg)) => {
                let n = x.len();
                let mut s = vec![F::zero(); n];
                let mut y = vec![F::zero(); n];
                for i in 0..n {
                    s[i] = x[i] - lx[i];
                    y[i] = grad[i] - lg[i];
                }
                (s, y)
            }
            _ => return Err(OptError::InvalidLbfgsState(self.num_unconstr_steps)),
        };

        self.s_list.push_front(s);
        self.y_list.push_front(y);
        self.s_list.truncate(self.params.memory);
        self.y_list.truncate(self.params.memory);

        let g_pre = self.two_loop(grad);

        // -g_pre must be a descent direction; numerical drift can break the
        // positive-definiteness of the implicit inverse Hessian
        if dot(&g_pre, grad) < F::zero() {
            log::warn!("non-descent preconditioned direction, resetting L-BFGS history");
            self.install(x, grad);
            return Ok(grad.to_vec());
        }

        self.last_x = Some(x.to_vec());
        self.last_grad = Some(grad.to_vec());
        self.num_unconstr_steps += 1;
        Ok(g_pre)
    }

    /// Drop all history and restart from `x`, `grad` as the baseline.
    fn install(&mut self, x: &[F], grad: &[F]) {
        self.s_list.clear();
        self.y_list.clear();
        self.last_x = Some(x.to_vec());
        self.last_grad = Some(grad.to_vec());
        self.num_unconstr_steps = 1;
    }

    /// Two-loop recursion over the stored pairs (newest first).
    fn two_loop(&self, grad: &[F]) -> Vec<F> {
        let n = grad.len();
        let k = self.s_list.len();
        let eps = self.params.eps;

        let mut rho = Vec::with_capacity(k);
        for i in 0..k {
            rho.push(F::one() / (dot(&self.y_list[i], &self.s_list[i]) + eps));
        }

        // Backward sweep, newest to oldest
        let mut q = grad.to_vec();
        let mut alpha = vec![F::zero(); k];
        for i in 0..k {
            alpha[i] = rho[i] * dot(&self.s_list[i], &q);
            for j in 0..n {
                q[j] = q[j] - alpha[i] * self.y_list[i][j];
            }
        }

        // Initial Hessian approximation H_0 = gamma * I, scaled from the
        // newest pair; realized as a scalar multiply
        let gamma =
            dot(&self.s_list[0], &self.y_list[0]) / (dot(&self.y_list[0], &self.y_list[0]) + eps);
        let mut r: Vec<F> = q.iter().map(|&qi| gamma * qi).collect();

        // Forward sweep, oldest to newest
        for i in (0..k).rev() {
            let beta = rho[i] * dot(&self.y_list[i], &r);
            for j in 0..n {
                r[j] = r[j] + (alpha[i] - beta) * self.s_list[i][j];
            }
        }

        r
    }
}

impl<F: Float> Default for LbfgsState<F>
where
    LbfgsParams<F>: Default,
{
    fn default() -> Self {
        LbfgsState::new(LbfgsParams::default())
    }
}
