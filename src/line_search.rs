use crate::convergence::dot;
use crate::float::Float;
use crate::oracle::Oracle;

/// Parameters for the bracketing Armijo/weak-Wolfe line search.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WolfeParams<F> {
    /// Sufficient decrease parameter (default: 1e-3).
    pub c1: F,
    /// Weak Wolfe curvature parameter (default: 0.9).
    pub c2: F,
    /// Smallest bracket width searched (default: 1e-10).
    pub min_interval: F,
    /// Maximum number of bracket updates (default: 10).
    pub max_steps: usize,
}

impl Default for WolfeParams<f64> {
    fn default() -> Self {
        WolfeParams {
            c1: 1e-3,
            c2: 0.9,
            min_interval: 1e-10,
            max_steps: 10,
        }
    }
}

impl Default for WolfeParams<f32> {
    fn default() -> Self {
        WolfeParams {
            c1: 1e-3,
            c2: 0.9,
            min_interval: 1e-7,
            max_steps: 10,
        }
    }
}

/// Bracketing line search satisfying the Armijo and weak Wolfe conditions.
///
/// Searches along the descent direction `d` for a step `t` with
/// `ϕ(x + t·d) <= ϕ(x) + c1·t·⟨d, ∇ϕ(x)⟩` (sufficient decrease) and
/// `⟨d, ∇ϕ(x + t·d)⟩ >= c2·⟨d, ∇ϕ(x)⟩` (the step is not too short).
///
/// The bracket `[a, b]` starts at `[0, ∞)`: an Armijo failure pulls `b`
/// in, a Wolfe failure pushes `a` out, and the probe moves to the bracket
/// midpoint once `b` is finite (doubling before that). The search stops
/// when both conditions hold, the bracket collapses below `min_interval`,
/// or `max_steps` updates have been spent; the most recent `t` is returned
/// either way.
///
/// Weak Wolfe is deliberate here: the directions fed in are already
/// preconditioned, and the strong form shrinks the bracket too aggressively
/// on them.
pub fn armijo_wolfe<F: Float>(
    oracle: &dyn Oracle<F>,
    x: &[F],
    d: &[F],
    f_x: F,
    grad_x: &[F],
    params: &WolfeParams<F>,
) -> F {
    let n = x.len();
    let two = F::one() + F::one();
    let dg = dot(grad_x, d);

    let mut a = F::zero();
    let mut b = F::infinity();
    let mut t = F::one();
    let mut x_new = vec![F::zero(); n];
    let mut steps = 0;

    loop {
        for i in 0..n {
            x_new[i] = x[i] + t * d[i];
        }
        let eval = oracle.eval(&x_new);

        let armijo = eval.energy <= f_x + params.c1 * t * dg;
        let wolfe = dot(d, &eval.gradient) >= params.c2 * dg;

        if !armijo {
            b = t;
        } else if !wolfe {
            a = t;
        } else {
            break;
        }

        t = if b < F::infinity() { (a + b) / two } else { two * a };

        steps += 1;
        if steps >= params.max_steps || (b - a).abs() < params.min_interval {
            break;
        }
    }

    t
}
