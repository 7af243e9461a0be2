//! Limited-memory BFGS minimiser with backtracking line search.

use std::collections::VecDeque;

use ndarray::Array1;
use tracing::debug;

const ARMIJO: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 40;

/// Stopping rules for [`minimize`].
#[derive(Debug, Clone, Copy)]
pub struct LbfgsConfig {
    pub max_iterations: usize,
    pub memory: usize,
    pub tolerance: f64,
}

impl Default for LbfgsConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            memory: 10,
            tolerance: 1e-6,
        }
    }
}

/// Minimise a smooth function given as `x -> (value, gradient)`, starting at `x0`.
pub fn minimize<F>(objective: F, x0: Array1<f64>, config: LbfgsConfig) -> Array1<f64>
where
    F: Fn(&Array1<f64>) -> (f64, Array1<f64>),
{
    let mut x = x0;
    let (mut fx, mut grad) = objective(&x);
    let mut history: VecDeque<(Array1<f64>, Array1<f64>, f64)> = VecDeque::new();

    for iteration in 0..config.max_iterations {
        let grad_norm = grad.dot(&grad).sqrt();
        if grad_norm <= config.tolerance * x.dot(&x).sqrt().max(1.0) {
            debug!(iteration, value = fx, "lbfgs gradient converged");
            break;
        }

        let mut direction = two_loop(&grad, &history);
        let mut slope = direction.dot(&grad);
        if slope >= 0.0 {
            history.clear();
            direction = -&grad;
            slope = -grad.dot(&grad);
        }

        let mut step = if history.is_empty() {
            (1.0 / grad_norm).min(1.0)
        } else {
            1.0
        };
        let mut accepted = None;
        for _ in 0..MAX_BACKTRACKS {
            let candidate = &x + &(&direction * step);
            let (value, candidate_grad) = objective(&candidate);
            if value.is_finite() && value <= fx + ARMIJO * step * slope {
                accepted = Some((candidate, value, candidate_grad));
                break;
            }
            step *= 0.5;
        }
        let Some((next, next_fx, next_grad)) = accepted else {
            debug!(iteration, value = fx, "lbfgs line search stalled");
            break;
        };

        let s = &next - &x;
        let y = &next_grad - &grad;
        let sy = s.dot(&y);
        if sy > 1e-10 {
            history.push_back((s, y, 1.0 / sy));
            if history.len() > config.memory {
                history.pop_front();
            }
        }

        let improvement = fx - next_fx;
        x = next;
        grad = next_grad;
        fx = next_fx;
        if improvement.abs() <= config.tolerance * fx.abs().max(1.0) {
            debug!(iteration, value = fx, "lbfgs objective converged");
            break;
        }
    }
    x
}

/// Approximate `-H⁻¹ g` from the stored curvature pairs.
fn two_loop(grad: &Array1<f64>, history: &VecDeque<(Array1<f64>, Array1<f64>, f64)>) -> Array1<f64> {
    let mut q = grad.clone();
    let mut alphas = Vec::with_capacity(history.len());
    for (s, y, rho) in history.iter().rev() {
        let alpha = rho * s.dot(&q);
        q.scaled_add(-alpha, y);
        alphas.push(alpha);
    }
    if let Some((s, y, _)) = history.back() {
        let gamma = s.dot(y) / y.dot(y);
        q *= gamma;
    }
    for ((s, y, rho), alpha) in history.iter().zip(alphas.into_iter().rev()) {
        let beta = rho * y.dot(&q);
        q.scaled_add(alpha - beta, s);
    }
    -q
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn minimises_a_shifted_quadratic() {
        let target = array![3.0, -2.0, 0.5];
        let objective = |x: &Array1<f64>| {
            let diff = x - &target;
            let scale = array![1.0, 10.0, 0.1];
            let value = (&diff * &diff * &scale).sum() / 2.0;
            (value, &diff * &scale)
        };
        let config = LbfgsConfig {
            tolerance: 1e-10,
            ..LbfgsConfig::default()
        };
        let x = minimize(objective, Array1::zeros(3), config);
        for (got, want) in x.iter().zip(target.iter()) {
            assert!((got - want).abs() < 1e-4, "{got} vs {want}");
        }
    }
}
