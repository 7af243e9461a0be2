//! L2-regularised softmax training over weighted sparse examples.

use ndarray::Array1;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    classify::{
        lbfgs::{self, LbfgsConfig},
        LinearClassifier,
    },
    data::SparseVector,
};

/// One training example.
#[derive(Debug, Clone, PartialEq)]
pub struct Datum {
    pub features: SparseVector,
    pub label: usize,
    pub weight: f64,
}

impl Datum {
    pub fn new(features: SparseVector, label: usize, weight: f64) -> Self {
        Self {
            features,
            label,
            weight,
        }
    }
}

/// Optimisation strategy for local classifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Optimizer {
    /// Batch L-BFGS.
    #[default]
    QuasiNewton,
    /// Stochastic gradient descent.
    Sgd,
    /// SGD warm start refined with L-BFGS.
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainerConfig {
    pub optimizer: Optimizer,
    /// L2 penalty coefficient on the weights (bias is not penalised).
    pub regularization: f64,
    pub max_iterations: usize,
    pub sgd_passes: usize,
    pub learning_rate: f64,
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            optimizer: Optimizer::QuasiNewton,
            regularization: 1.0,
            max_iterations: 200,
            sgd_passes: 5,
            learning_rate: 0.1,
            tolerance: 1e-6,
            seed: 0,
        }
    }
}

/// Fit a `labels`-way classifier over a vocabulary of `features` ids.
pub fn train(
    datums: &[Datum],
    features: usize,
    labels: usize,
    config: &TrainerConfig,
) -> LinearClassifier {
    let start = LinearClassifier::zeros(features, labels);
    if datums.is_empty() {
        return start;
    }
    let classifier = match config.optimizer {
        Optimizer::QuasiNewton => quasi_newton(datums, start, config),
        Optimizer::Sgd => sgd(datums, start, config),
        Optimizer::Hybrid => {
            let warm = sgd(datums, start, config);
            quasi_newton(datums, warm, config)
        }
    };
    debug!(
        examples = datums.len(),
        features,
        labels,
        optimizer = ?config.optimizer,
        objective = objective(&classifier.to_flat(), datums, features, labels, config.regularization).0,
        "trained linear classifier"
    );
    classifier
}

fn quasi_newton(
    datums: &[Datum],
    start: LinearClassifier,
    config: &TrainerConfig,
) -> LinearClassifier {
    let (features, labels) = (start.num_features(), start.num_labels());
    let lambda = config.regularization;
    let params = lbfgs::minimize(
        |x| objective(x, datums, features, labels, lambda),
        start.to_flat(),
        LbfgsConfig {
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
            ..LbfgsConfig::default()
        },
    );
    LinearClassifier::from_flat(&params, features, labels)
}

fn sgd(datums: &[Datum], start: LinearClassifier, config: &TrainerConfig) -> LinearClassifier {
    let (features, labels) = (start.num_features(), start.num_labels());
    let mut params = start.to_flat();
    let bias_offset = features * labels;
    let n = datums.len() as f64;
    let shrink = config.regularization / n;
    let mut order: Vec<usize> = (0..datums.len()).collect();
    let mut step = 0usize;

    for pass in 0..config.sgd_passes {
        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(pass as u64));
        order.shuffle(&mut rng);
        for &i in &order {
            let datum = &datums[i];
            let eta = config.learning_rate / (1.0 + step as f64 / n);
            step += 1;
            let probs = probabilities(&params, &datum.features, features, labels);
            for label in 0..labels {
                let target = if label == datum.label { 1.0 } else { 0.0 };
                let g = datum.weight * (probs[label] - target);
                for &f in datum.features.iter().filter(|&&f| f < features) {
                    let w = &mut params[f * labels + label];
                    *w -= eta * (g + shrink * *w);
                }
                params[bias_offset + label] -= eta * g;
            }
        }
    }
    LinearClassifier::from_flat(&params, features, labels)
}

fn probabilities(
    params: &Array1<f64>,
    x: &[usize],
    features: usize,
    labels: usize,
) -> Array1<f64> {
    let mut scores = Array1::from_iter((0..labels).map(|l| params[features * labels + l]));
    for &f in x.iter().filter(|&&f| f < features) {
        for l in 0..labels {
            scores[l] += params[f * labels + l];
        }
    }
    super::log_softmax(&scores).mapv(f64::exp)
}

/// Weighted negative log-likelihood plus `lambda / 2 * ||W||²`, with gradient.
fn objective(
    params: &Array1<f64>,
    datums: &[Datum],
    features: usize,
    labels: usize,
    lambda: f64,
) -> (f64, Array1<f64>) {
    let bias_offset = features * labels;
    let mut grad = Array1::zeros(params.len());
    let mut value = 0.0;
    for datum in datums {
        let probs = probabilities(params, &datum.features, features, labels);
        value -= datum.weight * probs[datum.label].max(f64::MIN_POSITIVE).ln();
        for label in 0..labels {
            let target = if label == datum.label { 1.0 } else { 0.0 };
            let g = datum.weight * (probs[label] - target);
            for &f in datum.features.iter().filter(|&&f| f < features) {
                grad[f * labels + label] += g;
            }
            grad[bias_offset + label] += g;
        }
    }
    for i in 0..bias_offset {
        value += 0.5 * lambda * params[i] * params[i];
        grad[i] += lambda * params[i];
    }
    (value, grad)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> Vec<Datum> {
        vec![
            Datum::new(vec![0], 0, 1.0),
            Datum::new(vec![0, 2], 0, 1.0),
            Datum::new(vec![1], 1, 1.0),
            Datum::new(vec![1, 2], 1, 1.0),
            Datum::new(vec![2], 2, 1.0),
            Datum::new(vec![2], 2, 1.0),
        ]
    }

    fn check_separates(optimizer: Optimizer) {
        let config = TrainerConfig {
            optimizer,
            regularization: 0.1,
            sgd_passes: 50,
            learning_rate: 0.5,
            ..TrainerConfig::default()
        };
        let clf = train(&separable(), 3, 3, &config);
        assert_eq!(crate::classify::argmax(&clf.probabilities(&vec![0])), 0);
        assert_eq!(crate::classify::argmax(&clf.probabilities(&vec![1])), 1);
        assert_eq!(crate::classify::argmax(&clf.probabilities(&vec![2])), 2);
    }

    #[test]
    fn quasi_newton_separates_classes() {
        check_separates(Optimizer::QuasiNewton);
    }

    #[test]
    fn sgd_separates_classes() {
        check_separates(Optimizer::Sgd);
    }

    #[test]
    fn hybrid_separates_classes() {
        check_separates(Optimizer::Hybrid);
    }

    #[test]
    fn example_weights_scale_the_objective() {
        let heavy = vec![Datum::new(vec![0], 0, 2.0)];
        let light = vec![Datum::new(vec![0], 0, 1.0)];
        let params = Array1::from(vec![0.5, -0.5, 0.0, 0.0]);
        let (heavy_value, _) = objective(&params, &heavy, 1, 2, 0.0);
        let (light_value, _) = objective(&params, &light, 1, 2, 0.0);
        assert!((heavy_value - 2.0 * light_value).abs() < 1e-12);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let datums = separable();
        let params = Array1::from_iter((0..12).map(|i| (i as f64 * 0.37).sin()));
        let (_, grad) = objective(&params, &datums, 3, 3, 0.3);
        for i in 0..params.len() {
            let mut up = params.clone();
            let mut down = params.clone();
            up[i] += 1e-6;
            down[i] -= 1e-6;
            let numeric = (objective(&up, &datums, 3, 3, 0.3).0
                - objective(&down, &datums, 3, 3, 0.3).0)
                / 2e-6;
            assert!((numeric - grad[i]).abs() < 1e-4, "param {i}");
        }
    }

    #[test]
    fn empty_training_set_yields_zero_model() {
        let clf = train(&[], 4, 3, &TrainerConfig::default());
        assert_eq!(clf, LinearClassifier::zeros(4, 3));
    }
}
