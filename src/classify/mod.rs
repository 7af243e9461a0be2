//! Linear softmax classifiers over sparse binary features.

pub mod lbfgs;
pub mod train;

use ndarray::{Array1, Array2, ArrayView1};

use crate::data::SparseVector;

pub use train::{train, Datum, Optimizer, TrainerConfig};

/// Multi-class linear model: `scores = bias + Σ_f weights[f, ·]`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearClassifier {
    weights: Array2<f64>,
    bias: Array1<f64>,
}

impl LinearClassifier {
    pub fn zeros(features: usize, labels: usize) -> Self {
        Self {
            weights: Array2::zeros((features, labels)),
            bias: Array1::zeros(labels),
        }
    }

    /// Panics if `bias` does not have one entry per weight column.
    pub fn from_parts(weights: Array2<f64>, bias: Array1<f64>) -> Self {
        assert_eq!(weights.ncols(), bias.len(), "bias/weight label mismatch");
        Self { weights, bias }
    }

    /// Rebuild from a flat parameter vector laid out as weights (row-major) then bias.
    pub fn from_flat(params: &Array1<f64>, features: usize, labels: usize) -> Self {
        assert_eq!(params.len(), features * labels + labels);
        let weights = Array2::from_shape_vec(
            (features, labels),
            params.iter().take(features * labels).copied().collect(),
        )
        .expect("flat parameter length checked above");
        let bias = Array1::from_iter(params.iter().skip(features * labels).copied());
        Self { weights, bias }
    }

    pub fn to_flat(&self) -> Array1<f64> {
        self.weights
            .iter()
            .chain(self.bias.iter())
            .copied()
            .collect()
    }

    pub fn num_features(&self) -> usize {
        self.weights.nrows()
    }

    pub fn num_labels(&self) -> usize {
        self.weights.ncols()
    }

    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    pub fn bias(&self) -> &Array1<f64> {
        &self.bias
    }

    /// Raw scores for a sparse binary vector; ids beyond the vocabulary are ignored.
    pub fn scores(&self, features: &[usize]) -> Array1<f64> {
        let mut scores = self.bias.clone();
        for &f in features {
            if f < self.weights.nrows() {
                scores += &self.weights.row(f);
            }
        }
        scores
    }

    /// Raw scores for a dense feature vector.
    pub fn scores_dense(&self, features: ArrayView1<f64>) -> Array1<f64> {
        features.dot(&self.weights) + &self.bias
    }

    pub fn log_probabilities(&self, features: &SparseVector) -> Array1<f64> {
        log_softmax(&self.scores(features))
    }

    pub fn probabilities(&self, features: &SparseVector) -> Array1<f64> {
        self.log_probabilities(features).mapv(f64::exp)
    }

    pub fn log_probabilities_dense(&self, features: ArrayView1<f64>) -> Array1<f64> {
        log_softmax(&self.scores_dense(features))
    }
}

/// Numerically stable log-softmax.
pub fn log_softmax(scores: &Array1<f64>) -> Array1<f64> {
    let norm = log_sum_exp(scores);
    scores.mapv(|s| s - norm)
}

pub fn log_sum_exp(scores: &Array1<f64>) -> f64 {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + scores.iter().map(|s| (s - max).exp()).sum::<f64>().ln()
}

/// Index of the largest entry; ties go to the lowest index.
pub fn argmax(values: &Array1<f64>) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Panics unless `probs` sums to one within `1e-6`.
pub fn assert_distribution(probs: &Array1<f64>) {
    let total: f64 = probs.sum();
    assert!(
        (total - 1.0).abs() < 1e-6,
        "probabilities sum to {total}, expected 1"
    );
}
