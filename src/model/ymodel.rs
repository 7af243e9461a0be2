//! Per-relation bag classifiers fitted with linfa's logistic regression.

use linfa::{dataset::DatasetBase, prelude::Fit};
use linfa_logistic::LogisticRegression;
use ndarray::{array, Array1, Array2};
use tracing::debug;

use crate::{
    classify::LinearClassifier,
    data::Index,
    error::{MimlError, Result},
    model::yfeatures::{YFeatures, ATLEAST_ONCE, NONE},
};

/// Column of the "relation holds" class in a Y classifier.
pub const HOLDS: usize = 0;
/// Column of the "unrelated" class in a Y classifier.
pub const UNRELATED_COLUMN: usize = 1;

const HAND_SET_WEIGHT: f64 = 10.0;

/// Binary bag classifier for one relation over its own small feature vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct YModel {
    pub features: Index,
    pub classifier: LinearClassifier,
}

/// Regularisation and iteration budget for [`YModel::fit`].
#[derive(Debug, Clone, Copy)]
pub struct YFitConfig {
    pub alpha: f64,
    pub max_iterations: u64,
}

impl YModel {
    /// Prior model used before the first M-step: a relation holds iff at
    /// least one sentence carries it.
    pub fn at_least_once() -> Self {
        let features = Index::from_names([ATLEAST_ONCE, NONE]);
        let classifier = LinearClassifier::from_parts(
            array![[HAND_SET_WEIGHT, 0.0], [0.0, HAND_SET_WEIGHT]],
            Array1::zeros(2),
        );
        Self {
            features,
            classifier,
        }
    }

    /// Dense vector over this model's vocabulary; unseen feature names are dropped.
    pub fn vectorize(&self, features: &YFeatures) -> Array1<f64> {
        let mut dense = Array1::zeros(self.features.len());
        for (name, value) in features {
            if let Some(id) = self.features.id_of(name) {
                dense[id] += value;
            }
        }
        dense
    }

    /// `log P(holds)` when `holds` is true, otherwise `log P(¬holds)`.
    pub fn log_prob(&self, features: &YFeatures, holds: bool) -> f64 {
        let log_probs = self
            .classifier
            .log_probabilities_dense(self.vectorize(features).view());
        if holds {
            log_probs[HOLDS]
        } else {
            log_probs[UNRELATED_COLUMN]
        }
    }

    /// Fit from `(features, holds)` rows collected for `relation` in `epoch`.
    pub fn fit(
        relation: &str,
        rows: &[(YFeatures, bool)],
        config: YFitConfig,
        epoch: usize,
    ) -> Result<Self> {
        if rows.is_empty() {
            return Err(MimlError::EmptyTrainingSet {
                relation: relation.to_string(),
                epoch,
            });
        }
        let mut features = Index::new();
        for (row, _) in rows {
            for (name, _) in row {
                features.add(name);
            }
        }
        features.freeze();

        let mut x = Array2::zeros((rows.len(), features.len()));
        for (i, (row, _)) in rows.iter().enumerate() {
            for (name, value) in row {
                if let Some(id) = features.id_of(name) {
                    x[[i, id]] += value;
                }
            }
        }
        let y: Array1<bool> = rows.iter().map(|(_, holds)| *holds).collect();
        let positives = y.iter().filter(|&&holds| holds).count();
        let negatives = rows.len() - positives;

        let classifier = if positives == 0 || negatives == 0 {
            // linfa needs both classes; fall back to smoothed log-odds.
            let bias = ((positives as f64 + 1.0) / (negatives as f64 + 1.0)).ln();
            LinearClassifier::from_parts(
                Array2::zeros((features.len(), 2)),
                array![bias, 0.0],
            )
        } else {
            let dataset = DatasetBase::new(x, y);
            let fitted = LogisticRegression::default()
                .alpha(config.alpha)
                .max_iterations(config.max_iterations)
                .fit(&dataset)
                .map_err(|e| MimlError::Fit(format!("{relation}: {e}")))?;
            let sign = if fitted.labels().pos.class { 1.0 } else { -1.0 };
            let mut weights = Array2::zeros((features.len(), 2));
            weights
                .column_mut(HOLDS)
                .assign(&(fitted.params() * sign));
            LinearClassifier::from_parts(weights, array![fitted.intercept() * sign, 0.0])
        };
        debug!(
            relation,
            epoch,
            rows = rows.len(),
            positives,
            features = features.len(),
            "fitted bag classifier"
        );
        Ok(Self {
            features,
            classifier,
        })
    }
}
