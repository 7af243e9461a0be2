//! Trained joint model artefacts and bag classification.

pub mod codec;
pub mod yfeatures;
pub mod ymodel;

use std::{
    collections::BTreeSet,
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use indexmap::IndexMap;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    classify::{argmax, LinearClassifier},
    data::{Index, SparseVector, ZLabelSpace},
    error::Result,
};

pub use yfeatures::{YFeatureExtractor, YFeatureKind, YFeatures};
pub use ymodel::YModel;

/// How per-sentence evidence is turned into a bag-level relation score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    /// `P(y | f_y(z*))` with z* the local argmax labels.
    #[default]
    JointBayes,
    /// `1 - Π(1 - p_s(y))` over all sentences.
    NoisyOr,
    /// Noisy-or over sentences whose top local label is y.
    ThresholdNoisyOr,
}

/// Bag-level score for one relation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationPrediction {
    pub relation: String,
    pub probability: f64,
    /// Sentence with the highest local probability for this relation.
    pub provenance: Option<usize>,
}

/// Everything needed to classify new bags.
#[derive(Debug, Clone, PartialEq)]
pub struct JointModel {
    pub labels: Index,
    pub features: Index,
    pub z_classifiers: Vec<LinearClassifier>,
    pub merged_z: Option<LinearClassifier>,
    pub y_models: IndexMap<String, YModel>,
    pub dependencies: BTreeSet<(usize, usize)>,
    pub y_features: Vec<YFeatureKind>,
}

impl JointModel {
    pub fn z_space(&self) -> ZLabelSpace {
        ZLabelSpace::new(self.labels.len())
    }

    pub fn z_label_names(&self) -> Vec<String> {
        self.z_space().names(&self.labels)
    }

    pub fn y_extractor(&self) -> YFeatureExtractor {
        YFeatureExtractor::new(
            self.y_features.iter().copied(),
            self.labels.iter().map(str::to_string).collect(),
            self.dependencies.clone(),
        )
    }

    /// Map feature names onto the frozen vocabulary, dropping unseen names.
    pub fn index_sentence<S: AsRef<str>>(&self, names: &[S]) -> SparseVector {
        let mut ids: Vec<usize> = names
            .iter()
            .filter_map(|name| self.features.id_of(name.as_ref()))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Sentence-level Z distribution: the merged classifier when available,
    /// otherwise the average of the fold classifiers.
    pub fn classify_sentence(&self, sentence: &SparseVector) -> Array1<f64> {
        if let Some(merged) = &self.merged_z {
            return merged.probabilities(sentence);
        }
        let labels = self.z_space().len();
        if self.z_classifiers.is_empty() {
            return Array1::from_elem(labels, 1.0 / labels as f64);
        }
        let mut total = Array1::zeros(labels);
        for clf in &self.z_classifiers {
            total += &clf.probabilities(sentence);
        }
        total / self.z_classifiers.len() as f64
    }

    /// Score every relation for a bag of already-indexed sentences.
    pub fn classify_bag(&self, sentences: &[SparseVector], mode: OutputMode) -> Vec<RelationPrediction> {
        let local: Vec<Array1<f64>> = sentences.iter().map(|s| self.classify_sentence(s)).collect();
        let top: Vec<usize> = local.iter().map(argmax).collect();
        let mode = if mode == OutputMode::JointBayes && self.y_models.is_empty() {
            warn!("model has no bag classifiers; falling back to noisy-or");
            OutputMode::NoisyOr
        } else {
            mode
        };
        let extractor = self.y_extractor();

        self.labels
            .iter()
            .enumerate()
            .map(|(y, relation)| {
                let provenance = (0..local.len()).fold(None, |best: Option<usize>, s| match best {
                    Some(b) if local[b][y] >= local[s][y] => Some(b),
                    _ => Some(s),
                });
                let probability = match mode {
                    OutputMode::JointBayes => match self.y_models.get(relation) {
                        Some(model) => model.log_prob(&extractor.extract(y, &top), true).exp(),
                        None => 0.0,
                    },
                    OutputMode::NoisyOr => noisy_or(local.iter().map(|p| p[y])),
                    OutputMode::ThresholdNoisyOr => noisy_or(
                        local
                            .iter()
                            .zip(&top)
                            .filter(|(_, best)| **best == y)
                            .map(|(p, _)| p[y]),
                    ),
                };
                RelationPrediction {
                    relation: relation.to_string(),
                    probability,
                    provenance,
                }
            })
            .collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        codec::write_model(self, BufWriter::new(File::create(path)?))?;
        info!(path = %path.display(), folds = self.z_classifiers.len(), "saved model");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let model = codec::read_model(BufReader::new(File::open(path)?))?;
        info!(
            path = %path.display(),
            relations = model.labels.len(),
            features = model.features.len(),
            "loaded model"
        );
        Ok(model)
    }

    /// True when this model was trained over the same vocabularies and fold count.
    pub fn is_compatible(&self, features: &Index, labels: &Index, folds: usize) -> bool {
        self.z_classifiers.len() == folds
            && self.features.iter().eq(features.iter())
            && self.labels.iter().eq(labels.iter())
    }
}

/// `1 - Π(1 - p_i)`.
pub fn noisy_or(probabilities: impl IntoIterator<Item = f64>) -> f64 {
    1.0 - probabilities
        .into_iter()
        .fold(1.0, |acc, p| acc * (1.0 - p.clamp(0.0, 1.0)))
}
