//! Bag-level features summarising how a bag's sentences are labelled.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::data::ZLabelSpace;

pub const NONE: &str = "none";
pub const ATLEAST_ONCE: &str = "atleastonce";
pub const UNIQUE: &str = "unique";
pub const SIGMOID: &str = "sigmoid";
const ATLEAST_N_CAP: usize = 5;
const SIGMOID_SLOPE: f64 = 12.0;
const SIGMOID_CENTER: f64 = 1.0 / 3.0;

/// Feature families available to the bag classifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum YFeatureKind {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "atleastonce")]
    AtLeastOnce,
    #[serde(rename = "cooc")]
    Cooc,
    #[serde(rename = "unique")]
    Unique,
    #[serde(rename = "atleast_n")]
    AtLeastN,
    #[serde(rename = "sigmoid")]
    Sigmoid,
}

impl YFeatureKind {
    pub const ALL: [YFeatureKind; 6] = [
        YFeatureKind::None,
        YFeatureKind::AtLeastOnce,
        YFeatureKind::Cooc,
        YFeatureKind::Unique,
        YFeatureKind::AtLeastN,
        YFeatureKind::Sigmoid,
    ];

    pub fn code(self) -> u8 {
        match self {
            YFeatureKind::None => 0,
            YFeatureKind::AtLeastOnce => 1,
            YFeatureKind::Cooc => 2,
            YFeatureKind::Unique => 3,
            YFeatureKind::AtLeastN => 4,
            YFeatureKind::Sigmoid => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }
}

/// Named, valued Y features for one (relation, bag) pair.
pub type YFeatures = Vec<(String, f64)>;

/// Turns a bag's Z labels into Y features for a given relation.
#[derive(Debug, Clone, PartialEq)]
pub struct YFeatureExtractor {
    kinds: BTreeSet<YFeatureKind>,
    label_names: Vec<String>,
    space: ZLabelSpace,
    dependencies: BTreeSet<(usize, usize)>,
}

impl YFeatureExtractor {
    /// `label_names` are the relation names in id order (no sentinel).
    pub fn new(
        kinds: impl IntoIterator<Item = YFeatureKind>,
        label_names: Vec<String>,
        dependencies: BTreeSet<(usize, usize)>,
    ) -> Self {
        let space = ZLabelSpace::new(label_names.len());
        Self {
            kinds: kinds.into_iter().collect(),
            label_names,
            space,
            dependencies,
        }
    }

    pub fn extract(&self, relation: usize, z_labels: &[usize]) -> YFeatures {
        let mut features = Vec::new();
        let count = z_labels.iter().filter(|&&z| z == relation).count();
        let present: BTreeSet<usize> = z_labels
            .iter()
            .copied()
            .filter(|&z| self.space.is_relation(z))
            .collect();

        if count == 0 {
            if self.kinds.contains(&YFeatureKind::None) {
                features.push((NONE.to_string(), 1.0));
            }
        } else {
            if self.kinds.contains(&YFeatureKind::AtLeastOnce) {
                features.push((ATLEAST_ONCE.to_string(), 1.0));
            }
            if self.kinds.contains(&YFeatureKind::Unique) && present.len() == 1 {
                features.push((UNIQUE.to_string(), 1.0));
            }
            if self.kinds.contains(&YFeatureKind::AtLeastN) {
                features.push((format!("atleast_{}", count.min(ATLEAST_N_CAP)), 1.0));
            }
            if self.kinds.contains(&YFeatureKind::Cooc) {
                for &other in present.iter().filter(|&&other| other != relation) {
                    if self.dependencies.contains(&(relation, other)) {
                        features.push((format!("cooc:{}", self.label_names[other]), 1.0));
                    }
                }
            }
        }
        if self.kinds.contains(&YFeatureKind::Sigmoid) && !z_labels.is_empty() {
            let fraction = count as f64 / z_labels.len() as f64;
            let value = 1.0 / (1.0 + (-SIGMOID_SLOPE * (fraction - SIGMOID_CENTER)).exp());
            features.push((SIGMOID.to_string(), value));
        }
        features
    }
}
