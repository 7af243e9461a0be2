//! At-least-one latent label inference for a single bag.
//!
//! Both strategies maximise
//! `Σ_s log P(z_s|x_s) + Σ_{y∈pos} log P(y|f_y(z)) + Σ_{y∈neg} log P(¬y|f_y(z))`
//! by coordinate moves over the sentence labels. Neither is globally optimal.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use ndarray::Array1;
use once_cell::sync::Lazy;

use crate::{
    error::{MimlError, Result},
    model::{YFeatureExtractor, YModel},
};

/// Probability mass kept on a human-annotated label.
pub const FIXED_LABEL_CONFIDENCE: f64 = 0.8;

/// Bag-level half of the joint objective.
pub struct JointScorer<'a> {
    pub extractor: &'a YFeatureExtractor,
    /// Bag classifiers in relation-id order.
    pub y_models: &'a IndexMap<String, YModel>,
}

impl<'a> JointScorer<'a> {
    pub fn new(extractor: &'a YFeatureExtractor, y_models: &'a IndexMap<String, YModel>) -> Self {
        Self {
            extractor,
            y_models,
        }
    }

    fn model(&self, relation: usize) -> &YModel {
        let (_, model) = self
            .y_models
            .get_index(relation)
            .unwrap_or_else(|| panic!("no bag classifier for relation id {relation}"));
        model
    }

    /// `log P(y holds | f_y(z))`.
    pub fn log_prob_holds(&self, relation: usize, z: &[usize]) -> f64 {
        self.model(relation)
            .log_prob(&self.extractor.extract(relation, z), true)
    }

    pub fn bag_score(&self, z: &[usize], positive: &BTreeSet<usize>, negative: &BTreeSet<usize>) -> f64 {
        let pos: f64 = positive
            .iter()
            .map(|&y| self.model(y).log_prob(&self.extractor.extract(y, z), true))
            .sum();
        let neg: f64 = negative
            .iter()
            .filter(|y| !positive.contains(y))
            .map(|&y| self.model(y).log_prob(&self.extractor.extract(y, z), false))
            .sum();
        pos + neg
    }
}

/// Everything inference needs about one bag. `z` is updated in place.
pub struct BagProblem<'a> {
    /// Per-sentence Z log-probabilities (fixed sentences already overridden).
    pub local: &'a [Array1<f64>],
    pub fixed: &'a [Option<usize>],
    pub positive: &'a BTreeSet<usize>,
    pub negative: &'a BTreeSet<usize>,
    /// Candidate labels in scan order.
    pub candidates: &'a [usize],
    pub scorer: &'a JointScorer<'a>,
    pub z: &'a mut [usize],
}

impl BagProblem<'_> {
    fn local_score(&self) -> f64 {
        self.z
            .iter()
            .enumerate()
            .map(|(s, &label)| self.local[s][label])
            .sum()
    }

    /// Full joint score of the current assignment.
    pub fn joint_score(&self) -> f64 {
        self.local_score() + self.scorer.bag_score(self.z, self.positive, self.negative)
    }

    /// Joint score if sentence `s` took `label`, given the current local total.
    fn score_with(&mut self, s: usize, label: usize, local_total: f64) -> f64 {
        let original = self.z[s];
        self.z[s] = label;
        let score = local_total - self.local[s][original]
            + self.local[s][label]
            + self.scorer.bag_score(self.z, self.positive, self.negative);
        self.z[s] = original;
        score
    }
}

/// Result of running inference on one bag.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutcome {
    pub flips: usize,
    /// Joint score before any flip, then after each committed flip.
    pub trace: Vec<f64>,
}

/// A latent label search strategy.
pub trait LatentInference: Send + Sync {
    fn name(&self) -> &'static str;

    fn infer(&self, problem: BagProblem<'_>) -> InferenceOutcome;
}

/// Repeated best-single-flip hill climbing; each sentence flips at most once.
#[derive(Debug, Clone, Copy, Default)]
pub struct HillClimbing;

impl LatentInference for HillClimbing {
    fn name(&self) -> &'static str {
        "iterative"
    }

    fn infer(&self, mut problem: BagProblem<'_>) -> InferenceOutcome {
        let mut settled: Vec<bool> = problem.fixed.iter().map(Option::is_some).collect();
        let mut local_total = problem.local_score();
        let mut current = problem.joint_score();
        let mut trace = vec![current];

        loop {
            let mut best: Option<(usize, usize, f64)> = None;
            for s in 0..problem.z.len() {
                if settled[s] {
                    continue;
                }
                for &label in problem.candidates {
                    if label == problem.z[s] {
                        continue;
                    }
                    let score = problem.score_with(s, label, local_total);
                    if score > current && best.map_or(true, |(_, _, b)| score > b) {
                        best = Some((s, label, score));
                    }
                }
            }
            let Some((s, label, score)) = best else {
                break;
            };
            local_total += problem.local[s][label] - problem.local[s][problem.z[s]];
            problem.z[s] = label;
            settled[s] = true;
            current = score;
            trace.push(score);
        }

        InferenceOutcome {
            flips: trace.len() - 1,
            trace,
        }
    }
}

/// One pass over the sentences, each taking its best label given the others.
#[derive(Debug, Clone, Copy, Default)]
pub struct StablePass;

impl LatentInference for StablePass {
    fn name(&self) -> &'static str {
        "stable"
    }

    fn infer(&self, mut problem: BagProblem<'_>) -> InferenceOutcome {
        let mut local_total = problem.local_score();
        let mut trace = vec![problem.joint_score()];
        for s in 0..problem.z.len() {
            if problem.fixed[s].is_some() {
                continue;
            }
            let original = problem.z[s];
            let mut best = (original, problem.score_with(s, original, local_total));
            for &label in problem.candidates {
                if label == original {
                    continue;
                }
                let score = problem.score_with(s, label, local_total);
                if score > best.1 {
                    best = (label, score);
                }
            }
            if best.0 != original {
                local_total += problem.local[s][best.0] - problem.local[s][original];
                problem.z[s] = best.0;
                trace.push(best.1);
            }
        }
        InferenceOutcome {
            flips: trace.len() - 1,
            trace,
        }
    }
}

type Constructor = fn() -> Box<dyn LatentInference>;

fn hill_climbing() -> Box<dyn LatentInference> {
    Box::new(HillClimbing)
}

fn stable_pass() -> Box<dyn LatentInference> {
    Box::new(StablePass)
}

static REGISTRY: Lazy<IndexMap<&'static str, Constructor>> = Lazy::new(|| {
    let mut registry: IndexMap<&'static str, Constructor> = IndexMap::new();
    registry.insert("iterative", hill_climbing as Constructor);
    registry.insert("stable", stable_pass as Constructor);
    registry
});

/// Build the inference strategy registered under `tag`.
pub fn by_name(tag: &str) -> Result<Box<dyn LatentInference>> {
    REGISTRY
        .get(tag)
        .map(|build| build())
        .ok_or_else(|| MimlError::UnknownInference(tag.to_string()))
}

pub fn available() -> Vec<&'static str> {
    REGISTRY.keys().copied().collect()
}

/// Log-probabilities for a sentence whose label was fixed by an annotator.
pub fn fixed_log_probs(gold: usize, labels: usize) -> Array1<f64> {
    let rest = (1.0 - FIXED_LABEL_CONFIDENCE) / (labels - 1).max(1) as f64;
    Array1::from_iter((0..labels).map(|z| {
        if z == gold {
            FIXED_LABEL_CONFIDENCE.ln()
        } else {
            rest.ln()
        }
    }))
}
