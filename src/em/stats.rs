//! Training diagnostics: local P/R/F1, label transitions and per-sentence
//! statistics for active-learning selection.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::warn;

/// Counts behind precision/recall over non-"unrelated" predictions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrecisionRecall {
    pub correct: usize,
    pub predicted: usize,
    pub relevant: usize,
}

impl PrecisionRecall {
    pub fn precision(&self) -> f64 {
        ratio(self.correct, self.predicted)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.correct, self.relevant)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    pub fn merge(&mut self, other: PrecisionRecall) {
        self.correct += other.correct;
        self.predicted += other.predicted;
        self.relevant += other.relevant;
    }
}

impl fmt::Display for PrecisionRecall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "P {:.3} R {:.3} F1 {:.3}",
            self.precision(),
            self.recall(),
            self.f1()
        )
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Square count matrix over Z labels, rows = before, columns = after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    labels: Vec<String>,
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(labels: Vec<String>) -> Self {
        let n = labels.len();
        Self {
            labels,
            counts: vec![vec![0; n]; n],
        }
    }

    pub fn record(&mut self, from: usize, to: usize) {
        self.counts[from][to] += 1;
    }

    pub fn count(&self, from: usize, to: usize) -> usize {
        self.counts[from][to]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    /// Off-diagonal mass, i.e. labels that changed.
    pub fn changed(&self) -> usize {
        self.total() - (0..self.labels.len()).map(|i| self.counts[i][i]).sum::<usize>()
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const CORNER: &str = "old";
        let width = self
            .labels
            .iter()
            .map(String::len)
            .chain(self.counts.iter().flatten().map(|c| c.to_string().len()))
            .chain(std::iter::once(CORNER.len()))
            .max()
            .unwrap_or(1);
        write!(f, "{CORNER:<width$}")?;
        for label in &self.labels {
            write!(f, " {label:>width$}")?;
        }
        for (label, row) in self.labels.iter().zip(&self.counts) {
            write!(f, "\n{label:<width$}")?;
            for count in row {
                write!(f, " {count:>width$}")?;
            }
        }
        Ok(())
    }
}

/// What the trainer believes about one sentence after the last E-step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentenceStatistics {
    /// Inferred Z label.
    pub label: String,
    /// Local Z distribution, label name → probability.
    pub distribution: IndexMap<String, f64>,
    /// Local probability of the inferred label.
    pub confidence: f64,
}

/// Per-sentence statistics keyed by sentence id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainingStatistics {
    pub epoch: usize,
    pub sentences: IndexMap<String, SentenceStatistics>,
}

impl TrainingStatistics {
    /// Store `stats` under `sentence_id`. A repeated id keeps the latest row.
    /// Returns `false` if the id was already present.
    pub fn record(&mut self, sentence_id: &str, stats: SentenceStatistics) -> bool {
        let fresh = self
            .sentences
            .insert(sentence_id.to_string(), stats)
            .is_none();
        if !fresh {
            warn!(sentence_id, "duplicate sentence id; earlier statistics replaced");
        }
        fresh
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    pub fn get(&self, sentence_id: &str) -> Option<&SentenceStatistics> {
        self.sentences.get(sentence_id)
    }

    /// The `n` sentence ids with the lowest confidence, least confident first.
    pub fn least_confident(&self, n: usize) -> Vec<&str> {
        let mut ranked: Vec<(&str, f64)> = self
            .sentences
            .iter()
            .map(|(id, stats)| (id.as_str(), stats.confidence))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        ranked.into_iter().take(n).map(|(id, _)| id).collect()
    }
}
