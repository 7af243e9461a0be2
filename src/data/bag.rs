//! A bag groups every sentence mentioning one (entity, slot value) pair.

use std::collections::BTreeSet;

use rand::{seq::SliceRandom, Rng};

use crate::data::index::ZLabelSpace;

/// Sparse binary feature vector for one sentence.
pub type SparseVector = Vec<usize>;

/// Human-annotated sentence label that inference must keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoldLabel {
    Relation(usize),
    Unrelated,
}

impl GoldLabel {
    pub fn to_z(self, space: ZLabelSpace) -> usize {
        match self {
            GoldLabel::Relation(id) => id,
            GoldLabel::Unrelated => space.nil(),
        }
    }
}

/// One distant-supervision unit: sentences plus the KB label sets for the pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Bag {
    pub entity: String,
    pub slot_value: String,
    pub sentences: Vec<SparseVector>,
    pub sentence_ids: Vec<String>,
    pub fixed: Vec<Option<GoldLabel>>,
    pub positive: BTreeSet<usize>,
    pub negative: BTreeSet<usize>,
    pub unknown: BTreeSet<usize>,
}

impl Bag {
    pub fn new(entity: impl Into<String>, slot_value: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            slot_value: slot_value.into(),
            sentences: Vec::new(),
            sentence_ids: Vec::new(),
            fixed: Vec::new(),
            positive: BTreeSet::new(),
            negative: BTreeSet::new(),
            unknown: BTreeSet::new(),
        }
    }

    /// Append a sentence; the id defaults to `entity|slot|position`.
    pub fn push_sentence(&mut self, features: SparseVector, id: Option<String>) {
        let id = id.unwrap_or_else(|| {
            format!("{}|{}|{}", self.entity, self.slot_value, self.sentences.len())
        });
        self.sentences.push(features);
        self.sentence_ids.push(id);
        self.fixed.push(None);
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.entity, &self.slot_value)
    }

    /// Panics when the sentence rows and their parallel arrays disagree in length.
    pub fn assert_consistent(&self) {
        assert_eq!(
            self.sentences.len(),
            self.sentence_ids.len(),
            "bag {:?}: sentence ids out of step with sentences",
            self.key()
        );
        assert_eq!(
            self.sentences.len(),
            self.fixed.len(),
            "bag {:?}: fixed labels out of step with sentences",
            self.key()
        );
    }

    /// Promote `label` from unknown/negative to positive. Returns false if it
    /// was already positive.
    pub fn promote(&mut self, label: usize) -> bool {
        self.unknown.remove(&label);
        self.negative.remove(&label);
        self.positive.insert(label)
    }

    /// Move every remaining unknown label to the negative set. Returns how
    /// many labels were newly made negative; unknowns that are also positive
    /// are dropped without counting.
    pub fn demote_unknowns(&mut self) -> usize {
        let unknown = std::mem::take(&mut self.unknown);
        unknown
            .into_iter()
            .filter(|label| !self.positive.contains(label) && self.negative.insert(*label))
            .count()
    }

    /// Number of distinct relations this bag carries any label for.
    pub fn labelled_relations(&self) -> usize {
        self.positive
            .iter()
            .chain(&self.negative)
            .chain(&self.unknown)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Permute sentence rows in place, carrying ids, fixed labels and the
    /// caller's Z labels along.
    pub fn shuffle_with<R: Rng + ?Sized>(&mut self, z_labels: &mut [usize], rng: &mut R) {
        assert_eq!(z_labels.len(), self.len());
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        self.sentences = permute(&self.sentences, &order);
        self.sentence_ids = permute(&self.sentence_ids, &order);
        self.fixed = permute(&self.fixed, &order);
        let shuffled = permute(z_labels, &order);
        z_labels.copy_from_slice(&shuffled);
    }
}

fn permute<T: Clone>(values: &[T], order: &[usize]) -> Vec<T> {
    order.iter().map(|&i| values[i].clone()).collect()
}
