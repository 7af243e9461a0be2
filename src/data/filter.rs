//! Policies deciding which bags the initial local classifiers train on.

use serde::{Deserialize, Serialize};

use crate::data::bag::Bag;

/// Eligibility filter for initial Z-model training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum LocalFilter {
    /// Every bag is eligible.
    #[default]
    All,
    /// Only bags with at most one positive label.
    SingleLabel,
    /// Bags with more than `max_sentences` sentences are skipped.
    Large { max_sentences: usize },
    /// Bags whose sentences all share one feature vector are skipped.
    Redundancy,
}

impl LocalFilter {
    pub fn accepts(&self, bag: &Bag) -> bool {
        match *self {
            LocalFilter::All => true,
            LocalFilter::SingleLabel => bag.positive.len() <= 1,
            LocalFilter::Large { max_sentences } => bag.len() <= max_sentences,
            LocalFilter::Redundancy => {
                bag.len() < 2 || bag.sentences.iter().any(|s| *s != bag.sentences[0])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag_with(sentences: &[&[usize]], positives: &[usize]) -> Bag {
        let mut bag = Bag::new("e", "s");
        for sentence in sentences {
            bag.push_sentence(sentence.to_vec(), None);
        }
        bag.positive.extend(positives.iter().copied());
        bag
    }

    #[test]
    fn single_label_rejects_multi_labelled_bags() {
        let filter = LocalFilter::SingleLabel;
        assert!(filter.accepts(&bag_with(&[&[0]], &[1])));
        assert!(!filter.accepts(&bag_with(&[&[0]], &[1, 2])));
    }

    #[test]
    fn large_filter_uses_sentence_count() {
        let filter = LocalFilter::Large { max_sentences: 2 };
        assert!(filter.accepts(&bag_with(&[&[0], &[1]], &[])));
        assert!(!filter.accepts(&bag_with(&[&[0], &[1], &[2]], &[])));
    }

    #[test]
    fn redundancy_rejects_duplicate_sentences() {
        let filter = LocalFilter::Redundancy;
        assert!(!filter.accepts(&bag_with(&[&[0, 1], &[0, 1]], &[])));
        assert!(filter.accepts(&bag_with(&[&[0, 1], &[1]], &[])));
    }

    #[test]
    fn parses_tagged_json() {
        let filter: LocalFilter =
            serde_json::from_str(r#"{"kind":"large","max_sentences":40}"#).unwrap();
        assert_eq!(filter, LocalFilter::Large { max_sentences: 40 });
    }
}
