//! Promote the most confident unknown bag labels to positive.

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
};

use ndarray::Array1;
use tracing::info;

use crate::{classify::argmax, data::Bag, em::inference::JointScorer};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    score: f64,
    bag: usize,
    relation: usize,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.bag.cmp(&self.bag))
            .then_with(|| other.relation.cmp(&self.relation))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// What a relabeling pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelabelOutcome {
    pub budget: usize,
    pub promoted: usize,
    pub demoted: usize,
}

/// Promote up to `round(fraction * labelled pairs) - positives` unknown
/// (bag, relation) pairs by bag-classifier confidence, then turn every other
/// unknown label negative.
///
/// `local[b][s]` holds the Z log-probabilities of sentence `s` of bag `b`.
pub fn relabel(
    bags: &mut [Bag],
    local: &[Vec<Array1<f64>>],
    scorer: &JointScorer<'_>,
    fraction: f64,
) -> RelabelOutcome {
    assert_eq!(bags.len(), local.len(), "one local distribution per bag");
    let labelled: usize = bags.iter().map(Bag::labelled_relations).sum();
    let current: usize = bags.iter().map(|bag| bag.positive.len()).sum();
    let expected = (fraction * labelled as f64).round() as usize;
    let budget = expected.saturating_sub(current);

    let mut heap: BinaryHeap<Reverse<Candidate>> = BinaryHeap::with_capacity(budget + 1);
    if budget > 0 {
        for (index, (bag, bag_local)) in bags.iter().zip(local).enumerate() {
            let candidates: Vec<usize> = bag
                .unknown
                .iter()
                .copied()
                .filter(|y| !bag.positive.contains(y))
                .collect();
            if candidates.is_empty() {
                continue;
            }
            let z_star: Vec<usize> = bag_local.iter().map(argmax).collect();
            for relation in candidates {
                heap.push(Reverse(Candidate {
                    score: scorer.log_prob_holds(relation, &z_star),
                    bag: index,
                    relation,
                }));
                if heap.len() > budget {
                    heap.pop();
                }
            }
        }
    }

    let mut outcome = RelabelOutcome {
        budget,
        ..RelabelOutcome::default()
    };
    for Reverse(candidate) in heap.into_vec() {
        if bags[candidate.bag].promote(candidate.relation) {
            outcome.promoted += 1;
        }
    }
    for bag in bags.iter_mut() {
        outcome.demoted += bag.demote_unknowns();
    }
    info!(
        labelled,
        current,
        expected,
        promoted = outcome.promoted,
        demoted = outcome.demoted,
        "relabeled unknown bag labels"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::model::{YFeatureExtractor, YFeatureKind, YModel};

    #[test]
    fn heap_keeps_highest_scores() {
        let mut heap = BinaryHeap::new();
        for (i, score) in [-3.0, -0.5, -9.0, -1.0].into_iter().enumerate() {
            heap.push(Reverse(Candidate {
                score,
                bag: i,
                relation: 0,
            }));
            if heap.len() > 2 {
                heap.pop();
            }
        }
        let mut kept: Vec<usize> = heap.into_iter().map(|Reverse(c)| c.bag).collect();
        kept.sort();
        assert_eq!(kept, vec![1, 3]);
    }

    #[test]
    fn promotes_the_best_supported_unknown() {
        let extractor = YFeatureExtractor::new(
            [YFeatureKind::AtLeastOnce, YFeatureKind::None],
            vec!["a".into()],
            Default::default(),
        );
        let mut models = IndexMap::new();
        models.insert("a".to_string(), YModel::at_least_once());
        let scorer = JointScorer::new(&extractor, &models);

        let mut bags = Vec::new();
        let mut local = Vec::new();
        for (i, p_a) in [0.9, 0.2, 0.1].into_iter().enumerate() {
            let mut bag = Bag::new(format!("e{i}"), "v");
            bag.push_sentence(vec![0], None);
            bag.unknown.insert(0);
            bags.push(bag);
            local.push(vec![Array1::from(vec![f64::ln(p_a), f64::ln(1.0 - p_a)])]);
        }
        let outcome = relabel(&mut bags, &local, &scorer, 0.34);
        assert_eq!(outcome.budget, 1);
        assert_eq!(outcome.promoted, 1);
        assert_eq!(outcome.demoted, 2);
        assert!(bags[0].positive.contains(&0));
        assert!(bags[1].negative.contains(&0));
        assert!(bags.iter().all(|bag| bag.unknown.is_empty()));
    }
}
