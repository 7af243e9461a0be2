//! Indexed bag storage shared by training and evaluation.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    io::{BufRead, BufReader},
    path::Path,
};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    data::{
        bag::{Bag, GoldLabel},
        index::{Index, ZLabelSpace, UNRELATED},
    },
    error::{MimlError, Result},
};

/// On-disk bag record, one JSON object per line.
#[derive(Debug, Clone, Deserialize)]
pub struct BagRecord {
    pub entity: String,
    pub slot_value: String,
    pub sentences: Vec<Vec<String>>,
    #[serde(default)]
    pub sentence_ids: Option<Vec<String>>,
    #[serde(default)]
    pub positive: Vec<String>,
    #[serde(default)]
    pub negative: Vec<String>,
    #[serde(default)]
    pub unknown: Vec<String>,
    /// Sentence position → gold label name (`_NR` for "no relation").
    #[serde(default)]
    pub gold: BTreeMap<usize, String>,
}

/// Parse a JSONL bag file without indexing it. Blank lines are skipped.
pub fn read_records(path: &Path) -> Result<Vec<BagRecord>> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

/// Feature index, label index and the bags built against them.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub features: Index,
    pub labels: Index,
    pub bags: Vec<Bag>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bags.is_empty()
    }

    pub fn z_space(&self) -> ZLabelSpace {
        ZLabelSpace::new(self.labels.len())
    }

    /// Index a bag given by feature and label names. Unknown features are
    /// dropped once the feature index is frozen.
    pub fn add_bag<S: AsRef<str>>(
        &mut self,
        entity: &str,
        slot_value: &str,
        sentences: &[Vec<S>],
        positive: &[S],
        negative: &[S],
        unknown: &[S],
    ) -> Result<usize> {
        let mut bag = Bag::new(entity, slot_value);
        for sentence in sentences {
            let features = self.index_sentence(sentence);
            bag.push_sentence(features, None);
        }
        bag.positive = self.label_set(positive)?;
        bag.negative = self.label_set(negative)?;
        bag.unknown = self.label_set(unknown)?;
        self.bags.push(bag);
        Ok(self.bags.len() - 1)
    }

    /// Index a full record, including sentence ids and gold labels.
    pub fn add_record(&mut self, record: &BagRecord) -> Result<usize> {
        let idx = self.add_bag(
            &record.entity,
            &record.slot_value,
            &record.sentences,
            &record.positive,
            &record.negative,
            &record.unknown,
        )?;
        let bag = &mut self.bags[idx];
        if let Some(ids) = &record.sentence_ids {
            if ids.len() != bag.len() {
                return Err(MimlError::config(format!(
                    "bag ({}, {}) has {} sentences but {} sentence ids",
                    record.entity,
                    record.slot_value,
                    bag.len(),
                    ids.len()
                )));
            }
            bag.sentence_ids = ids.clone();
        }
        for (&position, name) in &record.gold {
            if position >= bag.len() {
                return Err(MimlError::config(format!(
                    "gold label for sentence {position} outside bag ({}, {})",
                    record.entity, record.slot_value
                )));
            }
            let gold = if name == UNRELATED {
                GoldLabel::Unrelated
            } else {
                let id = self
                    .labels
                    .add(name)
                    .ok_or_else(|| MimlError::UnknownRelation(name.clone()))?;
                GoldLabel::Relation(id)
            };
            bag.fixed[position] = Some(gold);
        }
        Ok(idx)
    }

    /// Load a JSONL bag file.
    pub fn load_jsonl(path: &Path) -> Result<Self> {
        let mut dataset = Self::new();
        dataset.extend_from_jsonl(path)?;
        info!(
            path = %path.display(),
            bags = dataset.len(),
            features = dataset.features.len(),
            relations = dataset.labels.len(),
            "loaded bag dataset"
        );
        Ok(dataset)
    }

    /// Append the bags of a JSONL file, indexing against the current vocabularies.
    pub fn extend_from_jsonl(&mut self, path: &Path) -> Result<()> {
        for record in read_records(path)? {
            self.add_record(&record)?;
        }
        Ok(())
    }

    pub fn index_sentence<S: AsRef<str>>(&mut self, sentence: &[S]) -> Vec<usize> {
        let mut ids: Vec<usize> = sentence
            .iter()
            .filter_map(|name| self.features.add(name.as_ref()))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn label_set<S: AsRef<str>>(&mut self, names: &[S]) -> Result<BTreeSet<usize>> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                if name == UNRELATED {
                    return Err(MimlError::config(format!(
                        "{UNRELATED} is reserved and cannot name a relation"
                    )));
                }
                self.labels
                    .add(name)
                    .ok_or_else(|| MimlError::UnknownRelation(name.to_string()))
            })
            .collect()
    }

    /// Drop features occurring in fewer than `min_count` sentences and remap ids.
    pub fn apply_feature_count_threshold(&mut self, min_count: usize) {
        if min_count <= 1 {
            return;
        }
        let mut counts = vec![0usize; self.features.len()];
        for sentence in self.bags.iter().flat_map(|bag| bag.sentences.iter()) {
            for &feature in sentence {
                counts[feature] += 1;
            }
        }
        let mut remap: HashMap<usize, usize> = HashMap::new();
        let mut kept = Index::new();
        for (old, name) in self.features.iter().enumerate() {
            if counts[old] >= min_count {
                if let Some(new) = kept.add(name) {
                    remap.insert(old, new);
                }
            }
        }
        if self.features.is_frozen() {
            kept.freeze();
        }
        for bag in &mut self.bags {
            for sentence in &mut bag.sentences {
                *sentence = sentence
                    .iter()
                    .filter_map(|feature| remap.get(feature).copied())
                    .collect();
            }
        }
        info!(
            before = self.features.len(),
            after = kept.len(),
            min_count,
            "applied feature count threshold"
        );
        self.features = kept;
    }

    /// Ordered relation pairs that are positive together in at least one bag.
    pub fn known_dependencies(&self) -> BTreeSet<(usize, usize)> {
        let mut deps = BTreeSet::new();
        for bag in &self.bags {
            for &a in &bag.positive {
                for &b in &bag.positive {
                    if a != b {
                        deps.insert((a, b));
                    }
                }
            }
        }
        debug!(count = deps.len(), "discovered label dependencies");
        deps
    }

    /// Panic if any bag's parallel arrays disagree in length.
    pub fn check_consistency(&self) {
        for bag in &self.bags {
            bag.assert_consistent();
        }
    }

    /// Number of (bag, relation) pairs with any KB annotation.
    pub fn labelled_pairs(&self) -> usize {
        self.bags.iter().map(Bag::labelled_relations).sum()
    }

    pub fn positive_pairs(&self) -> usize {
        self.bags.iter().map(|bag| bag.positive.len()).sum()
    }

    /// Remove bags without sentences; they carry no evidence for any model.
    pub fn drop_empty_bags(&mut self) -> usize {
        let before = self.bags.len();
        self.bags.retain(|bag| !bag.is_empty());
        let dropped = before - self.bags.len();
        if dropped > 0 {
            warn!(dropped, "removed bags without sentences");
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn dataset() -> Dataset {
        let mut data = Dataset::new();
        data.add_bag(
            "Ada",
            "London",
            &[vec!["born", "in"], vec!["lives", "in"]],
            &["per:city_of_birth", "per:residence"],
            &[],
            &[],
        )
        .unwrap();
        data.add_bag("Ada", "1815", &[vec!["born"]], &[], &["per:residence"], &[])
            .unwrap();
        data
    }

    #[test]
    fn bags_index_features_and_labels() {
        let data = dataset();
        assert_eq!(data.features.len(), 3);
        assert_eq!(data.labels.len(), 2);
        assert_eq!(data.bags[1].sentences[0], vec![0]);
        assert!(data.bags[1].negative.contains(&1));
        data.check_consistency();
    }

    #[test]
    fn dependencies_are_symmetric_pairs() {
        let deps = dataset().known_dependencies();
        assert!(deps.contains(&(0, 1)));
        assert!(deps.contains(&(1, 0)));
        assert_eq!(deps.len(), 2);
    }

    #[test]
    fn threshold_remaps_feature_ids() {
        let mut data = dataset();
        data.apply_feature_count_threshold(2);
        assert_eq!(data.features.len(), 2);
        let born = data.features.id_of("born").unwrap();
        let lives = data.features.id_of("lives");
        assert!(lives.is_none());
        assert_eq!(data.bags[1].sentences[0], vec![born]);
        assert_eq!(data.bags[0].sentences[1].len(), 1);
    }

    #[test]
    fn reserved_unrelated_name_is_not_a_relation() {
        let mut data = Dataset::new();
        let err = data
            .add_bag("Ada", "London", &[vec!["born"]], &[UNRELATED], &[], &[])
            .unwrap_err();
        assert!(matches!(err, MimlError::Config(_)));
        assert!(data.labels.is_empty());
        assert!(data.is_empty());
    }

    #[test]
    fn frozen_features_drop_unknown_names() {
        let mut data = dataset();
        data.features.freeze();
        let ids = data.index_sentence(&["born", "never-seen"]);
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn loads_jsonl_with_gold_labels() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"entity":"Ada","slot_value":"London","sentences":[["born"],["visited"]],"sentence_ids":["d1:0","d1:4"],"positive":["per:city_of_birth"],"gold":{{"1":"_NR"}}}}"#
        )
        .unwrap();
        let data = Dataset::load_jsonl(file.path()).unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data.bags[0].sentence_ids, vec!["d1:0", "d1:4"]);
        assert_eq!(data.bags[0].fixed[1], Some(GoldLabel::Unrelated));
        assert_eq!(data.labelled_pairs(), 1);
    }
}
