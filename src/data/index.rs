//! Bijective name ↔ id vocabularies for features and relation labels.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Name of the reserved Z label meaning "this sentence expresses no relation".
pub const UNRELATED: &str = "_NR";

/// Append-only string vocabulary. Once frozen, unknown names are never added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    names: IndexSet<String>,
    frozen: bool,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a frozen index from an ordered list of names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            frozen: true,
        }
    }

    /// Id for `name`, inserting it unless the index is frozen.
    pub fn add(&mut self, name: &str) -> Option<usize> {
        if let Some(id) = self.names.get_index_of(name) {
            return Some(id);
        }
        if self.frozen {
            return None;
        }
        let (id, _) = self.names.insert_full(name.to_string());
        Some(id)
    }

    pub fn id_of(&self, name: &str) -> Option<usize> {
        self.names.get_index_of(name)
    }

    pub fn name(&self, id: usize) -> Option<&str> {
        self.names.get_index(id).map(String::as_str)
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// Z-label space: every relation keeps its Y id, the sentinel takes the next id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZLabelSpace {
    relations: usize,
}

impl ZLabelSpace {
    pub fn new(relations: usize) -> Self {
        Self { relations }
    }

    /// Id of the "unrelated" sentinel.
    pub fn nil(&self) -> usize {
        self.relations
    }

    pub fn relations(&self) -> usize {
        self.relations
    }

    /// Number of Z labels, sentinel included.
    pub fn len(&self) -> usize {
        self.relations + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn is_relation(&self, z: usize) -> bool {
        z < self.relations
    }

    /// Z-label names in id order, sentinel last.
    pub fn names(&self, labels: &Index) -> Vec<String> {
        labels
            .iter()
            .map(str::to_string)
            .chain(std::iter::once(UNRELATED.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_and_stable() {
        let mut index = Index::new();
        assert_eq!(index.add("per:title"), Some(0));
        assert_eq!(index.add("org:founded"), Some(1));
        assert_eq!(index.add("per:title"), Some(0));
        assert_eq!(index.name(1), Some("org:founded"));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn frozen_index_rejects_new_names() {
        let mut index = Index::from_names(["a", "b"]);
        assert!(index.is_frozen());
        assert_eq!(index.add("c"), None);
        assert_eq!(index.add("b"), Some(1));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn sentinel_follows_relations() {
        let labels = Index::from_names(["a", "b"]);
        let space = ZLabelSpace::new(labels.len());
        assert_eq!(space.nil(), 2);
        assert_eq!(space.names(&labels), vec!["a", "b", UNRELATED]);
        assert!(space.is_relation(1));
        assert!(!space.is_relation(2));
    }
}
