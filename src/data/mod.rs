//! Bag dataset container, vocabularies and fold partitioning.

pub mod bag;
pub mod dataset;
pub mod filter;
pub mod folds;
pub mod index;

pub use bag::{Bag, GoldLabel, SparseVector};
pub use dataset::{read_records, BagRecord, Dataset};
pub use filter::LocalFilter;
pub use index::{Index, ZLabelSpace, UNRELATED};
