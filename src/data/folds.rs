//! Contiguous K-fold partitioning of bags.

use std::ops::Range;

/// Test range of fold `fold` over `n` bags split into `folds` folds.
///
/// The last fold absorbs the remainder. Panics when a fold would be empty.
pub fn fold_range(fold: usize, n: usize, folds: usize) -> Range<usize> {
    assert!(fold < folds, "fold {fold} out of range for {folds} folds");
    let size = n / folds;
    assert!(size > 0, "cannot split {n} bags into {folds} folds");
    let start = fold * size;
    let end = if fold == folds - 1 { n } else { (fold + 1) * size };
    start..end
}

/// Bag indices a fold trains on: everything outside its test range.
pub fn train_indices(fold: usize, n: usize, folds: usize) -> Vec<usize> {
    let test = fold_range(fold, n, folds);
    (0..test.start).chain(test.end..n).collect()
}

/// Fold whose test range contains bag `index`.
pub fn fold_of(index: usize, n: usize, folds: usize) -> usize {
    let size = n / folds;
    assert!(size > 0, "cannot split {n} bags into {folds} folds");
    (index / size).min(folds - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_fold_absorbs_remainder() {
        assert_eq!(fold_range(0, 10, 3), 0..3);
        assert_eq!(fold_range(1, 10, 3), 3..6);
        assert_eq!(fold_range(2, 10, 3), 6..10);
    }

    #[test]
    fn train_indices_are_the_complement() {
        assert_eq!(train_indices(1, 7, 3), vec![0, 1, 4, 5, 6]);
    }

    #[test]
    fn fold_of_matches_ranges() {
        for index in 0..11 {
            let fold = fold_of(index, 11, 4);
            assert!(fold_range(fold, 11, 4).contains(&index));
        }
    }

    #[test]
    #[should_panic(expected = "cannot split")]
    fn too_few_bags_panics() {
        fold_range(0, 2, 3);
    }
}
