//! Stratified k-fold assignment.
//!
//! The whole table is shuffled once, then every row gets exactly one
//! validation fold so that each fold's label distribution tracks the overall
//! distribution. Within one class, folds are handed out in row order: the
//! first rows of the class go to fold 0, the next to fold 1, and so on, with
//! per-fold quotas computed by dealing the label-sorted rows round-robin over
//! the folds.
//!
//! With a seed the assignment is reproducible; without one every run draws a
//! fresh permutation.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use crate::config::FoldConfig;
use crate::dataset::table::SampleTable;
use crate::utils::error::{Result, ShotError};

/// Compute a fold id in `0..num_folds` for every label, without reordering.
pub fn stratified_fold_ids(labels: &[usize], num_folds: usize) -> Result<Vec<usize>> {
    if num_folds < 2 {
        return Err(ShotError::Fold(format!(
            "At least 2 folds are required, got {}",
            num_folds
        )));
    }
    if num_folds > labels.len() {
        return Err(ShotError::Fold(format!(
            "Cannot split {} samples into {} folds",
            labels.len(),
            num_folds
        )));
    }

    // Classes are numbered by first appearance
    let mut class_of_label: Vec<Option<usize>> = Vec::new();
    let mut encoded = Vec::with_capacity(labels.len());
    let mut num_classes = 0;
    for &label in labels {
        if label >= class_of_label.len() {
            class_of_label.resize(label + 1, None);
        }
        let class = *class_of_label[label].get_or_insert_with(|| {
            num_classes += 1;
            num_classes - 1
        });
        encoded.push(class);
    }

    let mut class_counts = vec![0usize; num_classes];
    for &class in &encoded {
        class_counts[class] += 1;
    }

    if class_counts.iter().all(|&count| count < num_folds) {
        return Err(ShotError::Fold(format!(
            "num_folds={} cannot be greater than the number of members in each class",
            num_folds
        )));
    }
    let smallest = class_counts.iter().copied().min().unwrap_or(0);
    if smallest < num_folds {
        warn!(
            "The least populated class has only {} members, which is less than num_folds={}",
            smallest, num_folds
        );
    }

    // allocation[fold][class]: rows of `class` that land in `fold`
    let mut sorted = encoded.clone();
    sorted.sort_unstable();
    let mut allocation = vec![vec![0usize; num_classes]; num_folds];
    for (position, &class) in sorted.iter().enumerate() {
        allocation[position % num_folds][class] += 1;
    }

    let mut next_fold = vec![0usize; num_classes];
    let mut remaining: Vec<usize> = (0..num_classes).map(|c| allocation[0][c]).collect();
    let mut fold_ids = Vec::with_capacity(labels.len());
    for &class in &encoded {
        while remaining[class] == 0 {
            next_fold[class] += 1;
            remaining[class] = allocation[next_fold[class]][class];
        }
        remaining[class] -= 1;
        fold_ids.push(next_fold[class]);
    }

    Ok(fold_ids)
}

/// Shuffle the table and assign a stratified fold to every row
pub fn assign_folds(table: &SampleTable, config: &FoldConfig) -> Result<SampleTable> {
    let mut rng = match config.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };

    let mut records = table.records().to_vec();
    records.shuffle(&mut rng);

    let labels: Vec<usize> = records.iter().map(|r| r.label).collect();
    let fold_ids = stratified_fold_ids(&labels, config.num_folds)?;
    for (record, fold) in records.iter_mut().zip(fold_ids) {
        record.fold = Some(fold);
    }

    let assigned = SampleTable::new(records);
    for (fold, counts) in assigned.fold_label_counts() {
        let total: usize = counts.values().sum();
        info!("Fold {}: {} rows", fold, total);
    }
    Ok(assigned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::table::SampleRecord;
    use std::path::PathBuf;

    fn table_with_labels(labels: &[usize]) -> SampleTable {
        labels
            .iter()
            .enumerate()
            .map(|(i, &label)| SampleRecord::new(PathBuf::from(format!("img_{}.jpg", i)), label))
            .collect()
    }

    fn count(fold_ids: &[usize], labels: &[usize], fold: usize, label: usize) -> usize {
        fold_ids
            .iter()
            .zip(labels)
            .filter(|(&f, &l)| f == fold && l == label)
            .count()
    }

    #[test]
    fn test_two_folds_six_four() {
        let labels = [0, 1, 0, 0, 1, 0, 1, 0, 0, 1];
        let ids = stratified_fold_ids(&labels, 2).unwrap();

        for fold in 0..2 {
            assert_eq!(count(&ids, &labels, fold, 0), 3);
            assert_eq!(count(&ids, &labels, fold, 1), 2);
        }
    }

    #[test]
    fn test_folds_follow_row_order_within_class() {
        // Six rows of one class over three folds: two each, in order
        let labels = [7; 6];
        let ids = stratified_fold_ids(&labels, 3).unwrap();
        assert_eq!(ids, vec![0, 0, 1, 1, 2, 2]);
    }

    #[test]
    fn test_uneven_class_sizes() {
        // 7 of class 0, 3 of class 1, 5 folds
        let labels = [0, 0, 0, 0, 0, 0, 0, 1, 1, 1];
        let ids = stratified_fold_ids(&labels, 5).unwrap();

        for fold in 0..5 {
            let zeros = count(&ids, &labels, fold, 0);
            let ones = count(&ids, &labels, fold, 1);
            assert!((1..=2).contains(&zeros));
            assert!(ones <= 1);
            assert_eq!(zeros + ones, 2);
        }
    }

    #[test]
    fn test_too_many_folds() {
        assert!(matches!(stratified_fold_ids(&[0, 1, 0], 4), Err(ShotError::Fold(_))));
    }

    #[test]
    fn test_every_class_smaller_than_folds() {
        let labels = [0, 0, 1, 1, 2, 2];
        assert!(matches!(stratified_fold_ids(&labels, 3), Err(ShotError::Fold(_))));
    }

    #[test]
    fn test_single_fold_rejected() {
        assert!(stratified_fold_ids(&[0, 1], 1).is_err());
    }

    #[test]
    fn test_assign_folds_is_reproducible_with_seed() {
        let table = table_with_labels(&[0, 1, 2, 0, 1, 2, 0, 1, 2, 0, 1, 2, 0, 0, 0]);
        let config = FoldConfig {
            num_folds: 3,
            seed: Some(7),
        };

        let first = assign_folds(&table, &config).unwrap();
        let second = assign_folds(&table, &config).unwrap();
        assert_eq!(first, second);
        assert!(first.iter().all(|r| r.fold.is_some_and(|f| f < 3)));
    }

    #[test]
    fn test_assign_folds_keeps_every_row() {
        let labels: Vec<usize> = (0..50).map(|i| i % 4).collect();
        let table = table_with_labels(&labels);
        let config = FoldConfig {
            num_folds: 5,
            seed: None,
        };

        let assigned = assign_folds(&table, &config).unwrap();
        let mut before: Vec<_> = table.iter().map(|r| r.image_path.clone()).collect();
        let mut after: Vec<_> = assigned.iter().map(|r| r.image_path.clone()).collect();
        before.sort();
        after.sort();
        assert_eq!(before, after);
        assert_eq!(assigned.label_counts(), table.label_counts());
    }
}
