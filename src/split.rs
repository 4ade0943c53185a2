//! Seeded stratified train/test partitioning.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256PlusPlus;

/// Row indices of the two partitions, each sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Splits sample indices into train and test partitions, class by class.
///
/// The test partition receives `ceil(test_fraction * n)` samples in total,
/// apportioned across classes by largest remainder, so every class contributes
/// either the floor or the ceiling of `test_fraction * class_count`. Which
/// samples of a class go to the test side is decided by a shuffle seeded with
/// `seed`, making the split reproducible for identical input order.
pub fn stratified_split(labels: &[usize], test_fraction: f64, seed: u64) -> SplitIndices {
    let test_fraction = test_fraction.clamp(0.0, 1.0);
    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(i);
    }

    let quotas = apportion(
        &by_class.values().map(Vec::len).collect::<Vec<_>>(),
        test_fraction,
    );

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();
    for (mut indices, quota) in by_class.into_values().zip(quotas) {
        indices.shuffle(&mut rng);
        test.extend_from_slice(&indices[..quota]);
        train.extend_from_slice(&indices[quota..]);
    }
    train.sort_unstable();
    test.sort_unstable();

    tracing::info!(
        "Stratified split: {} train, {} test (seed {})",
        train.len(),
        test.len(),
        seed
    );
    SplitIndices { train, test }
}

/// Largest-remainder apportionment of `ceil(fraction * total)` test slots.
fn apportion(counts: &[usize], fraction: f64) -> Vec<usize> {
    let total: usize = counts.iter().sum();
    let target = (fraction * total as f64).ceil() as usize;
    let ideal: Vec<f64> = counts.iter().map(|&c| fraction * c as f64).collect();
    let mut quotas: Vec<usize> = ideal.iter().map(|v| v.floor() as usize).collect();

    let assigned: usize = quotas.iter().sum();
    let mut remainders: Vec<(usize, f64)> = ideal
        .iter()
        .enumerate()
        .map(|(i, v)| (i, v - v.floor()))
        .filter(|(_, r)| *r > 0.0)
        .collect();
    // Larger remainder first; lower class first on ties.
    remainders.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    for &(i, _) in remainders.iter().take(target.saturating_sub(assigned)) {
        quotas[i] += 1;
    }
    for (quota, &count) in quotas.iter_mut().zip(counts) {
        *quota = (*quota).min(count);
    }
    quotas
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels_from_counts(counts: &[usize]) -> Vec<usize> {
        counts
            .iter()
            .enumerate()
            .flat_map(|(label, &c)| std::iter::repeat_n(label, c))
            .collect()
    }

    fn per_class(labels: &[usize], indices: &[usize], n_classes: usize) -> Vec<usize> {
        let mut counts = vec![0; n_classes];
        for &i in indices {
            counts[labels[i]] += 1;
        }
        counts
    }

    #[test]
    fn test_partitions_cover_every_index_once() {
        let labels = labels_from_counts(&[30, 12, 7]);
        let split = stratified_split(&labels, 0.2, 42);
        let mut all: Vec<usize> = split.train.iter().chain(&split.test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..labels.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_class_ratios_are_preserved() {
        let cases: [&[usize]; 5] = [
            &[30, 30],
            &[24, 24],
            &[30, 12, 7, 3],
            &[1, 2, 3, 4, 5, 6, 7],
            &[29, 31, 17, 11, 2, 1],
        ];
        for counts in cases {
            let labels = labels_from_counts(counts);
            let split = stratified_split(&labels, 0.2, 42);
            let test_counts = per_class(&labels, &split.test, counts.len());
            for (c, (&total, &in_test)) in counts.iter().zip(&test_counts).enumerate() {
                let ideal = 0.2 * total as f64;
                assert!(
                    (in_test as f64 - ideal).abs() < 1.0,
                    "class {c}: {in_test} test samples for {total} total"
                );
            }
        }
    }

    #[test]
    fn test_same_seed_same_split() {
        let labels = labels_from_counts(&[20, 15, 9]);
        assert_eq!(
            stratified_split(&labels, 0.2, 42),
            stratified_split(&labels, 0.2, 42)
        );
        assert_ne!(
            stratified_split(&labels, 0.2, 42).test,
            stratified_split(&labels, 0.2, 7).test
        );
    }

    #[test]
    fn test_interleaved_labels() {
        let labels: Vec<usize> = (0..50).map(|i| i % 2).collect();
        let split = stratified_split(&labels, 0.2, 1);
        assert_eq!(per_class(&labels, &split.test, 2), vec![5, 5]);
        assert_eq!(split.train.len(), 40);
    }

    #[test]
    fn test_apportion_total_matches_ceiled_target() {
        let quotas = apportion(&[24, 24], 0.2);
        assert_eq!(quotas.iter().sum::<usize>(), 10);
        assert!(quotas.iter().all(|&q| q == 4 || q == 5));
    }

    #[test]
    fn test_held_out_size_rounds_up() {
        assert_eq!(apportion(&[6, 6], 0.2).iter().sum::<usize>(), 3);
        let labels = labels_from_counts(&[6, 6]);
        let split = stratified_split(&labels, 0.2, 42);
        assert_eq!((split.train.len(), split.test.len()), (9, 3));
        assert_eq!(apportion(&[7, 3, 1], 0.2).iter().sum::<usize>(), 3);
    }
}
