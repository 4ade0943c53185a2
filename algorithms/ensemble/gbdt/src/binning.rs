use handsign_helpers::Float;
use ndarray::{Array2, ArrayView2};
use std::cmp::Ordering;

/// Per-feature split candidates for histogram-based split finding.
///
/// Every cut is an observed training value. A sample lands in bin `b` when
/// `cuts[b - 1] < value <= cuts[b]`; values above the last cut fall into the
/// overflow bin `cuts.len()`. Choosing split bin `b` therefore sends exactly
/// the samples with `value <= cuts[b]` to the left child, which is the rule
/// the fitted trees use at prediction time.
#[derive(Debug, Clone)]
pub(crate) struct FeatureBins<F: Float> {
    cuts: Vec<Vec<F>>,
}

impl<F: Float> FeatureBins<F> {
    /// `max_bins` is clamped to `2..=256` so bin ids fit in a `u8`.
    pub fn build(x: ArrayView2<F>, max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, 256);
        let cuts = x
            .columns()
            .into_iter()
            .map(|column| {
                let mut values: Vec<F> = column.iter().copied().collect();
                values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
                cuts_for_sorted(&values, max_bins)
            })
            .collect();
        Self { cuts }
    }

    pub fn n_features(&self) -> usize {
        self.cuts.len()
    }

    pub fn cuts(&self, feature: usize) -> &[F] {
        &self.cuts[feature]
    }

    pub fn bin_of(&self, feature: usize, value: F) -> u8 {
        self.cuts[feature].partition_point(|&c| c < value) as u8
    }

    /// Maps every sample to its bin id, feature by feature.
    pub fn bin_matrix(&self, x: ArrayView2<F>) -> Array2<u8> {
        let mut binned = Array2::zeros(x.raw_dim());
        for ((row, feature), value) in x.indexed_iter() {
            binned[[row, feature]] = self.bin_of(feature, *value);
        }
        binned
    }
}

fn cuts_for_sorted<F: Float>(sorted: &[F], max_bins: usize) -> Vec<F> {
    let Some(&max) = sorted.last() else {
        return Vec::new();
    };
    let mut distinct: Vec<F> = sorted.to_vec();
    distinct.dedup();
    // The maximum is never a useful cut: nothing would go right of it.
    distinct.pop();
    if distinct.len() < max_bins {
        return distinct;
    }

    let n = sorted.len();
    let mut cuts: Vec<F> = (1..max_bins)
        .map(|k| sorted[(k * n) / max_bins])
        .filter(|&v| v < max)
        .collect();
    cuts.dedup();
    cuts
}
