use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;
// Core components from the shared helpers crate.
use handsign_helpers::{DataPoint, Float};

mod binning;
mod tree;

use binning::FeatureBins;
pub use tree::{Node, Tree};
use tree::{GrowthParams, TreeGrower};

/// Errors that can occur when fitting or using the boosted classifier.
#[derive(Debug, Clone, PartialEq)]
pub enum GbdtError {
    /// Cannot fit on an empty training set
    EmptyDataSet,
    /// Feature rows and labels disagree in length, or a row has the wrong width
    MismatchedDimensions,
    /// Only one distinct label was present in the training data
    SingleClass,
    /// A hyperparameter is out of range
    InvalidParameter(String),
    /// The training matrix contains NaN or infinite values
    NonFiniteFeature,
}

impl Display for GbdtError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GbdtError::EmptyDataSet => write!(f, "Cannot fit on an empty training set"),
            GbdtError::MismatchedDimensions => {
                write!(f, "Feature and label dimensions do not match")
            }
            GbdtError::SingleClass => write!(
                f,
                "At least two distinct classes are required to fit a classifier"
            ),
            GbdtError::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            GbdtError::NonFiniteFeature => {
                write!(f, "Training features contain NaN or infinite values")
            }
        }
    }
}

impl Error for GbdtError {}

/// Hyperparameters of the boosting procedure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GbdtParams<F: Float> {
    /// Number of boosting rounds; each round adds one tree per class.
    pub n_rounds: usize,
    /// Maximum depth of every tree.
    pub max_depth: usize,
    /// Shrinkage applied to every leaf weight.
    pub learning_rate: F,
    /// Upper bound on histogram bins per feature (clamped to 2..=256).
    pub max_bins: usize,
    /// L2 regularisation on leaf weights.
    pub lambda: F,
    /// Minimum hessian sum required in each child of a split.
    pub min_child_weight: F,
}

impl<F: Float> Default for GbdtParams<F> {
    fn default() -> Self {
        Self {
            n_rounds: 200,
            max_depth: 6,
            learning_rate: F::from_f64(0.3).unwrap_or_else(F::one),
            max_bins: 256,
            lambda: F::one(),
            min_child_weight: F::one(),
        }
    }
}

impl<F: Float> GbdtParams<F> {
    fn validate(&self) -> Result<(), GbdtError> {
        if self.n_rounds == 0 {
            return Err(GbdtError::InvalidParameter(
                "n_rounds must be at least 1".into(),
            ));
        }
        if !(self.learning_rate > F::zero()) {
            return Err(GbdtError::InvalidParameter(
                "learning_rate must be positive".into(),
            ));
        }
        if self.lambda < F::zero() || self.min_child_weight < F::zero() {
            return Err(GbdtError::InvalidParameter(
                "lambda and min_child_weight must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// A fitted multi-class gradient-boosted tree classifier.
///
/// Scores are computed as `base_scores[c] + sum of trees[round][c]` and turned
/// into probabilities with a softmax. The predicted label is the class with the
/// highest score.
///
/// # Type Parameters
///
/// * `L`: The type of the label (e.g., a class index, `String`, or a custom `enum`).
/// * `F`: The float type for the features (e.g., `f32`, `f64`).
#[derive(Debug, Clone)]
pub struct GbdtClassifier<L, F>
where
    L: Clone + Eq + Hash + Debug + Ord,
    F: Float,
{
    classes: Vec<L>,
    n_features: usize,
    base_scores: Vec<F>,
    /// Shape: `[n_rounds][n_classes]`.
    trees: Vec<Vec<Tree<F>>>,
}

impl<L, F> GbdtClassifier<L, F>
where
    L: Clone + Eq + Hash + Debug + Ord,
    F: Float,
{
    /// Fits a classifier on a feature matrix and its aligned labels.
    ///
    /// Only labels that actually occur in `y` become classes, sorted ascending.
    ///
    /// # Errors
    ///
    /// Returns `GbdtError::EmptyDataSet` for an empty matrix,
    /// `GbdtError::MismatchedDimensions` if `y` does not have one label per row,
    /// `GbdtError::SingleClass` if fewer than two distinct labels are present,
    /// `GbdtError::NonFiniteFeature` for NaN or infinite features and
    /// `GbdtError::InvalidParameter` for out-of-range hyperparameters.
    pub fn fit(x: ArrayView2<F>, y: &[L], params: &GbdtParams<F>) -> Result<Self, GbdtError> {
        params.validate()?;
        let (n_samples, n_features) = x.dim();
        if n_samples == 0 || n_features == 0 {
            return Err(GbdtError::EmptyDataSet);
        }
        if y.len() != n_samples {
            return Err(GbdtError::MismatchedDimensions);
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(GbdtError::NonFiniteFeature);
        }

        let mut classes: Vec<L> = y.to_vec();
        classes.sort();
        classes.dedup();
        if classes.len() < 2 {
            return Err(GbdtError::SingleClass);
        }
        let n_classes = classes.len();
        let targets: Vec<usize> = y
            .iter()
            .map(|label| classes.binary_search(label).unwrap_or_default())
            .collect();

        let bins = FeatureBins::build(x, params.max_bins);
        let binned = bins.bin_matrix(x);
        let growth = GrowthParams {
            max_depth: params.max_depth,
            lambda: params.lambda,
            min_child_weight: params.min_child_weight,
            learning_rate: params.learning_rate,
        };

        let base_scores = log_priors(&targets, n_classes);
        let mut raw = Array2::from_shape_fn((n_samples, n_classes), |(_, c)| base_scores[c]);
        let mut trees = Vec::with_capacity(params.n_rounds);
        let mut grad = vec![F::zero(); n_samples];
        let mut hess = vec![F::zero(); n_samples];
        let min_hess = F::from_f64(1e-16).unwrap_or_else(F::epsilon);

        for _round in 0..params.n_rounds {
            let probs = softmax_rows(raw.view());
            let mut round_trees = Vec::with_capacity(n_classes);
            for class_idx in 0..n_classes {
                for i in 0..n_samples {
                    let p = probs[[i, class_idx]];
                    let target = if targets[i] == class_idx {
                        F::one()
                    } else {
                        F::zero()
                    };
                    grad[i] = p - target;
                    hess[i] = (p * (F::one() - p)).max(min_hess);
                }
                let tree = TreeGrower::new(&bins, &binned, &grad, &hess, growth)
                    .grow((0..n_samples).collect());
                for (i, row) in x.rows().into_iter().enumerate() {
                    raw[[i, class_idx]] += tree.predict(row);
                }
                round_trees.push(tree);
            }
            trees.push(round_trees);
        }

        Ok(Self {
            classes,
            n_features,
            base_scores,
            trees,
        })
    }

    /// Fits a classifier on labelled data points.
    pub fn fit_points(data: &[DataPoint<L, F>], params: &GbdtParams<F>) -> Result<Self, GbdtError> {
        let Some(first) = data.first() else {
            return Err(GbdtError::EmptyDataSet);
        };
        let n_features = first.features.len();
        if data.iter().any(|dp| dp.features.len() != n_features) {
            return Err(GbdtError::MismatchedDimensions);
        }
        let x = Array2::from_shape_fn((data.len(), n_features), |(i, j)| data[i].features[j]);
        let y: Vec<L> = data.iter().map(|dp| dp.label.clone()).collect();
        Self::fit(x.view(), &y, params)
    }

    /// The classes seen during fitting, sorted ascending.
    pub fn classes(&self) -> &[L] {
        &self.classes
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn base_scores(&self) -> &[F] {
        &self.base_scores
    }

    /// Fitted trees, indexed `[round][class]`.
    pub fn trees(&self) -> &[Vec<Tree<F>>] {
        &self.trees
    }

    /// Raw (pre-softmax) class scores for one sample.
    pub fn predict_raw(&self, features: ArrayView1<F>) -> Result<Array1<F>, GbdtError> {
        if features.len() != self.n_features {
            return Err(GbdtError::MismatchedDimensions);
        }
        let mut raw = Array1::from(self.base_scores.clone());
        for round in &self.trees {
            for (class_idx, tree) in round.iter().enumerate() {
                raw[class_idx] += tree.predict(features);
            }
        }
        Ok(raw)
    }

    /// Class probabilities for one sample, in the order of [`Self::classes`].
    pub fn predict_proba(&self, features: ArrayView1<F>) -> Result<Array1<F>, GbdtError> {
        let raw = self.predict_raw(features)?;
        Ok(softmax(raw.view()))
    }

    /// Position in [`Self::classes`] of the best-scoring class.
    pub fn predict_index(&self, features: ArrayView1<F>) -> Result<usize, GbdtError> {
        let raw = self.predict_raw(features)?;
        Ok(argmax(raw.view()))
    }

    /// Predicts the label for a new, unseen sample.
    ///
    /// # Errors
    ///
    /// Returns `GbdtError::MismatchedDimensions` if `features` does not have the
    /// width the model was fitted on.
    pub fn predict(&self, features: ArrayView1<F>) -> Result<L, GbdtError> {
        let idx = self.predict_index(features)?;
        Ok(self.classes[idx].clone())
    }

    /// Predicts a label for every row of `x`.
    pub fn predict_batch(&self, x: ArrayView2<F>) -> Result<Vec<L>, GbdtError> {
        x.axis_iter(Axis(0)).map(|row| self.predict(row)).collect()
    }
}

fn log_priors<F: Float>(targets: &[usize], n_classes: usize) -> Vec<F> {
    let mut counts = vec![0usize; n_classes];
    for &t in targets {
        counts[t] += 1;
    }
    let total = targets.len().max(1) as f64;
    counts
        .into_iter()
        .map(|c| F::from_f64((c as f64 / total).max(1e-6).ln()).unwrap_or_else(F::zero))
        .collect()
}

/// Numerically stable softmax over a score vector.
pub fn softmax<F: Float>(raw: ArrayView1<F>) -> Array1<F> {
    if raw.is_empty() {
        return Array1::zeros(0);
    }
    let max = raw.iter().copied().fold(F::neg_infinity(), F::max);
    let exps = raw.mapv(|v| (v - max).exp());
    let sum: F = exps.sum();
    exps / sum
}

fn softmax_rows<F: Float>(raw: ArrayView2<F>) -> Array2<F> {
    let mut out = raw.to_owned();
    for mut row in out.rows_mut() {
        let p = softmax(row.view());
        row.assign(&p);
    }
    out
}

/// Index of the largest value; the first one wins on ties.
pub fn argmax<F: Float>(values: ArrayView1<F>) -> usize {
    let mut best_idx = 0;
    let mut best_val = F::neg_infinity();
    for (idx, &v) in values.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best_idx = idx;
        }
    }
    best_idx
}
