//! Training pipeline: split, fit, evaluate and hand over to the exporter.

use std::path::Path;

use gbdt::{GbdtClassifier, GbdtError, GbdtParams, Node};
use ndarray::{ArrayView1, ArrayView2, Axis};
use thiserror::Error;

use crate::dataset::Dataset;
use crate::error::PipelineError;
use crate::export::{
    self, EnsembleNode, EnsembleTree, Exportable, OnnxRuntime, PostTransform, TreeEnsemble,
};
use crate::metrics::ClassificationReport;
use crate::split::stratified_split;

pub const MAX_DEPTH: usize = 6;
pub const N_ROUNDS: usize = 200;
pub const LEARNING_RATE: f32 = 0.3;
pub const MAX_BINS: usize = 256;
/// Share of every class held out for evaluation.
pub const TEST_FRACTION: f64 = 0.2;
pub const SPLIT_SEED: u64 = 42;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error(
        "Need at least 2 classes to train, found {found}. Collect samples for more letters first."
    )]
    InsufficientClasses { found: usize },
    #[error("Classifier error: {0}")]
    Model(#[from] GbdtError),
}

/// A fitted model that predicts label indices.
pub trait Classifier: Send + Sync {
    /// Label index predicted for one feature vector.
    fn predict_row(&self, features: ArrayView1<f32>) -> Result<usize, TrainingError>;

    /// Width of the feature vectors the model was fitted on.
    fn n_features(&self) -> usize;

    /// Label indices the model can predict, ascending.
    fn classes(&self) -> &[usize];

    fn name(&self) -> String;
}

/// Something that can fit a [`Classifier`] on a feature matrix.
pub trait Trainable {
    type Model: Classifier + Exportable;

    fn fit(&self, x: ArrayView2<f32>, y: &[usize]) -> Result<Self::Model, TrainingError>;
}

/// Pipeline settings. The defaults are the fixed production configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingOptions {
    pub n_rounds: usize,
    pub max_depth: usize,
    pub learning_rate: f32,
    pub max_bins: usize,
    pub test_fraction: f64,
    pub split_seed: u64,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            n_rounds: N_ROUNDS,
            max_depth: MAX_DEPTH,
            learning_rate: LEARNING_RATE,
            max_bins: MAX_BINS,
            test_fraction: TEST_FRACTION,
            split_seed: SPLIT_SEED,
        }
    }
}

impl TrainingOptions {
    pub fn gbdt_params(&self) -> GbdtParams<f32> {
        GbdtParams {
            n_rounds: self.n_rounds,
            max_depth: self.max_depth,
            learning_rate: self.learning_rate,
            max_bins: self.max_bins,
            ..GbdtParams::default()
        }
    }
}

/// Fits [`GbdtModel`]s.
#[derive(Debug, Clone, Copy)]
pub struct GbdtTrainer {
    params: GbdtParams<f32>,
}

impl GbdtTrainer {
    pub fn new(params: GbdtParams<f32>) -> Self {
        Self { params }
    }
}

impl From<&TrainingOptions> for GbdtTrainer {
    fn from(options: &TrainingOptions) -> Self {
        Self::new(options.gbdt_params())
    }
}

impl Trainable for GbdtTrainer {
    type Model = GbdtModel;

    fn fit(&self, x: ArrayView2<f32>, y: &[usize]) -> Result<GbdtModel, TrainingError> {
        let classifier = GbdtClassifier::fit(x, y, &self.params)?;
        tracing::debug!(
            "Fitted {} rounds x {} classes on {} samples",
            classifier.trees().len(),
            classifier.classes().len(),
            x.nrows()
        );
        Ok(GbdtModel(classifier))
    }
}

/// Gradient-boosted tree classifier over label indices.
#[derive(Debug, Clone)]
pub struct GbdtModel(GbdtClassifier<usize, f32>);

impl GbdtModel {
    pub fn inner(&self) -> &GbdtClassifier<usize, f32> {
        &self.0
    }
}

impl Classifier for GbdtModel {
    fn predict_row(&self, features: ArrayView1<f32>) -> Result<usize, TrainingError> {
        Ok(self.0.predict(features)?)
    }

    fn n_features(&self) -> usize {
        self.0.n_features()
    }

    fn classes(&self) -> &[usize] {
        self.0.classes()
    }

    fn name(&self) -> String {
        format!("GBDT ({} rounds)", self.0.trees().len())
    }
}

impl Exportable for GbdtModel {
    fn to_tree_ensemble(&self) -> TreeEnsemble {
        let trees = self
            .0
            .trees()
            .iter()
            .flat_map(|round| round.iter().enumerate())
            .map(|(class_id, tree)| EnsembleTree {
                class_id,
                nodes: tree
                    .nodes()
                    .iter()
                    .map(|node| match *node {
                        Node::Split {
                            feature,
                            threshold,
                            left,
                            right,
                        } => EnsembleNode::Branch {
                            feature,
                            threshold,
                            true_child: left,
                            false_child: right,
                        },
                        Node::Leaf { value } => EnsembleNode::Leaf { weight: value },
                    })
                    .collect(),
            })
            .collect();
        TreeEnsemble {
            n_features: self.0.n_features(),
            class_labels: self.0.classes().iter().map(|&c| c as i64).collect(),
            base_values: self.0.base_scores().to_vec(),
            trees,
            post_transform: PostTransform::Softmax,
        }
    }
}

/// A fitted model with its held-out evaluation.
#[derive(Debug, Clone)]
pub struct TrainingOutcome<M> {
    pub model: M,
    pub report: ClassificationReport,
    pub n_features: usize,
}

/// Result of a full train-and-export run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub report: ClassificationReport,
    pub n_features: usize,
    pub model_bytes: usize,
    /// Share of dataset samples on which ONNX Runtime, running the written
    /// file, and the fitted model predict the same label.
    pub export_agreement: f32,
}

/// Trains the default gradient-boosted classifier.
pub fn train(
    dataset: &Dataset,
    options: &TrainingOptions,
) -> Result<TrainingOutcome<GbdtModel>, TrainingError> {
    train_with(&GbdtTrainer::from(options), dataset, options)
}

/// Splits `dataset`, fits `trainer` on the training partition and evaluates
/// on the test partition.
///
/// # Errors
///
/// `TrainingError::InsufficientClasses` when fewer than two labels have
/// samples; nothing is split or fitted in that case.
pub fn train_with<T: Trainable>(
    trainer: &T,
    dataset: &Dataset,
    options: &TrainingOptions,
) -> Result<TrainingOutcome<T::Model>, TrainingError> {
    let (x, y) = dataset.materialize();
    let labels = y.to_vec();
    let counts = dataset.class_counts();
    let found = counts.iter().filter(|&&c| c > 0).count();
    if found < 2 {
        return Err(TrainingError::InsufficientClasses { found });
    }
    warn_underpopulated(dataset, &counts);

    let split = stratified_split(&labels, options.test_fraction, options.split_seed);
    let x_train = x.select(Axis(0), &split.train);
    let y_train: Vec<usize> = split.train.iter().map(|&i| labels[i]).collect();
    let x_test = x.select(Axis(0), &split.test);
    let y_test: Vec<usize> = split.test.iter().map(|&i| labels[i]).collect();

    tracing::info!(
        "Training on {} samples, {} features, {} classes",
        x_train.nrows(),
        x.ncols(),
        found
    );
    let model = trainer.fit(x_train.view(), &y_train)?;

    let predicted = x_test
        .axis_iter(Axis(0))
        .map(|row| model.predict_row(row))
        .collect::<Result<Vec<_>, _>>()?;
    let report = ClassificationReport::new(dataset.label_names(), &y_test, &predicted);
    tracing::info!("{} test accuracy: {:.4}", model.name(), report.accuracy);
    tracing::info!("Classification report:\n{}", report);

    Ok(TrainingOutcome {
        model,
        report,
        n_features: x.ncols(),
    })
}

fn warn_underpopulated(dataset: &Dataset, counts: &[usize]) {
    let labels = dataset.label_names();
    let empty: Vec<&str> = counts
        .iter()
        .enumerate()
        .filter(|(_, c)| **c == 0)
        .map(|(i, _)| labels.name_or_unknown(i))
        .collect();
    if !empty.is_empty() {
        tracing::warn!("No samples for {}; these letters cannot be predicted", empty.join(", "));
    }
    let largest = counts.iter().copied().max().unwrap_or(0);
    for (i, &count) in counts.iter().enumerate() {
        if count > 0 && count < largest {
            tracing::warn!(
                "{} has {} samples (largest class has {})",
                labels.name_or_unknown(i),
                count,
                largest
            );
        }
    }
}

/// Trains, exports to `model_path` and checks the written file, run through
/// ONNX Runtime, against the fitted model on every sample of `dataset`.
pub fn run(
    dataset: &Dataset,
    options: &TrainingOptions,
    model_path: &Path,
) -> Result<RunSummary, PipelineError> {
    let outcome = train(dataset, options)?;
    let model_bytes = export::export(
        &outcome.model,
        outcome.n_features,
        dataset.label_names().names(),
        model_path,
    )?;

    let mut runtime = OnnxRuntime::load(model_path)?;
    let (x, _) = dataset.materialize();
    let (exported, _) = runtime.predict(x.view())?;
    let mut agreeing = 0usize;
    for (row, &label) in x.axis_iter(Axis(0)).zip(exported.iter()) {
        if outcome.model.predict_row(row)? as i64 == label {
            agreeing += 1;
        }
    }
    let export_agreement = agreeing as f32 / x.nrows().max(1) as f32;
    if agreeing < x.nrows() {
        tracing::warn!(
            "Exported graph disagrees with the fitted model on {} of {} samples",
            x.nrows() - agreeing,
            x.nrows()
        );
    } else {
        tracing::info!("Exported graph verified on {} samples", x.nrows());
    }

    Ok(RunSummary {
        report: outcome.report,
        n_features: outcome.n_features,
        model_bytes,
        export_agreement,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::LabelSet;
    use handsign_helpers::{FEATURE_LEN, Sample};
    use ndarray::Array1;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;
    use tempfile::tempdir;

    fn quick_options() -> TrainingOptions {
        TrainingOptions {
            n_rounds: 15,
            ..TrainingOptions::default()
        }
    }

    /// `per_class[i]` samples for label `i`, centred on a label-specific offset.
    fn dataset(per_class: &[usize], seed: u64) -> Dataset {
        let names: Vec<String> = (0..per_class.len().max(2))
            .map(|i| ((b'A' + i as u8) as char).to_string())
            .collect();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut dataset = Dataset::new(LabelSet::new(names).unwrap());
        for (label, &n) in per_class.iter().enumerate() {
            for _ in 0..n {
                let features = Array1::from_shape_fn(FEATURE_LEN, |j| {
                    if j < 3 {
                        0.0
                    } else {
                        label as f32 * 0.3 + rng.random_range(-0.1f32..0.1)
                    }
                });
                dataset.append(Sample::new(features, label)).unwrap();
            }
        }
        dataset
    }

    #[test]
    fn test_default_options_are_production_constants() {
        let options = TrainingOptions::default();
        assert_eq!(options.max_depth, 6);
        assert_eq!(options.n_rounds, 200);
        assert_eq!(options.split_seed, 42);
        assert_eq!(options.test_fraction, 0.2);
        let params = options.gbdt_params();
        assert_eq!(params.max_bins, 256);
    }

    #[test]
    fn test_single_class_is_rejected() {
        let result = train(&dataset(&[10, 0], 1), &quick_options());
        assert!(matches!(
            result,
            Err(TrainingError::InsufficientClasses { found: 1 })
        ));
    }

    #[test]
    fn test_report_covers_test_classes_only() {
        let outcome = train(&dataset(&[20, 20, 0], 2), &quick_options()).unwrap();
        assert_eq!(outcome.n_features, FEATURE_LEN);
        assert_eq!(outcome.model.classes(), &[0, 1]);
        let reported: Vec<usize> = outcome.report.per_class.iter().map(|c| c.label_index).collect();
        assert_eq!(reported, vec![0, 1]);
        assert_eq!(outcome.report.support(), 8);
        assert!(outcome.report.accuracy > 0.9);
    }

    #[test]
    fn test_tree_ensemble_mirrors_classifier() {
        let outcome = train(&dataset(&[15, 15, 15], 3), &quick_options()).unwrap();
        let ensemble = outcome.model.to_tree_ensemble();
        assert_eq!(ensemble.class_labels, vec![0, 1, 2]);
        assert_eq!(ensemble.trees.len(), 15 * 3);
        ensemble.validate().unwrap();

        let (x, _) = dataset(&[15, 15, 15], 4).materialize();
        for row in x.rows() {
            let expected = outcome.model.predict_row(row).unwrap() as i64;
            assert_eq!(ensemble.predict(row.as_slice().unwrap()), expected);
        }
    }

    #[test]
    fn test_binary_onnx_layout_mirrors_classifier() {
        let outcome = train(&dataset(&[15, 15], 8), &quick_options()).unwrap();
        let ensemble = outcome.model.to_tree_ensemble();
        assert_eq!(ensemble.trees.len(), 15 * 2);
        let binary = ensemble.onnx_layout();
        assert_eq!(binary.post_transform, PostTransform::Logistic);
        assert!(binary.trees.iter().all(|t| t.class_id == 0));
        binary.validate().unwrap();

        let (x, _) = dataset(&[15, 15], 9).materialize();
        for row in x.rows() {
            let expected = outcome.model.predict_row(row).unwrap() as i64;
            assert_eq!(binary.predict(row.as_slice().unwrap()), expected);
        }
    }

    #[test]
    fn test_run_exports_verified_graph() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("models").join("model.onnx");
        let summary = run(&dataset(&[12, 12], 5), &quick_options(), &path).unwrap();
        assert!(path.is_file());
        assert!(summary.model_bytes > 0);
        assert_eq!(summary.export_agreement, 1.0);
    }

    #[test]
    fn test_run_without_classes_writes_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        let result = run(&dataset(&[6], 6), &quick_options(), &path);
        assert!(matches!(
            result,
            Err(PipelineError::Training(TrainingError::InsufficientClasses { .. }))
        ));
        assert!(!path.exists());
    }
}
