//! Static hand-sign letter recognition: landmark capture, dataset storage,
//! gradient-boosted training and ONNX export.

pub mod capture;
pub mod config;
pub mod dataset;
pub mod error;
pub mod export;
pub mod metrics;
pub mod split;
pub mod training;

pub use capture::{CaptureError, CaptureOutcome, CaptureProgress, CaptureSession, OperatorCommand};
pub use config::{CollectorConfig, ConfigError};
pub use dataset::{Dataset, DatasetError, LabelSet, STATIC_ASL_LETTERS};
pub use error::PipelineError;
pub use export::{
    Exportable, ExportError, GraphError, InferenceGraph, OnnxRuntime, PostTransform, RuntimeError,
    TreeEnsemble, export,
};
pub use metrics::{ClassMetrics, ClassificationReport, ConfusionMatrix};
pub use split::{SplitIndices, stratified_split};
pub use training::{
    Classifier, GbdtModel, GbdtTrainer, RunSummary, Trainable, TrainingError, TrainingOptions,
    TrainingOutcome, run, train, train_with,
};

// Re-export the shared helpers so downstream crates need only one dependency.
pub use handsign_helpers::{
    FEATURE_LEN, HandPose, LANDMARK_COUNT, Landmark, PoseError, Sample, WRIST, normalize,
};
