use thiserror::Error;

use crate::capture::CaptureError;
use crate::config::ConfigError;
use crate::dataset::DatasetError;
use crate::export::{ExportError, GraphError, RuntimeError};
use crate::training::TrainingError;

/// Any failure that ends a collect, train or predict run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Training(#[from] TrainingError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
