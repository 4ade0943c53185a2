//! Runs exported models through ONNX Runtime.

use std::fmt::Display;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, ArrayView2, Ix2};
use ort::session::Session;
use ort::value::Tensor;
use thiserror::Error;

use super::{INPUT_NAME, LABEL_OUTPUT, PROBABILITIES_OUTPUT};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Failed to load ONNX model {path}: {reason}")]
    Load { path: PathBuf, reason: String },
    #[error("ONNX inference failed: {0}")]
    Inference(String),
    #[error("Output {output} has shape {shape:?}, expected {expected}")]
    OutputShape {
        output: &'static str,
        shape: Vec<usize>,
        expected: String,
    },
}

fn inference(err: impl Display) -> RuntimeError {
    RuntimeError::Inference(err.to_string())
}

/// An ONNX Runtime session over an exported classifier.
pub struct OnnxRuntime {
    session: Session,
}

impl OnnxRuntime {
    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        let load = |err: &dyn Display| RuntimeError::Load {
            path: path.to_path_buf(),
            reason: err.to_string(),
        };
        let session = Session::builder()
            .map_err(|e| load(&e))?
            .commit_from_file(path)
            .map_err(|e| load(&e))?;
        tracing::debug!("Loaded {} into ONNX Runtime", path.display());
        Ok(Self { session })
    }

    /// Runs a batch through the graph, returning its `label` and
    /// `probabilities` outputs.
    pub fn predict(
        &mut self,
        x: ArrayView2<f32>,
    ) -> Result<(Array1<i64>, Array2<f32>), RuntimeError> {
        let n_rows = x.nrows();
        let input = Tensor::from_array(x.to_owned()).map_err(inference)?;
        let outputs = self
            .session
            .run(ort::inputs![INPUT_NAME => input])
            .map_err(inference)?;

        let labels = outputs[LABEL_OUTPUT]
            .try_extract_array::<i64>()
            .map_err(inference)?;
        if labels.len() != n_rows {
            return Err(RuntimeError::OutputShape {
                output: LABEL_OUTPUT,
                shape: labels.shape().to_vec(),
                expected: format!("[{n_rows}]"),
            });
        }
        let labels: Array1<i64> = labels.iter().copied().collect();

        let probabilities = outputs[PROBABILITIES_OUTPUT]
            .try_extract_array::<f32>()
            .map_err(inference)?;
        let shape = probabilities.shape().to_vec();
        let probabilities = probabilities
            .into_dimensionality::<Ix2>()
            .ok()
            .filter(|p| p.nrows() == n_rows)
            .ok_or_else(|| RuntimeError::OutputShape {
                output: PROBABILITIES_OUTPUT,
                shape,
                expected: format!("[{n_rows}, classes]"),
            })?
            .to_owned();

        Ok((labels, probabilities))
    }
}
