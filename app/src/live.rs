use crate::detector::{FrameSource, PoseDetector};
use anyhow::{Context, Result};
use handsign::{InferenceGraph, OnnxRuntime, normalize};
use ndarray::Axis;

/// A letter predicted for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub frame: usize,
    pub letter: String,
    pub confidence: f32,
}

/// Classifies the hand in every frame by running the exported model.
///
/// `graph` is the same file read for its metadata; `labels` names the label
/// indices when the file carries no names of its own.
pub fn classify_frames<C>(
    runtime: &mut OnnxRuntime,
    graph: &InferenceGraph,
    labels: &[String],
    camera: &mut C,
    frame_interval_ms: u64,
) -> Result<Vec<Option<Prediction>>>
where
    C: FrameSource + PoseDetector + ?Sized,
{
    let mut predictions = Vec::new();
    let mut timestamp_ms = 0u64;
    while let Some(frame) = camera.next_frame()? {
        timestamp_ms += frame_interval_ms;
        let Some(pose) = camera.detect(&frame, timestamp_ms) else {
            predictions.push(None);
            continue;
        };
        let row = normalize(&pose).insert_axis(Axis(0));
        let (label, probabilities) = runtime.predict(row.view())?;
        let label = label
            .first()
            .copied()
            .with_context(|| format!("No label for frame {}", frame.index))?;
        let column = graph.class_labels().iter().position(|&l| l == label);
        let letter = column
            .and_then(|c| graph.class_name(c, labels))
            .unwrap_or("?")
            .to_string();
        predictions.push(Some(Prediction {
            frame: frame.index,
            letter,
            confidence: column
                .and_then(|c| probabilities.get([0, c]).copied())
                .unwrap_or(0.0),
        }));
    }
    Ok(predictions)
}
