//! Label-driven capture session.
//!
//! The session walks the label set in order. Each successful capture turns the
//! current hand pose into a sample for the current label; once the per-label
//! target is reached the session moves on to the next label. The operator can
//! skip a label at any time or end the whole session early.

use handsign_helpers::{HandPose, Sample, normalize};
use thiserror::Error;

use crate::dataset::{Dataset, DatasetError, LabelSet};

/// Samples collected per label unless configured otherwise.
pub const DEFAULT_SAMPLES_PER_LABEL: usize = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("samples per label must be at least 1")]
    ZeroTarget,
}

/// The three operator commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    Capture,
    Advance,
    Finish,
}

/// What a single event did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// A sample was stored; `count` is the running total for the label.
    Captured { label_index: usize, count: usize },
    /// A sample was stored and it completed the label; the session moved on.
    LabelCompleted { label_index: usize },
    /// Capture requested but no hand was detected this cycle. Nothing changed.
    NoPose,
    /// The operator skipped a label after collecting `collected` samples for it.
    Advanced { skipped_label: usize, collected: usize },
    /// The operator ended the session.
    Finished,
    /// The session was already over; the event was ignored.
    Closed,
}

/// Snapshot for the operator status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureProgress {
    pub label: Option<String>,
    pub label_index: usize,
    pub label_count: usize,
    pub samples: usize,
    pub target: usize,
}

impl CaptureProgress {
    /// Fraction of the current label's target already collected.
    pub fn fraction(&self) -> f32 {
        self.samples as f32 / self.target.max(1) as f32
    }
}

/// Mutable state of one collection session.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    samples_per_label: usize,
    label_index: usize,
    samples_for_label: usize,
    finished: bool,
    dataset: Dataset,
}

impl CaptureSession {
    pub fn new(labels: LabelSet, samples_per_label: usize) -> Result<Self, CaptureError> {
        if samples_per_label == 0 {
            return Err(CaptureError::ZeroTarget);
        }
        Ok(Self {
            samples_per_label,
            label_index: 0,
            samples_for_label: 0,
            finished: false,
            dataset: Dataset::new(labels),
        })
    }

    /// `(current label index, samples collected for it)`.
    pub fn state(&self) -> (usize, usize) {
        (self.label_index, self.samples_for_label)
    }

    pub fn is_finished(&self) -> bool {
        self.finished || self.label_index >= self.labels().len()
    }

    pub fn labels(&self) -> &LabelSet {
        self.dataset.label_names()
    }

    pub fn samples_per_label(&self) -> usize {
        self.samples_per_label
    }

    pub fn current_label(&self) -> Option<&str> {
        if self.is_finished() {
            return None;
        }
        self.labels().get(self.label_index)
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn progress(&self) -> CaptureProgress {
        CaptureProgress {
            label: self.current_label().map(str::to_owned),
            label_index: self.label_index,
            label_count: self.labels().len(),
            samples: self.samples_for_label,
            target: self.samples_per_label,
        }
    }

    /// Dispatches one operator command for the current detection cycle.
    pub fn apply(&mut self, command: OperatorCommand, pose: Option<&HandPose>) -> CaptureOutcome {
        match command {
            OperatorCommand::Capture => self.capture(pose),
            OperatorCommand::Advance => self.advance(),
            OperatorCommand::Finish => self.finish(),
        }
    }

    /// Stores the pose as a sample of the current label.
    ///
    /// `None` means the detector found no hand this cycle: the operator is
    /// warned and the session state is left untouched.
    pub fn capture(&mut self, pose: Option<&HandPose>) -> CaptureOutcome {
        if self.is_finished() {
            return CaptureOutcome::Closed;
        }
        let Some(pose) = pose else {
            tracing::warn!("No hand detected! Position your hand clearly.");
            return CaptureOutcome::NoPose;
        };

        let label_index = self.label_index;
        self.dataset
            .push_unchecked(Sample::new(normalize(pose), label_index));
        self.samples_for_label += 1;
        let count = self.samples_for_label;
        tracing::info!(
            "Captured {} sample {}/{}",
            self.labels().name_or_unknown(label_index),
            count,
            self.samples_per_label
        );

        if count >= self.samples_per_label {
            self.samples_for_label = 0;
            self.label_index += 1;
            self.announce_next("Next letter");
            return CaptureOutcome::LabelCompleted { label_index };
        }
        CaptureOutcome::Captured { label_index, count }
    }

    /// Skips to the next label regardless of how many samples were collected.
    pub fn advance(&mut self) -> CaptureOutcome {
        if self.is_finished() {
            return CaptureOutcome::Closed;
        }
        let skipped_label = self.label_index;
        let collected = self.samples_for_label;
        if collected < self.samples_per_label {
            tracing::warn!(
                "Skipping {} with {}/{} samples; this class will be under-represented",
                self.labels().name_or_unknown(skipped_label),
                collected,
                self.samples_per_label
            );
        }
        self.samples_for_label = 0;
        self.label_index += 1;
        self.announce_next("Skipped to");
        CaptureOutcome::Advanced {
            skipped_label,
            collected,
        }
    }

    /// Ends the session, keeping every sample captured so far.
    pub fn finish(&mut self) -> CaptureOutcome {
        if self.is_finished() {
            return CaptureOutcome::Closed;
        }
        self.finished = true;
        tracing::info!("Collection finished with {} samples", self.dataset.len());
        CaptureOutcome::Finished
    }

    /// Hands over the collected samples.
    ///
    /// # Errors
    ///
    /// `DatasetError::EmptySession` if nothing was captured.
    pub fn into_dataset(self) -> Result<Dataset, DatasetError> {
        if self.dataset.is_empty() {
            return Err(DatasetError::EmptySession);
        }
        Ok(self.dataset)
    }

    fn announce_next(&self, prefix: &str) {
        if let Some(label) = self.labels().get(self.label_index) {
            tracing::info!("-> {}: {}", prefix, label);
        }
    }
}
