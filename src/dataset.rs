//! In-memory dataset of captured samples and its JSON persistence.
//!
//! The persisted shape is the flat record consumed by the training tools:
//! `labels` (one class index per sample), `features` (one 63-float vector per
//! sample, same order) and `label_names` (the label set the indices refer to).

use std::fs;
use std::path::{Path, PathBuf};

use handsign_helpers::{FEATURE_LEN, Sample};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The 24 static letters of the ASL fingerspelling alphabet (J and Z need motion).
pub const STATIC_ASL_LETTERS: &str = "ABCDEFGHIKLMNOPQRSTUVWXY";

/// Errors raised by the dataset store.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Load was requested but nothing has been persisted at the location.
    #[error("No dataset found at {path}; run a collection session first")]
    NotFound { path: PathBuf },
    /// The capture session ended without a single sample.
    #[error("No samples were collected; nothing to save")]
    EmptySession,
    /// A label set was empty or repeated a symbol.
    #[error("Invalid label set: {0}")]
    InvalidLabels(String),
    /// A sample referenced a label outside the label set.
    #[error("Label index {index} is out of range for {len} labels")]
    UnknownLabel { index: usize, len: usize },
    /// A feature vector did not have the expected width.
    #[error("Feature vector has {found} values, expected {expected}")]
    FeatureWidth { found: usize, expected: usize },
    /// The file parsed but violates the dataset invariants.
    #[error("Malformed dataset at {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to (de)serialize dataset {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Ordered, duplicate-free alphabet of class symbols.
///
/// The position of a symbol is the label index used everywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelSet(Vec<String>);

impl LabelSet {
    pub fn new<I, S>(names: I) -> Result<Self, DatasetError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(DatasetError::InvalidLabels("label set is empty".into()));
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(DatasetError::InvalidLabels(format!(
                    "label {name:?} appears more than once"
                )));
            }
        }
        Ok(Self(names))
    }

    /// The default alphabet: one label per static ASL letter.
    pub fn static_asl() -> Self {
        Self(STATIC_ASL_LETTERS.chars().map(String::from).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    /// Label name for an index, or `"?"` for indices the set does not cover.
    pub fn name_or_unknown(&self, index: usize) -> &str {
        self.get(index).unwrap_or("?")
    }
}

impl Default for LabelSet {
    fn default() -> Self {
        Self::static_asl()
    }
}

impl TryFrom<Vec<String>> for LabelSet {
    type Error = DatasetError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LabelSet> for Vec<String> {
    fn from(labels: LabelSet) -> Self {
        labels.0
    }
}

/// On-disk record, field for field.
#[derive(Debug, Serialize, Deserialize)]
struct DatasetFile {
    labels: Vec<usize>,
    features: Vec<Vec<f32>>,
    label_names: Vec<String>,
}

/// Labelled samples plus the label set that indexes them.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    label_names: LabelSet,
    samples: Vec<Sample>,
}

impl Dataset {
    pub fn new(label_names: LabelSet) -> Self {
        Self {
            label_names,
            samples: Vec::new(),
        }
    }

    /// Appends one sample, checking it against the label set and feature width.
    pub fn append(&mut self, sample: Sample) -> Result<(), DatasetError> {
        check_sample(&self.label_names, sample.label, sample.features.len())?;
        self.samples.push(sample);
        Ok(())
    }

    /// Appends without validation; the caller built `sample` from this label set.
    pub(crate) fn push_unchecked(&mut self, sample: Sample) {
        debug_assert!(check_sample(&self.label_names, sample.label, sample.features.len()).is_ok());
        self.samples.push(sample);
    }

    pub fn label_names(&self) -> &LabelSet {
        &self.label_names
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples per label index, covering the whole label set.
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.label_names.len()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }

    /// Stacks the samples into an `N x 63` feature matrix and an `N` label vector.
    pub fn materialize(&self) -> (Array2<f32>, Array1<usize>) {
        let x = Array2::from_shape_fn((self.samples.len(), FEATURE_LEN), |(i, j)| {
            self.samples[i].features[j]
        });
        let y = self.samples.iter().map(|s| s.label).collect();
        (x, y)
    }

    /// Writes the dataset as JSON to `path`, replacing any previous file.
    ///
    /// An empty dataset is refused so a failed session never clobbers a good file.
    pub fn persist(&self, path: &Path) -> Result<(), DatasetError> {
        if self.is_empty() {
            return Err(DatasetError::EmptySession);
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| DatasetError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let record = DatasetFile {
            labels: self.samples.iter().map(|s| s.label).collect(),
            features: self.samples.iter().map(|s| s.features.to_vec()).collect(),
            label_names: self.label_names.names().to_vec(),
        };
        let json = serde_json::to_vec(&record).map_err(|source| DatasetError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!("Saved {} samples to {}", self.len(), path.display());
        Ok(())
    }

    /// Reads a dataset previously written by [`Dataset::persist`].
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        if !path.is_file() {
            return Err(DatasetError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let bytes = fs::read(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let record: DatasetFile =
            serde_json::from_slice(&bytes).map_err(|source| DatasetError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        let malformed = |reason: String| DatasetError::Malformed {
            path: path.to_path_buf(),
            reason,
        };

        if record.labels.len() != record.features.len() {
            return Err(malformed(format!(
                "{} labels but {} feature vectors",
                record.labels.len(),
                record.features.len()
            )));
        }
        let label_names =
            LabelSet::new(record.label_names).map_err(|err| malformed(err.to_string()))?;
        let mut dataset = Dataset::new(label_names);
        for (label, features) in record.labels.into_iter().zip(record.features) {
            dataset
                .append(Sample::new(Array1::from(features), label))
                .map_err(|err| malformed(err.to_string()))?;
        }
        tracing::info!(
            "Loaded {} samples over {} labels from {}",
            dataset.len(),
            dataset.label_names.len(),
            path.display()
        );
        Ok(dataset)
    }
}

fn check_sample(labels: &LabelSet, label: usize, width: usize) -> Result<(), DatasetError> {
    if label >= labels.len() {
        return Err(DatasetError::UnknownLabel {
            index: label,
            len: labels.len(),
        });
    }
    if width != FEATURE_LEN {
        return Err(DatasetError::FeatureWidth {
            found: width,
            expected: FEATURE_LEN,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(label: usize, seed: f32) -> Sample {
        Sample::new(
            Array1::from_shape_fn(FEATURE_LEN, |j| if j < 3 { 0.0 } else { seed + j as f32 * 0.001 }),
            label,
        )
    }

    #[test]
    fn test_label_set_rejects_duplicates_and_empty() {
        assert!(matches!(
            LabelSet::new(["A", "B", "A"]),
            Err(DatasetError::InvalidLabels(_))
        ));
        assert!(matches!(
            LabelSet::new(Vec::<String>::new()),
            Err(DatasetError::InvalidLabels(_))
        ));
        assert_eq!(LabelSet::static_asl().len(), 24);
        assert_eq!(LabelSet::static_asl().get(9), Some("K"));
    }

    #[test]
    fn test_append_validates_samples() {
        let mut dataset = Dataset::new(LabelSet::new(["A", "B"]).unwrap());
        assert!(dataset.append(sample(1, 0.5)).is_ok());
        assert!(matches!(
            dataset.append(sample(2, 0.5)),
            Err(DatasetError::UnknownLabel { index: 2, len: 2 })
        ));
        assert!(matches!(
            dataset.append(Sample::new(Array1::zeros(10), 0)),
            Err(DatasetError::FeatureWidth { found: 10, .. })
        ));
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.class_counts(), vec![0, 1]);
    }

    #[test]
    fn test_persist_then_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("landmarks.json");
        let mut dataset = Dataset::new(LabelSet::new(["A", "B", "C"]).unwrap());
        dataset.append(sample(2, 0.1)).unwrap();
        dataset.append(sample(0, -0.3)).unwrap();
        dataset.append(sample(2, 1.0 / 3.0)).unwrap();

        dataset.persist(&path).unwrap();
        let loaded = Dataset::load(&path).unwrap();
        assert_eq!(loaded, dataset);
    }

    #[test]
    fn test_persisted_shape_matches_record_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("landmarks.json");
        let mut dataset = Dataset::new(LabelSet::new(["A", "B"]).unwrap());
        dataset.append(sample(1, 0.25)).unwrap();
        dataset.persist(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["labels"], serde_json::json!([1]));
        assert_eq!(value["label_names"], serde_json::json!(["A", "B"]));
        assert_eq!(value["features"][0].as_array().unwrap().len(), FEATURE_LEN);
    }

    #[test]
    fn test_persist_overwrites_previous_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("landmarks.json");
        let labels = LabelSet::new(["A", "B"]).unwrap();
        let mut first = Dataset::new(labels.clone());
        first.append(sample(0, 0.1)).unwrap();
        first.append(sample(1, 0.2)).unwrap();
        first.persist(&path).unwrap();

        let mut second = Dataset::new(labels);
        second.append(sample(1, 0.9)).unwrap();
        second.persist(&path).unwrap();
        assert_eq!(Dataset::load(&path).unwrap(), second);
    }

    #[test]
    fn test_persist_refuses_empty_dataset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("landmarks.json");
        let dataset = Dataset::new(LabelSet::static_asl());
        assert!(matches!(
            dataset.persist(&path),
            Err(DatasetError::EmptySession)
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert!(matches!(
            Dataset::load(&path),
            Err(DatasetError::NotFound { .. })
        ));
    }

    #[test]
    fn test_load_rejects_out_of_range_label() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("landmarks.json");
        let record = serde_json::json!({
            "labels": [5],
            "features": [vec![0.0f32; FEATURE_LEN]],
            "label_names": ["A", "B"],
        });
        fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();
        assert!(matches!(
            Dataset::load(&path),
            Err(DatasetError::Malformed { .. })
        ));
    }

    #[test]
    fn test_materialize_shapes() {
        let mut dataset = Dataset::new(LabelSet::new(["A", "B"]).unwrap());
        dataset.append(sample(0, 0.1)).unwrap();
        dataset.append(sample(1, 0.2)).unwrap();
        let (x, y) = dataset.materialize();
        assert_eq!(x.dim(), (2, FEATURE_LEN));
        assert_eq!(y.to_vec(), vec![0, 1]);
        assert_eq!(x[[1, 5]], dataset.samples()[1].features[5]);
    }
}
