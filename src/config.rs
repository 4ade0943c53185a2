//! Collector configuration, read from an optional TOML file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::DEFAULT_SAMPLES_PER_LABEL;
use crate::dataset::{DatasetError, LabelSet};

pub const DEFAULT_DATASET_PATH: &str = "data/landmark_dataset/landmarks.json";
pub const DEFAULT_MODEL_PATH: &str = "models/model.onnx";
/// Roughly 30 frames per second.
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 33;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid labels: {0}")]
    Labels(#[source] DatasetError),
    #[error("samples_per_label must be at least 1")]
    ZeroSamplesPerLabel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub labels: Vec<String>,
    pub samples_per_label: usize,
    pub dataset_path: PathBuf,
    pub model_path: PathBuf,
    pub frame_interval_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            labels: LabelSet::static_asl().into(),
            samples_per_label: DEFAULT_SAMPLES_PER_LABEL,
            dataset_path: PathBuf::from(DEFAULT_DATASET_PATH),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
        }
    }
}

impl CollectorConfig {
    /// Reads and validates a config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Loads `path` if given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.label_set()?;
        if self.samples_per_label == 0 {
            return Err(ConfigError::ZeroSamplesPerLabel);
        }
        Ok(())
    }

    pub fn label_set(&self) -> Result<LabelSet, ConfigError> {
        LabelSet::new(self.labels.iter().cloned()).map_err(ConfigError::Labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CollectorConfig::default();
        assert_eq!(config.labels.concat(), "ABCDEFGHIKLMNOPQRSTUVWXY");
        assert_eq!(config.samples_per_label, 30);
        assert_eq!(config.dataset_path, Path::new("data/landmark_dataset/landmarks.json"));
        assert_eq!(config.model_path, Path::new("models/model.onnx"));
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = CollectorConfig::from_toml("samples_per_label = 5\nlabels = [\"A\", \"B\"]\n")
            .unwrap();
        assert_eq!(config.samples_per_label, 5);
        assert_eq!(config.label_set().unwrap().len(), 2);
        assert_eq!(config.frame_interval_ms, DEFAULT_FRAME_INTERVAL_MS);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            CollectorConfig::from_toml("samples_per_label = 0"),
            Err(ConfigError::ZeroSamplesPerLabel)
        ));
        assert!(matches!(
            CollectorConfig::from_toml("labels = []"),
            Err(ConfigError::Labels(_))
        ));
        assert!(matches!(
            CollectorConfig::from_toml("labels = [\"A\", \"A\"]"),
            Err(ConfigError::Labels(_))
        ));
        assert!(matches!(
            CollectorConfig::from_toml("samples_per_label = \"many\""),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handsign.toml");
        fs::write(&path, "model_path = \"out/letters.onnx\"\n").unwrap();
        let config = CollectorConfig::load(&path).unwrap();
        assert_eq!(config.model_path, Path::new("out/letters.onnx"));
        assert!(matches!(
            CollectorConfig::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
