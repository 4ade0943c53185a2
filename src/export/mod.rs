//! Exports a fitted classifier as a portable ONNX inference graph.
//!
//! A classifier that implements [`Exportable`] describes itself as a
//! [`TreeEnsemble`]: a flat list of trees, each adding to the score of one
//! class, plus per-class base scores. The ensemble maps one-to-one onto the
//! `ai.onnx.ml` `TreeEnsembleClassifier` operator, which is what gets written
//! to disk. Two-class ensembles are written in the single-score logistic
//! layout ONNX Runtime reads for binary classifiers. [`InferenceGraph`] reads
//! the file back for inspection, [`OnnxRuntime`] runs it.

use std::fs;
use std::path::{Path, PathBuf};

use prost::Message;
use thiserror::Error;

mod graph;
pub mod onnx;
mod runtime;

pub use graph::{GraphError, InferenceGraph};
pub use runtime::{OnnxRuntime, RuntimeError};
use onnx::{
    AttributeProto, Dimension, GraphProto, ModelProto, NodeProto, OperatorSetIdProto,
    StringStringEntryProto, ValueInfoProto,
};

/// Name of the graph input tensor.
pub const INPUT_NAME: &str = "float_input";
pub const LABEL_OUTPUT: &str = "label";
pub const PROBABILITIES_OUTPUT: &str = "probabilities";
/// Metadata key under which the label names are stored as a JSON array.
pub const LABEL_NAMES_KEY: &str = "label_names";
pub(crate) const TREE_ENSEMBLE_OP: &str = "TreeEnsembleClassifier";
pub(crate) const BRANCH_LEQ: &str = "BRANCH_LEQ";
pub(crate) const LEAF: &str = "LEAF";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Model has no classes to export")]
    NoClasses,
    #[error("Ensemble layout is inconsistent: {0}")]
    Layout(String),
    #[error("Tree {tree} is malformed: {reason}")]
    MalformedTree { tree: usize, reason: String },
    #[error("Feature index {feature} exceeds input width {n_features}")]
    FeatureOutOfRange { feature: usize, n_features: usize },
    #[error("Failed to write model to {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to encode label names: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// One node of an exported tree.
#[derive(Debug, Clone, PartialEq)]
pub enum EnsembleNode {
    /// `features[feature] <= threshold` follows `true_child`.
    Branch {
        feature: usize,
        threshold: f32,
        true_child: usize,
        false_child: usize,
    },
    Leaf { weight: f32 },
}

/// How raw scores become class probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostTransform {
    /// One score per class, softmax across them.
    Softmax,
    /// Two classes sharing one score `s1 - s0`; class 1 wins when it is positive.
    Logistic,
}

impl PostTransform {
    pub fn as_str(self) -> &'static str {
        match self {
            PostTransform::Softmax => "SOFTMAX",
            PostTransform::Logistic => "LOGISTIC",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "SOFTMAX" => Some(PostTransform::Softmax),
            "LOGISTIC" => Some(PostTransform::Logistic),
            _ => None,
        }
    }

    /// Number of score slots an ensemble with `n_classes` classes keeps.
    pub fn n_scores(self, n_classes: usize) -> usize {
        match self {
            PostTransform::Softmax => n_classes,
            PostTransform::Logistic => 1,
        }
    }
}

/// A tree contributing to score slot `class_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleTree {
    pub class_id: usize,
    pub nodes: Vec<EnsembleNode>,
}

impl EnsembleTree {
    pub fn evaluate(&self, features: &[f32]) -> f32 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                EnsembleNode::Leaf { weight } => return *weight,
                EnsembleNode::Branch {
                    feature,
                    threshold,
                    true_child,
                    false_child,
                } => {
                    id = if features[*feature] <= *threshold {
                        *true_child
                    } else {
                        *false_child
                    };
                }
            }
        }
    }
}

/// Runtime-agnostic description of a tree-ensemble classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeEnsemble {
    pub n_features: usize,
    /// Label emitted for each class position.
    pub class_labels: Vec<i64>,
    /// Starting value of each score slot.
    pub base_values: Vec<f32>,
    /// Trees in evaluation order.
    pub trees: Vec<EnsembleTree>,
    pub post_transform: PostTransform,
}

impl TreeEnsemble {
    /// Checks the structural invariants a `TreeEnsembleClassifier` relies on.
    pub fn validate(&self) -> Result<(), ExportError> {
        if self.class_labels.is_empty() {
            return Err(ExportError::NoClasses);
        }
        if self.post_transform == PostTransform::Logistic && self.class_labels.len() != 2 {
            return Err(ExportError::Layout(format!(
                "logistic output needs 2 classes, found {}",
                self.class_labels.len()
            )));
        }
        let n_scores = self.post_transform.n_scores(self.class_labels.len());
        if self.base_values.len() != n_scores {
            return Err(ExportError::Layout(format!(
                "{} base values for {} scores",
                self.base_values.len(),
                n_scores
            )));
        }
        for (t, tree) in self.trees.iter().enumerate() {
            let malformed = |reason: String| ExportError::MalformedTree { tree: t, reason };
            if tree.nodes.is_empty() {
                return Err(malformed("no nodes".into()));
            }
            if tree.class_id >= n_scores {
                return Err(malformed(format!("unknown score slot {}", tree.class_id)));
            }
            for (id, node) in tree.nodes.iter().enumerate() {
                if let EnsembleNode::Branch {
                    feature,
                    true_child,
                    false_child,
                    ..
                } = node
                {
                    if *feature >= self.n_features {
                        return Err(ExportError::FeatureOutOfRange {
                            feature: *feature,
                            n_features: self.n_features,
                        });
                    }
                    // Children after parents rules out cycles.
                    for child in [*true_child, *false_child] {
                        if child <= id || child >= tree.nodes.len() {
                            return Err(malformed(format!(
                                "node {id} has invalid child {child}"
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Raw scores for one sample, one per score slot.
    pub fn scores(&self, features: &[f32]) -> Vec<f32> {
        let mut scores = self.base_values.clone();
        for tree in &self.trees {
            scores[tree.class_id] += tree.evaluate(features);
        }
        scores
    }

    /// Class probabilities, one per entry of `class_labels`.
    pub fn probabilities(&self, features: &[f32]) -> Vec<f32> {
        let scores = self.scores(features);
        match self.post_transform {
            PostTransform::Softmax => {
                gbdt::softmax(ndarray::ArrayView1::from(scores.as_slice())).to_vec()
            }
            PostTransform::Logistic => {
                let p = 1.0 / (1.0 + (-scores[0]).exp());
                vec![1.0 - p, p]
            }
        }
    }

    /// Label of the winning class.
    pub fn predict(&self, features: &[f32]) -> i64 {
        let scores = self.scores(features);
        match self.post_transform {
            PostTransform::Softmax => {
                self.class_labels[gbdt::argmax(ndarray::ArrayView1::from(scores.as_slice()))]
            }
            PostTransform::Logistic if scores[0] > 0.0 => self.class_labels[1],
            PostTransform::Logistic => self.class_labels[0],
        }
    }

    /// The ensemble as it is written to ONNX.
    ///
    /// A two-class softmax ensemble becomes a single logistic score: class-0
    /// trees have their leaves negated, every tree feeds slot 0 and the base
    /// value is `b1 - b0`. Softmax over `[s0, s1]` equals the logistic of
    /// `s1 - s0`, so probabilities are unchanged. Anything else is returned
    /// as is.
    pub fn onnx_layout(&self) -> TreeEnsemble {
        if self.post_transform != PostTransform::Softmax
            || self.class_labels.len() != 2
            || self.base_values.len() != 2
        {
            return self.clone();
        }
        let trees = self
            .trees
            .iter()
            .map(|tree| {
                let negate = tree.class_id == 0;
                EnsembleTree {
                    class_id: 0,
                    nodes: tree
                        .nodes
                        .iter()
                        .map(|node| match *node {
                            EnsembleNode::Leaf { weight } if negate => {
                                EnsembleNode::Leaf { weight: -weight }
                            }
                            ref other => other.clone(),
                        })
                        .collect(),
                }
            })
            .collect();
        TreeEnsemble {
            n_features: self.n_features,
            class_labels: self.class_labels.clone(),
            base_values: vec![self.base_values[1] - self.base_values[0]],
            trees,
            post_transform: PostTransform::Logistic,
        }
    }

    /// Encodes the ensemble as an ONNX model with one `TreeEnsembleClassifier` node.
    pub fn to_model_proto(&self, label_names: &[String]) -> Result<ModelProto, ExportError> {
        let ensemble = self.onnx_layout();
        ensemble.validate()?;
        let mut nodes_treeids = Vec::new();
        let mut nodes_nodeids = Vec::new();
        let mut nodes_featureids = Vec::new();
        let mut nodes_values = Vec::new();
        let mut nodes_modes = Vec::new();
        let mut nodes_truenodeids = Vec::new();
        let mut nodes_falsenodeids = Vec::new();
        let mut class_treeids = Vec::new();
        let mut class_nodeids = Vec::new();
        let mut class_ids = Vec::new();
        let mut class_weights = Vec::new();

        for (t, tree) in ensemble.trees.iter().enumerate() {
            for (id, node) in tree.nodes.iter().enumerate() {
                nodes_treeids.push(t as i64);
                nodes_nodeids.push(id as i64);
                match node {
                    EnsembleNode::Branch {
                        feature,
                        threshold,
                        true_child,
                        false_child,
                    } => {
                        nodes_featureids.push(*feature as i64);
                        nodes_values.push(*threshold);
                        nodes_modes.push(BRANCH_LEQ);
                        nodes_truenodeids.push(*true_child as i64);
                        nodes_falsenodeids.push(*false_child as i64);
                    }
                    EnsembleNode::Leaf { weight } => {
                        nodes_featureids.push(0);
                        nodes_values.push(0.0);
                        nodes_modes.push(LEAF);
                        nodes_truenodeids.push(0);
                        nodes_falsenodeids.push(0);
                        class_treeids.push(t as i64);
                        class_nodeids.push(id as i64);
                        class_ids.push(tree.class_id as i64);
                        class_weights.push(*weight);
                    }
                }
            }
        }
        let n_nodes = nodes_treeids.len();

        let node = NodeProto {
            input: vec![INPUT_NAME.to_string()],
            output: vec![LABEL_OUTPUT.to_string(), PROBABILITIES_OUTPUT.to_string()],
            name: "TreeEnsembleClassifier".to_string(),
            op_type: TREE_ENSEMBLE_OP.to_string(),
            domain: onnx::ML_DOMAIN.to_string(),
            attribute: vec![
                AttributeProto::ints("classlabels_int64s", ensemble.class_labels.clone()),
                AttributeProto::floats("base_values", ensemble.base_values.clone()),
                AttributeProto::string("post_transform", ensemble.post_transform.as_str()),
                AttributeProto::ints("nodes_treeids", nodes_treeids),
                AttributeProto::ints("nodes_nodeids", nodes_nodeids),
                AttributeProto::ints("nodes_featureids", nodes_featureids),
                AttributeProto::floats("nodes_values", nodes_values),
                AttributeProto::strings("nodes_modes", nodes_modes),
                AttributeProto::ints("nodes_truenodeids", nodes_truenodeids),
                AttributeProto::ints("nodes_falsenodeids", nodes_falsenodeids),
                AttributeProto::ints("nodes_missing_value_tracks_true", vec![0; n_nodes]),
                AttributeProto::ints("class_treeids", class_treeids),
                AttributeProto::ints("class_nodeids", class_nodeids),
                AttributeProto::ints("class_ids", class_ids),
                AttributeProto::floats("class_weights", class_weights),
            ],
            doc_string: String::new(),
        };

        let batch = Dimension::symbolic("N");
        let graph = GraphProto {
            node: vec![node],
            name: "handsign_classifier".to_string(),
            doc_string: String::new(),
            input: vec![ValueInfoProto::tensor(
                INPUT_NAME,
                onnx::ELEM_FLOAT,
                vec![batch.clone(), Dimension::fixed(ensemble.n_features as i64)],
            )],
            output: vec![
                ValueInfoProto::tensor(LABEL_OUTPUT, onnx::ELEM_INT64, vec![batch.clone()]),
                ValueInfoProto::tensor(
                    PROBABILITIES_OUTPUT,
                    onnx::ELEM_FLOAT,
                    vec![batch, Dimension::fixed(ensemble.class_labels.len() as i64)],
                ),
            ],
        };

        Ok(ModelProto {
            ir_version: onnx::IR_VERSION,
            producer_name: env!("CARGO_PKG_NAME").to_string(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            domain: String::new(),
            model_version: 1,
            doc_string: "Static hand-sign letter classifier".to_string(),
            graph: Some(graph),
            opset_import: vec![
                OperatorSetIdProto {
                    domain: String::new(),
                    version: onnx::DEFAULT_OPSET,
                },
                OperatorSetIdProto {
                    domain: onnx::ML_DOMAIN.to_string(),
                    version: onnx::ML_OPSET,
                },
            ],
            metadata_props: vec![StringStringEntryProto {
                key: LABEL_NAMES_KEY.to_string(),
                value: serde_json::to_string(label_names)?,
            }],
        })
    }
}

/// A fitted classifier that can describe itself as a tree ensemble.
pub trait Exportable {
    fn to_tree_ensemble(&self) -> TreeEnsemble;
}

/// Writes `model` as an ONNX graph to `path`, creating parent directories and
/// replacing any previous artifact. Returns the encoded size in bytes.
pub fn export<M: Exportable + ?Sized>(
    model: &M,
    n_features: usize,
    label_names: &[String],
    path: &Path,
) -> Result<usize, ExportError> {
    let mut ensemble = model.to_tree_ensemble();
    ensemble.n_features = n_features;
    let bytes = ensemble.to_model_proto(label_names)?.encode_to_vec();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ExportError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, &bytes).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(
        "ONNX model saved to {} ({} trees, {} bytes)",
        path.display(),
        ensemble.trees.len(),
        bytes.len()
    );
    Ok(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two stumps on feature 1: class 0 wins below 0.5, class 1 above.
    pub(crate) fn toy_ensemble() -> TreeEnsemble {
        let stump = |class_id, low: f32, high: f32| EnsembleTree {
            class_id,
            nodes: vec![
                EnsembleNode::Branch {
                    feature: 1,
                    threshold: 0.5,
                    true_child: 1,
                    false_child: 2,
                },
                EnsembleNode::Leaf { weight: low },
                EnsembleNode::Leaf { weight: high },
            ],
        };
        TreeEnsemble {
            n_features: 3,
            class_labels: vec![4, 9],
            base_values: vec![0.0, 0.0],
            trees: vec![stump(0, 1.0, -1.0), stump(1, -1.0, 1.0)],
            post_transform: PostTransform::Softmax,
        }
    }

    /// Three classes with uneven priors: stumps on features 0 and 2.
    pub(crate) fn three_class_ensemble() -> TreeEnsemble {
        let stump = |class_id, feature, low: f32, high: f32| EnsembleTree {
            class_id,
            nodes: vec![
                EnsembleNode::Branch {
                    feature,
                    threshold: 0.0,
                    true_child: 1,
                    false_child: 2,
                },
                EnsembleNode::Leaf { weight: low },
                EnsembleNode::Leaf { weight: high },
            ],
        };
        TreeEnsemble {
            n_features: 3,
            class_labels: vec![0, 1, 2],
            base_values: vec![-1.2, -0.9, -1.2],
            trees: vec![
                stump(0, 0, 2.0, -1.0),
                stump(1, 0, -1.0, 0.5),
                stump(2, 2, -1.0, 2.0),
            ],
            post_transform: PostTransform::Softmax,
        }
    }

    #[test]
    fn test_ensemble_prediction() {
        let ensemble = toy_ensemble();
        assert_eq!(ensemble.predict(&[0.0, 0.2, 0.0]), 4);
        assert_eq!(ensemble.predict(&[0.0, 0.5, 0.0]), 4);
        assert_eq!(ensemble.predict(&[0.0, 0.7, 0.0]), 9);
        let p = ensemble.probabilities(&[0.0, 0.7, 0.0]);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(p[1] > p[0]);
    }

    #[test]
    fn test_two_classes_use_logistic_layout() {
        let mut ensemble = toy_ensemble();
        ensemble.base_values = vec![-0.3, 0.2];
        let binary = ensemble.onnx_layout();
        assert_eq!(binary.post_transform, PostTransform::Logistic);
        assert!(binary.trees.iter().all(|t| t.class_id == 0));
        assert_eq!(binary.base_values, vec![0.5]);
        assert_eq!(binary.trees[0].nodes[1], EnsembleNode::Leaf { weight: -1.0 });
        assert_eq!(binary.trees[1].nodes[1], EnsembleNode::Leaf { weight: -1.0 });
        binary.validate().unwrap();

        for x in [0.1f32, 0.5, 0.9] {
            let row = [0.0, x, 0.0];
            assert_eq!(binary.predict(&row), ensemble.predict(&row));
            let (a, b) = (binary.probabilities(&row), ensemble.probabilities(&row));
            assert!((a[1] - b[1]).abs() < 1e-6);
            assert!((a[0] + a[1] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_multiclass_layout_is_unchanged() {
        let ensemble = three_class_ensemble();
        assert_eq!(ensemble.onnx_layout(), ensemble);
        assert_eq!(ensemble.predict(&[-1.0, 0.0, -1.0]), 0);
        assert_eq!(ensemble.predict(&[1.0, 0.0, -1.0]), 1);
        assert_eq!(ensemble.predict(&[1.0, 0.0, 1.0]), 2);
    }

    #[test]
    fn test_written_attributes_follow_layout() {
        let binary = toy_ensemble().to_model_proto(&[]).unwrap();
        let node = &binary.graph.as_ref().unwrap().node[0];
        let attribute = |name: &str| node.attribute.iter().find(|a| a.name == name).unwrap();
        assert_eq!(attribute("post_transform").s, b"LOGISTIC");
        assert!(attribute("class_ids").ints.iter().all(|&c| c == 0));
        assert_eq!(attribute("base_values").floats.len(), 1);
        assert_eq!(attribute("classlabels_int64s").ints, vec![4, 9]);

        let multi = three_class_ensemble().to_model_proto(&[]).unwrap();
        let node = &multi.graph.as_ref().unwrap().node[0];
        let attribute = |name: &str| node.attribute.iter().find(|a| a.name == name).unwrap();
        assert_eq!(attribute("post_transform").s, b"SOFTMAX");
        assert_eq!(attribute("base_values").floats.len(), 3);
    }

    #[test]
    fn test_validate_rejects_logistic_with_three_classes() {
        let mut ensemble = three_class_ensemble();
        ensemble.post_transform = PostTransform::Logistic;
        assert!(matches!(ensemble.validate(), Err(ExportError::Layout(_))));
    }

    #[test]
    fn test_validate_rejects_bad_children() {
        let mut ensemble = toy_ensemble();
        ensemble.trees[0].nodes[0] = EnsembleNode::Branch {
            feature: 1,
            threshold: 0.5,
            true_child: 0,
            false_child: 2,
        };
        assert!(matches!(
            ensemble.validate(),
            Err(ExportError::MalformedTree { tree: 0, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_wide_feature_index() {
        let mut ensemble = toy_ensemble();
        ensemble.n_features = 1;
        assert!(matches!(
            ensemble.validate(),
            Err(ExportError::FeatureOutOfRange { feature: 1, n_features: 1 })
        ));
    }

    #[test]
    fn test_model_proto_layout() {
        let model = toy_ensemble()
            .to_model_proto(&["A".to_string(), "B".to_string()])
            .unwrap();
        let graph = model.graph.as_ref().unwrap();
        assert_eq!(graph.node.len(), 1);
        assert_eq!(graph.node[0].op_type, TREE_ENSEMBLE_OP);
        assert_eq!(graph.input[0].name, INPUT_NAME);
        let dims = &graph.input[0].tensor_type().unwrap().shape.as_ref().unwrap().dim;
        assert_eq!(dims.len(), 2);
        assert_eq!(dims[0].size(), None);
        assert_eq!(dims[1].size(), Some(3));
        assert_eq!(graph.output[0].name, LABEL_OUTPUT);
        assert!(model
            .opset_import
            .iter()
            .any(|o| o.domain == onnx::ML_DOMAIN));
    }
}
