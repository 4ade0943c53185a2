//! Reads an exported ONNX tree-ensemble graph back for inspection.
//!
//! Only graphs of the shape produced by [`super::export`] are understood: a
//! single `TreeEnsembleClassifier` node over one float input. Inference runs
//! through [`super::OnnxRuntime`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use prost::Message;
use thiserror::Error;

use super::onnx::{AttributeProto, ModelProto, NodeProto, ValueInfoProto};
use super::{
    BRANCH_LEQ, EnsembleNode, EnsembleTree, LABEL_NAMES_KEY, LEAF, PostTransform,
    TREE_ENSEMBLE_OP, TreeEnsemble,
};

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Failed to read model {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to decode ONNX model: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("Unsupported ONNX graph: {0}")]
    Unsupported(String),
}

/// The metadata and tree structure of an exported model.
#[derive(Debug, Clone)]
pub struct InferenceGraph {
    input_name: String,
    input_shape: Vec<Option<i64>>,
    label_names: Vec<String>,
    ensemble: TreeEnsemble,
}

impl InferenceGraph {
    pub fn load(path: &Path) -> Result<Self, GraphError> {
        let bytes = fs::read(path).map_err(|source| GraphError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GraphError> {
        let model = ModelProto::decode(bytes)?;
        Self::from_model(&model)
    }

    pub fn from_model(model: &ModelProto) -> Result<Self, GraphError> {
        let graph = model
            .graph
            .as_ref()
            .ok_or_else(|| unsupported("model has no graph"))?;
        let [input] = graph.input.as_slice() else {
            return Err(unsupported(format!(
                "expected one input, found {}",
                graph.input.len()
            )));
        };
        let node = graph
            .node
            .iter()
            .find(|n| n.op_type == TREE_ENSEMBLE_OP)
            .ok_or_else(|| unsupported("no TreeEnsembleClassifier node"))?;

        let input_shape = shape_of(input)?;
        let n_features = match input_shape.last() {
            Some(Some(width)) if *width > 0 => *width as usize,
            _ => return Err(unsupported("input feature dimension is not fixed")),
        };
        let ensemble = ensemble_from_node(node, n_features)?;
        ensemble
            .validate()
            .map_err(|err| unsupported(err.to_string()))?;

        let label_names = model
            .metadata_props
            .iter()
            .find(|p| p.key == LABEL_NAMES_KEY)
            .and_then(|p| serde_json::from_str(&p.value).ok())
            .unwrap_or_default();

        Ok(Self {
            input_name: input.name.clone(),
            input_shape,
            label_names,
            ensemble,
        })
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    /// Input dimensions; `None` marks a symbolic (batch) dimension.
    pub fn input_shape(&self) -> &[Option<i64>] {
        &self.input_shape
    }

    pub fn n_features(&self) -> usize {
        self.ensemble.n_features
    }

    /// Label emitted for each output probability column.
    pub fn class_labels(&self) -> &[i64] {
        &self.ensemble.class_labels
    }

    /// Label names stored with the model, empty if none were recorded.
    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// The trees as written, in their ONNX layout.
    pub fn ensemble(&self) -> &TreeEnsemble {
        &self.ensemble
    }

    /// Name of the class in probability column `column`, falling back to
    /// `fallback` when the model carries no names.
    pub fn class_name<'a>(&'a self, column: usize, fallback: &'a [String]) -> Option<&'a str> {
        let names = if self.label_names.is_empty() {
            fallback
        } else {
            &self.label_names
        };
        let label = usize::try_from(*self.ensemble.class_labels.get(column)?).ok()?;
        names.get(label).map(String::as_str)
    }
}

fn unsupported(reason: impl Into<String>) -> GraphError {
    GraphError::Unsupported(reason.into())
}

fn shape_of(value: &ValueInfoProto) -> Result<Vec<Option<i64>>, GraphError> {
    let tensor = value
        .tensor_type()
        .ok_or_else(|| unsupported("input is not a tensor"))?;
    let shape = tensor
        .shape
        .as_ref()
        .ok_or_else(|| unsupported("input has no shape"))?;
    Ok(shape.dim.iter().map(|d| d.size()).collect())
}

fn attribute<'a>(node: &'a NodeProto, name: &str) -> Option<&'a AttributeProto> {
    node.attribute.iter().find(|a| a.name == name)
}

fn ints<'a>(node: &'a NodeProto, name: &str) -> Result<&'a [i64], GraphError> {
    attribute(node, name)
        .map(|a| a.ints.as_slice())
        .ok_or_else(|| unsupported(format!("missing attribute {name}")))
}

fn floats<'a>(node: &'a NodeProto, name: &str) -> Result<&'a [f32], GraphError> {
    attribute(node, name)
        .map(|a| a.floats.as_slice())
        .ok_or_else(|| unsupported(format!("missing attribute {name}")))
}

fn index(value: i64, what: &str) -> Result<usize, GraphError> {
    usize::try_from(value).map_err(|_| unsupported(format!("negative {what} {value}")))
}

fn ensemble_from_node(node: &NodeProto, n_features: usize) -> Result<TreeEnsemble, GraphError> {
    let post_transform = attribute(node, "post_transform")
        .map(|a| String::from_utf8_lossy(&a.s).into_owned())
        .unwrap_or_else(|| "NONE".to_string());
    let post_transform = PostTransform::parse(&post_transform)
        .ok_or_else(|| unsupported(format!("post_transform {post_transform}")))?;

    let class_labels = ints(node, "classlabels_int64s")?.to_vec();
    let base_values = match attribute(node, "base_values") {
        Some(a) => a.floats.clone(),
        None => vec![0.0; post_transform.n_scores(class_labels.len())],
    };

    let tree_ids = ints(node, "nodes_treeids")?;
    let node_ids = ints(node, "nodes_nodeids")?;
    let feature_ids = ints(node, "nodes_featureids")?;
    let values = floats(node, "nodes_values")?;
    let true_ids = ints(node, "nodes_truenodeids")?;
    let false_ids = ints(node, "nodes_falsenodeids")?;
    let modes: Vec<String> = attribute(node, "nodes_modes")
        .ok_or_else(|| unsupported("missing attribute nodes_modes"))?
        .strings
        .iter()
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect();
    let n_nodes = tree_ids.len();
    if [
        node_ids.len(),
        feature_ids.len(),
        values.len(),
        true_ids.len(),
        false_ids.len(),
        modes.len(),
    ]
    .iter()
    .any(|&len| len != n_nodes)
    {
        return Err(unsupported("node attribute lengths differ"));
    }

    // tree id -> node id -> node
    let mut trees: BTreeMap<i64, BTreeMap<usize, EnsembleNode>> = BTreeMap::new();
    for i in 0..n_nodes {
        let node_id = index(node_ids[i], "node id")?;
        let parsed = match modes[i].as_str() {
            BRANCH_LEQ => EnsembleNode::Branch {
                feature: index(feature_ids[i], "feature id")?,
                threshold: values[i],
                true_child: index(true_ids[i], "node id")?,
                false_child: index(false_ids[i], "node id")?,
            },
            LEAF => EnsembleNode::Leaf { weight: 0.0 },
            other => return Err(unsupported(format!("node mode {other}"))),
        };
        trees.entry(tree_ids[i]).or_default().insert(node_id, parsed);
    }

    let class_tree_ids = ints(node, "class_treeids")?;
    let class_node_ids = ints(node, "class_nodeids")?;
    let class_ids = ints(node, "class_ids")?;
    let class_weights = floats(node, "class_weights")?;
    let mut tree_class: BTreeMap<i64, usize> = BTreeMap::new();
    for i in 0..class_tree_ids.len() {
        let (Some(&node_id), Some(&class_id), Some(&weight)) =
            (class_node_ids.get(i), class_ids.get(i), class_weights.get(i))
        else {
            return Err(unsupported("class attribute lengths differ"));
        };
        let tree_id = class_tree_ids[i];
        let class_id = index(class_id, "class id")?;
        match tree_class.insert(tree_id, class_id) {
            Some(previous) if previous != class_id => {
                return Err(unsupported(format!(
                    "tree {tree_id} contributes to more than one class"
                )));
            }
            _ => {}
        }
        let leaf = trees
            .get_mut(&tree_id)
            .and_then(|nodes| nodes.get_mut(&index(node_id, "node id").ok()?))
            .ok_or_else(|| unsupported(format!("weight for unknown node {tree_id}/{node_id}")))?;
        match leaf {
            EnsembleNode::Leaf { weight: w } => *w += weight,
            EnsembleNode::Branch { .. } => {
                return Err(unsupported(format!("weight on branch node {tree_id}/{node_id}")));
            }
        }
    }

    let mut ensemble_trees = Vec::with_capacity(trees.len());
    for (tree_id, nodes) in trees {
        // Node ids must be dense so that they double as positions.
        if nodes.keys().copied().ne(0..nodes.len()) {
            return Err(unsupported(format!("tree {tree_id} has sparse node ids")));
        }
        let class_id = tree_class.get(&tree_id).copied().unwrap_or(0);
        ensemble_trees.push(EnsembleTree {
            class_id,
            nodes: nodes.into_values().collect(),
        });
    }

    Ok(TreeEnsemble {
        n_features,
        class_labels,
        base_values,
        trees: ensemble_trees,
        post_transform,
    })
}
