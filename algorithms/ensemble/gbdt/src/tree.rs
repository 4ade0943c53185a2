use crate::binning::FeatureBins;
use handsign_helpers::Float;
use ndarray::{Array2, ArrayView1};

/// A node of a regression tree, stored in a flat arena.
#[derive(Debug, Clone, PartialEq)]
pub enum Node<F: Float> {
    /// Samples with `features[feature] <= threshold` go to `left`, the rest to `right`.
    Split {
        feature: usize,
        threshold: F,
        left: usize,
        right: usize,
    },
    /// Additive contribution to the raw score of the tree's class.
    /// The learning rate is already folded in.
    Leaf { value: F },
}

/// A depth-limited regression tree fitted to one class's gradients.
///
/// Node 0 is the root; children always have larger ids than their parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree<F: Float> {
    nodes: Vec<Node<F>>,
}

impl<F: Float> Tree<F> {
    pub fn nodes(&self) -> &[Node<F>] {
        &self.nodes
    }

    pub fn depth(&self) -> usize {
        fn walk<F: Float>(nodes: &[Node<F>], id: usize) -> usize {
            match &nodes[id] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
            }
        }
        walk(&self.nodes, 0)
    }

    pub fn predict(&self, features: ArrayView1<F>) -> F {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

/// Second-order tree growth settings shared by every tree of a fit.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GrowthParams<F: Float> {
    pub max_depth: usize,
    pub lambda: F,
    pub min_child_weight: F,
    pub learning_rate: F,
}

struct BestSplit<F> {
    gain: F,
    feature: usize,
    bin: usize,
}

/// Grows one tree over pre-binned samples using gradient/hessian histograms.
pub(crate) struct TreeGrower<'a, F: Float> {
    bins: &'a FeatureBins<F>,
    binned: &'a Array2<u8>,
    grad: &'a [F],
    hess: &'a [F],
    params: GrowthParams<F>,
    nodes: Vec<Node<F>>,
}

impl<'a, F: Float> TreeGrower<'a, F> {
    pub fn new(
        bins: &'a FeatureBins<F>,
        binned: &'a Array2<u8>,
        grad: &'a [F],
        hess: &'a [F],
        params: GrowthParams<F>,
    ) -> Self {
        Self {
            bins,
            binned,
            grad,
            hess,
            params,
            nodes: Vec::new(),
        }
    }

    pub fn grow(mut self, rows: Vec<usize>) -> Tree<F> {
        self.grow_node(rows, 0);
        Tree { nodes: self.nodes }
    }

    fn grow_node(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let id = self.nodes.len();
        let g_sum: F = rows.iter().map(|&r| self.grad[r]).sum();
        let h_sum: F = rows.iter().map(|&r| self.hess[r]).sum();
        let leaf = Node::Leaf {
            value: -g_sum / (h_sum + self.params.lambda) * self.params.learning_rate,
        };
        self.nodes.push(leaf);

        if depth >= self.params.max_depth || rows.len() < 2 {
            return id;
        }
        let Some(best) = self.best_split(&rows, g_sum, h_sum) else {
            return id;
        };

        let split_bin = best.bin as u8;
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.binned[[r, best.feature]] <= split_bin);
        let left = self.grow_node(left_rows, depth + 1);
        let right = self.grow_node(right_rows, depth + 1);
        self.nodes[id] = Node::Split {
            feature: best.feature,
            threshold: self.bins.cuts(best.feature)[best.bin],
            left,
            right,
        };
        id
    }

    fn best_split(&self, rows: &[usize], g_sum: F, h_sum: F) -> Option<BestSplit<F>> {
        let lambda = self.params.lambda;
        let min_child = self.params.min_child_weight;
        if h_sum < min_child + min_child {
            return None;
        }
        let parent_score = g_sum * g_sum / (h_sum + lambda);

        let mut best: Option<BestSplit<F>> = None;
        for feature in 0..self.bins.n_features() {
            let n_cuts = self.bins.cuts(feature).len();
            if n_cuts == 0 {
                continue;
            }
            let mut g_hist = vec![F::zero(); n_cuts + 1];
            let mut h_hist = vec![F::zero(); n_cuts + 1];
            for &r in rows {
                let b = self.binned[[r, feature]] as usize;
                g_hist[b] += &self.grad[r];
                h_hist[b] += &self.hess[r];
            }

            let mut g_left = F::zero();
            let mut h_left = F::zero();
            for bin in 0..n_cuts {
                g_left += &g_hist[bin];
                h_left += &h_hist[bin];
                let g_right = g_sum - g_left;
                let h_right = h_sum - h_left;
                if h_left < min_child || h_right < min_child {
                    continue;
                }
                let gain = g_left * g_left / (h_left + lambda)
                    + g_right * g_right / (h_right + lambda)
                    - parent_score;
                let better = match &best {
                    Some(b) => gain > b.gain,
                    None => gain > F::epsilon(),
                };
                if better {
                    best = Some(BestSplit { gain, feature, bin });
                }
            }
        }
        best
    }
}
