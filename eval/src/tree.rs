// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Regression trees over per-sample gradient/hessian statistics
//!
//! Leaf values are `-G / (H + lambda)` and a split's gain is
//! `G_L^2/(H_L+lambda) + G_R^2/(H_R+lambda) - G^2/(H+lambda)`. With
//! `g = -y`, `h = 1` and `lambda = 0` this is a variance-reduction tree whose
//! leaves hold the positive fraction, which is what the random forest uses.
//! Gradient boosting feeds log-loss gradients and hessians instead.

use rand::seq::index::sample;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// How a tree is grown
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TreeGrowth {
    /// Split every node level by level down to `max_depth`
    DepthWise { max_depth: usize },
    /// Repeatedly split the leaf with the largest gain until `max_leaves`
    LeafWise { max_leaves: usize },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TreeParams {
    pub growth: TreeGrowth,
    /// L2 penalty on leaf values
    pub lambda: f64,
    pub min_samples_leaf: usize,
    /// Minimum hessian sum in each child
    pub min_child_weight: f64,
    /// Features considered per split, all when `None`
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A fitted tree stored as a node arena rooted at index 0
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

/// Borrowed training statistics for one tree
struct Grower<'a> {
    features: &'a [Vec<f64>],
    grad: &'a [f64],
    hess: &'a [f64],
    params: TreeParams,
    n_features: usize,
}

impl RegressionTree {
    /// Fit on the rows listed in `indices`.
    ///
    /// `rng` is only drawn from when `params.max_features` is set.
    pub fn fit(
        features: &[Vec<f64>],
        grad: &[f64],
        hess: &[f64],
        indices: Vec<usize>,
        params: TreeParams,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let grower = Grower {
            features,
            grad,
            hess,
            params,
            n_features: features.first().map_or(0, Vec::len),
        };

        let mut tree = Self {
            nodes: vec![Node::Leaf {
                value: grower.leaf_value(&indices),
            }],
        };

        match params.growth {
            TreeGrowth::DepthWise { max_depth } => tree.grow_depth_wise(&grower, 0, indices, 0, max_depth, rng),
            TreeGrowth::LeafWise { max_leaves } => tree.grow_leaf_wise(&grower, indices, max_leaves, rng),
        }

        tree
    }

    fn grow_depth_wise(
        &mut self,
        grower: &Grower<'_>,
        node: usize,
        indices: Vec<usize>,
        depth: usize,
        max_depth: usize,
        rng: &mut ChaCha8Rng,
    ) {
        if depth >= max_depth {
            return;
        }
        let Some(split) = grower.best_split(&indices, rng) else {
            return;
        };

        let (left, right) = self.split_node(grower, node, &split);
        self.grow_depth_wise(grower, left, split.left, depth + 1, max_depth, rng);
        self.grow_depth_wise(grower, right, split.right, depth + 1, max_depth, rng);
    }

    fn grow_leaf_wise(&mut self, grower: &Grower<'_>, indices: Vec<usize>, max_leaves: usize, rng: &mut ChaCha8Rng) {
        let mut frontier: Vec<(usize, SplitCandidate)> = Vec::new();
        if let Some(split) = grower.best_split(&indices, rng) {
            frontier.push((0, split));
        }

        let mut leaves = 1;
        while leaves < max_leaves && !frontier.is_empty() {
            let best = frontier
                .iter()
                .enumerate()
                .max_by(|a, b| a.1 .1.gain.total_cmp(&b.1 .1.gain))
                .map(|(pos, _)| pos)
                .unwrap_or(0);
            let (node, split) = frontier.swap_remove(best);

            let (left, right) = self.split_node(grower, node, &split);
            leaves += 1;

            for (child, child_indices) in [(left, split.left), (right, split.right)] {
                if let Some(child_split) = grower.best_split(&child_indices, rng) {
                    frontier.push((child, child_split));
                }
            }
        }
    }

    /// Turn leaf `node` into a split with two fresh leaves
    fn split_node(&mut self, grower: &Grower<'_>, node: usize, split: &SplitCandidate) -> (usize, usize) {
        let left = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: grower.leaf_value(&split.left),
        });
        let right = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: grower.leaf_value(&split.right),
        });
        self.nodes[node] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        (left, right)
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let x = row.get(*feature).copied().unwrap_or(0.0);
                    idx = if x <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf { .. })).count()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

impl Grower<'_> {
    fn sums(&self, indices: &[usize]) -> (f64, f64) {
        indices
            .iter()
            .fold((0.0, 0.0), |(g, h), &i| (g + self.grad[i], h + self.hess[i]))
    }

    fn leaf_value(&self, indices: &[usize]) -> f64 {
        let (g, h) = self.sums(indices);
        let denom = h + self.params.lambda;
        if denom > 0.0 {
            -g / denom
        } else {
            0.0
        }
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        let denom = h + self.params.lambda;
        if denom > 0.0 {
            g * g / denom
        } else {
            0.0
        }
    }

    fn candidate_features(&self, rng: &mut ChaCha8Rng) -> Vec<usize> {
        match self.params.max_features {
            Some(k) if k < self.n_features => sample(rng, self.n_features, k.max(1)).into_vec(),
            _ => (0..self.n_features).collect(),
        }
    }

    fn best_split(&self, indices: &[usize], rng: &mut ChaCha8Rng) -> Option<SplitCandidate> {
        let min_leaf = self.params.min_samples_leaf.max(1);
        if indices.len() < 2 * min_leaf {
            return None;
        }

        let (g_total, h_total) = self.sums(indices);
        let parent_score = self.score(g_total, h_total);

        let mut best: Option<(usize, f64, f64)> = None;
        for feature in self.candidate_features(rng) {
            let mut sorted: Vec<usize> = indices.to_vec();
            sorted.sort_by(|&a, &b| self.features[a][feature].total_cmp(&self.features[b][feature]));

            let mut g_left = 0.0;
            let mut h_left = 0.0;
            for pos in 0..sorted.len() - 1 {
                let i = sorted[pos];
                g_left += self.grad[i];
                h_left += self.hess[i];

                let n_left = pos + 1;
                let n_right = sorted.len() - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }

                let here = self.features[i][feature];
                let next = self.features[sorted[pos + 1]][feature];
                if here == next {
                    continue;
                }

                let h_right = h_total - h_left;
                if h_left < self.params.min_child_weight || h_right < self.params.min_child_weight {
                    continue;
                }

                let gain = self.score(g_left, h_left) + self.score(g_total - g_left, h_right) - parent_score;
                if gain > best.map_or(1e-12, |(_, _, g)| g) {
                    best = Some((feature, (here + next) / 2.0, gain));
                }
            }
        }

        best.map(|(feature, threshold, gain)| {
            let (left, right): (Vec<usize>, Vec<usize>) = indices
                .iter()
                .partition(|&&i| self.features[i][feature] <= threshold);
            SplitCandidate {
                feature,
                threshold,
                gain,
                left,
                right,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        // y = 1 when x0 > 0.5; x1 is noise
        let features: Vec<Vec<f64>> = (0..20)
            .map(|i| vec![i as f64 / 20.0, ((i * 7) % 5) as f64])
            .collect();
        let y = features.iter().map(|r| if r[0] > 0.5 { 1.0 } else { 0.0 }).collect();
        (features, y)
    }

    fn params(growth: TreeGrowth) -> TreeParams {
        TreeParams {
            growth,
            lambda: 0.0,
            min_samples_leaf: 1,
            min_child_weight: 0.0,
            max_features: None,
        }
    }

    #[test]
    fn test_depth_wise_tree_learns_step() {
        let (features, y) = step_data();
        let grad: Vec<f64> = y.iter().map(|v| -v).collect();
        let hess = vec![1.0; y.len()];
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let tree = RegressionTree::fit(
            &features,
            &grad,
            &hess,
            (0..20).collect(),
            params(TreeGrowth::DepthWise { max_depth: 3 }),
            &mut rng,
        );

        assert!((tree.predict(&[0.9, 0.0]) - 1.0).abs() < 1e-12);
        assert!(tree.predict(&[0.1, 0.0]).abs() < 1e-12);
        // a pure split needs only one level
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn test_leaf_wise_respects_max_leaves() {
        let features: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64]).collect();
        let grad: Vec<f64> = (0..40).map(|i| -((i % 4) as f64)).collect();
        let hess = vec![1.0; 40];
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let tree = RegressionTree::fit(
            &features,
            &grad,
            &hess,
            (0..40).collect(),
            params(TreeGrowth::LeafWise { max_leaves: 5 }),
            &mut rng,
        );

        assert_eq!(tree.n_leaves(), 5);
    }

    #[test]
    fn test_constant_target_stays_a_leaf() {
        let features: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let grad = vec![-1.0; 10];
        let hess = vec![1.0; 10];
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let tree = RegressionTree::fit(
            &features,
            &grad,
            &hess,
            (0..10).collect(),
            params(TreeGrowth::DepthWise { max_depth: 4 }),
            &mut rng,
        );

        assert_eq!(tree.n_leaves(), 1);
        assert!((tree.predict(&[3.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_lambda_shrinks_leaf_values() {
        let features: Vec<Vec<f64>> = (0..4).map(|i| vec![i as f64]).collect();
        let grad = vec![-1.0; 4];
        let hess = vec![1.0; 4];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut p = params(TreeGrowth::DepthWise { max_depth: 0 });
        p.lambda = 4.0;

        let tree = RegressionTree::fit(&features, &grad, &hess, (0..4).collect(), p, &mut rng);
        assert!((tree.predict(&[0.0]) - 0.5).abs() < 1e-12);
    }
}
