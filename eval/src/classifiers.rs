// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Base classifiers for the fusion ensemble
//!
//! Implements:
//! - Logistic regression (batch gradient descent, L2)
//! - Kernel SVM (RBF kernel, Pegasos training, Platt-scaled probabilities)
//! - Random forest (bootstrapped variance-reduction trees)
//! - Gradient-boosted trees, depth-wise ("XGB") and leaf-wise ("LGBM")
//!
//! All classifiers output `[P(class 0), P(class 1)]` rows.

use crate::datasets::Label;
use crate::error::{FusionError, Result};
use crate::probabilities::ProbabilityMatrix;
use crate::tree::{RegressionTree, TreeGrowth, TreeParams};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Trait for all base classifiers
pub trait ProbabilisticClassifier: Send + Sync {
    /// Train the model on feature rows and labels
    fn fit(&mut self, features: &[Vec<f64>], labels: &[Label]) -> Result<()>;

    /// Predict `[P(class 0), P(class 1)]` for every row
    fn predict_proba(&self, features: &[Vec<f64>]) -> Result<ProbabilityMatrix>;

    /// Get model name
    fn name(&self) -> &str;

    /// Get model description
    fn description(&self) -> &str;
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn targets(labels: &[Label]) -> Vec<f64> {
    labels.iter().map(|l| f64::from(l.to_binary())).collect()
}

fn classifier_error(name: &str, message: impl Into<String>) -> FusionError {
    FusionError::Classifier {
        name: name.to_string(),
        message: message.into(),
    }
}

/// Check a training set and return its feature width
fn validate_training(name: &str, features: &[Vec<f64>], labels: &[Label]) -> Result<usize> {
    if features.is_empty() {
        return Err(classifier_error(name, "empty training set"));
    }
    if features.len() != labels.len() {
        return Err(FusionError::shape(
            format!("training labels of '{}'", name),
            features.len(),
            labels.len(),
        ));
    }
    let width = features[0].len();
    if let Some(row) = features.iter().find(|r| r.len() != width) {
        return Err(FusionError::shape(format!("training rows of '{}'", name), width, row.len()));
    }
    Ok(width)
}

fn validate_width(name: &str, features: &[Vec<f64>], width: usize) -> Result<()> {
    match features.iter().find(|r| r.len() != width) {
        Some(row) => Err(FusionError::shape(format!("feature rows for '{}'", name), width, row.len())),
        None => Ok(()),
    }
}

/// Per-feature standardization fitted on training data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Standardizer {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl Standardizer {
    pub fn fit(features: &[Vec<f64>]) -> Self {
        let n = features.len() as f64;
        let width = features.first().map_or(0, Vec::len);

        let mean: Vec<f64> = (0..width)
            .map(|j| features.iter().map(|r| r[j]).sum::<f64>() / n)
            .collect();
        let scale = (0..width)
            .map(|j| {
                let var = features.iter().map(|r| (r[j] - mean[j]).powi(2)).sum::<f64>() / n;
                let sd = var.sqrt();
                if sd > 1e-12 {
                    sd
                } else {
                    1.0
                }
            })
            .collect();

        Self { mean, scale }
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }

    pub fn transform(&self, features: &[Vec<f64>]) -> Vec<Vec<f64>> {
        features.iter().map(|r| self.transform_row(r)).collect()
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }
}

/// Logistic regression trained with full-batch gradient descent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub learning_rate: f64,
    pub epochs: usize,
    pub l2: f64,
    scaler: Standardizer,
    weights: Vec<f64>,
    bias: f64,
    fitted: bool,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LogisticRegression {
    pub fn new() -> Self {
        Self {
            learning_rate: 0.1,
            epochs: 500,
            l2: 1e-3,
            scaler: Standardizer::default(),
            weights: Vec::new(),
            bias: 0.0,
            fitted: false,
        }
    }

    fn decision(&self, row: &[f64]) -> f64 {
        self.bias + self.weights.iter().zip(row.iter()).map(|(w, x)| w * x).sum::<f64>()
    }
}

impl ProbabilisticClassifier for LogisticRegression {
    fn fit(&mut self, features: &[Vec<f64>], labels: &[Label]) -> Result<()> {
        let width = validate_training(self.name(), features, labels)?;
        self.scaler = Standardizer::fit(features);
        let x = self.scaler.transform(features);
        let y = targets(labels);
        let n = x.len() as f64;

        self.weights = vec![0.0; width];
        self.bias = 0.0;

        for _ in 0..self.epochs {
            let mut grad_w = vec![0.0; width];
            let mut grad_b = 0.0;
            for (row, target) in x.iter().zip(y.iter()) {
                let err = sigmoid(self.decision(row)) - target;
                for (g, xi) in grad_w.iter_mut().zip(row.iter()) {
                    *g += err * xi;
                }
                grad_b += err;
            }
            for (w, g) in self.weights.iter_mut().zip(grad_w.iter()) {
                *w -= self.learning_rate * (g / n + self.l2 * *w);
            }
            self.bias -= self.learning_rate * grad_b / n;
        }

        self.fitted = true;
        Ok(())
    }

    fn predict_proba(&self, features: &[Vec<f64>]) -> Result<ProbabilityMatrix> {
        if !self.fitted {
            return Err(classifier_error(self.name(), "predict called before fit"));
        }
        validate_width(self.name(), features, self.scaler.width())?;
        let p1: Vec<f64> = features
            .iter()
            .map(|r| sigmoid(self.decision(&self.scaler.transform_row(r))))
            .collect();
        ProbabilityMatrix::from_positive(&p1)
    }

    fn name(&self) -> &str {
        "LR"
    }

    fn description(&self) -> &str {
        "L2-regularized logistic regression"
    }
}

/// RBF-kernel SVM trained with kernelized Pegasos.
///
/// Decision values are mapped to probabilities with a Platt sigmoid fitted
/// on the training set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelSvm {
    pub lambda: f64,
    pub iterations: usize,
    /// RBF width; `1 / n_features` when `None`
    pub gamma: Option<f64>,
    seed: u64,
    scaler: Standardizer,
    support: Vec<Vec<f64>>,
    /// `alpha_i * y_i` for each support vector, y in {-1, 1}
    coefficients: Vec<f64>,
    gamma_fitted: f64,
    scale: f64,
    platt_a: f64,
    platt_b: f64,
    fitted: bool,
}

impl KernelSvm {
    pub fn new(seed: u64) -> Self {
        Self {
            lambda: 0.01,
            iterations: 2000,
            gamma: None,
            seed,
            scaler: Standardizer::default(),
            support: Vec::new(),
            coefficients: Vec::new(),
            gamma_fitted: 1.0,
            scale: 1.0,
            platt_a: -1.0,
            platt_b: 0.0,
            fitted: false,
        }
    }

    fn kernel(&self, a: &[f64], b: &[f64]) -> f64 {
        let dist: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
        (-self.gamma_fitted * dist).exp()
    }

    fn decision(&self, row: &[f64]) -> f64 {
        self.scale
            * self
                .support
                .iter()
                .zip(self.coefficients.iter())
                .map(|(sv, c)| c * self.kernel(sv, row))
                .sum::<f64>()
    }

    /// Fit `P(y=1|f) = 1 / (1 + exp(A f + B))` by gradient descent on
    /// log-loss with Platt's smoothed targets
    fn fit_platt(&mut self, decisions: &[f64], labels: &[Label]) {
        let n_pos = labels.iter().filter(|l| **l == Label::Positive).count() as f64;
        let n_neg = labels.len() as f64 - n_pos;
        let hi = (n_pos + 1.0) / (n_pos + 2.0);
        let lo = 1.0 / (n_neg + 2.0);
        let t: Vec<f64> = labels
            .iter()
            .map(|l| if *l == Label::Positive { hi } else { lo })
            .collect();

        let n = decisions.len() as f64;
        let (mut a, mut b) = (-1.0, 0.0);
        for _ in 0..500 {
            let (mut ga, mut gb) = (0.0, 0.0);
            for (f, ti) in decisions.iter().zip(t.iter()) {
                let p = sigmoid(-(a * f + b));
                // d/dA of log-loss = (t - p) * f, d/dB = (t - p)
                ga += (ti - p) * f;
                gb += ti - p;
            }
            a -= 0.5 * ga / n;
            b -= 0.5 * gb / n;
        }
        self.platt_a = a;
        self.platt_b = b;
    }
}

impl ProbabilisticClassifier for KernelSvm {
    fn fit(&mut self, features: &[Vec<f64>], labels: &[Label]) -> Result<()> {
        let width = validate_training(self.name(), features, labels)?;
        self.scaler = Standardizer::fit(features);
        let x = self.scaler.transform(features);
        let y: Vec<f64> = labels
            .iter()
            .map(|l| if *l == Label::Positive { 1.0 } else { -1.0 })
            .collect();
        self.gamma_fitted = self.gamma.unwrap_or(1.0 / width.max(1) as f64);

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut alpha = vec![0usize; x.len()];

        for t in 1..=self.iterations {
            let i = rng.gen_range(0..x.len());
            let margin: f64 = alpha
                .iter()
                .enumerate()
                .filter(|(_, a)| **a > 0)
                .map(|(j, a)| *a as f64 * y[j] * self.kernel(&x[j], &x[i]))
                .sum::<f64>()
                / (self.lambda * t as f64);
            if y[i] * margin < 1.0 {
                alpha[i] += 1;
            }
        }

        self.scale = 1.0 / (self.lambda * self.iterations.max(1) as f64);
        let kept: Vec<usize> = (0..x.len()).filter(|&i| alpha[i] > 0).collect();
        self.support = kept.iter().map(|&i| x[i].clone()).collect();
        self.coefficients = kept.iter().map(|&i| alpha[i] as f64 * y[i]).collect();

        let decisions: Vec<f64> = x.iter().map(|r| self.decision(r)).collect();
        self.fit_platt(&decisions, labels);

        tracing::debug!(support_vectors = self.support.len(), "kernel SVM fitted");
        self.fitted = true;
        Ok(())
    }

    fn predict_proba(&self, features: &[Vec<f64>]) -> Result<ProbabilityMatrix> {
        if !self.fitted {
            return Err(classifier_error(self.name(), "predict called before fit"));
        }
        validate_width(self.name(), features, self.scaler.width())?;
        let p1: Vec<f64> = features
            .iter()
            .map(|r| {
                let f = self.decision(&self.scaler.transform_row(r));
                sigmoid(-(self.platt_a * f + self.platt_b))
            })
            .collect();
        ProbabilityMatrix::from_positive(&p1)
    }

    fn name(&self) -> &str {
        "SVM"
    }

    fn description(&self) -> &str {
        "RBF-kernel SVM (Pegasos) with Platt scaling"
    }
}

/// Bagged variance-reduction trees with per-split feature subsampling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    seed: u64,
    width: usize,
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    pub fn new(seed: u64) -> Self {
        Self {
            n_trees: 100,
            max_depth: 8,
            min_samples_leaf: 1,
            seed,
            width: 0,
            trees: Vec::new(),
        }
    }
}

impl ProbabilisticClassifier for RandomForest {
    fn fit(&mut self, features: &[Vec<f64>], labels: &[Label]) -> Result<()> {
        self.width = validate_training(self.name(), features, labels)?;
        let grad: Vec<f64> = targets(labels).into_iter().map(|y| -y).collect();
        let hess = vec![1.0; labels.len()];
        let params = TreeParams {
            growth: TreeGrowth::DepthWise {
                max_depth: self.max_depth,
            },
            lambda: 0.0,
            min_samples_leaf: self.min_samples_leaf,
            min_child_weight: 0.0,
            max_features: Some((self.width as f64).sqrt().ceil() as usize),
        };

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let n = features.len();
        self.trees = (0..self.n_trees)
            .map(|_| {
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(features, &grad, &hess, bootstrap, params, &mut rng)
            })
            .collect();
        Ok(())
    }

    fn predict_proba(&self, features: &[Vec<f64>]) -> Result<ProbabilityMatrix> {
        if self.trees.is_empty() {
            return Err(classifier_error(self.name(), "predict called before fit"));
        }
        validate_width(self.name(), features, self.width)?;
        let n_trees = self.trees.len() as f64;
        let p1: Vec<f64> = features
            .iter()
            .map(|r| {
                let mean = self.trees.iter().map(|t| t.predict(r)).sum::<f64>() / n_trees;
                mean.clamp(0.0, 1.0)
            })
            .collect();
        ProbabilityMatrix::from_positive(&p1)
    }

    fn name(&self) -> &str {
        "RF"
    }

    fn description(&self) -> &str {
        "Random forest of bootstrapped trees"
    }
}

/// Gradient-boosted trees on log-loss with Newton leaf values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
    name: String,
    description: String,
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub tree: TreeParams,
    /// Fraction of rows sampled for each tree
    pub subsample: f64,
    seed: u64,
    width: usize,
    base_score: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoosting {
    /// Level-wise growth to depth 3, the "XGB" ensemble member
    pub fn depth_wise(seed: u64) -> Self {
        Self {
            name: "XGB".to_string(),
            description: "Gradient-boosted trees, depth-wise growth".to_string(),
            n_estimators: 100,
            learning_rate: 0.1,
            tree: TreeParams {
                growth: TreeGrowth::DepthWise { max_depth: 3 },
                lambda: 1.0,
                min_samples_leaf: 1,
                min_child_weight: 1.0,
                max_features: None,
            },
            subsample: 1.0,
            seed,
            width: 0,
            base_score: 0.0,
            trees: Vec::new(),
        }
    }

    /// Best-first growth to 15 leaves, the "LGBM" ensemble member
    pub fn leaf_wise(seed: u64) -> Self {
        Self {
            name: "LGBM".to_string(),
            description: "Gradient-boosted trees, leaf-wise growth".to_string(),
            n_estimators: 100,
            learning_rate: 0.1,
            tree: TreeParams {
                growth: TreeGrowth::LeafWise { max_leaves: 15 },
                lambda: 0.0,
                min_samples_leaf: 20,
                min_child_weight: 1e-3,
                max_features: None,
            },
            subsample: 0.8,
            seed,
            width: 0,
            base_score: 0.0,
            trees: Vec::new(),
        }
    }

    fn raw_score(&self, row: &[f64]) -> f64 {
        self.base_score + self.learning_rate * self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }
}

impl ProbabilisticClassifier for GradientBoosting {
    fn fit(&mut self, features: &[Vec<f64>], labels: &[Label]) -> Result<()> {
        self.width = validate_training(&self.name, features, labels)?;
        let y = targets(labels);
        let n = y.len();

        let rate = (y.iter().sum::<f64>() / n as f64).clamp(1e-6, 1.0 - 1e-6);
        self.base_score = (rate / (1.0 - rate)).ln();
        self.trees.clear();

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut scores = vec![self.base_score; n];

        for _ in 0..self.n_estimators {
            let mut grad = Vec::with_capacity(n);
            let mut hess = Vec::with_capacity(n);
            for (s, target) in scores.iter().zip(y.iter()) {
                let p = sigmoid(*s);
                grad.push(p - target);
                hess.push((p * (1.0 - p)).max(1e-12));
            }

            let rows: Vec<usize> = if self.subsample < 1.0 {
                (0..n).filter(|_| rng.gen_bool(self.subsample)).collect()
            } else {
                (0..n).collect()
            };
            if rows.is_empty() {
                continue;
            }

            let tree = RegressionTree::fit(features, &grad, &hess, rows, self.tree, &mut rng);
            for (s, row) in scores.iter_mut().zip(features.iter()) {
                *s += self.learning_rate * tree.predict(row);
            }
            self.trees.push(tree);
        }

        Ok(())
    }

    fn predict_proba(&self, features: &[Vec<f64>]) -> Result<ProbabilityMatrix> {
        if self.trees.is_empty() {
            return Err(classifier_error(&self.name, "predict called before fit"));
        }
        validate_width(&self.name, features, self.width)?;
        let p1: Vec<f64> = features.iter().map(|r| sigmoid(self.raw_score(r))).collect();
        ProbabilityMatrix::from_positive(&p1)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Names of the default ensemble, in fold order
pub const DEFAULT_ENSEMBLE: [&str; 5] = ["LR", "SVM", "RF", "XGB", "LGBM"];

/// Build one classifier by name (case-insensitive)
pub fn classifier_by_name(name: &str, seed: u64) -> Option<Box<dyn ProbabilisticClassifier>> {
    let model: Box<dyn ProbabilisticClassifier> = match name.to_ascii_uppercase().as_str() {
        "LR" => Box::new(LogisticRegression::new()),
        "SVM" => Box::new(KernelSvm::new(seed)),
        "RF" => Box::new(RandomForest::new(seed)),
        "XGB" => Box::new(GradientBoosting::depth_wise(seed)),
        "LGBM" => Box::new(GradientBoosting::leaf_wise(seed)),
        _ => return None,
    };
    Some(model)
}

/// Factory function to create the full ensemble in fold order
pub fn default_ensemble(seed: u64) -> Vec<Box<dyn ProbabilisticClassifier>> {
    DEFAULT_ENSEMBLE
        .iter()
        .filter_map(|name| classifier_by_name(name, seed))
        .collect()
}
