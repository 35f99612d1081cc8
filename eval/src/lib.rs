// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Evidential-reasoning fusion of binary classifier probabilities
//!
//! This crate provides:
//! - Dataset loading, seeded splits and per-classifier training sets
//! - Base classifiers (LR, kernel SVM, random forest, two boosting variants)
//! - Evaluation metrics (Accuracy, AUC, F1, per-class Brier scores)
//! - Reliability estimation (AUC-share weights, recall, specificity)
//! - Discounted belief masses and an order-dependent combination fold
//! - Reproducible fusion pipeline with seeded randomness

pub mod classifiers;
pub mod combiner;
pub mod datasets;
pub mod error;
pub mod evidence;
pub mod metrics;
pub mod pipeline;
pub mod probabilities;
pub mod reliability;
pub mod tree;

pub use classifiers::{default_ensemble, ProbabilisticClassifier};
pub use combiner::{CombinerConfig, EvidenceCombiner, FusedOutput, FusionContext, FusionDiagnostics};
pub use datasets::{Dataset, DatasetConfig, Label, Sample, TrainingSets};
pub use error::{FusionError, Result};
pub use evidence::{BeliefMass, Evidence};
pub use metrics::{compute_metrics, ConfusionMatrix, MetricsReport};
pub use pipeline::{FusionConfig, FusionPipeline, FusionResults};
pub use probabilities::{ClassifierOutputs, ProbabilityMatrix};
pub use reliability::{ReliabilityEstimator, ReliabilityProfile};
