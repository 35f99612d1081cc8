// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Validation-set reliability of each classifier
//!
//! Every classifier is scored on the validation split (AUC, recall,
//! specificity). Weights are each classifier's share of the summed AUC, or
//! uniform when that sum is not positive.

use crate::datasets::Label;
use crate::error::{FusionError, Result};
use crate::metrics::{ensure_both_classes, roc_auc, ConfusionMatrix};
use crate::probabilities::{ClassifierOutputs, ProbabilityMatrix};
use serde::{Deserialize, Serialize};

/// Validation scores for one classifier, before weighting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifierReliability {
    pub auc: f64,
    pub recall: f64,
    pub specificity: f64,
}

/// One row of the reliability table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityEntry {
    pub name: String,
    pub weight: f64,
    pub recall: f64,
    pub specificity: f64,
    pub auc: f64,
}

/// Per-classifier reliability in registration order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityProfile {
    entries: Vec<ReliabilityEntry>,
    /// Set when the summed AUC was not positive and weights are uniform
    pub uniform_fallback: bool,
}

/// Scores classifiers on validation data
#[derive(Debug, Clone, Copy, Default)]
pub struct ReliabilityEstimator;

impl ReliabilityEstimator {
    pub fn new() -> Self {
        Self
    }

    /// Score one classifier's validation probabilities.
    ///
    /// The predicted label is the argmax of the two columns, with ties going
    /// to class 1.
    pub fn estimate(
        &self,
        name: &str,
        ground_truth: &[Label],
        probabilities: &ProbabilityMatrix,
    ) -> Result<ClassifierReliability> {
        if probabilities.len() != ground_truth.len() {
            return Err(FusionError::shape(
                format!("validation outputs of '{}'", name),
                ground_truth.len(),
                probabilities.len(),
            ));
        }
        ensure_both_classes(ground_truth, &format!("validation labels for '{}'", name))?;

        let predictions: Vec<Label> = probabilities
            .rows()
            .iter()
            .map(|[p0, p1]| if p1 >= p0 { Label::Positive } else { Label::Negative })
            .collect();

        let auc = roc_auc(ground_truth, &probabilities.positive())?;
        let cm = ConfusionMatrix::from_predictions(&predictions, ground_truth)?;

        let reliability = ClassifierReliability {
            auc,
            recall: cm.recall(),
            specificity: cm.specificity(),
        };

        tracing::debug!(
            classifier = name,
            auc = reliability.auc,
            recall = reliability.recall,
            specificity = reliability.specificity,
            "validation reliability"
        );

        Ok(reliability)
    }

    /// Turn raw scores into a profile with AUC-share weights.
    ///
    /// Falls back to `1/n` for every classifier when the summed AUC is not
    /// positive.
    pub fn normalize(&self, scored: Vec<(String, ClassifierReliability)>) -> Result<ReliabilityProfile> {
        if scored.is_empty() {
            return Err(FusionError::EmptyEnsemble);
        }

        let total_auc: f64 = scored.iter().map(|(_, r)| r.auc).sum();
        let uniform_fallback = total_auc <= 0.0;
        let uniform = 1.0 / scored.len() as f64;

        if uniform_fallback {
            tracing::warn!(
                classifiers = scored.len(),
                "total validation AUC is not positive, using uniform weight {:.4}",
                uniform
            );
        }

        let entries = scored
            .into_iter()
            .map(|(name, r)| ReliabilityEntry {
                name,
                weight: if uniform_fallback { uniform } else { r.auc / total_auc },
                recall: r.recall,
                specificity: r.specificity,
                auc: r.auc,
            })
            .collect();

        Ok(ReliabilityProfile {
            entries,
            uniform_fallback,
        })
    }
}

impl ReliabilityProfile {
    /// Score and weight every classifier in `outputs`, keeping its order
    pub fn from_validation(ground_truth: &[Label], outputs: &ClassifierOutputs) -> Result<Self> {
        let estimator = ReliabilityEstimator::new();
        let scored = outputs
            .iter()
            .map(|(name, matrix)| {
                estimator
                    .estimate(name, ground_truth, matrix)
                    .map(|r| (name.to_string(), r))
            })
            .collect::<Result<Vec<_>>>()?;
        estimator.normalize(scored)
    }

    pub fn entries(&self) -> &[ReliabilityEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&ReliabilityEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all weights
    pub fn total_weight(&self) -> f64 {
        self.entries.iter().map(|e| e.weight).sum()
    }

    /// Format as a table with columns Weight, Recall, Specificity, AUC
    pub fn format(&self) -> String {
        let mut out = format!(
            "{:<10} {:>8} {:>8} {:>12} {:>8}\n",
            "Model", "Weight", "Recall", "Specificity", "AUC"
        );
        for e in &self.entries {
            out.push_str(&format!(
                "{:<10} {:>8.4} {:>8.4} {:>12.4} {:>8.4}\n",
                e.name, e.weight, e.recall, e.specificity, e.auc
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use Label::{Negative as N, Positive as P};

    fn outputs(columns: &[(&str, &[f64])]) -> ClassifierOutputs {
        let mut outputs = ClassifierOutputs::new();
        for (name, p1) in columns {
            outputs
                .insert(*name, ProbabilityMatrix::from_positive(p1).unwrap())
                .unwrap();
        }
        outputs
    }

    #[test]
    fn test_estimate_recall_and_specificity() {
        let truth = vec![P, P, P, N, N];
        let probs = ProbabilityMatrix::from_positive(&[0.9, 0.6, 0.4, 0.3, 0.7]).unwrap();

        let r = ReliabilityEstimator::new().estimate("LR", &truth, &probs).unwrap();

        assert!((r.recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((r.specificity - 0.5).abs() < 1e-12);
        assert!(r.auc > 0.5 && r.auc < 1.0);
    }

    #[test]
    fn test_estimate_argmax_tie_predicts_positive() {
        let truth = vec![P, N];
        let probs = ProbabilityMatrix::from_positive(&[0.5, 0.5]).unwrap();

        let r = ReliabilityEstimator::new().estimate("tie", &truth, &probs).unwrap();
        assert_eq!(r.recall, 1.0);
        assert_eq!(r.specificity, 0.0);
    }

    #[test]
    fn test_estimate_rejects_single_class_validation() {
        let probs = ProbabilityMatrix::from_positive(&[0.9, 0.1]).unwrap();
        let err = ReliabilityEstimator::new().estimate("RF", &[N, N], &probs).unwrap_err();
        assert!(matches!(err, FusionError::DegenerateLabelSet { present: Label::Negative, .. }));
    }

    #[test]
    fn test_estimate_rejects_row_mismatch() {
        let probs = ProbabilityMatrix::from_positive(&[0.9, 0.1]).unwrap();
        let err = ReliabilityEstimator::new().estimate("RF", &[P, N, N], &probs).unwrap_err();
        assert!(matches!(err, FusionError::ShapeMismatch { expected: 3, found: 2, .. }));
    }

    #[test]
    fn test_weights_sum_to_one() {
        let truth = vec![P, P, N, N];
        let outputs = outputs(&[
            ("LR", &[0.9, 0.8, 0.2, 0.1]),
            ("SVM", &[0.6, 0.4, 0.5, 0.3]),
            ("RF", &[0.7, 0.2, 0.6, 0.1]),
        ]);

        let profile = ReliabilityProfile::from_validation(&truth, &outputs).unwrap();

        assert!(!profile.uniform_fallback);
        assert!((profile.total_weight() - 1.0).abs() < 1e-9);
        let names: Vec<_> = profile.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["LR", "SVM", "RF"]);

        // weight is the AUC share
        let lr = profile.get("LR").unwrap();
        let total_auc: f64 = profile.entries().iter().map(|e| e.auc).sum();
        assert!((lr.weight - lr.auc / total_auc).abs() < 1e-12);
    }

    #[test]
    fn test_zero_auc_falls_back_to_uniform() {
        // Every classifier ranks all negatives above all positives
        let truth = vec![P, P, N, N];
        let inverted: &[f64] = &[0.1, 0.2, 0.8, 0.9];
        let outputs = outputs(&[
            ("LR", inverted),
            ("SVM", inverted),
            ("RF", inverted),
            ("XGB", inverted),
        ]);

        let profile = ReliabilityProfile::from_validation(&truth, &outputs).unwrap();

        assert!(profile.uniform_fallback);
        for entry in profile.entries() {
            assert_eq!(entry.auc, 0.0);
            assert_eq!(entry.weight, 0.25);
        }
    }

    #[test]
    fn test_normalize_empty_ensemble() {
        let err = ReliabilityEstimator::new().normalize(Vec::new()).unwrap_err();
        assert_eq!(err, FusionError::EmptyEnsemble);
    }

    #[test]
    fn test_profile_format() {
        let truth = vec![P, N];
        let outputs = outputs(&[("LR", &[0.9, 0.1])]);
        let profile = ReliabilityProfile::from_validation(&truth, &outputs).unwrap();

        let table = profile.format();
        assert!(table.contains("Specificity"));
        assert!(table.contains("LR"));
        assert!(table.contains("1.0000"));
    }

    proptest! {
        #[test]
        fn test_weights_sum_to_one_for_any_ensemble(
            columns in prop::collection::vec(prop::collection::vec(0.0f64..=1.0, 6), 1..8),
        ) {
            let truth = vec![P, P, P, N, N, N];
            let mut outputs = ClassifierOutputs::new();
            for (i, p1) in columns.iter().enumerate() {
                outputs
                    .insert(format!("C{}", i), ProbabilityMatrix::from_positive(p1).unwrap())
                    .unwrap();
            }

            let profile = ReliabilityProfile::from_validation(&truth, &outputs).unwrap();

            prop_assert_eq!(profile.len(), columns.len());
            prop_assert!((profile.total_weight() - 1.0).abs() < 1e-9);
            prop_assert!(profile.entries().iter().all(|e| (0.0..=1.0).contains(&e.weight)));
        }
    }
}
