// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Evaluation metrics for binary classification
//!
//! Implements the metric engine used for reliability estimation and final
//! scoring:
//! - Confusion Matrix
//! - Accuracy, Precision, Recall, Specificity, F1-Score
//! - AUC-ROC (for probabilistic predictions)
//! - Class-conditional Brier scores (BS1 on positives, BS0 on negatives)

use crate::datasets::Label;
use crate::error::{FusionError, Result};
use crate::probabilities::ProbabilityMatrix;
use serde::{Deserialize, Serialize};

/// Decimal places kept in a [`MetricsReport`]
const REPORT_PRECISION: usize = 4;

/// Confusion matrix for binary classification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// True Positives
    pub tp: usize,
    /// True Negatives
    pub tn: usize,
    /// False Positives (negatives predicted as positive)
    pub fp: usize,
    /// False Negatives (positives predicted as negative)
    pub fn_: usize,
}

impl ConfusionMatrix {
    /// Create from predictions and ground truth labels
    pub fn from_predictions(predictions: &[Label], ground_truth: &[Label]) -> Result<Self> {
        if predictions.len() != ground_truth.len() {
            return Err(FusionError::shape("predicted labels", ground_truth.len(), predictions.len()));
        }

        let mut matrix = Self::default();

        for (pred, truth) in predictions.iter().zip(ground_truth.iter()) {
            match (pred, truth) {
                (Label::Positive, Label::Positive) => matrix.tp += 1,
                (Label::Negative, Label::Negative) => matrix.tn += 1,
                (Label::Positive, Label::Negative) => matrix.fp += 1,
                (Label::Negative, Label::Positive) => matrix.fn_ += 1,
            }
        }

        Ok(matrix)
    }

    /// Total number of samples
    pub fn total(&self) -> usize {
        self.tp + self.tn + self.fp + self.fn_
    }

    /// Accuracy: (TP + TN) / Total
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.tp + self.tn) as f64 / total as f64
    }

    /// Precision: TP / (TP + FP)
    pub fn precision(&self) -> f64 {
        let denom = self.tp + self.fp;
        if denom == 0 {
            return 0.0;
        }
        self.tp as f64 / denom as f64
    }

    /// Recall (Sensitivity): TP / (TP + FN), 0 when there are no positives
    pub fn recall(&self) -> f64 {
        let denom = self.tp + self.fn_;
        if denom == 0 {
            return 0.0;
        }
        self.tp as f64 / denom as f64
    }

    /// Specificity: TN / (TN + FP), 0 when there are no negatives
    pub fn specificity(&self) -> f64 {
        let denom = self.tn + self.fp;
        if denom == 0 {
            return 0.0;
        }
        self.tn as f64 / denom as f64
    }

    /// F1 Score: 2 * (Precision * Recall) / (Precision + Recall)
    pub fn f1_score(&self) -> f64 {
        let precision = self.precision();
        let recall = self.recall();
        let denom = precision + recall;
        if denom == 0.0 {
            return 0.0;
        }
        2.0 * precision * recall / denom
    }
}

/// Scalar metrics for one evaluation call, rounded to 4 decimals
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub accuracy: f64,
    pub auc: f64,
    pub f1: f64,
    /// Mean (P1 - 1)^2 over true positives
    pub bs1: f64,
    /// Mean P1^2 over true negatives
    pub bs0: f64,
}

impl MetricsReport {
    /// Format as a single human-readable line
    pub fn format(&self) -> String {
        format!(
            "Accuracy={:.4} AUC={:.4} F1={:.4} BS1={:.4} BS0={:.4}",
            self.accuracy, self.auc, self.f1, self.bs1, self.bs0
        )
    }
}

/// Score predicted labels and probabilities against ground truth.
///
/// Fails with [`FusionError::DegenerateLabelSet`] when the ground truth holds
/// a single class, since AUC is undefined there.
pub fn compute_metrics(
    ground_truth: &[Label],
    predictions: &[Label],
    probabilities: &ProbabilityMatrix,
) -> Result<MetricsReport> {
    if probabilities.len() != ground_truth.len() {
        return Err(FusionError::shape("probability rows", ground_truth.len(), probabilities.len()));
    }

    let scores = probabilities.positive();
    let auc = roc_auc(ground_truth, &scores)?;
    let cm = ConfusionMatrix::from_predictions(predictions, ground_truth)?;
    let (bs1, bs0) = class_brier_scores(ground_truth, &scores);

    Ok(MetricsReport {
        accuracy: round_to(cm.accuracy(), REPORT_PRECISION),
        auc: round_to(auc, REPORT_PRECISION),
        f1: round_to(cm.f1_score(), REPORT_PRECISION),
        bs1: round_to(bs1, REPORT_PRECISION),
        bs0: round_to(bs0, REPORT_PRECISION),
    })
}

/// Score class-1 probabilities, deriving labels with a decision threshold
pub fn compute_metrics_thresholded(
    ground_truth: &[Label],
    positive_probabilities: &[f64],
    threshold: f64,
) -> Result<MetricsReport> {
    let probabilities = ProbabilityMatrix::from_positive(positive_probabilities)?;
    let predictions = threshold_labels(positive_probabilities, threshold);
    compute_metrics(ground_truth, &predictions, &probabilities)
}

/// Label 1 iff `p1 >= threshold`
pub fn threshold_labels(positive_probabilities: &[f64], threshold: f64) -> Vec<Label> {
    positive_probabilities
        .iter()
        .map(|p| Label::from_probability(*p, threshold))
        .collect()
}

/// Fail when `labels` does not contain both classes
pub fn ensure_both_classes(labels: &[Label], context: &str) -> Result<()> {
    let has_positive = labels.iter().any(|l| *l == Label::Positive);
    let has_negative = labels.iter().any(|l| *l == Label::Negative);
    match (has_positive, has_negative) {
        (true, true) => Ok(()),
        (true, false) => Err(FusionError::DegenerateLabelSet {
            context: context.to_string(),
            present: Label::Positive,
        }),
        _ => Err(FusionError::DegenerateLabelSet {
            context: context.to_string(),
            present: Label::Negative,
        }),
    }
}

/// Calculate AUC-ROC using the trapezoidal rule.
///
/// Samples with equal scores form a single ROC step, so ties earn half
/// credit. Non-finite scores fail with [`FusionError::InvalidProbability`].
pub fn roc_auc(ground_truth: &[Label], scores: &[f64]) -> Result<f64> {
    if scores.len() != ground_truth.len() {
        return Err(FusionError::shape("scores", ground_truth.len(), scores.len()));
    }
    if let Some((row, value)) = scores.iter().enumerate().find(|(_, s)| !s.is_finite()) {
        return Err(FusionError::InvalidProbability { row, value: *value });
    }
    ensure_both_classes(ground_truth, "AUC ground truth")?;

    // Sort by score descending
    let mut pairs: Vec<(Label, f64)> = ground_truth.iter().copied().zip(scores.iter().copied()).collect();
    pairs.sort_by(|a, b| b.1.total_cmp(&a.1));

    let n_pos = pairs.iter().filter(|(l, _)| *l == Label::Positive).count() as f64;
    let n_neg = pairs.len() as f64 - n_pos;

    let mut tp = 0.0;
    let mut fp = 0.0;
    let mut tpr_prev = 0.0;
    let mut fpr_prev = 0.0;
    let mut auc = 0.0;

    let mut i = 0;
    while i < pairs.len() {
        let threshold = pairs[i].1;
        while i < pairs.len() && pairs[i].1 == threshold {
            if pairs[i].0 == Label::Positive {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            i += 1;
        }

        let tpr = tp / n_pos;
        let fpr = fp / n_neg;
        auc += (fpr - fpr_prev) * (tpr + tpr_prev) / 2.0;
        tpr_prev = tpr;
        fpr_prev = fpr;
    }

    Ok(auc)
}

/// Class-conditional Brier scores `(BS1, BS0)`; a missing class scores 0
fn class_brier_scores(ground_truth: &[Label], scores: &[f64]) -> (f64, f64) {
    let mut sum1 = 0.0;
    let mut n1 = 0usize;
    let mut sum0 = 0.0;
    let mut n0 = 0usize;

    for (label, p1) in ground_truth.iter().zip(scores.iter()) {
        match label {
            Label::Positive => {
                sum1 += (p1 - 1.0).powi(2);
                n1 += 1;
            }
            Label::Negative => {
                sum0 += p1.powi(2);
                n0 += 1;
            }
        }
    }

    let mean = |sum: f64, n: usize| if n == 0 { 0.0 } else { sum / n as f64 };
    (mean(sum1, n1), mean(sum0, n0))
}

/// Round the exact decimal value of the stored double. Scaling by
/// `10^places` first can land on a spurious half and round the wrong way.
fn round_to(value: f64, places: usize) -> f64 {
    format!("{:.*}", places, value).parse().unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    use Label::{Negative as N, Positive as P};

    #[test]
    fn test_confusion_matrix_perfect() {
        let predictions = vec![P, P, N, N];
        let ground_truth = vec![P, P, N, N];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth).unwrap();

        assert_eq!(cm.tp, 2);
        assert_eq!(cm.tn, 2);
        assert_eq!(cm.fp, 0);
        assert_eq!(cm.fn_, 0);
        assert!((cm.accuracy() - 1.0).abs() < 1e-6);
        assert!((cm.f1_score() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_confusion_matrix_zero_defaults() {
        // No positives in ground truth: recall defaults to 0
        let cm = ConfusionMatrix::from_predictions(&[N, P], &[N, N]).unwrap();
        assert_eq!(cm.recall(), 0.0);
        assert!((cm.specificity() - 0.5).abs() < 1e-12);
        assert_eq!(cm.f1_score(), 0.0);

        // No negatives: specificity defaults to 0
        let cm = ConfusionMatrix::from_predictions(&[P], &[P]).unwrap();
        assert_eq!(cm.specificity(), 0.0);
    }

    #[test]
    fn test_confusion_matrix_length_mismatch() {
        let err = ConfusionMatrix::from_predictions(&[P], &[P, N]).unwrap_err();
        assert_eq!(err, FusionError::shape("predicted labels", 2, 1));
    }

    #[test]
    fn test_auc_roc_perfect() {
        let auc = roc_auc(&[P, P, N, N], &[0.9, 0.8, 0.2, 0.1]).unwrap();
        assert!((auc - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_auc_roc_inverted() {
        let auc = roc_auc(&[P, P, N, N], &[0.1, 0.2, 0.8, 0.9]).unwrap();
        assert!(auc.abs() < 1e-12);
    }

    #[test]
    fn test_auc_roc_constant_scores() {
        // A constant-probability classifier sits on the diagonal
        let auc = roc_auc(&[P, N, P, N], &[0.5; 4]).unwrap();
        assert!((auc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_auc_roc_ties_get_half_credit() {
        // Pairs: (0.8 vs 0.4) win, (0.8 vs 0.8) tie, (0.3 vs 0.4) loss, (0.3 vs 0.8) loss
        let auc = roc_auc(&[P, P, N, N], &[0.8, 0.3, 0.8, 0.4]).unwrap();
        assert!((auc - 0.375).abs() < 1e-12);
    }

    #[test]
    fn test_auc_roc_rejects_non_finite_scores() {
        let err = roc_auc(&[P, N], &[f64::NAN, 0.2]).unwrap_err();
        assert!(matches!(err, FusionError::InvalidProbability { row: 0, .. }));

        let err = roc_auc(&[P, N, N], &[0.9, 0.1, f64::INFINITY]).unwrap_err();
        assert!(matches!(err, FusionError::InvalidProbability { row: 2, .. }));
    }

    #[test]
    fn test_round_to_uses_stored_decimal_value() {
        // 2.67535 is stored just below the tie, and 2.67535 * 1e4 == 26753.5
        assert_eq!(round_to(2.67535, 4), 2.6753);
        assert_eq!(round_to(1.00005, 4), 1.0001);
        assert_eq!(round_to(2.0 / 3.0, 4), 0.6667);
    }

    #[test]
    fn test_auc_roc_degenerate_labels() {
        let err = roc_auc(&[P, P], &[0.4, 0.6]).unwrap_err();
        assert!(matches!(err, FusionError::DegenerateLabelSet { present: Label::Positive, .. }));

        let err = roc_auc(&[N], &[0.4]).unwrap_err();
        assert!(matches!(err, FusionError::DegenerateLabelSet { present: Label::Negative, .. }));
    }

    #[test]
    fn test_metrics_perfect_separation() {
        let truth = vec![P, P, N, N, N];
        let probs = ProbabilityMatrix::from_positive(&[1.0, 1.0, 0.0, 0.0, 0.0]).unwrap();

        let report = compute_metrics(&truth, &truth, &probs).unwrap();

        assert_eq!(report.accuracy, 1.0);
        assert_eq!(report.auc, 1.0);
        assert_eq!(report.f1, 1.0);
        assert_eq!(report.bs1, 0.0);
        assert_eq!(report.bs0, 0.0);
    }

    #[test]
    fn test_metrics_brier_scores_are_class_conditional() {
        let truth = vec![P, P, N, N];
        let p1 = [0.8, 0.6, 0.1, 0.3];
        let report = compute_metrics_thresholded(&truth, &p1, 0.5).unwrap();

        // BS1 = ((0.2)^2 + (0.4)^2) / 2, BS0 = ((0.1)^2 + (0.3)^2) / 2
        assert!((report.bs1 - 0.1).abs() < 1e-12);
        assert!((report.bs0 - 0.05).abs() < 1e-12);
        assert_eq!(report.accuracy, 1.0);
    }

    #[test]
    fn test_metrics_are_rounded() {
        let truth = vec![P, N, N];
        let p1 = [0.6, 0.55, 0.2];
        let report = compute_metrics_thresholded(&truth, &p1, 0.5).unwrap();

        // accuracy 2/3, precision 1/2, recall 1
        assert_eq!(report.accuracy, 0.6667);
        assert_eq!(report.f1, 0.6667);
        assert_eq!(report.bs1, 0.16);
    }

    #[test]
    fn test_metrics_shape_mismatch() {
        let probs = ProbabilityMatrix::from_positive(&[0.2, 0.9]).unwrap();
        let err = compute_metrics(&[P, N, N], &[P, N, N], &probs).unwrap_err();
        assert!(matches!(err, FusionError::ShapeMismatch { expected: 3, found: 2, .. }));
    }

    #[test]
    fn test_report_format() {
        let report = MetricsReport {
            accuracy: 0.9,
            auc: 0.95,
            f1: 0.8,
            bs1: 0.1,
            bs0: 0.05,
        };
        let formatted = report.format();
        assert!(formatted.contains("AUC=0.9500"));
        assert!(formatted.contains("BS0=0.0500"));
    }
}
