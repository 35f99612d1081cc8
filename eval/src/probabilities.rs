// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Classifier probability outputs
//!
//! A [`ProbabilityMatrix`] holds one classifier's `[P(class 0), P(class 1)]`
//! rows for a split. [`ClassifierOutputs`] keys matrices by classifier name
//! and keeps registration order, which is the order evidence is folded in.

use crate::error::{FusionError, Result};
use serde::{Deserialize, Serialize};

/// Tolerance for a row summing to 1
const ROW_SUM_TOLERANCE: f64 = 1e-6;

/// Two-column probability matrix, rows = samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityMatrix {
    rows: Vec<[f64; 2]>,
}

impl ProbabilityMatrix {
    /// Build from `[P(class 0), P(class 1)]` rows, validating each row
    pub fn new(rows: Vec<[f64; 2]>) -> Result<Self> {
        for (row, [p0, p1]) in rows.iter().enumerate() {
            for value in [*p0, *p1] {
                if !(0.0..=1.0).contains(&value) {
                    return Err(FusionError::InvalidProbability { row, value });
                }
            }
            if ((p0 + p1) - 1.0).abs() > ROW_SUM_TOLERANCE {
                return Err(FusionError::InvalidProbability { row, value: p0 + p1 });
            }
        }
        Ok(Self { rows })
    }

    /// Build from variable-width rows; anything but two columns is rejected
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let fixed = rows
            .iter()
            .map(|row| match row.as_slice() {
                [p0, p1] => Ok([*p0, *p1]),
                other => Err(FusionError::shape("probability matrix columns", 2, other.len())),
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(fixed)
    }

    /// Build from class-1 probabilities, filling column 0 with `1 - p1`
    pub fn from_positive(p1: &[f64]) -> Result<Self> {
        Self::new(p1.iter().map(|p| [1.0 - p, *p]).collect())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<[f64; 2]> {
        self.rows.get(index).copied()
    }

    pub fn rows(&self) -> &[[f64; 2]] {
        &self.rows
    }

    /// The class-1 column
    pub fn positive(&self) -> Vec<f64> {
        self.rows.iter().map(|[_, p1]| *p1).collect()
    }
}

/// Probability matrices keyed by unique classifier name, in registration order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierOutputs {
    entries: Vec<(String, ProbabilityMatrix)>,
}

impl ClassifierOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a classifier's matrix. Names must be unique and every matrix
    /// must have the same number of rows.
    pub fn insert(&mut self, name: impl Into<String>, matrix: ProbabilityMatrix) -> Result<()> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(FusionError::DuplicateClassifier(name));
        }
        if let Some(expected) = self.n_samples() {
            if matrix.len() != expected {
                return Err(FusionError::shape(
                    format!("outputs of '{}'", name),
                    expected,
                    matrix.len(),
                ));
            }
        }
        self.entries.push((name, matrix));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ProbabilityMatrix> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m)
    }

    /// Iterate in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ProbabilityMatrix)> {
        self.entries.iter().map(|(n, m)| (n.as_str(), m))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Number of classifiers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Row count shared by all matrices, `None` when empty
    pub fn n_samples(&self) -> Option<usize> {
        self.entries.first().map(|(_, m)| m.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_validation() {
        assert!(ProbabilityMatrix::new(vec![[0.3, 0.7], [1.0, 0.0]]).is_ok());

        let err = ProbabilityMatrix::new(vec![[0.3, 0.7], [1.2, -0.2]]).unwrap_err();
        assert!(matches!(err, FusionError::InvalidProbability { row: 1, .. }));

        let err = ProbabilityMatrix::new(vec![[0.3, 0.6]]).unwrap_err();
        assert!(matches!(err, FusionError::InvalidProbability { row: 0, .. }));
    }

    #[test]
    fn test_from_rows_rejects_wrong_column_count() {
        let err = ProbabilityMatrix::from_rows(&[vec![0.5, 0.5], vec![0.2, 0.3, 0.5]]).unwrap_err();
        assert_eq!(err, FusionError::shape("probability matrix columns", 2, 3));
    }

    #[test]
    fn test_from_positive() {
        let m = ProbabilityMatrix::from_positive(&[0.9, 0.25]).unwrap();
        assert_eq!(m.len(), 2);
        assert!((m.row(1).unwrap()[0] - 0.75).abs() < 1e-12);
        assert_eq!(m.positive(), vec![0.9, 0.25]);
    }

    #[test]
    fn test_outputs_keep_registration_order() {
        let mut outputs = ClassifierOutputs::new();
        for name in ["LR", "SVM", "RF"] {
            outputs
                .insert(name, ProbabilityMatrix::from_positive(&[0.1, 0.9]).unwrap())
                .unwrap();
        }
        assert_eq!(outputs.names(), vec!["LR", "SVM", "RF"]);
        assert_eq!(outputs.n_samples(), Some(2));
    }

    #[test]
    fn test_outputs_reject_duplicates_and_ragged_matrices() {
        let mut outputs = ClassifierOutputs::new();
        outputs
            .insert("LR", ProbabilityMatrix::from_positive(&[0.1, 0.9]).unwrap())
            .unwrap();

        let dup = outputs.insert("LR", ProbabilityMatrix::from_positive(&[0.1, 0.9]).unwrap());
        assert_eq!(dup.unwrap_err(), FusionError::DuplicateClassifier("LR".to_string()));

        let ragged = outputs.insert("RF", ProbabilityMatrix::from_positive(&[0.1]).unwrap());
        assert!(matches!(ragged.unwrap_err(), FusionError::ShapeMismatch { expected: 2, found: 1, .. }));
    }
}
