// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Error type for the fusion core.
//!
//! Shape and label-set problems abort a run. Weighting and combination
//! degeneracies are not errors: they are recovered with fallbacks and
//! reported through [`crate::combiner::FusionDiagnostics`] and the
//! reliability profile.

use crate::datasets::Label;

/// Errors raised by the metric engine, reliability estimator and combiner
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FusionError {
    /// Only one class is present, so AUC is undefined
    #[error("degenerate label set in {context}: only {present:?} samples present")]
    DegenerateLabelSet { context: String, present: Label },

    /// Row/label counts disagree or a probability matrix is not N x 2
    #[error("shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    /// A probability outside [0, 1] or a row that does not sum to 1
    #[error("invalid probability {value} at row {row}")]
    InvalidProbability { row: usize, value: f64 },

    #[error("classifier '{0}' registered twice")]
    DuplicateClassifier(String),

    #[error("no classifiers to fuse")]
    EmptyEnsemble,

    /// Probability outputs do not line up with the reliability profile
    #[error("classifier outputs do not match reliability profile: {0}")]
    ProfileMismatch(String),

    #[error("classifier '{name}' failed: {message}")]
    Classifier { name: String, message: String },
}

impl FusionError {
    pub fn shape(context: impl Into<String>, expected: usize, found: usize) -> Self {
        FusionError::ShapeMismatch {
            context: context.into(),
            expected,
            found,
        }
    }
}

pub type Result<T> = std::result::Result<T, FusionError>;
