// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Per-sample evidence fusion across classifiers
//!
//! For each sample the combiner builds one [`BeliefMass`] per classifier and
//! folds them left to right in registration order, starting from the first
//! classifier's mass. Samples are independent and may be fused in parallel;
//! the per-sample fold order never changes, so parallel and sequential runs
//! produce identical output.

use crate::error::{FusionError, Result};
use crate::evidence::{BeliefMass, Evidence};
use crate::probabilities::ClassifierOutputs;
use crate::reliability::ReliabilityProfile;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Combiner settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CombinerConfig {
    /// Fuse samples on the rayon thread pool
    pub parallel: bool,
}

impl Default for CombinerConfig {
    fn default() -> Self {
        Self { parallel: true }
    }
}

/// Degeneracies observed while fusing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionDiagnostics {
    /// Samples fused
    pub samples: usize,
    /// Fold steps whose combined total was not positive
    pub degenerate_renormalizations: usize,
    /// Samples that fell back to 0.5 because `m1 + m0` was not positive
    pub neutral_fallbacks: usize,
}

impl FusionDiagnostics {
    pub fn is_clean(&self) -> bool {
        self.degenerate_renormalizations == 0 && self.neutral_fallbacks == 0
    }
}

/// Run-scoped state shared by every fusion pass of one run.
///
/// Holds the reliability profile (read-only) and running totals of the
/// degeneracies seen across passes.
#[derive(Debug)]
pub struct FusionContext {
    profile: ReliabilityProfile,
    samples: AtomicUsize,
    degenerate_renormalizations: AtomicUsize,
    neutral_fallbacks: AtomicUsize,
}

impl FusionContext {
    pub fn new(profile: ReliabilityProfile) -> Self {
        Self {
            profile,
            samples: AtomicUsize::new(0),
            degenerate_renormalizations: AtomicUsize::new(0),
            neutral_fallbacks: AtomicUsize::new(0),
        }
    }

    pub fn profile(&self) -> &ReliabilityProfile {
        &self.profile
    }

    fn record(&self, pass: &FusionDiagnostics) {
        self.samples.fetch_add(pass.samples, Ordering::Relaxed);
        self.degenerate_renormalizations
            .fetch_add(pass.degenerate_renormalizations, Ordering::Relaxed);
        self.neutral_fallbacks.fetch_add(pass.neutral_fallbacks, Ordering::Relaxed);
    }

    /// Totals over every pass run with this context
    pub fn diagnostics(&self) -> FusionDiagnostics {
        FusionDiagnostics {
            samples: self.samples.load(Ordering::Relaxed),
            degenerate_renormalizations: self.degenerate_renormalizations.load(Ordering::Relaxed),
            neutral_fallbacks: self.neutral_fallbacks.load(Ordering::Relaxed),
        }
    }
}

/// Result of fusing one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleFusion {
    /// Final accumulated masses
    pub mass: BeliefMass,
    /// Fused probability of class 1
    pub probability: f64,
    /// Fold steps left unnormalized
    pub degenerate_steps: usize,
    /// True when `probability` is the 0.5 fallback
    pub neutral_fallback: bool,
}

/// Fused probabilities for a split, in sample order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedOutput {
    pub probabilities: Vec<f64>,
    pub diagnostics: FusionDiagnostics,
}

/// Folds per-classifier evidence into one probability per sample
#[derive(Debug, Clone, Copy, Default)]
pub struct EvidenceCombiner {
    config: CombinerConfig,
}

impl EvidenceCombiner {
    pub fn new(config: CombinerConfig) -> Self {
        Self { config }
    }

    /// Fold one sample's evidence in slice order.
    ///
    /// The first element seeds the accumulator; its recall and specificity
    /// are never used. A single element is returned as is. An empty slice
    /// gives the neutral 0.5.
    pub fn combine_sample(evidence: &[Evidence]) -> SampleFusion {
        let Some((first, rest)) = evidence.split_first() else {
            return SampleFusion {
                mass: BeliefMass::vacuous(),
                probability: 0.5,
                degenerate_steps: 0,
                neutral_fallback: true,
            };
        };

        let (mass, degenerate_steps) = rest.iter().fold((first.mass, 0usize), |(acc, degenerate), next| {
            let step = acc.combine(&next.mass, next.recall, next.specificity);
            (step.mass, degenerate + usize::from(!step.renormalized))
        });

        let committed = mass.committed_probability();
        SampleFusion {
            mass,
            probability: committed.unwrap_or(0.5),
            degenerate_steps,
            neutral_fallback: committed.is_none(),
        }
    }

    /// Fuse every sample of a split.
    ///
    /// `outputs` must list exactly the profile's classifiers in the profile's
    /// order.
    pub fn fuse(&self, context: &FusionContext, outputs: &ClassifierOutputs) -> Result<FusedOutput> {
        let profile = context.profile();
        if outputs.is_empty() {
            return Err(FusionError::EmptyEnsemble);
        }
        let expected: Vec<&str> = profile.entries().iter().map(|e| e.name.as_str()).collect();
        if outputs.names() != expected {
            return Err(FusionError::ProfileMismatch(format!(
                "profile has {:?}, outputs have {:?}",
                expected,
                outputs.names()
            )));
        }

        let columns: Vec<_> = profile
            .entries()
            .iter()
            .zip(outputs.iter())
            .map(|(entry, (_, matrix))| (entry, matrix))
            .collect();
        let n_samples = outputs.n_samples().unwrap_or(0);

        let degenerate_renormalizations = AtomicUsize::new(0);
        let neutral_fallbacks = AtomicUsize::new(0);

        let fuse_one = |i: usize| -> f64 {
            let evidence: Vec<Evidence> = columns
                .iter()
                .map(|(entry, matrix)| {
                    let [p0, p1] = matrix.rows()[i];
                    Evidence {
                        mass: BeliefMass::from_prediction(p1, p0, entry.weight, entry.recall, entry.specificity),
                        recall: entry.recall,
                        specificity: entry.specificity,
                    }
                })
                .collect();

            let fused = Self::combine_sample(&evidence);
            if fused.degenerate_steps > 0 {
                degenerate_renormalizations.fetch_add(fused.degenerate_steps, Ordering::Relaxed);
            }
            if fused.neutral_fallback {
                neutral_fallbacks.fetch_add(1, Ordering::Relaxed);
            }
            fused.probability
        };

        let probabilities: Vec<f64> = if self.config.parallel {
            (0..n_samples).into_par_iter().map(fuse_one).collect()
        } else {
            (0..n_samples).map(fuse_one).collect()
        };

        let diagnostics = FusionDiagnostics {
            samples: n_samples,
            degenerate_renormalizations: degenerate_renormalizations.load(Ordering::Relaxed),
            neutral_fallbacks: neutral_fallbacks.load(Ordering::Relaxed),
        };
        context.record(&diagnostics);

        if !diagnostics.is_clean() {
            tracing::warn!(
                samples = diagnostics.samples,
                degenerate_renormalizations = diagnostics.degenerate_renormalizations,
                neutral_fallbacks = diagnostics.neutral_fallbacks,
                "degenerate evidence combinations recovered with fallbacks"
            );
        }

        Ok(FusedOutput {
            probabilities,
            diagnostics,
        })
    }
}
