// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Discounted belief masses and the pairwise combination rule
//!
//! A classifier's class probabilities become a mass triple over the frame
//! {class 1, class 0} plus an uncertainty mass on the whole frame:
//!
//! ```text
//! w1 = w / (1 + w - recall)        (w when the denominator is 0)
//! w0 = w / (1 + w - specificity)   (w when the denominator is 0)
//! m1 = w1 * p1,  m0 = w0 * p0,  mu = max(0, 1 - m1 - m0)
//! ```
//!
//! Two triples combine with a reliability-discounted variant of Dempster's
//! rule (see [`BeliefMass::combine`]). The step is not commutative: the
//! incoming classifier's recall and specificity discount the accumulated
//! masses, so fold order changes intermediate values.

use serde::{Deserialize, Serialize};

/// Mass triple over {class 1, class 0, uncertain}
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeliefMass {
    /// Mass supporting class 1
    pub m1: f64,
    /// Mass supporting class 0
    pub m0: f64,
    /// Uncommitted mass
    pub mu: f64,
}

/// One fold step's output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Combination {
    pub mass: BeliefMass,
    /// False when the combined total was not positive and the masses were
    /// left unnormalized
    pub renormalized: bool,
}

/// A classifier's mass for one sample, with the recall and specificity it
/// contributes when folded into an accumulator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evidence {
    pub mass: BeliefMass,
    pub recall: f64,
    pub specificity: f64,
}

impl BeliefMass {
    pub fn new(m1: f64, m0: f64, mu: f64) -> Self {
        Self { m1, m0, mu }
    }

    /// All mass on "uncertain"
    pub fn vacuous() -> Self {
        Self::new(0.0, 0.0, 1.0)
    }

    /// Build a discounted mass from one classifier's prediction for a sample
    pub fn from_prediction(p1: f64, p0: f64, weight: f64, recall: f64, specificity: f64) -> Self {
        let w1 = discount(weight, recall);
        let w0 = discount(weight, specificity);

        let m1 = w1 * p1;
        let m0 = w0 * p0;

        Self {
            m1,
            m0,
            mu: (1.0 - (m1 + m0)).max(0.0),
        }
    }

    pub fn total(&self) -> f64 {
        self.m1 + self.m0 + self.mu
    }

    /// Fold `next` into this accumulator.
    ///
    /// ```text
    /// m1 = (1 - recall_next) * m1 + mu * next.m1 + m1 * next.m1
    /// m0 = (1 - specificity_next) * m0 + mu * next.m0 + m0 * next.m0
    /// mu = mu * next.mu + m1 * next.m0 + m0 * next.m1
    /// ```
    ///
    /// The result is divided by its total when that total is positive.
    pub fn combine(&self, next: &BeliefMass, recall_next: f64, specificity_next: f64) -> Combination {
        let m1 = (1.0 - recall_next) * self.m1 + self.mu * next.m1 + self.m1 * next.m1;
        let m0 = (1.0 - specificity_next) * self.m0 + self.mu * next.m0 + self.m0 * next.m0;
        let mu = self.mu * next.mu + self.m1 * next.m0 + self.m0 * next.m1;

        let total = m1 + m0 + mu;
        if total > 0.0 {
            Combination {
                mass: Self::new(m1 / total, m0 / total, mu / total),
                renormalized: true,
            }
        } else {
            Combination {
                mass: Self::new(m1, m0, mu),
                renormalized: false,
            }
        }
    }

    /// Probability of class 1 from the committed masses, `None` when
    /// `m1 + m0` is not positive
    pub fn committed_probability(&self) -> Option<f64> {
        let committed = self.m1 + self.m0;
        if committed > 0.0 {
            Some(self.m1 / committed)
        } else {
            None
        }
    }

    /// [`committed_probability`](Self::committed_probability) with the
    /// neutral 0.5 fallback
    pub fn fused_probability(&self) -> f64 {
        self.committed_probability().unwrap_or(0.5)
    }
}

fn discount(weight: f64, rate: f64) -> f64 {
    let denom = 1.0 + weight - rate;
    if denom != 0.0 {
        weight / denom
    } else {
        weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn unit() -> impl Strategy<Value = f64> {
        0.0f64..=1.0
    }

    #[test]
    fn test_from_prediction_formula() {
        // w = 0.25, recall 0.75 -> w1 = 0.25 / 0.5 = 0.5
        // specificity 0.25 -> w0 = 0.25 / 1.0 = 0.25
        let mass = BeliefMass::from_prediction(0.8, 0.2, 0.25, 0.75, 0.25);
        assert!((mass.m1 - 0.4).abs() < 1e-12);
        assert!((mass.m0 - 0.05).abs() < 1e-12);
        assert!((mass.mu - 0.55).abs() < 1e-12);
    }

    #[test]
    fn test_from_prediction_zero_denominator_uses_raw_weight() {
        // 1 + w - r == 0 only when r = 1 + w; use a rate above 1 to hit it
        let mass = BeliefMass::from_prediction(0.6, 0.4, 0.5, 1.5, 1.5);
        assert!((mass.m1 - 0.3).abs() < 1e-12);
        assert!((mass.m0 - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_from_prediction_clamps_uncertainty() {
        // Perfect recall and specificity with full weight: w1 = w0 = 1
        let mass = BeliefMass::from_prediction(0.7, 0.3, 1.0, 1.0, 1.0);
        assert!(mass.mu >= 0.0);

        // Discounted masses above 1: w = 1, recall 1.9 -> w1 = 1 / 0.1 = 10
        let mass = BeliefMass::from_prediction(0.5, 0.5, 1.0, 1.9, 0.0);
        assert!(mass.m1 > 1.0);
        assert_eq!(mass.mu, 0.0);
    }

    #[test]
    fn test_masses_non_negative_over_grid() {
        let steps = [0.0, 0.1, 0.25, 0.5, 0.75, 0.9, 1.0];
        for &p1 in &steps {
            for &w in &steps {
                for &r in &steps {
                    for &s in &steps {
                        let mass = BeliefMass::from_prediction(p1, 1.0 - p1, w, r, s);
                        assert!(mass.m1 >= 0.0 && mass.m0 >= 0.0 && mass.mu >= 0.0, "{:?}", mass);
                    }
                }
            }
        }
    }

    #[test]
    fn test_combine_renormalizes() {
        let a = BeliefMass::new(0.6, 0.1, 0.3);
        let b = BeliefMass::new(0.2, 0.5, 0.3);

        let step = a.combine(&b, 0.8, 0.7);

        assert!(step.renormalized);
        assert!((step.mass.total() - 1.0).abs() < 1e-12);

        // raw: m1 = 0.2*0.6 + 0.3*0.2 + 0.6*0.2 = 0.30
        //      m0 = 0.3*0.1 + 0.3*0.5 + 0.1*0.5 = 0.23
        //      mu = 0.3*0.3 + 0.6*0.5 + 0.1*0.2 = 0.41
        let total = 0.30 + 0.23 + 0.41;
        assert!((step.mass.m1 - 0.30 / total).abs() < 1e-12);
        assert!((step.mass.m0 - 0.23 / total).abs() < 1e-12);
        assert!((step.mass.mu - 0.41 / total).abs() < 1e-12);
    }

    #[test]
    fn test_combine_zero_total_is_left_unnormalized() {
        let step = BeliefMass::new(0.0, 0.0, 0.0).combine(&BeliefMass::vacuous(), 0.5, 0.5);
        assert!(!step.renormalized);
        assert_eq!(step.mass, BeliefMass::new(0.0, 0.0, 0.0));
        assert_eq!(step.mass.fused_probability(), 0.5);
    }

    #[test]
    fn test_combine_is_not_commutative() {
        let a = BeliefMass::new(0.6, 0.1, 0.3);
        let b = BeliefMass::new(0.2, 0.5, 0.3);

        let ab = a.combine(&b, 0.8, 0.7).mass;
        let ba = b.combine(&a, 0.8, 0.7).mass;
        assert!((ab.m1 - ba.m1).abs() > 1e-6);
    }

    #[test]
    fn test_vacuous_stays_neutral() {
        let step = BeliefMass::vacuous().combine(&BeliefMass::vacuous(), 0.9, 0.9);
        assert!(step.renormalized);
        assert_eq!(step.mass, BeliefMass::vacuous());
        assert_eq!(step.mass.committed_probability(), None);
        assert_eq!(step.mass.fused_probability(), 0.5);
    }

    #[test]
    fn test_fused_probability() {
        let mass = BeliefMass::new(0.3, 0.1, 0.6);
        assert!((mass.fused_probability() - 0.75).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn test_constructed_masses_are_non_negative(
            p1 in unit(),
            weight in unit(),
            recall in unit(),
            specificity in unit(),
        ) {
            let mass = BeliefMass::from_prediction(p1, 1.0 - p1, weight, recall, specificity);
            prop_assert!(mass.m1 >= 0.0 && mass.m0 >= 0.0 && mass.mu >= 0.0, "{:?}", mass);
            prop_assert!(mass.m1 + mass.m0 <= 1.0 + 1e-12, "{:?}", mass);
        }

        #[test]
        fn test_combined_masses_sum_to_one(
            a in (unit(), unit(), unit(), unit()),
            b in (unit(), unit(), unit(), unit()),
        ) {
            let first = BeliefMass::from_prediction(a.0, 1.0 - a.0, a.1, a.2, a.3);
            let next = BeliefMass::from_prediction(b.0, 1.0 - b.0, b.1, b.2, b.3);

            let step = first.combine(&next, b.2, b.3);
            prop_assert!(step.mass.m1 >= 0.0 && step.mass.m0 >= 0.0 && step.mass.mu >= 0.0);
            if step.renormalized {
                prop_assert!((step.mass.total() - 1.0).abs() < 1e-6, "{:?}", step.mass);
            }

            let p = step.mass.fused_probability();
            prop_assert!((0.0..=1.0).contains(&p));
        }
    }
}
