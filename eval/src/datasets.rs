// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Dataset loading and partitioning for fusion experiments

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

/// Binary class label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    /// Class 0
    Negative,
    /// Class 1
    Positive,
}

impl Label {
    /// Convert to numeric value for metrics calculation
    pub fn to_binary(self) -> u8 {
        match self {
            Label::Negative => 0,
            Label::Positive => 1,
        }
    }

    /// Create from binary value (1 = positive, anything else = negative)
    pub fn from_binary(value: u8) -> Self {
        if value == 1 {
            Label::Positive
        } else {
            Label::Negative
        }
    }

    /// Threshold a class-1 probability (label 1 iff `p1 >= threshold`)
    pub fn from_probability(p1: f64, threshold: f64) -> Self {
        if p1 >= threshold {
            Label::Positive
        } else {
            Label::Negative
        }
    }
}

/// A single sample from a dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    /// Unique identifier
    pub id: String,
    /// Numeric feature vector
    pub features: Vec<f64>,
    /// Ground truth label
    pub label: Label,
}

/// Descriptive metadata for a loaded dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub id: String,
    pub name: String,
    pub description: String,
    pub source: String,
    pub feature_names: Vec<String>,
}

/// A loaded dataset split into train/validation/test
#[derive(Debug, Clone)]
pub struct Dataset {
    pub config: DatasetConfig,
    pub train: Vec<Sample>,
    pub validation: Vec<Sample>,
    pub test: Vec<Sample>,
}

impl Dataset {
    /// Load a CSV file with a header row, numeric feature columns and the
    /// 0/1 label in the last column.
    ///
    /// Rows are shuffled with `seed` and split 60/20/20.
    pub fn load_csv(path: &Path, seed: u64) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers = reader
            .headers()
            .with_context(|| format!("Failed to read header of {}", path.display()))?
            .clone();
        if headers.len() < 2 {
            anyhow::bail!(
                "{} needs at least one feature column and a label column",
                path.display()
            );
        }
        let n_features = headers.len() - 1;
        let feature_names: Vec<String> = headers.iter().take(n_features).map(str::to_string).collect();

        let mut samples = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let record = result.with_context(|| format!("Failed to read record {} in {}", idx, path.display()))?;

            if record.len() != headers.len() {
                tracing::warn!("Skipping malformed row {} in {}: {} fields", idx, path.display(), record.len());
                continue;
            }

            let features: Option<Vec<f64>> = record
                .iter()
                .take(n_features)
                .map(|field| field.trim().parse::<f64>().ok())
                .collect();
            let label = match record.get(n_features).map(str::trim) {
                Some("1") | Some("1.0") => Some(Label::Positive),
                Some("0") | Some("0.0") => Some(Label::Negative),
                _ => None,
            };

            match (features, label) {
                (Some(features), Some(label)) => samples.push(Sample {
                    id: format!("row_{}", idx),
                    features,
                    label,
                }),
                _ => {
                    tracing::warn!("Skipping unparsable row {} in {}", idx, path.display());
                }
            }
        }

        let config = DatasetConfig {
            id: "csv".to_string(),
            name: path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "csv".to_string()),
            description: format!("Tabular dataset loaded from {}", path.display()),
            source: path.display().to_string(),
            feature_names,
        };

        Ok(Self::split(config, samples, seed))
    }

    /// Generate a synthetic, mildly imbalanced two-cluster dataset.
    ///
    /// Roughly 35% of samples are positive; 5% of labels are flipped so
    /// no classifier separates the classes perfectly.
    pub fn load_synthetic(size: usize, seed: u64) -> Self {
        const N_FEATURES: usize = 4;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let config = DatasetConfig {
            id: "synthetic".to_string(),
            name: "Synthetic Two-Cluster Dataset".to_string(),
            description: "Gaussian clusters with label noise for pipeline testing".to_string(),
            source: "generated".to_string(),
            feature_names: (0..N_FEATURES).map(|i| format!("x{}", i)).collect(),
        };

        let samples: Vec<Sample> = (0..size)
            .map(|i| {
                let positive = rng.gen_bool(0.35);
                let centre = if positive { 0.8 } else { -0.8 };
                let features = (0..N_FEATURES)
                    .map(|f| {
                        // later features carry less signal
                        let scale = 1.0 / (f as f64 + 1.0);
                        centre * scale + standard_normal(&mut rng)
                    })
                    .collect();
                let flipped = rng.gen_bool(0.05);

                Sample {
                    id: format!("synthetic_{}", i),
                    features,
                    label: if positive != flipped { Label::Positive } else { Label::Negative },
                }
            })
            .collect();

        Self::split(config, samples, seed)
    }

    fn split(config: DatasetConfig, mut samples: Vec<Sample>, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed ^ 0x5eed);
        samples.shuffle(&mut rng);

        // Split 60/20/20
        let n = samples.len();
        let train_end = (n as f64 * 0.6) as usize;
        let val_end = (n as f64 * 0.8) as usize;

        let test = samples.split_off(val_end);
        let validation = samples.split_off(train_end);
        let train = samples;

        Self {
            config,
            train,
            validation,
            test,
        }
    }

    /// Get total number of samples across all splits
    pub fn total_samples(&self) -> usize {
        self.train.len() + self.validation.len() + self.test.len()
    }

    /// Get label distribution for a split
    pub fn label_distribution(samples: &[Sample]) -> HashMap<Label, usize> {
        let mut dist = HashMap::new();
        for sample in samples {
            *dist.entry(sample.label).or_insert(0) += 1;
        }
        dist
    }
}

/// Feature rows of a split, in sample order
pub fn features(samples: &[Sample]) -> Vec<Vec<f64>> {
    samples.iter().map(|s| s.features.clone()).collect()
}

/// Labels of a split, in sample order
pub fn labels(samples: &[Sample]) -> Vec<Label> {
    samples.iter().map(|s| s.label).collect()
}

/// Box-Muller transform over two uniform draws
fn standard_normal(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// One training set per classifier.
///
/// Each classifier may see a differently resampled copy of the shared
/// training split.
#[derive(Debug, Clone)]
pub struct TrainingSets {
    sets: Vec<Vec<Sample>>,
}

impl TrainingSets {
    /// Build `count` training sets from `train`. With `oversample`, each set
    /// gets its own seeded random oversampling of the minority class.
    pub fn build(train: &[Sample], count: usize, oversample: bool, seed: u64) -> Self {
        let sets = (0..count)
            .map(|i| {
                if oversample {
                    let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(i as u64));
                    oversample_minority(train, &mut rng)
                } else {
                    train.to_vec()
                }
            })
            .collect();
        Self { sets }
    }

    pub fn get(&self, index: usize) -> Option<&[Sample]> {
        self.sets.get(index).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

/// Duplicate randomly chosen minority-class samples until both classes
/// have the same count. Returns the input unchanged if a class is absent.
pub fn oversample_minority(samples: &[Sample], rng: &mut ChaCha8Rng) -> Vec<Sample> {
    let (positives, negatives): (Vec<&Sample>, Vec<&Sample>) =
        samples.iter().partition(|s| s.label == Label::Positive);

    if positives.is_empty() || negatives.is_empty() {
        return samples.to_vec();
    }

    let (minority, deficit) = if positives.len() < negatives.len() {
        (&positives, negatives.len() - positives.len())
    } else {
        (&negatives, positives.len() - negatives.len())
    };

    let mut out = samples.to_vec();
    out.extend((0..deficit).filter_map(|_| minority.choose(rng).map(|s| (*s).clone())));
    out.shuffle(rng);
    out
}
