// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Reproducible fusion pipeline
//!
//! Orchestrates:
//! - Dataset loading and per-classifier training sets
//! - Base classifier training and probability collection
//! - Reliability estimation on the validation split
//! - Evidence fusion of validation and test outputs
//! - Metrics computation
//! - Results serialization (JSON, Markdown, CSV tables)

use crate::classifiers::{classifier_by_name, ProbabilisticClassifier, DEFAULT_ENSEMBLE};
use crate::combiner::{CombinerConfig, EvidenceCombiner, FusedOutput, FusionContext, FusionDiagnostics};
use crate::datasets::{self, Dataset, Label, Sample, TrainingSets};
use crate::metrics::{compute_metrics_thresholded, MetricsReport};
use crate::probabilities::ClassifierOutputs;
use crate::reliability::ReliabilityProfile;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Configuration for the fusion pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Dataset to load ("synthetic" or "csv")
    pub dataset_id: String,
    /// Path to the CSV file when `dataset_id` is "csv"
    pub dataset_path: Option<String>,
    /// Sample count for the synthetic dataset
    pub synthetic_samples: usize,
    /// Classifiers to train, in fold order (empty = full default ensemble)
    pub classifiers: Vec<String>,
    /// Randomly oversample the minority class in each training set
    pub oversample: bool,
    /// Fuse samples in parallel
    pub parallel: bool,
    /// Fused probabilities at or above this are class 1
    pub threshold: f64,
    /// Output directory for results
    pub output_dir: String,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            dataset_id: "synthetic".to_string(),
            dataset_path: None,
            synthetic_samples: 1000,
            classifiers: vec![],
            oversample: true,
            parallel: true,
            threshold: 0.5,
            output_dir: "eval/results".to_string(),
        }
    }
}

impl FusionConfig {
    /// Load a TOML config file; missing keys keep their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("Failed to parse TOML in {}", path.display()))?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Classifier names in fold order
    pub fn classifier_names(&self) -> Vec<String> {
        if self.classifiers.is_empty() {
            DEFAULT_ENSEMBLE.iter().map(|s| s.to_string()).collect()
        } else {
            self.classifiers.clone()
        }
    }
}

/// Test-set results for a single base classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierResult {
    pub model_name: String,
    pub model_description: String,
    pub test_metrics: MetricsReport,
    pub training_samples: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub id: String,
    pub name: String,
    pub total_samples: usize,
    pub train_samples: usize,
    pub validation_samples: usize,
    pub test_samples: usize,
    pub label_distribution: HashMap<String, usize>,
}

/// Fused probabilities and their metrics for one split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedSplit {
    pub metrics: MetricsReport,
    pub diagnostics: FusionDiagnostics,
}

/// Output of the fusion core on precomputed classifier outputs
#[derive(Debug, Clone)]
pub struct FusionOutcome {
    pub profile: ReliabilityProfile,
    pub validation: FusedOutput,
    pub test: FusedOutput,
    /// Totals across both passes
    pub diagnostics: FusionDiagnostics,
}

/// Complete pipeline results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionResults {
    pub config: FusionConfig,
    pub dataset_info: DatasetInfo,
    pub classifier_results: Vec<ClassifierResult>,
    pub reliability: ReliabilityProfile,
    pub fused_validation: FusedSplit,
    pub fused_test: FusedSplit,
    pub summary: FusionSummary,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionSummary {
    pub best_classifier: String,
    pub best_classifier_auc: f64,
    pub fused_test_auc: f64,
    /// Fused test AUC minus the best single classifier's test AUC
    pub auc_gain: f64,
}

#[derive(Serialize)]
struct ClassifierMetricsRow<'a> {
    #[serde(rename = "Model")]
    model: &'a str,
    #[serde(rename = "Accuracy")]
    accuracy: f64,
    #[serde(rename = "AUC")]
    auc: f64,
    #[serde(rename = "F1")]
    f1: f64,
    #[serde(rename = "BS1")]
    bs1: f64,
    #[serde(rename = "BS0")]
    bs0: f64,
}

#[derive(Serialize)]
struct ReliabilityRow<'a> {
    #[serde(rename = "Model")]
    model: &'a str,
    #[serde(rename = "Weight")]
    weight: f64,
    #[serde(rename = "Recall")]
    recall: f64,
    #[serde(rename = "Specificity")]
    specificity: f64,
    #[serde(rename = "AUC")]
    auc: f64,
}

impl<'a> ClassifierMetricsRow<'a> {
    fn new(model: &'a str, m: &MetricsReport) -> Self {
        Self {
            model,
            accuracy: m.accuracy,
            auc: m.auc,
            f1: m.f1,
            bs1: m.bs1,
            bs0: m.bs0,
        }
    }
}

/// Main fusion pipeline
pub struct FusionPipeline {
    config: FusionConfig,
    dataset: Option<Dataset>,
}

impl FusionPipeline {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            config,
            dataset: None,
        }
    }

    /// Use an already loaded dataset instead of the configured one
    pub fn with_dataset(config: FusionConfig, dataset: Dataset) -> Self {
        Self {
            config,
            dataset: Some(dataset),
        }
    }

    /// Load dataset based on configuration
    pub fn load_dataset(&mut self) -> Result<()> {
        let dataset = match (self.config.dataset_id.as_str(), self.config.dataset_path.as_ref()) {
            ("csv", Some(path)) => {
                tracing::info!("Loading CSV dataset from {}", path);
                Dataset::load_csv(Path::new(path), self.config.seed)?
            }
            ("csv", None) => anyhow::bail!("dataset 'csv' needs a dataset path"),
            ("synthetic", _) => {
                tracing::info!(
                    "Loading synthetic dataset ({} samples, seed {})",
                    self.config.synthetic_samples,
                    self.config.seed
                );
                Dataset::load_synthetic(self.config.synthetic_samples, self.config.seed)
            }
            (other, _) => {
                tracing::warn!("Unknown dataset '{}', falling back to synthetic", other);
                Dataset::load_synthetic(self.config.synthetic_samples, self.config.seed)
            }
        };

        tracing::info!(
            "Dataset loaded: {} samples (train={}, val={}, test={})",
            dataset.total_samples(),
            dataset.train.len(),
            dataset.validation.len(),
            dataset.test.len()
        );

        self.dataset = Some(dataset);
        Ok(())
    }

    /// Instantiate the configured classifiers in fold order
    fn build_classifiers(&self) -> Result<Vec<Box<dyn ProbabilisticClassifier>>> {
        self.config
            .classifier_names()
            .iter()
            .map(|name| {
                classifier_by_name(name, self.config.seed)
                    .with_context(|| format!("Unknown classifier '{}'", name))
            })
            .collect()
    }

    /// Run the fusion core on precomputed classifier outputs.
    ///
    /// The reliability profile is estimated once from the validation outputs
    /// and reused for both splits.
    pub fn fuse_outputs(
        validation_labels: &[Label],
        validation: &ClassifierOutputs,
        test: &ClassifierOutputs,
        combiner: CombinerConfig,
    ) -> Result<FusionOutcome> {
        let profile = ReliabilityProfile::from_validation(validation_labels, validation)
            .context("Reliability estimation failed")?;
        let context = FusionContext::new(profile);
        let combiner = EvidenceCombiner::new(combiner);

        let fused_validation = combiner.fuse(&context, validation).context("Fusing validation outputs")?;
        let fused_test = combiner.fuse(&context, test).context("Fusing test outputs")?;
        let diagnostics = context.diagnostics();

        Ok(FusionOutcome {
            profile: context.profile().clone(),
            validation: fused_validation,
            test: fused_test,
            diagnostics,
        })
    }

    /// Run the full fusion pipeline
    pub fn run(&mut self) -> Result<FusionResults> {
        if self.dataset.is_none() {
            self.load_dataset()?;
        }
        let dataset = self.dataset.as_ref().context("Dataset not loaded")?;

        let label_dist = Dataset::label_distribution(&dataset.test);
        let dataset_info = DatasetInfo {
            id: dataset.config.id.clone(),
            name: dataset.config.name.clone(),
            total_samples: dataset.total_samples(),
            train_samples: dataset.train.len(),
            validation_samples: dataset.validation.len(),
            test_samples: dataset.test.len(),
            label_distribution: label_dist
                .iter()
                .map(|(k, v)| (format!("{:?}", k), *v))
                .collect(),
        };

        let mut classifiers = self.build_classifiers()?;
        let training_sets = TrainingSets::build(
            &dataset.train,
            classifiers.len(),
            self.config.oversample,
            self.config.seed,
        );

        let val_features = datasets::features(&dataset.validation);
        let test_features = datasets::features(&dataset.test);
        let val_labels = datasets::labels(&dataset.validation);
        let test_labels = datasets::labels(&dataset.test);

        let mut validation_outputs = ClassifierOutputs::new();
        let mut test_outputs = ClassifierOutputs::new();
        let mut classifier_results = Vec::new();

        for (idx, classifier) in classifiers.iter_mut().enumerate() {
            let name = classifier.name().to_string();
            let train: &[Sample] = training_sets
                .get(idx)
                .with_context(|| format!("No training set for '{}'", name))?;

            tracing::info!("Training classifier: {} ({} samples)", name, train.len());
            classifier
                .fit(&datasets::features(train), &datasets::labels(train))
                .with_context(|| format!("Training '{}' failed", name))?;

            let val_probs = classifier.predict_proba(&val_features)?;
            let test_probs = classifier.predict_proba(&test_features)?;

            let test_metrics = compute_metrics_thresholded(&test_labels, &test_probs.positive(), 0.5)
                .with_context(|| format!("Scoring '{}' on the test split", name))?;
            tracing::info!("  {} - {}", name, test_metrics.format());

            classifier_results.push(ClassifierResult {
                model_name: name.clone(),
                model_description: classifier.description().to_string(),
                test_metrics,
                training_samples: train.len(),
            });

            validation_outputs.insert(name.clone(), val_probs)?;
            test_outputs.insert(name, test_probs)?;
        }

        let outcome = Self::fuse_outputs(
            &val_labels,
            &validation_outputs,
            &test_outputs,
            CombinerConfig {
                parallel: self.config.parallel,
            },
        )?;

        let fused_validation = FusedSplit {
            metrics: compute_metrics_thresholded(&val_labels, &outcome.validation.probabilities, self.config.threshold)
                .context("Scoring fused validation probabilities")?,
            diagnostics: outcome.validation.diagnostics,
        };
        let fused_test = FusedSplit {
            metrics: compute_metrics_thresholded(&test_labels, &outcome.test.probabilities, self.config.threshold)
                .context("Scoring fused test probabilities")?,
            diagnostics: outcome.test.diagnostics,
        };

        tracing::info!("Fused validation - {}", fused_validation.metrics.format());
        tracing::info!("Fused test - {}", fused_test.metrics.format());

        // Generate summary
        let mut best_classifier = "None".to_string();
        let mut best_classifier_auc = 0.0;
        for r in &classifier_results {
            if r.test_metrics.auc > best_classifier_auc {
                best_classifier_auc = r.test_metrics.auc;
                best_classifier = r.model_name.clone();
            }
        }
        let summary = FusionSummary {
            best_classifier,
            best_classifier_auc,
            fused_test_auc: fused_test.metrics.auc,
            auc_gain: fused_test.metrics.auc - best_classifier_auc,
        };

        Ok(FusionResults {
            config: self.config.clone(),
            dataset_info,
            classifier_results,
            reliability: outcome.profile,
            fused_validation,
            fused_test,
            summary,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// Save results to JSON file
    pub fn save_results(results: &FusionResults, output_path: &Path) -> Result<()> {
        std::fs::create_dir_all(output_path.parent().unwrap_or(Path::new(".")))?;
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(output_path, json)?;
        tracing::info!("Results saved to {}", output_path.display());
        Ok(())
    }

    /// Write the three result tables as CSV files into `output_dir`:
    /// per-classifier test metrics, fused validation/test metrics and the
    /// reliability table
    pub fn save_tables(results: &FusionResults, output_dir: &Path, stem: &str) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(output_dir)?;

        let classifier_path = output_dir.join(format!("{}_classifier_test_metrics.csv", stem));
        let mut writer = csv::Writer::from_path(&classifier_path)
            .with_context(|| format!("Failed to create {}", classifier_path.display()))?;
        for r in &results.classifier_results {
            writer.serialize(ClassifierMetricsRow::new(&r.model_name, &r.test_metrics))?;
        }
        writer.flush()?;

        let fused_path = output_dir.join(format!("{}_fused_metrics.csv", stem));
        let mut writer = csv::Writer::from_path(&fused_path)
            .with_context(|| format!("Failed to create {}", fused_path.display()))?;
        writer.serialize(ClassifierMetricsRow::new("Validation", &results.fused_validation.metrics))?;
        writer.serialize(ClassifierMetricsRow::new("Test", &results.fused_test.metrics))?;
        writer.flush()?;

        let reliability_path = output_dir.join(format!("{}_reliability.csv", stem));
        let mut writer = csv::Writer::from_path(&reliability_path)
            .with_context(|| format!("Failed to create {}", reliability_path.display()))?;
        for e in results.reliability.entries() {
            writer.serialize(ReliabilityRow {
                model: &e.name,
                weight: e.weight,
                recall: e.recall,
                specificity: e.specificity,
                auc: e.auc,
            })?;
        }
        writer.flush()?;

        tracing::info!("Result tables saved to {}", output_dir.display());
        Ok(vec![classifier_path, fused_path, reliability_path])
    }

    /// Generate a markdown report
    pub fn generate_report(results: &FusionResults) -> String {
        let mut report = String::new();

        report.push_str("# Evidential Fusion Report\n\n");
        report.push_str(&format!("**Generated:** {}\n\n", results.timestamp.format("%Y-%m-%d %H:%M:%S UTC")));
        report.push_str(&format!("**Version:** {}\n\n", results.version));

        report.push_str("## Dataset\n\n");
        report.push_str(&format!("- **ID:** {}\n", results.dataset_info.id));
        report.push_str(&format!("- **Name:** {}\n", results.dataset_info.name));
        report.push_str(&format!("- **Total Samples:** {}\n", results.dataset_info.total_samples));
        report.push_str(&format!(
            "- **Split Sizes:** Train={}, Val={}, Test={}\n\n",
            results.dataset_info.train_samples,
            results.dataset_info.validation_samples,
            results.dataset_info.test_samples
        ));

        report.push_str("## Summary\n\n");
        report.push_str(&format!(
            "**Best Single Classifier:** {} (AUC={:.4})\n\n**Fused Test AUC:** {:.4} ({:+.4})\n\n",
            results.summary.best_classifier,
            results.summary.best_classifier_auc,
            results.summary.fused_test_auc,
            results.summary.auc_gain
        ));

        report.push_str("### Base Classifiers (test split)\n\n");
        report.push_str("| Model | Accuracy | AUC | F1 | BS1 | BS0 |\n");
        report.push_str("|-------|----------|-----|----|-----|-----|\n");
        for r in &results.classifier_results {
            let m = &r.test_metrics;
            report.push_str(&format!(
                "| {} | {:.4} | {:.4} | {:.4} | {:.4} | {:.4} |\n",
                r.model_name, m.accuracy, m.auc, m.f1, m.bs1, m.bs0
            ));
        }

        report.push_str("\n### Fused Ensemble\n\n");
        report.push_str("| Dataset | Accuracy | AUC | F1 | BS1 | BS0 |\n");
        report.push_str("|---------|----------|-----|----|-----|-----|\n");
        for (split, fused) in [("Validation", &results.fused_validation), ("Test", &results.fused_test)] {
            let m = &fused.metrics;
            report.push_str(&format!(
                "| {} | {:.4} | {:.4} | {:.4} | {:.4} | {:.4} |\n",
                split, m.accuracy, m.auc, m.f1, m.bs1, m.bs0
            ));
        }

        report.push_str("\n### Reliability\n\n");
        report.push_str("| Model | Weight | Recall | Specificity | AUC |\n");
        report.push_str("|-------|--------|--------|-------------|-----|\n");
        for e in results.reliability.entries() {
            report.push_str(&format!(
                "| {} | {:.4} | {:.4} | {:.4} | {:.4} |\n",
                e.name, e.weight, e.recall, e.specificity, e.auc
            ));
        }
        if results.reliability.uniform_fallback {
            report.push_str("\n*Total validation AUC was zero; uniform weights were used.*\n");
        }

        let diag = [&results.fused_validation.diagnostics, &results.fused_test.diagnostics];
        if diag.iter().any(|d| !d.is_clean()) {
            report.push_str("\n### Degenerate Combinations\n\n");
            for (split, d) in ["Validation", "Test"].iter().zip(diag.iter()) {
                report.push_str(&format!(
                    "- {}: {} unnormalized fold steps, {} neutral fallbacks over {} samples\n",
                    split, d.degenerate_renormalizations, d.neutral_fallbacks, d.samples
                ));
            }
        }

        report.push_str("\n## Configuration\n\n");
        report.push_str(&format!("```json\n{}\n```\n", serde_json::to_string_pretty(&results.config).unwrap_or_default()));

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probabilities::ProbabilityMatrix;
    use std::io::Write;

    fn small_config() -> FusionConfig {
        FusionConfig {
            synthetic_samples: 300,
            output_dir: "test_output".to_string(),
            ..FusionConfig::default()
        }
    }

    #[test]
    fn test_pipeline_synthetic() {
        let mut pipeline = FusionPipeline::new(small_config());
        let results = pipeline.run().expect("Pipeline should succeed");

        assert_eq!(results.classifier_results.len(), 5);
        assert_eq!(results.reliability.len(), 5);
        assert!((results.reliability.total_weight() - 1.0).abs() < 1e-9);
        assert!(results.fused_test.metrics.auc >= 0.0 && results.fused_test.metrics.auc <= 1.0);
        assert_eq!(results.fused_test.diagnostics.samples, results.dataset_info.test_samples);
    }

    #[test]
    fn test_pipeline_specific_classifiers() {
        let config = FusionConfig {
            classifiers: vec!["RF".to_string(), "LR".to_string()],
            parallel: false,
            ..small_config()
        };

        let mut pipeline = FusionPipeline::new(config);
        let results = pipeline.run().expect("Pipeline should succeed");

        let names: Vec<_> = results.reliability.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["RF", "LR"]);
    }

    #[test]
    fn test_pipeline_unknown_classifier() {
        let config = FusionConfig {
            classifiers: vec!["KNN".to_string()],
            ..small_config()
        };
        let mut pipeline = FusionPipeline::new(config);
        assert!(pipeline.run().is_err());
    }

    #[test]
    fn test_fuse_outputs_reuses_profile() {
        let truth = vec![Label::Positive, Label::Positive, Label::Negative, Label::Negative];
        let mut validation = ClassifierOutputs::new();
        let mut test = ClassifierOutputs::new();
        validation
            .insert("A", ProbabilityMatrix::from_positive(&[0.9, 0.6, 0.4, 0.2]).unwrap())
            .unwrap();
        validation
            .insert("B", ProbabilityMatrix::from_positive(&[0.7, 0.3, 0.6, 0.1]).unwrap())
            .unwrap();
        test.insert("A", ProbabilityMatrix::from_positive(&[0.8, 0.1]).unwrap())
            .unwrap();
        test.insert("B", ProbabilityMatrix::from_positive(&[0.6, 0.3]).unwrap())
            .unwrap();

        let outcome = FusionPipeline::fuse_outputs(&truth, &validation, &test, CombinerConfig::default()).unwrap();

        assert_eq!(outcome.validation.probabilities.len(), 4);
        assert_eq!(outcome.test.probabilities.len(), 2);
        assert!(outcome.test.probabilities[0] > outcome.test.probabilities[1]);
        assert_eq!(outcome.diagnostics.samples, 6);
    }

    #[test]
    fn test_fuse_outputs_degenerate_validation() {
        let truth = vec![Label::Positive, Label::Positive];
        let mut validation = ClassifierOutputs::new();
        validation
            .insert("A", ProbabilityMatrix::from_positive(&[0.9, 0.6]).unwrap())
            .unwrap();

        let result = FusionPipeline::fuse_outputs(&truth, &validation, &validation, CombinerConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "seed = 7\nclassifiers = [\"LR\", \"XGB\"]\nparallel = false").unwrap();

        let config = FusionConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.classifier_names(), vec!["LR".to_string(), "XGB".to_string()]);
        assert!(!config.parallel);
        assert_eq!(config.threshold, 0.5);
    }

    #[test]
    fn test_generate_report_and_tables() {
        let config = FusionConfig {
            classifiers: vec!["LR".to_string(), "XGB".to_string()],
            ..small_config()
        };
        let mut pipeline = FusionPipeline::new(config);
        let results = pipeline.run().expect("Pipeline should succeed");

        let report = FusionPipeline::generate_report(&results);
        assert!(report.contains("Evidential Fusion Report"));
        assert!(report.contains("### Reliability"));
        assert!(report.contains("| Test |"));

        let dir = tempfile::tempdir().unwrap();
        let paths = FusionPipeline::save_tables(&results, dir.path(), "run").unwrap();
        assert_eq!(paths.len(), 3);
        let reliability = std::fs::read_to_string(&paths[2]).unwrap();
        assert!(reliability.starts_with("Model,Weight,Recall,Specificity,AUC"));
    }
}
