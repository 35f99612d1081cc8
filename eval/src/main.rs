// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Evidential fusion CLI
//!
//! Usage:
//!   er-fusion --dataset synthetic --seed 42
//!   er-fusion --dataset csv --path ./data/features.csv --classifiers LR,RF,XGB
//!   er-fusion --config fusion.toml --format all

use anyhow::Result;
use clap::Parser;
use er_fusion_eval::pipeline::{FusionConfig, FusionPipeline};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "er-fusion")]
#[command(about = "Fuse binary classifier outputs with evidential reasoning")]
#[command(version)]
struct Args {
    /// TOML config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dataset to use (synthetic, csv)
    #[arg(short, long)]
    dataset: Option<String>,

    /// Path to the CSV dataset
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Random seed for reproducibility
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of samples for the synthetic dataset
    #[arg(short = 'n', long)]
    samples: Option<usize>,

    /// Classifiers to fuse, in fold order (comma-separated, empty = all)
    #[arg(long)]
    classifiers: Option<String>,

    /// Train on the raw class balance
    #[arg(long)]
    no_oversample: bool,

    /// Fuse samples on a single thread
    #[arg(long)]
    sequential: bool,

    /// Output directory for results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format (json, markdown, csv, all)
    #[arg(short, long, default_value = "all")]
    format: String,
}

impl Args {
    fn into_config(self) -> Result<(FusionConfig, String)> {
        let mut config = match &self.config {
            Some(path) => FusionConfig::from_toml_file(path)?,
            None => FusionConfig::default(),
        };

        if let Some(dataset) = self.dataset {
            config.dataset_id = dataset;
        }
        if let Some(path) = self.path {
            config.dataset_path = Some(path.to_string_lossy().to_string());
            if config.dataset_id == "synthetic" {
                config.dataset_id = "csv".to_string();
            }
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(samples) = self.samples {
            config.synthetic_samples = samples;
        }
        if let Some(list) = self.classifiers {
            config.classifiers = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if self.no_oversample {
            config.oversample = false;
        }
        if self.sequential {
            config.parallel = false;
        }
        if let Some(output) = self.output {
            config.output_dir = output.to_string_lossy().to_string();
        }

        Ok((config, self.format))
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (config, format) = Args::parse().into_config()?;

    tracing::info!("Evidential Reasoning Fusion");
    tracing::info!("===========================");
    tracing::info!("Dataset: {}", config.dataset_id);
    tracing::info!("Seed: {}", config.seed);
    tracing::info!("Classifiers: {}", config.classifier_names().join(", "));

    let output_dir = PathBuf::from(&config.output_dir);
    let dataset_id = config.dataset_id.clone();

    let mut pipeline = FusionPipeline::new(config);
    let results = pipeline.run()?;

    // Print summary to console
    println!("\n{}", "=".repeat(70));
    println!("FUSION SUMMARY");
    println!("{}", "=".repeat(70));
    println!(
        "\nBest Single Classifier: {} (AUC={:.4})",
        results.summary.best_classifier, results.summary.best_classifier_auc
    );
    println!(
        "Fused Test AUC: {:.4} ({:+.4})",
        results.summary.fused_test_auc, results.summary.auc_gain
    );

    println!("\nBase Classifiers (test):");
    println!("{:-<70}", "");
    println!("{:<15} {:>10} {:>10} {:>10} {:>10} {:>10}", "Model", "Accuracy", "AUC", "F1", "BS1", "BS0");
    println!("{:-<70}", "");
    for r in &results.classifier_results {
        let m = &r.test_metrics;
        println!(
            "{:<15} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>10.4}",
            r.model_name, m.accuracy, m.auc, m.f1, m.bs1, m.bs0
        );
    }
    println!("{:-<70}", "");

    println!("\nFused Ensemble:");
    println!("{:-<70}", "");
    for (split, fused) in [("Validation", &results.fused_validation), ("Test", &results.fused_test)] {
        println!("{:<15} {}", split, fused.metrics.format());
    }
    println!("{:-<70}", "");

    println!("\nReliability:");
    println!("{}", results.reliability.format());

    // Save outputs
    std::fs::create_dir_all(&output_dir)?;

    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let stem = format!("fusion_{}_{}", dataset_id, timestamp);
    let all = format == "all";

    if format == "json" || all {
        let json_path = output_dir.join(format!("{}.json", stem));
        FusionPipeline::save_results(&results, &json_path)?;
        println!("\nJSON results saved to: {}", json_path.display());
    }

    if format == "markdown" || all {
        let report = FusionPipeline::generate_report(&results);
        let md_path = output_dir.join(format!("{}.md", stem));
        std::fs::write(&md_path, report)?;
        println!("Markdown report saved to: {}", md_path.display());
    }

    if format == "csv" || all {
        let tables = FusionPipeline::save_tables(&results, &output_dir, &stem)?;
        println!("CSV tables saved to: {} ({} files)", output_dir.display(), tables.len());
    }

    println!("\nFusion complete!");

    Ok(())
}
