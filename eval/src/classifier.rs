// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Standalone classifier runner
//!
//! Trains and scores individual base classifiers for quick testing

use anyhow::{Context, Result};
use clap::Parser;
use er_fusion_eval::classifiers::{classifier_by_name, default_ensemble};
use er_fusion_eval::datasets::{self, Dataset, TrainingSets};
use er_fusion_eval::metrics::compute_metrics_thresholded;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "run-classifier")]
#[command(about = "Train and score base classifiers")]
#[command(version)]
struct Args {
    /// Classifier to run (LR, SVM, RF, XGB, LGBM); all when omitted
    #[arg(short, long)]
    model: Option<String>,

    /// Dataset to use (synthetic, csv)
    #[arg(short, long, default_value = "synthetic")]
    dataset: String,

    /// Path to the CSV dataset
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Random seed
    #[arg(short, long, default_value_t = 42)]
    seed: u64,

    /// Number of samples for synthetic dataset
    #[arg(short, long, default_value_t = 1000)]
    num_samples: usize,

    /// Train on the raw class balance
    #[arg(long)]
    no_oversample: bool,

    /// List available classifiers
    #[arg(long)]
    list: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // List available classifiers
    if args.list {
        println!("Available classifiers:");
        println!("----------------------");
        for classifier in default_ensemble(42) {
            println!("  {}: {}", classifier.name(), classifier.description());
        }
        return Ok(());
    }

    // Load dataset
    let dataset = match (args.dataset.as_str(), args.path.as_ref()) {
        ("csv", Some(path)) => Dataset::load_csv(path, args.seed)?,
        ("synthetic", _) => {
            tracing::info!("Loading synthetic dataset ({} samples, seed={})", args.num_samples, args.seed);
            Dataset::load_synthetic(args.num_samples, args.seed)
        }
        (other, _) => {
            tracing::warn!("No usable path for {}, using synthetic", other);
            Dataset::load_synthetic(args.num_samples, args.seed)
        }
    };

    println!("\nDataset: {}", dataset.config.name);
    println!("  Train samples: {}", dataset.train.len());
    println!("  Validation samples: {}", dataset.validation.len());
    println!("  Test samples: {}", dataset.test.len());

    let train_dist = Dataset::label_distribution(&dataset.train);
    println!("\nTrain distribution:");
    for (label, count) in &train_dist {
        println!("  {:?}: {} ({:.1}%)", label, count, *count as f64 / dataset.train.len() as f64 * 100.0);
    }

    let classifiers = match args.model.as_deref() {
        Some(name) => vec![classifier_by_name(name, args.seed)
            .with_context(|| format!("Unknown classifier '{}'", name))?],
        None => default_ensemble(args.seed),
    };

    let training_sets = TrainingSets::build(&dataset.train, classifiers.len(), !args.no_oversample, args.seed);
    let test_features = datasets::features(&dataset.test);
    let test_labels = datasets::labels(&dataset.test);

    println!("\n{}", "=".repeat(70));
    println!("CLASSIFIER EVALUATION");
    println!("{}", "=".repeat(70));

    for (idx, mut classifier) in classifiers.into_iter().enumerate() {
        let train = training_sets
            .get(idx)
            .with_context(|| format!("No training set for '{}'", classifier.name()))?;

        println!("\n## {} ##", classifier.name());
        println!("{}", classifier.description());
        println!("{}", "-".repeat(50));

        classifier.fit(&datasets::features(train), &datasets::labels(train))?;

        let probabilities = classifier.predict_proba(&test_features)?;
        let metrics = compute_metrics_thresholded(&test_labels, &probabilities.positive(), 0.5)?;

        println!("{}", metrics.format());
    }

    println!("\n{}", "=".repeat(70));
    println!("Evaluation complete!");

    Ok(())
}
