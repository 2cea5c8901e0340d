// src/bin/train_model.rs
use anyhow::{Context, Result};
use log::{info, warn};
use serving_lib::registry::FsModelRegistry;
use serving_lib::training::{
    compare_runs, CollaboratorPolicy, FsExperimentTracker, TrainingOutcome, TrainingPipeline,
    TrainingRequest,
};
use serving_lib::utils::config::ServingConfig;
use serving_lib::utils::env::load_env;
use std::env;
use std::sync::Arc;

fn print_training_summary(outcome: &TrainingOutcome, dry_run: bool) {
    println!("\n=== IRIS CLASSIFIER TRAINING SUMMARY ===");
    println!("Experiment: {}", outcome.experiment);
    println!(
        "{:<4} {:<22} {:>9} {:>9} {:>8} {:>9} {:>8}",
        "Rank", "Candidate", "Accuracy", "CV Mean", "CV Std", "Macro F1", "Time"
    );
    for row in compare_runs(&outcome.runs) {
        let fmt = |v: Option<f64>| v.map(|x| format!("{:.4}", x)).unwrap_or_else(|| "-".to_string());
        println!(
            "{:<4} {:<22} {:>9} {:>9} {:>8} {:>9} {:>6}ms",
            row.rank,
            row.candidate,
            fmt(row.test_accuracy),
            fmt(row.cv_mean),
            fmt(row.cv_std),
            fmt(row.macro_f1),
            row.duration_ms
        );
    }
    println!(
        "\nChampion: {} (run {})",
        outcome.champion.candidate, outcome.champion.run_id
    );
    match (&outcome.version, dry_run) {
        (Some(version), _) => println!(
            "Registered as {} version {} ({})",
            version.name, version.version, version.stage
        ),
        (None, true) => println!("Dry run: nothing was tracked or registered."),
        (None, false) => println!("Champion was NOT registered; see warnings above."),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    load_env();
    let args: Vec<String> = env::args().collect();
    let dry_run = args.contains(&"--dry-run".to_string());
    if dry_run {
        warn!("DRY RUN MODE: runs will not be tracked and no model will be registered.");
    }

    let config = ServingConfig::from_env();
    config.log_config();

    let tracker = Arc::new(FsExperimentTracker::new(&config.artifact_root));
    let registry = Arc::new(FsModelRegistry::new(&config.artifact_root));
    let pipeline = TrainingPipeline::new(&config, tracker, registry);

    let policy = if dry_run {
        CollaboratorPolicy::Skip
    } else {
        CollaboratorPolicy::Required
    };
    let request = TrainingRequest::retrain(&config.training);
    let outcome = pipeline
        .run(&request, policy)
        .await
        .context("Training pass failed")?;

    print_training_summary(&outcome, dry_run);
    info!("Done.");
    Ok(())
}
