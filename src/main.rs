// src/main.rs
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use serving_lib::features::dataset::{analyze_dataset, load_dataset};
use serving_lib::features::types::FeatureVector;
use serving_lib::serving::{RetrainRequest, ServingEngine};
use serving_lib::training::compare_runs;
use serving_lib::utils::config::ServingConfig;
use serving_lib::utils::env::load_env;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the engine and print health and model info
    Status,
    /// Score one or more feature vectors (`a,b,c,d`)
    Predict {
        #[arg(long = "features", required = true)]
        features: Vec<FeatureVector>,
    },
    /// Retrain, register and hot-swap the served model
    Retrain {
        #[arg(long)]
        experiment: Option<String>,
        #[arg(long)]
        test_fraction: Option<f64>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// List tracked training runs
    Runs {
        #[arg(long)]
        experiment: Option<String>,
    },
    /// List registered versions of the model
    Versions,
    /// Summarize the training dataset
    Analyze,
}

async fn started_engine(config: &ServingConfig) -> Result<ServingEngine> {
    let engine = ServingEngine::from_config(config);
    let version = engine
        .startup()
        .await
        .context("Serving engine failed to start")?;
    info!(
        "Engine ready: {} version {} ({})",
        version.model_name, version.version, version.candidate
    );
    Ok(engine)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    load_env();
    let cli = Cli::parse();
    if cli.verbose {
        log::set_max_level(log::LevelFilter::Debug);
    }

    let config = ServingConfig::from_env();
    config.log_config();

    match cli.command {
        Command::Status => {
            let engine = started_engine(&config).await?;
            let health = engine.health().await;
            let info = engine.model_info().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Predict { features } => {
            let engine = started_engine(&config).await?;
            let predictions = if features.len() == 1 {
                vec![engine.predict(&features[0]).await?]
            } else {
                engine.predict_batch(&features).await?
            };
            println!("{}", serde_json::to_string_pretty(&predictions)?);
        }
        Command::Retrain {
            experiment,
            test_fraction,
            seed,
        } => {
            let engine = started_engine(&config).await?;
            let request = RetrainRequest {
                experiment_name: experiment,
                test_fraction,
                seed,
            };
            let version = engine.retrain_with(request).await.context("Retrain failed")?;
            println!(
                "Now serving {} version {} ({})",
                version.name, version.version, version.candidate
            );
            let tracker = engine.pipeline().tracker();
            if let Some(champion) = tracker.get_run(&version.run_id).await? {
                let runs = tracker.list_runs(Some(&champion.experiment)).await?;
                println!("{}", serde_json::to_string_pretty(&compare_runs(&runs))?);
            }
        }
        Command::Runs { experiment } => {
            let engine = ServingEngine::from_config(&config);
            let runs = engine
                .pipeline()
                .tracker()
                .list_runs(experiment.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&compare_runs(&runs))?);
        }
        Command::Versions => {
            let engine = ServingEngine::from_config(&config);
            let versions = engine
                .pipeline()
                .registry()
                .list_versions(&config.model_name)
                .await?;
            println!("{}", serde_json::to_string_pretty(&versions)?);
        }
        Command::Analyze => {
            let examples = load_dataset(&config.data_path)?;
            println!("{}", serde_json::to_string_pretty(&analyze_dataset(&examples))?);
        }
    }
    Ok(())
}
