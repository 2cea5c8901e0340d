// src/utils/config.rs
use crate::utils::env::env_or;
use crate::utils::retry::RetryConfig;
use log::info;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MODEL_NAME: &str = "iris_classifier";
pub const DEFAULT_CV_FOLDS: usize = 5;

/// Knobs for one training pass (split, cross-validation, progress display).
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Fraction of each class held out for the test partition, in (0, 1).
    pub test_fraction: f64,
    pub seed: u64,
    pub cv_folds: usize,
    pub show_progress: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
            cv_folds: DEFAULT_CV_FOLDS,
            show_progress: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServingConfig {
    /// CSV dataset; generated on first use when missing.
    pub data_path: PathBuf,
    /// Root directory for the experiment tracker and the model registry.
    pub artifact_root: PathBuf,
    /// Logical name the champion is registered under.
    pub model_name: String,
    pub training: TrainingConfig,
    pub retry: RetryConfig,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("data/raw/iris.csv"),
            artifact_root: PathBuf::from("mlruns"),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            training: TrainingConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl ServingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let retry_defaults = RetryConfig::default();

        let training = TrainingConfig {
            test_fraction: env_or("IRIS_TEST_FRACTION", defaults.training.test_fraction),
            seed: env_or("IRIS_SPLIT_SEED", defaults.training.seed),
            cv_folds: env_or("IRIS_CV_FOLDS", defaults.training.cv_folds),
            show_progress: env_or("IRIS_SHOW_PROGRESS", defaults.training.show_progress),
        };

        let retry = RetryConfig {
            max_attempts: env_or("IRIS_REGISTRY_MAX_ATTEMPTS", retry_defaults.max_attempts),
            initial_delay: Duration::from_millis(env_or(
                "IRIS_REGISTRY_BACKOFF_MS",
                retry_defaults.initial_delay.as_millis() as u64,
            )),
            call_timeout: Duration::from_millis(env_or(
                "IRIS_REGISTRY_TIMEOUT_MS",
                retry_defaults.call_timeout.as_millis() as u64,
            )),
            ..retry_defaults
        };

        Self {
            data_path: PathBuf::from(env_or(
                "IRIS_DATA_PATH",
                defaults.data_path.display().to_string(),
            )),
            artifact_root: PathBuf::from(env_or(
                "IRIS_ARTIFACT_ROOT",
                defaults.artifact_root.display().to_string(),
            )),
            model_name: env_or("IRIS_MODEL_NAME", defaults.model_name),
            training,
            retry,
        }
    }

    /// Config rooted in a single directory, convenient for tests and local runs.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            data_path: root.join("data").join("iris.csv"),
            artifact_root: root.join("mlruns"),
            ..Self::default()
        }
    }

    pub fn log_config(&self) {
        info!("🤖 Model serving configuration");
        info!("   Dataset: {}", self.data_path.display());
        info!("   Artifact root: {}", self.artifact_root.display());
        info!("   Registered model name: {}", self.model_name);
        info!(
            "   Split: test_fraction={}, seed={}, cv_folds={}",
            self.training.test_fraction, self.training.seed, self.training.cv_folds
        );
        info!(
            "   Collaborator calls: {} attempts, {}ms timeout",
            self.retry.max_attempts,
            self.retry.call_timeout.as_millis()
        );
    }
}
