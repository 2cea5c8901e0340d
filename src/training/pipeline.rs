// src/training/pipeline.rs
use crate::error::{LifecycleError, Result};
use crate::features::dataset::load_dataset;
use crate::features::split::split_and_scale;
use crate::models::{default_candidates, TrainedModel};
use crate::registry::{ModelRegistry, ModelVersion, Stage};
use crate::training::orchestrator::{champion_index, CandidateFactory, TrainingOrchestrator};
use crate::training::run::TrainingRun;
use crate::training::tracking::{validate_component, ExperimentTracker};
use crate::utils::config::{ServingConfig, TrainingConfig};
use crate::utils::retry::RetryExecutor;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

pub const INITIAL_EXPERIMENT: &str = "iris_initial";

pub fn retrain_experiment_name(at: DateTime<Utc>) -> String {
    format!("iris_retrain_{}", at.format("%Y%m%d_%H%M%S"))
}

/// How tracker and registry failures affect a training pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollaboratorPolicy {
    /// Any collaborator failure fails the pass.
    Required,
    /// Collaborator failures are logged and the locally trained champion is still
    /// returned, unregistered.
    BestEffort,
    /// Train and select only; nothing is tracked or registered.
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRequest {
    pub experiment: String,
    pub test_fraction: f64,
    pub seed: u64,
}

impl TrainingRequest {
    pub fn initial(config: &TrainingConfig) -> Self {
        Self {
            experiment: INITIAL_EXPERIMENT.to_string(),
            test_fraction: config.test_fraction,
            seed: config.seed,
        }
    }

    pub fn retrain(config: &TrainingConfig) -> Self {
        Self {
            experiment: retrain_experiment_name(Utc::now()),
            test_fraction: config.test_fraction,
            seed: config.seed,
        }
    }

    /// Rejects bad input before any data is loaded.
    pub fn validate(&self) -> Result<()> {
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(LifecycleError::InvalidParameter(format!(
                "test_fraction must be in (0, 1), got {}",
                self.test_fraction
            )));
        }
        validate_component("experiment", &self.experiment)
    }
}

#[derive(Debug)]
pub struct TrainingOutcome {
    pub experiment: String,
    pub runs: Vec<TrainingRun>,
    pub champion: TrainingRun,
    pub model: TrainedModel,
    /// `None` when the champion was not registered.
    pub version: Option<ModelVersion>,
}

/// Dataset → split → candidates → champion → tracker and registry.
pub struct TrainingPipeline {
    data_path: PathBuf,
    model_name: String,
    training: TrainingConfig,
    tracker: Arc<dyn ExperimentTracker>,
    registry: Arc<dyn ModelRegistry>,
    retry: RetryExecutor,
    candidates: CandidateFactory,
}

impl TrainingPipeline {
    pub fn new(
        config: &ServingConfig,
        tracker: Arc<dyn ExperimentTracker>,
        registry: Arc<dyn ModelRegistry>,
    ) -> Self {
        Self {
            data_path: config.data_path.clone(),
            model_name: config.model_name.clone(),
            training: config.training.clone(),
            tracker,
            registry,
            retry: RetryExecutor::new(config.retry.clone()),
            candidates: Arc::new(default_candidates),
        }
    }

    /// Replaces the candidate set produced for each pass.
    pub fn with_candidates(mut self, candidates: CandidateFactory) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn training_config(&self) -> &TrainingConfig {
        &self.training
    }

    pub fn registry(&self) -> &Arc<dyn ModelRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<dyn ExperimentTracker> {
        &self.tracker
    }

    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    pub async fn run(
        &self,
        request: &TrainingRequest,
        policy: CollaboratorPolicy,
    ) -> Result<TrainingOutcome> {
        request.validate()?;
        let orchestrator = TrainingOrchestrator::new(&TrainingConfig {
            test_fraction: request.test_fraction,
            seed: request.seed,
            ..self.training.clone()
        })?;

        info!(
            "🔄 Starting training pass '{}' (test_fraction={}, seed={})",
            request.experiment, request.test_fraction, request.seed
        );
        let started = Instant::now();

        let data_path = self.data_path.clone();
        let factory = self.candidates.clone();
        let job = request.clone();
        let mut results = tokio::task::spawn_blocking(move || {
            let examples = load_dataset(&data_path)?;
            let (split, scaler) = split_and_scale(&examples, job.test_fraction, job.seed)?;
            orchestrator.train_candidates(&job.experiment, &split, &scaler, (*factory)())
        })
        .await
        .map_err(|e| LifecycleError::TrainingFailed(format!("training task aborted: {}", e)))??;

        if policy != CollaboratorPolicy::Skip {
            for result in &results {
                let logged = self
                    .retry
                    .execute("log_run", || {
                        self.tracker.log_run(&result.run, result.artifact.as_deref())
                    })
                    .await;
                if let Err(e) = logged {
                    self.collaborator_failure(policy, "track run", e)?;
                }
            }
        }

        let runs: Vec<TrainingRun> = results.iter().map(|r| r.run.clone()).collect();
        let idx = champion_index(&runs)?;
        let champion_result = results.swap_remove(idx);
        let champion = champion_result.run;
        let (model, artifact) = match (champion_result.model, champion_result.artifact) {
            (Some(model), Some(artifact)) => (model, artifact),
            _ => {
                return Err(LifecycleError::NoViableModel(format!(
                    "champion {} has no model",
                    champion.candidate
                )))
            }
        };
        info!(
            "🏆 Champion for '{}': {} (accuracy {:.4})",
            request.experiment,
            champion.candidate,
            champion.test_accuracy.unwrap_or_default()
        );

        let version = if policy == CollaboratorPolicy::Skip {
            None
        } else {
            match self.register_and_promote(&champion, &artifact).await {
                Ok(version) => Some(version),
                Err(e) => {
                    self.collaborator_failure(policy, "register champion", e)?;
                    None
                }
            }
        };

        info!(
            "Training pass '{}' finished in {:.2}s",
            request.experiment,
            started.elapsed().as_secs_f64()
        );
        Ok(TrainingOutcome {
            experiment: request.experiment.clone(),
            runs,
            champion,
            model,
            version,
        })
    }

    async fn register_and_promote(
        &self,
        champion: &TrainingRun,
        artifact: &[u8],
    ) -> Result<ModelVersion> {
        let name = self.model_name.as_str();
        let registered = self
            .retry
            .execute("register", || self.registry.register(name, champion, artifact))
            .await?;
        self.retry
            .execute("promote", || {
                self.registry
                    .promote(name, registered.version, Stage::Production)
            })
            .await
    }

    fn collaborator_failure(
        &self,
        policy: CollaboratorPolicy,
        action: &str,
        error: LifecycleError,
    ) -> Result<()> {
        match policy {
            CollaboratorPolicy::Required => Err(error),
            _ => {
                warn!("⚠️ Could not {} ({}), continuing without it", action, error);
                Ok(())
            }
        }
    }
}
