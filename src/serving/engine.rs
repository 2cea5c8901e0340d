// src/serving/engine.rs
use crate::error::{LifecycleError, Result};
use crate::features::types::FeatureVector;
use crate::models::ModelArtifact;
use crate::registry::{FsModelRegistry, ModelRegistry, ModelVersion};
use crate::serving::slot::{LoadedModel, ModelSlot};
use crate::serving::types::{
    EngineState, HealthReport, ModelInfo, Prediction, RetrainRequest, ServedVersion,
};
use crate::training::pipeline::{
    retrain_experiment_name, CollaboratorPolicy, TrainingPipeline, TrainingRequest,
};
use crate::training::tracking::{ExperimentTracker, FsExperimentTracker};
use crate::utils::config::ServingConfig;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Puts the engine back into `Ready` when a retrain ends, however it ends.
struct ReadyOnDrop<'a>(&'a AtomicU8);

impl Drop for ReadyOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(EngineState::Ready as u8, Ordering::SeqCst);
    }
}

/// Owns the active model slot and drives it through
/// `Empty → Loading → Ready ⇄ Retraining`.
pub struct ServingEngine {
    pipeline: TrainingPipeline,
    slot: ModelSlot,
    state: AtomicU8,
    retrain_lock: Mutex<()>,
}

impl ServingEngine {
    pub fn new(
        config: &ServingConfig,
        tracker: Arc<dyn ExperimentTracker>,
        registry: Arc<dyn ModelRegistry>,
    ) -> Self {
        Self::with_pipeline(TrainingPipeline::new(config, tracker, registry))
    }

    /// Engine backed by the filesystem tracker and registry under `artifact_root`.
    pub fn from_config(config: &ServingConfig) -> Self {
        let tracker = Arc::new(FsExperimentTracker::new(&config.artifact_root));
        let registry = Arc::new(FsModelRegistry::new(&config.artifact_root));
        Self::new(config, tracker, registry)
    }

    pub fn with_pipeline(pipeline: TrainingPipeline) -> Self {
        Self {
            pipeline,
            slot: ModelSlot::new(),
            state: AtomicU8::new(EngineState::Empty as u8),
            retrain_lock: Mutex::new(()),
        }
    }

    pub fn pipeline(&self) -> &TrainingPipeline {
        &self.pipeline
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: EngineState) {
        debug!("Engine state -> {}", state);
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub async fn current_version(&self) -> Option<ServedVersion> {
        self.slot.snapshot().await.map(|loaded| loaded.version.clone())
    }

    /// Loads the registry's production model, or trains, registers and promotes one when
    /// there is none or it cannot be loaded. Fails only when no model could be produced.
    pub async fn startup(&self) -> Result<ServedVersion> {
        if let Err(current) = self.state.compare_exchange(
            EngineState::Empty as u8,
            EngineState::Loading as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            return match EngineState::from_u8(current) {
                EngineState::Ready | EngineState::Retraining => {
                    self.current_version().await.ok_or_else(|| {
                        LifecycleError::ModelNotReady("slot is empty".to_string())
                    })
                }
                state => Err(LifecycleError::ModelNotReady(format!(
                    "startup already in progress ({})",
                    state
                ))),
            };
        }

        info!("🚀 Starting serving engine for '{}'", self.pipeline.model_name());
        match self.load_or_bootstrap().await {
            Ok(loaded) => {
                let version = loaded.version.clone();
                self.slot.swap(Arc::new(loaded)).await;
                self.set_state(EngineState::Ready);
                info!(
                    "✅ Serving {} version {} ({})",
                    version.model_name, version.version, version.candidate
                );
                Ok(version)
            }
            Err(e) => {
                self.set_state(EngineState::Empty);
                Err(e)
            }
        }
    }

    async fn load_or_bootstrap(&self) -> Result<LoadedModel> {
        match self.load_production().await {
            Ok(Some(loaded)) => return Ok(loaded),
            Ok(None) => info!("No production model registered, bootstrapping"),
            Err(e) => warn!("⚠️ Could not load production model ({}), bootstrapping locally", e),
        }
        self.bootstrap().await
    }

    async fn load_production(&self) -> Result<Option<LoadedModel>> {
        let registry = self.pipeline.registry();
        let retry = self.pipeline.retry();
        let name = self.pipeline.model_name();

        let production = retry
            .execute("get_production", || registry.get_production(name))
            .await?;
        let version = match production {
            Some(version) => version,
            None => return Ok(None),
        };

        let bytes = retry
            .execute("load_artifact", || registry.load_artifact(name, version.version))
            .await?;
        let artifact = ModelArtifact::from_bytes(&bytes)?;
        let trained_at = artifact.trained_at;
        let model = artifact.into_model()?;
        info!(
            "Loaded production version {} of '{}' ({})",
            version.version, name, version.candidate
        );
        Ok(Some(LoadedModel::new(
            model,
            ServedVersion::from_registry(&version, trained_at),
        )))
    }

    async fn bootstrap(&self) -> Result<LoadedModel> {
        let request = TrainingRequest::initial(self.pipeline.training_config());
        let outcome = self
            .pipeline
            .run(&request, CollaboratorPolicy::BestEffort)
            .await?;

        let version = match &outcome.version {
            Some(version) => ServedVersion::from_registry(version, outcome.champion.started_at),
            None => {
                warn!("⚠️ Champion was not registered, serving it as unregistered version 0");
                ServedVersion::unregistered(self.pipeline.model_name(), &outcome.champion)
            }
        };
        Ok(LoadedModel::new(outcome.model, version))
    }

    async fn loaded(&self) -> Result<Arc<LoadedModel>> {
        self.slot.snapshot().await.ok_or_else(|| {
            LifecycleError::ModelNotReady(format!("no model loaded (engine is {})", self.state()))
        })
    }

    pub async fn predict(&self, features: &FeatureVector) -> Result<Prediction> {
        let loaded = self.loaded().await?;
        let (label, scores) = loaded.model.predict(features)?;
        Ok(Prediction::new(label, scores, loaded.version.version))
    }

    /// Scores every item against one snapshot, so a swap mid-batch cannot split the
    /// batch across versions. Results keep input order.
    pub async fn predict_batch(&self, batch: &[FeatureVector]) -> Result<Vec<Prediction>> {
        let loaded = self.loaded().await?;
        let version = loaded.version.version;
        batch
            .iter()
            .map(|features| {
                let (label, scores) = loaded.model.predict(features)?;
                Ok(Prediction::new(label, scores, version))
            })
            .collect()
    }

    pub async fn retrain(&self) -> Result<ModelVersion> {
        self.retrain_with(RetrainRequest::default()).await
    }

    /// Trains a new champion, registers and promotes it, then swaps it into the slot.
    /// On any failure the previous model keeps serving.
    pub async fn retrain_with(&self, request: RetrainRequest) -> Result<ModelVersion> {
        let _exclusive = self
            .retrain_lock
            .try_lock()
            .map_err(|_| LifecycleError::RetrainInProgress)?;

        let previous = self.current_version().await.ok_or_else(|| {
            LifecycleError::ModelNotReady(format!(
                "cannot retrain before a model is loaded (engine is {})",
                self.state()
            ))
        })?;

        let config = self.pipeline.training_config();
        let training_request = TrainingRequest {
            experiment: request
                .experiment_name
                .unwrap_or_else(|| retrain_experiment_name(Utc::now())),
            test_fraction: request.test_fraction.unwrap_or(config.test_fraction),
            seed: request.seed.unwrap_or(config.seed),
        };
        training_request.validate()?;

        self.set_state(EngineState::Retraining);
        let _ready = ReadyOnDrop(&self.state);
        info!(
            "🔄 Retraining '{}' while serving version {}",
            training_request.experiment, previous.version
        );

        let outcome = match self
            .pipeline
            .run(&training_request, CollaboratorPolicy::Required)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    "❌ Retrain failed, still serving version {}: {}",
                    previous.version, e
                );
                return Err(e);
            }
        };
        let version = outcome.version.ok_or_else(|| {
            LifecycleError::RegistryUnavailable("champion was not registered".to_string())
        })?;

        let next = LoadedModel::new(
            outcome.model,
            ServedVersion::from_registry(&version, outcome.champion.started_at),
        );
        self.slot.swap(Arc::new(next)).await;
        info!(
            "✅ Swapped active model: version {} -> {} ({})",
            previous.version, version.version, version.candidate
        );
        Ok(version)
    }

    pub async fn health(&self) -> HealthReport {
        let loaded = self.slot.snapshot().await;
        let state = self.state();
        HealthReport {
            healthy: loaded.is_some()
                && matches!(state, EngineState::Ready | EngineState::Retraining),
            state,
            model_loaded: loaded.is_some(),
            model_version: loaded.map(|l| l.version.version),
            timestamp: Utc::now(),
        }
    }

    pub async fn model_info(&self) -> Result<ModelInfo> {
        let loaded = self.loaded().await?;
        let v = &loaded.version;
        Ok(ModelInfo {
            model_name: v.model_name.clone(),
            version: v.version,
            registered: v.registered,
            stage: v.stage,
            candidate: v.candidate.clone(),
            test_accuracy: v.test_accuracy,
            trained_at: v.trained_at,
            run_id: v.run_id.clone(),
            loaded_at: loaded.loaded_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::types::IrisClass;
    use crate::models::{Classifier, ClassifierArtifact, LogisticRegression, Probabilities};
    use crate::training::run::TrainingRun;
    use crate::registry::Stage;
    use crate::utils::retry::RetryConfig;
    use async_trait::async_trait;
    use ndarray::{Array2, ArrayView1};
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    #[derive(Debug, Clone)]
    struct AlwaysFails;

    impl Classifier for AlwaysFails {
        fn name(&self) -> &'static str {
            "always_fails"
        }
        fn params(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        fn fit(&mut self, _x: &Array2<f64>, _y: &[usize]) -> Result<()> {
            Err(LifecycleError::TrainingFailed("forced failure".to_string()))
        }
        fn is_fitted(&self) -> bool {
            false
        }
        fn predict_proba(&self, _x: ArrayView1<f64>) -> Result<Probabilities> {
            Err(LifecycleError::ModelNotReady("never fitted".to_string()))
        }
        fn unfitted(&self) -> Box<dyn Classifier> {
            Box::new(self.clone())
        }
        fn to_artifact(&self) -> Result<ClassifierArtifact> {
            Err(LifecycleError::Artifact("never fitted".to_string()))
        }
    }

    struct UnavailableRegistry;

    #[async_trait]
    impl ModelRegistry for UnavailableRegistry {
        async fn register(&self, _: &str, _: &TrainingRun, _: &[u8]) -> Result<ModelVersion> {
            Err(LifecycleError::RegistryUnavailable("connection refused".to_string()))
        }
        async fn promote(&self, _: &str, _: u32, _: Stage) -> Result<ModelVersion> {
            Err(LifecycleError::RegistryUnavailable("connection refused".to_string()))
        }
        async fn get_production(&self, _: &str) -> Result<Option<ModelVersion>> {
            Err(LifecycleError::RegistryUnavailable("connection refused".to_string()))
        }
        async fn load_artifact(&self, _: &str, _: u32) -> Result<Vec<u8>> {
            Err(LifecycleError::RegistryUnavailable("connection refused".to_string()))
        }
        async fn list_versions(&self, _: &str) -> Result<Vec<ModelVersion>> {
            Err(LifecycleError::RegistryUnavailable("connection refused".to_string()))
        }
    }

    fn config(dir: &TempDir) -> ServingConfig {
        let mut config = ServingConfig::rooted_at(dir.path());
        config.retry = RetryConfig::no_retry();
        config
    }

    /// Engine whose candidates all fail while `fail` is set.
    fn switchable_engine(
        config: &ServingConfig,
        registry: Arc<dyn ModelRegistry>,
        fail: Arc<AtomicBool>,
    ) -> ServingEngine {
        let tracker = Arc::new(FsExperimentTracker::new(&config.artifact_root));
        let pipeline = TrainingPipeline::new(config, tracker, registry).with_candidates(Arc::new(
            move || -> Vec<Box<dyn Classifier>> {
                if fail.load(Ordering::SeqCst) {
                    vec![Box::new(AlwaysFails), Box::new(AlwaysFails)]
                } else {
                    vec![Box::new(LogisticRegression::default()), Box::new(AlwaysFails)]
                }
            },
        ));
        ServingEngine::with_pipeline(pipeline)
    }

    fn setosa() -> FeatureVector {
        FeatureVector::new([5.0, 3.4, 1.5, 0.2]).unwrap()
    }

    #[tokio::test]
    async fn test_predict_before_startup_is_not_ready() {
        let dir = TempDir::new().unwrap();
        let engine = ServingEngine::from_config(&config(&dir));

        assert_eq!(engine.state(), EngineState::Empty);
        let err = engine.predict(&setosa()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::ModelNotReady(_)));
        assert!(matches!(
            engine.retrain().await,
            Err(LifecycleError::ModelNotReady(_))
        ));

        let health = engine.health().await;
        assert!(!health.healthy);
        assert_eq!(health.state, EngineState::Empty);
        assert!(health.model_version.is_none());
    }

    #[tokio::test]
    async fn test_cold_start_bootstraps_and_registers() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let registry: Arc<dyn ModelRegistry> = Arc::new(FsModelRegistry::new(&cfg.artifact_root));
        let engine = switchable_engine(&cfg, registry.clone(), Arc::new(AtomicBool::new(false)));

        let served = engine.startup().await.unwrap();
        assert_eq!(served.version, 1);
        assert!(served.registered);
        assert_eq!(engine.state(), EngineState::Ready);

        let production = registry.get_production(&cfg.model_name).await.unwrap().unwrap();
        assert_eq!(production.version, 1);
        assert_eq!(production.candidate, "logistic_regression");

        let prediction = engine.predict(&setosa()).await.unwrap();
        assert_eq!(prediction.label, IrisClass::Setosa);
        assert_eq!(prediction.model_version, 1);

        // A second startup is a no-op.
        assert_eq!(engine.startup().await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_failed_retrain_keeps_previous_model() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let fail = Arc::new(AtomicBool::new(false));
        let registry: Arc<dyn ModelRegistry> = Arc::new(FsModelRegistry::new(&cfg.artifact_root));
        let engine = switchable_engine(&cfg, registry, fail.clone());
        engine.startup().await.unwrap();
        let before = engine.predict(&setosa()).await.unwrap();

        fail.store(true, Ordering::SeqCst);
        let err = engine.retrain().await.unwrap_err();
        assert!(matches!(err, LifecycleError::TrainingFailed(_)));
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.predict(&setosa()).await.unwrap(), before);

        fail.store(false, Ordering::SeqCst);
        let version = engine.retrain().await.unwrap();
        assert_eq!(version.version, 2);
        assert_eq!(engine.predict(&setosa()).await.unwrap().model_version, 2);
    }

    #[tokio::test]
    async fn test_invalid_override_rejected_without_state_change() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let registry: Arc<dyn ModelRegistry> = Arc::new(FsModelRegistry::new(&cfg.artifact_root));
        let engine = switchable_engine(&cfg, registry, Arc::new(AtomicBool::new(false)));
        engine.startup().await.unwrap();

        let request = RetrainRequest {
            test_fraction: Some(1.5),
            ..Default::default()
        };
        assert!(matches!(
            engine.retrain_with(request).await,
            Err(LifecycleError::InvalidParameter(_))
        ));
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.current_version().await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_second_concurrent_retrain_is_rejected() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let registry: Arc<dyn ModelRegistry> = Arc::new(FsModelRegistry::new(&cfg.artifact_root));
        let engine = switchable_engine(&cfg, registry, Arc::new(AtomicBool::new(false)));
        engine.startup().await.unwrap();

        let (first, second) = tokio::join!(engine.retrain(), engine.retrain());
        assert_eq!(first.unwrap().version, 2);
        assert!(matches!(second, Err(LifecycleError::RetrainInProgress)));
    }

    #[tokio::test]
    async fn test_registry_outage_serves_unregistered_bootstrap() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let engine = switchable_engine(
            &cfg,
            Arc::new(UnavailableRegistry),
            Arc::new(AtomicBool::new(false)),
        );

        let served = engine.startup().await.unwrap();
        assert_eq!(served.version, 0);
        assert!(!served.registered);
        assert_eq!(engine.predict(&setosa()).await.unwrap().model_version, 0);

        let info = engine.model_info().await.unwrap();
        assert_eq!(info.candidate, "logistic_regression");
        assert!(info.stage.is_none());

        // Retrain requires the registry and leaves version 0 in place.
        assert!(matches!(
            engine.retrain().await,
            Err(LifecycleError::RegistryUnavailable(_))
        ));
        assert_eq!(engine.current_version().await.unwrap().version, 0);
        assert!(engine.health().await.healthy);
    }

    #[tokio::test]
    async fn test_startup_fails_when_nothing_can_be_trained() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let registry: Arc<dyn ModelRegistry> = Arc::new(FsModelRegistry::new(&cfg.artifact_root));
        let engine = switchable_engine(&cfg, registry, Arc::new(AtomicBool::new(true)));

        assert!(matches!(
            engine.startup().await,
            Err(LifecycleError::TrainingFailed(_))
        ));
        assert_eq!(engine.state(), EngineState::Empty);
    }
}
