// src/error.rs
//! Error taxonomy shared by the feature pipeline, training, registry and serving layers.
//!
//! Every fallible library call returns [`Result`]. Callers that need to decide between
//! "retry later" and "fix the input" use [`LifecycleError::is_retryable`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The dataset could neither be read nor synthesized.
    #[error("Dataset unavailable: {0}")]
    DataUnavailable(String),

    /// Bad split or hyperparameter input, rejected before any work starts.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Every candidate failed during one training attempt.
    #[error("Training failed: {0}")]
    TrainingFailed(String),

    #[error("No viable model: {0}")]
    NoViableModel(String),

    /// The tracking service or the model registry could not be reached.
    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// A prediction arrived while the active slot was still empty.
    #[error("Model not ready: {0}")]
    ModelNotReady(String),

    #[error("A retrain is already in progress")]
    RetrainInProgress,

    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Stored artifact is corrupt, truncated or fails its checksum.
    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl LifecycleError {
    /// Transient failures that may succeed if the caller tries again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LifecycleError::RegistryUnavailable(_)
                | LifecycleError::Timeout(_)
                | LifecycleError::RetrainInProgress
                | LifecycleError::ModelNotReady(_)
        )
    }

    /// Short machine-readable kind, used in logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleError::DataUnavailable(_) => "data_unavailable",
            LifecycleError::InvalidParameter(_) => "invalid_parameter",
            LifecycleError::TrainingFailed(_) => "training_failed",
            LifecycleError::NoViableModel(_) => "no_viable_model",
            LifecycleError::RegistryUnavailable(_) => "registry_unavailable",
            LifecycleError::ModelNotReady(_) => "model_not_ready",
            LifecycleError::RetrainInProgress => "retrain_in_progress",
            LifecycleError::Timeout(_) => "timeout",
            LifecycleError::Artifact(_) => "artifact",
            LifecycleError::Serialization(_) => "serialization",
        }
    }
}

impl From<serde_json::Error> for LifecycleError {
    fn from(e: serde_json::Error) -> Self {
        LifecycleError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
