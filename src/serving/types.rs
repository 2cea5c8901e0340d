// src/serving/types.rs
use crate::features::types::{IrisClass, NUM_CLASSES};
use crate::registry::{ModelVersion, Stage};
use crate::training::run::TrainingRun;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EngineState {
    Empty = 0,
    Loading = 1,
    Ready = 2,
    Retraining = 3,
}

impl EngineState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => EngineState::Loading,
            2 => EngineState::Ready,
            3 => EngineState::Retraining,
            _ => EngineState::Empty,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Empty => "empty",
            EngineState::Loading => "loading",
            EngineState::Ready => "ready",
            EngineState::Retraining => "retraining",
        };
        f.write_str(s)
    }
}

/// Version metadata of the model in the active slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServedVersion {
    pub model_name: String,
    /// Registry version; 0 for a model trained locally that never reached the registry.
    pub version: u32,
    pub registered: bool,
    pub stage: Option<Stage>,
    pub run_id: String,
    pub candidate: String,
    pub test_accuracy: Option<f64>,
    pub trained_at: DateTime<Utc>,
}

impl ServedVersion {
    pub fn from_registry(version: &ModelVersion, trained_at: DateTime<Utc>) -> Self {
        Self {
            model_name: version.name.clone(),
            version: version.version,
            registered: true,
            stage: Some(version.stage),
            run_id: version.run_id.clone(),
            candidate: version.candidate.clone(),
            test_accuracy: version.test_accuracy,
            trained_at,
        }
    }

    pub fn unregistered(model_name: &str, champion: &TrainingRun) -> Self {
        Self {
            model_name: model_name.to_string(),
            version: 0,
            registered: false,
            stage: None,
            run_id: champion.run_id.clone(),
            candidate: champion.candidate.clone(),
            test_accuracy: champion.test_accuracy,
            trained_at: champion.started_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: IrisClass,
    /// Probability of `label`.
    pub confidence: f64,
    pub probabilities: BTreeMap<IrisClass, f64>,
    pub model_version: u32,
}

impl Prediction {
    pub fn new(label: IrisClass, scores: [f64; NUM_CLASSES], model_version: u32) -> Self {
        let probabilities = IrisClass::ALL.iter().copied().zip(scores).collect();
        Self {
            label,
            confidence: scores[label.index()],
            probabilities,
            model_version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub state: EngineState,
    pub model_loaded: bool,
    pub model_version: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_name: String,
    pub version: u32,
    pub registered: bool,
    pub stage: Option<Stage>,
    pub candidate: String,
    pub test_accuracy: Option<f64>,
    pub trained_at: DateTime<Utc>,
    pub run_id: String,
    pub loaded_at: DateTime<Utc>,
}

/// Per-call overrides for a retrain; unset fields fall back to the engine config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrainRequest {
    pub experiment_name: Option<String>,
    pub test_fraction: Option<f64>,
    pub seed: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_u8() {
        for state in [
            EngineState::Empty,
            EngineState::Loading,
            EngineState::Ready,
            EngineState::Retraining,
        ] {
            assert_eq!(EngineState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_prediction_confidence_is_label_probability() {
        let p = Prediction::new(IrisClass::Versicolor, [0.1, 0.7, 0.2], 3);
        assert_eq!(p.confidence, 0.7);
        assert_eq!(p.probabilities[&IrisClass::Virginica], 0.2);

        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["label"], "versicolor");
        assert_eq!(json["model_version"], 3);
    }
}
