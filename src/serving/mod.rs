// src/serving/mod.rs
pub mod engine;
pub mod slot;
pub mod types;

pub use engine::ServingEngine;
pub use slot::{LoadedModel, ModelSlot};
pub use types::{EngineState, HealthReport, ModelInfo, Prediction, RetrainRequest, ServedVersion};
