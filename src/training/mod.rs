// src/training/mod.rs
pub mod orchestrator;
pub mod pipeline;
pub mod run;
pub mod tracking;

pub use orchestrator::{
    champion_index, select_champion, CandidateFactory, CandidateResult, TrainingOrchestrator,
};
pub use pipeline::{CollaboratorPolicy, TrainingOutcome, TrainingPipeline, TrainingRequest};
pub use run::{compare_runs, RunComparison, RunStatus, TrainingRun};
pub use tracking::{ExperimentTracker, FsExperimentTracker};
