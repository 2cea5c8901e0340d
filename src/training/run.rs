// src/training/run.rs
use crate::models::metrics::ClassificationReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// Outcome of one candidate in one training pass. Never mutated after the orchestrator
/// builds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRun {
    pub run_id: String,
    pub experiment: String,
    pub candidate: String,
    /// Position of the candidate in the declared candidate set.
    pub declaration_index: usize,
    pub params: serde_json::Value,
    pub status: RunStatus,
    /// Held-out accuracy; `None` for failed runs.
    pub test_accuracy: Option<f64>,
    pub cv_mean: Option<f64>,
    pub cv_std: Option<f64>,
    pub metrics: BTreeMap<String, f64>,
    pub report: Option<ClassificationReport>,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// `sha256:<digest>` of the serialized model artifact.
    pub artifact_ref: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl TrainingRun {
    pub fn is_viable(&self) -> bool {
        self.status == RunStatus::Succeeded && self.test_accuracy.is_some()
    }
}

/// One row of the side-by-side candidate comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunComparison {
    pub rank: usize,
    pub candidate: String,
    pub run_id: String,
    pub status: RunStatus,
    pub test_accuracy: Option<f64>,
    pub cv_mean: Option<f64>,
    pub cv_std: Option<f64>,
    pub macro_f1: Option<f64>,
    pub duration_ms: u64,
}

/// Ranks runs by held-out accuracy, best first. Failed runs go last, and equal
/// accuracies keep declaration order.
pub fn compare_runs(runs: &[TrainingRun]) -> Vec<RunComparison> {
    let mut ordered: Vec<&TrainingRun> = runs.iter().collect();
    ordered.sort_by(|a, b| match (a.test_accuracy, b.test_accuracy) {
        (Some(x), Some(y)) => y
            .partial_cmp(&x)
            .unwrap_or(Ordering::Equal)
            .then(a.declaration_index.cmp(&b.declaration_index)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.declaration_index.cmp(&b.declaration_index),
    });

    ordered
        .into_iter()
        .enumerate()
        .map(|(i, run)| RunComparison {
            rank: i + 1,
            candidate: run.candidate.clone(),
            run_id: run.run_id.clone(),
            status: run.status,
            test_accuracy: run.test_accuracy,
            cv_mean: run.cv_mean,
            cv_std: run.cv_std,
            macro_f1: run.report.as_ref().map(|r| r.macro_f1),
            duration_ms: run.duration_ms,
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn run(candidate: &str, index: usize, accuracy: Option<f64>) -> TrainingRun {
        TrainingRun {
            run_id: format!("run-{}", index),
            experiment: "unit".to_string(),
            candidate: candidate.to_string(),
            declaration_index: index,
            params: serde_json::json!({}),
            status: if accuracy.is_some() {
                RunStatus::Succeeded
            } else {
                RunStatus::Failed
            },
            test_accuracy: accuracy,
            cv_mean: accuracy,
            cv_std: accuracy.map(|_| 0.0),
            metrics: BTreeMap::new(),
            report: None,
            duration_ms: 10,
            error: accuracy.is_none().then(|| "boom".to_string()),
            artifact_ref: None,
            started_at: Utc::now(),
        }
    }
}
