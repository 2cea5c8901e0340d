// src/training/orchestrator.rs
use crate::error::{LifecycleError, Result};
use crate::features::split::{DataSplit, Scaler};
use crate::features::types::NUM_CLASSES;
use crate::models::metrics::{accuracy, classification_report, mean_std, ClassificationReport};
use crate::models::{Classifier, TrainedModel};
use crate::training::run::{RunStatus, TrainingRun};
use crate::utils::config::TrainingConfig;
use crate::utils::progress::candidate_progress_bar;
use chrono::Utc;
use log::{debug, info, warn};
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Produces a fresh, unfitted candidate set for every training pass.
pub type CandidateFactory = Arc<dyn Fn() -> Vec<Box<dyn Classifier>> + Send + Sync>;

/// A run together with what it produced. `model` and `artifact` are present exactly when
/// the run succeeded.
#[derive(Debug)]
pub struct CandidateResult {
    pub run: TrainingRun,
    pub model: Option<TrainedModel>,
    pub artifact: Option<Vec<u8>>,
}

struct Evaluation {
    test_accuracy: f64,
    cv_scores: Vec<f64>,
    report: ClassificationReport,
}

pub struct TrainingOrchestrator {
    cv_folds: usize,
    seed: u64,
    show_progress: bool,
}

impl TrainingOrchestrator {
    pub fn new(config: &TrainingConfig) -> Result<Self> {
        if config.cv_folds < 2 {
            return Err(LifecycleError::InvalidParameter(format!(
                "cv_folds must be at least 2, got {}",
                config.cv_folds
            )));
        }
        Ok(Self {
            cv_folds: config.cv_folds,
            seed: config.seed,
            show_progress: config.show_progress,
        })
    }

    /// Trains every candidate on the same split. A candidate that errors or panics is
    /// recorded as a failed run; the call only fails when no candidate succeeds.
    pub fn train_candidates(
        &self,
        experiment: &str,
        split: &DataSplit,
        scaler: &Scaler,
        candidates: Vec<Box<dyn Classifier>>,
    ) -> Result<Vec<CandidateResult>> {
        if candidates.is_empty() {
            return Err(LifecycleError::TrainingFailed(
                "no candidates were supplied".to_string(),
            ));
        }
        let folds = stratified_folds(&split.y_train, self.cv_folds, self.seed)?;
        let pb = candidate_progress_bar(self.show_progress, candidates.len());

        info!(
            "🧪 Training {} candidates for experiment '{}' ({}-fold CV)",
            candidates.len(),
            experiment,
            self.cv_folds
        );

        let mut results = Vec::with_capacity(candidates.len());
        for (index, candidate) in candidates.into_iter().enumerate() {
            if let Some(pb) = &pb {
                pb.set_message(format!("Training {}", candidate.name()));
            }
            results.push(self.train_one(experiment, index, candidate, split, scaler, &folds));
            if let Some(pb) = &pb {
                pb.inc(1);
            }
        }
        if let Some(pb) = pb {
            pb.finish_with_message("Candidates trained");
        }

        if results.iter().all(|r| !r.run.is_viable()) {
            let reasons: Vec<String> = results
                .iter()
                .map(|r| {
                    format!(
                        "{}: {}",
                        r.run.candidate,
                        r.run.error.as_deref().unwrap_or("unknown error")
                    )
                })
                .collect();
            return Err(LifecycleError::TrainingFailed(format!(
                "all {} candidates failed ({})",
                results.len(),
                reasons.join("; ")
            )));
        }
        Ok(results)
    }

    fn train_one(
        &self,
        experiment: &str,
        index: usize,
        mut candidate: Box<dyn Classifier>,
        split: &DataSplit,
        scaler: &Scaler,
        folds: &[Vec<usize>],
    ) -> CandidateResult {
        let name = candidate.name();
        let params = candidate.params();
        let started_at = Utc::now();
        let timer = Instant::now();
        info!("Training candidate {} ({})", index, name);

        let evaluated = panic::catch_unwind(AssertUnwindSafe(|| {
            evaluate(candidate.as_mut(), split, folds)
        }))
        .unwrap_or_else(|payload| Err(LifecycleError::TrainingFailed(panic_message(payload))));

        let outcome = evaluated.and_then(|evaluation| {
            let model = TrainedModel::new(candidate, scaler.clone());
            let artifact = model.to_artifact()?.to_bytes()?;
            Ok((evaluation, model, artifact))
        });
        let duration_ms = timer.elapsed().as_millis() as u64;

        let mut run = TrainingRun {
            run_id: Uuid::new_v4().to_string(),
            experiment: experiment.to_string(),
            candidate: name.to_string(),
            declaration_index: index,
            params,
            status: RunStatus::Failed,
            test_accuracy: None,
            cv_mean: None,
            cv_std: None,
            metrics: BTreeMap::new(),
            report: None,
            duration_ms,
            error: None,
            artifact_ref: None,
            started_at,
        };

        match outcome {
            Ok((evaluation, model, artifact)) => {
                let (cv_mean, cv_std) = mean_std(&evaluation.cv_scores);
                info!(
                    "✅ {}: test accuracy {:.4}, CV {:.4} ± {:.4} in {}ms",
                    name, evaluation.test_accuracy, cv_mean, cv_std, duration_ms
                );

                run.metrics.insert("accuracy".to_string(), evaluation.test_accuracy);
                run.metrics.insert("cv_mean".to_string(), cv_mean);
                run.metrics.insert("cv_std".to_string(), cv_std);
                run.metrics
                    .insert("macro_precision".to_string(), evaluation.report.macro_precision);
                run.metrics
                    .insert("macro_recall".to_string(), evaluation.report.macro_recall);
                run.metrics.insert("macro_f1".to_string(), evaluation.report.macro_f1);
                if let Some(importances) = model.classifier.feature_importances() {
                    for (i, value) in importances.iter().enumerate() {
                        run.metrics.insert(format!("feature_importance_{}", i), *value);
                    }
                }

                run.status = RunStatus::Succeeded;
                run.test_accuracy = Some(evaluation.test_accuracy);
                run.cv_mean = Some(cv_mean);
                run.cv_std = Some(cv_std);
                run.report = Some(evaluation.report);
                run.artifact_ref = Some(format!("sha256:{}", hex::encode(Sha256::digest(&artifact))));

                CandidateResult {
                    run,
                    model: Some(model),
                    artifact: Some(artifact),
                }
            }
            Err(e) => {
                warn!("❌ {} failed after {}ms: {}", name, duration_ms, e);
                run.error = Some(e.to_string());
                CandidateResult {
                    run,
                    model: None,
                    artifact: None,
                }
            }
        }
    }
}

fn evaluate(
    candidate: &mut dyn Classifier,
    split: &DataSplit,
    folds: &[Vec<usize>],
) -> Result<Evaluation> {
    let cv_scores = cross_validate(&*candidate, &split.x_train, &split.y_train, folds)?;

    candidate.fit(&split.x_train, &split.y_train)?;
    let predictions = split
        .x_test
        .rows()
        .into_iter()
        .map(|row| candidate.predict(row))
        .collect::<Result<Vec<usize>>>()?;

    Ok(Evaluation {
        test_accuracy: accuracy(&split.y_test, &predictions),
        cv_scores,
        report: classification_report(&split.y_test, &predictions),
    })
}

/// Accuracy of a fresh copy of `candidate` on each held-out fold.
pub fn cross_validate(
    candidate: &dyn Classifier,
    x: &Array2<f64>,
    y: &[usize],
    folds: &[Vec<usize>],
) -> Result<Vec<f64>> {
    let mut scores = Vec::with_capacity(folds.len());
    for (k, held_out) in folds.iter().enumerate() {
        let train_idx: Vec<usize> = folds
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != k)
            .flat_map(|(_, fold)| fold.iter().copied())
            .collect();

        let x_fold = x.select(Axis(0), &train_idx);
        let y_fold: Vec<usize> = train_idx.iter().map(|&i| y[i]).collect();
        let mut model = candidate.unfitted();
        model.fit(&x_fold, &y_fold)?;

        let x_val = x.select(Axis(0), held_out);
        let y_val: Vec<usize> = held_out.iter().map(|&i| y[i]).collect();
        let predictions = x_val
            .rows()
            .into_iter()
            .map(|row| model.predict(row))
            .collect::<Result<Vec<usize>>>()?;
        let score = accuracy(&y_val, &predictions);
        debug!("{} fold {}: accuracy {:.4}", candidate.name(), k + 1, score);
        scores.push(score);
    }
    Ok(scores)
}

/// Deals each class's shuffled indices round-robin across `k` folds so every fold keeps
/// the class proportions of `y`.
pub fn stratified_folds(y: &[usize], k: usize, seed: u64) -> Result<Vec<Vec<usize>>> {
    if k < 2 || k > y.len() {
        return Err(LifecycleError::InvalidParameter(format!(
            "cannot build {} folds over {} examples",
            k,
            y.len()
        )));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut folds = vec![Vec::new(); k];
    let mut next = 0;

    for class in 0..NUM_CLASSES {
        let mut members: Vec<usize> = (0..y.len()).filter(|&i| y[i] == class).collect();
        if !members.is_empty() && members.len() < k {
            warn!(
                "Class {} has only {} examples for {} folds",
                class,
                members.len(),
                k
            );
        }
        members.shuffle(&mut rng);
        for i in members {
            folds[next % k].push(i);
            next += 1;
        }
    }
    Ok(folds)
}

/// Index of the best viable run: highest held-out accuracy, ties to the earliest
/// declared candidate.
pub fn champion_index(runs: &[TrainingRun]) -> Result<usize> {
    let mut best: Option<(usize, &TrainingRun)> = None;
    for (i, run) in runs.iter().enumerate() {
        let accuracy = match (run.is_viable(), run.test_accuracy) {
            (true, Some(a)) => a,
            _ => continue,
        };
        let better = match best {
            None => true,
            Some((_, current)) => {
                let current_accuracy = current.test_accuracy.unwrap_or(f64::NEG_INFINITY);
                accuracy > current_accuracy
                    || (accuracy == current_accuracy
                        && run.declaration_index < current.declaration_index)
            }
        };
        if better {
            best = Some((i, run));
        }
    }

    best.map(|(i, _)| i).ok_or_else(|| {
        LifecycleError::NoViableModel(format!(
            "none of {} runs produced a usable model",
            runs.len()
        ))
    })
}

pub fn select_champion(runs: &[TrainingRun]) -> Result<TrainingRun> {
    let champion = runs[champion_index(runs)?].clone();
    info!(
        "🏆 Champion: {} (accuracy {:.4}, run {})",
        champion.candidate,
        champion.test_accuracy.unwrap_or_default(),
        champion.run_id
    );
    Ok(champion)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("candidate panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("candidate panicked: {}", s)
    } else {
        "candidate panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::dataset::canonical_dataset;
    use crate::features::split::split_and_scale;
    use crate::models::{
        default_candidates, ClassifierArtifact, LogisticRegression, Probabilities,
    };
    use crate::training::run::fixtures::run;
    use ndarray::ArrayView1;

    #[derive(Debug, Clone)]
    struct Exploding {
        panic: bool,
    }

    impl Classifier for Exploding {
        fn name(&self) -> &'static str {
            if self.panic {
                "panicking"
            } else {
                "erroring"
            }
        }
        fn params(&self) -> serde_json::Value {
            serde_json::json!({ "panic": self.panic })
        }
        fn fit(&mut self, _x: &Array2<f64>, _y: &[usize]) -> Result<()> {
            if self.panic {
                panic!("singular matrix");
            }
            Err(LifecycleError::TrainingFailed("did not converge".to_string()))
        }
        fn is_fitted(&self) -> bool {
            false
        }
        fn predict_proba(&self, _x: ArrayView1<f64>) -> Result<Probabilities> {
            Ok([1.0 / 3.0; 3])
        }
        fn unfitted(&self) -> Box<dyn Classifier> {
            Box::new(self.clone())
        }
        fn to_artifact(&self) -> Result<ClassifierArtifact> {
            Err(LifecycleError::Artifact("not serializable".to_string()))
        }
    }

    fn orchestrator() -> TrainingOrchestrator {
        TrainingOrchestrator::new(&TrainingConfig::default()).unwrap()
    }

    fn fast_candidates() -> Vec<Box<dyn Classifier>> {
        vec![
            Box::new(Exploding { panic: true }),
            Box::new(LogisticRegression::default()),
            Box::new(Exploding { panic: false }),
        ]
    }

    #[test]
    fn test_failed_candidates_are_recorded_not_propagated() {
        let data = canonical_dataset().unwrap();
        let (split, scaler) = split_and_scale(&data, 0.2, 42).unwrap();

        let results = orchestrator()
            .train_candidates("unit", &split, &scaler, fast_candidates())
            .unwrap();
        assert_eq!(results.len(), 3);

        assert_eq!(results[0].run.status, RunStatus::Failed);
        assert!(results[0].run.error.as_ref().unwrap().contains("panicked"));
        assert!(results[0].model.is_none());

        assert!(results[1].run.is_viable());
        assert!(results[1].artifact.is_some());
        assert!(results[1].run.artifact_ref.as_ref().unwrap().starts_with("sha256:"));
        assert_eq!(results[1].run.metrics.len(), 6);

        assert_eq!(results[2].run.status, RunStatus::Failed);

        let runs: Vec<TrainingRun> = results.into_iter().map(|r| r.run).collect();
        assert_eq!(select_champion(&runs).unwrap().candidate, "logistic_regression");
    }

    #[test]
    fn test_all_candidates_failing_is_training_failed() {
        let data = canonical_dataset().unwrap();
        let (split, scaler) = split_and_scale(&data, 0.2, 42).unwrap();
        let candidates: Vec<Box<dyn Classifier>> = vec![
            Box::new(Exploding { panic: false }),
            Box::new(Exploding { panic: true }),
        ];
        let err = orchestrator()
            .train_candidates("unit", &split, &scaler, candidates)
            .unwrap_err();
        assert!(matches!(err, LifecycleError::TrainingFailed(_)));
    }

    #[test]
    fn test_full_candidate_set_reports_importances_for_forest() {
        let data = canonical_dataset().unwrap();
        let (split, scaler) = split_and_scale(&data, 0.2, 42).unwrap();
        let results = orchestrator()
            .train_candidates("unit", &split, &scaler, default_candidates())
            .unwrap();

        assert!(results.iter().all(|r| r.run.is_viable()));
        let forest = &results[1].run;
        assert_eq!(forest.candidate, "random_forest");
        assert!(forest.metrics.contains_key("feature_importance_3"));
        assert!(!results[0].run.metrics.contains_key("feature_importance_0"));
        for r in &results {
            let cv = r.run.cv_mean.unwrap();
            assert!(cv > 0.7 && cv <= 1.0);
        }
    }

    #[test]
    fn test_stratified_folds_cover_each_index_once() {
        let y: Vec<usize> = (0..30).map(|i| i % 3).collect();
        let folds = stratified_folds(&y, 5, 7).unwrap();
        assert_eq!(folds.len(), 5);

        let mut seen: Vec<usize> = folds.iter().flatten().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..30).collect::<Vec<_>>());
        for fold in &folds {
            assert_eq!(fold.len(), 6);
            for class in 0..3 {
                assert_eq!(fold.iter().filter(|&&i| y[i] == class).count(), 2);
            }
        }
        assert!(stratified_folds(&y, 1, 7).is_err());
        assert!(stratified_folds(&y[..3], 5, 7).is_err());
    }

    #[test]
    fn test_champion_ties_break_by_declaration_order() {
        let runs = vec![
            run("logistic_regression", 0, Some(0.93)),
            run("random_forest", 1, Some(0.97)),
            run("svm", 2, Some(0.97)),
        ];
        for _ in 0..10 {
            assert_eq!(select_champion(&runs).unwrap().candidate, "random_forest");
        }

        let reversed: Vec<TrainingRun> = runs.iter().rev().cloned().collect();
        assert_eq!(select_champion(&reversed).unwrap().candidate, "random_forest");
    }

    #[test]
    fn test_no_viable_model() {
        assert!(matches!(
            select_champion(&[]),
            Err(LifecycleError::NoViableModel(_))
        ));
        let failed = vec![run("a", 0, None), run("b", 1, None)];
        assert!(matches!(
            champion_index(&failed),
            Err(LifecycleError::NoViableModel(_))
        ));
    }

    #[test]
    fn test_rejects_single_fold() {
        let config = TrainingConfig {
            cv_folds: 1,
            ..Default::default()
        };
        assert!(matches!(
            TrainingOrchestrator::new(&config),
            Err(LifecycleError::InvalidParameter(_))
        ));
    }
}
