// src/models/mod.rs
pub mod forest;
pub mod logistic;
pub mod metrics;
pub mod svm;

use crate::error::{LifecycleError, Result};
use crate::features::split::Scaler;
use crate::features::types::{FeatureVector, IrisClass, NUM_CLASSES, NUM_FEATURES};
use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use forest::{RandomForest, RandomForestParams};
pub use logistic::{LogisticRegression, LogisticRegressionParams};
pub use metrics::{classification_report, ClassificationReport};
pub use svm::{RbfSvm, RbfSvmParams};

pub type Probabilities = [f64; NUM_CLASSES];

/// The capability every candidate implements. The orchestrator and the serving engine only
/// ever talk to a `dyn Classifier`.
pub trait Classifier: Send + Sync + fmt::Debug {
    /// Stable candidate identifier, e.g. `random_forest`.
    fn name(&self) -> &'static str;

    fn params(&self) -> serde_json::Value;

    /// Fits on a scaled design matrix with class indices in `0..NUM_CLASSES`.
    fn fit(&mut self, x: &Array2<f64>, y: &[usize]) -> Result<()>;

    fn is_fitted(&self) -> bool;

    /// Probability-like distribution over the classes for one scaled row.
    fn predict_proba(&self, x: ArrayView1<f64>) -> Result<Probabilities>;

    fn predict(&self, x: ArrayView1<f64>) -> Result<usize> {
        Ok(argmax(&self.predict_proba(x)?))
    }

    /// A fresh copy with the same hyperparameters and no fitted state. Used for
    /// cross-validation folds.
    fn unfitted(&self) -> Box<dyn Classifier>;

    fn to_artifact(&self) -> Result<ClassifierArtifact>;

    fn feature_importances(&self) -> Option<[f64; NUM_FEATURES]> {
        None
    }
}

/// First index of the maximum. Ties resolve to the lower class index.
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

pub fn softmax(logits: &[f64]) -> Probabilities {
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut out = [0.0; NUM_CLASSES];
    let mut total = 0.0;
    for (o, l) in out.iter_mut().zip(logits) {
        *o = (l - max).exp();
        total += *o;
    }
    for o in out.iter_mut() {
        *o /= total;
    }
    out
}

pub(crate) fn validate_training_input(name: &str, x: &Array2<f64>, y: &[usize]) -> Result<()> {
    if x.nrows() == 0 {
        return Err(LifecycleError::TrainingFailed(format!(
            "{}: empty training set",
            name
        )));
    }
    if x.nrows() != y.len() || x.ncols() != NUM_FEATURES {
        return Err(LifecycleError::TrainingFailed(format!(
            "{}: design matrix {}x{} does not match {} labels",
            name,
            x.nrows(),
            x.ncols(),
            y.len()
        )));
    }
    if let Some(bad) = y.iter().find(|&&label| label >= NUM_CLASSES) {
        return Err(LifecycleError::TrainingFailed(format!(
            "{}: label index {} out of range",
            name, bad
        )));
    }
    Ok(())
}

pub(crate) fn not_fitted(name: &str) -> LifecycleError {
    LifecycleError::ModelNotReady(format!("{} has not been fitted", name))
}

/// Serialized form of a fitted classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierArtifact {
    LogisticRegression(LogisticRegression),
    RandomForest(RandomForest),
    Svm(RbfSvm),
}

impl ClassifierArtifact {
    pub fn into_classifier(self) -> Result<Box<dyn Classifier>> {
        let classifier: Box<dyn Classifier> = match self {
            ClassifierArtifact::LogisticRegression(m) => Box::new(m),
            ClassifierArtifact::RandomForest(m) => Box::new(m),
            ClassifierArtifact::Svm(m) => Box::new(m),
        };
        if !classifier.is_fitted() {
            return Err(LifecycleError::Artifact(format!(
                "{} artifact carries no fitted state",
                classifier.name()
            )));
        }
        Ok(classifier)
    }
}

/// Everything needed to serve a model: the fitted classifier plus the scaler fit on its
/// training partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub candidate: String,
    pub classifier: ClassifierArtifact,
    pub scaler: Scaler,
    pub trained_at: DateTime<Utc>,
}

impl ModelArtifact {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| LifecycleError::Artifact(format!("unreadable model artifact: {}", e)))
    }

    pub fn into_model(self) -> Result<TrainedModel> {
        Ok(TrainedModel {
            classifier: self.classifier.into_classifier()?,
            scaler: self.scaler,
        })
    }
}

/// A fitted classifier bound to its scaler. Raw feature vectors go in, class
/// distributions come out.
#[derive(Debug)]
pub struct TrainedModel {
    pub classifier: Box<dyn Classifier>,
    pub scaler: Scaler,
}

impl TrainedModel {
    pub fn new(classifier: Box<dyn Classifier>, scaler: Scaler) -> Self {
        Self { classifier, scaler }
    }

    pub fn predict(&self, features: &FeatureVector) -> Result<(IrisClass, Probabilities)> {
        let scaled = self.scaler.transform(features);
        let probabilities = self.classifier.predict_proba(scaled.view())?;
        let label = IrisClass::from_index(argmax(&probabilities)).ok_or_else(|| {
            LifecycleError::Artifact("classifier produced an unknown class index".to_string())
        })?;
        Ok((label, probabilities))
    }

    pub fn to_artifact(&self) -> Result<ModelArtifact> {
        Ok(ModelArtifact {
            candidate: self.classifier.name().to_string(),
            classifier: self.classifier.to_artifact()?,
            scaler: self.scaler.clone(),
            trained_at: Utc::now(),
        })
    }
}

/// The fixed candidate set, in declaration order. Champion ties resolve to the earlier
/// entry.
pub fn default_candidates() -> Vec<Box<dyn Classifier>> {
    vec![
        Box::new(LogisticRegression::default()),
        Box::new(RandomForest::default()),
        Box::new(RbfSvm::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::dataset::canonical_dataset;
    use crate::features::split::split_and_scale;

    #[test]
    fn test_argmax_prefers_lowest_index_on_tie() {
        assert_eq!(argmax(&[0.2, 0.5, 0.3]), 1);
        assert_eq!(argmax(&[0.4, 0.4, 0.2]), 0);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1000.0, 999.0, -5.0]);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(p[0] > p[1] && p[1] > p[2]);
    }

    #[test]
    fn test_default_candidates_order() {
        let names: Vec<&str> = default_candidates().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["logistic_regression", "random_forest", "svm"]);
    }

    #[test]
    fn test_artifact_round_trip_reproduces_predictions_exactly() {
        let data = canonical_dataset().unwrap();
        let (split, scaler) = split_and_scale(&data, 0.2, 42).unwrap();

        for mut candidate in default_candidates() {
            candidate.fit(&split.x_train, &split.y_train).unwrap();
            let model = TrainedModel::new(candidate, scaler.clone());
            let bytes = model.to_artifact().unwrap().to_bytes().unwrap();
            let restored = ModelArtifact::from_bytes(&bytes).unwrap().into_model().unwrap();

            assert_eq!(restored.scaler, model.scaler);
            for example in &split.test {
                assert_eq!(
                    model.predict(&example.features).unwrap(),
                    restored.predict(&example.features).unwrap(),
                    "{} drifted after reload",
                    model.classifier.name()
                );
            }
        }
    }

    #[test]
    fn test_unfitted_artifact_is_rejected() {
        let artifact = ClassifierArtifact::LogisticRegression(LogisticRegression::default());
        assert!(matches!(
            artifact.into_classifier(),
            Err(LifecycleError::Artifact(_))
        ));
        assert!(ModelArtifact::from_bytes(b"{not json").is_err());
    }
}
