// src/models/svm.rs
use crate::error::{LifecycleError, Result};
use crate::features::types::{NUM_CLASSES, NUM_FEATURES};
use crate::models::{
    not_fitted, softmax, validate_training_input, Classifier, ClassifierArtifact, Probabilities,
};
use linfa::prelude::{Dataset, Fit};
use linfa_svm::Svm;
use log::debug;
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RbfSvmParams {
    /// Soft-margin penalty, applied to both sides of every binary machine.
    pub c: f64,
    /// Kernel width in `exp(-gamma * |x - y|^2)`. On standardized inputs 1/n_features
    /// matches the usual `scale` heuristic.
    pub gamma: f64,
}

impl Default for RbfSvmParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            gamma: 1.0 / NUM_FEATURES as f64,
        }
    }
}

/// One class-vs-rest machine: `f(x) = sum(alpha_i * k(x, sv_i)) - rho`. Only the
/// training rows with a non-zero coefficient are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BinaryMachine {
    alpha: Vec<f64>,
    support_vectors: Vec<[f64; NUM_FEATURES]>,
    rho: f64,
}

impl BinaryMachine {
    fn decision(&self, x: ArrayView1<f64>, gamma: f64) -> f64 {
        let sum: f64 = self
            .alpha
            .iter()
            .zip(&self.support_vectors)
            .map(|(alpha, sv)| {
                let sq_dist: f64 = sv.iter().zip(x.iter()).map(|(a, b)| (a - b).powi(2)).sum();
                alpha * (-gamma * sq_dist).exp()
            })
            .sum();
        sum - self.rho
    }
}

/// One-vs-rest support vector machine with a Gaussian kernel. Each binary machine is
/// solved by `linfa-svm`; only its coefficients and support vectors are kept, so a fitted
/// model serializes without the solver state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbfSvm {
    params: RbfSvmParams,
    fitted: Option<Vec<BinaryMachine>>,
}

impl Default for RbfSvm {
    fn default() -> Self {
        Self {
            params: RbfSvmParams::default(),
            fitted: None,
        }
    }
}

impl RbfSvm {
    pub fn with_params(params: RbfSvmParams) -> Result<Self> {
        if !(params.c > 0.0) || !(params.gamma > 0.0) {
            return Err(LifecycleError::InvalidParameter(format!(
                "invalid svm parameters: {:?}",
                params
            )));
        }
        Ok(Self {
            params,
            fitted: None,
        })
    }

    fn fit_binary(&self, x: &Array2<f64>, y: &[usize], class: usize) -> Result<BinaryMachine> {
        let targets = Array1::from_iter(y.iter().map(|&label| label == class));
        let dataset = Dataset::new(x.clone(), targets);
        let svm = Svm::<f64, bool>::params()
            .pos_neg_weights(self.params.c, self.params.c)
            .gaussian_kernel(1.0 / self.params.gamma)
            .fit(&dataset)
            .map_err(|e| {
                LifecycleError::TrainingFailed(format!("svm machine for class {}: {}", class, e))
            })?;

        let mut machine = BinaryMachine {
            alpha: Vec::new(),
            support_vectors: Vec::new(),
            rho: svm.rho,
        };
        for (alpha, row) in svm.alpha.iter().zip(x.rows()) {
            if *alpha == 0.0 {
                continue;
            }
            let mut sv = [0.0; NUM_FEATURES];
            for (s, v) in sv.iter_mut().zip(row.iter()) {
                *s = *v;
            }
            machine.alpha.push(*alpha);
            machine.support_vectors.push(sv);
        }
        if !machine.rho.is_finite() || machine.alpha.iter().any(|a| !a.is_finite()) {
            return Err(LifecycleError::TrainingFailed(format!(
                "svm machine for class {} diverged",
                class
            )));
        }
        debug!(
            "svm class {}: {} support vectors of {}",
            class,
            machine.alpha.len(),
            x.nrows()
        );
        Ok(machine)
    }

    fn decisions(&self, x: ArrayView1<f64>) -> Result<[f64; NUM_CLASSES]> {
        let machines = self.fitted.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        let mut out = [0.0; NUM_CLASSES];
        for (o, machine) in out.iter_mut().zip(machines) {
            *o = machine.decision(x, self.params.gamma);
        }
        Ok(out)
    }
}

impl Classifier for RbfSvm {
    fn name(&self) -> &'static str {
        "svm"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or(serde_json::Value::Null)
    }

    fn fit(&mut self, x: &Array2<f64>, y: &[usize]) -> Result<()> {
        validate_training_input(self.name(), x, y)?;
        let machines = (0..NUM_CLASSES)
            .map(|class| self.fit_binary(x, y, class))
            .collect::<Result<Vec<_>>>()?;
        self.fitted = Some(machines);
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Softmax over the one-vs-rest decision values.
    fn predict_proba(&self, x: ArrayView1<f64>) -> Result<Probabilities> {
        Ok(softmax(&self.decisions(x)?))
    }

    fn unfitted(&self) -> Box<dyn Classifier> {
        Box::new(Self {
            params: self.params.clone(),
            fitted: None,
        })
    }

    fn to_artifact(&self) -> Result<ClassifierArtifact> {
        Ok(ClassifierArtifact::Svm(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::dataset::canonical_dataset;
    use crate::features::split::split_and_scale;
    use crate::features::types::IrisClass;
    use crate::models::metrics::classification_report;

    #[test]
    fn test_fits_iris_and_separates_versicolor() {
        let data = canonical_dataset().unwrap();
        let (split, _) = split_and_scale(&data, 0.2, 42).unwrap();

        let mut svm = RbfSvm::default();
        svm.fit(&split.x_train, &split.y_train).unwrap();

        let preds: Vec<usize> = split
            .x_test
            .rows()
            .into_iter()
            .map(|row| svm.predict(row).unwrap())
            .collect();
        let report = classification_report(&split.y_test, &preds);
        assert!(report.accuracy >= 0.9, "accuracy {}", report.accuracy);

        let versicolor = report
            .per_class
            .iter()
            .find(|m| m.class == IrisClass::Versicolor)
            .unwrap();
        assert!(versicolor.recall >= 0.8, "versicolor recall {}", versicolor.recall);

        let p = svm.predict_proba(split.x_test.row(0)).unwrap();
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_keeps_only_support_vectors() {
        let data = canonical_dataset().unwrap();
        let (split, _) = split_and_scale(&data, 0.2, 42).unwrap();

        let mut svm = RbfSvm::default();
        svm.fit(&split.x_train, &split.y_train).unwrap();

        let machines = svm.fitted.as_ref().unwrap();
        assert_eq!(machines.len(), NUM_CLASSES);
        for machine in machines {
            assert!(!machine.alpha.is_empty());
            assert!(machine.alpha.len() <= split.x_train.nrows());
            assert_eq!(machine.alpha.len(), machine.support_vectors.len());
        }
    }

    #[test]
    fn test_rejects_non_positive_params_and_unfitted_use() {
        for params in [
            RbfSvmParams {
                c: 0.0,
                ..Default::default()
            },
            RbfSvmParams {
                gamma: -1.0,
                ..Default::default()
            },
        ] {
            assert!(matches!(
                RbfSvm::with_params(params),
                Err(LifecycleError::InvalidParameter(_))
            ));
        }

        let svm = RbfSvm::default();
        let row = Array1::<f64>::zeros(NUM_FEATURES);
        assert!(svm.predict_proba(row.view()).is_err());
        assert!(!svm.unfitted().is_fitted());
    }
}
