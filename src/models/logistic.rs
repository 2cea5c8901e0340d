// src/models/logistic.rs
use crate::error::{LifecycleError, Result};
use crate::features::types::{NUM_CLASSES, NUM_FEATURES};
use crate::models::{
    not_fitted, softmax, validate_training_input, Classifier, ClassifierArtifact, Probabilities,
};
use log::debug;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

const CONVERGENCE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegressionParams {
    pub learning_rate: f64,
    pub max_iter: usize,
    pub l2: f64,
}

impl Default for LogisticRegressionParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.5,
            max_iter: 1000,
            l2: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SoftmaxWeights {
    // NUM_FEATURES x NUM_CLASSES
    weights: Array2<f64>,
    bias: Array1<f64>,
}

/// Multinomial softmax regression fit by full-batch gradient descent with an L2 penalty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    params: LogisticRegressionParams,
    fitted: Option<SoftmaxWeights>,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self {
            params: LogisticRegressionParams::default(),
            fitted: None,
        }
    }
}

impl LogisticRegression {
    pub fn with_params(params: LogisticRegressionParams) -> Result<Self> {
        if !(params.learning_rate > 0.0) || params.max_iter == 0 || !(params.l2 >= 0.0) {
            return Err(LifecycleError::InvalidParameter(format!(
                "invalid logistic regression parameters: {:?}",
                params
            )));
        }
        Ok(Self {
            params,
            fitted: None,
        })
    }
}

impl Classifier for LogisticRegression {
    fn name(&self) -> &'static str {
        "logistic_regression"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or(serde_json::Value::Null)
    }

    fn fit(&mut self, x: &Array2<f64>, y: &[usize]) -> Result<()> {
        validate_training_input(self.name(), x, y)?;
        let n = x.nrows() as f64;

        let mut targets = Array2::<f64>::zeros((x.nrows(), NUM_CLASSES));
        for (row, &label) in y.iter().enumerate() {
            targets[[row, label]] = 1.0;
        }

        let mut weights = Array2::<f64>::zeros((NUM_FEATURES, NUM_CLASSES));
        let mut bias = Array1::<f64>::zeros(NUM_CLASSES);

        for iter in 0..self.params.max_iter {
            let mut probs = x.dot(&weights) + &bias;
            for mut row in probs.rows_mut() {
                let p = softmax(&row.to_vec());
                row.assign(&ArrayView1::from(&p[..]));
            }

            let residual = probs - &targets;
            let grad_w = x.t().dot(&residual) / n + &weights * self.params.l2;
            let grad_b = residual.sum_axis(Axis(0)) / n;

            weights = weights - &grad_w * self.params.learning_rate;
            bias = bias - &grad_b * self.params.learning_rate;

            let grad_norm = grad_w.iter().chain(grad_b.iter()).map(|g| g * g).sum::<f64>();
            if !grad_norm.is_finite() {
                return Err(LifecycleError::TrainingFailed(
                    "logistic_regression diverged".to_string(),
                ));
            }
            if grad_norm.sqrt() < CONVERGENCE_TOLERANCE {
                debug!("logistic_regression converged after {} iterations", iter + 1);
                break;
            }
        }

        self.fitted = Some(SoftmaxWeights { weights, bias });
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    fn predict_proba(&self, x: ArrayView1<f64>) -> Result<Probabilities> {
        let fitted = self.fitted.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        let logits = x.dot(&fitted.weights) + &fitted.bias;
        Ok(softmax(&logits.to_vec()))
    }

    fn unfitted(&self) -> Box<dyn Classifier> {
        Box::new(Self {
            params: self.params.clone(),
            fitted: None,
        })
    }

    fn to_artifact(&self) -> Result<ClassifierArtifact> {
        Ok(ClassifierArtifact::LogisticRegression(self.clone()))
    }
}
