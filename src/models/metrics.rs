// src/models/metrics.rs
use crate::features::types::{IrisClass, NUM_CLASSES};
use serde::{Deserialize, Serialize};

pub type ConfusionMatrix = [[usize; NUM_CLASSES]; NUM_CLASSES];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class: IrisClass,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Held-out evaluation of one fitted candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub accuracy: f64,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    pub per_class: Vec<ClassMetrics>,
    /// Rows are true classes, columns predicted classes.
    pub confusion: ConfusionMatrix,
}

pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    correct as f64 / y_true.len() as f64
}

pub fn confusion_matrix(y_true: &[usize], y_pred: &[usize]) -> ConfusionMatrix {
    let mut matrix = [[0; NUM_CLASSES]; NUM_CLASSES];
    for (&t, &p) in y_true.iter().zip(y_pred) {
        if t < NUM_CLASSES && p < NUM_CLASSES {
            matrix[t][p] += 1;
        }
    }
    matrix
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

pub fn classification_report(y_true: &[usize], y_pred: &[usize]) -> ClassificationReport {
    let confusion = confusion_matrix(y_true, y_pred);

    let per_class: Vec<ClassMetrics> = IrisClass::ALL
        .iter()
        .map(|&class| {
            let c = class.index();
            let tp = confusion[c][c];
            let predicted: usize = (0..NUM_CLASSES).map(|r| confusion[r][c]).sum();
            let support: usize = confusion[c].iter().sum();
            let precision = ratio(tp, predicted);
            let recall = ratio(tp, support);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            ClassMetrics {
                class,
                precision,
                recall,
                f1,
                support,
            }
        })
        .collect();

    let n = per_class.len() as f64;
    ClassificationReport {
        accuracy: accuracy(y_true, y_pred),
        macro_precision: per_class.iter().map(|m| m.precision).sum::<f64>() / n,
        macro_recall: per_class.iter().map(|m| m.recall).sum::<f64>() / n,
        macro_f1: per_class.iter().map(|m| m.f1).sum::<f64>() / n,
        per_class,
        confusion,
    }
}

/// Population mean and standard deviation.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy_and_confusion() {
        let y_true = [0, 0, 1, 1, 2, 2];
        let y_pred = [0, 1, 1, 1, 2, 0];
        assert!((accuracy(&y_true, &y_pred) - 4.0 / 6.0).abs() < 1e-12);

        let cm = confusion_matrix(&y_true, &y_pred);
        assert_eq!(cm[0], [1, 1, 0]);
        assert_eq!(cm[1], [0, 2, 0]);
        assert_eq!(cm[2], [1, 0, 1]);
        assert_eq!(accuracy(&[], &[]), 0.0);
    }

    #[test]
    fn test_classification_report_macro_averages() {
        let y_true = [0, 0, 1, 1, 2, 2];
        let y_pred = [0, 1, 1, 1, 2, 0];
        let report = classification_report(&y_true, &y_pred);

        let setosa = &report.per_class[0];
        assert_eq!(setosa.support, 2);
        assert!((setosa.precision - 0.5).abs() < 1e-12);
        assert!((setosa.recall - 0.5).abs() < 1e-12);

        let versicolor = &report.per_class[1];
        assert!((versicolor.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((versicolor.recall - 1.0).abs() < 1e-12);

        let expected_recall = (0.5 + 1.0 + 0.5) / 3.0;
        assert!((report.macro_recall - expected_recall).abs() < 1e-12);
    }

    #[test]
    fn test_perfect_predictions() {
        let y = [0, 1, 2, 2];
        let report = classification_report(&y, &y);
        assert_eq!(report.accuracy, 1.0);
        assert_eq!(report.macro_f1, 1.0);
    }

    #[test]
    fn test_mean_std() {
        assert_eq!(mean_std(&[]), (0.0, 0.0));
        let (m, s) = mean_std(&[1.0, 3.0]);
        assert_eq!(m, 2.0);
        assert_eq!(s, 1.0);
    }
}
