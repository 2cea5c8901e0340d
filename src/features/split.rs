// src/features/split.rs
use crate::error::{LifecycleError, Result};
use crate::features::types::{FeatureVector, IrisClass, LabeledExample, NUM_CLASSES, NUM_FEATURES};
use log::{debug, info};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Per-feature standardization parameters. Fit on the train partition only and reused
/// unchanged for the test partition and every inference input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    pub mean: [f64; NUM_FEATURES],
    pub scale: [f64; NUM_FEATURES],
}

impl Scaler {
    /// Population mean and standard deviation per feature. A constant feature gets a
    /// scale of 1.0 so it maps to zero instead of dividing by zero.
    pub fn fit(examples: &[LabeledExample]) -> Result<Self> {
        if examples.is_empty() {
            return Err(LifecycleError::InvalidParameter(
                "cannot fit a scaler on an empty partition".to_string(),
            ));
        }
        let n = examples.len() as f64;
        let mut mean = [0.0; NUM_FEATURES];
        let mut scale = [0.0; NUM_FEATURES];

        for example in examples {
            for (m, v) in mean.iter_mut().zip(example.features.values()) {
                *m += v / n;
            }
        }
        for example in examples {
            for (i, v) in example.features.values().iter().enumerate() {
                scale[i] += (v - mean[i]).powi(2) / n;
            }
        }
        for s in scale.iter_mut() {
            *s = if *s > f64::EPSILON { s.sqrt() } else { 1.0 };
        }

        Ok(Self { mean, scale })
    }

    pub fn transform(&self, features: &FeatureVector) -> Array1<f64> {
        features
            .values()
            .iter()
            .enumerate()
            .map(|(i, v)| (v - self.mean[i]) / self.scale[i])
            .collect()
    }

    pub fn transform_all(&self, examples: &[LabeledExample]) -> Array2<f64> {
        let mut matrix = Array2::zeros((examples.len(), NUM_FEATURES));
        for (mut row, example) in matrix.rows_mut().into_iter().zip(examples) {
            row.assign(&self.transform(&example.features));
        }
        matrix
    }
}

/// Disjoint train/test partitions plus their scaled design matrices and label indices.
#[derive(Debug, Clone)]
pub struct DataSplit {
    pub train: Vec<LabeledExample>,
    pub test: Vec<LabeledExample>,
    pub x_train: Array2<f64>,
    pub y_train: Vec<usize>,
    pub x_test: Array2<f64>,
    pub y_test: Vec<usize>,
}

impl DataSplit {
    pub fn class_counts(examples: &[LabeledExample]) -> [usize; NUM_CLASSES] {
        let mut counts = [0; NUM_CLASSES];
        for example in examples {
            counts[example.label.index()] += 1;
        }
        counts
    }
}

fn label_indices(examples: &[LabeledExample]) -> Vec<usize> {
    examples.iter().map(|e| e.label.index()).collect()
}

/// Stratified split: each class contributes `round(n_class * test_fraction)` examples to
/// the test partition, chosen by a seeded shuffle. The scaler is fit on the train
/// partition before either partition is transformed.
pub fn split_and_scale(
    examples: &[LabeledExample],
    test_fraction: f64,
    seed: u64,
) -> Result<(DataSplit, Scaler)> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(LifecycleError::InvalidParameter(format!(
            "test_fraction must be in (0, 1), got {}",
            test_fraction
        )));
    }
    if examples.is_empty() {
        return Err(LifecycleError::InvalidParameter(
            "cannot split an empty dataset".to_string(),
        ));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(examples.len());
    let mut test = Vec::new();

    for class in IrisClass::ALL {
        let mut members: Vec<LabeledExample> =
            examples.iter().filter(|e| e.label == class).copied().collect();
        if members.is_empty() {
            continue;
        }
        members.shuffle(&mut rng);
        let n_test = (members.len() as f64 * test_fraction).round() as usize;
        let n_test = n_test.min(members.len());
        debug!(
            "Class {}: {} examples, {} held out for test",
            class,
            members.len(),
            n_test
        );
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }

    if train.is_empty() || test.is_empty() {
        return Err(LifecycleError::InvalidParameter(format!(
            "test_fraction {} leaves an empty partition ({} train, {} test)",
            test_fraction,
            train.len(),
            test.len()
        )));
    }

    train.shuffle(&mut rng);
    test.shuffle(&mut rng);

    let scaler = Scaler::fit(&train)?;
    let split = DataSplit {
        x_train: scaler.transform_all(&train),
        y_train: label_indices(&train),
        x_test: scaler.transform_all(&test),
        y_test: label_indices(&test),
        train,
        test,
    };

    info!(
        "Split complete: train={} {:?}, test={} {:?}",
        split.train.len(),
        DataSplit::class_counts(&split.train),
        split.test.len(),
        DataSplit::class_counts(&split.test)
    );
    Ok((split, scaler))
}
