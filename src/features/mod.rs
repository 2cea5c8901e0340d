// src/features/mod.rs
pub mod dataset;
pub mod split;
pub mod types;

pub use dataset::{analyze_dataset, load_dataset, DatasetSummary};
pub use split::{split_and_scale, DataSplit, Scaler};
pub use types::{FeatureVector, IrisClass, LabeledExample, NUM_CLASSES, NUM_FEATURES};
