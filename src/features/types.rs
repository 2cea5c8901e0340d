// src/features/types.rs
use crate::error::{LifecycleError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const NUM_FEATURES: usize = 4;
pub const NUM_CLASSES: usize = 3;
pub const FEATURE_MIN: f64 = 0.0;
pub const FEATURE_MAX: f64 = 10.0;

pub const FEATURE_NAMES: [&str; NUM_FEATURES] =
    ["sepal_length", "sepal_width", "petal_length", "petal_width"];

/// The closed set of labels the classifier predicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IrisClass {
    Setosa,
    Versicolor,
    Virginica,
}

impl IrisClass {
    pub const ALL: [IrisClass; NUM_CLASSES] =
        [IrisClass::Setosa, IrisClass::Versicolor, IrisClass::Virginica];

    pub fn index(self) -> usize {
        match self {
            IrisClass::Setosa => 0,
            IrisClass::Versicolor => 1,
            IrisClass::Virginica => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IrisClass::Setosa => "setosa",
            IrisClass::Versicolor => "versicolor",
            IrisClass::Virginica => "virginica",
        }
    }
}

impl fmt::Display for IrisClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IrisClass {
    type Err = LifecycleError;

    /// Accepts the bare class name, the `Iris-` prefixed UCI form, or the numeric target.
    fn from_str(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_lowercase();
        let name = normalized.strip_prefix("iris-").unwrap_or(normalized.as_str());
        match name {
            "setosa" | "0" => Ok(IrisClass::Setosa),
            "versicolor" | "1" => Ok(IrisClass::Versicolor),
            "virginica" | "2" => Ok(IrisClass::Virginica),
            other => Err(LifecycleError::InvalidParameter(format!(
                "unknown class label '{}'",
                other
            ))),
        }
    }
}

/// Four bounded measurements; the unit of both training rows and inference input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]", into = "[f64; 4]")]
pub struct FeatureVector([f64; NUM_FEATURES]);

impl FeatureVector {
    /// Validates that every measurement is finite and within [0, 10].
    pub fn new(values: [f64; NUM_FEATURES]) -> Result<Self> {
        for (name, value) in FEATURE_NAMES.iter().zip(values.iter()) {
            if !value.is_finite() || *value < FEATURE_MIN || *value > FEATURE_MAX {
                return Err(LifecycleError::InvalidParameter(format!(
                    "{} must be within [{}, {}], got {}",
                    name, FEATURE_MIN, FEATURE_MAX, value
                )));
            }
        }
        Ok(Self(values))
    }

    pub fn from_slice(values: &[f64]) -> Result<Self> {
        let array: [f64; NUM_FEATURES] = values.try_into().map_err(|_| {
            LifecycleError::InvalidParameter(format!(
                "expected {} features, got {}",
                NUM_FEATURES,
                values.len()
            ))
        })?;
        Self::new(array)
    }

    pub fn values(&self) -> &[f64; NUM_FEATURES] {
        &self.0
    }
}

impl TryFrom<[f64; NUM_FEATURES]> for FeatureVector {
    type Error = LifecycleError;

    fn try_from(values: [f64; NUM_FEATURES]) -> Result<Self> {
        Self::new(values)
    }
}

impl From<FeatureVector> for [f64; NUM_FEATURES] {
    fn from(vector: FeatureVector) -> Self {
        vector.0
    }
}

impl FromStr for FeatureVector {
    type Err = LifecycleError;

    /// Parses `a,b,c,d`.
    fn from_str(raw: &str) -> Result<Self> {
        let values = raw
            .split(',')
            .map(|part| {
                part.trim().parse::<f64>().map_err(|_| {
                    LifecycleError::InvalidParameter(format!("'{}' is not a number", part.trim()))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        Self::from_slice(&values)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub features: FeatureVector,
    pub label: IrisClass,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_vector_bounds() {
        assert!(FeatureVector::new([5.1, 3.5, 1.4, 0.2]).is_ok());
        assert!(FeatureVector::new([0.0, 10.0, 0.0, 10.0]).is_ok());
        assert!(FeatureVector::new([-0.1, 3.5, 1.4, 0.2]).is_err());
        assert!(FeatureVector::new([5.1, 10.5, 1.4, 0.2]).is_err());
        assert!(FeatureVector::new([5.1, f64::NAN, 1.4, 0.2]).is_err());
    }

    #[test]
    fn test_feature_vector_parsing() {
        let v: FeatureVector = "5.1, 3.5,1.4 ,0.2".parse().unwrap();
        assert_eq!(v.values(), &[5.1, 3.5, 1.4, 0.2]);
        assert!("5.1,3.5,1.4".parse::<FeatureVector>().is_err());
        assert!("5.1,3.5,abc,0.2".parse::<FeatureVector>().is_err());
    }

    #[test]
    fn test_feature_vector_serde_validates() {
        let v: FeatureVector = serde_json::from_str("[6.3, 2.9, 5.6, 1.8]").unwrap();
        assert_eq!(v.values()[2], 5.6);
        assert!(serde_json::from_str::<FeatureVector>("[6.3, 2.9, 56.0, 1.8]").is_err());
    }

    #[test]
    fn test_class_label_parsing() {
        assert_eq!("setosa".parse::<IrisClass>().unwrap(), IrisClass::Setosa);
        assert_eq!("Iris-virginica".parse::<IrisClass>().unwrap(), IrisClass::Virginica);
        assert_eq!("1".parse::<IrisClass>().unwrap(), IrisClass::Versicolor);
        assert!("rose".parse::<IrisClass>().is_err());
        for class in IrisClass::ALL {
            assert_eq!(IrisClass::from_index(class.index()), Some(class));
        }
    }
}
