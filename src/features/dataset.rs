// src/features/dataset.rs
use crate::error::{LifecycleError, Result};
use crate::features::types::{FeatureVector, IrisClass, LabeledExample, FEATURE_NAMES, NUM_FEATURES};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const CSV_HEADER: &str = "sepal_length,sepal_width,petal_length,petal_width,target,target_name";
const ROWS_PER_CLASS: usize = 50;
const LABEL_COLUMNS: [&str; 5] = ["target_name", "species", "variety", "class", "target"];

/// Fisher's iris measurements as distributed with scikit-learn: 50 rows per class, in
/// setosa, versicolor, virginica order.
#[rustfmt::skip]
const FISHER_IRIS: [[f64; NUM_FEATURES]; 3 * ROWS_PER_CLASS] = [
    [5.1, 3.5, 1.4, 0.2], [4.9, 3.0, 1.4, 0.2], [4.7, 3.2, 1.3, 0.2], [4.6, 3.1, 1.5, 0.2],
    [5.0, 3.6, 1.4, 0.2], [5.4, 3.9, 1.7, 0.4], [4.6, 3.4, 1.4, 0.3], [5.0, 3.4, 1.5, 0.2],
    [4.4, 2.9, 1.4, 0.2], [4.9, 3.1, 1.5, 0.1], [5.4, 3.7, 1.5, 0.2], [4.8, 3.4, 1.6, 0.2],
    [4.8, 3.0, 1.4, 0.1], [4.3, 3.0, 1.1, 0.1], [5.8, 4.0, 1.2, 0.2], [5.7, 4.4, 1.5, 0.4],
    [5.4, 3.9, 1.3, 0.4], [5.1, 3.5, 1.4, 0.3], [5.7, 3.8, 1.7, 0.3], [5.1, 3.8, 1.5, 0.3],
    [5.4, 3.4, 1.7, 0.2], [5.1, 3.7, 1.5, 0.4], [4.6, 3.6, 1.0, 0.2], [5.1, 3.3, 1.7, 0.5],
    [4.8, 3.4, 1.9, 0.2], [5.0, 3.0, 1.6, 0.2], [5.0, 3.4, 1.6, 0.4], [5.2, 3.5, 1.5, 0.2],
    [5.2, 3.4, 1.4, 0.2], [4.7, 3.2, 1.6, 0.2], [4.8, 3.1, 1.6, 0.2], [5.4, 3.4, 1.5, 0.4],
    [5.2, 4.1, 1.5, 0.1], [5.5, 4.2, 1.4, 0.2], [4.9, 3.1, 1.5, 0.2], [5.0, 3.2, 1.2, 0.2],
    [5.5, 3.5, 1.3, 0.2], [4.9, 3.6, 1.4, 0.1], [4.4, 3.0, 1.3, 0.2], [5.1, 3.4, 1.5, 0.2],
    [5.0, 3.5, 1.3, 0.3], [4.5, 2.3, 1.3, 0.3], [4.4, 3.2, 1.3, 0.2], [5.0, 3.5, 1.6, 0.6],
    [5.1, 3.8, 1.9, 0.4], [4.8, 3.0, 1.4, 0.3], [5.1, 3.8, 1.6, 0.2], [4.6, 3.2, 1.4, 0.2],
    [5.3, 3.7, 1.5, 0.2], [5.0, 3.3, 1.4, 0.2], [7.0, 3.2, 4.7, 1.4], [6.4, 3.2, 4.5, 1.5],
    [6.9, 3.1, 4.9, 1.5], [5.5, 2.3, 4.0, 1.3], [6.5, 2.8, 4.6, 1.5], [5.7, 2.8, 4.5, 1.3],
    [6.3, 3.3, 4.7, 1.6], [4.9, 2.4, 3.3, 1.0], [6.6, 2.9, 4.6, 1.3], [5.2, 2.7, 3.9, 1.4],
    [5.0, 2.0, 3.5, 1.0], [5.9, 3.0, 4.2, 1.5], [6.0, 2.2, 4.0, 1.0], [6.1, 2.9, 4.7, 1.4],
    [5.6, 2.9, 3.6, 1.3], [6.7, 3.1, 4.4, 1.4], [5.6, 3.0, 4.5, 1.5], [5.8, 2.7, 4.1, 1.0],
    [6.2, 2.2, 4.5, 1.5], [5.6, 2.5, 3.9, 1.1], [5.9, 3.2, 4.8, 1.8], [6.1, 2.8, 4.0, 1.3],
    [6.3, 2.5, 4.9, 1.5], [6.1, 2.8, 4.7, 1.2], [6.4, 2.9, 4.3, 1.3], [6.6, 3.0, 4.4, 1.4],
    [6.8, 2.8, 4.8, 1.4], [6.7, 3.0, 5.0, 1.7], [6.0, 2.9, 4.5, 1.5], [5.7, 2.6, 3.5, 1.0],
    [5.5, 2.4, 3.8, 1.1], [5.5, 2.4, 3.7, 1.0], [5.8, 2.7, 3.9, 1.2], [6.0, 2.7, 5.1, 1.6],
    [5.4, 3.0, 4.5, 1.5], [6.0, 3.4, 4.5, 1.6], [6.7, 3.1, 4.7, 1.5], [6.3, 2.3, 4.4, 1.3],
    [5.6, 3.0, 4.1, 1.3], [5.5, 2.5, 4.0, 1.3], [5.5, 2.6, 4.4, 1.2], [6.1, 3.0, 4.6, 1.4],
    [5.8, 2.6, 4.0, 1.2], [5.0, 2.3, 3.3, 1.0], [5.6, 2.7, 4.2, 1.3], [5.7, 3.0, 4.2, 1.2],
    [5.7, 2.9, 4.2, 1.3], [6.2, 2.9, 4.3, 1.3], [5.1, 2.5, 3.0, 1.1], [5.7, 2.8, 4.1, 1.3],
    [6.3, 3.3, 6.0, 2.5], [5.8, 2.7, 5.1, 1.9], [7.1, 3.0, 5.9, 2.1], [6.3, 2.9, 5.6, 1.8],
    [6.5, 3.0, 5.8, 2.2], [7.6, 3.0, 6.6, 2.1], [4.9, 2.5, 4.5, 1.7], [7.3, 2.9, 6.3, 1.8],
    [6.7, 2.5, 5.8, 1.8], [7.2, 3.6, 6.1, 2.5], [6.5, 3.2, 5.1, 2.0], [6.4, 2.7, 5.3, 1.9],
    [6.8, 3.0, 5.5, 2.1], [5.7, 2.5, 5.0, 2.0], [5.8, 2.8, 5.1, 2.4], [6.4, 3.2, 5.3, 2.3],
    [6.5, 3.0, 5.5, 1.8], [7.7, 3.8, 6.7, 2.2], [7.7, 2.6, 6.9, 2.3], [6.0, 2.2, 5.0, 1.5],
    [6.9, 3.2, 5.7, 2.3], [5.6, 2.8, 4.9, 2.0], [7.7, 2.8, 6.7, 2.0], [6.3, 2.7, 4.9, 1.8],
    [6.7, 3.3, 5.7, 2.1], [7.2, 3.2, 6.0, 1.8], [6.2, 2.8, 4.8, 1.8], [6.1, 3.0, 4.9, 1.8],
    [6.4, 2.8, 5.6, 2.1], [7.2, 3.0, 5.8, 1.6], [7.4, 2.8, 6.1, 1.9], [7.9, 3.8, 6.4, 2.0],
    [6.4, 2.8, 5.6, 2.2], [6.3, 2.8, 5.1, 1.5], [6.1, 2.6, 5.6, 1.4], [7.7, 3.0, 6.1, 2.3],
    [6.3, 3.4, 5.6, 2.4], [6.4, 3.1, 5.5, 1.8], [6.0, 3.0, 4.8, 1.8], [6.9, 3.1, 5.4, 2.1],
    [6.7, 3.1, 5.6, 2.4], [6.9, 3.1, 5.1, 2.3], [5.8, 2.7, 5.1, 1.9], [6.8, 3.2, 5.9, 2.3],
    [6.7, 3.3, 5.7, 2.5], [6.7, 3.0, 5.2, 2.3], [6.3, 2.5, 5.0, 1.9], [6.5, 3.0, 5.2, 2.0],
    [6.2, 3.4, 5.4, 2.3], [5.9, 3.0, 5.1, 1.8],
];

/// Loads the labeled dataset at `path`. When the file does not exist the canonical iris
/// table is written to `path` and returned.
pub fn load_dataset(path: &Path) -> Result<Vec<LabeledExample>> {
    if !path.exists() {
        warn!("Dataset not found at {}, writing canonical iris dataset", path.display());
        let examples = canonical_dataset()?;
        match write_dataset(path, &examples) {
            Ok(()) => info!("Canonical dataset written to {}", path.display()),
            Err(e) => warn!("Could not persist canonical dataset to {}: {}", path.display(), e),
        }
        return Ok(examples);
    }

    let raw = fs::read_to_string(path).map_err(|e| {
        LifecycleError::DataUnavailable(format!("failed to read {}: {}", path.display(), e))
    })?;
    let examples = parse_dataset(&raw)
        .map_err(|e| LifecycleError::DataUnavailable(format!("{}: {}", path.display(), e)))?;
    info!("Loaded {} labeled examples from {}", examples.len(), path.display());
    Ok(examples)
}

/// The 150-row Fisher iris table as labeled examples, always in the same order.
pub fn canonical_dataset() -> Result<Vec<LabeledExample>> {
    FISHER_IRIS
        .iter()
        .enumerate()
        .map(|(i, values)| {
            let label = IrisClass::from_index(i / ROWS_PER_CLASS).ok_or_else(|| {
                LifecycleError::DataUnavailable(format!("row {} has no class", i))
            })?;
            let features = FeatureVector::new(*values).map_err(|e| {
                LifecycleError::DataUnavailable(format!("canonical row {} is invalid: {}", i, e))
            })?;
            Ok(LabeledExample { features, label })
        })
        .collect()
}

fn normalize_column(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .to_lowercase()
        .replace(" (cm)", "")
        .replace(['.', ' '], "_")
}

/// Parses CSV text with a header row containing the four feature columns and one label
/// column. Column order is free; extra columns are ignored.
pub fn parse_dataset(raw: &str) -> Result<Vec<LabeledExample>> {
    let mut lines = raw.lines().enumerate().filter(|(_, line)| !line.trim().is_empty());

    let (_, header_line) = lines
        .next()
        .ok_or_else(|| LifecycleError::DataUnavailable("dataset is empty".to_string()))?;
    let header: Vec<String> = header_line.split(',').map(normalize_column).collect();

    let mut feature_idx = [0usize; NUM_FEATURES];
    for (slot, name) in feature_idx.iter_mut().zip(FEATURE_NAMES.iter()) {
        *slot = header.iter().position(|h| h == name).ok_or_else(|| {
            LifecycleError::DataUnavailable(format!("missing feature column '{}'", name))
        })?;
    }
    let label_idx = LABEL_COLUMNS
        .iter()
        .find_map(|label| header.iter().position(|h| h == label))
        .ok_or_else(|| LifecycleError::DataUnavailable("missing label column".to_string()))?;

    let mut examples = Vec::new();
    for (line_no, line) in lines {
        let cells: Vec<&str> = line.split(',').map(|c| c.trim().trim_matches('"')).collect();
        let cell = |idx: usize| {
            cells.get(idx).copied().ok_or_else(|| {
                LifecycleError::DataUnavailable(format!("line {}: too few columns", line_no + 1))
            })
        };

        let mut values = [0.0; NUM_FEATURES];
        for (value, idx) in values.iter_mut().zip(feature_idx.iter()) {
            let raw_value = cell(*idx)?;
            *value = raw_value.parse::<f64>().map_err(|_| {
                LifecycleError::DataUnavailable(format!(
                    "line {}: '{}' is not a number",
                    line_no + 1,
                    raw_value
                ))
            })?;
        }
        let features = FeatureVector::new(values).map_err(|e| {
            LifecycleError::DataUnavailable(format!("line {}: {}", line_no + 1, e))
        })?;
        let label = cell(label_idx)?
            .parse::<IrisClass>()
            .map_err(|e| LifecycleError::DataUnavailable(format!("line {}: {}", line_no + 1, e)))?;

        examples.push(LabeledExample { features, label });
    }

    if examples.is_empty() {
        return Err(LifecycleError::DataUnavailable("dataset has no rows".to_string()));
    }
    Ok(examples)
}

/// Writes the dataset in the canonical column layout. The file is written next to its
/// destination and renamed into place so readers never see a partial file.
pub fn write_dataset(path: &Path, examples: &[LabeledExample]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = String::with_capacity(examples.len() * 32);
    out.push_str(CSV_HEADER);
    out.push('\n');
    for example in examples {
        let [a, b, c, d] = *example.features.values();
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            a,
            b,
            c,
            d,
            example.label.index(),
            example.label
        ));
    }
    let tmp = path.with_extension("csv.tmp");
    fs::write(&tmp, out)?;
    fs::rename(&tmp, path)
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureSummary {
    pub name: &'static str,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub rows: usize,
    pub class_counts: BTreeMap<IrisClass, usize>,
    pub features: Vec<FeatureSummary>,
}

pub fn analyze_dataset(examples: &[LabeledExample]) -> DatasetSummary {
    let mut class_counts = BTreeMap::new();
    for example in examples {
        *class_counts.entry(example.label).or_insert(0) += 1;
    }

    let n = examples.len().max(1) as f64;
    let features = FEATURE_NAMES
        .iter()
        .enumerate()
        .map(|(i, &name)| {
            let column = examples.iter().map(|e| e.features.values()[i]);
            let mean = column.clone().sum::<f64>() / n;
            let variance = column.clone().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            FeatureSummary {
                name,
                mean,
                std: variance.sqrt(),
                min: column.clone().fold(f64::INFINITY, f64::min),
                max: column.fold(f64::NEG_INFINITY, f64::max),
            }
        })
        .collect();

    DatasetSummary {
        rows: examples.len(),
        class_counts,
        features,
    }
}
