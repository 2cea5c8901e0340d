// src/models/forest.rs
use crate::error::{LifecycleError, Result};
use crate::features::types::{NUM_CLASSES, NUM_FEATURES};
use crate::models::{
    not_fitted, validate_training_input, Classifier, ClassifierArtifact, Probabilities,
};
use log::debug;
use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 10,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        proba: Probabilities,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A CART tree stored as a flat node arena; node 0 is the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn predict_proba(&self, x: ArrayView1<f64>) -> Probabilities {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { proba } => return *proba,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

fn class_counts(y: &[usize], samples: &[usize]) -> [usize; NUM_CLASSES] {
    let mut counts = [0; NUM_CLASSES];
    for &s in samples {
        counts[y[s]] += 1;
    }
    counts
}

fn gini(counts: &[usize; NUM_CLASSES], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let n = total as f64;
    1.0 - counts.iter().map(|&c| (c as f64 / n).powi(2)).sum::<f64>()
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    impurity_decrease: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    y: &'a [usize],
    params: &'a RandomForestParams,
    max_features: usize,
    nodes: Vec<Node>,
    // Unnormalized weighted impurity decrease per feature.
    importances: [f64; NUM_FEATURES],
}

impl<'a> TreeBuilder<'a> {
    fn leaf(&mut self, counts: &[usize; NUM_CLASSES], total: usize) -> usize {
        let mut proba = [0.0; NUM_CLASSES];
        for (p, &c) in proba.iter_mut().zip(counts) {
            *p = c as f64 / total.max(1) as f64;
        }
        self.nodes.push(Node::Leaf { proba });
        self.nodes.len() - 1
    }

    fn build(&mut self, samples: Vec<usize>, depth: usize, rng: &mut StdRng) -> usize {
        let counts = class_counts(self.y, &samples);
        let impurity = gini(&counts, samples.len());

        if depth >= self.params.max_depth
            || samples.len() < self.params.min_samples_split
            || impurity <= f64::EPSILON
        {
            return self.leaf(&counts, samples.len());
        }

        let best = match self.best_split(&samples, impurity, rng) {
            Some(best) => best,
            None => return self.leaf(&counts, samples.len()),
        };

        self.importances[best.feature] += best.impurity_decrease;

        // Reserve this node's slot so children can be appended after it.
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf {
            proba: [0.0; NUM_CLASSES],
        });
        let left = self.build(best.left, depth + 1, rng);
        let right = self.build(best.right, depth + 1, rng);
        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        idx
    }

    fn best_split(&self, samples: &[usize], impurity: f64, rng: &mut StdRng) -> Option<BestSplit> {
        let mut features: Vec<usize> = (0..NUM_FEATURES).collect();
        features.shuffle(rng);
        features.truncate(self.max_features);

        let n = samples.len();
        let total_counts = class_counts(self.y, samples);
        let mut best: Option<(usize, f64, f64)> = None;

        for &feature in &features {
            let mut order: Vec<usize> = samples.to_vec();
            order.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));

            let mut left_counts = [0usize; NUM_CLASSES];
            for i in 0..n - 1 {
                left_counts[self.y[order[i]]] += 1;
                let current = self.x[[order[i], feature]];
                let next = self.x[[order[i + 1], feature]];
                if next <= current {
                    continue;
                }

                let n_left = i + 1;
                let n_right = n - n_left;
                let mut right_counts = total_counts;
                for (r, l) in right_counts.iter_mut().zip(left_counts.iter()) {
                    *r -= l;
                }
                let weighted = (n_left as f64 * gini(&left_counts, n_left)
                    + n_right as f64 * gini(&right_counts, n_right))
                    / n as f64;
                let decrease = impurity - weighted;

                if decrease > best.map(|(_, _, d)| d).unwrap_or(0.0) {
                    best = Some((feature, (current + next) / 2.0, decrease));
                }
            }
        }

        let (feature, threshold, decrease) = best?;
        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&s| self.x[[s, feature]] <= threshold);
        Some(BestSplit {
            feature,
            threshold,
            impurity_decrease: decrease * n as f64,
            left,
            right,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Forest {
    trees: Vec<DecisionTree>,
    importances: [f64; NUM_FEATURES],
}

/// Bagged CART trees with Gini impurity and sqrt(features) considered per split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    params: RandomForestParams,
    fitted: Option<Forest>,
}

impl Default for RandomForest {
    fn default() -> Self {
        Self {
            params: RandomForestParams::default(),
            fitted: None,
        }
    }
}

impl RandomForest {
    pub fn with_params(params: RandomForestParams) -> Result<Self> {
        if params.n_estimators == 0 || params.max_depth == 0 || params.min_samples_split < 2 {
            return Err(LifecycleError::InvalidParameter(format!(
                "invalid random forest parameters: {:?}",
                params
            )));
        }
        Ok(Self {
            params,
            fitted: None,
        })
    }
}

impl Classifier for RandomForest {
    fn name(&self) -> &'static str {
        "random_forest"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or(serde_json::Value::Null)
    }

    fn fit(&mut self, x: &Array2<f64>, y: &[usize]) -> Result<()> {
        validate_training_input(self.name(), x, y)?;
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let n = x.nrows();
        let max_features = ((NUM_FEATURES as f64).sqrt().ceil() as usize).max(1);

        let mut trees = Vec::with_capacity(self.params.n_estimators);
        let mut importances = [0.0; NUM_FEATURES];

        for _ in 0..self.params.n_estimators {
            let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let mut builder = TreeBuilder {
                x,
                y,
                params: &self.params,
                max_features,
                nodes: Vec::new(),
                importances: [0.0; NUM_FEATURES],
            };
            builder.build(bootstrap, 0, &mut rng);

            let tree_total: f64 = builder.importances.iter().sum();
            if tree_total > 0.0 {
                for (acc, v) in importances.iter_mut().zip(builder.importances.iter()) {
                    *acc += v / tree_total;
                }
            }
            trees.push(DecisionTree {
                nodes: builder.nodes,
            });
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for v in importances.iter_mut() {
                *v /= total;
            }
        }
        debug!(
            "random_forest grew {} trees, importances {:?}",
            trees.len(),
            importances
        );

        self.fitted = Some(Forest { trees, importances });
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    fn predict_proba(&self, x: ArrayView1<f64>) -> Result<Probabilities> {
        let forest = self.fitted.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        let mut proba = [0.0; NUM_CLASSES];
        for tree in &forest.trees {
            for (acc, p) in proba.iter_mut().zip(tree.predict_proba(x)) {
                *acc += p;
            }
        }
        let n = forest.trees.len().max(1) as f64;
        for p in proba.iter_mut() {
            *p /= n;
        }
        Ok(proba)
    }

    fn unfitted(&self) -> Box<dyn Classifier> {
        Box::new(Self {
            params: self.params.clone(),
            fitted: None,
        })
    }

    fn to_artifact(&self) -> Result<ClassifierArtifact> {
        Ok(ClassifierArtifact::RandomForest(self.clone()))
    }

    fn feature_importances(&self) -> Option<[f64; NUM_FEATURES]> {
        self.fitted.as_ref().map(|f| f.importances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::dataset::canonical_dataset;
    use crate::features::split::split_and_scale;
    use crate::models::metrics::accuracy;

    fn small_forest() -> RandomForest {
        RandomForest::with_params(RandomForestParams {
            n_estimators: 15,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_fits_iris_and_reports_importances() {
        let data = canonical_dataset().unwrap();
        let (split, _) = split_and_scale(&data, 0.2, 42).unwrap();

        let mut forest = small_forest();
        assert!(forest.feature_importances().is_none());
        forest.fit(&split.x_train, &split.y_train).unwrap();

        let preds: Vec<usize> = split
            .x_test
            .rows()
            .into_iter()
            .map(|row| forest.predict(row).unwrap())
            .collect();
        assert!(accuracy(&split.y_test, &preds) > 0.85);

        let importances = forest.feature_importances().unwrap();
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        // Petal measurements separate the classes far better than sepal width.
        assert!(importances[2] + importances[3] > importances[1]);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let data = canonical_dataset().unwrap();
        let (split, _) = split_and_scale(&data, 0.2, 42).unwrap();

        let mut a = small_forest();
        let mut b = small_forest();
        a.fit(&split.x_train, &split.y_train).unwrap();
        b.fit(&split.x_train, &split.y_train).unwrap();
        for row in split.x_test.rows() {
            assert_eq!(a.predict_proba(row).unwrap(), b.predict_proba(row).unwrap());
        }
    }

    #[test]
    fn test_pure_node_becomes_leaf() {
        let x = Array2::from_shape_vec((4, 4), vec![0.0; 16]).unwrap();
        let y = [1, 1, 1, 1];
        let mut forest = small_forest();
        forest.fit(&x, &y).unwrap();
        let p = forest.predict_proba(x.row(0)).unwrap();
        assert_eq!(p, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_rejects_invalid_params() {
        let params = RandomForestParams {
            n_estimators: 0,
            ..Default::default()
        };
        assert!(RandomForest::with_params(params).is_err());
    }
}
