//! Random Forest classifier.
//!
//! CART trees split on Gini impurity. Each tree is grown on a bootstrap
//! sample and looks at a random subset of features at every node. Leaves
//! keep the class distribution of the samples that reached them, so forest
//! probabilities are the mean of the leaf distributions and always sum to 1.

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features tried per split; `None` means `floor(sqrt(n_features))`.
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 15,
            min_samples_split: 5,
            min_samples_leaf: 2,
            max_features: None,
            seed: 42,
        }
    }
}

impl ForestParams {
    fn features_per_split(&self, n_features: usize) -> usize {
        let k = self
            .max_features
            .unwrap_or_else(|| (n_features as f64).sqrt().floor() as usize);
        k.clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Split(Split),
    Leaf(Leaf),
}

/// Samples with `x[feature] <= threshold` go left.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Split {
    pub feature: usize,
    pub threshold: f64,
    pub left: Box<TreeNode>,
    pub right: Box<TreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leaf {
    pub distribution: Vec<f64>,
    pub n_samples: usize,
}

impl TreeNode {
    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf(_) => 0,
            TreeNode::Split(s) => 1 + s.left.depth().max(s.right.depth()),
        }
    }

    /// Checks every split and leaf below this node against the forest shape.
    fn validate(&self, n_features: usize, n_classes: usize) -> Result<(), String> {
        match self {
            TreeNode::Split(s) => {
                if s.feature >= n_features {
                    return Err(format!("split on feature {} of {}", s.feature, n_features));
                }
                if !s.threshold.is_finite() {
                    return Err(format!("non-finite threshold on feature {}", s.feature));
                }
                s.left.validate(n_features, n_classes)?;
                s.right.validate(n_features, n_classes)
            }
            TreeNode::Leaf(leaf) => {
                if leaf.distribution.len() != n_classes {
                    return Err(format!(
                        "leaf has {} classes, expected {}",
                        leaf.distribution.len(),
                        n_classes
                    ));
                }
                if leaf.distribution.iter().any(|p| !p.is_finite() || *p < 0.0) {
                    return Err("leaf distribution has an invalid probability".into());
                }
                let total: f64 = leaf.distribution.iter().sum();
                if (total - 1.0).abs() > 1e-6 {
                    return Err(format!("leaf distribution sums to {}", total));
                }
                Ok(())
            }
        }
    }

    fn leaf_for(&self, x: &[f64]) -> &Leaf {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf(leaf) => return leaf,
                TreeNode::Split(s) => {
                    node = if x[s.feature] <= s.threshold {
                        s.left.as_ref()
                    } else {
                        s.right.as_ref()
                    };
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    root: TreeNode,
    /// Impurity decrease per feature, normalized to sum to 1 (all zero for a stump).
    importances: Vec<f64>,
}

impl DecisionTree {
    /// Grows a tree over the rows named by `sample` (duplicates allowed).
    fn fit(
        x: &[Vec<f64>],
        y: &[usize],
        mut sample: Vec<usize>,
        n_classes: usize,
        params: &ForestParams,
        rng: StdRng,
    ) -> Self {
        let n_features = x.first().map_or(0, Vec::len);
        let mut builder = TreeBuilder {
            x,
            y,
            n_classes,
            n_features,
            params,
            max_features: params.features_per_split(n_features),
            rng,
            importances: vec![0.0; n_features],
        };
        let root = builder.grow(&mut sample, 0);

        let mut importances = builder.importances;
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }
        Self { root, importances }
    }

    pub fn predict_proba(&self, x: &[f64]) -> &[f64] {
        &self.root.leaf_for(x).distribution
    }

    pub fn depth(&self) -> usize {
        self.root.depth()
    }
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [usize],
    n_classes: usize,
    n_features: usize,
    params: &'a ForestParams,
    max_features: usize,
    rng: StdRng,
    importances: Vec<f64>,
}

struct Candidate {
    feature: usize,
    threshold: f64,
    /// `n * gini(parent) - n_left * gini(left) - n_right * gini(right)`
    decrease: f64,
}

fn gini(counts: &[usize], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / n;
            p * p
        })
        .sum::<f64>()
}

impl<'a> TreeBuilder<'a> {
    fn class_counts(&self, idx: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes];
        for &i in idx {
            counts[self.y[i]] += 1;
        }
        counts
    }

    fn leaf(&self, counts: &[usize], n: usize) -> TreeNode {
        let distribution = counts.iter().map(|&c| c as f64 / n as f64).collect();
        TreeNode::Leaf(Leaf {
            distribution,
            n_samples: n,
        })
    }

    fn grow(&mut self, idx: &mut [usize], depth: usize) -> TreeNode {
        let n = idx.len();
        let counts = self.class_counts(idx);
        let impurity = gini(&counts, n);

        if depth >= self.params.max_depth
            || n < self.params.min_samples_split
            || n < 2 * self.params.min_samples_leaf
            || impurity <= 0.0
        {
            return self.leaf(&counts, n);
        }

        let best = match self.best_split(idx, &counts, impurity) {
            Some(best) => best,
            None => return self.leaf(&counts, n),
        };
        self.importances[best.feature] += best.decrease;

        let mut mid = 0;
        for j in 0..n {
            if self.x[idx[j]][best.feature] <= best.threshold {
                idx.swap(mid, j);
                mid += 1;
            }
        }
        let (left_idx, right_idx) = idx.split_at_mut(mid);
        let left = self.grow(left_idx, depth + 1);
        let right = self.grow(right_idx, depth + 1);

        TreeNode::Split(Split {
            feature: best.feature,
            threshold: best.threshold,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// Visits features in random order until `max_features` non-constant ones
    /// have been evaluated.
    fn best_split(&mut self, idx: &[usize], parent: &[usize], impurity: f64) -> Option<Candidate> {
        let n = idx.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let parent_weighted = n as f64 * impurity;

        let mut order: Vec<usize> = (0..self.n_features).collect();
        order.shuffle(&mut self.rng);

        let mut sorted = idx.to_vec();
        let mut best: Option<Candidate> = None;
        let mut visited = 0;
        for feature in order {
            if visited >= self.max_features {
                break;
            }
            let x = self.x;
            sorted.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));
            if x[sorted[0]][feature] >= x[sorted[n - 1]][feature] {
                continue;
            }
            visited += 1;

            let mut left = vec![0usize; self.n_classes];
            let mut right = parent.to_vec();
            for pos in 0..n - 1 {
                let class = self.y[sorted[pos]];
                left[class] += 1;
                right[class] -= 1;

                let lo = x[sorted[pos]][feature];
                let hi = x[sorted[pos + 1]][feature];
                let n_left = pos + 1;
                let n_right = n - n_left;
                if lo >= hi || n_left < min_leaf || n_right < min_leaf {
                    continue;
                }

                let decrease = parent_weighted
                    - n_left as f64 * gini(&left, n_left)
                    - n_right as f64 * gini(&right, n_right);
                if best.as_ref().map_or(true, |b| decrease > b.decrease + 1e-12) {
                    let mut threshold = lo + (hi - lo) / 2.0;
                    if threshold >= hi {
                        threshold = lo;
                    }
                    best = Some(Candidate {
                        feature,
                        threshold,
                        decrease,
                    });
                }
            }
        }

        best.filter(|b| b.decrease > 0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
    n_classes: usize,
    importances: Vec<f64>,
    params: ForestParams,
}

impl RandomForest {
    /// Fits `params.n_estimators` trees in parallel.
    ///
    /// Per-tree seeds are drawn from `params.seed` before any tree is built,
    /// so the forest is identical however rayon schedules the work.
    pub fn fit(
        x: &[Vec<f64>],
        y: &[usize],
        n_classes: usize,
        params: ForestParams,
    ) -> Result<Self, ModelError> {
        let n_samples = x.len();
        if n_samples == 0 {
            return Err(ModelError::EmptyDataset);
        }
        if y.len() != n_samples {
            return Err(ModelError::Dimension {
                got: y.len(),
                expected: n_samples,
            });
        }
        let n_features = x[0].len();
        if let Some(row) = x.iter().find(|r| r.len() != n_features) {
            return Err(ModelError::Dimension {
                got: row.len(),
                expected: n_features,
            });
        }
        if let Some(&bad) = y.iter().find(|&&c| c >= n_classes) {
            return Err(ModelError::Inconsistent(format!(
                "class index {} out of range for {} classes",
                bad, n_classes
            )));
        }
        if params.n_estimators == 0 {
            return Err(ModelError::Inconsistent("forest needs at least one tree".into()));
        }

        let mut master = StdRng::seed_from_u64(params.seed);
        let seeds: Vec<u64> = (0..params.n_estimators).map(|_| master.gen()).collect();

        let trees: Vec<DecisionTree> = seeds
            .par_iter()
            .map(|&seed| {
                let mut rng = StdRng::seed_from_u64(seed);
                let sample: Vec<usize> =
                    (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();
                DecisionTree::fit(x, y, sample, n_classes, &params, rng)
            })
            .collect();

        let mut importances = vec![0.0; n_features];
        for tree in &trees {
            for (total, v) in importances.iter_mut().zip(&tree.importances) {
                *total += v;
            }
        }
        let sum: f64 = importances.iter().sum();
        if sum > 0.0 {
            importances.iter_mut().for_each(|v| *v /= sum);
        }

        tracing::debug!(
            "fitted {} trees, max depth {}",
            trees.len(),
            trees.iter().map(DecisionTree::depth).max().unwrap_or(0)
        );

        Ok(Self {
            trees,
            n_features,
            n_classes,
            importances,
            params,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    /// Structural check for a forest that did not come from `fit`, such as
    /// one read back from disk. Prediction indexes features and classes
    /// without bounds checks of its own.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.trees.is_empty() {
            return Err(ModelError::Inconsistent("forest has no trees".into()));
        }
        if self.importances.len() != self.n_features {
            return Err(ModelError::Dimension {
                got: self.importances.len(),
                expected: self.n_features,
            });
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.root
                .validate(self.n_features, self.n_classes)
                .map_err(|reason| ModelError::Inconsistent(format!("tree {}: {}", i, reason)))?;
        }
        Ok(())
    }

    /// Mean decrease in Gini impurity per feature; sums to 1 unless no tree split.
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn predict_proba(&self, x: &[f64]) -> Result<Vec<f64>, ModelError> {
        if x.len() != self.n_features {
            return Err(ModelError::Dimension {
                got: x.len(),
                expected: self.n_features,
            });
        }
        let mut proba = vec![0.0; self.n_classes];
        for tree in &self.trees {
            for (p, v) in proba.iter_mut().zip(tree.predict_proba(x)) {
                *p += v;
            }
        }
        let n_trees = self.trees.len() as f64;
        proba.iter_mut().for_each(|p| *p /= n_trees);
        Ok(proba)
    }

    /// Index of the most probable class; ties go to the lower index.
    pub fn predict(&self, x: &[f64]) -> Result<usize, ModelError> {
        let proba = self.predict_proba(x)?;
        Ok(argmax(&proba))
    }

    /// Fraction of rows whose predicted class equals the label.
    pub fn score(&self, x: &[Vec<f64>], y: &[usize]) -> Result<f64, ModelError> {
        if x.is_empty() {
            return Ok(0.0);
        }
        let mut correct = 0usize;
        for (row, &label) in x.iter().zip(y) {
            if self.predict(row)? == label {
                correct += 1;
            }
        }
        Ok(correct as f64 / x.len() as f64)
    }
}

pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three well separated blobs in two dimensions.
    fn blobs() -> (Vec<Vec<f64>>, Vec<usize>) {
        let mut rng = StdRng::seed_from_u64(7);
        let centres = [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)];
        let mut x = Vec::new();
        let mut y = Vec::new();
        for (class, &(cx, cy)) in centres.iter().enumerate() {
            for _ in 0..40 {
                x.push(vec![cx + rng.gen_range(-1.0..1.0), cy + rng.gen_range(-1.0..1.0)]);
                y.push(class);
            }
        }
        (x, y)
    }

    fn small_params() -> ForestParams {
        ForestParams {
            n_estimators: 20,
            ..ForestParams::default()
        }
    }

    #[test]
    fn test_gini() {
        assert_eq!(gini(&[4, 0], 4), 0.0);
        assert!((gini(&[2, 2], 4) - 0.5).abs() < 1e-12);
        assert_eq!(gini(&[], 0), 0.0);
    }

    #[test]
    fn test_fits_separable_data() {
        let (x, y) = blobs();
        let forest = RandomForest::fit(&x, &y, 3, small_params()).unwrap();
        assert_eq!(forest.n_trees(), 20);
        assert!(forest.score(&x, &y).unwrap() > 0.97);
        assert_eq!(forest.predict(&[10.0, 0.2]).unwrap(), 1);
        assert_eq!(forest.predict(&[0.1, 9.5]).unwrap(), 2);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let (x, y) = blobs();
        let forest = RandomForest::fit(&x, &y, 3, small_params()).unwrap();
        for point in [[0.0, 0.0], [5.0, 5.0], [-3.0, 12.0], [100.0, -100.0]] {
            let p = forest.predict_proba(&point).unwrap();
            assert_eq!(p.len(), 3);
            assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_importances_normalized() {
        let (x, y) = blobs();
        let forest = RandomForest::fit(&x, &y, 3, small_params()).unwrap();
        let imp = forest.feature_importances();
        assert_eq!(imp.len(), 2);
        assert!((imp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(imp.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_uninformative_feature_gets_no_importance() {
        let (mut x, y) = blobs();
        for row in &mut x {
            row.push(3.0);
        }
        let forest = RandomForest::fit(&x, &y, 3, small_params()).unwrap();
        assert_eq!(forest.feature_importances()[2], 0.0);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let (x, y) = blobs();
        let a = RandomForest::fit(&x, &y, 3, small_params()).unwrap();
        let b = RandomForest::fit(&x, &y, 3, small_params()).unwrap();
        assert_eq!(a.feature_importances(), b.feature_importances());
        for point in [[4.0, 4.0], [6.0, 1.0], [1.0, 6.0]] {
            assert_eq!(a.predict_proba(&point).unwrap(), b.predict_proba(&point).unwrap());
        }
    }

    #[test]
    fn test_fitted_forest_validates() {
        let (x, y) = blobs();
        let forest = RandomForest::fit(&x, &y, 3, small_params()).unwrap();
        assert!(forest.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_structure() {
        let (x, y) = blobs();
        let forest = RandomForest::fit(&x, &y, 3, small_params()).unwrap();

        let mut bad_feature = forest.clone();
        bad_feature.trees[0].root = TreeNode::Split(Split {
            feature: 99,
            threshold: 0.0,
            left: Box::new(forest.trees[0].root.clone()),
            right: Box::new(forest.trees[0].root.clone()),
        });
        assert!(matches!(bad_feature.validate(), Err(ModelError::Inconsistent(_))));

        let mut short_leaf = forest.clone();
        short_leaf.trees[0].root = TreeNode::Leaf(Leaf {
            distribution: vec![0.5],
            n_samples: 4,
        });
        assert!(short_leaf.validate().is_err());

        let mut unnormalized = forest.clone();
        unnormalized.trees[1].root = TreeNode::Leaf(Leaf {
            distribution: vec![0.5, 0.0, 0.0],
            n_samples: 4,
        });
        assert!(unnormalized.validate().is_err());

        let mut empty = forest;
        empty.trees.clear();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_depth_limit() {
        let (x, y) = blobs();
        let params = ForestParams {
            max_depth: 1,
            ..small_params()
        };
        let forest = RandomForest::fit(&x, &y, 3, params).unwrap();
        assert!(forest.trees.iter().all(|t| t.depth() <= 1));
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let (x, y) = blobs();
        assert!(RandomForest::fit(&x, &y[..10], 3, small_params()).is_err());
        assert!(RandomForest::fit(&x, &y, 2, small_params()).is_err());
        assert!(RandomForest::fit(&[], &[], 3, small_params()).is_err());

        let forest = RandomForest::fit(&x, &y, 3, small_params()).unwrap();
        assert!(matches!(
            forest.predict_proba(&[1.0]),
            Err(ModelError::Dimension { got: 1, expected: 2 })
        ));
    }

    #[test]
    fn test_argmax_prefers_first_on_ties() {
        assert_eq!(argmax(&[0.2, 0.4, 0.4]), 1);
        assert_eq!(argmax(&[0.5]), 0);
    }
}
