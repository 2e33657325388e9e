//! CART decision tree, the building block of the tree ensembles

use crate::error::{PlanError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rand::seq::index::sample;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Decision tree node, stored in a flat arena
#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    /// Regression: `[mean]`; classification: class frequencies
    Leaf { value: Vec<f64> },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Impurity criterion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum Criterion {
    /// Gini impurity over class indices `0..n_classes`
    Gini { n_classes: usize },
    /// Squared error
    Mse,
}

/// Decision tree model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub criterion: Criterion,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features drawn at random per node; all features when `None`
    pub max_features: Option<usize>,
    nodes: Vec<Node>,
    n_features: usize,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    score: f64,
    split_at: usize,
    order: Vec<usize>,
}

impl DecisionTree {
    pub fn new(criterion: Criterion) -> Self {
        Self {
            criterion,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            nodes: Vec::new(),
            n_features: 0,
        }
    }

    pub fn regressor() -> Self {
        Self::new(Criterion::Mse)
    }

    pub fn classifier(n_classes: usize) -> Self {
        Self::new(Criterion::Gini { n_classes })
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples.max(2);
        self
    }

    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples.max(1);
        self
    }

    pub fn with_max_features(mut self, max_features: Option<usize>) -> Self {
        self.max_features = max_features;
        self
    }

    /// Fit on the given rows (duplicates allowed, as in a bootstrap sample).
    ///
    /// For `Gini`, `y` holds class indices.
    pub fn fit_rows<R: Rng>(&mut self, x: &Array2<f64>, y: &[f64], rows: Vec<usize>, rng: &mut R) -> Result<()> {
        if rows.is_empty() {
            return Err(PlanError::DataError("cannot grow a tree on zero rows".to_string()));
        }
        if let Criterion::Gini { n_classes } = self.criterion {
            if let Some(bad) = rows.iter().map(|&r| y[r]).find(|&c| c < 0.0 || c as usize >= n_classes) {
                return Err(PlanError::DataError(format!("class index {} outside 0..{}", bad, n_classes)));
            }
        }
        self.n_features = x.ncols();
        self.nodes.clear();
        self.grow(x, y, rows, 0, rng);
        Ok(())
    }

    pub fn fit<R: Rng>(&mut self, x: &Array2<f64>, y: &Array1<f64>, rng: &mut R) -> Result<()> {
        let y = y.to_vec();
        self.fit_rows(x, &y, (0..x.nrows()).collect(), rng)
    }

    fn leaf_value(&self, y: &[f64], rows: &[usize]) -> Vec<f64> {
        match self.criterion {
            Criterion::Mse => vec![rows.iter().map(|&r| y[r]).sum::<f64>() / rows.len() as f64],
            Criterion::Gini { n_classes } => {
                let mut counts = vec![0.0; n_classes];
                for &r in rows {
                    counts[y[r] as usize] += 1.0;
                }
                counts.iter_mut().for_each(|c| *c /= rows.len() as f64);
                counts
            }
        }
    }

    fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn grow<R: Rng>(&mut self, x: &Array2<f64>, y: &[f64], rows: Vec<usize>, depth: usize, rng: &mut R) -> usize {
        let depth_reached = self.max_depth.map_or(false, |d| depth >= d);
        let pure = rows.windows(2).all(|w| y[w[0]] == y[w[1]]);
        if depth_reached || pure || rows.len() < self.min_samples_split {
            let value = self.leaf_value(y, &rows);
            return self.push(Node::Leaf { value });
        }

        let Some(best) = self.best_split(x, y, &rows, rng) else {
            let value = self.leaf_value(y, &rows);
            return self.push(Node::Leaf { value });
        };

        // Reserve the slot so children land after their parent
        let id = self.push(Node::Leaf { value: Vec::new() });
        let (left_rows, right_rows) = best.order.split_at(best.split_at);
        let left = self.grow(x, y, left_rows.to_vec(), depth + 1, rng);
        let right = self.grow(x, y, right_rows.to_vec(), depth + 1, rng);
        self.nodes[id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        id
    }

    /// Best split over a random feature subset. Scores are proxies where
    /// larger is better: `sum_l^2/n_l + sum_r^2/n_r` for squared error and
    /// `sum_c count_l^2/n_l + sum_c count_r^2/n_r` for Gini.
    fn best_split<R: Rng>(&self, x: &Array2<f64>, y: &[f64], rows: &[usize], rng: &mut R) -> Option<BestSplit> {
        let n_features = x.ncols();
        let k = self.max_features.unwrap_or(n_features).clamp(1, n_features);
        let features = sample(rng, n_features, k).into_vec();
        let n = rows.len();
        let min_leaf = self.min_samples_leaf;

        let mut best: Option<BestSplit> = None;
        for feature in features {
            let mut order = rows.to_vec();
            order.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));
            if x[[order[0], feature]] == x[[order[n - 1], feature]] {
                continue;
            }

            let mut found: Option<(f64, usize)> = None;
            match self.criterion {
                Criterion::Mse => {
                    let total: f64 = order.iter().map(|&r| y[r]).sum();
                    let mut left_sum = 0.0;
                    for i in 0..n - 1 {
                        left_sum += y[order[i]];
                        let (n_l, n_r) = (i + 1, n - i - 1);
                        if n_l < min_leaf || n_r < min_leaf || x[[order[i], feature]] == x[[order[i + 1], feature]] {
                            continue;
                        }
                        let right_sum = total - left_sum;
                        let score = left_sum * left_sum / n_l as f64 + right_sum * right_sum / n_r as f64;
                        if found.map_or(true, |(s, _)| score > s) {
                            found = Some((score, i + 1));
                        }
                    }
                }
                Criterion::Gini { n_classes } => {
                    let mut right = vec![0.0f64; n_classes];
                    for &r in &order {
                        right[y[r] as usize] += 1.0;
                    }
                    let mut left = vec![0.0f64; n_classes];
                    let mut left_sq = 0.0;
                    let mut right_sq: f64 = right.iter().map(|c| c * c).sum();
                    for i in 0..n - 1 {
                        let c = y[order[i]] as usize;
                        left_sq += 2.0 * left[c] + 1.0;
                        right_sq -= 2.0 * right[c] - 1.0;
                        left[c] += 1.0;
                        right[c] -= 1.0;
                        let (n_l, n_r) = (i + 1, n - i - 1);
                        if n_l < min_leaf || n_r < min_leaf || x[[order[i], feature]] == x[[order[i + 1], feature]] {
                            continue;
                        }
                        let score = left_sq / n_l as f64 + right_sq / n_r as f64;
                        if found.map_or(true, |(s, _)| score > s) {
                            found = Some((score, i + 1));
                        }
                    }
                }
            }

            if let Some((score, split_at)) = found {
                if best.as_ref().map_or(true, |b| score > b.score) {
                    let threshold = (x[[order[split_at - 1], feature]] + x[[order[split_at], feature]]) / 2.0;
                    best = Some(BestSplit {
                        feature,
                        threshold,
                        score,
                        split_at,
                        order,
                    });
                }
            }
        }
        best
    }

    /// Arena index of the leaf a row falls into
    pub fn leaf_index(&self, row: ArrayView1<f64>) -> usize {
        let mut id = 0;
        while let Some(Node::Split {
            feature,
            threshold,
            left,
            right,
        }) = self.nodes.get(id)
        {
            id = if row[*feature] <= *threshold { *left } else { *right };
        }
        id
    }

    /// Overwrite a regression leaf's value
    pub fn set_leaf_value(&mut self, leaf: usize, new_value: f64) {
        if let Some(Node::Leaf { value }) = self.nodes.get_mut(leaf) {
            *value = vec![new_value];
        }
    }

    /// Leaf value for a row: `[mean]` or class frequencies
    pub fn predict_row(&self, row: ArrayView1<f64>) -> &[f64] {
        match self.nodes.get(self.leaf_index(row)) {
            Some(Node::Leaf { value }) => value,
            _ => &[],
        }
    }

    fn check_fitted(&self, x: &Array2<f64>) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(PlanError::ModelNotFitted);
        }
        super::check_predict(x, self.n_features)
    }

    /// Regression values, or the most frequent class index
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.check_fitted(x)?;
        Ok(x.rows()
            .into_iter()
            .map(|row| {
                let value = self.predict_row(row);
                match self.criterion {
                    Criterion::Mse => value.first().copied().unwrap_or(f64::NAN),
                    Criterion::Gini { .. } => argmax(value) as f64,
                }
            })
            .collect())
    }

    /// Class frequencies per row (classification trees)
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_fitted(x)?;
        let Criterion::Gini { n_classes } = self.criterion else {
            return Err(PlanError::DataError("regression tree has no class probabilities".to_string()));
        };
        let mut proba = Array2::<f64>::zeros((x.nrows(), n_classes));
        for (i, row) in x.rows().into_iter().enumerate() {
            for (c, p) in self.predict_row(row).iter().enumerate() {
                proba[[i, c]] = *p;
            }
        }
        Ok(proba)
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], id: usize) -> usize {
            match &nodes[id] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf { .. })).count()
    }
}

/// Index of the largest value; the first one wins ties
pub(crate) fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}
