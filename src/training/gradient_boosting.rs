//! Gradient boosted regression trees
//!
//! Squared-error boosting for regression; log-loss boosting with Newton leaf
//! updates for classification (one tree per class beyond two classes).

use super::decision_tree::{argmax, DecisionTree};
use super::linear_models::{classification_score, regression_score};
use super::random_forest::MaxFeatures;
use super::{check_predict, check_supervised, class_codes, parse_hyperparameters, Model, Scorer};
use crate::error::{PlanError, Result};
use crate::plan::Parameters;
use ndarray::{Array1, Array2};
use rand::seq::index::sample;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GradientBoostingConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Fraction of rows drawn without replacement per stage
    pub subsample: f64,
    pub max_features: Option<MaxFeatures>,
    pub random_state: Option<u64>,
}

impl Default for GradientBoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: Some(3),
            min_samples_split: 2,
            min_samples_leaf: 1,
            subsample: 1.0,
            max_features: None,
            random_state: None,
        }
    }
}

impl GradientBoostingConfig {
    fn from_params(model: &str, params: &Parameters) -> Result<Self> {
        let config: Self = parse_hyperparameters(model, params)?;
        let invalid = |reason: String| PlanError::Construction {
            model: model.to_string(),
            reason,
        };
        if config.n_estimators == 0 {
            return Err(invalid("n_estimators must be at least 1".to_string()));
        }
        if !(config.learning_rate > 0.0) {
            return Err(invalid(format!("learning_rate must be positive, got {}", config.learning_rate)));
        }
        if !(config.subsample > 0.0 && config.subsample <= 1.0) {
            return Err(invalid(format!("subsample must be in (0, 1], got {}", config.subsample)));
        }
        Ok(config)
    }

    fn rng(&self) -> Xoshiro256PlusPlus {
        match self.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        }
    }

    fn tree(&self, n_features: usize) -> DecisionTree {
        DecisionTree::regressor()
            .with_max_depth(self.max_depth)
            .with_min_samples_split(self.min_samples_split)
            .with_min_samples_leaf(self.min_samples_leaf)
            .with_max_features(self.max_features.map(|m| m.resolve(n_features)))
    }

    /// Rows used for one boosting stage
    fn stage_rows(&self, n: usize, rng: &mut Xoshiro256PlusPlus) -> Vec<usize> {
        if self.subsample >= 1.0 {
            return (0..n).collect();
        }
        let k = ((self.subsample * n as f64) as usize).clamp(1, n);
        let mut rows = sample(rng, n, k).into_vec();
        rows.sort_unstable();
        rows
    }
}

/// Replace each leaf's value with `numerator / denominator` summed over its rows
fn newton_leaves(tree: &mut DecisionTree, x: &Array2<f64>, rows: &[usize], num: &[f64], den: &[f64]) {
    let mut sums: HashMap<usize, (f64, f64)> = HashMap::new();
    for &r in rows {
        let leaf = tree.leaf_index(x.row(r));
        let entry = sums.entry(leaf).or_insert((0.0, 0.0));
        entry.0 += num[r];
        entry.1 += den[r];
    }
    for (leaf, (n, d)) in sums {
        let value = if d.abs() < 1e-12 { 0.0 } else { n / d };
        tree.set_leaf_value(leaf, value);
    }
}

fn tree_output(tree: &DecisionTree, x: &Array2<f64>) -> Array1<f64> {
    x.rows()
        .into_iter()
        .map(|row| tree.predict_row(row).first().copied().unwrap_or(0.0))
        .collect()
}

/// Gradient boosting for regression (squared error)
#[derive(Debug, Clone)]
pub struct GradientBoostingRegressor {
    pub config: GradientBoostingConfig,
    init: f64,
    trees: Vec<DecisionTree>,
    n_features: usize,
}

impl GradientBoostingRegressor {
    pub fn new(config: GradientBoostingConfig) -> Self {
        Self {
            config,
            init: 0.0,
            trees: Vec::new(),
            n_features: 0,
        }
    }

    pub fn from_params(params: &Parameters) -> Result<Self> {
        Ok(Self::new(GradientBoostingConfig::from_params("GradientBoostingRegressor", params)?))
    }
}

impl Model for GradientBoostingRegressor {
    fn name(&self) -> &'static str {
        "GradientBoostingRegressor"
    }

    fn fit(&mut self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<()> {
        let y = check_supervised(self.name(), x, y)?;
        let n = x.nrows();
        let mut rng = self.config.rng();

        self.init = y.mean().unwrap_or(0.0);
        let mut f = Array1::from_elem(n, self.init);
        self.trees = Vec::with_capacity(self.config.n_estimators);

        for _ in 0..self.config.n_estimators {
            let residual: Vec<f64> = y.iter().zip(f.iter()).map(|(t, p)| t - p).collect();
            let rows = self.config.stage_rows(n, &mut rng);
            let mut tree = self.config.tree(x.ncols());
            tree.fit_rows(x, &residual, rows, &mut rng)?;
            f.scaled_add(self.config.learning_rate, &tree_output(&tree, x));
            self.trees.push(tree);
        }

        self.n_features = x.ncols();
        debug!(stages = self.trees.len(), "Gradient boosting regressor fitted");
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(PlanError::ModelNotFitted);
        }
        check_predict(x, self.n_features)?;
        let mut f = Array1::from_elem(x.nrows(), self.init);
        for tree in &self.trees {
            f.scaled_add(self.config.learning_rate, &tree_output(tree, x));
        }
        Ok(f)
    }

    fn scorer(&self) -> Option<&dyn Scorer> {
        Some(self)
    }
}

impl Scorer for GradientBoostingRegressor {
    fn score(&self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<f64> {
        regression_score(self, x, y)
    }
}

/// Gradient boosting for classification (log-loss)
#[derive(Debug, Clone)]
pub struct GradientBoostingClassifier {
    pub config: GradientBoostingConfig,
    classes: Vec<f64>,
    /// Initial raw score per output (one output for binary problems)
    init: Vec<f64>,
    /// Stage-major: `stages[m][k]` is the tree for output `k`
    stages: Vec<Vec<DecisionTree>>,
    n_features: usize,
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

impl GradientBoostingClassifier {
    pub fn new(config: GradientBoostingConfig) -> Self {
        Self {
            config,
            classes: Vec::new(),
            init: Vec::new(),
            stages: Vec::new(),
            n_features: 0,
        }
    }

    pub fn from_params(params: &Parameters) -> Result<Self> {
        Ok(Self::new(GradientBoostingConfig::from_params("GradientBoostingClassifier", params)?))
    }

    /// Raw additive scores, one column per output
    fn raw_scores(&self, x: &Array2<f64>) -> Array2<f64> {
        let outputs = self.init.len();
        let mut f = Array2::<f64>::zeros((x.nrows(), outputs));
        for (k, init) in self.init.iter().enumerate() {
            f.column_mut(k).fill(*init);
        }
        for stage in &self.stages {
            for (k, tree) in stage.iter().enumerate() {
                f.column_mut(k).scaled_add(self.config.learning_rate, &tree_output(tree, x));
            }
        }
        f
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.stages.is_empty() {
            return Err(PlanError::ModelNotFitted);
        }
        check_predict(x, self.n_features)?;
        let raw = self.raw_scores(x);
        let mut proba = Array2::<f64>::zeros((x.nrows(), self.classes.len()));
        for (i, row) in raw.rows().into_iter().enumerate() {
            if self.classes.len() == 2 {
                let p = sigmoid(row[0]);
                proba[[i, 0]] = 1.0 - p;
                proba[[i, 1]] = p;
            } else {
                let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let exp: Vec<f64> = row.iter().map(|v| (v - max).exp()).collect();
                let sum: f64 = exp.iter().sum();
                for (k, e) in exp.iter().enumerate() {
                    proba[[i, k]] = e / sum;
                }
            }
        }
        Ok(proba)
    }
}

impl Model for GradientBoostingClassifier {
    fn name(&self) -> &'static str {
        "GradientBoostingClassifier"
    }

    fn fit(&mut self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<()> {
        let y = check_supervised(self.name(), x, y)?;
        let classes = class_codes(y);
        if classes.len() < 2 {
            return Err(PlanError::fit(
                self.name(),
                format!("needs at least 2 classes, got {}", classes.len()),
            ));
        }
        let n = x.nrows();
        let k = classes.len();
        let labels: Vec<usize> = y.iter().map(|label| classes.partition_point(|c| c < label)).collect();
        let mut rng = self.config.rng();
        let lr = self.config.learning_rate;

        self.classes = classes;
        self.n_features = x.ncols();
        self.stages = Vec::with_capacity(self.config.n_estimators);

        if k == 2 {
            let pos = labels.iter().filter(|&&l| l == 1).count() as f64 / n as f64;
            self.init = vec![(pos / (1.0 - pos)).ln()];
            let mut f = Array1::from_elem(n, self.init[0]);

            for _ in 0..self.config.n_estimators {
                let p: Vec<f64> = f.iter().map(|&v| sigmoid(v)).collect();
                let residual: Vec<f64> = labels.iter().zip(&p).map(|(&l, &p)| l as f64 - p).collect();
                let hessian: Vec<f64> = p.iter().map(|p| p * (1.0 - p)).collect();
                let rows = self.config.stage_rows(n, &mut rng);

                let mut tree = self.config.tree(x.ncols());
                tree.fit_rows(x, &residual, rows.clone(), &mut rng)?;
                newton_leaves(&mut tree, x, &rows, &residual, &hessian);
                f.scaled_add(lr, &tree_output(&tree, x));
                self.stages.push(vec![tree]);
            }
        } else {
            let priors: Vec<f64> = (0..k)
                .map(|c| labels.iter().filter(|&&l| l == c).count() as f64 / n as f64)
                .collect();
            self.init = priors.iter().map(|p| p.ln()).collect();
            let mut f = Array2::<f64>::zeros((n, k));
            for (c, init) in self.init.iter().enumerate() {
                f.column_mut(c).fill(*init);
            }
            let scale = (k as f64 - 1.0) / k as f64;

            for _ in 0..self.config.n_estimators {
                let mut proba = f.clone();
                for mut row in proba.rows_mut() {
                    let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                    row.mapv_inplace(|v| (v - max).exp());
                    let sum = row.sum();
                    row.mapv_inplace(|v| v / sum);
                }
                let rows = self.config.stage_rows(n, &mut rng);

                let mut stage = Vec::with_capacity(k);
                for c in 0..k {
                    let residual: Vec<f64> = (0..n)
                        .map(|i| if labels[i] == c { 1.0 } else { 0.0 } - proba[[i, c]])
                        .collect();
                    let numerator: Vec<f64> = residual.iter().map(|r| r * scale).collect();
                    let hessian: Vec<f64> = residual.iter().map(|r| r.abs() * (1.0 - r.abs())).collect();

                    let mut tree = self.config.tree(x.ncols());
                    tree.fit_rows(x, &residual, rows.clone(), &mut rng)?;
                    newton_leaves(&mut tree, x, &rows, &numerator, &hessian);
                    f.column_mut(c).scaled_add(lr, &tree_output(&tree, x));
                    stage.push(tree);
                }
                self.stages.push(stage);
            }
        }

        debug!(stages = self.stages.len(), classes = k, "Gradient boosting classifier fitted");
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let proba = self.predict_proba(x)?;
        Ok(proba
            .rows()
            .into_iter()
            .map(|row| self.classes[argmax(&row.to_vec())])
            .collect())
    }

    fn scorer(&self) -> Option<&dyn Scorer> {
        Some(self)
    }
}

impl Scorer for GradientBoostingClassifier {
    fn score(&self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<f64> {
        classification_score(self, x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use serde_json::json;

    fn params(value: serde_json::Value) -> Parameters {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Parameters::new(),
        }
    }

    #[test]
    fn test_regressor_fits_curve() {
        let x = Array2::from_shape_fn((40, 1), |(i, _)| i as f64 / 4.0);
        let y = x.column(0).mapv(|v| v.sin() * 3.0);
        let mut model = GradientBoostingRegressor::from_params(&params(json!({"random_state": 0}))).unwrap();
        model.fit(&x, Some(&y)).unwrap();
        assert!(model.scorer().unwrap().score(&x, Some(&y)).unwrap() > 0.95);
    }

    #[test]
    fn test_binary_classifier() {
        let x = array![[0.0], [0.5], [1.0], [1.5], [5.0], [5.5], [6.0], [6.5]];
        let y = array![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        let mut model = GradientBoostingClassifier::from_params(&params(json!({"n_estimators": 20}))).unwrap();
        model.fit(&x, Some(&y)).unwrap();
        assert_eq!(model.predict(&x).unwrap(), y);
    }

    #[test]
    fn test_multiclass_classifier() {
        let x = array![[0.0], [0.2], [0.4], [5.0], [5.2], [5.4], [10.0], [10.2], [10.4]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0];
        let mut model = GradientBoostingClassifier::from_params(&params(json!({
            "n_estimators": 30,
            "subsample": 0.9,
            "random_state": 3
        })))
        .unwrap();
        model.fit(&x, Some(&y)).unwrap();
        assert_eq!(model.predict(&x).unwrap(), y);
        let proba = model.predict_proba(&x).unwrap();
        assert!((proba.row(4).sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_learning_rate() {
        let err = GradientBoostingRegressor::from_params(&params(json!({"learning_rate": 0.0}))).unwrap_err();
        assert!(matches!(err, PlanError::Construction { .. }));
    }
}
