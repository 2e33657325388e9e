//! Random forest ensembles

use super::decision_tree::{argmax, DecisionTree};
use super::linear_models::{classification_score, regression_score};
use super::{check_predict, check_supervised, class_codes, parse_hyperparameters, Model, Scorer};
use crate::error::{PlanError, Result};
use crate::plan::Parameters;
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Features considered per split
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "MaxFeaturesRepr")]
pub enum MaxFeatures {
    Sqrt,
    Log2,
    /// Fraction of the features, in (0, 1]
    Fraction(f64),
    Count(usize),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MaxFeaturesRepr {
    Count(usize),
    Fraction(f64),
    Name(String),
}

impl TryFrom<MaxFeaturesRepr> for MaxFeatures {
    type Error = String;

    fn try_from(repr: MaxFeaturesRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            MaxFeaturesRepr::Count(0) => Err("max_features must be at least 1".to_string()),
            MaxFeaturesRepr::Count(n) => Ok(MaxFeatures::Count(n)),
            MaxFeaturesRepr::Fraction(f) if f > 0.0 && f <= 1.0 => Ok(MaxFeatures::Fraction(f)),
            MaxFeaturesRepr::Fraction(f) => Err(format!("max_features fraction must be in (0, 1], got {}", f)),
            MaxFeaturesRepr::Name(name) => match name.as_str() {
                "sqrt" | "auto" => Ok(MaxFeatures::Sqrt),
                "log2" => Ok(MaxFeatures::Log2),
                other => Err(format!("unknown max_features '{}'", other)),
            },
        }
    }
}

impl Serialize for MaxFeatures {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            MaxFeatures::Sqrt => serializer.serialize_str("sqrt"),
            MaxFeatures::Log2 => serializer.serialize_str("log2"),
            MaxFeatures::Fraction(f) => serializer.serialize_f64(*f),
            MaxFeatures::Count(c) => serializer.serialize_u64(*c as u64),
        }
    }
}

impl MaxFeatures {
    /// Resolve to a feature count for `n_features` columns
    pub fn resolve(self, n_features: usize) -> usize {
        let n = n_features as f64;
        let count = match self {
            MaxFeatures::Sqrt => n.sqrt().floor() as usize,
            MaxFeatures::Log2 => n.log2().floor() as usize,
            MaxFeatures::Fraction(f) => (f * n).floor() as usize,
            MaxFeatures::Count(c) => c,
        };
        count.clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RandomForestConfig {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// `None` considers every feature
    pub max_features: Option<MaxFeatures>,
    pub bootstrap: bool,
    pub random_state: Option<u64>,
    /// Accepted; trees are always built on the rayon pool
    pub n_jobs: Option<i64>,
}

impl RandomForestConfig {
    pub fn regressor() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            bootstrap: true,
            random_state: None,
            n_jobs: None,
        }
    }

    pub fn classifier() -> Self {
        Self {
            max_features: Some(MaxFeatures::Sqrt),
            ..Self::regressor()
        }
    }

    /// Overlay user hyperparameters on the given defaults
    fn from_params(model: &str, defaults: Self, params: &Parameters) -> Result<Self> {
        let mut merged = serde_json::to_value(&defaults)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        for (key, value) in params {
            merged.insert(key.clone(), value.clone());
        }
        let config: Self = parse_hyperparameters(model, &merged)?;
        if config.n_estimators == 0 {
            return Err(PlanError::Construction {
                model: model.to_string(),
                reason: "n_estimators must be at least 1".to_string(),
            });
        }
        Ok(config)
    }

    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }
}

/// Grow `n_estimators` trees in parallel, one seeded rng per tree
fn grow_forest(
    config: &RandomForestConfig,
    x: &Array2<f64>,
    y: &[f64],
    make_tree: impl Fn() -> DecisionTree + Sync,
) -> Result<Vec<DecisionTree>> {
    let mut master = match config.random_state {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };
    let seeds: Vec<u64> = (0..config.n_estimators).map(|_| master.gen()).collect();
    let n = x.nrows();
    let max_features = config.max_features.map(|m| m.resolve(x.ncols()));

    seeds
        .into_par_iter()
        .map(|seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let rows: Vec<usize> = if config.bootstrap {
                (0..n).map(|_| rng.gen_range(0..n)).collect()
            } else {
                (0..n).collect()
            };
            let mut tree = make_tree()
                .with_max_depth(config.max_depth)
                .with_min_samples_split(config.min_samples_split)
                .with_min_samples_leaf(config.min_samples_leaf)
                .with_max_features(max_features);
            tree.fit_rows(x, y, rows, &mut rng)?;
            Ok(tree)
        })
        .collect()
}

/// Random forest regressor: mean of bootstrapped regression trees
#[derive(Debug, Clone)]
pub struct RandomForestRegressor {
    pub config: RandomForestConfig,
    trees: Vec<DecisionTree>,
    n_features: usize,
}

impl RandomForestRegressor {
    pub fn new(config: RandomForestConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            n_features: 0,
        }
    }

    pub fn from_params(params: &Parameters) -> Result<Self> {
        let config = RandomForestConfig::from_params("RandomForestRegressor", RandomForestConfig::regressor(), params)?;
        Ok(Self::new(config))
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Model for RandomForestRegressor {
    fn name(&self) -> &'static str {
        "RandomForestRegressor"
    }

    fn fit(&mut self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<()> {
        let y = check_supervised(self.name(), x, y)?;
        let start = Instant::now();
        self.trees = grow_forest(&self.config, x, &y.to_vec(), DecisionTree::regressor)?;
        self.n_features = x.ncols();
        debug!(
            trees = self.trees.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Random forest regressor grown"
        );
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(PlanError::ModelNotFitted);
        }
        check_predict(x, self.n_features)?;
        let predictions = self
            .trees
            .par_iter()
            .map(|tree| tree.predict(x))
            .collect::<Result<Vec<_>>>()?;
        let mut sum = Array1::<f64>::zeros(x.nrows());
        for p in &predictions {
            sum += p;
        }
        Ok(sum / self.trees.len() as f64)
    }

    fn scorer(&self) -> Option<&dyn Scorer> {
        Some(self)
    }
}

impl Scorer for RandomForestRegressor {
    fn score(&self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<f64> {
        regression_score(self, x, y)
    }
}

/// Random forest classifier: averaged class frequencies of bootstrapped trees
#[derive(Debug, Clone)]
pub struct RandomForestClassifier {
    pub config: RandomForestConfig,
    trees: Vec<DecisionTree>,
    classes: Vec<f64>,
    n_features: usize,
}

impl RandomForestClassifier {
    pub fn new(config: RandomForestConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            classes: Vec::new(),
            n_features: 0,
        }
    }

    pub fn from_params(params: &Parameters) -> Result<Self> {
        let config =
            RandomForestConfig::from_params("RandomForestClassifier", RandomForestConfig::classifier(), params)?;
        Ok(Self::new(config))
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.trees.is_empty() {
            return Err(PlanError::ModelNotFitted);
        }
        check_predict(x, self.n_features)?;
        let probas = self
            .trees
            .par_iter()
            .map(|tree| tree.predict_proba(x))
            .collect::<Result<Vec<_>>>()?;
        let mut sum = Array2::<f64>::zeros((x.nrows(), self.classes.len()));
        for p in &probas {
            sum += p;
        }
        Ok(sum / self.trees.len() as f64)
    }
}

impl Model for RandomForestClassifier {
    fn name(&self) -> &'static str {
        "RandomForestClassifier"
    }

    fn fit(&mut self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<()> {
        let y = check_supervised(self.name(), x, y)?;
        let classes = class_codes(y);
        let indices: Vec<f64> = y
            .iter()
            .map(|label| classes.partition_point(|c| c < label) as f64)
            .collect();
        let n_classes = classes.len();
        self.trees = grow_forest(&self.config, x, &indices, || DecisionTree::classifier(n_classes))?;
        self.classes = classes;
        self.n_features = x.ncols();
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

impl Scorer for RandomForestClassifier {
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
    fn test_max_features_parsing() {
        let parse = |v: serde_json::Value| serde_json::from_value::<MaxFeatures>(v);
        assert_eq!(parse(json!("sqrt")).unwrap(), MaxFeatures::Sqrt);
        assert_eq!(parse(json!(3)).unwrap(), MaxFeatures::Count(3));
        assert_eq!(parse(json!(0.5)).unwrap(), MaxFeatures::Fraction(0.5));
        assert!(parse(json!("cube")).is_err());
        assert_eq!(MaxFeatures::Sqrt.resolve(10), 3);
        assert_eq!(MaxFeatures::Fraction(0.5).resolve(3), 1);
    }

    #[test]
    fn test_max_features_serialize_round_trip() {
        let value = serde_json::to_value(MaxFeatures::Log2).unwrap();
        assert_eq!(value, json!("log2"));
        assert_eq!(serde_json::from_value::<MaxFeatures>(value).unwrap(), MaxFeatures::Log2);
    }

    #[test]
    fn test_defaults_per_task() {
        let reg = RandomForestRegressor::from_params(&Parameters::new()).unwrap();
        assert_eq!(reg.config.max_features, None);
        let clf = RandomForestClassifier::from_params(&params(json!({"n_estimators": 10, "n_jobs": -1}))).unwrap();
        assert_eq!(clf.config.max_features, Some(MaxFeatures::Sqrt));
        assert_eq!(clf.config.n_estimators, 10);
        let clf = RandomForestClassifier::from_params(&params(json!({"max_features": null}))).unwrap();
        assert_eq!(clf.config.max_features, None);
    }

    #[test]
    fn test_forest_regressor_is_deterministic() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0], [7.0], [8.0]];
        let y = array![1.0, 1.2, 0.9, 1.1, 5.0, 5.2, 4.9, 5.1];
        let p = params(json!({"n_estimators": 20, "random_state": 42}));

        let mut a = RandomForestRegressor::from_params(&p).unwrap();
        let mut b = RandomForestRegressor::from_params(&p).unwrap();
        a.fit(&x, Some(&y)).unwrap();
        b.fit(&x, Some(&y)).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
        assert!(a.scorer().unwrap().score(&x, Some(&y)).unwrap() > 0.8);
    }

    #[test]
    fn test_forest_classifier() {
        let x = array![[0.0, 0.0], [0.5, 0.2], [0.1, 0.4], [5.0, 5.0], [5.5, 4.8], [4.9, 5.3]];
        let y = array![3.0, 3.0, 3.0, 7.0, 7.0, 7.0];
        let mut model = RandomForestClassifier::from_params(&params(json!({"n_estimators": 25, "random_state": 7}))).unwrap();
        model.fit(&x, Some(&y)).unwrap();
        assert_eq!(model.predict(&x).unwrap(), y);
    }

    #[test]
    fn test_zero_estimators_rejected() {
        let err = RandomForestRegressor::from_params(&params(json!({"n_estimators": 0}))).unwrap_err();
        assert!(matches!(err, PlanError::Construction { .. }));
    }
}
