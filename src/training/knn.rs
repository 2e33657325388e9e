//! K-Nearest Neighbors classifier

use super::linear_models::classification_score;
use super::{check_predict, check_supervised, class_codes, parse_hyperparameters, Model, Scorer};
use crate::error::{PlanError, Result};
use crate::plan::Parameters;
use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Distance metric; `Minkowski` uses the configured `p`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Minkowski,
    Euclidean,
    Manhattan,
}

/// Weighting scheme for neighbor votes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightScheme {
    /// All neighbors have equal weight
    #[default]
    Uniform,
    /// Inverse distance; exact matches outvote everything else
    Distance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KNeighborsConfig {
    pub n_neighbors: usize,
    pub weights: WeightScheme,
    pub p: f64,
    pub metric: DistanceMetric,
    pub algorithm: Option<String>,
    pub leaf_size: Option<usize>,
    pub n_jobs: Option<i64>,
}

impl Default for KNeighborsConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 5,
            weights: WeightScheme::Uniform,
            p: 2.0,
            metric: DistanceMetric::Minkowski,
            algorithm: None,
            leaf_size: None,
            n_jobs: None,
        }
    }
}

impl KNeighborsConfig {
    /// Minkowski exponent actually used
    fn exponent(&self) -> f64 {
        match self.metric {
            DistanceMetric::Minkowski => self.p,
            DistanceMetric::Euclidean => 2.0,
            DistanceMetric::Manhattan => 1.0,
        }
    }
}

/// K-Nearest Neighbors Classifier
#[derive(Debug, Clone)]
pub struct KNeighborsClassifier {
    pub config: KNeighborsConfig,
    x_train: Option<Array2<f64>>,
    /// Class index per training row
    y_train: Vec<usize>,
    classes: Vec<f64>,
}

impl KNeighborsClassifier {
    pub fn new(config: KNeighborsConfig) -> Self {
        Self {
            config,
            x_train: None,
            y_train: Vec::new(),
            classes: Vec::new(),
        }
    }

    pub fn from_params(params: &Parameters) -> Result<Self> {
        let config: KNeighborsConfig = parse_hyperparameters("KNeighborsClassifier", params)?;
        let invalid = |reason: String| PlanError::Construction {
            model: "KNeighborsClassifier".to_string(),
            reason,
        };
        if config.n_neighbors == 0 {
            return Err(invalid("n_neighbors must be at least 1".to_string()));
        }
        if !(config.p >= 1.0) {
            return Err(invalid(format!("p must be at least 1, got {}", config.p)));
        }
        Ok(Self::new(config))
    }

    /// Create with default config and specified k
    pub fn with_k(k: usize) -> Self {
        Self::new(KNeighborsConfig {
            n_neighbors: k,
            ..Default::default()
        })
    }

    /// Class weights per row, normalised to probabilities (parallelized)
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let x_train = self.x_train.as_ref().ok_or(PlanError::ModelNotFitted)?;
        check_predict(x, x_train.ncols())?;
        let n_classes = self.classes.len();
        let k = self.config.n_neighbors.min(x_train.nrows());
        let p = self.config.exponent();
        let weights = self.config.weights;

        let rows: Vec<Vec<f64>> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let neighbors = find_k_nearest(x.row(i), x_train, k, p);
                let mut votes = class_votes(&neighbors, &self.y_train, n_classes, weights);
                let total: f64 = votes.iter().sum();
                if total > 0.0 {
                    votes.iter_mut().for_each(|v| *v /= total);
                }
                votes
            })
            .collect();

        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Ok(Array2::from_shape_vec((x.nrows(), n_classes), flat)?)
    }
}

impl Model for KNeighborsClassifier {
    fn name(&self) -> &'static str {
        "KNeighborsClassifier"
    }

    fn fit(&mut self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<()> {
        let y = check_supervised(self.name(), x, y)?;
        let classes = class_codes(y);
        self.y_train = y.iter().map(|label| classes.partition_point(|c| c < label)).collect();
        self.classes = classes;
        self.x_train = Some(x.clone());
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let proba = self.predict_proba(x)?;
        Ok(proba
            .rows()
            .into_iter()
            .map(|row| {
                // Ties go to the smallest class
                let mut best = 0;
                for (c, v) in row.iter().enumerate() {
                    if *v > row[best] {
                        best = c;
                    }
                }
                self.classes[best]
            })
            .collect())
    }

    fn scorer(&self) -> Option<&dyn Scorer> {
        Some(self)
    }
}

impl Scorer for KNeighborsClassifier {
    fn score(&self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<f64> {
        classification_score(self, x, y)
    }
}

/// Max-heap entry (distance, training row); the farthest neighbor sits on top
#[derive(PartialEq)]
struct Neighbor(f64, usize);

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0).then(self.1.cmp(&other.1))
    }
}

/// Find the k nearest training rows with a bounded max-heap, O(n log k)
fn find_k_nearest(point: ArrayView1<f64>, x_train: &Array2<f64>, k: usize, p: f64) -> Vec<(f64, usize)> {
    let mut heap = BinaryHeap::with_capacity(k + 1);
    for (i, row) in x_train.rows().into_iter().enumerate() {
        let candidate = Neighbor(minkowski(point, row, p), i);
        if heap.len() < k {
            heap.push(candidate);
        } else if heap.peek().is_some_and(|top| candidate < *top) {
            heap.pop();
            heap.push(candidate);
        }
    }
    heap.into_iter().map(|n| (n.0, n.1)).collect()
}

pub(crate) fn minkowski(a: ArrayView1<f64>, b: ArrayView1<f64>, p: f64) -> f64 {
    let diffs = a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs());
    if p == 1.0 {
        diffs.sum()
    } else if p == 2.0 {
        diffs.map(|d| d * d).sum::<f64>().sqrt()
    } else {
        diffs.map(|d| d.powf(p)).sum::<f64>().powf(1.0 / p)
    }
}

fn class_votes(neighbors: &[(f64, usize)], labels: &[usize], n_classes: usize, weights: WeightScheme) -> Vec<f64> {
    let mut votes = vec![0.0; n_classes];
    let exact = neighbors.iter().any(|(d, _)| *d == 0.0);
    for &(dist, row) in neighbors {
        let weight = match weights {
            WeightScheme::Uniform => 1.0,
            WeightScheme::Distance if exact => {
                if dist == 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            WeightScheme::Distance => 1.0 / dist,
        };
        votes[labels[row]] += weight;
    }
    votes
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
    fn test_knn_uniform_vote() {
        let x = array![[0.0], [1.0], [2.0], [10.0], [11.0], [12.0]];
        let y = array![3.0, 3.0, 3.0, 7.0, 7.0, 7.0];
        let mut model = KNeighborsClassifier::with_k(3);
        model.fit(&x, Some(&y)).unwrap();
        let pred = model.predict(&array![[0.5], [11.5]]).unwrap();
        assert_eq!(pred, array![3.0, 7.0]);
    }

    #[test]
    fn test_tie_goes_to_smallest_class() {
        let x = array![[0.0], [2.0]];
        let y = array![1.0, 0.0];
        let mut model = KNeighborsClassifier::with_k(2);
        model.fit(&x, Some(&y)).unwrap();
        assert_eq!(model.predict(&array![[1.0]]).unwrap(), array![0.0]);
    }

    #[test]
    fn test_distance_weights_exact_match() {
        let x = array![[0.0], [0.1], [0.2], [5.0]];
        let y = array![0.0, 0.0, 0.0, 1.0];
        let mut model = KNeighborsClassifier::from_params(&params(json!({
            "n_neighbors": 4,
            "weights": "distance"
        })))
        .unwrap();
        model.fit(&x, Some(&y)).unwrap();
        let proba = model.predict_proba(&array![[5.0]]).unwrap();
        assert_eq!(proba.row(0).to_vec(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_more_neighbors_than_rows() {
        let x = array![[0.0], [1.0]];
        let y = array![0.0, 1.0];
        let mut model = KNeighborsClassifier::with_k(5);
        model.fit(&x, Some(&y)).unwrap();
        assert_eq!(model.predict(&array![[0.9]]).unwrap().len(), 1);
    }

    #[test]
    fn test_manhattan_metric() {
        let a = array![0.0, 0.0];
        let b = array![3.0, 4.0];
        assert_eq!(minkowski(a.view(), b.view(), 1.0), 7.0);
        assert_eq!(minkowski(a.view(), b.view(), 2.0), 5.0);
    }

    #[test]
    fn test_invalid_params() {
        assert!(KNeighborsClassifier::from_params(&params(json!({"n_neighbors": 0}))).is_err());
        assert!(KNeighborsClassifier::from_params(&params(json!({"metric": "cosine"}))).is_err());
    }
}
