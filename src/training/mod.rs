//! Model training module
//!
//! Provides the model catalogue used by analysis plans:
//! - Linear models (OLS, Ridge, Lasso, Logistic Regression)
//! - Decision trees, Random Forests and Gradient Boosting
//! - Support Vector Machines (SVC, SVR)
//! - K-Nearest Neighbors
//! - Clustering (KMeans, DBSCAN, Agglomerative)
//!
//! plus the registries, the train/test split and the training executor.

pub mod clustering;
pub mod decision_tree;
pub mod gradient_boosting;
pub mod knn;
pub mod linear_models;
pub mod random_forest;
pub mod svm;

mod executor;
mod registry;
mod split;

pub use clustering::{AgglomerativeClustering, AgglomerativeConfig, DBSCANConfig, KMeans, KMeansConfig, Linkage, DBSCAN};
pub use decision_tree::{Criterion, DecisionTree};
pub use executor::{CandidateError, CandidateOutcome, CandidateScore, TrainingData, TrainingExecutor};
pub use gradient_boosting::{GradientBoostingClassifier, GradientBoostingConfig, GradientBoostingRegressor};
pub use knn::{DistanceMetric, KNeighborsClassifier, KNeighborsConfig, WeightScheme};
pub use linear_models::{Lasso, LinearRegression, LogisticRegression, Ridge};
pub use random_forest::{MaxFeatures, RandomForestClassifier, RandomForestConfig, RandomForestRegressor};
pub use registry::{ClassifierKind, ClustererKind, ModelConstructor, ModelRegistry, RegressorKind};
pub use split::{feature_matrix, target_vector, FrameSplit, TargetVector, TrainTestSplit};
pub use svm::{Gamma, KernelType, SVCConfig, SVRConfig, SVC, SVR};

use crate::error::{PlanError, Result};
use crate::plan::Parameters;
use ndarray::{Array1, Array2};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A trainable model
pub trait Model: Send + Sync {
    /// Catalogue name of the model
    fn name(&self) -> &'static str;

    /// Fit the model. Supervised models require `y`; clusterers ignore it.
    fn fit(&mut self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<()>;

    /// Predict targets, class codes or cluster labels
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Scoring capability, if the model has one
    fn scorer(&self) -> Option<&dyn Scorer> {
        None
    }
}

/// Evaluation of a fitted model.
///
/// Supervised scorers compare predictions with `y`; clustering scorers
/// evaluate the fit on `x` alone.
pub trait Scorer {
    fn score(&self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<f64>;
}

/// Coefficient of determination. A constant target scores 1.0 for a perfect
/// prediction and 0.0 otherwise.
pub fn r2_score(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<f64> {
    check_score_input(y_true, y_pred)?;
    let y_mean = y_true.mean().unwrap_or(0.0);
    let ss_res = (y_true - y_pred).mapv(|v| v * v).sum();
    let ss_tot = y_true.mapv(|v| (v - y_mean) * (v - y_mean)).sum();

    if ss_tot == 0.0 {
        return Ok(if ss_res == 0.0 { 1.0 } else { 0.0 });
    }
    Ok(1.0 - ss_res / ss_tot)
}

/// Fraction of exactly matching class codes
pub fn accuracy_score(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<f64> {
    check_score_input(y_true, y_pred)?;
    let correct = y_true.iter().zip(y_pred.iter()).filter(|(t, p)| t == p).count();
    Ok(correct as f64 / y_true.len() as f64)
}

fn check_score_input(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<()> {
    if y_true.is_empty() {
        return Err(PlanError::ScoreUnavailable("no samples to score".to_string()));
    }
    if y_true.len() != y_pred.len() {
        return Err(PlanError::ShapeError {
            expected: format!("{} predictions", y_true.len()),
            actual: format!("{} predictions", y_pred.len()),
        });
    }
    Ok(())
}

/// Deserialize a hyperparameter object into a model configuration
pub(crate) fn parse_hyperparameters<T: DeserializeOwned>(model: &str, params: &Parameters) -> Result<T> {
    serde_json::from_value(Value::Object(params.clone())).map_err(|e| PlanError::Construction {
        model: model.to_string(),
        reason: e.to_string(),
    })
}

/// Validate a training matrix: non-empty and finite
pub(crate) fn check_features(model: &str, x: &Array2<f64>) -> Result<()> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(PlanError::fit(
            model,
            format!("empty training matrix ({} x {})", x.nrows(), x.ncols()),
        ));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(PlanError::fit(model, "input contains NaN or infinity"));
    }
    Ok(())
}

/// Validate supervised training input and return the target
pub(crate) fn check_supervised<'a>(
    model: &str,
    x: &Array2<f64>,
    y: Option<&'a Array1<f64>>,
) -> Result<&'a Array1<f64>> {
    let y = y.ok_or_else(|| PlanError::fit(model, "supervised model requires a target"))?;
    check_features(model, x)?;
    if x.nrows() != y.len() {
        return Err(PlanError::ShapeError {
            expected: format!("y length = {}", x.nrows()),
            actual: format!("y length = {}", y.len()),
        });
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(PlanError::fit(model, "target contains NaN or infinity"));
    }
    Ok(y)
}

/// Validate a prediction matrix against the fitted width
pub(crate) fn check_predict(x: &Array2<f64>, n_features: usize) -> Result<()> {
    if x.ncols() != n_features {
        return Err(PlanError::ShapeError {
            expected: format!("{} features", n_features),
            actual: format!("{} features", x.ncols()),
        });
    }
    Ok(())
}

/// Distinct class codes of a label-encoded target, sorted
pub(crate) fn class_codes(y: &Array1<f64>) -> Vec<f64> {
    let mut classes: Vec<f64> = y.to_vec();
    classes.sort_by(|a, b| a.total_cmp(b));
    classes.dedup();
    classes
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_r2_score() {
        let y_true = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let y_pred = array![1.1, 2.0, 2.9, 4.1, 5.0];
        assert!(r2_score(&y_true, &y_pred).unwrap() > 0.9);
        assert_eq!(r2_score(&y_true, &y_true).unwrap(), 1.0);
    }

    #[test]
    fn test_r2_constant_target() {
        let y = array![2.0, 2.0];
        assert_eq!(r2_score(&y, &array![2.0, 2.0]).unwrap(), 1.0);
        assert_eq!(r2_score(&y, &array![1.0, 2.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_accuracy_score() {
        let y_true = array![1.0, 0.0, 2.0, 1.0];
        let y_pred = array![1.0, 0.0, 1.0, 1.0];
        assert_eq!(accuracy_score(&y_true, &y_pred).unwrap(), 0.75);
    }

    #[test]
    fn test_empty_score_unavailable() {
        let empty = Array1::<f64>::zeros(0);
        assert!(matches!(
            accuracy_score(&empty, &empty),
            Err(PlanError::ScoreUnavailable(_))
        ));
    }

    #[test]
    fn test_check_features_rejects_nan() {
        let x = array![[1.0, f64::NAN]];
        assert!(matches!(check_features("Ridge", &x), Err(PlanError::Fit { .. })));
    }

    #[test]
    fn test_parse_hyperparameters_error_kind() {
        #[derive(serde::Deserialize)]
        #[serde(deny_unknown_fields)]
        #[allow(dead_code)]
        struct Config {
            alpha: f64,
        }
        let mut params = Parameters::new();
        params.insert("alpha".to_string(), Value::from("big"));
        let err = parse_hyperparameters::<Config>("Ridge", &params).err().unwrap();
        assert!(matches!(err, PlanError::Construction { .. }));
    }
}
