//! Linear model implementations

use super::{
    accuracy_score, check_predict, check_supervised, class_codes, parse_hyperparameters, r2_score, Model,
    Scorer,
};
use crate::error::{PlanError, Result};
use crate::plan::Parameters;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Solve symmetric positive-definite system Ax = b using Cholesky decomposition
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 1e-12 {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // Forward substitution: L * y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let sum: f64 = (0..i).map(|j| l[[i, j]] * y[j]).sum();
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // Backward substitution: L^T * x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).map(|j| l[[j, i]] * x[j]).sum();
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    Some(x)
}

/// Gauss-Jordan elimination with partial pivoting (fallback)
fn gauss_jordan_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut aug = Array2::<f64>::zeros((n, n + 1));
    for i in 0..n {
        for j in 0..n {
            aug[[i, j]] = a[[i, j]];
        }
        aug[[i, n]] = b[i];
    }

    for col in 0..n {
        let pivot_row = (col..n).max_by(|&r1, &r2| aug[[r1, col]].abs().total_cmp(&aug[[r2, col]].abs()))?;
        if aug[[pivot_row, col]].abs() < 1e-10 {
            return None;
        }
        if pivot_row != col {
            for j in 0..=n {
                aug.swap([col, j], [pivot_row, j]);
            }
        }
        let pivot = aug[[col, col]];
        for j in 0..=n {
            aug[[col, j]] /= pivot;
        }
        for row in 0..n {
            if row != col {
                let factor = aug[[row, col]];
                for j in 0..=n {
                    aug[[row, j]] -= factor * aug[[col, j]];
                }
            }
        }
    }

    Some(aug.column(n).to_owned())
}

/// Solve `(X^T X + alpha I) w = X^T y`.
///
/// A singular Gram matrix (collinear columns, e.g. a full one-hot block) gets a
/// tiny diagonal jitter before falling back to Gauss-Jordan.
fn solve_normal_equations(model: &str, x: &Array2<f64>, y: &Array1<f64>, alpha: f64) -> Result<Array1<f64>> {
    let mut xtx = x.t().dot(x);
    let xty = x.t().dot(y);
    let n = xtx.nrows();
    for i in 0..n {
        xtx[[i, i]] += alpha;
    }

    if let Some(w) = cholesky_solve(&xtx, &xty) {
        return Ok(w);
    }

    let jitter = 1e-8 * (xtx.diag().iter().map(|v| v.abs()).sum::<f64>() / n as f64).max(1.0);
    let mut regularized = xtx.clone();
    for i in 0..n {
        regularized[[i, i]] += jitter;
    }
    debug!(model, jitter, "Gram matrix not positive definite, retrying with jitter");

    cholesky_solve(&regularized, &xty)
        .or_else(|| gauss_jordan_solve(&regularized, &xty))
        .ok_or_else(|| PlanError::fit(model, "matrix is singular, cannot solve least squares"))
}

/// Column means and centered copies, or the raw data when no intercept is fitted
fn center(x: &Array2<f64>, y: &Array1<f64>, fit_intercept: bool) -> (Array2<f64>, Array1<f64>, Array1<f64>, f64) {
    if !fit_intercept {
        return (x.clone(), y.clone(), Array1::zeros(x.ncols()), 0.0);
    }
    let x_mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
    let y_mean = y.mean().unwrap_or(0.0);
    (x - &x_mean.view().insert_axis(Axis(0)), y - y_mean, x_mean, y_mean)
}

/// Fitted linear coefficients
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinearFit {
    coefficients: Array1<f64>,
    intercept: f64,
}

impl LinearFit {
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        check_predict(x, self.coefficients.len())?;
        Ok(x.dot(&self.coefficients) + self.intercept)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinearRegressionConfig {
    pub fit_intercept: bool,
    #[serde(rename = "copy_X")]
    pub copy_x: bool,
    pub n_jobs: Option<i64>,
}

impl Default for LinearRegressionConfig {
    fn default() -> Self {
        Self {
            fit_intercept: true,
            copy_x: true,
            n_jobs: None,
        }
    }
}

/// Ordinary least squares
#[derive(Debug, Clone, Default)]
pub struct LinearRegression {
    pub config: LinearRegressionConfig,
    fitted: Option<LinearFit>,
}

impl LinearRegression {
    pub fn new(config: LinearRegressionConfig) -> Self {
        Self { config, fitted: None }
    }

    pub fn from_params(params: &Parameters) -> Result<Self> {
        Ok(Self::new(parse_hyperparameters("LinearRegression", params)?))
    }

    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.fitted.as_ref().map(|f| &f.coefficients)
    }

    pub fn intercept(&self) -> Option<f64> {
        self.fitted.as_ref().map(|f| f.intercept)
    }
}

impl Model for LinearRegression {
    fn name(&self) -> &'static str {
        "LinearRegression"
    }

    fn fit(&mut self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<()> {
        let y = check_supervised(self.name(), x, y)?;
        let (xc, yc, x_mean, y_mean) = center(x, y, self.config.fit_intercept);
        let coefficients = solve_normal_equations(self.name(), &xc, &yc, 0.0)?;
        let intercept = y_mean - coefficients.dot(&x_mean);
        self.fitted = Some(LinearFit { coefficients, intercept });
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.fitted.as_ref().ok_or(PlanError::ModelNotFitted)?.predict(x)
    }

    fn scorer(&self) -> Option<&dyn Scorer> {
        Some(self)
    }
}

impl Scorer for LinearRegression {
    fn score(&self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<f64> {
        regression_score(self, x, y)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RidgeConfig {
    pub alpha: f64,
    pub fit_intercept: bool,
    #[serde(rename = "copy_X")]
    pub copy_x: bool,
    /// Only the closed-form solver is provided; other names are accepted
    pub solver: Option<String>,
    pub random_state: Option<u64>,
}

impl Default for RidgeConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            fit_intercept: true,
            copy_x: true,
            solver: None,
            random_state: None,
        }
    }
}

/// L2-regularized least squares
#[derive(Debug, Clone, Default)]
pub struct Ridge {
    pub config: RidgeConfig,
    fitted: Option<LinearFit>,
}

impl Ridge {
    pub fn new(config: RidgeConfig) -> Self {
        Self { config, fitted: None }
    }

    pub fn from_params(params: &Parameters) -> Result<Self> {
        let config: RidgeConfig = parse_hyperparameters("Ridge", params)?;
        if !(config.alpha >= 0.0) {
            return Err(PlanError::Construction {
                model: "Ridge".to_string(),
                reason: format!("alpha must be non-negative, got {}", config.alpha),
            });
        }
        Ok(Self::new(config))
    }
}

impl Model for Ridge {
    fn name(&self) -> &'static str {
        "Ridge"
    }

    fn fit(&mut self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<()> {
        let y = check_supervised(self.name(), x, y)?;
        let (xc, yc, x_mean, y_mean) = center(x, y, self.config.fit_intercept);
        let coefficients = solve_normal_equations(self.name(), &xc, &yc, self.config.alpha)?;
        let intercept = y_mean - coefficients.dot(&x_mean);
        self.fitted = Some(LinearFit { coefficients, intercept });
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.fitted.as_ref().ok_or(PlanError::ModelNotFitted)?.predict(x)
    }

    fn scorer(&self) -> Option<&dyn Scorer> {
        Some(self)
    }
}

impl Scorer for Ridge {
    fn score(&self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<f64> {
        regression_score(self, x, y)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LassoConfig {
    pub alpha: f64,
    pub fit_intercept: bool,
    pub max_iter: usize,
    pub tol: f64,
    #[serde(rename = "copy_X")]
    pub copy_x: bool,
    pub random_state: Option<u64>,
    /// Coordinates are always visited cyclically
    pub selection: Option<String>,
}

impl Default for LassoConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            fit_intercept: true,
            max_iter: 1000,
            tol: 1e-4,
            copy_x: true,
            random_state: None,
            selection: None,
        }
    }
}

/// L1-regularized least squares, fitted by coordinate descent on
/// `(1 / 2n) ||y - Xw||^2 + alpha ||w||_1`
#[derive(Debug, Clone, Default)]
pub struct Lasso {
    pub config: LassoConfig,
    fitted: Option<LinearFit>,
    n_iter: usize,
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

impl Lasso {
    pub fn new(config: LassoConfig) -> Self {
        Self {
            config,
            fitted: None,
            n_iter: 0,
        }
    }

    pub fn from_params(params: &Parameters) -> Result<Self> {
        let config: LassoConfig = parse_hyperparameters("Lasso", params)?;
        if !(config.alpha >= 0.0) {
            return Err(PlanError::Construction {
                model: "Lasso".to_string(),
                reason: format!("alpha must be non-negative, got {}", config.alpha),
            });
        }
        if config.max_iter == 0 {
            return Err(PlanError::Construction {
                model: "Lasso".to_string(),
                reason: "max_iter must be at least 1".to_string(),
            });
        }
        Ok(Self::new(config))
    }

    /// Coordinate descent passes used by the last fit
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.fitted.as_ref().map(|f| &f.coefficients)
    }
}

impl Model for Lasso {
    fn name(&self) -> &'static str {
        "Lasso"
    }

    fn fit(&mut self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<()> {
        let y = check_supervised(self.name(), x, y)?;
        let (xc, yc, x_mean, y_mean) = center(x, y, self.config.fit_intercept);
        let (n, d) = xc.dim();
        let threshold = self.config.alpha * n as f64;
        let col_norms: Vec<f64> = (0..d).map(|j| xc.column(j).dot(&xc.column(j))).collect();

        let mut w = Array1::<f64>::zeros(d);
        let mut residual = yc.clone();
        let mut n_iter = self.config.max_iter;

        for iter in 0..self.config.max_iter {
            let mut max_change = 0.0f64;
            let mut max_w = 0.0f64;
            for j in 0..d {
                if col_norms[j] == 0.0 {
                    continue;
                }
                let col = xc.column(j);
                let w_old = w[j];
                let rho = col.dot(&residual) + col_norms[j] * w_old;
                let w_new = soft_threshold(rho, threshold) / col_norms[j];
                if w_new != w_old {
                    residual.scaled_add(w_old - w_new, &col);
                    w[j] = w_new;
                }
                max_change = max_change.max((w_new - w_old).abs());
                max_w = max_w.max(w_new.abs());
            }
            if max_w == 0.0 || max_change / max_w < self.config.tol {
                n_iter = iter + 1;
                break;
            }
        }

        debug!(n_iter, alpha = self.config.alpha, "Lasso coordinate descent finished");
        let intercept = y_mean - w.dot(&x_mean);
        self.n_iter = n_iter;
        self.fitted = Some(LinearFit {
            coefficients: w,
            intercept,
        });
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.fitted.as_ref().ok_or(PlanError::ModelNotFitted)?.predict(x)
    }

    fn scorer(&self) -> Option<&dyn Scorer> {
        Some(self)
    }
}

impl Scorer for Lasso {
    fn score(&self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<f64> {
        regression_score(self, x, y)
    }
}

pub(crate) fn regression_score(model: &dyn Model, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<f64> {
    let y = y.ok_or_else(|| PlanError::ScoreUnavailable("R^2 needs a target".to_string()))?;
    let y_pred = model.predict(x)?;
    r2_score(y, &y_pred)
}

pub(crate) fn classification_score(model: &dyn Model, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<f64> {
    let y = y.ok_or_else(|| PlanError::ScoreUnavailable("accuracy needs a target".to_string()))?;
    let y_pred = model.predict(x)?;
    accuracy_score(y, &y_pred)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogisticRegressionConfig {
    #[serde(rename = "C")]
    pub c: f64,
    /// `"l2"`, `"none"` or null
    pub penalty: Option<String>,
    pub fit_intercept: bool,
    pub max_iter: usize,
    pub tol: f64,
    pub random_state: Option<u64>,
    pub solver: Option<String>,
    pub multi_class: Option<String>,
    pub n_jobs: Option<i64>,
}

impl Default for LogisticRegressionConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            penalty: Some("l2".to_string()),
            fit_intercept: true,
            max_iter: 100,
            tol: 1e-4,
            random_state: None,
            solver: None,
            multi_class: None,
            n_jobs: None,
        }
    }
}

/// Multinomial logistic regression with an L2 penalty, fitted by accelerated
/// gradient descent on standardized features
#[derive(Debug, Clone, Default)]
pub struct LogisticRegression {
    pub config: LogisticRegressionConfig,
    classes: Vec<f64>,
    /// (n_features, n_classes), in the original feature scale
    weights: Option<Array2<f64>>,
    intercepts: Option<Array1<f64>>,
}

fn softmax_rows(scores: &mut Array2<f64>) {
    for mut row in scores.rows_mut() {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
}

impl LogisticRegression {
    pub fn new(config: LogisticRegressionConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn from_params(params: &Parameters) -> Result<Self> {
        let config: LogisticRegressionConfig = parse_hyperparameters("LogisticRegression", params)?;
        let construction = |reason: String| PlanError::Construction {
            model: "LogisticRegression".to_string(),
            reason,
        };
        match config.penalty.as_deref() {
            None | Some("l2") | Some("none") => {}
            Some(other) => return Err(construction(format!("unsupported penalty '{}'", other))),
        }
        if !(config.c > 0.0) {
            return Err(construction(format!("C must be positive, got {}", config.c)));
        }
        Ok(Self::new(config))
    }

    pub fn classes(&self) -> &[f64] {
        &self.classes
    }

    /// Class membership probabilities, one column per class
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let weights = self.weights.as_ref().ok_or(PlanError::ModelNotFitted)?;
        let intercepts = self.intercepts.as_ref().ok_or(PlanError::ModelNotFitted)?;
        check_predict(x, weights.nrows())?;
        let mut scores = x.dot(weights) + &intercepts.view().insert_axis(Axis(0));
        softmax_rows(&mut scores);
        Ok(scores)
    }
}

impl Model for LogisticRegression {
    fn name(&self) -> &'static str {
        "LogisticRegression"
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
        let (n, d) = x.dim();
        let k = classes.len();

        // Standardize for a well-conditioned descent
        let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
        let std = x.std_axis(Axis(0), 0.0).mapv(|s| if s > 0.0 { s } else { 1.0 });
        let xs = (x - &mean.view().insert_axis(Axis(0))) / &std.view().insert_axis(Axis(0));

        let mut onehot = Array2::<f64>::zeros((n, k));
        for (i, label) in y.iter().enumerate() {
            let class = classes.partition_point(|c| c < label);
            onehot[[i, class]] = 1.0;
        }

        // objective C * sum(loss) + ||w||^2 / 2, divided by C * n
        let lambda = match self.config.penalty.as_deref() {
            Some("l2") => 1.0 / (self.config.c * n as f64),
            _ => 0.0,
        };
        let lr = 1.0 / (0.5 * (d as f64 + 1.0) + lambda);

        let mut w = Array2::<f64>::zeros((d, k));
        let mut b = Array1::<f64>::zeros(k);
        let (mut w_prev, mut b_prev) = (w.clone(), b.clone());
        let mut n_iter = self.config.max_iter;

        for iter in 0..self.config.max_iter {
            let momentum = iter as f64 / (iter as f64 + 3.0);
            let w_look = &w + &((&w - &w_prev) * momentum);
            let b_look = &b + &((&b - &b_prev) * momentum);

            let mut probs = xs.dot(&w_look) + &b_look.view().insert_axis(Axis(0));
            softmax_rows(&mut probs);
            let diff = (probs - &onehot) / n as f64;
            let grad_w = xs.t().dot(&diff) + &w_look * lambda;
            let grad_b = diff.sum_axis(Axis(0));

            w_prev = w;
            b_prev = b;
            w = &w_look - &(&grad_w * lr);
            b = if self.config.fit_intercept {
                &b_look - &(&grad_b * lr)
            } else {
                b_look
            };

            let grad_norm = grad_w.iter().chain(grad_b.iter()).fold(0.0f64, |m, g| m.max(g.abs()));
            if grad_norm < self.config.tol {
                n_iter = iter + 1;
                break;
            }
        }
        debug!(n_iter, classes = k, "LogisticRegression converged");

        // Fold the standardization back into the coefficients
        let weights = &w / &std.view().insert_axis(Axis(1));
        let intercepts = &b - &mean.dot(&weights);
        self.classes = classes;
        self.weights = Some(weights);
        self.intercepts = Some(intercepts);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let probs = self.predict_proba(x)?;
        Ok(probs
            .rows()
            .into_iter()
            .map(|row| {
                let best = row
                    .iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |acc, (i, &p)| if p > acc.1 { (i, p) } else { acc });
                self.classes[best.0]
            })
            .collect())
    }

    fn scorer(&self) -> Option<&dyn Scorer> {
        Some(self)
    }
}

impl Scorer for LogisticRegression {
    fn score(&self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<f64> {
        classification_score(self, x, y)
    }
}
