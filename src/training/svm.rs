//! Support Vector Machine implementations
//!
//! SVC is trained with SMO (Sequential Minimal Optimization), one-vs-rest
//! beyond two classes. SVR solves the epsilon-insensitive dual by coordinate
//! descent, with the bias folded into the kernel (`K + 1`).

use super::linear_models::{classification_score, regression_score};
use super::{check_predict, check_supervised, class_codes, parse_hyperparameters, Model, Scorer};
use crate::error::{PlanError, Result};
use crate::plan::Parameters;
use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Maximum number of samples for eager kernel matrix computation.
/// Beyond this, training fails instead of allocating the full matrix.
const MAX_KERNEL_MATRIX_SAMPLES: usize = 10_000;

/// Optimisation sweeps used when `max_iter` is -1
const UNBOUNDED_ITER_CAP: usize = 10_000;

/// Kernel function type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelType {
    /// K(x, y) = x · y
    Linear,
    /// K(x, y) = (γ x · y + r)^d
    Poly,
    /// K(x, y) = exp(-γ ||x - y||²)
    #[default]
    Rbf,
    /// K(x, y) = tanh(γ x · y + r)
    Sigmoid,
}

/// Kernel coefficient
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(try_from = "GammaRepr")]
pub enum Gamma {
    /// 1 / (n_features * X.var())
    #[default]
    Scale,
    /// 1 / n_features
    Auto,
    Value(f64),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GammaRepr {
    Value(f64),
    Name(String),
}

impl TryFrom<GammaRepr> for Gamma {
    type Error = String;

    fn try_from(repr: GammaRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            GammaRepr::Value(v) if v > 0.0 => Ok(Gamma::Value(v)),
            GammaRepr::Value(v) => Err(format!("gamma must be positive, got {}", v)),
            GammaRepr::Name(name) => match name.as_str() {
                "scale" => Ok(Gamma::Scale),
                "auto" => Ok(Gamma::Auto),
                other => Err(format!("unknown gamma '{}'", other)),
            },
        }
    }
}

impl Serialize for Gamma {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Gamma::Scale => serializer.serialize_str("scale"),
            Gamma::Auto => serializer.serialize_str("auto"),
            Gamma::Value(v) => serializer.serialize_f64(*v),
        }
    }
}

impl Gamma {
    /// Resolve against the training matrix
    pub fn resolve(self, x: &Array2<f64>) -> f64 {
        let n_features = x.ncols().max(1) as f64;
        match self {
            Gamma::Value(v) => v,
            Gamma::Auto => 1.0 / n_features,
            Gamma::Scale => {
                let n = x.len().max(1) as f64;
                let mean = x.sum() / n;
                let var = x.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
                if var > 0.0 {
                    1.0 / (n_features * var)
                } else {
                    1.0
                }
            }
        }
    }
}

/// A kernel with its coefficients fixed at fit time
#[derive(Debug, Clone, Copy)]
struct Kernel {
    kind: KernelType,
    gamma: f64,
    degree: i32,
    coef0: f64,
}

impl Kernel {
    fn eval(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self.kind {
            KernelType::Linear => a.dot(&b),
            KernelType::Poly => (self.gamma * a.dot(&b) + self.coef0).powi(self.degree),
            KernelType::Rbf => {
                let norm_sq: f64 = a.iter().zip(b.iter()).map(|(p, q)| (p - q) * (p - q)).sum();
                (-self.gamma * norm_sq).exp()
            }
            KernelType::Sigmoid => (self.gamma * a.dot(&b) + self.coef0).tanh(),
        }
    }

    /// Symmetric kernel matrix (parallel for larger inputs)
    fn matrix(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();
        let mut k = Array2::zeros((n, n));

        // For small matrices, sequential is faster due to overhead
        if n < 100 {
            for i in 0..n {
                for j in i..n {
                    let val = self.eval(x.row(i), x.row(j));
                    k[[i, j]] = val;
                    k[[j, i]] = val;
                }
            }
            return k;
        }

        let rows: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| (i..n).map(|j| self.eval(x.row(i), x.row(j))).collect())
            .collect();
        for (i, row) in rows.into_iter().enumerate() {
            for (offset, val) in row.into_iter().enumerate() {
                k[[i, i + offset]] = val;
                k[[i + offset, i]] = val;
            }
        }
        k
    }
}

fn iteration_cap(model: &str, max_iter: i64) -> Result<usize> {
    match max_iter {
        -1 => Ok(UNBOUNDED_ITER_CAP),
        n if n > 0 => Ok(n as usize),
        n => Err(PlanError::Construction {
            model: model.to_string(),
            reason: format!("max_iter must be positive or -1, got {}", n),
        }),
    }
}

fn check_kernel_size(model: &str, n: usize) -> Result<()> {
    if n > MAX_KERNEL_MATRIX_SAMPLES {
        return Err(PlanError::fit(
            model,
            format!(
                "{} samples exceed the kernel matrix limit of {}",
                n, MAX_KERNEL_MATRIX_SAMPLES
            ),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SVCConfig {
    #[serde(rename = "C")]
    pub c: f64,
    pub kernel: KernelType,
    pub gamma: Gamma,
    pub degree: u32,
    pub coef0: f64,
    pub tol: f64,
    /// -1 for no explicit limit
    pub max_iter: i64,
    pub random_state: Option<u64>,
    pub probability: bool,
    pub shrinking: bool,
}

impl Default for SVCConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            kernel: KernelType::Rbf,
            gamma: Gamma::Scale,
            degree: 3,
            coef0: 0.0,
            tol: 1e-3,
            max_iter: -1,
            random_state: None,
            probability: false,
            shrinking: true,
        }
    }
}

/// A binary machine: `f(x) = Σ αᵢ yᵢ K(svᵢ, x) + b`
#[derive(Debug, Clone)]
struct BinarySVM {
    support_vectors: Array2<f64>,
    /// αᵢ yᵢ per support vector
    coefficients: Array1<f64>,
    bias: f64,
}

impl BinarySVM {
    fn decision(&self, kernel: &Kernel, sample: ArrayView1<f64>) -> f64 {
        self.support_vectors
            .rows()
            .into_iter()
            .zip(self.coefficients.iter())
            .map(|(sv, c)| c * kernel.eval(sv, sample))
            .sum::<f64>()
            + self.bias
    }
}

/// Support Vector Classifier
#[derive(Debug, Clone)]
pub struct SVC {
    pub config: SVCConfig,
    kernel: Option<Kernel>,
    classes: Vec<f64>,
    /// One machine for binary problems, one per class otherwise
    machines: Vec<BinarySVM>,
    n_features: usize,
}

impl SVC {
    pub fn new(config: SVCConfig) -> Self {
        Self {
            config,
            kernel: None,
            classes: Vec::new(),
            machines: Vec::new(),
            n_features: 0,
        }
    }

    pub fn from_params(params: &Parameters) -> Result<Self> {
        let config: SVCConfig = parse_hyperparameters("SVC", params)?;
        if !(config.c > 0.0) {
            return Err(PlanError::Construction {
                model: "SVC".to_string(),
                reason: format!("C must be positive, got {}", config.c),
            });
        }
        iteration_cap("SVC", config.max_iter)?;
        Ok(Self::new(config))
    }

    pub fn n_support_vectors(&self) -> usize {
        self.machines.iter().map(|m| m.support_vectors.nrows()).sum()
    }

    /// SMO training on ±1 labels
    fn smo_train(
        &self,
        x: &Array2<f64>,
        kernel_matrix: &Array2<f64>,
        y: &Array1<f64>,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Result<BinarySVM> {
        let n = x.nrows();
        let c = self.config.c;
        let tol = self.config.tol;
        let max_iter = iteration_cap(self.name(), self.config.max_iter)?;

        let mut alphas = Array1::<f64>::zeros(n);
        let mut bias = 0.0;
        let decision = |alphas: &Array1<f64>, bias: f64, idx: usize| -> f64 {
            (0..n).map(|i| alphas[i] * y[i] * kernel_matrix[[i, idx]]).sum::<f64>() + bias
        };

        let mut passes = 0;
        let max_passes = 5;
        let mut total_iter = 0;

        while passes < max_passes && total_iter < max_iter && n > 1 {
            let mut num_changed = 0;

            for i in 0..n {
                let e_i = decision(&alphas, bias, i) - y[i];
                if !((y[i] * e_i < -tol && alphas[i] < c) || (y[i] * e_i > tol && alphas[i] > 0.0)) {
                    continue;
                }

                let j = loop {
                    let j = rng.gen_range(0..n);
                    if j != i {
                        break j;
                    }
                };
                let e_j = decision(&alphas, bias, j) - y[j];
                let alpha_i_old = alphas[i];
                let alpha_j_old = alphas[j];

                let (l, h) = if y[i] != y[j] {
                    ((alphas[j] - alphas[i]).max(0.0), (c + alphas[j] - alphas[i]).min(c))
                } else {
                    ((alphas[i] + alphas[j] - c).max(0.0), (alphas[i] + alphas[j]).min(c))
                };
                if (l - h).abs() < 1e-10 {
                    continue;
                }

                let eta = 2.0 * kernel_matrix[[i, j]] - kernel_matrix[[i, i]] - kernel_matrix[[j, j]];
                if eta >= 0.0 {
                    continue;
                }

                alphas[j] = (alphas[j] - y[j] * (e_i - e_j) / eta).clamp(l, h);
                if (alphas[j] - alpha_j_old).abs() < 1e-5 {
                    continue;
                }
                alphas[i] += y[i] * y[j] * (alpha_j_old - alphas[j]);

                let b1 = bias
                    - e_i
                    - y[i] * (alphas[i] - alpha_i_old) * kernel_matrix[[i, i]]
                    - y[j] * (alphas[j] - alpha_j_old) * kernel_matrix[[i, j]];
                let b2 = bias
                    - e_j
                    - y[i] * (alphas[i] - alpha_i_old) * kernel_matrix[[i, j]]
                    - y[j] * (alphas[j] - alpha_j_old) * kernel_matrix[[j, j]];

                bias = if alphas[i] > 0.0 && alphas[i] < c {
                    b1
                } else if alphas[j] > 0.0 && alphas[j] < c {
                    b2
                } else {
                    (b1 + b2) / 2.0
                };
                num_changed += 1;
            }

            total_iter += 1;
            if num_changed == 0 {
                passes += 1;
            } else {
                passes = 0;
            }
        }

        let support: Vec<usize> = (0..n).filter(|&i| alphas[i] > 1e-8).collect();
        let mut support_vectors = Array2::zeros((support.len(), x.ncols()));
        let mut coefficients = Array1::zeros(support.len());
        for (row, &idx) in support.iter().enumerate() {
            support_vectors.row_mut(row).assign(&x.row(idx));
            coefficients[row] = alphas[idx] * y[idx];
        }

        Ok(BinarySVM {
            support_vectors,
            coefficients,
            bias,
        })
    }

    /// Decision values, one column per machine
    pub fn decision_function(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let kernel = self.kernel.as_ref().ok_or(PlanError::ModelNotFitted)?;
        check_predict(x, self.n_features)?;
        let mut scores = Array2::zeros((x.nrows(), self.machines.len()));
        for (i, row) in x.rows().into_iter().enumerate() {
            for (k, machine) in self.machines.iter().enumerate() {
                scores[[i, k]] = machine.decision(kernel, row);
            }
        }
        Ok(scores)
    }
}

impl Model for SVC {
    fn name(&self) -> &'static str {
        "SVC"
    }

    fn fit(&mut self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<()> {
        let y = check_supervised(self.name(), x, y)?;
        check_kernel_size(self.name(), x.nrows())?;
        let classes = class_codes(y);
        if classes.len() < 2 {
            return Err(PlanError::fit(
                self.name(),
                format!("needs at least 2 classes, got {}", classes.len()),
            ));
        }

        let kernel = Kernel {
            kind: self.config.kernel,
            gamma: self.config.gamma.resolve(x),
            degree: self.config.degree.min(i32::MAX as u32) as i32,
            coef0: self.config.coef0,
        };
        let kernel_matrix = kernel.matrix(x);
        let mut rng = match self.config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };

        // Binary problems train the last class against the first
        let positives: Vec<f64> = if classes.len() == 2 {
            vec![classes[1]]
        } else {
            classes.clone()
        };
        let mut machines = Vec::with_capacity(positives.len());
        for positive in positives {
            let y_binary = y.mapv(|v| if v == positive { 1.0 } else { -1.0 });
            machines.push(self.smo_train(x, &kernel_matrix, &y_binary, &mut rng)?);
        }

        self.kernel = Some(kernel);
        self.classes = classes;
        self.machines = machines;
        self.n_features = x.ncols();
        debug!(
            machines = self.machines.len(),
            support_vectors = self.n_support_vectors(),
            "SVC fitted"
        );
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let scores = self.decision_function(x)?;
        Ok(scores
            .rows()
            .into_iter()
            .map(|row| {
                if self.classes.len() == 2 {
                    if row[0] >= 0.0 {
                        self.classes[1]
                    } else {
                        self.classes[0]
                    }
                } else {
                    let mut best = 0;
                    for (k, score) in row.iter().enumerate() {
                        if *score > row[best] {
                            best = k;
                        }
                    }
                    self.classes[best]
                }
            })
            .collect())
    }

    fn scorer(&self) -> Option<&dyn Scorer> {
        Some(self)
    }
}

impl Scorer for SVC {
    fn score(&self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<f64> {
        classification_score(self, x, y)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SVRConfig {
    #[serde(rename = "C")]
    pub c: f64,
    pub kernel: KernelType,
    pub gamma: Gamma,
    pub degree: u32,
    pub coef0: f64,
    /// Half-width of the insensitive tube
    pub epsilon: f64,
    pub tol: f64,
    pub max_iter: i64,
    pub shrinking: bool,
}

impl Default for SVRConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            kernel: KernelType::Rbf,
            gamma: Gamma::Scale,
            degree: 3,
            coef0: 0.0,
            epsilon: 0.1,
            tol: 1e-3,
            max_iter: -1,
            shrinking: true,
        }
    }
}

/// Epsilon-insensitive Support Vector Regressor
#[derive(Debug, Clone)]
pub struct SVR {
    pub config: SVRConfig,
    kernel: Option<Kernel>,
    support_vectors: Array2<f64>,
    /// αᵢ - αᵢ* per support vector
    coefficients: Array1<f64>,
    bias: f64,
    n_features: usize,
}

impl SVR {
    pub fn new(config: SVRConfig) -> Self {
        Self {
            config,
            kernel: None,
            support_vectors: Array2::zeros((0, 0)),
            coefficients: Array1::zeros(0),
            bias: 0.0,
            n_features: 0,
        }
    }

    pub fn from_params(params: &Parameters) -> Result<Self> {
        let config: SVRConfig = parse_hyperparameters("SVR", params)?;
        let invalid = |reason: String| PlanError::Construction {
            model: "SVR".to_string(),
            reason,
        };
        if !(config.c > 0.0) {
            return Err(invalid(format!("C must be positive, got {}", config.c)));
        }
        if config.epsilon < 0.0 {
            return Err(invalid(format!("epsilon must be non-negative, got {}", config.epsilon)));
        }
        iteration_cap("SVR", config.max_iter)?;
        Ok(Self::new(config))
    }

    pub fn n_support_vectors(&self) -> usize {
        self.support_vectors.nrows()
    }
}

impl Model for SVR {
    fn name(&self) -> &'static str {
        "SVR"
    }

    fn fit(&mut self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<()> {
        let y = check_supervised(self.name(), x, y)?;
        let n = x.nrows();
        check_kernel_size(self.name(), n)?;
        let max_iter = iteration_cap(self.name(), self.config.max_iter)?;
        let c = self.config.c;
        let epsilon = self.config.epsilon;

        let kernel = Kernel {
            kind: self.config.kernel,
            gamma: self.config.gamma.resolve(x),
            degree: self.config.degree.min(i32::MAX as u32) as i32,
            coef0: self.config.coef0,
        };
        // Q = K + 1 absorbs the bias
        let q = kernel.matrix(x) + 1.0;

        let mut beta = Array1::<f64>::zeros(n);
        let mut q_beta = Array1::<f64>::zeros(n);
        let mut sweeps = 0;

        while sweeps < max_iter {
            let mut max_change: f64 = 0.0;
            for i in 0..n {
                let q_ii = q[[i, i]];
                if q_ii <= 1e-12 {
                    continue;
                }
                let g = q_beta[i] - q_ii * beta[i] - y[i];
                let shrunk = g.signum() * (g.abs() - epsilon).max(0.0);
                let updated = (-shrunk / q_ii).clamp(-c, c);
                let delta = updated - beta[i];
                if delta != 0.0 {
                    q_beta.scaled_add(delta, &q.column(i));
                    beta[i] = updated;
                    max_change = max_change.max(delta.abs());
                }
            }
            sweeps += 1;
            if max_change < self.config.tol {
                break;
            }
        }

        let support: Vec<usize> = (0..n).filter(|&i| beta[i].abs() > 1e-8).collect();
        let mut support_vectors = Array2::zeros((support.len(), x.ncols()));
        let mut coefficients = Array1::zeros(support.len());
        for (row, &idx) in support.iter().enumerate() {
            support_vectors.row_mut(row).assign(&x.row(idx));
            coefficients[row] = beta[idx];
        }

        self.bias = beta.sum();
        self.kernel = Some(kernel);
        self.support_vectors = support_vectors;
        self.coefficients = coefficients;
        self.n_features = x.ncols();
        debug!(sweeps, support_vectors = support.len(), "SVR fitted");
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let kernel = self.kernel.as_ref().ok_or(PlanError::ModelNotFitted)?;
        check_predict(x, self.n_features)?;
        Ok(x.rows()
            .into_iter()
            .map(|row| {
                self.support_vectors
                    .rows()
                    .into_iter()
                    .zip(self.coefficients.iter())
                    .map(|(sv, b)| b * kernel.eval(sv, row))
                    .sum::<f64>()
                    + self.bias
            })
            .collect())
    }

    fn scorer(&self) -> Option<&dyn Scorer> {
        Some(self)
    }
}

impl Scorer for SVR {
    fn score(&self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<f64> {
        regression_score(self, x, y)
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

    fn two_blobs() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [0.0, 0.0],
            [0.5, 0.3],
            [0.2, 0.8],
            [0.9, 0.1],
            [5.0, 5.0],
            [5.5, 5.2],
            [4.8, 5.9],
            [5.9, 4.7]
        ];
        let y = array![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        (x, y)
    }

    #[test]
    fn test_svc_linear_binary() {
        let (x, y) = two_blobs();
        let mut model = SVC::from_params(&params(json!({"kernel": "linear", "random_state": 42}))).unwrap();
        model.fit(&x, Some(&y)).unwrap();
        assert_eq!(model.predict(&x).unwrap(), y);
        assert!(model.n_support_vectors() > 0);
    }

    #[test]
    fn test_svc_rbf_multiclass() {
        let x = array![[0.0], [0.3], [0.6], [10.0], [10.3], [10.6], [20.0], [20.3], [20.6]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0];
        let mut model = SVC::from_params(&params(json!({"C": 10.0, "gamma": 0.5, "random_state": 1}))).unwrap();
        model.fit(&x, Some(&y)).unwrap();
        assert_eq!(model.predict(&x).unwrap(), y);
        assert_eq!(model.decision_function(&x).unwrap().ncols(), 3);
    }

    #[test]
    fn test_svr_linear_fit() {
        let x = Array2::from_shape_fn((20, 1), |(i, _)| i as f64 / 10.0);
        let y = x.column(0).mapv(|v| 2.0 * v + 1.0);
        let mut model = SVR::from_params(&params(json!({"kernel": "linear", "C": 100.0, "epsilon": 0.01}))).unwrap();
        model.fit(&x, Some(&y)).unwrap();
        assert!(model.scorer().unwrap().score(&x, Some(&y)).unwrap() > 0.95);
    }

    #[test]
    fn test_gamma_parsing() {
        assert_eq!(serde_json::from_value::<Gamma>(json!("auto")).unwrap(), Gamma::Auto);
        assert_eq!(serde_json::from_value::<Gamma>(json!(0.25)).unwrap(), Gamma::Value(0.25));
        assert!(serde_json::from_value::<Gamma>(json!("wide")).is_err());
        assert!(serde_json::from_value::<Gamma>(json!(-1.0)).is_err());
    }

    #[test]
    fn test_gamma_scale_resolution() {
        let x = array![[0.0, 2.0], [2.0, 0.0]];
        // var = 1.0 over all cells
        assert!((Gamma::Scale.resolve(&x) - 0.5).abs() < 1e-12);
        assert!((Gamma::Auto.resolve(&x) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_bad_max_iter_rejected() {
        let err = SVR::from_params(&params(json!({"max_iter": 0}))).unwrap_err();
        assert!(matches!(err, PlanError::Construction { .. }));
        let err = SVC::from_params(&params(json!({"kernel": "cubic"}))).unwrap_err();
        assert!(matches!(err, PlanError::Construction { .. }));
    }

    #[test]
    fn test_predict_before_fit() {
        let model = SVR::new(SVRConfig::default());
        assert!(matches!(model.predict(&array![[1.0]]), Err(PlanError::ModelNotFitted)));
    }
}
