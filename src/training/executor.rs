//! Training executor: construct, fit and score every candidate in order

use super::{Model, ModelRegistry};
use crate::error::{ErrorKind, PlanError};
use crate::plan::{ModelSpec, TaskKind};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Matrices handed to the executor
#[derive(Debug, Clone)]
pub enum TrainingData {
    Supervised {
        x_train: Array2<f64>,
        y_train: Array1<f64>,
        x_test: Array2<f64>,
        y_test: Array1<f64>,
    },
    Unsupervised {
        x: Array2<f64>,
    },
}

impl TrainingData {
    pub fn n_features(&self) -> usize {
        match self {
            TrainingData::Supervised { x_train, .. } => x_train.ncols(),
            TrainingData::Unsupervised { x } => x.ncols(),
        }
    }
}

/// Score of one candidate, or why it has none
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CandidateScore {
    Value(f64),
    Unavailable { unavailable: String },
}

impl CandidateScore {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        CandidateScore::Unavailable {
            unavailable: reason.into(),
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            CandidateScore::Value(v) => Some(*v),
            CandidateScore::Unavailable { .. } => None,
        }
    }
}

/// Error recorded against a candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&PlanError> for CandidateError {
    fn from(err: &PlanError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result of one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateOutcome {
    pub model_name: String,
    pub score: CandidateScore,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CandidateError>,
    /// Wall time spent in `fit`
    pub fit_seconds: f64,
}

impl CandidateOutcome {
    /// A candidate that failed before or during fitting
    pub fn failed(model_name: &str, err: &PlanError, fit_seconds: f64) -> Self {
        Self {
            model_name: model_name.to_string(),
            score: CandidateScore::unavailable(err.to_string()),
            error: Some(err.into()),
            fit_seconds,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs candidate lists against one registry
#[derive(Debug, Clone)]
pub struct TrainingExecutor {
    registry: Arc<ModelRegistry>,
}

impl TrainingExecutor {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    /// One outcome per spec, in input order. Failures stay on their candidate.
    pub fn run(&self, task: TaskKind, specs: &[ModelSpec], data: &TrainingData) -> Vec<CandidateOutcome> {
        specs.iter().map(|spec| self.run_one(task, spec, data)).collect()
    }

    fn run_one(&self, task: TaskKind, spec: &ModelSpec, data: &TrainingData) -> CandidateOutcome {
        let mut model = match self.registry.construct(task, spec) {
            Ok(model) => model,
            Err(e) => {
                warn!(model = %spec.model_name, error = %e, "Candidate construction failed");
                return CandidateOutcome::failed(&spec.model_name, &e, 0.0);
            }
        };

        let start = Instant::now();
        let fitted = match (task.is_supervised(), data) {
            (true, TrainingData::Supervised { x_train, y_train, .. }) => model.fit(x_train, Some(y_train)),
            (false, TrainingData::Unsupervised { x }) => model.fit(x, None),
            _ => Err(PlanError::fit(
                &spec.model_name,
                format!("{} task received mismatched training data", task),
            )),
        };
        let fit_seconds = start.elapsed().as_secs_f64();

        if let Err(e) = fitted {
            warn!(model = %spec.model_name, error = %e, "Candidate fit failed");
            return CandidateOutcome::failed(&spec.model_name, &e, fit_seconds);
        }

        let score = score_candidate(model.as_ref(), data);
        match &score {
            CandidateScore::Value(v) => {
                info!(model = %spec.model_name, score = v, fit_seconds, "Candidate trained");
            }
            CandidateScore::Unavailable { unavailable } => {
                info!(model = %spec.model_name, reason = %unavailable, fit_seconds, "Candidate trained without score");
            }
        }

        CandidateOutcome {
            model_name: spec.model_name.clone(),
            score,
            error: None,
            fit_seconds,
        }
    }
}

/// Supervised models score on the held-out rows, clusterers on their own input
fn score_candidate(model: &dyn Model, data: &TrainingData) -> CandidateScore {
    let Some(scorer) = model.scorer() else {
        return CandidateScore::unavailable(format!("{} has no scoring capability", model.name()));
    };
    let result = match data {
        TrainingData::Supervised { x_test, y_test, .. } => scorer.score(x_test, Some(y_test)),
        TrainingData::Unsupervised { x } => scorer.score(x, None),
    };
    match result {
        Ok(v) => CandidateScore::Value(v),
        Err(e) => CandidateScore::unavailable(e.to_string()),
    }
}
