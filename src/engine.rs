//! Plan execution engine
//!
//! Ties the pieces together for one run: schema preparation, the
//! transformation pipeline, the train/test split and candidate training.

use crate::config::EngineConfig;
use crate::dataset::{DatasetInput, MissingCount};
use crate::error::{PlanError, Result};
use crate::plan::{AnalysisPlan, TaskKind};
use crate::preprocessing::{PipelineApplier, StepReport, StepStatus, TransformerRegistry};
use crate::training::{
    feature_matrix, CandidateOutcome, CandidateScore, ModelRegistry, TrainTestSplit, TrainingData, TrainingExecutor,
};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::Serialize;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Everything one run produced
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub task: TaskKind,
    pub target: Option<String>,
    /// Frame after the pipeline and the backfill pass
    #[serde(skip)]
    pub transformed: DataFrame,
    pub steps: Vec<StepReport>,
    pub missing_before: Vec<MissingCount>,
    pub missing_after: Vec<MissingCount>,
    pub candidates: Vec<CandidateOutcome>,
    pub elapsed_seconds: f64,
}

impl ExecutionReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn steps_applied(&self) -> usize {
        self.steps.iter().filter(|s| s.is_applied()).count()
    }

    pub fn residual_missing(&self) -> usize {
        self.missing_after.iter().map(|m| m.missing).sum()
    }

    /// Plain-text rendering
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Run {} ({})", self.run_id, self.task);
        let _ = writeln!(
            out,
            "Transformed frame: {} rows x {} columns",
            self.transformed.height(),
            self.transformed.width()
        );
        let _ = writeln!(out, "Steps: {}/{} applied", self.steps_applied(), self.steps.len());
        for step in &self.steps {
            let status = match &step.status {
                StepStatus::Applied => "applied".to_string(),
                StepStatus::Failed { kind, message } => {
                    format!("failed [{}] {}", kind, message)
                }
            };
            let _ = writeln!(
                out,
                "  #{} {} {:?}: {}",
                step.index, step.transformer, step.columns, status
            );
        }
        let _ = writeln!(out, "Residual missing cells: {}", self.residual_missing());
        let _ = writeln!(out, "Candidates:");
        for candidate in &self.candidates {
            let score = match &candidate.score {
                CandidateScore::Value(v) => format!("{:.4}", v),
                CandidateScore::Unavailable { unavailable } => format!("unavailable ({})", unavailable),
            };
            let _ = writeln!(
                out,
                "  {} score={} fit={:.3}s",
                candidate.model_name, score, candidate.fit_seconds
            );
        }
        out
    }
}

/// Executes analysis plans against datasets
#[derive(Debug, Clone)]
pub struct PlanEngine {
    transformers: Arc<TransformerRegistry>,
    executor: TrainingExecutor,
    config: EngineConfig,
}

impl PlanEngine {
    pub fn new(transformers: Arc<TransformerRegistry>, models: Arc<ModelRegistry>, config: EngineConfig) -> Self {
        Self {
            transformers,
            executor: TrainingExecutor::new(models),
            config,
        }
    }

    /// Engine over the built-in catalogues
    pub fn builtin(config: EngineConfig) -> Self {
        Self::new(
            Arc::new(TransformerRegistry::builtin()),
            Arc::new(ModelRegistry::builtin()),
            config,
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a plan end to end.
    ///
    /// Only structural problems return `Err`; step and candidate failures are
    /// recorded in the report.
    pub fn execute(&self, plan: &AnalysisPlan, input: DatasetInput, task: TaskKind) -> Result<ExecutionReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        self.config.validate()?;

        let DatasetInput { frame, schema } = input;
        if frame.height() == 0 || frame.width() == 0 {
            return Err(PlanError::EmptyDataset(format!(
                "{} rows x {} columns",
                frame.height(),
                frame.width()
            )));
        }

        let target = if task.is_supervised() {
            let target = schema.target_column.clone().ok_or(PlanError::MissingTarget)?;
            if frame.get_column_index(&target).is_none() {
                return Err(PlanError::UnknownColumn(target));
            }
            Some(target)
        } else {
            schema.target_column.clone()
        };

        info!(
            task = %task,
            rows = frame.height(),
            columns = frame.width(),
            steps = plan.transformations.len(),
            "Executing plan"
        );

        let prepared = schema.prepare(&frame)?;
        let outcome = PipelineApplier::new(Arc::clone(&self.transformers))
            .with_residual_missing(self.config.residual_missing)
            .apply(&plan.transformations, &prepared)?;

        let specs = plan.candidates(task);
        if specs.is_empty() {
            warn!(task = %task, "Plan suggests no models for this task");
        }

        let candidates = match self.training_data(&outcome.frame, task, target.as_deref()) {
            Ok(data) => {
                info!(candidates = specs.len(), features = data.n_features(), "Training candidates");
                self.executor.run(task, specs, &data)
            }
            Err(e) => {
                warn!(error = %e, "Could not build training matrices");
                specs
                    .iter()
                    .map(|spec| CandidateOutcome::failed(&spec.model_name, &e, 0.0))
                    .collect()
            }
        };

        let elapsed_seconds = start.elapsed().as_secs_f64();
        info!(
            candidates = candidates.len(),
            succeeded = candidates.iter().filter(|c| c.is_success()).count(),
            elapsed_seconds,
            "Plan executed"
        );

        Ok(ExecutionReport {
            run_id: Uuid::new_v4(),
            started_at,
            task,
            target,
            transformed: outcome.frame,
            steps: outcome.steps,
            missing_before: outcome.missing_before,
            missing_after: outcome.missing_after,
            candidates,
            elapsed_seconds,
        })
    }

    /// Split and convert (supervised) or convert everything but the target (clustering)
    fn training_data(&self, frame: &DataFrame, task: TaskKind, target: Option<&str>) -> Result<TrainingData> {
        match (task.is_supervised(), target) {
            (true, Some(target)) => TrainTestSplit::new(self.config.test_size, self.config.random_seed)
                .split(frame, target)?
                .training_data(task),
            (true, None) => Err(PlanError::MissingTarget),
            (false, Some(target)) if frame.get_column_index(target).is_some() => Ok(TrainingData::Unsupervised {
                x: feature_matrix(&frame.drop(target)?)?,
            }),
            (false, _) => Ok(TrainingData::Unsupervised {
                x: feature_matrix(frame)?,
            }),
        }
    }
}
