//! Transformation pipeline applier

use super::TransformerRegistry;
use crate::config::ResidualMissing;
use crate::dataset::{missing_counts, total_missing, MissingCount};
use crate::error::{ErrorKind, Result};
use crate::plan::TransformationStep;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of a single step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Applied,
    Failed { kind: ErrorKind, message: String },
}

/// Report entry for one plan step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub index: usize,
    pub transformer: String,
    pub columns: Vec<String>,
    #[serde(flatten)]
    pub status: StepStatus,
}

impl StepReport {
    pub fn is_applied(&self) -> bool {
        matches!(self.status, StepStatus::Applied)
    }
}

/// Transformed frame plus what happened on the way
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub frame: DataFrame,
    pub steps: Vec<StepReport>,
    pub missing_before: Vec<MissingCount>,
    pub missing_after: Vec<MissingCount>,
}

/// Applies plan steps in order, isolating per-step failures
#[derive(Debug, Clone)]
pub struct PipelineApplier {
    registry: Arc<TransformerRegistry>,
    residual: ResidualMissing,
}

impl PipelineApplier {
    pub fn new(registry: Arc<TransformerRegistry>) -> Self {
        Self {
            registry,
            residual: ResidualMissing::default(),
        }
    }

    /// Builder method to set the residual missing policy
    pub fn with_residual_missing(mut self, policy: ResidualMissing) -> Self {
        self.residual = policy;
        self
    }

    /// Run every step, then the backfill pass.
    ///
    /// A failing step is recorded and skipped; the next step sees the frame
    /// as it was before the failure. Only the backfill pass can return an error.
    pub fn apply(&self, steps: &[TransformationStep], frame: &DataFrame) -> Result<PipelineOutcome> {
        let start = Instant::now();
        let missing_before = missing_counts(frame);
        info!(
            rows = frame.height(),
            columns = frame.width(),
            missing = total_missing(frame),
            steps = steps.len(),
            "Applying transformation pipeline"
        );
        for count in missing_before.iter().filter(|c| c.missing > 0) {
            debug!(column = %count.column, missing = count.missing, "Missing values before pipeline");
        }

        let mut current = frame.clone();
        let mut reports = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            let status = match self.registry.apply(step, &current) {
                Ok(next) => {
                    debug!(index, transformer = %step.transformer, columns = ?step.columns, "Step applied");
                    current = next;
                    StepStatus::Applied
                }
                Err(e) => {
                    warn!(index, transformer = %step.transformer, error = %e, "Step failed, skipping");
                    StepStatus::Failed {
                        kind: e.kind(),
                        message: e.to_string(),
                    }
                }
            };
            reports.push(StepReport {
                index,
                transformer: step.transformer.clone(),
                columns: step.columns.clone(),
                status,
            });
        }

        let frame = self.fill_remaining(current)?;
        let missing_after = missing_counts(&frame);
        let residual = total_missing(&frame);
        if residual > 0 {
            for count in missing_after.iter().filter(|c| c.missing > 0) {
                warn!(column = %count.column, missing = count.missing, "Missing values remain after backfill");
            }
        }

        info!(
            applied = reports.iter().filter(|r| r.is_applied()).count(),
            failed = reports.iter().filter(|r| !r.is_applied()).count(),
            residual_missing = residual,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Pipeline complete"
        );

        Ok(PipelineOutcome {
            frame,
            steps: reports,
            missing_before,
            missing_after,
        })
    }

    /// Backward-fill every column, then apply the residual policy
    fn fill_remaining(&self, frame: DataFrame) -> Result<DataFrame> {
        let columns = frame
            .get_columns()
            .iter()
            .map(|column| {
                let series = column.as_materialized_series();
                let mut filled = series.fill_null(FillNullStrategy::Backward(None))?;
                if self.residual == ResidualMissing::ForwardFill {
                    filled = filled.fill_null(FillNullStrategy::Forward(None))?;
                }
                Ok(filled.into_column())
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(DataFrame::new(columns)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn applier() -> PipelineApplier {
        PipelineApplier::new(Arc::new(TransformerRegistry::builtin()))
    }

    fn sample_df() -> DataFrame {
        df!(
            "a" => &[None, Some(2.0), None, Some(4.0)],
            "b" => &[Some("x"), None, Some("y"), None],
        )
        .unwrap()
    }

    #[test]
    fn test_empty_plan_backfills() {
        let out = applier().apply(&[], &sample_df()).unwrap();
        let a: Vec<Option<f64>> = out.frame.column("a").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(a, vec![Some(2.0), Some(2.0), Some(4.0), Some(4.0)]);
        // trailing gap in b has no later value
        assert_eq!(out.frame.column("b").unwrap().null_count(), 1);
        assert_eq!(out.missing_before[0].missing, 2);
        assert_eq!(out.missing_after[1].missing, 1);
        assert!(out.steps.is_empty());
    }

    #[test]
    fn test_forward_fill_residuals() {
        let out = applier()
            .with_residual_missing(ResidualMissing::ForwardFill)
            .apply(&[], &sample_df())
            .unwrap();
        assert_eq!(out.frame.column("b").unwrap().str().unwrap().get(3), Some("y"));
    }

    #[test]
    fn test_failed_step_is_isolated() {
        let steps = vec![
            TransformationStep::new("PCA", ["a"]),
            TransformationStep::new("SimpleImputer", ["a"]).with_param("strategy", "constant"),
            TransformationStep::new("SimpleImputer", ["a"])
                .with_param("strategy", "constant")
                .with_param("fill_value", 0),
        ];
        let out = applier().apply(&steps, &sample_df()).unwrap();
        assert_eq!(out.steps.len(), 3);
        assert!(matches!(
            out.steps[0].status,
            StepStatus::Failed { kind: ErrorKind::UnknownTransformer, .. }
        ));
        assert!(matches!(
            out.steps[1].status,
            StepStatus::Failed { kind: ErrorKind::MissingParameter, .. }
        ));
        assert!(out.steps[2].is_applied());
        assert_eq!(out.frame.column("a").unwrap().f64().unwrap().get(0), Some(0.0));
    }

    #[test]
    fn test_unknown_step_equals_skipping_it() {
        let valid = TransformationStep::new("MinMaxScaler", ["a"]);
        let with_unknown = vec![TransformationStep::new("Normalizer", ["a"]), valid.clone()];
        let without = vec![valid];
        let df = sample_df();
        let left = applier().apply(&with_unknown, &df).unwrap().frame;
        let right = applier().apply(&without, &df).unwrap().frame;
        assert!(left.equals_missing(&right));
    }

    #[test]
    fn test_step_report_serialization() {
        let report = StepReport {
            index: 0,
            transformer: "PCA".to_string(),
            columns: vec!["a".to_string()],
            status: StepStatus::Failed {
                kind: ErrorKind::UnknownTransformer,
                message: "Unknown transformer: PCA".to_string(),
            },
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "unknown_transformer");
    }
}
