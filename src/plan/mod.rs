//! Analysis plan model
//!
//! The plan is produced by an external planner as JSON and is read-only to the
//! engine. Transformer and model names are kept as plain strings so that a name
//! outside the catalogue fails only its own step or candidate.

mod task;

pub use task::TaskKind;

use crate::dataset::{ColumnType, SchemaDescriptor};
use crate::error::{PlanError, Result};
use crate::preprocessing::TransformerKind;
use crate::training::ModelRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Opaque option map attached to steps and model specs
pub type Parameters = serde_json::Map<String, Value>;

/// One column-level transformation step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationStep {
    /// Columns the transformer applies to, in order
    pub columns: Vec<String>,
    /// Transformer kind name, e.g. `SimpleImputer`
    pub transformer: String,
    /// Transformer options, e.g. `{"strategy": "median"}`
    #[serde(default)]
    pub parameters: Parameters,
}

impl TransformationStep {
    pub fn new<S: Into<String>>(transformer: &str, columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            transformer: transformer.to_string(),
            parameters: Parameters::new(),
        }
    }

    /// Builder method to add a parameter
    pub fn with_param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }
}

/// One candidate model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub model_name: String,
    #[serde(default)]
    pub hyperparameters: Parameters,
}

impl ModelSpec {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            hyperparameters: Parameters::new(),
        }
    }

    /// Builder method to add a hyperparameter
    pub fn with_param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.hyperparameters.insert(name.to_string(), value.into());
        self
    }
}

/// A complete analysis plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisPlan {
    /// Free text, informational only
    pub overview: String,
    pub transformations: Vec<TransformationStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_regression_models: Option<Vec<ModelSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_classification_models: Option<Vec<ModelSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_clustering_models: Option<Vec<ModelSpec>>,
}

/// Something a valid plan should not contain. The engine still executes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanWarning {
    /// Index of the offending step, if the warning is about a step
    pub step: Option<usize>,
    pub message: String,
}

impl AnalysisPlan {
    /// Parse a plan from its JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PlanError::PlanParse(e.to_string()))
    }

    /// Read and parse a plan file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Candidate models relevant to the task; empty when the planner suggested none
    pub fn candidates(&self, task: TaskKind) -> &[ModelSpec] {
        let list = match task {
            TaskKind::Regression => &self.suggested_regression_models,
            TaskKind::Classification => &self.suggested_classification_models,
            TaskKind::Clustering => &self.suggested_clustering_models,
        };
        list.as_deref().unwrap_or(&[])
    }

    /// Check planner-side policies against the plan.
    ///
    /// `schema` enables column checks; pass `None` to check the plan alone.
    pub fn validate(&self, task: TaskKind, schema: Option<&SchemaDescriptor>) -> Vec<PlanWarning> {
        let mut warnings = Vec::new();
        let target = schema.and_then(|s| s.target_column.as_deref());

        for (index, step) in self.transformations.iter().enumerate() {
            let mut warn = |message: String| {
                warnings.push(PlanWarning {
                    step: Some(index),
                    message,
                })
            };

            if step.columns.is_empty() {
                warn(format!("{} has no columns", step.transformer));
            }

            let kind = match step.transformer.parse::<TransformerKind>() {
                Ok(kind) => kind,
                Err(_) => {
                    warn(format!("unknown transformer '{}'", step.transformer));
                    continue;
                }
            };

            if kind == TransformerKind::LabelEncoder {
                let on_features: Vec<&String> = step
                    .columns
                    .iter()
                    .filter(|c| Some(c.as_str()) != target)
                    .collect();
                if !on_features.is_empty() {
                    warn(format!(
                        "LabelEncoder is reserved for the target variable but is applied to feature column(s) {:?}; use OrdinalEncoder",
                        on_features
                    ));
                }
            }

            if kind == TransformerKind::OneHotEncoder {
                let sparse = ["sparse_output", "sparse"]
                    .iter()
                    .any(|k| step.parameters.get(*k) == Some(&Value::Bool(true)));
                if sparse {
                    warn("OneHotEncoder requested sparse output; a dense result is produced".to_string());
                }
            }

            if let Some(schema) = schema {
                for column in &step.columns {
                    match schema.column_type(column) {
                        None => warn(format!("column '{}' is not in the dataset schema", column)),
                        Some(ty) if kind.is_scaler() && ty != ColumnType::Numeric => warn(format!(
                            "{} applied to non-numeric column '{}' ({})",
                            kind, column, ty
                        )),
                        Some(_) => {}
                    }
                }
            }
        }

        let registry = ModelRegistry::builtin();
        for spec in self.candidates(task) {
            if registry.resolve(task, &spec.model_name).is_err() {
                warnings.push(PlanWarning {
                    step: None,
                    message: format!("'{}' is not a {} model", spec.model_name, task),
                });
            }
        }

        if self.candidates(task).is_empty() {
            warnings.push(PlanWarning {
                step: None,
                message: format!("plan suggests no {} models", task),
            });
        }

        warnings
    }
}
