//! Error types for plan execution

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for autoplan operations
pub type Result<T> = std::result::Result<T, PlanError>;

/// Main error type for plan execution
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Unknown transformer: {0}")]
    UnknownTransformer(String),

    #[error("Unknown {task} model: {name}")]
    UnknownModel { task: String, name: String },

    #[error("Unknown imputation strategy: {0}")]
    UnknownStrategy(String),

    #[error("Missing parameter '{parameter}' for {transformer}")]
    MissingParameter { transformer: String, parameter: String },

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Column not found: {0}")]
    UnknownColumn(String),

    #[error("Score unavailable: {0}")]
    ScoreUnavailable(String),

    #[error("Failed to construct {model}: {reason}")]
    Construction { model: String, reason: String },

    #[error("Failed to fit {model}: {reason}")]
    Fit { model: String, reason: String },

    #[error("Plan parse error: {0}")]
    PlanParse(String),

    #[error("Dataset is empty: {0}")]
    EmptyDataset(String),

    #[error("Supervised task requires a target column")]
    MissingTarget,

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Model not fitted")]
    ModelNotFitted,
}

/// Stable, serializable name of an error variant, used in execution reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownTransformer,
    UnknownModel,
    UnknownStrategy,
    MissingParameter,
    InvalidParameter,
    UnknownColumn,
    ScoreUnavailable,
    Construction,
    Fit,
    PlanParse,
    EmptyDataset,
    MissingTarget,
    Data,
    Config,
    Io,
    Shape,
    NotFitted,
}

impl PlanError {
    /// Classify the error for reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlanError::UnknownTransformer(_) => ErrorKind::UnknownTransformer,
            PlanError::UnknownModel { .. } => ErrorKind::UnknownModel,
            PlanError::UnknownStrategy(_) => ErrorKind::UnknownStrategy,
            PlanError::MissingParameter { .. } => ErrorKind::MissingParameter,
            PlanError::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            PlanError::UnknownColumn(_) => ErrorKind::UnknownColumn,
            PlanError::ScoreUnavailable(_) => ErrorKind::ScoreUnavailable,
            PlanError::Construction { .. } => ErrorKind::Construction,
            PlanError::Fit { .. } => ErrorKind::Fit,
            PlanError::PlanParse(_) => ErrorKind::PlanParse,
            PlanError::EmptyDataset(_) => ErrorKind::EmptyDataset,
            PlanError::MissingTarget => ErrorKind::MissingTarget,
            PlanError::DataError(_) => ErrorKind::Data,
            PlanError::ConfigError(_) => ErrorKind::Config,
            PlanError::IoError(_) => ErrorKind::Io,
            PlanError::ShapeError { .. } => ErrorKind::Shape,
            PlanError::ModelNotFitted => ErrorKind::NotFitted,
        }
    }

    /// Whether this error aborts a whole run rather than a single step or candidate
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            PlanError::PlanParse(_)
                | PlanError::EmptyDataset(_)
                | PlanError::MissingTarget
                | PlanError::ConfigError(_)
                | PlanError::IoError(_)
        )
    }

    pub(crate) fn fit(model: &str, reason: impl fmt::Display) -> Self {
        PlanError::Fit {
            model: model.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid(name: &str, value: impl fmt::Display, reason: impl Into<String>) -> Self {
        PlanError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::UnknownTransformer => "unknown_transformer",
            ErrorKind::UnknownModel => "unknown_model",
            ErrorKind::UnknownStrategy => "unknown_strategy",
            ErrorKind::MissingParameter => "missing_parameter",
            ErrorKind::InvalidParameter => "invalid_parameter",
            ErrorKind::UnknownColumn => "unknown_column",
            ErrorKind::ScoreUnavailable => "score_unavailable",
            ErrorKind::Construction => "construction",
            ErrorKind::Fit => "fit",
            ErrorKind::PlanParse => "plan_parse",
            ErrorKind::EmptyDataset => "empty_dataset",
            ErrorKind::MissingTarget => "missing_target",
            ErrorKind::Data => "data",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
            ErrorKind::Shape => "shape",
            ErrorKind::NotFitted => "not_fitted",
        };
        f.write_str(name)
    }
}

impl From<polars::error::PolarsError> for PlanError {
    fn from(err: polars::error::PolarsError) -> Self {
        PlanError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for PlanError {
    fn from(err: serde_json::Error) -> Self {
        PlanError::PlanParse(err.to_string())
    }
}

impl From<serde_yaml::Error> for PlanError {
    fn from(err: serde_yaml::Error) -> Self {
        PlanError::ConfigError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for PlanError {
    fn from(err: ndarray::ShapeError) -> Self {
        PlanError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlanError::MissingParameter {
            transformer: "SimpleImputer".to_string(),
            parameter: "fill_value".to_string(),
        };
        assert_eq!(err.to_string(), "Missing parameter 'fill_value' for SimpleImputer");
    }

    #[test]
    fn test_error_kind() {
        let err = PlanError::UnknownTransformer("PCA".to_string());
        assert_eq!(err.kind(), ErrorKind::UnknownTransformer);
        assert_eq!(err.kind().to_string(), "unknown_transformer");
        assert!(!err.is_structural());
        assert!(PlanError::MissingTarget.is_structural());
    }

    #[test]
    fn test_error_kind_serialize() {
        let json = serde_json::to_string(&ErrorKind::MissingParameter).unwrap();
        assert_eq!(json, "\"missing_parameter\"");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PlanError = io_err.into();
        assert!(matches!(err, PlanError::IoError(_)));
    }
}
