//! Column-level data transformations
//!
//! Provides the transformer catalogue used by analysis plans:
//! - Missing value imputation (SimpleImputer)
//! - Feature scaling (StandardScaler, MinMaxScaler, RobustScaler)
//! - Categorical encoding (OneHotEncoder, OrdinalEncoder, LabelEncoder)
//!
//! Every transform takes the frame, the step's columns and its parameters and
//! returns a new frame. Columns not named by the step are left untouched.

mod encoder;
mod imputer;
mod pipeline;
mod registry;
mod scaler;

pub use encoder::{label_encoder, one_hot_encoder, ordinal_encoder};
pub use imputer::{simple_imputer, ImputeStrategy};
pub use pipeline::{PipelineApplier, PipelineOutcome, StepReport, StepStatus};
pub use registry::{TransformFn, TransformerRegistry};
pub use scaler::{min_max_scaler, robust_scaler, standard_scaler};
pub(crate) use encoder::category_codes;

use crate::dataset::is_numeric_dtype;
use crate::error::{PlanError, Result};
use crate::plan::Parameters;
use polars::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Catalogued transformer kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransformerKind {
    SimpleImputer,
    StandardScaler,
    MinMaxScaler,
    RobustScaler,
    OneHotEncoder,
    OrdinalEncoder,
    LabelEncoder,
}

impl TransformerKind {
    pub const ALL: [TransformerKind; 7] = [
        TransformerKind::SimpleImputer,
        TransformerKind::StandardScaler,
        TransformerKind::MinMaxScaler,
        TransformerKind::RobustScaler,
        TransformerKind::OneHotEncoder,
        TransformerKind::OrdinalEncoder,
        TransformerKind::LabelEncoder,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransformerKind::SimpleImputer => "SimpleImputer",
            TransformerKind::StandardScaler => "StandardScaler",
            TransformerKind::MinMaxScaler => "MinMaxScaler",
            TransformerKind::RobustScaler => "RobustScaler",
            TransformerKind::OneHotEncoder => "OneHotEncoder",
            TransformerKind::OrdinalEncoder => "OrdinalEncoder",
            TransformerKind::LabelEncoder => "LabelEncoder",
        }
    }

    /// Scalers only accept numeric columns
    pub fn is_scaler(self) -> bool {
        matches!(
            self,
            TransformerKind::StandardScaler | TransformerKind::MinMaxScaler | TransformerKind::RobustScaler
        )
    }
}

impl FromStr for TransformerKind {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self> {
        TransformerKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| PlanError::UnknownTransformer(s.to_string()))
    }
}

impl fmt::Display for TransformerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deserialize a step's parameter object into the transformer's options
pub(crate) fn parse_params<T: DeserializeOwned>(kind: TransformerKind, params: &Parameters) -> Result<T> {
    let value = Value::Object(params.clone());
    serde_json::from_value(value.clone())
        .map_err(|e| PlanError::invalid(kind.as_str(), value, e.to_string()))
}

/// Fail with `UnknownColumn` for the first requested column the frame lacks
pub(crate) fn require_columns(df: &DataFrame, columns: &[String]) -> Result<()> {
    match columns.iter().find(|c| df.get_column_index(c).is_none()) {
        Some(missing) => Err(PlanError::UnknownColumn(missing.clone())),
        None => Ok(()),
    }
}

pub(crate) fn column_series<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Series> {
    df.column(name)
        .map(|c| c.as_materialized_series())
        .map_err(|_| PlanError::UnknownColumn(name.to_string()))
}

/// Values of a numeric column as f64
pub(crate) fn numeric_values(series: &Series, kind: TransformerKind) -> Result<Float64Chunked> {
    if !is_numeric_dtype(series.dtype()) {
        return Err(PlanError::DataError(format!(
            "{} requires a numeric column, '{}' has dtype {}",
            kind,
            series.name(),
            series.dtype()
        )));
    }
    let cast = series.cast(&DataType::Float64)?;
    Ok(cast.f64()?.clone())
}

/// Write replacement columns over a copy of the frame
pub(crate) fn replace_columns(df: &DataFrame, replacements: Vec<Series>) -> Result<DataFrame> {
    let mut result = df.clone();
    for series in replacements {
        result.with_column(series)?;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_str() {
        assert_eq!("MinMaxScaler".parse::<TransformerKind>().unwrap(), TransformerKind::MinMaxScaler);
        let err = "PCA".parse::<TransformerKind>().unwrap_err();
        assert!(matches!(err, PlanError::UnknownTransformer(name) if name == "PCA"));
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in TransformerKind::ALL {
            assert_eq!(kind.as_str().parse::<TransformerKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_require_columns() {
        let df = df!("a" => &[1.0, 2.0]).unwrap();
        assert!(require_columns(&df, &["a".to_string()]).is_ok());
        let err = require_columns(&df, &["a".to_string(), "b".to_string()]).unwrap_err();
        assert!(matches!(err, PlanError::UnknownColumn(c) if c == "b"));
    }

    #[test]
    fn test_numeric_values_rejects_text() {
        let s = Series::new("city".into(), &["Oslo", "Rome"]);
        assert!(numeric_values(&s, TransformerKind::StandardScaler).is_err());
    }
}
