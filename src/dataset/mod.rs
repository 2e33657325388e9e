//! Dataset descriptors and missing-value accounting
//!
//! The engine works on an in-memory `polars::DataFrame`. This module describes
//! its columns, counts missing values and prepares a frame for the pipeline.

mod loader;

pub use loader::{DataConfig, DataLoader, ReadParams, RunConfig, SchemaConfig, SourceType};

use crate::error::{PlanError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Primitive column type as seen by the planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    Text,
    Temporal,
    Categorical,
}

impl ColumnType {
    /// Map a polars dtype onto a column type
    pub fn from_dtype(dtype: &DataType) -> Self {
        if is_numeric_dtype(dtype) || matches!(dtype, DataType::Boolean) {
            ColumnType::Numeric
        } else if matches!(
            dtype,
            DataType::Date | DataType::Datetime(_, _) | DataType::Duration(_) | DataType::Time
        ) {
            ColumnType::Temporal
        } else if matches!(dtype, DataType::Categorical(_, _) | DataType::Enum(_, _)) {
            ColumnType::Categorical
        } else {
            ColumnType::Text
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Numeric => "numeric",
            ColumnType::Text => "text",
            ColumnType::Temporal => "temporal",
            ColumnType::Categorical => "categorical",
        };
        f.write_str(name)
    }
}

/// Check if dtype is a primitive numeric type
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Schema descriptor supplied alongside the raw frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    /// Declared column types; inferred from dtypes when empty
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnType>,
    #[serde(default)]
    pub target_column: Option<String>,
    /// Columns removed before the pipeline runs
    #[serde(default)]
    pub drop_columns: Vec<String>,
}

impl SchemaDescriptor {
    /// Infer a descriptor from the frame's dtypes
    pub fn infer(df: &DataFrame) -> Self {
        let columns = df
            .get_columns()
            .iter()
            .map(|c| (c.name().to_string(), ColumnType::from_dtype(c.dtype())))
            .collect();
        Self {
            columns,
            target_column: None,
            drop_columns: Vec::new(),
        }
    }

    /// Builder method to set the target column
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_column = Some(target.into());
        self
    }

    /// Builder method to exclude columns
    pub fn with_drop_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.drop_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to declare a column type
    pub fn with_column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.insert(name.into(), ty);
        self
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns.get(name).copied()
    }

    /// Fill undeclared columns from the frame's dtypes
    pub fn complete_from(&mut self, df: &DataFrame) {
        for column in df.get_columns() {
            self.columns
                .entry(column.name().to_string())
                .or_insert_with(|| ColumnType::from_dtype(column.dtype()));
        }
    }

    /// Apply the descriptor to a raw frame: drop excluded columns and cast
    /// declared categorical columns to strings so encoders see categories.
    pub fn prepare(&self, df: &DataFrame) -> Result<DataFrame> {
        let mut out = df.clone();

        for name in &self.drop_columns {
            if out.get_column_index(name).is_none() {
                return Err(PlanError::UnknownColumn(name.clone()));
            }
            out = out.drop(name)?;
        }

        for (name, ty) in &self.columns {
            if *ty != ColumnType::Categorical {
                continue;
            }
            let Ok(column) = out.column(name) else {
                continue;
            };
            if matches!(column.dtype(), DataType::String) {
                continue;
            }
            let cast = column.as_materialized_series().cast(&DataType::String)?;
            debug!(column = %name, "Casting declared categorical column to string");
            out.with_column(cast)?;
        }

        Ok(out)
    }
}

/// Raw frame plus its descriptor, as handed to the engine
#[derive(Debug, Clone)]
pub struct DatasetInput {
    pub frame: DataFrame,
    pub schema: SchemaDescriptor,
}

impl DatasetInput {
    /// Wrap a frame with an inferred descriptor
    pub fn new(frame: DataFrame) -> Self {
        let schema = SchemaDescriptor::infer(&frame);
        Self { frame, schema }
    }

    pub fn with_schema(frame: DataFrame, mut schema: SchemaDescriptor) -> Self {
        schema.complete_from(&frame);
        Self { frame, schema }
    }

    /// Builder method to set the target column
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.schema.target_column = Some(target.into());
        self
    }
}

/// Missing-value count for one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingCount {
    pub column: String,
    pub missing: usize,
}

/// Count missing values per column, in column order
pub fn missing_counts(df: &DataFrame) -> Vec<MissingCount> {
    df.get_columns()
        .iter()
        .map(|c| MissingCount {
            column: c.name().to_string(),
            missing: c.null_count(),
        })
        .collect()
}

/// Total missing cells across the frame
pub fn total_missing(df: &DataFrame) -> usize {
    df.get_columns().iter().map(|c| c.null_count()).sum()
}
