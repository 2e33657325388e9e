//! Transformer registry

use super::{
    label_encoder, min_max_scaler, one_hot_encoder, ordinal_encoder, robust_scaler, simple_imputer,
    standard_scaler, TransformerKind,
};
use crate::error::{PlanError, Result};
use crate::plan::{Parameters, TransformationStep};
use polars::prelude::*;
use std::collections::HashMap;

/// A column-level transform: frame, target columns and options in, new frame out
pub type TransformFn = fn(&DataFrame, &[String], &Parameters) -> Result<DataFrame>;

/// Immutable mapping from transformer kind to its transform
#[derive(Clone)]
pub struct TransformerRegistry {
    table: HashMap<TransformerKind, TransformFn>,
}

impl TransformerRegistry {
    /// Registry holding every catalogued transformer
    pub fn builtin() -> Self {
        let table: HashMap<TransformerKind, TransformFn> = HashMap::from([
            (TransformerKind::SimpleImputer, simple_imputer as TransformFn),
            (TransformerKind::StandardScaler, standard_scaler as TransformFn),
            (TransformerKind::MinMaxScaler, min_max_scaler as TransformFn),
            (TransformerKind::RobustScaler, robust_scaler as TransformFn),
            (TransformerKind::OneHotEncoder, one_hot_encoder as TransformFn),
            (TransformerKind::OrdinalEncoder, ordinal_encoder as TransformFn),
            (TransformerKind::LabelEncoder, label_encoder as TransformFn),
        ]);
        Self { table }
    }

    /// Registry without any transformers
    pub fn empty() -> Self {
        Self { table: HashMap::new() }
    }

    /// Builder method to register or replace a transform
    pub fn with_transform(mut self, kind: TransformerKind, transform: TransformFn) -> Self {
        self.table.insert(kind, transform);
        self
    }

    /// Look up the transform for a transformer name
    pub fn resolve(&self, name: &str) -> Result<TransformFn> {
        let kind: TransformerKind = name.parse()?;
        self.table
            .get(&kind)
            .copied()
            .ok_or_else(|| PlanError::UnknownTransformer(name.to_string()))
    }

    /// Resolve and run one step
    pub fn apply(&self, step: &TransformationStep, df: &DataFrame) -> Result<DataFrame> {
        if step.columns.is_empty() {
            return Err(PlanError::invalid("columns", "[]", "a step must name at least one column"));
        }
        let transform = self.resolve(&step.transformer)?;
        transform(df, &step.columns, &step.parameters)
    }

    pub fn contains(&self, kind: TransformerKind) -> bool {
        self.table.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.table.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("TransformerRegistry").field("kinds", &kinds).finish()
    }
}
