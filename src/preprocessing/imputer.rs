//! Missing value imputation

use super::{column_series, numeric_values, parse_params, replace_columns, require_columns, TransformerKind};
use crate::dataset::is_numeric_dtype;
use crate::error::{PlanError, Result};
use crate::plan::Parameters;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::str::FromStr;

/// Strategy for imputing missing values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImputeStrategy {
    /// Replace with mean (numeric only)
    Mean,
    /// Replace with median (numeric only)
    Median,
    /// Replace with the most frequent value, smallest on ties
    Mode,
    /// Replace with `fill_value`
    Constant,
    /// Propagate the last present value downwards
    ForwardFill,
    /// Propagate the next present value upwards
    BackwardFill,
}

impl FromStr for ImputeStrategy {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean" => Ok(ImputeStrategy::Mean),
            "median" => Ok(ImputeStrategy::Median),
            "mode" | "most_frequent" => Ok(ImputeStrategy::Mode),
            "constant" => Ok(ImputeStrategy::Constant),
            "forward_fill" | "ffill" => Ok(ImputeStrategy::ForwardFill),
            "backward_fill" | "bfill" => Ok(ImputeStrategy::BackwardFill),
            other => Err(PlanError::UnknownStrategy(other.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ImputerParams {
    strategy: String,
    fill_value: Option<Value>,
}

impl Default for ImputerParams {
    fn default() -> Self {
        Self {
            strategy: "mean".to_string(),
            fill_value: None,
        }
    }
}

/// `SimpleImputer`: fill missing cells of each requested column
pub fn simple_imputer(df: &DataFrame, columns: &[String], params: &Parameters) -> Result<DataFrame> {
    let params: ImputerParams = parse_params(TransformerKind::SimpleImputer, params)?;
    let strategy: ImputeStrategy = params.strategy.parse()?;

    let fill_value = match (strategy, &params.fill_value) {
        (ImputeStrategy::Constant, None | Some(Value::Null)) => {
            return Err(PlanError::MissingParameter {
                transformer: TransformerKind::SimpleImputer.to_string(),
                parameter: "fill_value".to_string(),
            })
        }
        (_, value) => value.as_ref(),
    };

    require_columns(df, columns)?;

    let filled = columns
        .iter()
        .map(|name| {
            let series = column_series(df, name)?;
            match strategy {
                ImputeStrategy::Mean | ImputeStrategy::Median => fill_statistic(series, strategy),
                ImputeStrategy::Mode => fill_mode(series),
                ImputeStrategy::Constant => fill_constant(series, fill_value.unwrap_or(&Value::Null)),
                ImputeStrategy::ForwardFill => Ok(series.fill_null(FillNullStrategy::Forward(None))?),
                ImputeStrategy::BackwardFill => Ok(series.fill_null(FillNullStrategy::Backward(None))?),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    replace_columns(df, filled)
}

fn fill_f64(series: &Series, ca: &Float64Chunked, value: f64) -> Series {
    let filled: Float64Chunked = ca.into_iter().map(|opt| Some(opt.unwrap_or(value))).collect();
    filled.with_name(series.name().clone()).into_series()
}

fn fill_str(series: &Series, ca: &StringChunked, value: &str) -> Series {
    let filled: StringChunked = ca.into_iter().map(|opt| Some(opt.unwrap_or(value))).collect();
    filled.with_name(series.name().clone()).into_series()
}

fn fill_statistic(series: &Series, strategy: ImputeStrategy) -> Result<Series> {
    let ca = numeric_values(series, TransformerKind::SimpleImputer)?;
    let stat = match strategy {
        ImputeStrategy::Mean => ca.mean(),
        _ => ca.median(),
    };
    // All-missing column: nothing to impute from
    let Some(stat) = stat else {
        return Ok(ca.with_name(series.name().clone()).into_series());
    };
    Ok(fill_f64(series, &ca, stat))
}

/// Most frequent value of an already sorted slice; the first run wins ties
fn sorted_mode<T: Clone>(sorted: &[T], eq: impl Fn(&T, &T) -> bool) -> Option<T> {
    let mut best: Option<(&T, usize)> = None;
    let mut start = 0;
    while start < sorted.len() {
        let mut end = start + 1;
        while end < sorted.len() && eq(&sorted[start], &sorted[end]) {
            end += 1;
        }
        let run = end - start;
        if best.map_or(true, |(_, count)| run > count) {
            best = Some((&sorted[start], run));
        }
        start = end;
    }
    best.map(|(value, _)| value.clone())
}

fn fill_mode(series: &Series) -> Result<Series> {
    let dtype = series.dtype();
    if is_numeric_dtype(dtype) || matches!(dtype, DataType::Boolean) {
        let cast = series.cast(&DataType::Float64)?;
        let ca = cast.f64()?;
        let mut values: Vec<f64> = ca.into_iter().flatten().collect();
        values.sort_by(|a, b| a.total_cmp(b));
        return Ok(match sorted_mode(&values, |a, b| a.total_cmp(b) == Ordering::Equal) {
            Some(mode) => fill_f64(series, ca, mode),
            None => cast.clone(),
        });
    }

    if matches!(dtype, DataType::String) {
        let ca = series.str()?;
        let mut values: Vec<&str> = ca.into_iter().flatten().collect();
        values.sort_unstable();
        return Ok(match sorted_mode(&values, |a, b| a == b) {
            Some(mode) => fill_str(series, ca, mode),
            None => series.clone(),
        });
    }

    Err(PlanError::DataError(format!(
        "mode imputation is not supported for column '{}' of dtype {}",
        series.name(),
        dtype
    )))
}

fn fill_constant(series: &Series, fill_value: &Value) -> Result<Series> {
    let dtype = series.dtype();
    match fill_value {
        Value::Number(n) if is_numeric_dtype(dtype) => {
            let value = n
                .as_f64()
                .ok_or_else(|| PlanError::invalid("fill_value", n, "not representable as f64"))?;
            let ca = numeric_values(series, TransformerKind::SimpleImputer)?;
            Ok(fill_f64(series, &ca, value))
        }
        Value::Number(n) if matches!(dtype, DataType::String) => Ok(fill_str(series, series.str()?, &n.to_string())),
        Value::String(s) if matches!(dtype, DataType::String) => Ok(fill_str(series, series.str()?, s)),
        Value::Bool(b) if matches!(dtype, DataType::Boolean) => {
            let filled: BooleanChunked = series.bool()?.into_iter().map(|opt| Some(opt.unwrap_or(*b))).collect();
            Ok(filled.with_name(series.name().clone()).into_series())
        }
        other => Err(PlanError::invalid(
            "fill_value",
            other,
            format!("cannot fill column '{}' of dtype {}", series.name(), dtype),
        )),
    }
}
