//! Categorical encoding
//!
//! Categories are the distinct present values of a column in sorted order, so
//! codes are stable for a given column content.

use super::{column_series, parse_params, replace_columns, require_columns, TransformerKind};
use crate::error::{PlanError, Result};
use crate::plan::Parameters;
use polars::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Ordering;
use tracing::warn;

/// Sorted categories of a column plus each row's code
pub(crate) struct CategoryCodes {
    pub(crate) labels: Vec<String>,
    pub(crate) codes: Vec<Option<usize>>,
}

fn codes_from<T: Clone>(
    values: Vec<Option<T>>,
    cmp: impl Fn(&T, &T) -> Ordering,
    label: impl Fn(&T) -> String,
) -> CategoryCodes {
    let mut distinct: Vec<T> = values.iter().flatten().cloned().collect();
    distinct.sort_by(&cmp);
    distinct.dedup_by(|a, b| cmp(a, b) == Ordering::Equal);

    let codes = values
        .iter()
        .map(|v| {
            v.as_ref()
                .map(|v| distinct.binary_search_by(|d| cmp(d, v)).unwrap_or_else(|i| i))
        })
        .collect();

    CategoryCodes {
        labels: distinct.iter().map(label).collect(),
        codes,
    }
}

pub(crate) fn category_codes(series: &Series) -> Result<CategoryCodes> {
    let dtype = series.dtype();
    if dtype.is_integer() {
        let cast = series.cast(&DataType::Int64)?;
        let values = cast.i64()?.into_iter().collect();
        Ok(codes_from(values, |a: &i64, b| a.cmp(b), |v| v.to_string()))
    } else if dtype.is_float() {
        let cast = series.cast(&DataType::Float64)?;
        let values = cast.f64()?.into_iter().collect();
        Ok(codes_from(values, |a: &f64, b| a.total_cmp(b), |v| v.to_string()))
    } else {
        let cast = series.cast(&DataType::String)?;
        let values = cast.str()?.into_iter().collect();
        Ok(codes_from(values, |a: &&str, b| a.cmp(b), |v| v.to_string()))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[allow(dead_code)]
struct OrdinalOptions {
    /// Written into missing cells instead of leaving them missing
    encoded_missing_value: Option<f64>,
    // Accepted for compatibility. Categories are always derived from the data
    // and a single call never sees unknown values.
    categories: Option<Value>,
    handle_unknown: Option<String>,
    unknown_value: Option<Value>,
    dtype: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LabelOptions {}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[allow(dead_code)]
struct OneHotOptions {
    sparse_output: bool,
    /// Older spelling of `sparse_output`
    sparse: Option<bool>,
    drop: Option<String>,
    categories: Option<Value>,
    handle_unknown: Option<String>,
    dtype: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DropPolicy {
    Keep,
    First,
    IfBinary,
}

/// `OrdinalEncoder`: Float64 codes per column
pub fn ordinal_encoder(df: &DataFrame, columns: &[String], params: &Parameters) -> Result<DataFrame> {
    let opts: OrdinalOptions = parse_params(TransformerKind::OrdinalEncoder, params)?;
    require_columns(df, columns)?;

    let encoded = columns
        .iter()
        .map(|name| {
            let series = column_series(df, name)?;
            let cats = category_codes(series)?;
            let ca: Float64Chunked = cats
                .codes
                .into_iter()
                .map(|code| code.map(|c| c as f64).or(opts.encoded_missing_value))
                .collect();
            Ok(ca.with_name(series.name().clone()).into_series())
        })
        .collect::<Result<Vec<_>>>()?;

    replace_columns(df, encoded)
}

/// `LabelEncoder`: Int64 codes per column
pub fn label_encoder(df: &DataFrame, columns: &[String], params: &Parameters) -> Result<DataFrame> {
    let _: LabelOptions = parse_params(TransformerKind::LabelEncoder, params)?;
    require_columns(df, columns)?;

    let encoded = columns
        .iter()
        .map(|name| {
            let series = column_series(df, name)?;
            let cats = category_codes(series)?;
            let ca: Int64Chunked = cats.codes.into_iter().map(|code| code.map(|c| c as i64)).collect();
            Ok(ca.with_name(series.name().clone()).into_series())
        })
        .collect::<Result<Vec<_>>>()?;

    replace_columns(df, encoded)
}

/// `OneHotEncoder`: replace each column in place with dense indicator columns
/// named `<column>_<value>`
pub fn one_hot_encoder(df: &DataFrame, columns: &[String], params: &Parameters) -> Result<DataFrame> {
    let opts: OneHotOptions = parse_params(TransformerKind::OneHotEncoder, params)?;
    let drop = match opts.drop.as_deref() {
        None => DropPolicy::Keep,
        Some("first") => DropPolicy::First,
        Some("if_binary") => DropPolicy::IfBinary,
        Some(other) => {
            return Err(PlanError::invalid(
                "drop",
                other,
                "expected \"first\", \"if_binary\" or null",
            ))
        }
    };
    if opts.sparse_output || opts.sparse == Some(true) {
        warn!(columns = ?columns, "OneHotEncoder sparse output requested; producing dense columns");
    }
    require_columns(df, columns)?;

    let mut result = df.clone();
    for name in columns {
        let series = column_series(&result, name)?.clone();
        let cats = category_codes(&series)?;
        let skip_first = match drop {
            DropPolicy::Keep => false,
            DropPolicy::First => true,
            DropPolicy::IfBinary => cats.labels.len() == 2,
        };

        let position = result
            .get_column_index(name)
            .ok_or_else(|| PlanError::UnknownColumn(name.clone()))?;
        result.drop_in_place(name)?;

        let indicators = cats.labels.iter().enumerate().skip(usize::from(skip_first));
        for (offset, (j, label)) in indicators.enumerate() {
            let ca: Float64Chunked = cats
                .codes
                .iter()
                .map(|code| code.map(|c| if c == j { 1.0 } else { 0.0 }))
                .collect();
            let column_name = format!("{}_{}", name, label);
            result.insert_column(position + offset, ca.with_name(column_name.into()).into_series())?;
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Parameters {
        match value {
            Value::Object(map) => map,
            _ => Parameters::new(),
        }
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn sample_df() -> DataFrame {
        df!(
            "id" => &[1i64, 2, 3, 4],
            "city" => &[Some("Rome"), Some("Oslo"), None, Some("Rome")],
            "score" => &[0.5, 0.7, 0.1, 0.9],
        )
        .unwrap()
    }

    #[test]
    fn test_ordinal_sorted_codes() {
        let out = ordinal_encoder(&sample_df(), &cols(&["city"]), &Parameters::new()).unwrap();
        let codes: Vec<Option<f64>> = out.column("city").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(codes, vec![Some(1.0), Some(0.0), None, Some(1.0)]);
    }

    #[test]
    fn test_ordinal_encoded_missing_value() {
        let out = ordinal_encoder(
            &sample_df(),
            &cols(&["city"]),
            &params(json!({"encoded_missing_value": -1})),
        )
        .unwrap();
        assert_eq!(out.column("city").unwrap().f64().unwrap().get(2), Some(-1.0));
    }

    #[test]
    fn test_label_encoder_integer_codes() {
        let out = label_encoder(&sample_df(), &cols(&["city"]), &Parameters::new()).unwrap();
        let city = out.column("city").unwrap();
        assert_eq!(city.dtype(), &DataType::Int64);
        assert_eq!(city.i64().unwrap().get(0), Some(1));
        assert!(label_encoder(&sample_df(), &cols(&["city"]), &params(json!({"x": 1}))).is_err());
    }

    #[test]
    fn test_one_hot_in_place() {
        let out = one_hot_encoder(&sample_df(), &cols(&["city"]), &Parameters::new()).unwrap();
        let names: Vec<String> = out.get_column_names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, vec!["id", "city_Oslo", "city_Rome", "score"]);
        let rome: Vec<Option<f64>> = out.column("city_Rome").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(rome, vec![Some(1.0), Some(0.0), None, Some(1.0)]);
    }

    #[test]
    fn test_one_hot_sparse_request_is_dense() {
        let out = one_hot_encoder(&sample_df(), &cols(&["city"]), &params(json!({"sparse_output": true}))).unwrap();
        assert_eq!(out.column("city_Oslo").unwrap().dtype(), &DataType::Float64);
    }

    #[test]
    fn test_one_hot_drop_first() {
        let out = one_hot_encoder(&sample_df(), &cols(&["city"]), &params(json!({"drop": "first"}))).unwrap();
        assert!(out.column("city_Oslo").is_err());
        assert!(out.column("city_Rome").is_ok());

        let err = one_hot_encoder(&sample_df(), &cols(&["city"]), &params(json!({"drop": "last"}))).unwrap_err();
        assert!(matches!(err, PlanError::InvalidParameter { .. }));
    }

    #[test]
    fn test_one_hot_integer_labels() {
        let df = df!("zone" => &[2i64, 1, 2]).unwrap();
        let out = one_hot_encoder(&df, &cols(&["zone"]), &Parameters::new()).unwrap();
        assert!(out.column("zone_1").is_ok());
        assert!(out.column("zone_2").is_ok());
    }
}
