//! Feature scaling
//!
//! Statistics are computed per column over present values. A column without
//! spread divides by zero and yields NaN.

use super::{column_series, numeric_values, parse_params, replace_columns, require_columns, TransformerKind};
use crate::error::{PlanError, Result};
use crate::plan::Parameters;
use polars::prelude::*;
use serde::Deserialize;

#[derive(Debug, Clone, Copy)]
struct ScalerParams {
    center: f64,
    scale: f64,
    offset: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StandardOptions {
    with_mean: bool,
    with_std: bool,
    #[allow(dead_code)]
    copy: bool,
}

impl Default for StandardOptions {
    fn default() -> Self {
        Self {
            with_mean: true,
            with_std: true,
            copy: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MinMaxOptions {
    feature_range: (f64, f64),
    clip: bool,
    #[allow(dead_code)]
    copy: bool,
}

impl Default for MinMaxOptions {
    fn default() -> Self {
        Self {
            feature_range: (0.0, 1.0),
            clip: false,
            copy: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RobustOptions {
    with_centering: bool,
    with_scaling: bool,
    quantile_range: (f64, f64),
    #[allow(dead_code)]
    copy: bool,
}

impl Default for RobustOptions {
    fn default() -> Self {
        Self {
            with_centering: true,
            with_scaling: true,
            quantile_range: (25.0, 75.0),
            copy: true,
        }
    }
}

fn scale_series(series: &Series, ca: &Float64Chunked, params: ScalerParams, clip: Option<(f64, f64)>) -> Series {
    let scaled: Float64Chunked = ca
        .into_iter()
        .map(|opt| {
            opt.map(|v| {
                let x = (v - params.center) / params.scale + params.offset;
                match clip {
                    Some((lo, hi)) => x.clamp(lo, hi),
                    None => x,
                }
            })
        })
        .collect();
    scaled.with_name(series.name().clone()).into_series()
}

fn scale_columns(
    df: &DataFrame,
    columns: &[String],
    kind: TransformerKind,
    clip: Option<(f64, f64)>,
    fit: impl Fn(&Float64Chunked) -> Result<ScalerParams>,
) -> Result<DataFrame> {
    require_columns(df, columns)?;
    let scaled = columns
        .iter()
        .map(|name| {
            let series = column_series(df, name)?;
            let ca = numeric_values(series, kind)?;
            let params = fit(&ca)?;
            Ok(scale_series(series, &ca, params, clip))
        })
        .collect::<Result<Vec<_>>>()?;
    replace_columns(df, scaled)
}

/// `StandardScaler`: `(x - mean) / std`, population std
pub fn standard_scaler(df: &DataFrame, columns: &[String], params: &Parameters) -> Result<DataFrame> {
    let opts: StandardOptions = parse_params(TransformerKind::StandardScaler, params)?;

    scale_columns(df, columns, TransformerKind::StandardScaler, None, |ca| {
        let center = if opts.with_mean { ca.mean().unwrap_or(f64::NAN) } else { 0.0 };
        let scale = if opts.with_std { ca.std(0).unwrap_or(f64::NAN) } else { 1.0 };
        Ok(ScalerParams {
            center,
            scale,
            offset: 0.0,
        })
    })
}

/// `MinMaxScaler`: `(x - min) / (max - min)` rescaled into `feature_range`
pub fn min_max_scaler(df: &DataFrame, columns: &[String], params: &Parameters) -> Result<DataFrame> {
    let opts: MinMaxOptions = parse_params(TransformerKind::MinMaxScaler, params)?;
    let (lo, hi) = opts.feature_range;
    if !(lo < hi) {
        return Err(PlanError::invalid(
            "feature_range",
            format!("[{}, {}]", lo, hi),
            "minimum must be smaller than maximum",
        ));
    }
    let clip = opts.clip.then_some((lo, hi));

    scale_columns(df, columns, TransformerKind::MinMaxScaler, clip, |ca| {
        let min = ca.min().unwrap_or(f64::NAN);
        let max = ca.max().unwrap_or(f64::NAN);
        Ok(ScalerParams {
            center: min,
            scale: (max - min) / (hi - lo),
            offset: lo,
        })
    })
}

/// `RobustScaler`: `(x - median) / (Q3 - Q1)` with linear interpolation
pub fn robust_scaler(df: &DataFrame, columns: &[String], params: &Parameters) -> Result<DataFrame> {
    let opts: RobustOptions = parse_params(TransformerKind::RobustScaler, params)?;
    let (q_lo, q_hi) = opts.quantile_range;
    if !(0.0 <= q_lo && q_lo < q_hi && q_hi <= 100.0) {
        return Err(PlanError::invalid(
            "quantile_range",
            format!("[{}, {}]", q_lo, q_hi),
            "expected 0 <= q_min < q_max <= 100",
        ));
    }

    scale_columns(df, columns, TransformerKind::RobustScaler, None, |ca| {
        let center = if opts.with_centering { ca.median().unwrap_or(f64::NAN) } else { 0.0 };
        let scale = if opts.with_scaling {
            let q1 = ca.quantile(q_lo / 100.0, QuantileMethod::Linear)?.unwrap_or(f64::NAN);
            let q3 = ca.quantile(q_hi / 100.0, QuantileMethod::Linear)?.unwrap_or(f64::NAN);
            q3 - q1
        } else {
            1.0
        };
        Ok(ScalerParams {
            center,
            scale,
            offset: 0.0,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn params(value: Value) -> Parameters {
        match value {
            Value::Object(map) => map,
            _ => Parameters::new(),
        }
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn values(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
        df.column(name).unwrap().f64().unwrap().into_iter().collect()
    }

    #[test]
    fn test_standard_scaler() {
        let df = df!("x" => &[1.0, 2.0, 3.0], "y" => &["a", "b", "c"]).unwrap();
        let out = standard_scaler(&df, &cols(&["x"]), &Parameters::new()).unwrap();
        let std = (2.0f64 / 3.0).sqrt();
        let scaled = values(&out, "x");
        assert!((scaled[0].unwrap() + 1.0 / std).abs() < 1e-12);
        assert!(scaled[1].unwrap().abs() < 1e-12);
        assert_eq!(out.column("y").unwrap().str().unwrap().get(0), Some("a"));
    }

    #[test]
    fn test_standard_scaler_constant_column() {
        let df = df!("x" => &[4.0, 4.0, 4.0]).unwrap();
        let out = standard_scaler(&df, &cols(&["x"]), &Parameters::new()).unwrap();
        assert_eq!(out.height(), 3);
        assert!(values(&out, "x").iter().all(|v| !v.unwrap().is_finite()));
    }

    #[test]
    fn test_standard_scaler_keeps_nulls() {
        let df = df!("x" => &[Some(1.0), None, Some(3.0)]).unwrap();
        let out = standard_scaler(&df, &cols(&["x"]), &params(json!({"with_std": false}))).unwrap();
        assert_eq!(values(&out, "x"), vec![Some(-1.0), None, Some(1.0)]);
    }

    #[test]
    fn test_min_max_bounds() {
        let df = df!("x" => &[5i64, -3, 10, 0]).unwrap();
        let out = min_max_scaler(&df, &cols(&["x"]), &Parameters::new()).unwrap();
        let scaled: Vec<f64> = values(&out, "x").into_iter().flatten().collect();
        assert!(scaled.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(scaled[1], 0.0);
        assert_eq!(scaled[2], 1.0);
    }

    #[test]
    fn test_min_max_feature_range() {
        let df = df!("x" => &[0.0, 5.0, 10.0]).unwrap();
        let out = min_max_scaler(&df, &cols(&["x"]), &params(json!({"feature_range": [-1, 1]}))).unwrap();
        assert_eq!(values(&out, "x"), vec![Some(-1.0), Some(0.0), Some(1.0)]);

        let err = min_max_scaler(&df, &cols(&["x"]), &params(json!({"feature_range": [1, 1]}))).unwrap_err();
        assert!(matches!(err, PlanError::InvalidParameter { .. }));
    }

    #[test]
    fn test_robust_scaler() {
        let df = df!("x" => &[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        let out = robust_scaler(&df, &cols(&["x"]), &Parameters::new()).unwrap();
        // median 3, Q1 2, Q3 4
        assert_eq!(values(&out, "x"), vec![Some(-1.0), Some(-0.5), Some(0.0), Some(0.5), Some(1.0)]);
    }

    #[test]
    fn test_scaler_rejects_text() {
        let df = df!("y" => &["a", "b"]).unwrap();
        let err = standard_scaler(&df, &cols(&["y"]), &Parameters::new()).unwrap_err();
        assert!(matches!(err, PlanError::DataError(_)));
    }
}
