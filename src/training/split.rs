//! Train/test split and frame-to-matrix conversion

use super::TrainingData;
use crate::dataset::is_numeric_dtype;
use crate::error::{PlanError, Result};
use crate::plan::TaskKind;
use crate::preprocessing::category_codes;
use ndarray::{s, Array1, Array2};
use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

/// Random hold-out split
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainTestSplit {
    /// Fraction of rows held out, in (0, 1)
    pub test_size: f64,
    pub seed: Option<u64>,
}

impl Default for TrainTestSplit {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            seed: None,
        }
    }
}

/// Features and target on both sides of the split
#[derive(Debug, Clone)]
pub struct FrameSplit {
    pub x_train: DataFrame,
    pub x_test: DataFrame,
    pub y_train: Series,
    pub y_test: Series,
}

impl TrainTestSplit {
    pub fn new(test_size: f64, seed: Option<u64>) -> Self {
        Self { test_size, seed }
    }

    /// Shuffle rows and hold out `ceil(n * test_size)` of them
    pub fn split(&self, frame: &DataFrame, target: &str) -> Result<FrameSplit> {
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(PlanError::ConfigError(format!(
                "test_size must be in (0, 1), got {}",
                self.test_size
            )));
        }
        let y = frame
            .column(target)
            .map_err(|_| PlanError::UnknownColumn(target.to_string()))?
            .as_materialized_series()
            .clone();

        let n = frame.height();
        let n_test = (n as f64 * self.test_size).ceil() as usize;
        let n_train = n.saturating_sub(n_test);
        if n_test == 0 || n_train == 0 {
            return Err(PlanError::DataError(format!(
                "cannot split {} rows with test_size {}: one side would be empty",
                n, self.test_size
            )));
        }

        let mut rng = match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let mut indices: Vec<IdxSize> = (0..n as IdxSize).collect();
        indices.shuffle(&mut rng);

        let train_idx = IdxCa::from_vec("idx".into(), indices[..n_train].to_vec());
        let test_idx = IdxCa::from_vec("idx".into(), indices[n_train..].to_vec());
        let features = frame.drop(target)?;

        debug!(train = n_train, test = n_test, "Split rows");
        Ok(FrameSplit {
            x_train: features.take(&train_idx)?,
            x_test: features.take(&test_idx)?,
            y_train: y.take(&train_idx)?,
            y_test: y.take(&test_idx)?,
        })
    }
}

impl FrameSplit {
    /// Convert both sides to matrices. Class codes are shared by the two sides.
    pub fn training_data(&self, task: TaskKind) -> Result<TrainingData> {
        let n_train = self.y_train.len();
        let mut y = self.y_train.clone();
        y.append(&self.y_test)?;
        let target = target_vector(&y, task)?;

        Ok(TrainingData::Supervised {
            x_train: feature_matrix(&self.x_train)?,
            y_train: target.values.slice(s![..n_train]).to_owned(),
            x_test: feature_matrix(&self.x_test)?,
            y_test: target.values.slice(s![n_train..]).to_owned(),
        })
    }
}

/// Row-major f64 matrix of every column.
///
/// Numeric and boolean columns are cast, temporal columns use their physical
/// representation, and text or categorical columns are rejected. Nulls become NaN.
pub fn feature_matrix(df: &DataFrame) -> Result<Array2<f64>> {
    let n_rows = df.height();
    let col_data: Vec<Vec<f64>> = df
        .get_columns()
        .iter()
        .map(|column| -> Result<Vec<f64>> {
            let series = column.as_materialized_series();
            let dtype = series.dtype();
            let physical = if dtype.is_temporal() {
                series.to_physical_repr().into_owned()
            } else if is_numeric_dtype(dtype) || matches!(dtype, DataType::Boolean | DataType::Null) {
                series.clone()
            } else {
                return Err(PlanError::DataError(format!(
                    "column '{}' has non-numeric dtype {}; encode it before training",
                    series.name(),
                    dtype
                )));
            };
            let cast = physical.cast(&DataType::Float64)?;
            Ok(cast.f64()?.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
        })
        .collect::<Result<Vec<Vec<f64>>>>()?;

    let col_refs: Vec<&[f64]> = col_data.iter().map(|c| c.as_slice()).collect();
    Ok(Array2::from_shape_fn((n_rows, col_refs.len()), |(r, c)| col_refs[c][r]))
}

/// Target values ready for fitting
#[derive(Debug, Clone, PartialEq)]
pub struct TargetVector {
    pub values: Array1<f64>,
    /// Class names by code (classification only)
    pub classes: Option<Vec<String>>,
}

/// Regression targets are cast to f64; classification targets are label
/// encoded over their sorted distinct values. Missing targets become NaN.
pub fn target_vector(series: &Series, task: TaskKind) -> Result<TargetVector> {
    match task {
        TaskKind::Regression => {
            let dtype = series.dtype();
            if !(is_numeric_dtype(dtype) || matches!(dtype, DataType::Boolean)) {
                return Err(PlanError::DataError(format!(
                    "regression target '{}' must be numeric, found {}",
                    series.name(),
                    dtype
                )));
            }
            let cast = series.cast(&DataType::Float64)?;
            Ok(TargetVector {
                values: cast.f64()?.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect(),
                classes: None,
            })
        }
        TaskKind::Classification => {
            let encoded = category_codes(series)?;
            Ok(TargetVector {
                values: encoded
                    .codes
                    .iter()
                    .map(|code| code.map_or(f64::NAN, |c| c as f64))
                    .collect(),
                classes: Some(encoded.labels),
            })
        }
        TaskKind::Clustering => Err(PlanError::ConfigError(
            "clustering does not train against a target".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: i32) -> DataFrame {
        let x: Vec<i32> = (0..n).collect();
        let y: Vec<f64> = (0..n).map(|v| v as f64 * 2.0).collect();
        df!("x" => x, "y" => y).unwrap()
    }

    #[test]
    fn test_split_sizes() {
        let split = TrainTestSplit::new(0.2, Some(42)).split(&frame(10), "y").unwrap();
        assert_eq!(split.x_train.height(), 8);
        assert_eq!(split.x_test.height(), 2);
        assert_eq!(split.y_test.len(), 2);
        assert!(split.x_train.column("y").is_err());
    }

    #[test]
    fn test_split_rounds_test_side_up() {
        let split = TrainTestSplit::new(0.25, Some(1)).split(&frame(5), "y").unwrap();
        assert_eq!(split.x_test.height(), 2);
        assert_eq!(split.x_train.height(), 3);
    }

    #[test]
    fn test_split_is_seeded() {
        let a = TrainTestSplit::new(0.3, Some(9)).split(&frame(20), "y").unwrap();
        let b = TrainTestSplit::new(0.3, Some(9)).split(&frame(20), "y").unwrap();
        assert!(a.y_test.equals(&b.y_test));
    }

    #[test]
    fn test_split_rows_stay_aligned() {
        let split = TrainTestSplit::new(0.5, Some(3)).split(&frame(10), "y").unwrap();
        let data = split.training_data(TaskKind::Regression).unwrap();
        if let TrainingData::Supervised { x_train, y_train, .. } = data {
            for (row, y) in x_train.rows().into_iter().zip(y_train.iter()) {
                assert_eq!(row[0] * 2.0, *y);
            }
        } else {
            panic!("expected supervised data");
        }
    }

    #[test]
    fn test_split_errors() {
        let df = frame(10);
        assert!(matches!(
            TrainTestSplit::new(0.2, None).split(&df, "z"),
            Err(PlanError::UnknownColumn(_))
        ));
        assert!(matches!(
            TrainTestSplit::new(1.0, None).split(&df, "y"),
            Err(PlanError::ConfigError(_))
        ));
        assert!(matches!(
            TrainTestSplit::new(0.2, None).split(&frame(1), "y"),
            Err(PlanError::DataError(_))
        ));
    }

    #[test]
    fn test_feature_matrix_nulls_and_bools() {
        let df = df!(
            "a" => [Some(1.0), None],
            "b" => [true, false]
        )
        .unwrap();
        let x = feature_matrix(&df).unwrap();
        assert_eq!(x.dim(), (2, 2));
        assert!(x[[1, 0]].is_nan());
        assert_eq!(x[[0, 1]], 1.0);
    }

    #[test]
    fn test_feature_matrix_rejects_text() {
        let df = df!("city" => ["a", "b"]).unwrap();
        let err = feature_matrix(&df).unwrap_err();
        assert!(err.to_string().contains("city"));
    }

    #[test]
    fn test_classification_target_codes() {
        let series = Series::new("label".into(), &["yes", "no", "yes"]);
        let target = target_vector(&series, TaskKind::Classification).unwrap();
        assert_eq!(target.values.to_vec(), vec![1.0, 0.0, 1.0]);
        assert_eq!(target.classes, Some(vec!["no".to_string(), "yes".to_string()]));
    }

    #[test]
    fn test_regression_target_must_be_numeric() {
        let series = Series::new("label".into(), &["a"]);
        assert!(target_vector(&series, TaskKind::Regression).is_err());
    }
}
