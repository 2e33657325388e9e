//! YAML data config and file loading

use super::{ColumnType, SchemaDescriptor};
use crate::config::EngineConfig;
use crate::error::{PlanError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// Where the raw data comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Csv,
    Parquet,
    Json,
    Excel,
    Api,
}

/// Reader options for CSV sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReadParams {
    pub separator: char,
    pub has_header: bool,
    pub infer_schema_length: Option<usize>,
    pub skip_rows: usize,
}

impl Default for ReadParams {
    fn default() -> Self {
        Self {
            separator: ',',
            has_header: true,
            infer_schema_length: Some(1000),
            skip_rows: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum TargetSpec {
    One(String),
    Many(Vec<String>),
}

/// Schema section of the data config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// A string or a list holding one column name
    #[serde(default)]
    target_column: Option<TargetSpec>,
    #[serde(default)]
    pub drop_columns: Vec<String>,
    #[serde(default)]
    pub test_split: Option<f64>,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnType>,
}

impl SchemaConfig {
    /// The configured target column, if any
    pub fn target(&self) -> Result<Option<String>> {
        match &self.target_column {
            None => Ok(None),
            Some(TargetSpec::One(name)) => Ok(Some(name.clone())),
            Some(TargetSpec::Many(names)) => match names.as_slice() {
                [] => Ok(None),
                [name] => Ok(Some(name.clone())),
                _ => Err(PlanError::ConfigError(format!(
                    "only one target column is supported, got {:?}",
                    names
                ))),
            },
        }
    }

    /// Build the descriptor handed to the engine
    pub fn to_descriptor(&self) -> Result<SchemaDescriptor> {
        Ok(SchemaDescriptor {
            columns: self.columns.clone(),
            target_column: self.target()?,
            drop_columns: self.drop_columns.clone(),
        })
    }
}

/// The `data` section of the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    pub source_type: SourceType,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub api: Option<String>,
    #[serde(default)]
    pub read_params: ReadParams,
    #[serde(default)]
    pub schema: SchemaConfig,
}

/// Whole data config file: data source plus optional engine overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub data: DataConfig,
    #[serde(default)]
    pub engine: Option<EngineConfig>,
}

impl RunConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read a config file; relative data paths resolve against its directory
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::from_yaml(&std::fs::read_to_string(path)?)?;
        if let (Some(data_path), Some(dir)) = (config.data.path.as_mut(), path.parent()) {
            if data_path.is_relative() && !dir.as_os_str().is_empty() {
                *data_path = dir.join(&*data_path);
            }
        }
        Ok(config)
    }

    /// Engine settings with the schema's test split applied
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = self.engine.clone().unwrap_or_default();
        if self.engine.is_none() {
            if let Some(test_split) = self.data.schema.test_split {
                config.test_size = test_split;
            }
        }
        config
    }
}

/// Data loader for the supported file formats
#[derive(Debug, Default)]
pub struct DataLoader;

impl DataLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load the frame a data config describes
    pub fn load(&self, config: &DataConfig) -> Result<DataFrame> {
        let path = match config.source_type {
            SourceType::Excel | SourceType::Api => {
                return Err(PlanError::ConfigError(format!(
                    "source type {:?} is not supported",
                    config.source_type
                )))
            }
            _ => config
                .path
                .as_deref()
                .ok_or_else(|| PlanError::ConfigError("data path not specified".to_string()))?,
        };

        let start = Instant::now();
        let df = match config.source_type {
            SourceType::Csv => self.load_csv(path, &config.read_params)?,
            SourceType::Parquet => self.load_parquet(path)?,
            _ => self.load_json(path)?,
        };

        info!(
            path = %path.display(),
            rows = df.height(),
            columns = df.width(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded dataset"
        );
        Ok(df)
    }

    /// Load a CSV file
    pub fn load_csv(&self, path: &Path, params: &ReadParams) -> Result<DataFrame> {
        if !params.separator.is_ascii() {
            return Err(PlanError::ConfigError(format!(
                "CSV separator must be a single ASCII character, got {:?}",
                params.separator
            )));
        }
        let file = File::open(path)?;
        let parse_opts = CsvParseOptions::default().with_separator(params.separator as u8);

        let df = CsvReadOptions::default()
            .with_has_header(params.has_header)
            .with_skip_rows(params.skip_rows)
            .with_infer_schema_length(params.infer_schema_length)
            .with_parse_options(parse_opts)
            .into_reader_with_file_handle(file)
            .finish()?;
        Ok(df)
    }

    /// Load a Parquet file
    pub fn load_parquet(&self, path: &Path) -> Result<DataFrame> {
        let file = File::open(path)?;
        Ok(ParquetReader::new(file).finish()?)
    }

    /// Load a JSON array file, or line-delimited JSON for `.jsonl`/`.ndjson`
    pub fn load_json(&self, path: &Path) -> Result<DataFrame> {
        let file = File::open(path)?;
        let lines = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("jsonl") | Some("ndjson")
        );
        let format = if lines { JsonFormat::JsonLines } else { JsonFormat::Json };
        Ok(JsonReader::new(file).with_json_format(format).finish()?)
    }

    /// Write a frame as CSV
    pub fn write_csv(&self, df: &mut DataFrame, path: &Path) -> Result<()> {
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file).include_header(true).finish(df)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
data:
  source_type: csv
  path: data.csv
  read_params:
    separator: ";"
  schema:
    target_column: [income]
    drop_columns: [id]
    test_split: 0.25
    columns:
      city: categorical
"#;

    #[test]
    fn test_parse_config() {
        let config = RunConfig::from_yaml(CONFIG).unwrap();
        assert_eq!(config.data.source_type, SourceType::Csv);
        assert_eq!(config.data.read_params.separator, ';');
        assert!(config.data.read_params.has_header);
        let schema = config.data.schema.to_descriptor().unwrap();
        assert_eq!(schema.target_column.as_deref(), Some("income"));
        assert_eq!(schema.column_type("city"), Some(ColumnType::Categorical));
        assert_eq!(config.engine_config().test_size, 0.25);
    }

    #[test]
    fn test_multiple_targets_rejected() {
        let yaml = "data:\n  source_type: csv\n  path: a.csv\n  schema:\n    target_column: [a, b]\n";
        let config = RunConfig::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.data.schema.target(),
            Err(PlanError::ConfigError(_))
        ));
    }

    #[test]
    fn test_load_csv_relative_to_config() {
        let dir = TempDir::new().unwrap();
        let mut csv = File::create(dir.path().join("data.csv")).unwrap();
        writeln!(csv, "id;age;city;income").unwrap();
        writeln!(csv, "1;30;Oslo;100.0").unwrap();
        writeln!(csv, "2;;Rome;120.5").unwrap();
        std::fs::write(dir.path().join("data.yaml"), CONFIG).unwrap();

        let config = RunConfig::from_path(dir.path().join("data.yaml")).unwrap();
        let df = DataLoader::new().load(&config.data).unwrap();
        assert_eq!(df.shape(), (2, 4));
        assert_eq!(df.column("age").unwrap().null_count(), 1);
    }

    #[test]
    fn test_unsupported_source() {
        let yaml = "data:\n  source_type: api\n  api: http://localhost/data\n";
        let config = RunConfig::from_yaml(yaml).unwrap();
        let err = DataLoader::new().load(&config.data).unwrap_err();
        assert!(matches!(err, PlanError::ConfigError(_)));
    }
}
