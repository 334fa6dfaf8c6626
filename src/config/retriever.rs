//! Retriever configuration: where raw files live and how to read them.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How matched files are grouped into units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    /// One unit per key extracted from each file name.
    #[default]
    PerKey,
    /// All matched files form a single unit.
    Batch,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieverConfig {
    /// Directory searched for inputs, relative to the pipeline document.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub grouping: Grouping,
    /// Regex applied to file names; its `key` group names the unit.
    #[serde(default)]
    pub unit_key: Option<String>,
    /// Variables several sources may provide, as long as they agree.
    #[serde(default)]
    pub shared_variables: Vec<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    pub sources: Vec<SourceConfig>,
}

impl RetrieverConfig {
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// Regex matched against the whole root-relative path.
    pub pattern: String,
    #[serde(default)]
    pub compression: Compression,
    pub parser: ParserConfig,
    /// Source-native name to merged name.
    #[serde(default)]
    pub rename: BTreeMap<String, String>,
}

/// Declared file format of a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ParserConfig {
    Csv(CsvOptions),
    Json,
    Parquet,
}

impl ParserConfig {
    pub fn format_name(&self) -> &'static str {
        match self {
            ParserConfig::Csv(_) => "csv",
            ParserConfig::Json => "json",
            ParserConfig::Parquet => "parquet",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvOptions {
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default)]
    pub comment: Option<String>,
    /// Lines skipped before the header row.
    #[serde(default)]
    pub skip_rows: usize,
    #[serde(default = "default_null_values")]
    pub null_values: Vec<String>,
    /// Column name to chrono format; parsed into epoch seconds (UTC).
    #[serde(default)]
    pub time_columns: BTreeMap<String, String>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            comment: None,
            skip_rows: 0,
            null_values: default_null_values(),
            time_columns: BTreeMap::new(),
        }
    }
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_null_values() -> Vec<String> {
    ["", "NA", "NaN", "nan", "null"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retriever_yaml() {
        let yaml = r#"
root: raw
unit_key: '^(?P<key>\d{8})'
shared_variables: [time]
sources:
  - name: met
    pattern: 'met/.*\.csv'
    parser:
      format: csv
      delimiter: ";"
      time_columns: { timestamp: "%Y-%m-%d %H:%M:%S" }
    rename: { temp_f: air_temp_f }
  - name: rad
    pattern: 'rad/.*\.json\.gz'
    compression: gzip
    parser: { format: json }
"#;
        let config: RetrieverConfig = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(config.grouping, Grouping::PerKey);
        assert_eq!(config.sources.len(), 2);
        match &config.sources[0].parser {
            ParserConfig::Csv(opts) => {
                assert_eq!(opts.delimiter, ";");
                assert_eq!(opts.skip_rows, 0);
                assert!(opts.null_values.contains(&"NA".to_string()));
            }
            other => panic!("unexpected parser {other:?}"),
        }
        assert_eq!(config.sources[1].compression, Compression::Gzip);
        assert_eq!(config.source("rad").map(|s| s.parser.format_name()), Some("json"));
    }
}
