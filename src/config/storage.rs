//! Storage configuration: destination, naming and output format.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PATH_TEMPLATE: &str = "data/{datastream}";
pub const DEFAULT_FILENAME_TEMPLATE: &str = "{datastream}.{start:%Y%m%d.%H%M%S}.{ext}";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Json,
    Parquet,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Parquet => "parquet",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "json" => Some(OutputFormat::Json),
            "parquet" => Some(OutputFormat::Parquet),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub root: PathBuf,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_path_template")]
    pub path_template: String,
    #[serde(default = "default_filename_template")]
    pub filename_template: String,
    /// Coordinate holding epoch seconds, used for `{start}`/`{end}`.
    #[serde(default = "default_time_coordinate")]
    pub time_coordinate: String,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl StorageConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            format: OutputFormat::default(),
            path_template: default_path_template(),
            filename_template: default_filename_template(),
            time_coordinate: default_time_coordinate(),
            overwrite: false,
            timeout_seconds: None,
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

fn default_path_template() -> String {
    DEFAULT_PATH_TEMPLATE.to_string()
}

fn default_filename_template() -> String {
    DEFAULT_FILENAME_TEMPLATE.to_string()
}

fn default_time_coordinate() -> String {
    "time".to_string()
}
