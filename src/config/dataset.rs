//! Dataset configuration: the canonical variables every unit is mapped onto.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dataset::DataType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Global attributes copied verbatim onto every dataset.
    #[serde(default)]
    pub attrs: BTreeMap<String, Value>,
    pub coords: BTreeMap<String, VariableConfig>,
    #[serde(default)]
    pub data_vars: BTreeMap<String, VariableConfig>,
    #[serde(default)]
    pub conversions: Vec<ConversionConfig>,
}

impl DatasetConfig {
    pub fn variable(&self, name: &str) -> Option<&VariableConfig> {
        self.data_vars.get(name).or_else(|| self.coords.get(name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableConfig {
    pub dims: Vec<String>,
    pub dtype: DataType,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub fill_value: Option<f64>,
    #[serde(default)]
    pub attrs: BTreeMap<String, Value>,
    /// Where to find the raw values. Defaults to a source of the same name.
    #[serde(default)]
    pub source: Option<SourceMapping>,
    /// Literal values, for coordinates not present in any input.
    #[serde(default)]
    pub data: Option<Vec<f64>>,
}

impl VariableConfig {
    /// Fill value, falling back to the data type's default.
    pub fn effective_fill(&self) -> f64 {
        self.fill_value.unwrap_or_else(|| self.dtype.default_fill())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMapping {
    pub name: NameList,
    /// Units of the raw values; overrides the raw `units` attribute.
    #[serde(default)]
    pub units: Option<String>,
    /// Inclusive range of plausible raw values, in source units.
    #[serde(default)]
    pub valid_range: Option<[f64; 2]>,
}

/// One name or an ordered list of candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NameList {
    One(String),
    Many(Vec<String>),
}

impl NameList {
    pub fn candidates(&self) -> Vec<&str> {
        match self {
            NameList::One(name) => vec![name.as_str()],
            NameList::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionConfig {
    pub from: String,
    pub to: String,
    pub rule: ConversionRule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversionRule {
    /// `to = from * scale + offset`
    Linear {
        scale: f64,
        #[serde(default)]
        offset: f64,
    },
    /// Piecewise-linear lookup over `(from, to)` points with increasing `from`.
    Table { points: Vec<[f64; 2]> },
}
