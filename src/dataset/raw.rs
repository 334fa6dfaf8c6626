use std::collections::BTreeMap;
use std::path::PathBuf;

use ndarray::ArrayD;
use serde_json::Value;

/// A variable as read from a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct RawVariable {
    pub name: String,
    /// Dimension names as the source reports them; may be generic (`index`).
    pub dims: Vec<String>,
    pub data: ArrayD<f64>,
    pub attrs: BTreeMap<String, Value>,
}

impl RawVariable {
    pub fn new(name: impl Into<String>, dims: Vec<String>, data: ArrayD<f64>) -> Self {
        Self {
            name: name.into(),
            dims,
            data,
            attrs: BTreeMap::new(),
        }
    }

    /// One-dimensional column along `index`.
    pub fn column(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self::new(
            name,
            vec!["index".to_string()],
            ndarray::Array1::from(values).into_dyn(),
        )
    }

    pub fn units(&self) -> Option<&str> {
        self.attrs.get("units").and_then(Value::as_str)
    }

    /// Source-declared missing marker (`missing_value` or `_FillValue`).
    pub fn missing_marker(&self) -> Option<f64> {
        ["missing_value", "_FillValue"]
            .iter()
            .find_map(|key| self.attrs.get(*key).and_then(Value::as_f64))
    }
}

/// Merged output of all sources for one unit, keyed by source-native names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDataset {
    pub attrs: BTreeMap<String, Value>,
    pub variables: BTreeMap<String, RawVariable>,
    /// Files the variables were read from, in read order.
    pub sources: Vec<PathBuf>,
}

impl RawDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, variable: RawVariable) {
        self.variables.insert(variable.name.clone(), variable);
    }

    pub fn with_variable(mut self, variable: RawVariable) -> Self {
        self.insert(variable);
        self
    }

    pub fn get(&self, name: &str) -> Option<&RawVariable> {
        self.variables.get(name)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}
