//! JSON sources.
//!
//! Accepted layout:
//!
//! ```json
//! {
//!   "attrs": { "instrument": "met" },
//!   "variables": {
//!     "time": [0, 60, 120],
//!     "temp": { "dims": ["time", "height"], "data": [[1, 2], [3, null], [5, 6]],
//!               "attrs": { "units": "degC" } }
//!   }
//! }
//! ```
//!
//! Without a `variables` key, every top-level key except `attrs` is a column.
//! `null` reads as NaN.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{ArrayD, IxDyn};
use serde_json::Value;

use super::{read_text, SourceReader};
use crate::config::Compression;
use crate::dataset::{RawDataset, RawVariable};
use crate::error::RetrievalError;

pub struct JsonReader {
    compression: Compression,
}

impl JsonReader {
    pub fn new(compression: Compression) -> Self {
        Self { compression }
    }
}

impl SourceReader for JsonReader {
    fn format(&self) -> &'static str {
        "json"
    }

    fn read(&self, path: &Path) -> Result<RawDataset, RetrievalError> {
        let text = read_text(path, self.compression, self.format())?;
        let document: Value =
            serde_json::from_str(&text).map_err(|e| RetrievalError::decode(path, "json", e))?;
        let Value::Object(mut root) = document else {
            return Err(RetrievalError::decode(path, "json", "top level must be an object"));
        };

        let mut raw = RawDataset::new();
        if let Some(attrs) = root.remove("attrs") {
            raw.attrs = object_to_attrs(attrs)
                .ok_or_else(|| RetrievalError::decode(path, "json", "'attrs' must be an object"))?;
        }

        let variables = match root.remove("variables") {
            Some(Value::Object(vars)) => vars,
            Some(_) => {
                return Err(RetrievalError::decode(path, "json", "'variables' must be an object"))
            }
            None => root,
        };

        for (name, value) in variables {
            let variable = parse_variable(&name, value)
                .map_err(|message| RetrievalError::decode(path, "json", format!("variable '{name}': {message}")))?;
            raw.insert(variable);
        }
        raw.sources.push(path.to_path_buf());
        Ok(raw)
    }
}

fn object_to_attrs(value: Value) -> Option<BTreeMap<String, Value>> {
    match value {
        Value::Object(map) => Some(map.into_iter().collect()),
        _ => None,
    }
}

fn parse_variable(name: &str, value: Value) -> Result<RawVariable, String> {
    match value {
        Value::Object(mut fields) => {
            let data = fields.remove("data").ok_or("missing 'data'")?;
            let array = to_array(&data)?;
            let dims = match fields.remove("dims") {
                Some(dims) => parse_dims(dims)?,
                None => default_dims(array.ndim()),
            };
            if dims.len() != array.ndim() {
                return Err(format!(
                    "{} dims declared for {}-dimensional data",
                    dims.len(),
                    array.ndim()
                ));
            }
            let attrs = fields
                .remove("attrs")
                .map(|a| object_to_attrs(a).ok_or("'attrs' must be an object"))
                .transpose()?
                .unwrap_or_default();
            let mut variable = RawVariable::new(name, dims, array);
            variable.attrs = attrs;
            Ok(variable)
        }
        other => {
            let array = to_array(&other)?;
            Ok(RawVariable::new(name, default_dims(array.ndim()), array))
        }
    }
}

fn parse_dims(value: Value) -> Result<Vec<String>, String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                _ => Err("dims must be strings".to_string()),
            })
            .collect(),
        _ => Err("'dims' must be an array".to_string()),
    }
}

fn default_dims(ndim: usize) -> Vec<String> {
    match ndim {
        0 => Vec::new(),
        1 => vec!["index".to_string()],
        n => (0..n).map(|i| format!("dim_{i}")).collect(),
    }
}

/// Converts nested arrays into an n-dimensional array, checking that every
/// level is rectangular.
fn to_array(value: &Value) -> Result<ArrayD<f64>, String> {
    let mut shape = Vec::new();
    let mut cursor = value;
    while let Value::Array(items) = cursor {
        shape.push(items.len());
        match items.first() {
            Some(first) => cursor = first,
            None => break,
        }
    }

    let mut flat = Vec::new();
    flatten(value, &shape, 0, &mut flat)?;
    ArrayD::from_shape_vec(IxDyn(&shape), flat).map_err(|e| e.to_string())
}

fn flatten(value: &Value, shape: &[usize], depth: usize, out: &mut Vec<f64>) -> Result<(), String> {
    match value {
        Value::Array(items) => {
            if depth >= shape.len() || items.len() != shape[depth] {
                return Err("data is not rectangular".to_string());
            }
            items
                .iter()
                .try_for_each(|item| flatten(item, shape, depth + 1, out))
        }
        _ if depth != shape.len() => Err("data is not rectangular".to_string()),
        Value::Null => {
            out.push(f64::NAN);
            Ok(())
        }
        Value::Number(n) => {
            out.push(n.as_f64().ok_or("number out of range")?);
            Ok(())
        }
        Value::Bool(b) => {
            out.push(if *b { 1.0 } else { 0.0 });
            Ok(())
        }
        Value::String(s) => Err(format!("non-numeric value '{s}'")),
        Value::Object(_) => Err("unexpected object in data".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read(content: &str) -> Result<RawDataset, RetrievalError> {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("source.json");
        std::fs::write(&path, content).expect("write");
        JsonReader::new(Compression::None).read(&path)
    }

    #[test]
    fn test_read_structured_variables() {
        let raw = read(
            r#"{
                "attrs": { "instrument": "met" },
                "variables": {
                    "time": [0, 60, 120],
                    "temp": { "dims": ["time", "height"], "data": [[1, 2], [3, null], [5, 6]],
                              "attrs": { "units": "degC" } }
                }
            }"#,
        )
        .expect("read");
        assert_eq!(raw.attrs["instrument"], "met");
        let temp = raw.get("temp").expect("temp");
        assert_eq!(temp.data.shape(), &[3, 2]);
        assert_eq!(temp.dims, vec!["time", "height"]);
        assert!(temp.data[[1, 1]].is_nan());
        assert_eq!(temp.units(), Some("degC"));
        assert_eq!(raw.get("time").expect("time").dims, vec!["index"]);
    }

    #[test]
    fn test_flat_columns() {
        let raw = read(r#"{ "a": [1, 2], "b": 3 }"#).expect("read");
        assert_eq!(raw.get("a").expect("a").data.len(), 2);
        assert_eq!(raw.get("b").expect("b").data.ndim(), 0);
    }

    #[test]
    fn test_ragged_data_rejected() {
        let err = read(r#"{ "a": [[1, 2], [3]] }"#).expect_err("ragged");
        assert!(err.to_string().contains("rectangular"));
    }

    #[test]
    fn test_strings_rejected() {
        assert!(read(r#"{ "a": ["x"] }"#).is_err());
        assert!(read("[1, 2]").is_err());
    }
}
