//! In-memory datasets.
//!
//! A [`RawDataset`] is whatever the retriever could read, keyed by the names
//! used in the source files. A [`Dataset`] is the canonical form produced by
//! the standardizer: coordinate and data variables with declared dimensions,
//! data types, fill values, attributes and a parallel quality-flag array.

pub mod flags;
mod provenance;
mod raw;

use std::collections::BTreeMap;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use provenance::Provenance;
pub use raw::{RawDataset, RawVariable};

/// Storage type of a canonical variable.
///
/// Values are held as `f64` in memory; the data type bounds what values are
/// representable and how they are rounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Float64,
    Float32,
    Int64,
    Int32,
    Int16,
    Int8,
    Uint8,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Float64 => "float64",
            DataType::Float32 => "float32",
            DataType::Int64 => "int64",
            DataType::Int32 => "int32",
            DataType::Int16 => "int16",
            DataType::Int8 => "int8",
            DataType::Uint8 => "uint8",
        }
    }

    pub fn is_integer(&self) -> bool {
        !matches!(self, DataType::Float64 | DataType::Float32)
    }

    /// Inclusive range of values the type can hold.
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            DataType::Float64 => (f64::MIN, f64::MAX),
            DataType::Float32 => (f64::from(f32::MIN), f64::from(f32::MAX)),
            DataType::Int64 => (i64::MIN as f64, i64::MAX as f64),
            DataType::Int32 => (f64::from(i32::MIN), f64::from(i32::MAX)),
            DataType::Int16 => (f64::from(i16::MIN), f64::from(i16::MAX)),
            DataType::Int8 => (f64::from(i8::MIN), f64::from(i8::MAX)),
            DataType::Uint8 => (0.0, f64::from(u8::MAX)),
        }
    }

    pub fn can_represent(&self, value: f64) -> bool {
        let (lo, hi) = self.bounds();
        value.is_finite()
            && value >= lo
            && value <= hi
            && (!self.is_integer() || value.fract() == 0.0)
    }

    /// Rounds `value` the way a store of this type would.
    pub fn cast(&self, value: f64) -> f64 {
        match self {
            DataType::Float64 => value,
            DataType::Float32 => f64::from(value as f32),
            _ => value.trunc(),
        }
    }

    /// Fill value used when a variable does not declare one.
    pub fn default_fill(&self) -> f64 {
        match self {
            DataType::Uint8 => f64::from(u8::MAX),
            DataType::Int8 => f64::from(i8::MIN),
            _ => -9999.0,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One canonical variable: data, dimensions, attributes and flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub dims: Vec<String>,
    pub dtype: DataType,
    pub data: ArrayD<f64>,
    /// Quality flags, same shape as `data`.
    pub flags: ArrayD<u32>,
    pub attrs: BTreeMap<String, Value>,
    pub fill_value: Option<f64>,
}

impl Variable {
    /// Creates a variable with clean flags.
    pub fn new(
        name: impl Into<String>,
        dims: Vec<String>,
        dtype: DataType,
        data: ArrayD<f64>,
    ) -> Self {
        let flags = ArrayD::zeros(data.raw_dim());
        Self {
            name: name.into(),
            dims,
            dtype,
            data,
            flags,
            attrs: BTreeMap::new(),
            fill_value: None,
        }
    }

    pub fn with_fill_value(mut self, fill_value: f64) -> Self {
        self.fill_value = Some(fill_value);
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// True when `value` is NaN or equal to this variable's fill value.
    pub fn is_missing(&self, value: f64) -> bool {
        value.is_nan() || self.fill_value == Some(value)
    }

    /// Value written in place of corrected positions.
    pub fn fill_or_nan(&self) -> f64 {
        self.fill_value.unwrap_or(f64::NAN)
    }

    pub fn units(&self) -> Option<&str> {
        self.attrs.get("units").and_then(Value::as_str)
    }

    /// Numeric attribute lookup; strings holding numbers are accepted.
    pub fn numeric_attr(&self, key: &str) -> Option<f64> {
        match self.attrs.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Number of positions with any flag bit set.
    pub fn flagged_count(&self) -> usize {
        self.flags.iter().filter(|f| **f != 0).count()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The canonical dataset for one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub attrs: BTreeMap<String, Value>,
    pub coords: BTreeMap<String, Variable>,
    pub data_vars: BTreeMap<String, Variable>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a data variable first, then a coordinate.
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.data_vars.get(name).or_else(|| self.coords.get(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Variable> {
        if self.data_vars.contains_key(name) {
            self.data_vars.get_mut(name)
        } else {
            self.coords.get_mut(name)
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates coordinates then data variables.
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.coords.values().chain(self.data_vars.values())
    }

    /// Length of each dimension, taken from the coordinates.
    pub fn dims(&self) -> BTreeMap<String, usize> {
        let mut dims = BTreeMap::new();
        for var in self.variables() {
            for (dim, len) in var.dims.iter().zip(var.data.shape()) {
                dims.entry(dim.clone()).or_insert(*len);
            }
        }
        dims
    }

    /// Attribute rendered as text: strings verbatim, other scalars via JSON.
    pub fn attr_string(&self, key: &str) -> Option<String> {
        match self.attrs.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn datastream(&self) -> Option<String> {
        self.attr_string("datastream")
    }

    /// Minimum and maximum finite value of `coord`.
    pub fn time_bounds(&self, coord: &str) -> Option<(f64, f64)> {
        let var = self.coords.get(coord).or_else(|| self.data_vars.get(coord))?;
        var.data
            .iter()
            .copied()
            .filter(|v| v.is_finite() && !var.is_missing(*v))
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, IxDyn};

    fn temperature() -> Variable {
        Variable::new(
            "temperature",
            vec!["time".to_string()],
            DataType::Float32,
            arr1(&[10.0, -9999.0, 12.0]).into_dyn(),
        )
        .with_fill_value(-9999.0)
        .with_attr("units", "degC")
    }

    #[test]
    fn test_data_type_cast_and_bounds() {
        assert_eq!(DataType::Int16.cast(12.9), 12.0);
        assert_eq!(DataType::Float64.cast(0.1), 0.1);
        assert!(DataType::Uint8.can_represent(255.0));
        assert!(!DataType::Uint8.can_represent(-1.0));
        assert!(!DataType::Int32.can_represent(1.5));
        assert_eq!(DataType::Uint8.default_fill(), 255.0);
    }

    #[test]
    fn test_data_type_serde_names() {
        let dtype: DataType = serde_json::from_str("\"uint8\"").expect("parse");
        assert_eq!(dtype, DataType::Uint8);
        assert_eq!(DataType::Float32.to_string(), "float32");
    }

    #[test]
    fn test_variable_missing() {
        let var = temperature();
        assert!(var.is_missing(-9999.0));
        assert!(var.is_missing(f64::NAN));
        assert!(!var.is_missing(10.0));
        assert_eq!(var.units(), Some("degC"));
        assert_eq!(var.flags.shape(), &[3]);
    }

    #[test]
    fn test_dataset_lookup_and_bounds() {
        let mut ds = Dataset::new();
        ds.coords.insert(
            "time".to_string(),
            Variable::new(
                "time",
                vec!["time".to_string()],
                DataType::Float64,
                arr1(&[30.0, 10.0, 20.0]).into_dyn(),
            ),
        );
        ds.data_vars.insert("temperature".to_string(), temperature());
        ds.attrs
            .insert("datastream".to_string(), Value::from("sgp.met.b1"));

        assert!(ds.contains("time"));
        assert!(ds.contains("temperature"));
        assert_eq!(ds.time_bounds("time"), Some((10.0, 30.0)));
        assert_eq!(ds.dims().get("time"), Some(&3));
        assert_eq!(ds.datastream().as_deref(), Some("sgp.met.b1"));

        ds.get_mut("temperature").expect("var").flags[IxDyn(&[1])] = 1;
        assert_eq!(ds.get("temperature").expect("var").flagged_count(), 1);
    }
}
