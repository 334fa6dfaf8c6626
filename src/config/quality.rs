//! Quality configuration: an ordered list of tests and their handlers.

use serde::{Deserialize, Serialize};

use crate::dataset::flags::{bit_mask, DELTA_FLAG, MISSING_FLAG, MONOTONIC_FLAG, RANGE_FLAG};

/// Target keyword that expands to every data variable.
pub const ALL_VARIABLES: &str = "ALL";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default)]
    pub tests: Vec<QualityTest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityTest {
    pub name: String,
    /// Variables to check, or `[ALL]`.
    pub variables: Vec<String>,
    /// Removed from the expansion of `ALL`.
    #[serde(default)]
    pub exclude: Vec<String>,
    pub check: CheckKind,
    pub handlers: Vec<HandlerKind>,
    /// 1-based flag bit; defaults to the check's own flag.
    #[serde(default)]
    pub bit: Option<u8>,
    #[serde(default)]
    pub description: Option<String>,
    /// Severity label of a violation, e.g. `bad` or `indeterminate`.
    #[serde(default)]
    pub assessment: Option<String>,
}

impl QualityTest {
    /// Flag mask recorded at violating positions.
    pub fn flag(&self) -> u32 {
        match self.bit {
            Some(bit) => bit_mask(bit),
            None => self.check.default_flag(),
        }
    }

    pub fn targets_all(&self) -> bool {
        self.variables.iter().any(|v| v == ALL_VARIABLES)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Increasing,
    Decreasing,
}

/// Detection predicate of a test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckKind {
    /// Values outside `[min, max]`.
    Range {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    /// Like `range`, with bounds read from `valid_min`/`valid_max` attributes.
    ValidRange,
    /// NaN or fill-valued positions.
    Missing,
    Monotonic {
        #[serde(default)]
        direction: Direction,
        #[serde(default)]
        strict: bool,
        #[serde(default)]
        dim: Option<String>,
    },
    /// Steps from the previous valid value larger than `max_delta`.
    Delta {
        max_delta: f64,
        #[serde(default)]
        dim: Option<String>,
    },
}

impl CheckKind {
    pub fn name(&self) -> &'static str {
        match self {
            CheckKind::Range { .. } => "range",
            CheckKind::ValidRange => "valid_range",
            CheckKind::Missing => "missing",
            CheckKind::Monotonic { .. } => "monotonic",
            CheckKind::Delta { .. } => "delta",
        }
    }

    pub fn default_flag(&self) -> u32 {
        match self {
            CheckKind::Range { .. } | CheckKind::ValidRange => RANGE_FLAG,
            CheckKind::Missing => MISSING_FLAG,
            CheckKind::Monotonic { .. } => MONOTONIC_FLAG,
            CheckKind::Delta { .. } => DELTA_FLAG,
        }
    }
}

/// Corrective action applied to every violating position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerKind {
    Flag,
    ReplaceWithFill,
    Interpolate,
    FailPipeline,
}

impl HandlerKind {
    pub fn name(&self) -> &'static str {
        match self {
            HandlerKind::Flag => "flag",
            HandlerKind::ReplaceWithFill => "replace_with_fill",
            HandlerKind::Interpolate => "interpolate",
            HandlerKind::FailPipeline => "fail_pipeline",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quality_yaml() {
        let yaml = r#"
tests:
  - name: temperature_range
    variables: [temperature]
    check: { type: range, min: 0, max: 20 }
    handlers: [ { type: flag } ]
  - name: missing
    variables: [ALL]
    exclude: [qc_only]
    check: { type: missing }
    handlers: [ { type: replace_with_fill } ]
  - name: time_order
    variables: [time]
    check: { type: monotonic, strict: true }
    handlers: [ { type: fail_pipeline } ]
    bit: 7
"#;
        let config: QualityConfig = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(config.tests.len(), 3);
        assert_eq!(config.tests[0].flag(), RANGE_FLAG);
        assert!(config.tests[1].targets_all());
        assert_eq!(config.tests[1].handlers, vec![HandlerKind::ReplaceWithFill]);
        assert_eq!(config.tests[2].flag(), 1 << 6);
        assert!(matches!(
            config.tests[2].check,
            CheckKind::Monotonic { direction: Direction::Increasing, strict: true, dim: None }
        ));
    }
}
