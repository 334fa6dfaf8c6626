//! Error types for ts-forge operations.
//!
//! One enum per pipeline stage. Everything except configuration errors is
//! scoped to a single unit of input and is caught by the orchestrator at the
//! unit boundary:
//! - Input discovery and decoding ([`RetrievalError`])
//! - Mapping raw data onto the declared dataset ([`StandardizationError`])
//! - Quality tests that abort a unit ([`QualityFailure`], [`QualityAbort`])
//! - Writing and reading stored output ([`StorageError`])
//! - Loading pipeline documents ([`PipelineError`])

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::config::ConfigError;
use crate::quality::TestOutcome;
use crate::validation::SchemaError;

/// Errors raised while discovering or reading raw input sources.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("No input files matched any source pattern for unit '{unit}'")]
    NoInputs { unit: String },

    #[error("Source '{source_name}' matched no files for unit '{unit}'")]
    SourceUnmatched { source_name: String, unit: String },

    #[error("File '{path}' does not match any declared source")]
    UnknownInput { path: PathBuf },

    #[error("Failed to decode '{path}' as {format}: {message}")]
    Decode {
        path: PathBuf,
        format: String,
        message: String,
    },

    #[error("Variable '{variable}' is provided by both '{first}' and '{second}'")]
    Collision {
        variable: String,
        first: String,
        second: String,
    },

    #[error("Shared variable '{variable}' differs between '{first}' and '{second}'")]
    SharedMismatch {
        variable: String,
        first: String,
        second: String,
    },

    #[error("Invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("Retrieval timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("IO error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RetrievalError {
    pub(crate) fn decode(path: &std::path::Path, format: &str, message: impl ToString) -> Self {
        RetrievalError::Decode {
            path: path.to_path_buf(),
            format: format.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        RetrievalError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Errors raised while mapping a raw dataset onto the declared dataset.
#[derive(Debug, Error)]
pub enum StandardizationError {
    #[error("No source for variable '{variable}' (tried: {tried})")]
    MissingSource { variable: String, tried: String },

    #[error("No conversion rule from '{from}' to '{to}' for variable '{variable}'")]
    NoConversion {
        variable: String,
        from: String,
        to: String,
    },

    #[error("Variable '{variable}' has length {found} along '{dim}', expected {expected}")]
    LengthMismatch {
        variable: String,
        dim: String,
        expected: usize,
        found: usize,
    },

    #[error("Cannot align variable '{variable}' with shape {found:?} onto dims {dims:?}")]
    ShapeMismatch {
        variable: String,
        dims: Vec<String>,
        found: Vec<usize>,
    },

    #[error("Coordinate '{variable}' contains non-finite values")]
    InvalidCoordinate { variable: String },
}

/// A quality test that stops its unit.
#[derive(Debug, Error)]
pub enum QualityFailure {
    /// `violations` counts every violating position of the test, summed
    /// over all of its target variables.
    #[error("Quality test '{test}' failed on {} with {violations} violation(s)", quoted(.variables))]
    HandlerTriggered {
        test: String,
        variables: Vec<String>,
        violations: usize,
    },

    #[error("Quality test '{test}' targets variable '{variable}' which is not in the dataset")]
    MissingVariable { test: String, variable: String },

    #[error("Quality test '{test}' cannot run along dimension '{dim}' of '{variable}'")]
    UnknownDimension {
        test: String,
        variable: String,
        dim: String,
    },
}

fn quoted(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!("'{name}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A quality run stopped by a failure, with the outcomes of the tests that
/// ran before it. For [`QualityFailure::HandlerTriggered`] the last outcome
/// is the failing test's own.
#[derive(Debug, Error)]
#[error("{failure}")]
pub struct QualityAbort {
    #[source]
    pub failure: QualityFailure,
    pub completed: Vec<TestOutcome>,
}

impl From<QualityFailure> for QualityAbort {
    fn from(failure: QualityFailure) -> Self {
        Self {
            failure,
            completed: Vec::new(),
        }
    }
}

impl From<QualityFailure> for UnitError {
    fn from(failure: QualityFailure) -> Self {
        UnitError::Quality(failure.into())
    }
}

impl QualityFailure {
    /// Name of the test that produced this failure.
    pub fn test(&self) -> &str {
        match self {
            QualityFailure::HandlerTriggered { test, .. }
            | QualityFailure::MissingVariable { test, .. }
            | QualityFailure::UnknownDimension { test, .. } => test,
        }
    }
}

/// Errors raised while writing or reading stored datasets.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Naming template references attribute '{0}' which the dataset does not have")]
    MissingAttribute(String),

    #[error("Time coordinate '{0}' is missing or empty")]
    MissingTimeCoordinate(String),

    #[error("Invalid naming template '{template}': {message}")]
    Template { template: String, message: String },

    #[error("Output '{0}' already exists and overwrite is disabled")]
    AlreadyExists(PathBuf),

    #[error("{format} output does not support {message}")]
    Unsupported { format: String, message: String },

    #[error("Stored file '{path}' is malformed: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("Storage timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("IO error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

impl StorageError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Errors raised before any unit runs.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse '{path}': {message}")]
    Parse { path: PathBuf, message: String },
}

/// Everything that can end a unit in the `Failed` state.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Standardization(#[from] StandardizationError),

    #[error(transparent)]
    Quality(#[from] QualityAbort),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Unit cancelled before {stage}")]
    Cancelled { stage: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UnitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UnitError::Retrieval(_) => ErrorKind::Retrieval,
            UnitError::Standardization(_) => ErrorKind::Standardization,
            UnitError::Quality(_) => ErrorKind::Quality,
            UnitError::Storage(_) => ErrorKind::Storage,
            UnitError::Cancelled { .. } => ErrorKind::Cancelled,
            UnitError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Category of a unit failure as reported in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Retrieval,
    Standardization,
    Quality,
    Storage,
    Cancelled,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Retrieval => write!(f, "retrieval"),
            ErrorKind::Standardization => write!(f, "standardization"),
            ErrorKind::Quality => write!(f, "quality"),
            ErrorKind::Storage => write!(f, "storage"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_error_kinds() {
        let err: UnitError = RetrievalError::NoInputs {
            unit: "20240101".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Retrieval);

        let err: UnitError = QualityFailure::HandlerTriggered {
            test: "temp_range".to_string(),
            variables: vec!["temperature".to_string(), "dew_point".to_string()],
            violations: 3,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Quality);
        assert!(err.to_string().contains("temp_range"));
        assert!(err.to_string().contains("'temperature', 'dew_point'"));
        assert!(err.to_string().contains("3 violation"));
    }

    #[test]
    fn test_quality_failure_names_test() {
        let failure = QualityFailure::MissingVariable {
            test: "wind_check".to_string(),
            variable: "wind_speed".to_string(),
        };
        assert_eq!(failure.test(), "wind_check");
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::Standardization.to_string(), "standardization");
        let json = serde_json::to_string(&ErrorKind::Storage).expect("serialize");
        assert_eq!(json, "\"storage\"");
    }
}
