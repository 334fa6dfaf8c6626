//! ts-forge: config-driven ingestion pipeline for time-series scientific data.
//!
//! Raw instrument files are retrieved, standardized onto a declared dataset
//! layout, quality-controlled with per-point flags, and stored as
//! self-describing JSON or Parquet files. Every stage is driven by YAML
//! documents validated against embedded JSON schemas.

pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod pipeline;
pub mod quality;
pub mod retriever;
pub mod standardize;
pub mod storage;
pub mod validation;

// Re-export commonly used error types
pub use error::{
    ErrorKind, PipelineError, QualityAbort, QualityFailure, RetrievalError, StandardizationError, StorageError,
    UnitError,
};
