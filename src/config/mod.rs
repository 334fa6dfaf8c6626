//! Typed configuration documents.
//!
//! A pipeline is described by one pipeline document referencing four
//! sub-documents. The structs here are plain serde types; they only become
//! trustworthy after passing through [`crate::validation`], which
//! [`loader::load_pipeline`] does for all five.

pub mod dataset;
pub mod loader;
pub mod pipeline;
pub mod quality;
pub mod retriever;
pub mod storage;

pub use dataset::{ConversionConfig, ConversionRule, DatasetConfig, NameList, SourceMapping, VariableConfig};
pub use loader::{load_pipeline, load_pipeline_str, ValidatedPipeline};
pub use pipeline::{ComponentRef, PipelineDocument, SettingsDocument};
pub use quality::{CheckKind, Direction, HandlerKind, QualityConfig, QualityTest, ALL_VARIABLES};
pub use retriever::{Compression, CsvOptions, Grouping, ParserConfig, RetrieverConfig, SourceConfig};
pub use storage::{OutputFormat, StorageConfig};
