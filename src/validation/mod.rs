//! Configuration validation.
//!
//! Every document is checked against the JSON Schema for its kind and then
//! against cross-field constraints before anything runs.

pub mod constraints;
pub mod schema_validator;

pub use constraints::SchemaValidationResult;
pub use schema_validator::{
    validate, validate_as, FieldViolation, SchemaError, SchemaKind, Validated, ValidatedConfig,
};
