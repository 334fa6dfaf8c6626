//! Command-line interface for ts-forge.
//!
//! Provides commands for running pipelines, validating pipeline documents,
//! and inspecting or fetching stored datasets.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
