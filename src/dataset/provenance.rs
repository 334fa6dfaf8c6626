use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a stored dataset was produced. Kept out of the measurement data so
/// that the data content stays reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub run_id: Uuid,
    pub pipeline: String,
    pub unit: String,
    pub sources: Vec<PathBuf>,
    /// Quality tests applied, in order.
    pub tests: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub tool_version: String,
}

impl Provenance {
    pub fn new(run_id: Uuid, pipeline: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            run_id,
            pipeline: pipeline.into(),
            unit: unit.into(),
            sources: Vec::new(),
            tests: Vec::new(),
            created_at: Utc::now(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_sources(mut self, sources: Vec<PathBuf>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_tests(mut self, tests: Vec<String>) -> Self {
        self.tests = tests;
        self
    }
}
