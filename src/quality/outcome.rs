use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Result of one quality test over all of its target variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub test: String,
    pub check: String,
    pub violations: usize,
    /// Violating positions per variable, as multi-dimensional indices.
    pub affected: BTreeMap<String, Vec<Vec<usize>>>,
}

impl TestOutcome {
    pub fn new(test: impl Into<String>, check: impl Into<String>) -> Self {
        Self {
            test: test.into(),
            check: check.into(),
            ..Default::default()
        }
    }

    pub fn record(&mut self, variable: &str, positions: Vec<Vec<usize>>) {
        self.violations += positions.len();
        self.affected.insert(variable.to_string(), positions);
    }

    pub fn passed(&self) -> bool {
        self.violations == 0
    }
}
