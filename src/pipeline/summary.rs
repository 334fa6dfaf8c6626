//! Run summary: the structured result of a pipeline run.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::unit::UnitStage;
use crate::error::{ErrorKind, UnitError};
use crate::quality::TestOutcome;
use crate::storage::StoredLocation;

/// Final outcome of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Succeeded,
    /// Stored, with at least one quality test reporting violations.
    PartiallyFlagged,
    Failed,
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitStatus::Succeeded => write!(f, "succeeded"),
            UnitStatus::PartiallyFlagged => write!(f, "partially_flagged"),
            UnitStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub kind: ErrorKind,
    /// Stage the unit was in when it failed.
    pub stage: UnitStage,
    pub message: String,
    /// Quality test that stopped the unit, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    pub test: String,
    pub check: String,
    pub violations: usize,
}

impl From<&TestOutcome> for TestSummary {
    fn from(outcome: &TestOutcome) -> Self {
        Self {
            test: outcome.test.clone(),
            check: outcome.check.clone(),
            violations: outcome.violations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReport {
    pub unit: String,
    pub status: UnitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<UnitFailure>,
    #[serde(default)]
    pub quality: Vec<TestSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<StoredLocation>,
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    pub duration_ms: u64,
}

impl UnitReport {
    fn base(unit: &str, sources: Vec<PathBuf>, status: UnitStatus, duration: Duration) -> Self {
        Self {
            unit: unit.to_string(),
            status,
            failure: None,
            quality: Vec::new(),
            output: None,
            sources,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// A stored unit; partially flagged when any test found violations.
    pub fn stored(
        unit: &str,
        sources: Vec<PathBuf>,
        outcomes: &[TestOutcome],
        output: StoredLocation,
        duration: Duration,
    ) -> Self {
        let status = if outcomes.iter().any(|o| !o.passed()) {
            UnitStatus::PartiallyFlagged
        } else {
            UnitStatus::Succeeded
        };
        let mut report = Self::base(unit, sources, status, duration);
        report.quality = outcomes.iter().map(TestSummary::from).collect();
        report.output = Some(output);
        report
    }

    pub fn failed(
        unit: &str,
        sources: Vec<PathBuf>,
        stage: UnitStage,
        error: &UnitError,
        duration: Duration,
    ) -> Self {
        let mut report = Self::base(unit, sources, UnitStatus::Failed, duration);
        let test = match error {
            UnitError::Quality(abort) => {
                report.quality = abort.completed.iter().map(TestSummary::from).collect();
                Some(abort.failure.test().to_string())
            }
            _ => None,
        };
        report.failure = Some(UnitFailure {
            kind: error.kind(),
            stage,
            message: error.to_string(),
            test,
        });
        report
    }
}

/// Counters over all units of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub total: u64,
    pub succeeded: u64,
    pub partially_flagged: u64,
    pub failed: u64,
    pub average_duration_ms: f64,
    /// Violations per quality test, summed over units.
    pub test_violations: BTreeMap<String, usize>,
    pub failures_by_kind: BTreeMap<String, u64>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, report: &UnitReport) {
        self.total += 1;
        match report.status {
            UnitStatus::Succeeded => self.succeeded += 1,
            UnitStatus::PartiallyFlagged => self.partially_flagged += 1,
            UnitStatus::Failed => self.failed += 1,
        }
        if let Some(failure) = &report.failure {
            *self.failures_by_kind.entry(failure.kind.to_string()).or_default() += 1;
        }
        for test in &report.quality {
            *self.test_violations.entry(test.test.clone()).or_default() += test.violations;
        }
        // Incremental average: avg = avg + (new - avg) / n
        let n = self.total as f64;
        self.average_duration_ms += (report.duration_ms as f64 - self.average_duration_ms) / n;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub pipeline: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub units: BTreeMap<String, UnitReport>,
    pub stats: RunStats,
}

impl RunSummary {
    pub fn new(run_id: Uuid, pipeline: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            pipeline: pipeline.into(),
            started_at,
            finished_at: started_at,
            units: BTreeMap::new(),
            stats: RunStats::new(),
        }
    }

    pub fn record(&mut self, report: UnitReport) {
        self.stats.record(&report);
        self.units.insert(report.unit.clone(), report);
    }

    /// True when no unit failed.
    pub fn is_success(&self) -> bool {
        self.stats.failed == 0
    }

    pub fn failed_units(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.values().filter(|u| u.status == UnitStatus::Failed)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
