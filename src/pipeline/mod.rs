//! Pipeline orchestration.
//!
//! A run discovers input units, then drives each one through the four
//! stages on its own task:
//!
//! 1. **Retrieval**: read and merge the unit's source files
//! 2. **Standardization**: map raw variables onto the declared dataset
//! 3. **Quality control**: run the configured tests and handlers
//! 4. **Storage**: write the dataset atomically under the storage root
//!
//! Units are independent. A failure in one is recorded in the
//! [`RunSummary`] and never stops the rest of the run.
//!
//! # Example
//!
//! ```rust,ignore
//! use ts_forge::pipeline::Pipeline;
//!
//! let pipeline = Pipeline::from_file(Path::new("pipelines/met/pipeline.yaml"))?;
//! let summary = pipeline.run().await;
//!
//! for report in summary.failed_units() {
//!     println!("{} failed: {:?}", report.unit, report.failure);
//! }
//! ```
//!
//! # Configuration
//!
//! Worker count, storage root and overwrite policy come from the pipeline
//! document's `settings` block, then the `TSFORGE_*` environment variables,
//! then the command line.

pub mod config;
pub mod orchestrator;
pub mod summary;
pub mod unit;

pub use config::{ConfigError, RuntimeSettings};
pub use orchestrator::{CancelHandle, Pipeline};
pub use summary::{RunStats, RunSummary, TestSummary, UnitFailure, UnitReport, UnitStatus};
pub use unit::UnitStage;
