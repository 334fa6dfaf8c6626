//! Pipeline orchestrator.
//!
//! Each unit runs through retrieval, standardization, quality control and
//! storage on its own task. A semaphore bounds how many units run at once,
//! and every unit sends exactly one [`UnitReport`] to a single aggregator
//! that builds the [`RunSummary`]. A failing unit never stops the others.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::config::RuntimeSettings;
use super::summary::{RunSummary, UnitReport};
use super::unit::UnitStage;
use crate::config::{load_pipeline, ValidatedPipeline};
use crate::dataset::Provenance;
use crate::error::{PipelineError, RetrievalError, UnitError};
use crate::quality::{run_checks, TestOutcome};
use crate::retriever::{classify_files, discover_units, retrieve, InputReference, UNMATCHED_UNIT};
use crate::standardize::standardize;
use crate::storage::{StorageHandler, StoredLocation};

/// Cancels units that have not yet reached storage.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A validated pipeline ready to process units.
pub struct Pipeline {
    config: Arc<ValidatedPipeline>,
    settings: RuntimeSettings,
    cancel: CancelHandle,
}

impl Pipeline {
    /// Applies the runtime overrides to `config`.
    pub fn new(config: ValidatedPipeline, settings: RuntimeSettings) -> Result<Self, PipelineError> {
        settings.validate()?;
        let mut config = config;
        config.storage = config.storage.map(|mut storage| {
            if let Some(root) = &settings.storage_root {
                storage.root = root.clone();
            }
            if let Some(overwrite) = settings.overwrite {
                storage.overwrite = overwrite;
            }
            storage
        });
        Ok(Self {
            config: Arc::new(config),
            settings,
            cancel: CancelHandle::new(),
        })
    }

    /// Loads the pipeline document at `path` with settings from the
    /// document and the environment.
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let config = load_pipeline(path)?;
        let settings = RuntimeSettings::from_document(&config.document.settings).with_env()?;
        Self::new(config, settings)
    }

    pub fn config(&self) -> &ValidatedPipeline {
        &self.config
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn input_root(&self) -> PathBuf {
        self.config
            .retriever
            .root
            .clone()
            .unwrap_or_else(|| self.config.base_dir.clone())
    }

    /// Groups every file under the retriever root into units.
    pub fn discover(&self) -> Result<Vec<InputReference>, RetrievalError> {
        discover_units(&self.config.retriever, &self.input_root(), self.config.name())
    }

    /// Groups explicitly named input files into units.
    pub fn units_for_files(&self, files: &[PathBuf]) -> Result<Vec<InputReference>, RetrievalError> {
        classify_files(&self.config.retriever, &self.input_root(), files, self.config.name())
    }

    /// Discovers units and processes all of them.
    pub async fn run(&self) -> RunSummary {
        let config = Arc::clone(&self.config);
        let root = self.input_root();
        let discovered = tokio::task::spawn_blocking(move || {
            discover_units(&config.retriever, &root, config.name())
        })
        .await;

        match discovered {
            Ok(Ok(units)) => self.run_units(units).await,
            Ok(Err(error)) => self.discovery_failure(error.into()),
            Err(join_error) => self.discovery_failure(UnitError::Internal(join_error.to_string())),
        }
    }

    fn discovery_failure(&self, error: UnitError) -> RunSummary {
        warn!(pipeline = %self.config.name(), error = %error, "Input discovery failed");
        let mut summary = RunSummary::new(Uuid::new_v4(), self.config.name(), Utc::now());
        summary.record(UnitReport::failed(
            UNMATCHED_UNIT,
            Vec::new(),
            UnitStage::Pending,
            &error,
            Duration::ZERO,
        ));
        summary.finished_at = Utc::now();
        summary
    }

    /// Processes `units` concurrently and collects their reports.
    pub async fn run_units(&self, units: Vec<InputReference>) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            pipeline = %self.config.name(),
            %run_id,
            units = units.len(),
            workers = self.settings.workers,
            "Starting pipeline run"
        );

        let (tx, mut rx) = mpsc::channel::<UnitReport>(units.len().max(1));
        let pipeline = self.config.name().to_string();
        let aggregator = tokio::spawn(async move {
            let mut summary = RunSummary::new(run_id, pipeline, started_at);
            while let Some(report) = rx.recv().await {
                summary.record(report);
            }
            summary
        });

        let semaphore = Arc::new(Semaphore::new(self.settings.workers));
        let mut expected = Vec::with_capacity(units.len());
        let mut handles = Vec::with_capacity(units.len());
        for unit in units {
            expected.push((unit.key.clone(), unit.all_files().cloned().collect::<Vec<_>>()));
            let worker = UnitWorker {
                config: Arc::clone(&self.config),
                cancel: self.cancel.clone(),
                run_id,
            };
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let report = match semaphore.acquire_owned().await {
                    Ok(_permit) => worker.process(unit).await,
                    Err(e) => {
                        let sources = unit.all_files().cloned().collect();
                        let error = UnitError::Internal(format!("worker pool closed: {e}"));
                        UnitReport::failed(&unit.key, sources, UnitStage::Pending, &error, Duration::ZERO)
                    }
                };
                if tx.send(report).await.is_err() {
                    warn!("Run summary aggregator stopped before all units reported");
                }
            }));
        }
        drop(tx);

        let results = futures::future::join_all(handles).await;
        let mut summary = match aggregator.await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "Run summary aggregator failed");
                RunSummary::new(run_id, self.config.name(), started_at)
            }
        };

        // Every unit appears in the summary, even when its task never reported.
        for ((key, sources), result) in expected.into_iter().zip(results) {
            if summary.units.contains_key(&key) {
                continue;
            }
            let message = match result {
                Err(join_error) => format!("unit task failed: {join_error}"),
                Ok(()) => "unit finished without a report".to_string(),
            };
            let error = UnitError::Internal(message);
            warn!(unit = %key, error = %error, "Unit did not report");
            summary.record(UnitReport::failed(&key, sources, UnitStage::Failed, &error, Duration::ZERO));
        }
        summary.finished_at = Utc::now();

        info!(
            pipeline = %summary.pipeline,
            succeeded = summary.stats.succeeded,
            partially_flagged = summary.stats.partially_flagged,
            failed = summary.stats.failed,
            "Pipeline run finished"
        );
        summary
    }
}

/// Everything one unit needs, owned so it can move onto its own task.
struct UnitWorker {
    config: Arc<ValidatedPipeline>,
    cancel: CancelHandle,
    run_id: Uuid,
}

impl UnitWorker {
    async fn process(self, unit: InputReference) -> UnitReport {
        let span = info_span!("unit", unit = %unit.key);
        async move {
            let started = Instant::now();
            let key = unit.key.clone();
            let sources: Vec<PathBuf> = unit.all_files().cloned().collect();
            let mut stage = UnitStage::Pending;

            match self.execute(unit, &mut stage).await {
                Ok((outcomes, location)) => {
                    let report = UnitReport::stored(&key, sources, &outcomes, location, started.elapsed());
                    info!(status = %report.status, "Unit finished");
                    report
                }
                Err(error) => {
                    warn!(stage = %stage, kind = %error.kind(), error = %error, "Unit failed");
                    UnitReport::failed(&key, sources, stage, &error, started.elapsed())
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Moves to `next`, unless the run was cancelled first.
    fn advance(&self, stage: &mut UnitStage, next: UnitStage) -> Result<(), UnitError> {
        if self.cancel.is_cancelled() {
            return Err(UnitError::Cancelled {
                stage: next.to_string(),
            });
        }
        debug!(from = %stage, to = %next, "Unit stage");
        *stage = next;
        Ok(())
    }

    async fn execute(
        &self,
        unit: InputReference,
        stage: &mut UnitStage,
    ) -> Result<(Vec<TestOutcome>, StoredLocation), UnitError> {
        let provenance = Provenance::new(self.run_id, self.config.name(), unit.key.clone())
            .with_sources(unit.all_files().cloned().collect());

        self.advance(stage, UnitStage::Retrieving)?;
        let config = Arc::clone(&self.config);
        let task = blocking(move || retrieve(&config.retriever, &unit));
        let raw = match self.config.retriever.timeout_seconds {
            Some(seconds) => tokio::time::timeout(Duration::from_secs(seconds), task)
                .await
                .map_err(|_| RetrievalError::Timeout { seconds })??,
            None => task.await?,
        };
        debug!(variables = raw.len(), files = raw.sources.len(), "Retrieved raw dataset");

        self.advance(stage, UnitStage::Standardizing)?;
        let config = Arc::clone(&self.config);
        let dataset = blocking(move || standardize(&config.dataset, &raw)).await?;

        self.advance(stage, UnitStage::QualityChecking)?;
        let config = Arc::clone(&self.config);
        let (dataset, outcomes) = blocking(move || run_checks(&config.quality, dataset)).await?;

        self.advance(stage, UnitStage::Storing)?;
        let config = Arc::clone(&self.config);
        let provenance = provenance.with_tests(outcomes.iter().map(|o| o.test.clone()).collect());
        let deadline = self
            .config
            .storage
            .timeout_seconds
            .map(|seconds| Instant::now() + Duration::from_secs(seconds));
        let location = blocking(move || {
            let mut handler = StorageHandler::new(&config.storage).with_provenance(provenance);
            if let Some(deadline) = deadline {
                handler = handler.with_deadline(deadline);
            }
            handler.store(&dataset)
        })
        .await?;

        // Past the durability point: cancellation no longer applies.
        *stage = UnitStage::Succeeded;
        Ok((outcomes, location))
    }
}

/// Runs a blocking stage off the async workers.
async fn blocking<T, E>(f: impl FnOnce() -> Result<T, E> + Send + 'static) -> Result<T, UnitError>
where
    T: Send + 'static,
    E: Into<UnitError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(Into::into),
        Err(e) => Err(UnitError::Internal(format!("stage task failed: {e}"))),
    }
}
