//! Pipeline orchestrator
//!
//! Drives one batch run through `Idle → Listing → Processing → Notifying → Done`,
//! short-circuiting `Listing → Done` when nothing is eligible. No state is
//! revisited and nothing is carried between runs apart from the store
//! contents and the optional ledger.

use crate::engine::ProcessingEngine;
use crate::error::PipelineError;
use crate::lister::AssetLister;
use crate::notifier::{CompletionNotifier, CompletionSummary};
use crate::steps::TransformChain;
use dicomflow_core::{
    CancelSignal, NotificationSink, ObjectStore, PipelineConfig, ProcessedLedger,
    ProcessingResult, ProcessingStatus, PublishAck, RunId, StoreError,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Batch run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Not started
    Idle,
    /// Listing eligible assets
    Listing,
    /// Processing assets
    Processing,
    /// Publishing the completion event
    Notifying,
    /// Finished
    Done,
}

impl RunState {
    /// Check if `next` is a legal successor
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Listing)
                | (Self::Listing, Self::Processing | Self::Done)
                | (Self::Processing, Self::Notifying)
                | (Self::Notifying, Self::Done)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Listing => "listing",
            Self::Processing => "processing",
            Self::Notifying => "notifying",
            Self::Done => "done",
        };
        f.write_str(label)
    }
}

/// Report of one batch run
#[derive(Debug, Clone)]
pub struct BatchRun {
    /// Run identifier
    pub run_id: RunId,
    /// One result per eligible asset, in listing order
    pub results: Vec<ProcessingResult>,
    /// States visited, starting with `Idle`
    pub states: Vec<RunState>,
    /// Sink acknowledgement, when a notification was published
    pub notification: Option<PublishAck>,
    /// Wall-clock duration
    pub elapsed: Duration,
}

impl BatchRun {
    fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            results: Vec::new(),
            states: vec![RunState::Idle],
            notification: None,
            elapsed: Duration::ZERO,
        }
    }

    fn advance(&mut self, next: RunState) {
        let current = self.state();
        debug_assert!(
            current.can_advance_to(next),
            "illegal transition {current} -> {next}"
        );
        tracing::debug!("Run state {} -> {}", current, next);
        self.states.push(next);
    }

    /// Latest state
    #[must_use]
    pub fn state(&self) -> RunState {
        self.states.last().copied().unwrap_or(RunState::Idle)
    }

    /// Count results with `status`
    #[must_use]
    pub fn count(&self, status: ProcessingStatus) -> usize {
        self.results.iter().filter(|r| r.status() == status).count()
    }

    /// Succeeded results
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(ProcessingStatus::Succeeded)
    }

    /// Skipped results
    #[inline]
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(ProcessingStatus::Skipped)
    }

    /// Failed results
    #[inline]
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(ProcessingStatus::Failed)
    }

    /// Grouped summary, as sent in the completion event
    #[must_use]
    pub fn summary(&self) -> CompletionSummary {
        CompletionSummary::from_results(&self.results)
    }
}

/// Sequences lister, engine and notifier for one batch run
#[derive(Debug, Clone)]
pub struct PipelineOrchestrator {
    lister: AssetLister,
    engine: ProcessingEngine,
    notifier: CompletionNotifier,
    eligible_suffix: String,
}

impl PipelineOrchestrator {
    /// Create orchestrator from configuration and collaborators
    ///
    /// # Errors
    /// `ConfigError::Invalid` if the configuration violates a constraint
    pub fn new(
        config: &PipelineConfig,
        store: Arc<dyn ObjectStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        Ok(Self {
            lister: AssetLister::new(store.clone(), config),
            engine: ProcessingEngine::new(store, config),
            notifier: CompletionNotifier::new(sink, config),
            eligible_suffix: config.eligible_suffix.clone(),
        })
    }

    /// With transformation chain
    #[must_use]
    pub fn with_chain(mut self, chain: TransformChain) -> Self {
        self.engine = self.engine.with_chain(chain);
        self
    }

    /// With processed ledger
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn ProcessedLedger>) -> Self {
        self.engine = self.engine.with_ledger(ledger);
        self
    }

    /// Execute one batch run
    ///
    /// # Errors
    /// See [`PipelineOrchestrator::run_with_cancel`]
    pub async fn run(&self) -> Result<BatchRun, PipelineError> {
        self.run_with_cancel(&CancelSignal::new()).await
    }

    /// Execute one batch run under a cancellation signal
    ///
    /// # Workflow
    /// 1. List eligible assets (empty list ends the run, nothing published)
    /// 2. Process every asset, isolating failures
    /// 3. Publish one completion event
    ///
    /// # Errors
    /// - `StoreUnavailable` if listing fails; nothing processed or published
    /// - `Notification` if publishing fails; the completed run is attached
    /// - `Cancelled` if the signal fires; the partial run is attached once
    ///   processing started
    pub async fn run_with_cancel(&self, cancel: &CancelSignal) -> Result<BatchRun, PipelineError> {
        let run_id = RunId::new();
        let span = tracing::info_span!("batch_run", %run_id, bucket = %self.lister.bucket());
        self.execute(run_id, cancel).instrument(span).await
    }

    async fn execute(
        &self,
        run_id: RunId,
        cancel: &CancelSignal,
    ) -> Result<BatchRun, PipelineError> {
        let started = Instant::now();
        let mut run = BatchRun::new(run_id);
        tracing::info!("Starting batch run");

        // 1. List
        run.advance(RunState::Listing);
        let assets = match self.lister.list_eligible(&self.eligible_suffix, cancel).await {
            Ok(assets) => assets,
            Err(StoreError::Cancelled) => return Err(PipelineError::Cancelled { run: None }),
            Err(e) => return Err(PipelineError::StoreUnavailable(e)),
        };

        if assets.is_empty() {
            tracing::info!("No eligible assets found");
            run.advance(RunState::Done);
            run.elapsed = started.elapsed();
            return Ok(run);
        }

        // 2. Process
        run.advance(RunState::Processing);
        run.results = self.engine.process(&assets, cancel).await;
        tracing::info!(
            "Processed {} assets: {} succeeded, {} skipped, {} failed",
            run.results.len(),
            run.succeeded(),
            run.skipped(),
            run.failed()
        );

        if cancel.is_cancelled() {
            run.elapsed = started.elapsed();
            tracing::warn!("Batch run cancelled after processing");
            return Err(PipelineError::Cancelled {
                run: Some(Box::new(run)),
            });
        }

        // 3. Notify
        run.advance(RunState::Notifying);
        match self.notifier.notify(&run.results, cancel).await {
            Ok(ack) => {
                run.notification = Some(ack);
                run.advance(RunState::Done);
                run.elapsed = started.elapsed();
                tracing::info!("Batch run completed in {:?}", run.elapsed);
                Ok(run)
            }
            Err(source) => {
                run.elapsed = started.elapsed();
                Err(PipelineError::Notification {
                    source,
                    run: Box::new(run),
                })
            }
        }
    }
}
