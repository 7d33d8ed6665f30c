//! Pipeline run errors
//!
//! Only failures that end a run surface here. Per-asset failures are
//! captured into results by the engine and never reach this type.

use crate::orchestrator::BatchRun;
use dicomflow_core::{ConfigError, NotificationError, StoreError};

/// Errors ending a batch run
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Listing failed; no asset was processed and nothing was published
    #[error("asset listing failed: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Processing completed but the completion event could not be published
    ///
    /// The completed run travels with the error; derived assets are kept.
    #[error("completion notification failed after {} results: {source}", .run.results.len())]
    Notification {
        #[source]
        source: NotificationError,
        run: Box<BatchRun>,
    },

    /// Run cancelled; carries the partial run when processing had started
    #[error("batch run cancelled")]
    Cancelled { run: Option<Box<BatchRun>> },

    /// Orchestrator built from an invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Run carried by this error, if processing had started
    #[must_use]
    pub fn run(&self) -> Option<&BatchRun> {
        match self {
            Self::Notification { run, .. } => Some(run),
            Self::Cancelled { run } => run.as_deref(),
            Self::StoreUnavailable(_) | Self::Config(_) => None,
        }
    }
}
