//! dicomflow Pipeline
//!
//! The batch path: list eligible assets, process each one in isolation,
//! publish one completion event.
//!
//! - [`AssetLister`]: suffix-filtered listing with retry
//! - [`ProcessingEngine`]: bounded-concurrency, panic-isolated processing
//! - [`CompletionNotifier`]: single aggregate notification per run
//! - [`PipelineOrchestrator`]: sequences the three and reports a [`BatchRun`]
//!
//! # Example
//!
//! ```rust,ignore
//! use dicomflow_pipeline::PipelineOrchestrator;
//!
//! let orchestrator = PipelineOrchestrator::new(&config.pipeline, store, sink)?;
//! let run = orchestrator.run().await?;
//! println!("{} succeeded, {} failed", run.succeeded(), run.failed());
//! ```

#![warn(unreachable_pub)]

pub mod engine;
pub mod error;
pub mod lister;
pub mod notifier;
pub mod orchestrator;
pub mod steps;

pub use engine::ProcessingEngine;
pub use error::PipelineError;
pub use lister::AssetLister;
pub use notifier::{CompletionNotifier, CompletionSummary};
pub use orchestrator::{BatchRun, PipelineOrchestrator, RunState};
pub use steps::{
    AssetData, DicomPreamble, ParityPasses, ProvenanceStamp, RejectEmpty, TransformChain,
    TransformStep,
};
