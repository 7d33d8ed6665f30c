//! Processing engine
//!
//! Processes a batch of assets with bounded concurrency:
//! - Each asset runs on its own task, so a panicking step fails only
//!   that asset
//! - At most `worker_count` assets are in flight at once
//! - Results come back in input order, one per input asset
//!
//! The engine never returns an error; every failure is captured in the
//! result of the asset that raised it.

use crate::steps::{AssetData, TransformChain};
use chrono::Utc;
use dicomflow_core::{
    guarded, Asset, AssetProcessingError, CancelSignal, Fingerprint, LedgerEntry, ObjectStore,
    PipelineConfig, ProcessedLedger, ProcessingResult, SkipReason,
};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;

/// Batch processing engine
#[derive(Clone)]
pub struct ProcessingEngine {
    store: Arc<dyn ObjectStore>,
    chain: Arc<TransformChain>,
    ledger: Option<Arc<dyn ProcessedLedger>>,
    bucket: String,
    marker: String,
    worker_count: usize,
    call_timeout: Duration,
    asset_timeout: Duration,
}

impl std::fmt::Debug for ProcessingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingEngine")
            .field("bucket", &self.bucket)
            .field("marker", &self.marker)
            .field("worker_count", &self.worker_count)
            .field("chain", &self.chain)
            .field("ledger", &self.ledger.is_some())
            .finish_non_exhaustive()
    }
}

impl ProcessingEngine {
    /// Create engine with the standard transformation chain and no ledger
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, config: &PipelineConfig) -> Self {
        Self {
            store,
            chain: Arc::new(TransformChain::standard()),
            ledger: None,
            bucket: config.bucket.clone(),
            marker: config.processed_marker.clone(),
            worker_count: config.worker_count.max(1),
            call_timeout: config.call_timeout(),
            asset_timeout: config.asset_timeout(),
        }
    }

    /// With transformation chain
    #[inline]
    #[must_use]
    pub fn with_chain(mut self, chain: TransformChain) -> Self {
        self.chain = Arc::new(chain);
        self
    }

    /// With processed ledger
    #[inline]
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn ProcessedLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Maximum assets in flight
    #[inline]
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Process every asset, returning one result per asset in input order
    pub async fn process(&self, assets: &[Asset], cancel: &CancelSignal) -> Vec<ProcessingResult> {
        tracing::debug!(
            "Processing {} assets with {} workers",
            assets.len(),
            self.worker_count
        );

        let mut indexed: Vec<(usize, ProcessingResult)> =
            stream::iter(assets.iter().cloned().enumerate())
                .map(|(index, asset)| {
                    let engine = self.clone();
                    let cancel = cancel.clone();
                    async move {
                        let key = asset.key.clone();
                        let handle =
                            tokio::spawn(async move { engine.process_one(&asset, &cancel).await });
                        let result = match handle.await {
                            Ok(result) => result,
                            Err(join_error) => {
                                let error = join_failure(join_error);
                                tracing::error!("Error processing {}: {}", key, error);
                                ProcessingResult::failed(key, error)
                            }
                        };
                        (index, result)
                    }
                })
                .buffer_unordered(self.worker_count)
                .collect()
                .await;

        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, result)| result).collect()
    }

    /// Process one asset; never fails
    pub async fn process_one(&self, asset: &Asset, cancel: &CancelSignal) -> ProcessingResult {
        if asset.carries_marker(&self.marker) {
            tracing::warn!("File already processed: {}", asset.key);
            return ProcessingResult::skipped(asset.key.clone(), SkipReason::MarkerPresent);
        }

        let outcome = guarded(self.transform(asset, cancel), self.asset_timeout, cancel)
            .await
            .unwrap_or_else(|interrupted| Err(interrupted.into()));

        match outcome {
            Ok(result) => result,
            Err(error) => {
                tracing::error!("Error processing {}: {}", asset.key, error);
                ProcessingResult::failed(asset.key.clone(), error)
            }
        }
    }

    async fn transform(
        &self,
        asset: &Asset,
        cancel: &CancelSignal,
    ) -> Result<ProcessingResult, AssetProcessingError> {
        // 1. Fetch source bytes
        let bytes = guarded(self.store.get(&self.bucket, &asset.key), self.call_timeout, cancel)
            .await?
            .map_err(AssetProcessingError::Fetch)?;

        // 2. Consult the ledger
        let fingerprint = Fingerprint::compute(&bytes);
        if let Some(ledger) = &self.ledger {
            if let Some(entry) = ledger.lookup(&asset.key).await? {
                if entry.fingerprint == fingerprint.to_hex() {
                    tracing::warn!("File already processed (ledger match): {}", asset.key);
                    return Ok(ProcessingResult::skipped(
                        asset.key.clone(),
                        SkipReason::LedgerMatch {
                            fingerprint: entry.fingerprint,
                        },
                    ));
                }
            }
        }

        // 3. Run the transformation chain
        tracing::info!("Processing file: {}", asset.key);
        let data = self.chain.run(AssetData::new(asset.key.clone(), bytes)).await?;
        tracing::debug!(
            "Applied {} operations to {}, metadata: {:?}",
            data.applied.len(),
            asset.key,
            data.metadata
        );

        // 4. Store the derived asset
        let output_key = asset.output_key(&self.marker);
        guarded(
            self.store.put(&self.bucket, &output_key, data.bytes),
            self.call_timeout,
            cancel,
        )
        .await?
        .map_err(AssetProcessingError::Store)?;

        // The derived asset exists at this point, so a ledger failure only
        // costs idempotency on the next run.
        if let Some(ledger) = &self.ledger {
            let entry = LedgerEntry {
                fingerprint: fingerprint.to_hex(),
                output_key: output_key.clone(),
                processed_at: Utc::now(),
            };
            if let Err(e) = ledger.record(&asset.key, entry).await {
                tracing::warn!("Failed to record {} in ledger: {}", asset.key, e);
            }
        }

        tracing::info!("Processing complete: {}", output_key);
        Ok(ProcessingResult::succeeded(asset.key.clone(), output_key))
    }
}

fn join_failure(error: JoinError) -> AssetProcessingError {
    if error.is_cancelled() {
        return AssetProcessingError::Cancelled;
    }
    let payload = error.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    AssetProcessingError::Panicked(message)
}
