//! Asset lister
//!
//! Turns an object store listing into the eligible assets, in store order.

use dicomflow_core::{
    guarded, retry_with_backoff, Asset, CancelSignal, ObjectStore, PipelineConfig, RetryPolicy,
    StoreError,
};
use std::sync::Arc;
use std::time::Duration;

/// Lists eligible assets from one bucket
#[derive(Clone)]
pub struct AssetLister {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl std::fmt::Debug for AssetLister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetLister")
            .field("bucket", &self.bucket)
            .field("retry", &self.retry)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl AssetLister {
    /// Create lister for the configured bucket
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, config: &PipelineConfig) -> Self {
        Self {
            store,
            bucket: config.bucket.clone(),
            retry: config.retry,
            call_timeout: config.call_timeout(),
        }
    }

    /// Bucket being listed
    #[inline]
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// List assets whose key ends with `filter_suffix`, preserving store order
    ///
    /// An empty suffix matches every key. Transient store failures are
    /// retried under the configured policy.
    ///
    /// # Errors
    /// The store error once retries are exhausted, or on cancellation
    pub async fn list_eligible(
        &self,
        filter_suffix: &str,
        cancel: &CancelSignal,
    ) -> Result<Vec<Asset>, StoreError> {
        let entries = retry_with_backoff(&self.retry, cancel, "list_assets", || async move {
            guarded(self.store.list(&self.bucket), self.call_timeout, cancel)
                .await
                .unwrap_or_else(|interrupted| Err(interrupted.into()))
        })
        .await
        .map_err(|e| {
            tracing::error!(bucket = %self.bucket, "Error listing assets: {}", e);
            e
        })?;

        let assets: Vec<Asset> = entries
            .into_iter()
            .map(|entry| Asset::new(entry.key))
            .filter(|asset| asset.is_eligible(filter_suffix))
            .collect();

        tracing::info!(bucket = %self.bucket, "Found {} eligible assets", assets.len());
        Ok(assets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicomflow_test_utils::{test_pipeline_config, MemoryObjectStore};

    fn lister(store: &Arc<MemoryObjectStore>) -> AssetLister {
        AssetLister::new(store.clone(), &test_pipeline_config())
    }

    #[tokio::test]
    async fn filters_by_suffix_in_store_order() {
        let store = Arc::new(MemoryObjectStore::with_keys([
            "a.dcm",
            "notes.txt",
            "b.dcm",
            "c.dcm_processed",
        ]));

        let assets = lister(&store)
            .list_eligible(".dcm", &CancelSignal::new())
            .await
            .unwrap();

        let keys: Vec<_> = assets.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["a.dcm", "b.dcm"]);
    }

    #[tokio::test]
    async fn empty_suffix_keeps_everything() {
        let store = Arc::new(MemoryObjectStore::with_keys(["a.dcm", "notes.txt"]));

        let assets = lister(&store)
            .list_eligible("", &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(assets.len(), 2);
    }

    #[tokio::test]
    async fn empty_bucket_is_not_an_error() {
        let store = Arc::new(MemoryObjectStore::new());
        let assets = lister(&store)
            .list_eligible(".dcm", &CancelSignal::new())
            .await
            .unwrap();
        assert!(assets.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_listing_failure_is_retried() {
        let store = Arc::new(MemoryObjectStore::with_keys(["a.dcm"]));
        store.fail_next_lists(2);

        let assets = lister(&store)
            .list_eligible(".dcm", &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(assets.len(), 1);
        assert_eq!(store.list_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_listing_failure_surfaces() {
        let store = Arc::new(MemoryObjectStore::with_keys(["a.dcm"]));
        store.fail_next_lists(10);

        let err = lister(&store)
            .list_eligible(".dcm", &CancelSignal::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Unavailable { .. }));
        assert_eq!(store.list_calls(), 3);
    }

    #[tokio::test]
    async fn cancelled_listing_issues_no_call() {
        let store = Arc::new(MemoryObjectStore::with_keys(["a.dcm"]));
        let cancel = CancelSignal::new();
        cancel.cancel();

        let err = lister(&store).list_eligible(".dcm", &cancel).await.unwrap_err();

        assert_eq!(err, StoreError::Cancelled);
        assert_eq!(store.list_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_is_reported_as_cancelled() {
        let store = Arc::new(MemoryObjectStore::with_keys(["a.dcm"]));
        store.fail_next_lists(usize::MAX);
        let config = test_pipeline_config().with_retry(
            RetryPolicy::default()
                .with_max_attempts(5)
                .with_initial_backoff(Duration::from_secs(10)),
        );
        let cancel = CancelSignal::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = AssetLister::new(store.clone(), &config)
            .list_eligible(".dcm", &cancel)
            .await
            .unwrap_err();

        assert_eq!(err, StoreError::Cancelled);
        assert_eq!(store.list_calls(), 1);
    }
}
