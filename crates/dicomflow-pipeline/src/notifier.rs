//! Completion notifier
//!
//! Publishes exactly one aggregate message per run. The first line lists
//! every derived output key; skipped and failed assets follow on their own
//! labelled lines.

use dicomflow_core::{
    guarded, retry_with_backoff, CancelSignal, Notification, NotificationError, NotificationSink,
    PipelineConfig, ProcessingResult, ProcessingStatus, PublishAck, RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;

/// Aggregate of a batch's results, grouped by status in input order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionSummary {
    /// Output keys of succeeded assets
    pub succeeded: Vec<String>,
    /// Source keys of skipped assets
    pub skipped: Vec<String>,
    /// Source keys and error text of failed assets
    pub failed: Vec<(String, String)>,
}

impl CompletionSummary {
    /// Group results by status
    #[must_use]
    pub fn from_results(results: &[ProcessingResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.status() {
                ProcessingStatus::Succeeded => {
                    if let Some(output_key) = result.output_key() {
                        summary.succeeded.push(output_key.to_string());
                    }
                }
                ProcessingStatus::Skipped => summary.skipped.push(result.source_key.clone()),
                ProcessingStatus::Failed => summary.failed.push((
                    result.source_key.clone(),
                    result.error().map(ToString::to_string).unwrap_or_default(),
                )),
            }
        }
        summary
    }

    /// Number of results summarized
    #[inline]
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.skipped.len() + self.failed.len()
    }

    /// Render the notification body
    #[must_use]
    pub fn message(&self) -> String {
        let mut message = format!(
            "Processing completed for files: {}",
            if self.succeeded.is_empty() {
                "none".to_string()
            } else {
                self.succeeded.join(", ")
            }
        );

        if !self.skipped.is_empty() {
            message.push_str("\nSkipped (already processed): ");
            message.push_str(&self.skipped.join(", "));
        }
        if !self.failed.is_empty() {
            let failed: Vec<String> = self
                .failed
                .iter()
                .map(|(key, error)| format!("{key} ({error})"))
                .collect();
            message.push_str("\nFailed: ");
            message.push_str(&failed.join(", "));
        }
        message
    }
}

/// Publishes the completion event for a run
#[derive(Clone)]
pub struct CompletionNotifier {
    sink: Arc<dyn NotificationSink>,
    target: String,
    subject: String,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl std::fmt::Debug for CompletionNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionNotifier")
            .field("target", &self.target)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl CompletionNotifier {
    /// Create notifier for the configured target
    #[must_use]
    pub fn new(sink: Arc<dyn NotificationSink>, config: &PipelineConfig) -> Self {
        Self {
            sink,
            target: config.notification_target.clone(),
            subject: config.notification_subject.clone(),
            retry: config.retry,
            call_timeout: config.call_timeout(),
        }
    }

    /// Publish one message summarizing `results`
    ///
    /// # Errors
    /// The sink error once retries are exhausted; processing is never undone
    pub async fn notify(
        &self,
        results: &[ProcessingResult],
        cancel: &CancelSignal,
    ) -> Result<PublishAck, NotificationError> {
        let summary = CompletionSummary::from_results(results);
        let notification = Notification::new(self.target.clone(), summary.message())
            .with_subject(self.subject.clone());
        let notification = &notification;

        let ack = retry_with_backoff(&self.retry, cancel, "publish_completion", || async move {
            guarded(self.sink.publish(notification), self.call_timeout, cancel)
                .await
                .unwrap_or_else(|interrupted| Err(interrupted.into()))
        })
        .await
        .map_err(|e| {
            tracing::error!(target_topic = %self.target, "Error sending notification: {}", e);
            e
        })?;

        tracing::info!(
            target_topic = %self.target,
            message_id = %ack.message_id,
            "Notification sent for {} results",
            summary.total()
        );
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dicomflow_core::{AssetProcessingError, SkipReason};
    use dicomflow_test_utils::{test_pipeline_config, TEST_TOPIC};
    use mockall::mock;
    use pretty_assertions::assert_eq;

    mock! {
        Sink {}

        #[async_trait]
        impl NotificationSink for Sink {
            async fn publish(
                &self,
                notification: &Notification,
            ) -> Result<PublishAck, NotificationError>;
        }
    }

    fn ack() -> PublishAck {
        PublishAck {
            message_id: "m-1".to_string(),
        }
    }

    #[test]
    fn message_lists_outputs_in_order() {
        let results = vec![
            ProcessingResult::succeeded("a.dcm", "a.dcm_processed"),
            ProcessingResult::succeeded("b.dcm", "b.dcm_processed"),
        ];
        assert_eq!(
            CompletionSummary::from_results(&results).message(),
            "Processing completed for files: a.dcm_processed, b.dcm_processed"
        );
    }

    #[test]
    fn message_labels_skipped_and_failed() {
        let results = vec![
            ProcessingResult::succeeded("a.dcm", "a.dcm_processed"),
            ProcessingResult::failed("b.dcm", AssetProcessingError::Panicked("boom".into())),
            ProcessingResult::skipped("c.dcm_processed", SkipReason::MarkerPresent),
        ];
        let summary = CompletionSummary::from_results(&results);

        assert_eq!(summary.total(), 3);
        assert_eq!(
            summary.message(),
            "Processing completed for files: a.dcm_processed\n\
             Skipped (already processed): c.dcm_processed\n\
             Failed: b.dcm (processing panicked: boom)"
        );
    }

    #[test]
    fn message_with_no_successes() {
        let results = vec![ProcessingResult::skipped("c.dcm_processed", SkipReason::MarkerPresent)];
        assert!(CompletionSummary::from_results(&results)
            .message()
            .starts_with("Processing completed for files: none"));
    }

    #[tokio::test]
    async fn publishes_once_to_configured_target() {
        let mut sink = MockSink::new();
        sink.expect_publish()
            .withf(|n| {
                n.target == TEST_TOPIC
                    && n.subject.as_deref() == Some("DICOM Processing Notification")
                    && n.message.contains("a.dcm_processed")
            })
            .times(1)
            .returning(|_| Ok(ack()));

        let notifier = CompletionNotifier::new(Arc::new(sink), &test_pipeline_config());
        let results = vec![ProcessingResult::succeeded("a.dcm", "a.dcm_processed")];

        let ack = notifier.notify(&results, &CancelSignal::new()).await.unwrap();
        assert_eq!(ack.message_id, "m-1");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried() {
        let mut sink = MockSink::new();
        let mut seq = mockall::Sequence::new();
        sink.expect_publish()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(NotificationError::Unavailable {
                    target: TEST_TOPIC.to_string(),
                    reason: "throttled".to_string(),
                })
            });
        sink.expect_publish()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(ack()));

        let notifier = CompletionNotifier::new(Arc::new(sink), &test_pipeline_config());
        let results = vec![ProcessingResult::succeeded("a.dcm", "a.dcm_processed")];

        assert!(notifier.notify(&results, &CancelSignal::new()).await.is_ok());
    }

    #[tokio::test]
    async fn rejection_is_returned_without_retry() {
        let mut sink = MockSink::new();
        sink.expect_publish().times(1).returning(|_| {
            Err(NotificationError::Rejected {
                target: TEST_TOPIC.to_string(),
                reason: "no such topic".to_string(),
            })
        });

        let notifier = CompletionNotifier::new(Arc::new(sink), &test_pipeline_config());
        let results = vec![ProcessingResult::succeeded("a.dcm", "a.dcm_processed")];

        let err = notifier
            .notify(&results, &CancelSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::Rejected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_is_reported_as_cancelled() {
        let mut sink = MockSink::new();
        sink.expect_publish().times(1).returning(|_| {
            Err(NotificationError::Unavailable {
                target: TEST_TOPIC.to_string(),
                reason: "throttled".to_string(),
            })
        });
        let config = test_pipeline_config().with_retry(
            RetryPolicy::default()
                .with_max_attempts(5)
                .with_initial_backoff(Duration::from_secs(10)),
        );
        let notifier = CompletionNotifier::new(Arc::new(sink), &config);
        let results = vec![ProcessingResult::succeeded("a.dcm", "a.dcm_processed")];
        let cancel = CancelSignal::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = notifier.notify(&results, &cancel).await.unwrap_err();
        assert_eq!(err, NotificationError::Cancelled);
    }
}
