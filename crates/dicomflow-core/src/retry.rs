//! Retry with exponential backoff for transient collaborator failures

use crate::cancel::{CancelSignal, Interrupted};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Classifies errors that are worth another attempt
pub trait Retryable {
    /// Check if error is transient
    fn is_retryable(&self) -> bool;
}

/// Exponential backoff policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay
    pub max_backoff_ms: u64,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Policy that never retries
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// With max attempts
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// With initial backoff
    #[inline]
    #[must_use]
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Delay before retry number `retry` (1-based)
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(millis as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out
///
/// Only errors whose [`Retryable::is_retryable`] is true are retried.
/// Cancellation before or during a backoff stops further attempts and is
/// reported as `Interrupted::Cancelled`, not as the transient error.
///
/// # Errors
/// The last error produced by `operation`, or the cancellation error
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancelSignal,
    operation: &str,
    mut call: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display + From<Interrupted>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_attempts && error.is_retryable() => {
                if cancel.is_cancelled() {
                    return Err(Interrupted::Cancelled.into());
                }

                let delay = policy.backoff_for(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "Transient failure, retrying"
                );

                tokio::select! {
                    () = cancel.cancelled() => return Err(Interrupted::Cancelled.into()),
                    () = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq, Eq)]
    enum Flaky {
        Transient,
        Permanent,
        Interrupted,
    }

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky({self:?})")
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            matches!(self, Self::Transient)
        }
    }

    impl From<Interrupted> for Flaky {
        fn from(_: Interrupted) -> Self {
            Self::Interrupted
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            multiplier: 2.0,
        };

        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(800));
        assert_eq!(policy.backoff_for(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_for(60), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let cancel = CancelSignal::new();

        let result: Result<u32, Flaky> =
            retry_with_backoff(&RetryPolicy::default(), &cancel, "list", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(Flaky::Transient)
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.ok(), Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancelSignal::new();

        let result: Result<(), Flaky> =
            retry_with_backoff(&RetryPolicy::default(), &cancel, "publish", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Flaky::Permanent)
            })
            .await;

        assert_eq!(result, Err(Flaky::Permanent));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let cancel = CancelSignal::new();
        let policy = RetryPolicy::default().with_max_attempts(4);

        let result: Result<(), Flaky> = retry_with_backoff(&policy, &cancel, "list", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Flaky::Transient)
        })
        .await;

        assert_eq!(result, Err(Flaky::Transient));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn cancelled_signal_stops_retrying() {
        let calls = AtomicU32::new(0);
        let cancel = CancelSignal::new();
        cancel.cancel();

        let result: Result<(), Flaky> =
            retry_with_backoff(&RetryPolicy::default(), &cancel, "list", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Flaky::Transient)
            })
            .await;

        assert_eq!(result, Err(Flaky::Interrupted));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_reports_cancellation() {
        let calls = AtomicU32::new(0);
        let cancel = CancelSignal::new();
        let policy = RetryPolicy::default()
            .with_max_attempts(5)
            .with_initial_backoff(Duration::from_secs(10));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result: Result<(), Flaky> = retry_with_backoff(&policy, &cancel, "list", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Flaky::Transient)
        })
        .await;

        assert_eq!(result, Err(Flaky::Interrupted));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
