//! Error types for dicomflow
//!
//! One enum per concern, matching how far each failure is allowed to travel:
//! - Object store failures (fatal to a listing, isolated to one asset otherwise)
//! - Per-asset processing failures (degrade one result to `failed`)
//! - Notification failures (surfaced to the run caller)
//! - Alarm service failures (fatal to one sweep)
//! - Remediation invocation failures (logged, swallowed)
//! - Audit query failures (logged, returned distinctly from "no findings")
//! - Configuration failures

use crate::cancel::Interrupted;
use crate::retry::Retryable;
use std::path::PathBuf;

fn timeout_ms(interrupted: &Interrupted) -> Option<u64> {
    match interrupted {
        Interrupted::TimedOut(duration) => {
            Some(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
        }
        Interrupted::Cancelled => None,
    }
}

/// Object store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Store could not be reached or refused the call
    #[error("object store unavailable for bucket '{bucket}': {reason}")]
    Unavailable { bucket: String, reason: String },

    /// Object does not exist
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Write rejected
    #[error("write failed for {bucket}/{key}: {reason}")]
    WriteFailed {
        bucket: String,
        key: String,
        reason: String,
    },

    /// Call exceeded its timeout
    #[error("object store call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Call interrupted by cancellation
    #[error("object store call cancelled")]
    Cancelled,
}

impl StoreError {
    /// Create unavailable error
    #[inline]
    pub fn unavailable(bucket: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            bucket: bucket.into(),
            reason: reason.into(),
        }
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

impl From<Interrupted> for StoreError {
    fn from(interrupted: Interrupted) -> Self {
        match timeout_ms(&interrupted) {
            Some(timeout_ms) => Self::Timeout { timeout_ms },
            None => Self::Cancelled,
        }
    }
}

/// Failure raised by a single transformation step
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct StepError {
    /// Human-readable reason
    pub reason: String,
}

impl StepError {
    /// Create new step error
    #[inline]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Per-asset processing failure
///
/// Never escapes the processing engine: it is captured into a
/// `failed` processing result for the asset that raised it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssetProcessingError {
    /// Source bytes could not be fetched
    #[error("fetch failed: {0}")]
    Fetch(#[source] StoreError),

    /// Derived bytes could not be stored
    #[error("store failed: {0}")]
    Store(#[source] StoreError),

    /// A transformation step rejected the asset
    #[error("step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: StepError,
    },

    /// A transformation step panicked
    #[error("processing panicked: {0}")]
    Panicked(String),

    /// Processed ledger could not be consulted or updated
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Asset exceeded its processing budget
    #[error("processing timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Batch cancelled before the asset finished
    #[error("processing cancelled")]
    Cancelled,
}

impl From<Interrupted> for AssetProcessingError {
    fn from(interrupted: Interrupted) -> Self {
        match timeout_ms(&interrupted) {
            Some(timeout_ms) => Self::Timeout { timeout_ms },
            None => Self::Cancelled,
        }
    }
}

/// Processed ledger errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Backing store unavailable
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Notification sink errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotificationError {
    /// Sink refused the message
    #[error("publish to '{target}' rejected: {reason}")]
    Rejected { target: String, reason: String },

    /// Sink could not be reached
    #[error("notification sink unavailable for '{target}': {reason}")]
    Unavailable { target: String, reason: String },

    /// Publish exceeded its timeout
    #[error("publish timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Publish interrupted by cancellation
    #[error("publish cancelled")]
    Cancelled,
}

impl Retryable for NotificationError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

impl From<Interrupted> for NotificationError {
    fn from(interrupted: Interrupted) -> Self {
        match timeout_ms(&interrupted) {
            Some(timeout_ms) => Self::Timeout { timeout_ms },
            None => Self::Cancelled,
        }
    }
}

/// Metrics/alarm service errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AlarmServiceError {
    /// Service could not be reached
    #[error("alarm service unavailable: {0}")]
    Unavailable(String),

    /// Call exceeded its timeout
    #[error("alarm query timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Call interrupted by cancellation
    #[error("alarm query cancelled")]
    Cancelled,
}

impl Retryable for AlarmServiceError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout { .. })
    }
}

impl From<Interrupted> for AlarmServiceError {
    fn from(interrupted: Interrupted) -> Self {
        match timeout_ms(&interrupted) {
            Some(timeout_ms) => Self::Timeout { timeout_ms },
            None => Self::Cancelled,
        }
    }
}

/// Remediation invocation errors (best-effort, never escalated)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemediationInvokeError {
    /// Invocation service refused the request
    #[error("invocation of '{function_name}' rejected: {reason}")]
    Rejected {
        function_name: String,
        reason: String,
    },

    /// Invocation service could not be reached
    #[error("invocation service unavailable: {0}")]
    Unavailable(String),

    /// Local remediation queue is full
    #[error("remediation queue full (capacity: {0})")]
    QueueFull(usize),

    /// Remediation worker has stopped
    #[error("remediation worker stopped")]
    WorkerStopped,

    /// Invocation exceeded its timeout
    #[error("invocation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Invocation interrupted by cancellation
    #[error("invocation cancelled")]
    Cancelled,
}

impl From<Interrupted> for RemediationInvokeError {
    fn from(interrupted: Interrupted) -> Self {
        match timeout_ms(&interrupted) {
            Some(timeout_ms) => Self::Timeout { timeout_ms },
            None => Self::Cancelled,
        }
    }
}

/// Audit query errors
///
/// Returned instead of an empty finding list so callers can tell
/// "nothing anomalous" apart from "could not look".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditQueryError {
    /// Query window is empty or inverted
    #[error("invalid audit window: {0}")]
    InvalidWindow(String),

    /// Query could not be submitted
    #[error("query submission failed: {0}")]
    Submission(String),

    /// Query results could not be retrieved
    #[error("query {query_id} failed: {reason}")]
    Results { query_id: String, reason: String },

    /// Query did not complete in time
    #[error("audit query timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Query interrupted by cancellation
    #[error("audit query cancelled")]
    Cancelled,
}

impl From<Interrupted> for AuditQueryError {
    fn from(interrupted: Interrupted) -> Self {
        match timeout_ms(&interrupted) {
            Some(timeout_ms) => Self::Timeout { timeout_ms },
            None => Self::Cancelled,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config contents are not valid JSON for the schema
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Config parsed but violates a constraint
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// Tracing subscriber could not be installed
    #[error("logging setup failed: {0}")]
    Logging(String),
}

impl ConfigError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn store_error_display() {
        let err = StoreError::unavailable("scans", "connection reset");
        assert!(err.to_string().contains("scans"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn store_error_is_retryable() {
        assert!(StoreError::unavailable("b", "x").is_retryable());
        assert!(StoreError::Timeout { timeout_ms: 10 }.is_retryable());
        assert!(!StoreError::Cancelled.is_retryable());
        assert!(!StoreError::NotFound {
            bucket: "b".into(),
            key: "k".into()
        }
        .is_retryable());
    }

    #[test]
    fn notification_error_is_retryable() {
        let rejected = NotificationError::Rejected {
            target: "topic".into(),
            reason: "bad subject".into(),
        };
        assert!(!rejected.is_retryable());

        let unavailable = NotificationError::Unavailable {
            target: "topic".into(),
            reason: "503".into(),
        };
        assert!(unavailable.is_retryable());
    }

    #[test]
    fn interrupted_maps_to_timeout_or_cancelled() {
        let timed_out: StoreError = Interrupted::TimedOut(Duration::from_millis(250)).into();
        assert_eq!(timed_out, StoreError::Timeout { timeout_ms: 250 });

        let cancelled: AuditQueryError = Interrupted::Cancelled.into();
        assert_eq!(cancelled, AuditQueryError::Cancelled);
    }

    #[test]
    fn step_error_wraps_reason() {
        let err = AssetProcessingError::Step {
            step: "reject_empty".into(),
            source: StepError::new("asset is empty"),
        };
        assert_eq!(err.to_string(), "step 'reject_empty' failed: asset is empty");
    }
}
