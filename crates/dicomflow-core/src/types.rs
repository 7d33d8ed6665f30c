//! Core types for dicomflow
//!
//! Defines the fundamental types shared by both paths:
//! - Assets and per-asset processing results
//! - Alarms as reported by the metrics service
//! - Remediation requests and invocation handles
//! - Log queries, audit windows and findings
//! - Notifications

use crate::error::AssetProcessingError;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique batch run identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object store listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    /// Object key
    pub key: String,
    /// Size in bytes, if reported
    pub size: Option<u64>,
    /// Last modification time, if reported
    pub last_modified: Option<DateTime<Utc>>,
}

impl ObjectEntry {
    /// Create entry with only a key
    #[inline]
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size: None,
            last_modified: None,
        }
    }
}

/// Opaque, uniquely keyed blob subject to processing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset {
    /// Object key
    pub key: String,
}

impl Asset {
    /// Create new asset
    #[inline]
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Check if the key passes the eligibility suffix filter
    #[inline]
    #[must_use]
    pub fn is_eligible(&self, suffix: &str) -> bool {
        self.key.ends_with(suffix)
    }

    /// Check if the key already carries the processed marker
    #[inline]
    #[must_use]
    pub fn carries_marker(&self, marker: &str) -> bool {
        !marker.is_empty() && self.key.contains(marker)
    }

    /// Key of the derived asset
    #[inline]
    #[must_use]
    pub fn output_key(&self, marker: &str) -> String {
        format!("{}{}", self.key, marker)
    }
}

impl From<&str> for Asset {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Content fingerprint (BLAKE3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint raw bytes
    #[inline]
    #[must_use]
    pub fn compute(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Raw digest
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding
    #[inline]
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Processed-ledger record for one asset key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Hex fingerprint of the source bytes that were processed
    pub fingerprint: String,
    /// Key the derived asset was written to
    pub output_key: String,
    /// When processing finished
    pub processed_at: DateTime<Utc>,
}

/// Processing status, as exposed to reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Transformed and stored
    Succeeded,
    /// Failed; the error is captured in the result
    Failed,
    /// Already processed, left untouched
    Skipped,
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// Why an asset was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Key carries the processed marker
    MarkerPresent,
    /// Ledger already holds a record with identical content
    LedgerMatch { fingerprint: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Succeeded { output_key: String },
    Failed { error: AssetProcessingError },
    Skipped { reason: SkipReason },
}

/// Outcome of processing one asset
///
/// `output_key` is present iff the status is `Succeeded`; `error` is
/// present iff the status is `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingResult {
    /// Key of the input asset
    pub source_key: String,
    outcome: Outcome,
}

impl ProcessingResult {
    /// Successful result
    #[inline]
    #[must_use]
    pub fn succeeded(source_key: impl Into<String>, output_key: impl Into<String>) -> Self {
        Self {
            source_key: source_key.into(),
            outcome: Outcome::Succeeded {
                output_key: output_key.into(),
            },
        }
    }

    /// Failed result
    #[inline]
    #[must_use]
    pub fn failed(source_key: impl Into<String>, error: AssetProcessingError) -> Self {
        Self {
            source_key: source_key.into(),
            outcome: Outcome::Failed { error },
        }
    }

    /// Skipped result
    #[inline]
    #[must_use]
    pub fn skipped(source_key: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            source_key: source_key.into(),
            outcome: Outcome::Skipped { reason },
        }
    }

    /// Status of this result
    #[inline]
    #[must_use]
    pub fn status(&self) -> ProcessingStatus {
        match self.outcome {
            Outcome::Succeeded { .. } => ProcessingStatus::Succeeded,
            Outcome::Failed { .. } => ProcessingStatus::Failed,
            Outcome::Skipped { .. } => ProcessingStatus::Skipped,
        }
    }

    /// Output key, present iff succeeded
    #[inline]
    #[must_use]
    pub fn output_key(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Succeeded { output_key } => Some(output_key),
            _ => None,
        }
    }

    /// Captured error, present iff failed
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&AssetProcessingError> {
        match &self.outcome {
            Outcome::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// Skip reason, present iff skipped
    #[inline]
    #[must_use]
    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match &self.outcome {
            Outcome::Skipped { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Alarm state as reported by the metrics service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmState {
    /// Metric within threshold
    Ok,
    /// Metric breached threshold
    Alarm,
    /// Not enough data points to evaluate
    InsufficientData,
}

/// Threshold comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    GreaterThanThreshold,
    GreaterThanOrEqualToThreshold,
    LessThanThreshold,
    LessThanOrEqualToThreshold,
}

/// Named health condition owned by the metrics service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    /// Alarm name
    pub name: String,
    /// Watched metric
    pub metric: String,
    /// Threshold value
    pub threshold: f64,
    /// How the metric is compared against the threshold
    pub comparison: ComparisonOperator,
    /// Current state
    pub state: AlarmState,
    /// Ordered notification targets
    pub actions: Vec<String>,
}

impl Alarm {
    /// Create alarm with no actions
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, metric: impl Into<String>, state: AlarmState) -> Self {
        Self {
            name: name.into(),
            metric: metric.into(),
            threshold: 0.0,
            comparison: ComparisonOperator::GreaterThanThreshold,
            state,
            actions: Vec::new(),
        }
    }

    /// With threshold and comparison
    #[inline]
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64, comparison: ComparisonOperator) -> Self {
        self.threshold = threshold;
        self.comparison = comparison;
        self
    }

    /// With notification target appended
    #[inline]
    #[must_use]
    pub fn with_action(mut self, target: impl Into<String>) -> Self {
        self.actions.push(target.into());
        self
    }

    /// First configured notification target
    #[inline]
    #[must_use]
    pub fn first_action(&self) -> Option<&str> {
        self.actions.first().map(String::as_str)
    }
}

/// Message handed to the notification sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Topic or endpoint
    pub target: String,
    /// Optional subject line
    pub subject: Option<String>,
    /// Message body
    pub message: String,
}

impl Notification {
    /// Create notification without subject
    #[inline]
    #[must_use]
    pub fn new(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            subject: None,
            message: message.into(),
        }
    }

    /// With subject
    #[inline]
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Sink acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishAck {
    /// Sink-assigned message id
    pub message_id: String,
}

/// Request to run a named remediation action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationRequest {
    /// Remediation function name
    pub function_name: String,
    /// Opaque payload
    pub payload: Vec<u8>,
}

impl RemediationRequest {
    /// Create new request
    #[inline]
    #[must_use]
    pub fn new(function_name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            function_name: function_name.into(),
            payload: payload.into(),
        }
    }
}

/// Accepted asynchronous invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationHandle {
    /// Service-assigned invocation id
    pub invocation_id: String,
}

/// Half-open time window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditWindow {
    /// Inclusive start
    pub start: DateTime<Utc>,
    /// Exclusive end
    pub end: DateTime<Utc>,
}

impl AuditWindow {
    /// Create window
    #[inline]
    #[must_use]
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window of `lookback` ending at `end`
    #[inline]
    #[must_use]
    pub fn trailing(end: DateTime<Utc>, lookback: TimeDelta) -> Self {
        Self {
            start: end - lookback,
            end,
        }
    }

    /// The 24 hours preceding `now`
    #[inline]
    #[must_use]
    pub fn last_day(now: DateTime<Utc>) -> Self {
        Self::trailing(now, TimeDelta::days(1))
    }

    /// Check if the window has positive length
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    /// Check if `instant` falls inside the window
    #[inline]
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Log query submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogQuery {
    /// Log group to search
    pub log_group: String,
    /// Time restriction
    pub window: AuditWindow,
    /// Query expression
    pub query_string: String,
}

/// Service-assigned query identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId(pub String);

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One result row: ordered `(field, value)` pairs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Field/value pairs in service order
    pub fields: Vec<(String, String)>,
}

impl LogRecord {
    /// With field appended
    #[inline]
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((field.into(), value.into()));
        self
    }

    /// Look up a field value
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }
}

impl std::fmt::Display for LogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (field, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{field}={value}")?;
        }
        Ok(())
    }
}

/// Polling result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResults {
    /// Query still running
    Pending,
    /// Query finished with these records
    Complete(Vec<LogRecord>),
}

/// Single anomalous record returned by an audit query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFinding {
    /// Event time
    pub timestamp: DateTime<Utc>,
    /// Event description
    pub message: String,
}

impl AuditFinding {
    /// Build a finding from a query record
    ///
    /// Reads `@timestamp` (RFC 3339 or `YYYY-MM-DD HH:MM:SS.fff`) and
    /// `@message`. A missing or unparseable timestamp falls back to
    /// `observed_at`; a missing message falls back to the whole record.
    #[must_use]
    pub fn from_record(record: &LogRecord, observed_at: DateTime<Utc>) -> Self {
        let timestamp = record
            .field("@timestamp")
            .and_then(parse_log_timestamp)
            .unwrap_or(observed_at);
        let message = record
            .field("@message")
            .map_or_else(|| record.to_string(), str::to_string);

        Self { timestamp, message }
    }
}

fn parse_log_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
