//! Testing utilities for the dicomflow workspace
//!
//! In-memory collaborators with call recording and fault injection, plus
//! shared fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use dicomflow_core::{
    Alarm, AlarmService, AlarmServiceError, AlarmState, AuditQueryError, InvocationHandle,
    LogQuery, LogQueryService, LogRecord, Notification, NotificationError, NotificationSink,
    ObjectEntry, ObjectStore, PipelineConfig, PublishAck, QueryId, QueryResults,
    RemediationInvokeError, RemediationInvoker, RemediationRequest, RetryPolicy, StoreError,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const TEST_BUCKET: &str = "dicom-bucket";
pub const TEST_TOPIC: &str = "arn:aws:sns:us-east-1:123456789012:MyTopic";

/// Pipeline config pointing at the in-memory fixtures, with fast retries
pub fn test_pipeline_config() -> PipelineConfig {
    PipelineConfig::new(TEST_BUCKET, TEST_TOPIC)
        .with_workers(4)
        .with_retry(
            RetryPolicy::default()
                .with_max_attempts(3)
                .with_initial_backoff(Duration::from_millis(1)),
        )
}

/// Bytes shaped like a DICOM Part 10 file: 128-byte preamble, `DICM`, body
pub fn dicom_bytes(body: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; 128];
    bytes.extend_from_slice(b"DICM");
    bytes.extend_from_slice(body);
    bytes
}

// ============================================================================
// Object store
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    failing_lists: AtomicUsize,
    failing_puts: Mutex<HashSet<String>>,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `keys`, each holding a small DICOM-shaped body
    pub fn with_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        let store = Self::new();
        for key in keys {
            store.insert(key, dicom_bytes(key.as_bytes()));
        }
        store
    }

    pub fn insert(&self, key: &str, body: Vec<u8>) {
        self.objects.lock().insert(key.to_string(), body);
    }

    /// Fail the next `count` list calls with `StoreError::Unavailable`
    pub fn fail_next_lists(&self, count: usize) {
        self.failing_lists.store(count, Ordering::SeqCst);
    }

    /// Reject every put to `key`
    pub fn fail_puts_for(&self, key: &str) {
        self.failing_puts.lock().insert(key.to_string());
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, bucket: &str) -> Result<Vec<ObjectEntry>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failing_lists.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_lists.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::unavailable(bucket, "injected listing failure"));
        }

        Ok(self
            .objects
            .lock()
            .iter()
            .map(|(key, body)| ObjectEntry {
                key: key.clone(),
                size: u64::try_from(body.len()).ok(),
                last_modified: None,
            })
            .collect())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.object(key).ok_or_else(|| StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        if self.failing_puts.lock().contains(key) {
            return Err(StoreError::WriteFailed {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: "injected write failure".to_string(),
            });
        }
        self.insert(key, body);
        Ok(())
    }
}

// ============================================================================
// Notification sink
// ============================================================================

#[derive(Debug, Default)]
pub struct RecordingSink {
    published: Mutex<Vec<Notification>>,
    failures: Mutex<Vec<NotificationError>>,
    attempts: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next publishes with these errors, in order
    pub fn fail_next(&self, errors: impl IntoIterator<Item = NotificationError>) {
        let mut failures = self.failures.lock();
        failures.extend(errors);
    }

    /// Successfully published notifications
    pub fn published(&self) -> Vec<Notification> {
        self.published.lock().clone()
    }

    /// Publish attempts including failed ones
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn publish(&self, notification: &Notification) -> Result<PublishAck, NotificationError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);

        {
            let mut failures = self.failures.lock();
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
        }

        self.published.lock().push(notification.clone());
        Ok(PublishAck {
            message_id: format!("msg-{attempt}"),
        })
    }
}

// ============================================================================
// Alarm service
// ============================================================================

#[derive(Debug, Default)]
pub struct StaticAlarmService {
    alarms: Mutex<Vec<Alarm>>,
    unavailable: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl StaticAlarmService {
    pub fn new(alarms: Vec<Alarm>) -> Self {
        Self {
            alarms: Mutex::new(alarms),
            ..Self::default()
        }
    }

    pub fn set_alarms(&self, alarms: Vec<Alarm>) {
        *self.alarms.lock() = alarms;
    }

    /// Fail every call with `AlarmServiceError::Unavailable`
    pub fn set_unavailable(&self, reason: &str) {
        *self.unavailable.lock() = Some(reason.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlarmService for StaticAlarmService {
    async fn list_alarms(&self, state: AlarmState) -> Result<Vec<Alarm>, AlarmServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.unavailable.lock().clone() {
            return Err(AlarmServiceError::Unavailable(reason));
        }
        Ok(self
            .alarms
            .lock()
            .iter()
            .filter(|alarm| alarm.state == state)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Remediation invoker
// ============================================================================

#[derive(Debug, Default)]
pub struct RecordingInvoker {
    invoked: Mutex<Vec<RemediationRequest>>,
    rejected: Mutex<HashSet<String>>,
    attempts: AtomicUsize,
}

impl RecordingInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every invocation of `function_name`
    pub fn reject(&self, function_name: &str) {
        self.rejected.lock().insert(function_name.to_string());
    }

    /// Accepted invocations
    pub fn invoked(&self) -> Vec<RemediationRequest> {
        self.invoked.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemediationInvoker for RecordingInvoker {
    async fn invoke_async(
        &self,
        request: &RemediationRequest,
    ) -> Result<InvocationHandle, RemediationInvokeError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.rejected.lock().contains(&request.function_name) {
            return Err(RemediationInvokeError::Rejected {
                function_name: request.function_name.clone(),
                reason: "injected rejection".to_string(),
            });
        }
        self.invoked.lock().push(request.clone());
        Ok(InvocationHandle {
            invocation_id: format!("inv-{attempt}"),
        })
    }
}

// ============================================================================
// Log query service
// ============================================================================

#[derive(Debug, Default)]
pub struct ScriptedLogQuery {
    records: Mutex<Vec<LogRecord>>,
    pending_polls: AtomicUsize,
    submit_failure: Mutex<Option<String>>,
    results_failure: Mutex<Option<String>>,
    never_completes: Mutex<bool>,
    submitted: Mutex<Vec<LogQuery>>,
    polls: AtomicUsize,
}

impl ScriptedLogQuery {
    /// Service whose next query completes immediately with `records`
    pub fn new(records: Vec<LogRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Report `Pending` for the first `polls` polls
    pub fn with_pending_polls(self, polls: usize) -> Self {
        self.pending_polls.store(polls, Ordering::SeqCst);
        self
    }

    pub fn fail_submission(&self, reason: &str) {
        *self.submit_failure.lock() = Some(reason.to_string());
    }

    pub fn fail_results(&self, reason: &str) {
        *self.results_failure.lock() = Some(reason.to_string());
    }

    /// Report `Pending` forever
    pub fn never_complete(&self) {
        *self.never_completes.lock() = true;
    }

    pub fn submitted(&self) -> Vec<LogQuery> {
        self.submitted.lock().clone()
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogQueryService for ScriptedLogQuery {
    async fn start_query(&self, query: &LogQuery) -> Result<QueryId, AuditQueryError> {
        if let Some(reason) = self.submit_failure.lock().clone() {
            return Err(AuditQueryError::Submission(reason));
        }
        let mut submitted = self.submitted.lock();
        submitted.push(query.clone());
        Ok(QueryId(format!("query-{}", submitted.len())))
    }

    async fn get_results(&self, query_id: &QueryId) -> Result<QueryResults, AuditQueryError> {
        self.polls.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = self.results_failure.lock().clone() {
            return Err(AuditQueryError::Results {
                query_id: query_id.to_string(),
                reason,
            });
        }
        if *self.never_completes.lock() {
            return Ok(QueryResults::Pending);
        }

        let pending = self.pending_polls.load(Ordering::SeqCst);
        if pending > 0 {
            self.pending_polls.store(pending - 1, Ordering::SeqCst);
            return Ok(QueryResults::Pending);
        }
        Ok(QueryResults::Complete(self.records.lock().clone()))
    }
}

/// Record shaped like a failed console login
pub fn failed_login_record(timestamp: &str, user: &str) -> LogRecord {
    LogRecord::default()
        .with_field("@timestamp", timestamp)
        .with_field("@message", format!("ConsoleLogin Failure for {user}"))
}

/// Settle background tasks spawned on the current runtime
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
