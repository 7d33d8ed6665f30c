//! Collaborator ports
//!
//! Provisioning hands the core already-built resource handles. Each handle
//! is consumed through one of these traits so the engine, the monitor and
//! the scanner can be driven by real services or in-memory fakes alike.

use crate::error::{
    AlarmServiceError, AuditQueryError, LedgerError, NotificationError, RemediationInvokeError,
    StoreError,
};
use crate::types::{
    Alarm, AlarmState, InvocationHandle, LedgerEntry, LogQuery, Notification, ObjectEntry,
    PublishAck, QueryId, QueryResults, RemediationRequest,
};
use async_trait::async_trait;

/// Blob store addressed by bucket and key
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every object in a bucket, in store order
    async fn list(&self, bucket: &str) -> Result<Vec<ObjectEntry>, StoreError>;

    /// Fetch object bytes
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Store object bytes, replacing any existing object
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StoreError>;
}

/// Topic-style notification sink
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Publish one message
    async fn publish(&self, notification: &Notification) -> Result<PublishAck, NotificationError>;
}

/// Metrics service holding alarm definitions and states
#[async_trait]
pub trait AlarmService: Send + Sync {
    /// List alarms currently in `state`
    async fn list_alarms(&self, state: AlarmState) -> Result<Vec<Alarm>, AlarmServiceError>;
}

/// Asynchronous function invocation service
#[async_trait]
pub trait RemediationInvoker: Send + Sync {
    /// Submit an invocation; returns once accepted, not once finished
    async fn invoke_async(
        &self,
        request: &RemediationRequest,
    ) -> Result<InvocationHandle, RemediationInvokeError>;
}

/// Log search service with submit/poll semantics
#[async_trait]
pub trait LogQueryService: Send + Sync {
    /// Submit a query
    async fn start_query(&self, query: &LogQuery) -> Result<QueryId, AuditQueryError>;

    /// Poll a submitted query
    async fn get_results(&self, query_id: &QueryId) -> Result<QueryResults, AuditQueryError>;
}

/// Explicit per-asset processing record
#[async_trait]
pub trait ProcessedLedger: Send + Sync {
    /// Record for a source key, if any
    async fn lookup(&self, key: &str) -> Result<Option<LedgerEntry>, LedgerError>;

    /// Store or replace the record for a source key
    async fn record(&self, key: &str, entry: LedgerEntry) -> Result<(), LedgerError>;
}
