//! dicomflow Core
//!
//! Shared foundation for the batch pipeline and the supervisory path:
//! - Domain types (assets, processing results, alarms, audit findings)
//! - Collaborator ports (object store, notification sink, alarm service,
//!   remediation invoker, log query service, processed ledger)
//! - Error taxonomy, one enum per concern
//! - Configuration, retry policy and cancellation
//! - Tracing subscriber installation
//!
//! # Example
//!
//! ```rust,ignore
//! use dicomflow_core::{SystemConfig, telemetry};
//!
//! let config = SystemConfig::from_json_file("dicomflow.json")?;
//! telemetry::init_tracing(&config.logging)?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod cancel;
pub mod config;
pub mod error;
pub mod ledger;
pub mod ports;
pub mod retry;
pub mod telemetry;
pub mod types;

pub use cancel::{guarded, CancelSignal, Interrupted};
pub use config::{
    AuditConfig, LoggingConfig, PipelineConfig, RemediationAction, RemediationRule,
    SupervisorConfig, SystemConfig,
};
pub use error::{
    AlarmServiceError, AssetProcessingError, AuditQueryError, ConfigError, LedgerError,
    NotificationError, RemediationInvokeError, StepError, StoreError,
};
pub use ledger::InMemoryLedger;
pub use ports::{
    AlarmService, LogQueryService, NotificationSink, ObjectStore, ProcessedLedger,
    RemediationInvoker,
};
pub use retry::{retry_with_backoff, RetryPolicy, Retryable};
pub use types::{
    Alarm, AlarmState, Asset, AuditFinding, AuditWindow, ComparisonOperator, Fingerprint,
    InvocationHandle, LedgerEntry, LogQuery, LogRecord, Notification, ObjectEntry,
    ProcessingResult, ProcessingStatus, PublishAck, QueryId, QueryResults, RemediationRequest,
    RunId, SkipReason,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with dicomflow components
    pub use crate::{
        Alarm, AlarmService, AlarmState, Asset, CancelSignal, LogQueryService, NotificationSink,
        ObjectStore, PipelineConfig, ProcessingResult, ProcessingStatus, RemediationInvoker,
        SupervisorConfig,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
