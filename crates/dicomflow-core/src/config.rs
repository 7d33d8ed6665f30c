//! Configuration
//!
//! Everything a component needs is passed into its constructor; nothing is
//! read from ambient process state. A whole system can be described in a
//! single JSON document and loaded with [`SystemConfig::from_json_file`].

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Batch path
    pub pipeline: PipelineConfig,
    /// Supervisory path
    pub supervisor: SupervisorConfig,
    /// Tracing output
    pub logging: LoggingConfig,
}

impl SystemConfig {
    /// Parse and validate a JSON document
    ///
    /// # Errors
    /// - `ConfigError::Parse` for malformed JSON
    /// - `ConfigError::Invalid` if a constraint is violated
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    ///
    /// # Errors
    /// - `ConfigError::Io` if the file cannot be read
    /// - see [`SystemConfig::from_json_str`]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::io_error(path, e))?;
        let config = Self::from_json_str(&raw)?;
        tracing::info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Validate every section
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first violated constraint
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline.validate()?;
        self.supervisor.validate()
    }
}

/// Batch pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bucket holding source and derived assets
    pub bucket: String,
    /// Eligibility filter applied to listed keys
    pub eligible_suffix: String,
    /// Marker appended to derived keys and used to detect processed assets
    pub processed_marker: String,
    /// Completion notification target
    pub notification_target: String,
    /// Completion notification subject
    pub notification_subject: String,
    /// Maximum assets processed concurrently
    pub worker_count: usize,
    /// Timeout for a single collaborator call
    pub call_timeout_ms: u64,
    /// Budget for processing one asset end to end
    pub asset_timeout_ms: u64,
    /// Retry policy for listing and publishing
    pub retry: RetryPolicy,
}

impl PipelineConfig {
    /// Create configuration for a bucket and notification target
    #[inline]
    #[must_use]
    pub fn new(bucket: impl Into<String>, notification_target: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            notification_target: notification_target.into(),
            ..Self::default()
        }
    }

    /// With worker count
    #[inline]
    #[must_use]
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// With eligibility suffix
    #[inline]
    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.eligible_suffix = suffix.into();
        self
    }

    /// With processed marker
    #[inline]
    #[must_use]
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.processed_marker = marker.into();
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// With per-asset budget
    #[inline]
    #[must_use]
    pub fn with_asset_timeout(mut self, timeout: Duration) -> Self {
        self.asset_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Timeout for a single collaborator call
    #[inline]
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Budget for one asset
    #[inline]
    #[must_use]
    pub fn asset_timeout(&self) -> Duration {
        Duration::from_millis(self.asset_timeout_ms)
    }

    /// Validate constraints
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the violated constraint
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::Invalid("pipeline.bucket must not be empty".into()));
        }
        if self.notification_target.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "pipeline.notification_target must not be empty".into(),
            ));
        }
        if self.processed_marker.is_empty() {
            return Err(ConfigError::Invalid(
                "pipeline.processed_marker must not be empty".into(),
            ));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("pipeline.worker_count must be at least 1".into()));
        }
        if self.call_timeout_ms == 0 || self.asset_timeout_ms == 0 {
            return Err(ConfigError::Invalid("pipeline timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            eligible_suffix: ".dcm".to_string(),
            processed_marker: "_processed".to_string(),
            notification_target: String::new(),
            notification_subject: "DICOM Processing Notification".to_string(),
            worker_count: 4,
            call_timeout_ms: 30_000,
            asset_timeout_ms: 300_000,
            retry: RetryPolicy::default(),
        }
    }
}

/// Remediation function and its payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationAction {
    /// Remediation function name
    pub function_name: String,
    /// JSON payload sent with the invocation
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RemediationAction {
    /// Create new action
    #[inline]
    #[must_use]
    pub fn new(function_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            function_name: function_name.into(),
            payload,
        }
    }

    /// Serialized payload bytes
    #[inline]
    #[must_use]
    pub fn payload_bytes(&self) -> Vec<u8> {
        self.payload.to_string().into_bytes()
    }
}

/// Remediation triggered while a named alarm is in `ALARM`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationRule {
    /// Alarm that triggers the action
    pub alarm_name: String,
    /// Action to invoke
    #[serde(flatten)]
    pub action: RemediationAction,
}

impl RemediationRule {
    /// Create new rule
    #[inline]
    #[must_use]
    pub fn new(alarm_name: impl Into<String>, action: RemediationAction) -> Self {
        Self {
            alarm_name: alarm_name.into(),
            action,
        }
    }
}

/// Audit scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Whether the supervisor runs scans at all
    pub enabled: bool,
    /// Log group searched
    pub log_group: String,
    /// Anomaly query
    pub query_string: String,
    /// Window length ending at "now"
    pub lookback_secs: u64,
    /// Delay between result polls
    pub poll_interval_ms: u64,
    /// Overall budget for submit + polling
    pub query_timeout_ms: u64,
}

impl AuditConfig {
    /// Delay between polls
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Overall query budget
    #[inline]
    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Window length
    #[inline]
    #[must_use]
    pub fn lookback(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::seconds(i64::try_from(self.lookback_secs).unwrap_or(i64::MAX))
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_group: "/aws/lambda/dicom-handler".to_string(),
            query_string: "fields @timestamp, @message \
                           | filter eventName like /ConsoleLogin/ and errorCode like /Failure/"
                .to_string(),
            lookback_secs: 86_400,
            poll_interval_ms: 1_000,
            query_timeout_ms: 60_000,
        }
    }
}

/// Supervisory path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Delay between supervisor ticks
    pub sweep_interval_secs: u64,
    /// Timeout for a single collaborator call
    pub call_timeout_ms: u64,
    /// Remediation queue capacity
    pub remediation_queue_capacity: usize,
    /// Alarm-driven remediation rules
    pub remediation_rules: Vec<RemediationRule>,
    /// Action fired once per scan that produced findings
    pub finding_remediation: Option<RemediationAction>,
    /// Target notified after every successful alarm sweep
    pub sweep_completion_target: Option<String>,
    /// Audit scanning
    pub audit: AuditConfig,
}

impl SupervisorConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With remediation rule appended
    #[inline]
    #[must_use]
    pub fn with_rule(mut self, rule: RemediationRule) -> Self {
        self.remediation_rules.push(rule);
        self
    }

    /// With finding remediation
    #[inline]
    #[must_use]
    pub fn with_finding_remediation(mut self, action: RemediationAction) -> Self {
        self.finding_remediation = Some(action);
        self
    }

    /// With sweep completion target
    #[inline]
    #[must_use]
    pub fn with_sweep_completion_target(mut self, target: impl Into<String>) -> Self {
        self.sweep_completion_target = Some(target.into());
        self
    }

    /// With audit configuration
    #[inline]
    #[must_use]
    pub fn with_audit(mut self, audit: AuditConfig) -> Self {
        self.audit = audit;
        self
    }

    /// Delay between ticks
    #[inline]
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Timeout for a single collaborator call
    #[inline]
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Rules matching an alarm name
    pub fn rules_for<'a>(
        &'a self,
        alarm_name: &'a str,
    ) -> impl Iterator<Item = &'a RemediationRule> {
        self.remediation_rules
            .iter()
            .filter(move |rule| rule.alarm_name == alarm_name)
    }

    /// Validate constraints
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the violated constraint
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "supervisor.sweep_interval_secs must be non-zero".into(),
            ));
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid("supervisor.call_timeout_ms must be non-zero".into()));
        }
        if self.remediation_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "supervisor.remediation_queue_capacity must be at least 1".into(),
            ));
        }
        if let Some(rule) = self
            .remediation_rules
            .iter()
            .find(|rule| rule.action.function_name.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "remediation rule for '{}' has no function name",
                rule.alarm_name
            )));
        }
        if self.audit.enabled {
            if self.audit.poll_interval_ms == 0 || self.audit.query_timeout_ms == 0 {
                return Err(ConfigError::Invalid("audit intervals must be non-zero".into()));
            }
            if self.audit.lookback_secs == 0 {
                return Err(ConfigError::Invalid("audit.lookback_secs must be non-zero".into()));
            }
        }
        Ok(())
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
            call_timeout_ms: 30_000,
            remediation_queue_capacity: 64,
            remediation_rules: Vec::new(),
            finding_remediation: None,
            sweep_completion_target: None,
            audit: AuditConfig::default(),
        }
    }
}

/// Tracing subscriber configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}
