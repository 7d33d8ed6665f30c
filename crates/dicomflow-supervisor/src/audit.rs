//! Audit scanner
//!
//! Runs one time-windowed anomaly query against the log service and polls
//! until it completes. A failed scan is an error, never an empty result.

use chrono::{DateTime, Utc};
use dicomflow_core::{
    guarded, AuditConfig, AuditFinding, AuditQueryError, AuditWindow, CancelSignal, LogQuery,
    LogQueryService, LogRecord, QueryResults,
};
use std::sync::Arc;
use std::time::Duration;

/// Time-windowed anomaly scanner
#[derive(Clone)]
pub struct AuditScanner {
    logs: Arc<dyn LogQueryService>,
    config: AuditConfig,
    call_timeout: Duration,
}

impl std::fmt::Debug for AuditScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditScanner")
            .field("log_group", &self.config.log_group)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl AuditScanner {
    /// Create scanner
    #[must_use]
    pub fn new(
        logs: Arc<dyn LogQueryService>,
        config: AuditConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            logs,
            config,
            call_timeout,
        }
    }

    /// Configured trailing window ending at `now`
    #[must_use]
    pub fn default_window(&self, now: DateTime<Utc>) -> AuditWindow {
        AuditWindow::trailing(now, self.config.lookback())
    }

    /// Scan the configured trailing window ending now
    ///
    /// # Errors
    /// See [`AuditScanner::scan`]
    pub async fn scan_recent(
        &self,
        cancel: &CancelSignal,
    ) -> Result<Vec<AuditFinding>, AuditQueryError> {
        self.scan(self.default_window(Utc::now()), cancel).await
    }

    /// Query `window` and return one finding per matching record
    ///
    /// # Errors
    /// - `InvalidWindow` if the window is empty or inverted
    /// - `Submission` / `Results` if the log service fails
    /// - `Timeout` if the query does not complete within its budget
    /// - `Cancelled` if the signal fires
    pub async fn scan(
        &self,
        window: AuditWindow,
        cancel: &CancelSignal,
    ) -> Result<Vec<AuditFinding>, AuditQueryError> {
        let outcome = if window.is_valid() {
            guarded(self.run_query(window, cancel), self.config.query_timeout(), cancel)
                .await
                .unwrap_or_else(|interrupted| Err(interrupted.into()))
        } else {
            Err(AuditQueryError::InvalidWindow(format!(
                "{} is not before {}",
                window.start, window.end
            )))
        };

        let records = outcome.map_err(|e| {
            tracing::error!(
                log_group = %self.config.log_group,
                "Error auditing system access: {}",
                e
            );
            e
        })?;

        let observed_at = Utc::now();
        let findings: Vec<AuditFinding> = records
            .iter()
            .map(|record| {
                tracing::warn!("Unusual access pattern detected: {}", record);
                AuditFinding::from_record(record, observed_at)
            })
            .collect();

        tracing::info!(
            log_group = %self.config.log_group,
            "Audit scan found {} records between {} and {}",
            findings.len(),
            window.start,
            window.end
        );
        Ok(findings)
    }

    async fn run_query(
        &self,
        window: AuditWindow,
        cancel: &CancelSignal,
    ) -> Result<Vec<LogRecord>, AuditQueryError> {
        let query = LogQuery {
            log_group: self.config.log_group.clone(),
            window,
            query_string: self.config.query_string.clone(),
        };
        let query_id = guarded(self.logs.start_query(&query), self.call_timeout, cancel).await??;
        tracing::debug!("Submitted audit query {}", query_id);

        loop {
            match guarded(self.logs.get_results(&query_id), self.call_timeout, cancel).await?? {
                QueryResults::Complete(records) => return Ok(records),
                QueryResults::Pending => {
                    tracing::debug!("Audit query {} still running", query_id);
                    tokio::time::sleep(self.config.poll_interval()).await;
                }
            }
        }
    }
}
