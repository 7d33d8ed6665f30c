//! Supervisor loop
//!
//! One tick = alarm sweep, audit scan, then remediation dispatch for
//! whatever the two found. Ticks repeat on the sweep interval until the
//! cancellation signal fires. Nothing is shared with the batch path.

use crate::audit::AuditScanner;
use crate::health::{HealthMonitor, SweepReport};
use crate::remediator::{RemediationTicket, RemediatorHandle};
use dicomflow_core::{
    AlarmService, AlarmServiceError, AuditFinding, AuditQueryError, CancelSignal, ConfigError,
    LogQueryService, NotificationSink, RemediationAction, SupervisorConfig,
};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};

/// Outcome of one supervisor tick
#[derive(Debug)]
pub struct TickReport {
    /// Alarm sweep outcome
    pub sweep: Result<SweepReport, AlarmServiceError>,
    /// Audit scan outcome, when scanning is enabled
    pub scan: Option<Result<Vec<AuditFinding>, AuditQueryError>>,
    /// Remediations enqueued during this tick
    pub remediations: Vec<RemediationTicket>,
}

impl TickReport {
    /// Findings from the audit scan, empty when the scan failed or did not run
    #[must_use]
    pub fn findings(&self) -> &[AuditFinding] {
        match &self.scan {
            Some(Ok(findings)) => findings,
            _ => &[],
        }
    }
}

/// Drives the supervisory path
#[derive(Debug, Clone)]
pub struct Supervisor {
    monitor: HealthMonitor,
    scanner: Option<AuditScanner>,
    remediator: RemediatorHandle,
    config: SupervisorConfig,
}

impl Supervisor {
    /// Create supervisor over already-provisioned collaborators
    ///
    /// The audit scanner is only built when `config.audit.enabled`.
    ///
    /// # Errors
    /// `ConfigError::Invalid` if the configuration violates a constraint
    pub fn new(
        config: &SupervisorConfig,
        alarms: Arc<dyn AlarmService>,
        sink: Arc<dyn NotificationSink>,
        logs: Arc<dyn LogQueryService>,
        remediator: RemediatorHandle,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let scanner = config
            .audit
            .enabled
            .then(|| AuditScanner::new(logs, config.audit.clone(), config.call_timeout()));

        let mut monitor = HealthMonitor::new(alarms, sink, config.call_timeout());
        if let Some(target) = &config.sweep_completion_target {
            monitor = monitor.with_completion_target(target.clone());
        }

        Ok(Self {
            monitor,
            scanner,
            remediator,
            config: config.clone(),
        })
    }

    /// Run one sweep, one scan and the remediations they call for
    pub async fn tick(&self, cancel: &CancelSignal) -> TickReport {
        let mut remediations = Vec::new();

        // 1. Alarm sweep
        let sweep = self.monitor.sweep(cancel).await;
        if let Ok(report) = &sweep {
            for alarm in &report.alarms {
                for rule in self.config.rules_for(&alarm.name) {
                    tracing::info!(alarm = %alarm.name, "Alarm matches remediation rule");
                    remediations.extend(self.dispatch(&rule.action));
                }
            }
        }

        // 2. Audit scan
        let scan = match &self.scanner {
            Some(scanner) => Some(scanner.scan_recent(cancel).await),
            None => None,
        };
        if let (Some(Ok(findings)), Some(action)) = (&scan, &self.config.finding_remediation) {
            if !findings.is_empty() {
                tracing::info!("{} audit findings, dispatching remediation", findings.len());
                remediations.extend(self.dispatch(action));
            }
        }

        TickReport {
            sweep,
            scan,
            remediations,
        }
    }

    fn dispatch(&self, action: &RemediationAction) -> Option<RemediationTicket> {
        self.remediator
            .remediate(action.function_name.clone(), action.payload_bytes())
    }

    /// Tick on the sweep interval until cancelled
    ///
    /// The first tick runs immediately. Returns the number of ticks run.
    pub async fn run(&self, cancel: &CancelSignal) -> usize {
        tracing::info!(
            interval_secs = self.config.sweep_interval().as_secs(),
            "Supervisor started"
        );

        let mut ticker = interval(self.config.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0;

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    tracing::info!("Supervisor received shutdown signal");
                    break;
                }

                _ = ticker.tick() => {
                    let report = self.tick(cancel).await;
                    ticks += 1;
                    if let Err(e) = &report.sweep {
                        tracing::error!(error = %e, "Health sweep failed");
                    }
                    tracing::debug!(
                        "Tick {} complete: {} remediations dispatched",
                        ticks,
                        report.remediations.len()
                    );
                }
            }
        }

        tracing::info!("Supervisor stopped after {} ticks", ticks);
        ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remediator::{AutoRemediator, RemediatorStats};
    use dicomflow_core::{Alarm, AlarmState, AuditConfig, RemediationRule};
    use dicomflow_test_utils::{
        failed_login_record, RecordingInvoker, RecordingSink, ScriptedLogQuery,
        StaticAlarmService,
    };
    use std::time::Duration;
    use tokio::task::JoinHandle;

    struct Fixture {
        alarms: Arc<StaticAlarmService>,
        sink: Arc<RecordingSink>,
        logs: Arc<ScriptedLogQuery>,
        invoker: Arc<RecordingInvoker>,
    }

    impl Fixture {
        fn new(alarms: Vec<Alarm>, records: usize) -> Self {
            let records = (0..records)
                .map(|i| failed_login_record("2024-03-02 08:15:30.000", &format!("user{i}")))
                .collect();
            Self {
                alarms: Arc::new(StaticAlarmService::new(alarms)),
                sink: Arc::new(RecordingSink::new()),
                logs: Arc::new(ScriptedLogQuery::new(records)),
                invoker: Arc::new(RecordingInvoker::new()),
            }
        }

        fn supervisor(
            &self,
            config: &SupervisorConfig,
        ) -> (Supervisor, RemediatorHandle, JoinHandle<RemediatorStats>) {
            let (handle, worker) =
                AutoRemediator::new(self.invoker.clone(), Duration::from_secs(5), 8)
                    .spawn(CancelSignal::new());
            let supervisor = Supervisor::new(
                config,
                self.alarms.clone(),
                self.sink.clone(),
                self.logs.clone(),
                handle.clone(),
            )
            .unwrap();
            (supervisor, handle, worker)
        }
    }

    fn reboot() -> RemediationAction {
        RemediationAction::new(
            "auto-resolution-handler",
            serde_json::json!({ "issue_type": "reboot_instance" }),
        )
    }

    fn cpu_alarm() -> Alarm {
        Alarm::new("HighCPUUtilization", "CPUUtilization", AlarmState::Alarm).with_action("topic-a")
    }

    #[tokio::test]
    async fn matching_alarm_triggers_rule() {
        let fixture = Fixture::new(vec![cpu_alarm()], 0);
        let config =
            SupervisorConfig::new().with_rule(RemediationRule::new("HighCPUUtilization", reboot()));
        let (supervisor, handle, worker) = fixture.supervisor(&config);

        let report = supervisor.tick(&CancelSignal::new()).await;
        handle.shutdown().await;
        worker.await.unwrap();

        assert_eq!(report.remediations.len(), 1);
        assert_eq!(fixture.sink.published().len(), 1);
        let invoked = fixture.invoker.invoked();
        assert_eq!(invoked.len(), 1);
        assert_eq!(invoked[0].function_name, "auto-resolution-handler");
        assert_eq!(invoked[0].payload, reboot().payload_bytes());
    }

    #[tokio::test]
    async fn completion_target_receives_health_check_notice() {
        let fixture = Fixture::new(Vec::new(), 0);
        let config = SupervisorConfig::new().with_sweep_completion_target("alert-topic");
        let (supervisor, _handle, _worker) = fixture.supervisor(&config);

        let report = supervisor.tick(&CancelSignal::new()).await;

        assert!(report.sweep.as_ref().is_ok_and(|sweep| sweep.completion_notified));
        let published = fixture.sink.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].target, "alert-topic");
        assert_eq!(published[0].message, "System health check completed.");
    }

    #[tokio::test]
    async fn findings_trigger_finding_remediation_once() {
        let fixture = Fixture::new(Vec::new(), 3);
        let config = SupervisorConfig::new().with_finding_remediation(reboot());
        let (supervisor, handle, worker) = fixture.supervisor(&config);

        let report = supervisor.tick(&CancelSignal::new()).await;
        handle.shutdown().await;
        worker.await.unwrap();

        assert_eq!(report.findings().len(), 3);
        assert_eq!(report.remediations.len(), 1);
        assert_eq!(fixture.invoker.invoked().len(), 1);
    }

    #[tokio::test]
    async fn quiet_tick_dispatches_nothing() {
        let fixture = Fixture::new(Vec::new(), 0);
        let config = SupervisorConfig::new()
            .with_rule(RemediationRule::new("HighCPUUtilization", reboot()))
            .with_finding_remediation(reboot());
        let (supervisor, _handle, _worker) = fixture.supervisor(&config);

        let report = supervisor.tick(&CancelSignal::new()).await;

        assert!(report.sweep.is_ok());
        assert!(report.remediations.is_empty());
        assert_eq!(fixture.sink.attempts(), 0);
    }

    #[tokio::test]
    async fn sweep_failure_does_not_block_scan() {
        let fixture = Fixture::new(Vec::new(), 1);
        fixture.alarms.set_unavailable("throttled");
        let (supervisor, _handle, _worker) = fixture.supervisor(&SupervisorConfig::new());

        let report = supervisor.tick(&CancelSignal::new()).await;

        assert!(report.sweep.is_err());
        assert_eq!(report.findings().len(), 1);
    }

    #[tokio::test]
    async fn disabled_audit_skips_scan() {
        let fixture = Fixture::new(Vec::new(), 1);
        let config = SupervisorConfig::new().with_audit(AuditConfig {
            enabled: false,
            ..AuditConfig::default()
        });
        let (supervisor, _handle, _worker) = fixture.supervisor(&config);

        let report = supervisor.tick(&CancelSignal::new()).await;

        assert!(report.scan.is_none());
        assert!(fixture.logs.submitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_until_cancelled() {
        let fixture = Fixture::new(vec![cpu_alarm()], 0);
        let config = SupervisorConfig {
            sweep_interval_secs: 60,
            ..SupervisorConfig::default()
        };
        let (supervisor, _handle, _worker) = fixture.supervisor(&config);
        let cancel = CancelSignal::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(150)).await;
            trigger.cancel();
        });

        let ticks = supervisor.run(&cancel).await;

        // ticks at t = 0s, 60s, 120s
        assert_eq!(ticks, 3);
        assert_eq!(fixture.alarms.calls(), 3);
        assert_eq!(fixture.sink.published().len(), 3);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let fixture = Fixture::new(Vec::new(), 0);
        let (handle, _worker) =
            AutoRemediator::new(fixture.invoker.clone(), Duration::from_secs(5), 1)
                .spawn(CancelSignal::new());
        let config = SupervisorConfig {
            sweep_interval_secs: 0,
            ..SupervisorConfig::default()
        };

        let result = Supervisor::new(
            &config,
            fixture.alarms.clone(),
            fixture.sink.clone(),
            fixture.logs.clone(),
            handle,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
