//! Health monitor
//!
//! Each sweep reads the alarms currently in `ALARM` state and notifies the
//! first action target of each. Alarms without actions are left alone.
//! Sweeps are stateless: an alarm that stays in `ALARM` is notified again
//! on every sweep. With a completion target set, every successful sweep
//! ends with a "System health check completed." notice.

use dicomflow_core::{
    guarded, Alarm, AlarmService, AlarmServiceError, AlarmState, CancelSignal, Notification,
    NotificationError, NotificationSink, PublishAck,
};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// Alarms found in `ALARM`, in service order
    pub alarms: Vec<Alarm>,
    /// `(alarm name, target)` pairs that were notified
    pub notified: Vec<(String, String)>,
    /// Alarms with no action configured
    pub without_actions: Vec<String>,
    /// Alarms whose notification failed
    pub failed: Vec<(String, NotificationError)>,
    /// Whether the completion notice was published
    pub completion_notified: bool,
}

impl SweepReport {
    /// Names of the alarms found in `ALARM`
    #[must_use]
    pub fn alarm_names(&self) -> Vec<&str> {
        self.alarms.iter().map(|alarm| alarm.name.as_str()).collect()
    }

    /// Check if every alarm with an action was notified
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Polls alarm state and raises notifications
#[derive(Clone)]
pub struct HealthMonitor {
    alarms: Arc<dyn AlarmService>,
    sink: Arc<dyn NotificationSink>,
    call_timeout: Duration,
    completion_target: Option<String>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("call_timeout", &self.call_timeout)
            .field("completion_target", &self.completion_target)
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    /// Create new monitor
    #[must_use]
    pub fn new(
        alarms: Arc<dyn AlarmService>,
        sink: Arc<dyn NotificationSink>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            alarms,
            sink,
            call_timeout,
            completion_target: None,
        }
    }

    /// With target notified after every successful sweep
    #[inline]
    #[must_use]
    pub fn with_completion_target(mut self, target: impl Into<String>) -> Self {
        self.completion_target = Some(target.into());
        self
    }

    /// Notify the first action target of every alarm in `ALARM`
    ///
    /// # Errors
    /// The alarm service error if alarms could not be listed; per-alarm
    /// publish failures are recorded in the report instead
    pub async fn sweep(&self, cancel: &CancelSignal) -> Result<SweepReport, AlarmServiceError> {
        let alarms = guarded(
            self.alarms.list_alarms(AlarmState::Alarm),
            self.call_timeout,
            cancel,
        )
        .await
        .unwrap_or_else(|interrupted| Err(interrupted.into()))
        .map_err(|e| {
            tracing::error!("Error listing alarms: {}", e);
            e
        })?;

        let mut report = SweepReport::default();
        for alarm in &alarms {
            let Some(target) = alarm.first_action() else {
                tracing::debug!("Alarm {} has no actions, skipping", alarm.name);
                report.without_actions.push(alarm.name.clone());
                continue;
            };

            let message = format!("Alarm {} triggered", alarm.name);
            match self.publish(Notification::new(target, message), cancel).await {
                Ok(_) => {
                    tracing::info!(alarm = %alarm.name, "Notification sent to {}", target);
                    report.notified.push((alarm.name.clone(), target.to_string()));
                }
                Err(e) => {
                    tracing::error!(
                        alarm = %alarm.name,
                        "Error sending notification to {}: {}",
                        target,
                        e
                    );
                    report.failed.push((alarm.name.clone(), e));
                }
            }
        }

        tracing::debug!(
            "Sweep complete: {} alarms, {} notified",
            alarms.len(),
            report.notified.len()
        );
        report.alarms = alarms;

        if let Some(target) = &self.completion_target {
            let notice = Notification::new(target.clone(), "System health check completed.");
            match self.publish(notice, cancel).await {
                Ok(_) => report.completion_notified = true,
                Err(e) => tracing::error!("Error sending health check notice to {}: {}", target, e),
            }
        }
        Ok(report)
    }

    async fn publish(
        &self,
        notification: Notification,
        cancel: &CancelSignal,
    ) -> Result<PublishAck, NotificationError> {
        guarded(self.sink.publish(&notification), self.call_timeout, cancel)
            .await
            .unwrap_or_else(|interrupted| Err(interrupted.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicomflow_test_utils::{RecordingSink, StaticAlarmService};
    use pretty_assertions::assert_eq;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn alarm(name: &str, state: AlarmState) -> Alarm {
        Alarm::new(name, "CPUUtilization", state)
    }

    #[tokio::test]
    async fn notifies_first_action_of_each_alarm() {
        let service = Arc::new(StaticAlarmService::new(vec![
            alarm("HighCPUUtilization", AlarmState::Alarm)
                .with_action("topic-a")
                .with_action("topic-b"),
            alarm("DiskFull", AlarmState::Alarm).with_action("topic-c"),
            alarm("Healthy", AlarmState::Ok).with_action("topic-d"),
        ]));
        let sink = Arc::new(RecordingSink::new());
        let monitor = HealthMonitor::new(service, sink.clone(), TIMEOUT);

        let report = monitor.sweep(&CancelSignal::new()).await.unwrap();

        let targets: Vec<_> = sink.published().into_iter().map(|n| n.target).collect();
        assert_eq!(targets, vec!["topic-a", "topic-c"]);
        assert_eq!(report.alarm_names(), vec!["HighCPUUtilization", "DiskFull"]);
        assert_eq!(
            sink.published()[0].message,
            "Alarm HighCPUUtilization triggered"
        );
    }

    #[tokio::test]
    async fn no_alarms_means_no_notifications() {
        let service = Arc::new(StaticAlarmService::new(vec![alarm("Healthy", AlarmState::Ok)]));
        let sink = Arc::new(RecordingSink::new());

        let report = HealthMonitor::new(service, sink.clone(), TIMEOUT)
            .sweep(&CancelSignal::new())
            .await
            .unwrap();

        assert!(report.alarms.is_empty());
        assert_eq!(sink.attempts(), 0);
    }

    #[tokio::test]
    async fn alarm_without_actions_is_a_no_op() {
        let service = Arc::new(StaticAlarmService::new(vec![alarm("Quiet", AlarmState::Alarm)]));
        let sink = Arc::new(RecordingSink::new());

        let report = HealthMonitor::new(service, sink.clone(), TIMEOUT)
            .sweep(&CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(report.without_actions, vec!["Quiet".to_string()]);
        assert_eq!(sink.attempts(), 0);
    }

    #[tokio::test]
    async fn publish_failure_is_contained() {
        let service = Arc::new(StaticAlarmService::new(vec![
            alarm("First", AlarmState::Alarm).with_action("topic-a"),
            alarm("Second", AlarmState::Alarm).with_action("topic-b"),
        ]));
        let sink = Arc::new(RecordingSink::new());
        sink.fail_next([NotificationError::Rejected {
            target: "topic-a".to_string(),
            reason: "denied".to_string(),
        }]);

        let report = HealthMonitor::new(service, sink.clone(), TIMEOUT)
            .sweep(&CancelSignal::new())
            .await
            .unwrap();

        assert!(!report.is_clean());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "First");
        assert_eq!(
            report.notified,
            vec![("Second".to_string(), "topic-b".to_string())]
        );
    }

    #[tokio::test]
    async fn listing_failure_fails_the_sweep() {
        let service = Arc::new(StaticAlarmService::new(Vec::new()));
        service.set_unavailable("throttled");
        let sink = Arc::new(RecordingSink::new());

        let err = HealthMonitor::new(service, sink, TIMEOUT)
            .sweep(&CancelSignal::new())
            .await
            .unwrap_err();

        assert_eq!(err, AlarmServiceError::Unavailable("throttled".to_string()));
    }

    #[tokio::test]
    async fn repeated_sweeps_do_not_deduplicate() {
        let service = Arc::new(StaticAlarmService::new(vec![
            alarm("HighCPUUtilization", AlarmState::Alarm).with_action("topic-a"),
        ]));
        let sink = Arc::new(RecordingSink::new());
        let monitor = HealthMonitor::new(service, sink.clone(), TIMEOUT);

        monitor.sweep(&CancelSignal::new()).await.unwrap();
        monitor.sweep(&CancelSignal::new()).await.unwrap();

        assert_eq!(sink.published().len(), 2);
    }

    #[tokio::test]
    async fn completion_notice_follows_every_successful_sweep() {
        let service = Arc::new(StaticAlarmService::new(vec![
            alarm("HighCPUUtilization", AlarmState::Alarm).with_action("topic-a"),
        ]));
        let sink = Arc::new(RecordingSink::new());
        let monitor = HealthMonitor::new(service.clone(), sink.clone(), TIMEOUT)
            .with_completion_target("alert-topic");

        let first = monitor.sweep(&CancelSignal::new()).await.unwrap();
        service.set_alarms(Vec::new());
        let second = monitor.sweep(&CancelSignal::new()).await.unwrap();

        assert!(first.completion_notified && second.completion_notified);
        let sent: Vec<_> = sink
            .published()
            .into_iter()
            .map(|n| (n.target, n.message))
            .collect();
        assert_eq!(
            sent,
            vec![
                ("topic-a".to_string(), "Alarm HighCPUUtilization triggered".to_string()),
                ("alert-topic".to_string(), "System health check completed.".to_string()),
                ("alert-topic".to_string(), "System health check completed.".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn failed_sweep_sends_no_completion_notice() {
        let service = Arc::new(StaticAlarmService::new(Vec::new()));
        service.set_unavailable("throttled");
        let sink = Arc::new(RecordingSink::new());

        let result = HealthMonitor::new(service, sink.clone(), TIMEOUT)
            .with_completion_target("alert-topic")
            .sweep(&CancelSignal::new())
            .await;

        assert!(result.is_err());
        assert_eq!(sink.attempts(), 0);
    }
}
