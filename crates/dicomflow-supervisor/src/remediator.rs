//! Auto-remediator
//!
//! Fire-and-forget remediation as a one-way message send:
//! - [`RemediatorHandle::remediate`] enqueues a request and returns at once
//! - A background worker submits each request to the invocation service
//! - Enqueue and invocation failures are logged and never escalated
//!
//! The worker exits after [`RemediatorHandle::shutdown`] or once every
//! handle is dropped, reporting what it did as [`RemediatorStats`].

use dicomflow_core::{
    guarded, CancelSignal, RemediationInvokeError, RemediationInvoker, RemediationRequest,
    SupervisorConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use ulid::Ulid;

/// Receipt for an enqueued remediation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemediationTicket(pub Ulid);

impl std::fmt::Display for RemediationTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages sent to the remediation worker
#[derive(Debug, Clone)]
pub enum RemediatorMessage {
    /// Submit an invocation
    Invoke {
        ticket: RemediationTicket,
        request: RemediationRequest,
    },
    /// Stop after the messages already queued
    Shutdown,
}

/// Worker totals, returned when it stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemediatorStats {
    /// Invocations accepted by the service
    pub invoked: usize,
    /// Invocations that failed
    pub failed: usize,
}

/// Handle for enqueuing remediations
#[derive(Debug, Clone)]
pub struct RemediatorHandle {
    sender: mpsc::Sender<RemediatorMessage>,
    capacity: usize,
}

impl RemediatorHandle {
    /// Enqueue a remediation without waiting for it
    ///
    /// Returns `None` when the request could not be enqueued; the failure
    /// is logged.
    pub fn remediate(
        &self,
        function_name: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Option<RemediationTicket> {
        let request = RemediationRequest::new(function_name, payload);
        match self.try_remediate(request) {
            Ok(ticket) => Some(ticket),
            Err((function_name, e)) => {
                tracing::error!("Error invoking remediation function {}: {}", function_name, e);
                None
            }
        }
    }

    fn try_remediate(
        &self,
        request: RemediationRequest,
    ) -> Result<RemediationTicket, (String, RemediationInvokeError)> {
        let ticket = RemediationTicket(Ulid::new());
        let function_name = request.function_name.clone();

        match self.sender.try_send(RemediatorMessage::Invoke { ticket, request }) {
            Ok(()) => {
                tracing::debug!(%ticket, "Queued remediation {}", function_name);
                Ok(ticket)
            }
            Err(TrySendError::Full(_)) => Err((
                function_name,
                RemediationInvokeError::QueueFull(self.capacity),
            )),
            Err(TrySendError::Closed(_)) => {
                Err((function_name, RemediationInvokeError::WorkerStopped))
            }
        }
    }

    /// Ask the worker to stop once the queue ahead of this message drains
    pub async fn shutdown(&self) {
        if self.sender.send(RemediatorMessage::Shutdown).await.is_err() {
            tracing::debug!("Remediation worker already stopped");
        }
    }

    /// Check if the worker is still accepting messages
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Background remediation worker
pub struct AutoRemediator {
    invoker: Arc<dyn RemediationInvoker>,
    call_timeout: Duration,
    capacity: usize,
}

impl std::fmt::Debug for AutoRemediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoRemediator")
            .field("call_timeout", &self.call_timeout)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl AutoRemediator {
    /// Create remediator; call [`AutoRemediator::spawn`] to start it
    #[must_use]
    pub fn new(
        invoker: Arc<dyn RemediationInvoker>,
        call_timeout: Duration,
        capacity: usize,
    ) -> Self {
        Self {
            invoker,
            call_timeout,
            capacity: capacity.max(1),
        }
    }

    /// Create remediator sized and timed by the supervisor configuration
    #[must_use]
    pub fn from_config(invoker: Arc<dyn RemediationInvoker>, config: &SupervisorConfig) -> Self {
        Self::new(invoker, config.call_timeout(), config.remediation_queue_capacity)
    }

    /// Start the worker on the current runtime
    ///
    /// `cancel` abandons an in-flight invocation and stops the worker.
    pub fn spawn(self, cancel: CancelSignal) -> (RemediatorHandle, JoinHandle<RemediatorStats>) {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let handle = RemediatorHandle {
            sender,
            capacity: self.capacity,
        };
        let worker = tokio::spawn(remediation_worker(self, receiver, cancel));
        (handle, worker)
    }
}

async fn remediation_worker(
    remediator: AutoRemediator,
    mut receiver: mpsc::Receiver<RemediatorMessage>,
    cancel: CancelSignal,
) -> RemediatorStats {
    let mut stats = RemediatorStats::default();

    loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = receiver.recv() => message,
        };

        match message {
            Some(RemediatorMessage::Invoke { ticket, request }) => {
                let outcome = guarded(
                    remediator.invoker.invoke_async(&request),
                    remediator.call_timeout,
                    &cancel,
                )
                .await
                .unwrap_or_else(|interrupted| Err(interrupted.into()));

                match outcome {
                    Ok(handle) => {
                        stats.invoked += 1;
                        tracing::info!(
                            %ticket,
                            invocation_id = %handle.invocation_id,
                            "Invoked remediation function {}",
                            request.function_name
                        );
                    }
                    Err(e) => {
                        stats.failed += 1;
                        tracing::error!(
                            %ticket,
                            "Error invoking remediation function {}: {}",
                            request.function_name,
                            e
                        );
                    }
                }
            }
            Some(RemediatorMessage::Shutdown) | None => break,
        }
    }

    tracing::debug!(
        "Remediation worker stopped: {} invoked, {} failed",
        stats.invoked,
        stats.failed
    );
    stats
}
