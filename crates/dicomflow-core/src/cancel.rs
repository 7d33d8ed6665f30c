//! Cancellation and per-call deadlines
//!
//! Every call against an external collaborator goes through [`guarded`],
//! which races the call against its timeout and the shared [`CancelSignal`].
//! An interrupted call is dropped, so no further requests are issued on
//! its behalf.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Cooperative cancellation signal shared between a caller and its workers
#[derive(Debug, Clone)]
pub struct CancelSignal {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Create new, not-yet-cancelled signal
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Cancel every holder of this signal
    #[inline]
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Check whether cancellation was requested
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once cancellation is requested
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            // Sender is held by `self`, so this branch is unreachable while we are borrowed.
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a guarded call did not produce a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// Call exceeded its timeout
    TimedOut(Duration),
    /// Cancellation was requested
    Cancelled,
}

/// Run `call` under a timeout, abandoning it if `cancel` fires first
///
/// # Errors
/// - `Interrupted::Cancelled` if the signal was already set or fires mid-call
/// - `Interrupted::TimedOut` if `timeout` elapses first
pub async fn guarded<F, T>(
    call: F,
    timeout: Duration,
    cancel: &CancelSignal,
) -> Result<T, Interrupted>
where
    F: Future<Output = T>,
{
    if cancel.is_cancelled() {
        return Err(Interrupted::Cancelled);
    }

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Interrupted::Cancelled),
        outcome = tokio::time::timeout(timeout, call) => {
            outcome.map_err(|_| Interrupted::TimedOut(timeout))
        }
    }
}
