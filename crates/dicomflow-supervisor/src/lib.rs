//! dicomflow Supervisor
//!
//! The supervisory path, independent of the batch pipeline:
//! - [`HealthMonitor`]: notifies the first action of every alarm in `ALARM`
//! - [`AuditScanner`]: time-windowed anomaly queries with polling
//! - [`AutoRemediator`]: fire-and-forget remediation through a queue
//! - [`Supervisor`]: ticks all three on a fixed interval
//!
//! # Example
//!
//! ```rust,ignore
//! use dicomflow_supervisor::{AutoRemediator, Supervisor};
//!
//! let cancel = CancelSignal::new();
//! let (remediator, worker) = AutoRemediator::new(invoker, timeout, 64).spawn(cancel.clone());
//! let supervisor = Supervisor::new(&config.supervisor, alarms, sink, logs, remediator)?;
//! let ticks = supervisor.run(&cancel).await;
//! ```

#![warn(unreachable_pub)]

pub mod audit;
pub mod health;
pub mod remediator;
pub mod supervisor;

pub use audit::AuditScanner;
pub use health::{HealthMonitor, SweepReport};
pub use remediator::{
    AutoRemediator, RemediationTicket, RemediatorHandle, RemediatorMessage, RemediatorStats,
};
pub use supervisor::{Supervisor, TickReport};
