//! Supervision of a single local backend service process.
//!
//! The [`Supervisor`] owns at most one running instance of the service. It
//! resolves port conflicts left behind by earlier runs, launches the
//! executable, waits for it to report ready, and tears it down with an
//! escalating sequence of termination attempts.

mod cleanup_outcome;
mod error;
mod escalator;
mod event;
mod health;
mod launcher;
mod port_probe;
mod process;
mod readiness;
mod reaper;
mod retry;
mod service_handle;
mod service_state;
mod shutdown;
mod supervisor;

#[cfg(test)]
mod tests;

pub use cleanup_outcome::CleanupOutcome;
pub use error::{Result as SupervisorResult, SupervisorError};
pub use escalator::TerminationEscalator;
pub use event::{SupervisorEvent, SupervisorNotice};
pub use health::HealthProbe;
pub use launcher::ServiceLauncher;
pub use port_probe::PortProbe;
pub use process::{SignalDelivery, is_alive};
pub use readiness::{LineLevel, OutputStream, ReadinessMonitor, classify_line};
pub use reaper::{ProcessReaper, SystemReaper};
pub use retry::{RetryOutcome, RetryPolicy, retry_until};
pub use service_handle::{ExitInfo, ServiceHandle};
pub use service_state::ServiceState;
pub use shutdown::ShutdownSignal;
pub use supervisor::Supervisor;

pub use sidecar_config::Config;

const LOOPBACK_HOST: &str = "127.0.0.1";
