use std::fmt;

use serde::Serialize;

/// Lifecycle state of the supervised service.
///
/// Only the supervisor writes this value; everyone else observes it
/// through [`crate::Supervisor::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServiceState {
    /// No instance has been started in this session
    Idle,
    /// Port resolution, launch, or the readiness wait is in progress
    Starting,
    /// The service reported ready on this port
    Running { port: u16 },
    /// Termination escalation is in progress
    Stopping,
    /// The last instance is gone
    Stopped,
    /// The last control operation failed; a retained process may still need reaping
    Failed { error: String },
}

impl ServiceState {
    /// A control operation is in flight.
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Running { port } => Some(*port),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running { .. } => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running { port } => write!(f, "running (port {port})"),
            Self::Failed { error } => write!(f, "failed: {error}"),
            other => f.write_str(other.label()),
        }
    }
}
