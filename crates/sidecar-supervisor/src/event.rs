use crate::{ExitInfo, OutputStream};

/// Inputs that drive the supervisor's state machine.
///
/// Output readers and the exit waiter produce these; only the supervisor
/// consumes them. Every event carries the pid of the instance it came
/// from so events from a replaced instance can be dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    LineReceived {
        pid: u32,
        stream: OutputStream,
        line: String,
    },
    MarkerSeen {
        pid: u32,
    },
    ProbeSucceeded {
        pid: u32,
        port: u16,
    },
    ProcessExited {
        pid: u32,
        exit: ExitInfo,
    },
}

impl SupervisorEvent {
    pub fn pid(&self) -> u32 {
        match self {
            Self::LineReceived { pid, .. }
            | Self::MarkerSeen { pid }
            | Self::ProbeSucceeded { pid, .. }
            | Self::ProcessExited { pid, .. } => *pid,
        }
    }
}

/// Notifications published to observers through
/// [`crate::Supervisor::notices`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorNotice {
    /// The instance reported ready for the first time
    InstanceReady { pid: u32, port: u16 },
    /// A line of service output looked like a warning or error
    OutputWarning {
        pid: u32,
        stream: OutputStream,
        line: String,
    },
    /// The instance exited when nobody asked it to, or with a failure status
    AnomalousExit { pid: u32, exit: ExitInfo },
}
