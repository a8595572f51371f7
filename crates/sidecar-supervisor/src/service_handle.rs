use crate::process;

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How a service process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    /// Exit code, when the process returned one
    pub code: Option<i32>,
    /// Terminating signal on Unix
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }

    /// Exit status could not be collected.
    pub fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }

    /// A zero exit code is always clean. When a stop was requested, death by
    /// our own termination request counts as clean too.
    pub fn is_clean(&self, stop_requested: bool) -> bool {
        if self.code == Some(0) {
            return true;
        }
        if !stop_requested {
            return false;
        }

        #[cfg(unix)]
        {
            matches!(self.signal, Some(libc::SIGTERM) | Some(libc::SIGKILL))
                || matches!(self.code, Some(code) if code == 128 + libc::SIGTERM)
        }

        // taskkill /F reports exit code 1; CTRL_BREAK surfaces as STATUS_CONTROL_C_EXIT
        #[cfg(not(unix))]
        {
            true
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

/// One running instance of the service.
///
/// The child is moved into a waiter task at construction so its exit is
/// collected promptly; the handle keeps the pid and a watch on the exit
/// status. Dropping the handle aborts every task attached to it, which
/// closes the output pipes. It does not kill the process.
pub struct ServiceHandle {
    pid: u32,
    port: u16,
    executable: PathBuf,
    launched_at: DateTime<Utc>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServiceHandle {
    /// Take ownership of a freshly spawned child. Must be called inside a
    /// tokio runtime.
    pub(crate) fn new(mut child: Child, pid: u32, port: u16, executable: PathBuf) -> Self {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (exit_tx, exit_rx) = watch::channel(None);

        let waiter = tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => ExitInfo::from_status(status),
                Err(e) => {
                    warn!("Failed to collect exit status of pid {pid}: {e}");
                    ExitInfo::unknown()
                }
            };
            debug!("Service pid {pid} exited ({exit})");
            exit_tx.send_replace(Some(exit));
        });

        Self {
            pid,
            port,
            executable,
            launched_at: Utc::now(),
            stdout,
            stderr,
            exit_rx,
            tasks: vec![waiter],
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn launched_at(&self) -> DateTime<Utc> {
        self.launched_at
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Tie a background task's lifetime to this handle.
    pub fn attach_task(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    pub fn exit_receiver(&self) -> watch::Receiver<Option<ExitInfo>> {
        self.exit_rx.clone()
    }

    /// Exit status, once the process has been reaped.
    pub fn exit(&self) -> Option<ExitInfo> {
        *self.exit_rx.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Not yet reaped and still present in the process table.
    pub fn is_alive(&self) -> bool {
        !self.has_exited() && process::is_alive(self.pid)
    }

    /// Wait up to `timeout` for the process to exit. Returns whether it did.
    pub async fn wait_exit(&self, timeout: Duration) -> bool {
        let mut rx = self.exit_rx.clone();
        match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(_)) => true,
            // Waiter task gone without reporting; fall back to the process table
            Ok(Err(_)) => !process::is_alive(self.pid),
            Err(_) => false,
        }
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("pid", &self.pid)
            .field("port", &self.port)
            .field("executable", &self.executable)
            .field("launched_at", &self.launched_at)
            .field("exit", &self.exit())
            .finish()
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
