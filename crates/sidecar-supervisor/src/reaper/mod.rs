//! Forced cleanup of processes we do not hold a handle to.
//!
//! Used for instances orphaned by an earlier crash of the host, and as the
//! last resort when termination escalation fails.

pub(crate) mod parse;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use unix as platform;
#[cfg(windows)]
use windows as platform;

use crate::process::{self, SignalDelivery, own_pid};
use crate::{CleanupOutcome, PortProbe, SupervisorResult};

use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Kills processes by listening port or by executable name.
///
/// Both operations are idempotent: finding nothing to kill is a success.
/// An `Err` means the operating system tooling could not be invoked or
/// reported an error of its own; a process that survived, or a holder that
/// could not be identified, is reported through the outcome.
#[async_trait]
pub trait ProcessReaper: Send + Sync {
    async fn kill_by_port(&self, port: u16) -> SupervisorResult<CleanupOutcome>;

    async fn kill_by_name(&self, name: &str) -> SupervisorResult<CleanupOutcome>;
}

/// Reaper backed by the platform's process tools.
///
/// Linux: `lsof` (falling back to `fuser`) and `pgrep`.
/// macOS: `lsof` and `pgrep`.
/// Windows: `netstat -ano` and `taskkill`.
#[derive(Debug, Default, Clone)]
pub struct SystemReaper;

impl SystemReaper {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessReaper for SystemReaper {
    async fn kill_by_port(&self, port: u16) -> SupervisorResult<CleanupOutcome> {
        let listeners = platform::listening_pids(port).await?;
        debug!("Port {port} listeners: {listeners:?}");

        let targets = match select_targets(port, listeners, own_pid(), || {
            PortProbe::is_port_bound(port)
        }) {
            Ok(targets) => targets,
            Err(outcome) => return Ok(outcome),
        };

        info!("Reaping pids {targets:?} listening on port {port}");
        Ok(kill_all(&targets).await)
    }

    async fn kill_by_name(&self, name: &str) -> SupervisorResult<CleanupOutcome> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(CleanupOutcome::failure("empty process name"));
        }
        info!("Reaping processes named {name:?}");
        platform::kill_named(name).await
    }
}

/// Pids that may be killed to free `port`, or the final outcome when there
/// are none. A port that stays bound with no visible listener belongs to a
/// process the tools cannot see, typically one owned by another user.
pub(crate) fn select_targets(
    port: u16,
    listeners: Vec<u32>,
    me: u32,
    still_bound: impl FnOnce() -> bool,
) -> Result<Vec<u32>, CleanupOutcome> {
    let (ours, targets): (Vec<u32>, Vec<u32>) =
        listeners.into_iter().partition(|pid| *pid == me);

    if !targets.is_empty() {
        return Ok(targets);
    }
    if !ours.is_empty() {
        return Err(CleanupOutcome::failure(format!(
            "port {port} is held by this process"
        )));
    }
    if still_bound() {
        return Err(CleanupOutcome::failure(format!(
            "port {port} is held by a process that could not be identified"
        )));
    }
    Err(CleanupOutcome::success(format!(
        "no process listening on port {port}"
    )))
}

/// Force-kill each pid. A pid that is already gone counts as killed.
async fn kill_all(pids: &[u32]) -> CleanupOutcome {
    let mut killed = Vec::new();
    let mut refused = Vec::new();

    for &pid in pids {
        match process::send_forceful(pid).await {
            SignalDelivery::Sent | SignalDelivery::NoSuchProcess => killed.push(pid),
            SignalDelivery::Denied(reason) => {
                warn!("Could not kill pid {pid}: {reason}");
                refused.push(pid);
            }
        }
    }

    if refused.is_empty() {
        CleanupOutcome::success(format!("killed pids {killed:?}"))
    } else {
        CleanupOutcome::failure(format!("killed pids {killed:?}, refused {refused:?}"))
    }
}
