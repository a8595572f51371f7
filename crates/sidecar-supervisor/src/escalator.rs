use crate::process::{self, SignalDelivery};
use crate::{
    ProcessReaper, RetryOutcome, RetryPolicy, ServiceHandle, SupervisorError, SupervisorResult,
    retry_until,
};

use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

use error_location::ErrorLocation;
use sidecar_config::TerminationConfig;
use tracing::{error, info, warn};

/// Terminates one service instance with increasing force.
///
/// 1. Graceful request (SIGTERM / CTRL_BREAK), then wait one interval.
/// 2. Up to `max_attempts` rounds of forceful kill, each followed by a wait.
/// 3. A by-name reap through the [`ProcessReaper`].
///
/// Reaching step 3 without a hard failure counts as success even if the
/// process cannot be confirmed gone; that case is logged.
pub struct TerminationEscalator {
    reaper: Arc<dyn ProcessReaper>,
    process_name: Option<String>,
    max_attempts: u32,
    interval: Duration,
}

impl TerminationEscalator {
    pub fn new(
        reaper: Arc<dyn ProcessReaper>,
        process_name: Option<String>,
        termination: &TerminationConfig,
    ) -> Self {
        Self {
            reaper,
            process_name,
            max_attempts: termination.max_attempts,
            interval: termination.interval(),
        }
    }

    /// Returns `Ok(false)` only when no termination request could be
    /// delivered at all.
    pub async fn stop(&self, handle: &ServiceHandle) -> SupervisorResult<bool> {
        let pid = handle.pid();

        if handle.has_exited() {
            info!("Service pid {pid} already exited");
            return Ok(true);
        }

        info!("Requesting graceful shutdown of pid {pid}");
        match process::send_graceful(pid).await {
            SignalDelivery::Sent => {
                if handle.wait_exit(self.interval).await {
                    info!("Service pid {pid} exited gracefully");
                    return Ok(true);
                }
            }
            SignalDelivery::NoSuchProcess => return Ok(true),
            SignalDelivery::Denied(reason) => {
                warn!("Graceful shutdown of pid {pid} refused: {reason}");
                match process::send_forceful(pid).await {
                    SignalDelivery::Sent => {
                        if handle.wait_exit(self.interval).await {
                            return Ok(true);
                        }
                    }
                    SignalDelivery::NoSuchProcess => return Ok(true),
                    SignalDelivery::Denied(reason) => {
                        error!("Could not signal pid {pid} at all: {reason}");
                        return Ok(false);
                    }
                }
            }
        }

        let policy = RetryPolicy::fixed(self.max_attempts, Duration::ZERO);
        let outcome = retry_until(&policy, "forceful termination", None, |round| async move {
            if handle.has_exited() {
                return Some(());
            }
            warn!(
                "Service pid {pid} still running, forceful kill {round}/{}",
                self.max_attempts
            );
            match process::send_forceful(pid).await {
                SignalDelivery::NoSuchProcess => return Some(()),
                SignalDelivery::Denied(reason) => {
                    warn!("Forceful kill of pid {pid} refused: {reason}")
                }
                SignalDelivery::Sent => {}
            }
            handle.wait_exit(self.interval).await.then_some(())
        })
        .await;

        if let RetryOutcome::Completed { attempts, .. } = outcome {
            info!("Service pid {pid} terminated after {attempts} forceful round(s)");
            return Ok(true);
        }

        self.reap_by_name(handle).await
    }

    async fn reap_by_name(&self, handle: &ServiceHandle) -> SupervisorResult<bool> {
        let pid = handle.pid();
        let Some(name) = &self.process_name else {
            warn!("Service pid {pid} survived escalation and no process name is known to reap");
            return Ok(true);
        };

        warn!("Service pid {pid} survived escalation, reaping by name {name:?}");
        let outcome = self.reaper.kill_by_name(name).await.map_err(|e| {
            SupervisorError::TerminationIncomplete {
                pid,
                message: format!("by-name reap could not run: {e}"),
                location: ErrorLocation::from(Location::caller()),
            }
        })?;

        if !outcome.succeeded {
            warn!("By-name reap of {name:?} reported: {}", outcome.detail);
        }
        if !handle.wait_exit(self.interval).await {
            warn!("Service pid {pid} may still be running after by-name reap");
        }

        Ok(true)
    }
}
