use crate::{ConfigError, ConfigErrorResult};

use std::time::Duration;

use serde::Deserialize;

pub const MIN_TERMINATION_ATTEMPTS: u32 = 1;
pub const MAX_TERMINATION_ATTEMPTS: u32 = 10;
pub const DEFAULT_TERMINATION_ATTEMPTS: u32 = 3;

pub const MIN_TERMINATION_INTERVAL_MS: u64 = 50;
pub const MAX_TERMINATION_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_TERMINATION_INTERVAL_MS: u64 = 500;

/// Escalation budget used by Stop().
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TerminationConfig {
    /// Forceful-kill rounds before falling back to a by-name reap
    pub max_attempts: u32,
    /// Wait between a signal and the next liveness check
    pub interval_ms: u64,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_TERMINATION_ATTEMPTS,
            interval_ms: DEFAULT_TERMINATION_INTERVAL_MS,
        }
    }
}

impl TerminationConfig {
    pub fn validate(&self) -> ConfigErrorResult<()> {
        if self.max_attempts < MIN_TERMINATION_ATTEMPTS
            || self.max_attempts > MAX_TERMINATION_ATTEMPTS
        {
            return Err(ConfigError::termination(format!(
                "termination.max_attempts must be {}-{}, got {}",
                MIN_TERMINATION_ATTEMPTS, MAX_TERMINATION_ATTEMPTS, self.max_attempts
            )));
        }

        if self.interval_ms < MIN_TERMINATION_INTERVAL_MS
            || self.interval_ms > MAX_TERMINATION_INTERVAL_MS
        {
            return Err(ConfigError::termination(format!(
                "termination.interval_ms must be {}-{}, got {}",
                MIN_TERMINATION_INTERVAL_MS, MAX_TERMINATION_INTERVAL_MS, self.interval_ms
            )));
        }

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Upper bound on how long an escalation can keep the caller waiting,
    /// excluding the final by-name reap.
    pub fn worst_case(&self) -> Duration {
        self.interval() * (self.max_attempts + 1)
    }
}
