use crate::{ConfigError, ConfigErrorResult};

use std::time::Duration;

use serde::Deserialize;

// Readiness constraints
pub const MIN_READINESS_ATTEMPTS: u32 = 1;
pub const MAX_READINESS_ATTEMPTS: u32 = 3600;
pub const DEFAULT_READINESS_ATTEMPTS: u32 = 120;

pub const MIN_READINESS_INTERVAL_MS: u64 = 10;
pub const MAX_READINESS_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_READINESS_INTERVAL_MS: u64 = 1000;

pub const MIN_PROBE_TIMEOUT_MS: u64 = 50;
pub const MAX_PROBE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1000;

/// How long Start() waits for the service to report ready.
///
/// The overall budget is `max_attempts * interval_ms`, plus whatever the
/// health probes themselves take.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub max_attempts: u32,
    pub interval_ms: u64,
    /// Per-request timeout for the liveness endpoint
    pub probe_timeout_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_READINESS_ATTEMPTS,
            interval_ms: DEFAULT_READINESS_INTERVAL_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
        }
    }
}

impl ReadinessConfig {
    pub fn validate(&self) -> ConfigErrorResult<()> {
        if self.max_attempts < MIN_READINESS_ATTEMPTS || self.max_attempts > MAX_READINESS_ATTEMPTS
        {
            return Err(ConfigError::readiness(format!(
                "readiness.max_attempts must be {}-{}, got {}",
                MIN_READINESS_ATTEMPTS, MAX_READINESS_ATTEMPTS, self.max_attempts
            )));
        }

        if self.interval_ms < MIN_READINESS_INTERVAL_MS
            || self.interval_ms > MAX_READINESS_INTERVAL_MS
        {
            return Err(ConfigError::readiness(format!(
                "readiness.interval_ms must be {}-{}, got {}",
                MIN_READINESS_INTERVAL_MS, MAX_READINESS_INTERVAL_MS, self.interval_ms
            )));
        }

        if self.probe_timeout_ms < MIN_PROBE_TIMEOUT_MS
            || self.probe_timeout_ms > MAX_PROBE_TIMEOUT_MS
        {
            return Err(ConfigError::readiness(format!(
                "readiness.probe_timeout_ms must be {}-{}, got {}",
                MIN_PROBE_TIMEOUT_MS, MAX_PROBE_TIMEOUT_MS, self.probe_timeout_ms
            )));
        }

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}
