use crate::{ConfigError, ConfigErrorResult, DEFAULT_HOST, DEFAULT_PORT, MIN_PORT};

use std::time::Duration;

use serde::Deserialize;

pub const MIN_PORT_ATTEMPTS: u16 = 1;
pub const MAX_PORT_ATTEMPTS: u16 = 100;
pub const DEFAULT_PORT_ATTEMPTS: u16 = 10;

pub const MAX_REAP_SETTLE_MS: u64 = 10_000;
pub const DEFAULT_REAP_SETTLE_MS: u64 = 500;

/// Port assignment policy for the supervised service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// Loopback host the service binds (127.0.0.1 or localhost only)
    pub host: String,
    /// Well-known port tried first
    pub default: u16,
    /// Consecutive ports tried (default, default+1, ...) before giving up
    pub max_attempts: u16,
    /// Pause after a reap before the port is re-probed
    pub reap_settle_ms: u64,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            host: String::from(DEFAULT_HOST),
            default: DEFAULT_PORT,
            max_attempts: DEFAULT_PORT_ATTEMPTS,
            reap_settle_ms: DEFAULT_REAP_SETTLE_MS,
        }
    }
}

impl PortConfig {
    pub fn validate(&self) -> ConfigErrorResult<()> {
        if self.host != DEFAULT_HOST && self.host != "localhost" {
            return Err(ConfigError::port(format!(
                "port.host must be {DEFAULT_HOST} or localhost, got {}",
                self.host
            )));
        }

        if self.default < MIN_PORT {
            return Err(ConfigError::port(format!(
                "port.default must be >= {MIN_PORT} (unprivileged), got {}",
                self.default
            )));
        }

        if self.max_attempts < MIN_PORT_ATTEMPTS || self.max_attempts > MAX_PORT_ATTEMPTS {
            return Err(ConfigError::port(format!(
                "port.max_attempts must be {}-{}, got {}",
                MIN_PORT_ATTEMPTS, MAX_PORT_ATTEMPTS, self.max_attempts
            )));
        }

        if u32::from(self.default) + u32::from(self.max_attempts) - 1 > u32::from(u16::MAX) {
            return Err(ConfigError::port(format!(
                "port range {}+{} runs past {}",
                self.default,
                self.max_attempts,
                u16::MAX
            )));
        }

        if self.reap_settle_ms > MAX_REAP_SETTLE_MS {
            return Err(ConfigError::port(format!(
                "port.reap_settle_ms must be <= {MAX_REAP_SETTLE_MS}, got {}",
                self.reap_settle_ms
            )));
        }

        Ok(())
    }

    pub fn reap_settle(&self) -> Duration {
        Duration::from_millis(self.reap_settle_ms)
    }
}
