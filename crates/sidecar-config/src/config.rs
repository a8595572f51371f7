use crate::{
    ConfigError, ConfigErrorResult, LogLevel, LoggingConfig, PortConfig, ReadinessConfig,
    ServiceConfig, TerminationConfig,
};

use std::path::{Path, PathBuf};

use log::info;
use serde::Deserialize;

const CONFIG_DIR_ENV: &str = "SIDECAR_CONFIG_DIR";
const CONFIG_DIR_NAME: &str = ".sidecar";
const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub port: PortConfig,
    pub readiness: ReadinessConfig,
    pub termination: TerminationConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config.
    ///
    /// Loading order:
    /// 1. SIDECAR_CONFIG_DIR env var, else ./.sidecar/
    /// 2. Auto-create the config directory
    /// 3. Load config.toml if it exists, else defaults
    /// 4. Apply SIDECAR_* environment variable overrides
    ///
    /// Does NOT validate - call validate() after load().
    pub fn load() -> ConfigErrorResult<Self> {
        let config_dir = Self::config_dir()?;

        if !config_dir.exists() {
            std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::Io {
                path: config_dir.clone(),
                source: e,
            })?;
        }

        let config_path = config_dir.join(CONFIG_FILENAME);

        let mut config = if config_path.exists() {
            Self::load_toml(&config_path)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Parse a config from TOML text (no env overrides).
    pub fn from_toml_str(contents: &str, origin: &Path) -> ConfigErrorResult<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::Toml {
            path: origin.to_path_buf(),
            source: e,
        })
    }

    fn load_toml(path: &Path) -> ConfigErrorResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::from_toml_str(&contents, path)
    }

    /// Get the config directory.
    /// Priority: SIDECAR_CONFIG_DIR env var > ./.sidecar/ (relative to cwd)
    pub fn config_dir() -> ConfigErrorResult<PathBuf> {
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            return Ok(PathBuf::from(dir));
        }

        let cwd = std::env::current_dir()
            .map_err(|_| ConfigError::config("Cannot determine current working directory"))?;
        Ok(cwd.join(CONFIG_DIR_NAME))
    }

    /// Validate all sections.
    /// Call after load() to catch all errors at startup.
    pub fn validate(&self) -> ConfigErrorResult<()> {
        self.service.validate()?;
        self.port.validate()?;
        self.readiness.validate()?;
        self.termination.validate()?;
        Ok(())
    }

    /// Absolute log directory.
    pub fn log_dir(&self) -> ConfigErrorResult<PathBuf> {
        Ok(Self::config_dir()?.join(&self.logging.dir))
    }

    /// Log configuration summary.
    pub fn log_summary(&self) {
        info!("Configuration loaded:");
        info!(
            "  service: {} candidate path(s), mode={}, marker={:?}, health={}",
            self.service.executable_paths.len(),
            self.service.mode,
            self.service.readiness_marker,
            self.service.health_path
        );
        info!(
            "  port: {}:{} (+{} fallbacks, settle {}ms)",
            self.port.host,
            self.port.default,
            self.port.max_attempts.saturating_sub(1),
            self.port.reap_settle_ms
        );
        info!(
            "  readiness: {} x {}ms (probe timeout {}ms)",
            self.readiness.max_attempts, self.readiness.interval_ms, self.readiness.probe_timeout_ms
        );
        info!(
            "  termination: {} x {}ms",
            self.termination.max_attempts, self.termination.interval_ms
        );
        info!(
            "  logging: {} (dir: {}, colored: {})",
            *self.logging.level, self.logging.dir, self.logging.colored
        );
    }

    fn apply_env_overrides(&mut self) {
        // Service
        if let Ok(path) = std::env::var("SIDECAR_EXECUTABLE") {
            self.service.executable_paths.insert(0, PathBuf::from(path));
        }
        Self::apply_env_option_string("SIDECAR_PROCESS_NAME", &mut self.service.process_name);
        Self::apply_env_string("SIDECAR_MODE", &mut self.service.mode);
        Self::apply_env_string(
            "SIDECAR_READINESS_MARKER",
            &mut self.service.readiness_marker,
        );

        // Port
        Self::apply_env_parse("SIDECAR_PORT", &mut self.port.default);
        Self::apply_env_parse("SIDECAR_PORT_MAX_ATTEMPTS", &mut self.port.max_attempts);

        // Readiness
        Self::apply_env_parse(
            "SIDECAR_READINESS_MAX_ATTEMPTS",
            &mut self.readiness.max_attempts,
        );
        Self::apply_env_parse(
            "SIDECAR_READINESS_INTERVAL_MS",
            &mut self.readiness.interval_ms,
        );
        Self::apply_env_parse(
            "SIDECAR_PROBE_TIMEOUT_MS",
            &mut self.readiness.probe_timeout_ms,
        );

        // Termination
        Self::apply_env_parse(
            "SIDECAR_TERMINATION_MAX_ATTEMPTS",
            &mut self.termination.max_attempts,
        );
        Self::apply_env_parse(
            "SIDECAR_TERMINATION_INTERVAL_MS",
            &mut self.termination.interval_ms,
        );

        // Logging
        if let Ok(level) = std::env::var("SIDECAR_LOG_LEVEL") {
            self.logging.level = LogLevel::parse_lenient(&level);
        }
        Self::apply_env_string("SIDECAR_LOG_DIR", &mut self.logging.dir);
        Self::apply_env_bool("SIDECAR_LOG_COLORED", &mut self.logging.colored);
    }

    /// Helper: Apply environment variable override for String values
    fn apply_env_string(var_name: &str, target: &mut String) {
        if let Ok(val) = std::env::var(var_name) {
            *target = val;
        }
    }

    /// Helper: Apply environment variable override for bool values (accepts "true"/"1")
    fn apply_env_bool(var_name: &str, target: &mut bool) {
        if let Ok(val) = std::env::var(var_name) {
            *target = val == "true" || val == "1";
        }
    }

    /// Helper: Apply environment variable override for parseable values
    fn apply_env_parse<T: std::str::FromStr>(var_name: &str, target: &mut T) {
        if let Ok(val) = std::env::var(var_name)
            && let Ok(parsed) = val.parse()
        {
            *target = parsed;
        }
    }

    /// Helper: Apply environment variable override for Option<String> values
    fn apply_env_option_string(var_name: &str, target: &mut Option<String>) {
        if let Ok(val) = std::env::var(var_name) {
            *target = Some(val);
        }
    }
}
