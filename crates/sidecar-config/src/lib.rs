mod config;
mod error;
mod log_level;
mod logging_config;
mod port_config;
mod readiness_config;
mod service_config;
mod termination_config;

#[cfg(test)]
mod tests;

pub use config::Config;
pub use error::{ConfigError, ConfigErrorResult};
pub use log_level::LogLevel;
pub use logging_config::LoggingConfig;
pub use port_config::PortConfig;
pub use readiness_config::ReadinessConfig;
pub use service_config::ServiceConfig;
pub use termination_config::TerminationConfig;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 23450;
const MIN_PORT: u16 = 1024;

const DEFAULT_MODE: &str = "desktop";
const DEFAULT_READINESS_MARKER: &str = "Application startup complete";
const DEFAULT_HEALTH_PATH: &str = "/health";

/// Pins the service's stdio to UTF-8 regardless of the host locale.
pub const ENCODING_ENV_VAR: &str = "PYTHONIOENCODING";
pub const ENCODING_ENV_VALUE: &str = "utf-8";
/// Tells the service it is running under a desktop supervisor.
pub const LAUNCH_CONTEXT_ENV_VAR: &str = "SIDECAR_LAUNCH_CONTEXT";
pub const LAUNCH_CONTEXT_ENV_VALUE: &str = "desktop";

const DEFAULT_LOG_LEVEL_STRING: &str = "info";
const DEFAULT_LOG_LEVEL: log::LevelFilter = log::LevelFilter::Info;
const DEFAULT_LOG_DIRECTORY: &str = "logs";
