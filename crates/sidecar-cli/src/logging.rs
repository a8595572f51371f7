//! Logging setup with file rotation.

use sidecar_config::Config;

use std::error::Error;
use std::path::Path;

use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, fmt, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

const LOG_FILE_PREFIX: &str = "sidecarctl";
const LOG_RETENTION_FILES: usize = 7;

/// Setup logging with console and rotating file output.
///
/// # Log Layers
/// - Console: human-readable on stderr, colored unless `logging.colored` is off
/// - File: plain text, daily rotation, 7-day retention
///
/// `RUST_LOG` takes precedence over `logging.level`. When the log directory
/// cannot be prepared, only the console layer is installed.
pub fn setup_logging(config: &Config) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_directive()));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_ansi(config.logging.colored)
        .with_writer(std::io::stderr);

    let file_appender = config
        .log_dir()
        .map_err(Box::<dyn Error>::from)
        .and_then(|dir| file_appender(&dir));

    match file_appender {
        Ok(appender) => {
            let file_layer = fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(false)
                .with_writer(appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .with(file_layer)
                .try_init()?;
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .try_init()?;
            warn!("File logging unavailable, logging to console only: {e}");
        }
    }

    Ok(())
}

/// Daily rolling appender in `logs_dir`, created if missing.
pub(crate) fn file_appender(logs_dir: &Path) -> Result<RollingFileAppender, Box<dyn Error>> {
    std::fs::create_dir_all(logs_dir)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(LOG_RETENTION_FILES)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(logs_dir)?;

    Ok(appender)
}
