use crate::ExitInfo;

use std::panic::Location;
use std::path::PathBuf;

use error_location::ErrorLocation;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Service executable not found (tried: {tried:?}) {location}")]
    BinaryNotFound {
        tried: Vec<PathBuf>,
        location: ErrorLocation,
    },

    #[error("Failed to launch {path}: {source} {location}")]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
        location: ErrorLocation,
    },

    #[error("Service exited during startup ({exit}) {location}")]
    EarlyExit {
        exit: ExitInfo,
        location: ErrorLocation,
    },

    #[error("Ports {start}-{end} are bound and could not be reclaimed {location}")]
    PortConflictUnresolved {
        start: u16,
        end: u16,
        location: ErrorLocation,
    },

    #[error("Service on port {port} not ready after {attempts} attempts {location}")]
    ReadinessTimeout {
        port: u16,
        attempts: u32,
        location: ErrorLocation,
    },

    #[error("Startup abandoned by shutdown request {location}")]
    Cancelled { location: ErrorLocation },

    #[error("Could not terminate pid {pid}: {message} {location}")]
    TerminationIncomplete {
        pid: u32,
        message: String,
        location: ErrorLocation,
    },

    #[error("Probe failed: {message} {location}")]
    Probe {
        message: String,
        location: ErrorLocation,
    },

    #[error("IO error: {source} {location}")]
    Io {
        #[source]
        source: std::io::Error,
        location: ErrorLocation,
    },

    #[error("HTTP error: {source} {location}")]
    Http {
        #[source]
        source: reqwest::Error,
        location: ErrorLocation,
    },

    #[error("Configuration invalid: {source}")]
    Config {
        #[source]
        source: sidecar_config::ConfigError,
    },
}

impl SupervisorError {
    /// Whether this error is absorbed and retried by the calling loop
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Probe { .. } | Self::Http { .. })
    }

    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::BinaryNotFound { .. } => {
                "The backend service executable is missing. \
                   Reinstall the application or check service.executable_paths."
            }
            Self::Launch { .. } => {
                "The operating system refused to start the backend service. \
                   Check file permissions and antivirus quarantine."
            }
            Self::EarlyExit { .. } => {
                "The backend service crashed while starting. \
                   Check the service log output for the cause."
            }
            Self::PortConflictUnresolved { .. } => {
                "Another application is holding the backend ports. \
                   Close other applications or restart your computer."
            }
            Self::ReadinessTimeout { .. } => {
                "The backend service is taking too long to start. \
                   Try restarting the application or check the logs."
            }
            Self::Cancelled { .. } => "Startup was interrupted because the application is exiting.",
            Self::TerminationIncomplete { .. } => {
                "The previous backend process could not be stopped. \
                   End it from the task manager and try again."
            }
            Self::Config { .. } => {
                "Configuration file has invalid settings. \
                   Check the logs for details or delete the config file to use defaults."
            }
            _ => "An unexpected error occurred. Please check the logs for details.",
        }
    }
}

impl From<std::io::Error> for SupervisorError {
    #[track_caller]
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            source,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<reqwest::Error> for SupervisorError {
    #[track_caller]
    fn from(source: reqwest::Error) -> Self {
        Self::Http {
            source,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<sidecar_config::ConfigError> for SupervisorError {
    fn from(source: sidecar_config::ConfigError) -> Self {
        Self::Config { source }
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
