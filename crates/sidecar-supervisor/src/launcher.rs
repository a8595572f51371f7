use crate::{ServiceHandle, SupervisorError, SupervisorResult};

use std::collections::BTreeMap;
use std::panic::Location;
use std::path::PathBuf;
use std::process::Stdio;

use error_location::ErrorLocation;
use sidecar_config::ServiceConfig;
use tokio::process::Command;
use tracing::{debug, info};

/// Starts the service executable with piped output.
#[derive(Debug, Clone)]
pub struct ServiceLauncher {
    candidates: Vec<PathBuf>,
    mode: String,
    working_dir: Option<PathBuf>,
    base_env: BTreeMap<String, String>,
}

impl ServiceLauncher {
    pub fn from_config(service: &ServiceConfig) -> Self {
        Self {
            candidates: service.executable_paths.clone(),
            mode: service.mode.clone(),
            working_dir: service.working_dir.clone(),
            base_env: service.launch_env(),
        }
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// First candidate path that exists as a file, made absolute.
    #[track_caller]
    pub fn resolve_executable(&self) -> SupervisorResult<PathBuf> {
        for candidate in &self.candidates {
            if candidate.is_file() {
                let resolved = std::path::absolute(candidate)?;
                debug!("Resolved service executable: {}", resolved.display());
                return Ok(resolved);
            }
            debug!("Service executable candidate missing: {}", candidate.display());
        }

        Err(SupervisorError::BinaryNotFound {
            tried: self.candidates.clone(),
            location: ErrorLocation::from(Location::caller()),
        })
    }

    /// Command-line arguments for an instance bound to `port`.
    pub fn command_args(&self, port: u16) -> Vec<String> {
        vec![
            "--port".to_string(),
            port.to_string(),
            "--env".to_string(),
            self.mode.clone(),
        ]
    }

    /// Launch one instance on `port`. `extra_env` is applied over the
    /// configured environment. Must be called inside a tokio runtime.
    pub fn spawn(
        &self,
        port: u16,
        extra_env: &BTreeMap<String, String>,
    ) -> SupervisorResult<ServiceHandle> {
        let executable = self.resolve_executable()?;

        let mut cmd = Command::new(&executable);
        cmd.args(self.command_args(port))
            .envs(&self.base_env)
            .envs(extra_env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        // Own session, so a terminal hangup aimed at the host does not reach the service
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        // Own process group so CTRL_BREAK can target it, and no console window
        #[cfg(windows)]
        {
            use windows_sys::Win32::System::Threading::{
                CREATE_NEW_PROCESS_GROUP, CREATE_NO_WINDOW,
            };
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
        }

        let child = cmd.spawn().map_err(|source| SupervisorError::Launch {
            path: executable.clone(),
            source,
            location: ErrorLocation::from(Location::caller()),
        })?;

        let pid = child.id().ok_or_else(|| SupervisorError::Launch {
            path: executable.clone(),
            source: std::io::Error::other("process exited before its pid was read"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        info!(
            "Spawned {} with PID {pid} on port {port}",
            executable.display()
        );

        Ok(ServiceHandle::new(child, pid, port, executable))
    }
}
