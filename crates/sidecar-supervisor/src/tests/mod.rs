
#[cfg(unix)]
mod supervisor;

use crate::{CleanupOutcome, ProcessReaper, SupervisorResult};

use std::net::TcpListener;
use std::sync::Mutex;

use async_trait::async_trait;

pub(crate) const FAKE_PROCESS_NAME: &str = "sidecar-fake-service";

/// A port that is free, with the next one free too.
pub(crate) fn free_port_pair() -> u16 {
    loop {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        if port < u16::MAX && TcpListener::bind(("127.0.0.1", port + 1)).is_ok() {
            return port;
        }
    }
}

/// Records reap requests. Optionally owns a listener standing in for a
/// foreign process, released by whichever reap is configured to free it.
#[derive(Default)]
pub(crate) struct FakeReaper {
    pub(crate) port_calls: Mutex<Vec<u16>>,
    pub(crate) name_calls: Mutex<Vec<String>>,
    held: Mutex<Option<TcpListener>>,
    release_on_port_kill: bool,
    fail_to_run: bool,
}

impl FakeReaper {
    /// Holds `listener` and never releases it.
    pub(crate) fn stubborn(listener: TcpListener) -> Self {
        Self {
            held: Mutex::new(Some(listener)),
            ..Self::default()
        }
    }

    /// Holds `listener` until a by-port reap.
    pub(crate) fn releasing_on_port_kill(listener: TcpListener) -> Self {
        Self {
            held: Mutex::new(Some(listener)),
            release_on_port_kill: true,
            ..Self::default()
        }
    }

    /// Every reap fails to run at all.
    pub(crate) fn broken() -> Self {
        Self {
            fail_to_run: true,
            ..Self::default()
        }
    }

    pub(crate) fn port_calls(&self) -> Vec<u16> {
        self.port_calls.lock().unwrap().clone()
    }

    pub(crate) fn name_calls(&self) -> Vec<String> {
        self.name_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessReaper for FakeReaper {
    async fn kill_by_port(&self, port: u16) -> SupervisorResult<CleanupOutcome> {
        self.port_calls.lock().unwrap().push(port);
        if self.fail_to_run {
            return Err(std::io::Error::other("reaper unavailable").into());
        }
        if self.release_on_port_kill {
            self.held.lock().unwrap().take();
            return Ok(CleanupOutcome::success("released"));
        }
        Ok(CleanupOutcome::failure("holder refused to die"))
    }

    async fn kill_by_name(&self, name: &str) -> SupervisorResult<CleanupOutcome> {
        self.name_calls.lock().unwrap().push(name.to_string());
        if self.fail_to_run {
            return Err(std::io::Error::other("reaper unavailable").into());
        }
        Ok(CleanupOutcome::success("no process matched"))
    }
}

#[cfg(unix)]
pub(crate) mod scripts {
    use crate::tests::FAKE_PROCESS_NAME;

    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    use sidecar_config::Config;
    use tempfile::TempDir;

    pub(crate) const MARKER: &str = "Application startup complete";

    /// Write an executable shell script into `dir`.
    pub(crate) fn write_script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Prints the readiness marker, then idles.
    pub(crate) fn ready_service(dir: &TempDir) -> PathBuf {
        write_script(
            dir,
            "ready.sh",
            &format!("echo \"booting\"\necho \"{MARKER}\"\nexec sleep 30"),
        )
    }

    /// Like [`ready_service`], appending a line to `counter` on every launch.
    pub(crate) fn counting_service(dir: &TempDir, counter: &Path) -> PathBuf {
        write_script(
            dir,
            "counting.sh",
            &format!(
                "echo launched >> \"{}\"\necho \"{MARKER}\"\nexec sleep 30",
                counter.display()
            ),
        )
    }

    /// Never prints the marker and serves no health endpoint.
    pub(crate) fn silent_service(dir: &TempDir) -> PathBuf {
        write_script(dir, "silent.sh", "exec sleep 30")
    }

    /// Exits with code 3 straight away.
    pub(crate) fn crashing_service(dir: &TempDir) -> PathBuf {
        write_script(dir, "crash.sh", "echo \"Traceback: boom\" >&2\nexit 3")
    }

    /// Ignores SIGTERM, so only a forceful kill ends it.
    pub(crate) fn stubborn_service(dir: &TempDir) -> PathBuf {
        write_script(
            dir,
            "stubborn.sh",
            &format!("trap '' TERM\necho \"{MARKER}\"\nwhile true; do sleep 1; done"),
        )
    }

    /// Prints the readiness marker again while shutting down on SIGTERM.
    pub(crate) fn marker_on_shutdown_service(dir: &TempDir) -> PathBuf {
        write_script(
            dir,
            "marker-on-term.sh",
            &format!(
                "trap 'echo \"{MARKER}\"; sleep 0.1; exit 0' TERM\necho \"{MARKER}\"\nwhile true; do sleep 0.05; done"
            ),
        )
    }

    /// Fast timings so failure paths finish quickly.
    pub(crate) fn test_config(executable: &Path, port: u16) -> Config {
        let mut config = Config::default();
        config.service.executable_paths = vec![executable.to_path_buf()];
        config.service.process_name = Some(FAKE_PROCESS_NAME.to_string());
        config.port.default = port;
        config.port.max_attempts = 2;
        config.port.reap_settle_ms = 10;
        config.readiness.max_attempts = 50;
        config.readiness.interval_ms = 100;
        config.readiness.probe_timeout_ms = 100;
        config.termination.max_attempts = 2;
        config.termination.interval_ms = 200;
        config
    }
}
