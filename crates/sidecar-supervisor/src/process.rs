//! Signals and liveness checks on raw pids.

/// What happened when a termination request was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalDelivery {
    /// The request was delivered
    Sent,
    /// The process was already gone
    NoSuchProcess,
    /// The operating system refused the request
    Denied(String),
}

#[cfg(unix)]
mod imp {
    use super::SignalDelivery;

    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    fn to_pid(pid: u32) -> Option<Pid> {
        // 0 and negative values address process groups, never a single process
        match i32::try_from(pid) {
            Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
            _ => None,
        }
    }

    fn deliver(pid: u32, signal: Signal) -> SignalDelivery {
        let Some(target) = to_pid(pid) else {
            return SignalDelivery::NoSuchProcess;
        };
        match kill(target, signal) {
            Ok(()) => SignalDelivery::Sent,
            Err(Errno::ESRCH) => SignalDelivery::NoSuchProcess,
            Err(e) => SignalDelivery::Denied(e.to_string()),
        }
    }

    pub fn is_alive(pid: u32) -> bool {
        let Some(target) = to_pid(pid) else {
            return false;
        };
        match kill(target, None) {
            Ok(()) => true,
            // Exists but belongs to someone else
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    pub async fn send_graceful(pid: u32) -> SignalDelivery {
        deliver(pid, Signal::SIGTERM)
    }

    pub async fn send_forceful(pid: u32) -> SignalDelivery {
        deliver(pid, Signal::SIGKILL)
    }
}

#[cfg(windows)]
mod imp {
    use super::SignalDelivery;

    use windows_sys::Win32::Foundation::{CloseHandle, STILL_ACTIVE};
    use windows_sys::Win32::System::Console::{CTRL_BREAK_EVENT, GenerateConsoleCtrlEvent};
    use windows_sys::Win32::System::Threading::{
        CREATE_NO_WINDOW, GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    pub fn is_alive(pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle.is_null() {
                return false;
            }
            let mut exit_code: u32 = 0;
            let queried = GetExitCodeProcess(handle, &mut exit_code);
            CloseHandle(handle);
            queried != 0 && exit_code == STILL_ACTIVE as u32
        }
    }

    pub async fn send_graceful(pid: u32) -> SignalDelivery {
        if !is_alive(pid) {
            return SignalDelivery::NoSuchProcess;
        }
        // The child was started in its own process group whose id is its pid
        let delivered = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) };
        if delivered != 0 {
            SignalDelivery::Sent
        } else {
            SignalDelivery::Denied(std::io::Error::last_os_error().to_string())
        }
    }

    pub async fn send_forceful(pid: u32) -> SignalDelivery {
        if !is_alive(pid) {
            return SignalDelivery::NoSuchProcess;
        }
        let output = tokio::process::Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .creation_flags(CREATE_NO_WINDOW)
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => SignalDelivery::Sent,
            Ok(_) if !is_alive(pid) => SignalDelivery::NoSuchProcess,
            Ok(out) => {
                SignalDelivery::Denied(String::from_utf8_lossy(&out.stderr).trim().to_string())
            }
            Err(e) => SignalDelivery::Denied(e.to_string()),
        }
    }
}

/// Whether a process with this pid currently exists.
pub use imp::is_alive;

/// SIGTERM on Unix, CTRL_BREAK on Windows.
pub(crate) use imp::send_graceful;

/// SIGKILL on Unix, `taskkill /F /T` on Windows.
pub(crate) use imp::send_forceful;

/// Pid of the supervisor itself, never a reap target.
pub(crate) fn own_pid() -> u32 {
    std::process::id()
}
