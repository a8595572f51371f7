use super::parse::parse_netstat_listeners;

use crate::{CleanupOutcome, SupervisorResult};

use std::process::Output;

use tokio::process::Command;
use tracing::debug;
use windows_sys::Win32::System::Threading::CREATE_NO_WINDOW;

/// taskkill's exit code when no process matched the filter
const TASKKILL_NOT_FOUND: i32 = 128;

async fn run(program: &str, args: &[&str]) -> std::io::Result<Output> {
    debug!("Running {program} {}", args.join(" "));
    Command::new(program)
        .args(args)
        .creation_flags(CREATE_NO_WINDOW)
        .output()
        .await
}

/// Pids with a TCP listener on `port`.
pub(super) async fn listening_pids(port: u16) -> SupervisorResult<Vec<u32>> {
    let output = run("netstat", &["-ano", "-p", "tcp"]).await?;
    Ok(parse_netstat_listeners(
        &String::from_utf8_lossy(&output.stdout),
        port,
    ))
}

/// Force-kill every `<name>.exe` process tree.
pub(super) async fn kill_named(name: &str) -> SupervisorResult<CleanupOutcome> {
    let image = if name.to_ascii_lowercase().ends_with(".exe") {
        name.to_string()
    } else {
        format!("{name}.exe")
    };

    let output = run("taskkill", &["/F", "/T", "/IM", &image]).await?;
    match output.status.code() {
        Some(0) => Ok(CleanupOutcome::success(format!("killed {image}"))),
        Some(TASKKILL_NOT_FOUND) => Ok(CleanupOutcome::success(format!(
            "no process named {image}"
        ))),
        _ => Ok(CleanupOutcome::failure(format!(
            "taskkill {image} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
    }
}
