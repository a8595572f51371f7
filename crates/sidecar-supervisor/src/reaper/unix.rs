use super::kill_all;
use super::parse::{lsof_failure, parse_pid_list};

use crate::process::own_pid;
use crate::{CleanupOutcome, SupervisorError, SupervisorResult};

use std::io::ErrorKind;
use std::panic::Location;
use std::process::Output;

use error_location::ErrorLocation;
use tokio::process::Command;
use tracing::debug;

/// Linux truncates process names to 15 bytes; `pgrep -x` matches the truncated form.
#[cfg(target_os = "linux")]
const COMM_NAME_LIMIT: usize = 15;

async fn run(program: &str, args: &[&str]) -> std::io::Result<Output> {
    debug!("Running {program} {}", args.join(" "));
    Command::new(program).args(args).output().await
}

/// Pids with a TCP listener on `port`.
pub(super) async fn listening_pids(port: u16) -> SupervisorResult<Vec<u32>> {
    let port_arg = format!("-iTCP:{port}");
    let lsof = run("lsof", &["-nP", &port_arg, "-sTCP:LISTEN", "-t"]).await;

    match lsof {
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if let Some(message) = lsof_failure(output.status.code(), &stderr) {
                return Err(SupervisorError::Probe {
                    message: format!("lsof on port {port}: {message}"),
                    location: ErrorLocation::from(Location::caller()),
                });
            }
            Ok(parse_pid_list(&String::from_utf8_lossy(&output.stdout)))
        }
        #[cfg(target_os = "linux")]
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("lsof unavailable, falling back to fuser");
            let port_spec = port.to_string();
            let output = run("fuser", &["-n", "tcp", &port_spec]).await?;
            Ok(parse_pid_list(&String::from_utf8_lossy(&output.stdout)))
        }
        Err(e) => Err(e.into()),
    }
}

/// Force-kill every process whose name is exactly `name`, except ourselves.
pub(super) async fn kill_named(name: &str) -> SupervisorResult<CleanupOutcome> {
    let pattern = comm_name(name);
    let output = match run("pgrep", &["-x", pattern]).await {
        Ok(output) => output,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Ok(CleanupOutcome::failure("pgrep is not available"));
        }
        Err(e) => return Err(e.into()),
    };

    // pgrep: 0 matched, 1 no match, anything else is a usage or system error
    match output.status.code() {
        Some(0) => {}
        Some(1) => return Ok(CleanupOutcome::success(format!("no process named {name:?}"))),
        _ => {
            return Ok(CleanupOutcome::failure(format!(
                "pgrep failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
    }

    let me = own_pid();
    let targets: Vec<u32> = parse_pid_list(&String::from_utf8_lossy(&output.stdout))
        .into_iter()
        .filter(|pid| *pid != me)
        .collect();

    if targets.is_empty() {
        return Ok(CleanupOutcome::success(format!(
            "no process named {name:?} other than this one"
        )));
    }

    Ok(kill_all(&targets).await)
}

#[cfg(target_os = "linux")]
fn comm_name(name: &str) -> &str {
    if name.len() <= COMM_NAME_LIMIT {
        return name;
    }
    let mut end = COMM_NAME_LIMIT;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

#[cfg(not(target_os = "linux"))]
fn comm_name(name: &str) -> &str {
    name
}
