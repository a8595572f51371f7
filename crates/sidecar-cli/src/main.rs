//! sidecarctl - supervise a local backend service from the command line.
//!
//! # Examples
//!
//! ```bash
//! # Start the service and keep it running until Ctrl+C
//! sidecarctl run --port 23450
//!
//! # Kill leftovers from a crashed session
//! sidecarctl cleanup
//!
//! # Check whether something healthy answers on a port
//! sidecarctl probe --port 23450 --pretty
//! ```

mod cli;
mod commands;
mod logging;


use crate::{cli::Cli, commands::Commands};

use sidecar_config::{Config, ConfigErrorResult};
use sidecar_supervisor::{
    HealthProbe, ProcessReaper, ServiceState, ShutdownSignal, Supervisor, SupervisorNotice,
    SupervisorResult, SystemReaper,
};

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

/// What a command prints, and whether it counts as success.
struct Report {
    body: Value,
    success: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Check the config file or delete it to use defaults.");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::setup_logging(&config) {
        eprintln!("Warning: logging unavailable: {e}");
    }
    config.log_summary();

    let result = match cli.command {
        Commands::Run { port, no_cleanup } => run(config, port, no_cleanup).await,
        Commands::Cleanup => cleanup(config).await,
        Commands::Probe { port, timeout_ms } => probe(&config, port, timeout_ms).await,
        Commands::KillPort { port } => kill_port(port).await,
    };

    match result {
        Ok(report) => {
            let output = if cli.pretty {
                serde_json::to_string_pretty(&report.body)
            } else {
                serde_json::to_string(&report.body)
            };
            match output {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing output: {e}");
                    return ExitCode::FAILURE;
                }
            }
            if report.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            eprintln!("{}", e.recovery_hint());
            if e.is_transient() {
                eprintln!("This failure is usually temporary; running the command again may succeed.");
            }
            ExitCode::FAILURE
        }
    }
}

fn load_config() -> ConfigErrorResult<Config> {
    let config = Config::load()?;
    config.validate()?;
    Ok(config)
}

async fn run(config: Config, port: Option<u16>, no_cleanup: bool) -> SupervisorResult<Report> {
    let shutdown = ShutdownSignal::new();
    install_signal_handler(shutdown.clone());

    let supervisor = Supervisor::with_system_reaper(config)?.with_shutdown_signal(shutdown.clone());

    if !no_cleanup {
        let outcome = supervisor.cleanup_stale_previous_instances().await?;
        if !outcome.succeeded {
            warn!("Stale instance cleanup incomplete: {}", outcome.detail);
        }
    }

    if let Err(e) = supervisor.start(port).await {
        // A failed start can leave a process behind
        if let Err(stop_err) = supervisor.stop().await {
            warn!("Cleanup after failed start also failed: {stop_err}");
        }
        return Err(e);
    }

    let mut states = supervisor.subscribe();
    let mut notices = supervisor.notices();
    info!(
        "Service {} (pid {:?}); press Ctrl+C to stop",
        supervisor.state(),
        supervisor.pid().await
    );

    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                info!("Shutdown requested, stopping service");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                if !matches!(state, ServiceState::Running { .. }) {
                    warn!("Service is no longer running: {state}");
                    break;
                }
            }
            notice = notices.recv() => match notice {
                Ok(SupervisorNotice::AnomalousExit { pid, exit }) => {
                    warn!("Service pid {pid} exited unexpectedly ({exit})");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Missed {skipped} service notices"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let stopped = supervisor.stop().await?;
    let last_exit = supervisor.last_exit().await;

    Ok(Report {
        body: json!({
            "state": supervisor.state(),
            "stopped": stopped,
            "last_exit": last_exit,
        }),
        success: stopped,
    })
}

async fn cleanup(config: Config) -> SupervisorResult<Report> {
    let supervisor = Supervisor::with_system_reaper(config)?;
    let outcome = supervisor.cleanup_stale_previous_instances().await?;

    Ok(Report {
        success: outcome.succeeded,
        body: json!({
            "process_name": supervisor.process_name(),
            "outcome": outcome,
        }),
    })
}

async fn probe(config: &Config, port: u16, timeout_ms: Option<u64>) -> SupervisorResult<Report> {
    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.readiness.probe_timeout());
    let probe = HealthProbe::for_host(&config.port.host, &config.service.health_path)?;
    let ready = probe.poll_health(port, timeout).await;

    Ok(Report {
        body: json!({
            "url": probe.url(port),
            "ready": ready,
        }),
        success: ready,
    })
}

async fn kill_port(port: u16) -> SupervisorResult<Report> {
    let outcome = SystemReaper::new().kill_by_port(port).await?;

    Ok(Report {
        success: outcome.succeeded,
        body: json!({
            "port": port,
            "outcome": outcome,
        }),
    })
}

/// Trigger `shutdown` on SIGINT or SIGTERM.
#[cfg(unix)]
fn install_signal_handler(shutdown: ShutdownSignal) {
    std::thread::spawn(move || {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = match Signals::new([SIGINT, SIGTERM]) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to register signal handlers: {e}");
                return;
            }
        };

        if let Some(sig) = signals.forever().next() {
            info!("Received signal {sig}, shutting down...");
            shutdown.trigger();
        }
    });
}

/// Trigger `shutdown` on Ctrl+C.
#[cfg(not(unix))]
fn install_signal_handler(shutdown: ShutdownSignal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
            shutdown.trigger();
        }
    });
}
