//! A controllable stand-in for the supervised backend service.
//!
//! Speaks the same launch contract (`--port N --env MODE`), serves
//! `GET /health` on loopback and prints the readiness marker. Behaviour is
//! steered through environment variables:
//!
//! - `STUB_READY_DELAY_MS`: wait before binding and printing the marker
//! - `STUB_SKIP_MARKER`: never print the marker
//! - `STUB_UNHEALTHY`: answer `/health` with 503
//! - `STUB_IGNORE_SIGTERM`: survive SIGTERM (Unix)
//! - `STUB_EXIT_AFTER_MS` / `STUB_EXIT_CODE`: exit on its own after a delay

use std::error::Error;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use serde_json::json;
use tokio::net::TcpListener;

const READINESS_MARKER: &str = "Application startup complete";
const LOOPBACK_HOST: &str = "127.0.0.1";

#[derive(Parser)]
#[command(name = "sidecar-stub")]
struct Args {
    #[arg(long)]
    port: u16,

    #[arg(long, default_value = "desktop")]
    env: String,
}

#[derive(Debug, Clone, Default)]
struct Knobs {
    ready_delay: Option<Duration>,
    skip_marker: bool,
    unhealthy: bool,
    ignore_sigterm: bool,
    exit_after: Option<Duration>,
    exit_code: i32,
}

impl Knobs {
    fn from_env() -> Self {
        Self {
            ready_delay: millis_var("STUB_READY_DELAY_MS"),
            skip_marker: flag_var("STUB_SKIP_MARKER"),
            unhealthy: flag_var("STUB_UNHEALTHY"),
            ignore_sigterm: flag_var("STUB_IGNORE_SIGTERM"),
            exit_after: millis_var("STUB_EXIT_AFTER_MS"),
            exit_code: std::env::var("STUB_EXIT_CODE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
        }
    }
}

fn flag_var(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn millis_var(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let knobs = Knobs::from_env();

    if knobs.ignore_sigterm {
        ignore_sigterm()?;
    }

    println!(
        "INFO: sidecar-stub v{} booting (env {})",
        env!("CARGO_PKG_VERSION"),
        args.env
    );

    if let Some(delay) = knobs.ready_delay {
        tokio::time::sleep(delay).await;
    }

    let listener = TcpListener::bind((LOOPBACK_HOST, args.port)).await?;
    println!("INFO: listening on {}", listener.local_addr()?);

    if let Some(after) = knobs.exit_after {
        let code = knobs.exit_code;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            eprintln!("ERROR: exiting on request with code {code}");
            std::process::exit(code);
        });
    }

    if !knobs.skip_marker {
        println!("INFO: {READINESS_MARKER}");
    }

    let app = Router::new()
        .route("/health", get(health_check))
        .with_state(knobs);

    axum::serve(listener, app).await?;

    Ok(())
}

/// GET /health
async fn health_check(State(knobs): State<Knobs>) -> Response {
    if knobs.unhealthy {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unhealthy" })),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
        .into_response()
}

#[cfg(unix)]
fn ignore_sigterm() -> Result<(), Box<dyn Error>> {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    // Any registered handler replaces the default terminate action
    let received = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, received)?;
    eprintln!("WARNING: ignoring SIGTERM");
    Ok(())
}

#[cfg(not(unix))]
fn ignore_sigterm() -> Result<(), Box<dyn Error>> {
    Ok(())
}
