use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Start the service and keep it supervised until interrupted
    Run {
        /// Port to try first (defaults to port.default from config)
        #[arg(long)]
        port: Option<u16>,

        /// Skip killing leftovers from an earlier session before starting
        #[arg(long)]
        no_cleanup: bool,
    },

    /// Kill leftover service processes by name
    Cleanup,

    /// Poll the health endpoint once
    Probe {
        /// Port the service listens on
        #[arg(long)]
        port: u16,

        /// Request timeout in milliseconds (defaults to readiness.probe_timeout_ms)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Kill whatever is listening on a port
    KillPort {
        /// Port to free
        port: u16,
    },
}
