//! Line reading and readiness-marker detection on service output.

use crate::SupervisorEvent;

use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

// Substrings that mark a line on either stream as a problem report
const ERROR_MARKERS: &[&str] = &[
    "ERROR",
    "CRITICAL",
    "FATAL",
    "Traceback",
    "Exception",
    "panicked",
];

// Substrings that mark a stderr line as routine logging
const ROUTINE_MARKERS: &[&str] = &["INFO", "DEBUG", "TRACE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineLevel {
    Info,
    Warning,
}

/// Decide how a line of service output is logged.
///
/// Many services log everything to stderr, so stderr lines are warnings
/// only when they do not carry a routine level tag. Stdout lines are
/// informational unless they carry an explicit error marker.
pub fn classify_line(stream: OutputStream, line: &str) -> LineLevel {
    if ERROR_MARKERS.iter().any(|m| line.contains(m)) {
        return LineLevel::Warning;
    }
    match stream {
        OutputStream::Stdout => LineLevel::Info,
        OutputStream::Stderr if ROUTINE_MARKERS.iter().any(|m| line.contains(m)) => {
            LineLevel::Info
        }
        OutputStream::Stderr => LineLevel::Warning,
    }
}

/// Watches a service's output for the readiness marker.
///
/// Each attached stream gets its own reader task that turns lines into
/// [`SupervisorEvent`]s. A reader ends at end-of-stream, on a read error,
/// or when nobody is listening for events any more.
#[derive(Debug, Clone)]
pub struct ReadinessMonitor {
    pid: u32,
    marker: Arc<str>,
}

impl ReadinessMonitor {
    pub fn new(pid: u32, marker: &str) -> Self {
        Self {
            pid,
            marker: Arc::from(marker),
        }
    }

    pub fn attach<R>(
        &self,
        stream: OutputStream,
        reader: R,
        events: UnboundedSender<SupervisorEvent>,
    ) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let pid = self.pid;
        let marker = Arc::clone(&self.marker);

        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();

            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Reading service {stream} failed: {e}");
                        break;
                    }
                }

                let line = decode_line(&buf);
                if line.is_empty() {
                    continue;
                }

                if line.contains(&*marker)
                    && events.send(SupervisorEvent::MarkerSeen { pid }).is_err()
                {
                    break;
                }

                let event = SupervisorEvent::LineReceived { pid, stream, line };
                if events.send(event).is_err() {
                    break;
                }
            }

            debug!("Service {stream} reader for pid {pid} finished");
        })
    }
}

/// UTF-8 with lossy replacement, trailing line terminator removed.
fn decode_line(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.trim_end_matches(['\n', '\r']).to_string()
}
