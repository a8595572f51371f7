//! Liveness polling against the service's health endpoint.

use crate::{LOOPBACK_HOST, SupervisorResult};

use std::time::Duration;

use reqwest::StatusCode;
use tracing::debug;

const PROTOCOL: &str = "http";

/// Issues single GET requests to `http://<host>:<port><path>`.
///
/// The HTTP client is built once and reused for every poll.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: reqwest::Client,
    host: String,
    path: String,
}

impl HealthProbe {
    /// Probe on 127.0.0.1.
    pub fn new(path: &str) -> SupervisorResult<Self> {
        Self::for_host(LOOPBACK_HOST, path)
    }

    pub fn for_host(host: &str, path: &str) -> SupervisorResult<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .pool_max_idle_per_host(0)
            .build()?;

        Ok(Self {
            client,
            host: host.to_string(),
            path: path.to_string(),
        })
    }

    pub fn url(&self, port: u16) -> String {
        format!("{PROTOCOL}://{}:{port}{}", self.host, self.path)
    }

    /// One poll. Only HTTP 200 means ready; connection failures, timeouts
    /// and other statuses all mean not ready.
    ///
    /// The request is abandoned when `timeout` elapses.
    pub async fn poll_health(&self, port: u16, timeout: Duration) -> bool {
        let url = self.url(port);
        let request = self.client.get(&url).timeout(timeout).send();

        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(resp)) if resp.status() == StatusCode::OK => true,
            Ok(Ok(resp)) => {
                debug!("Health poll {url} returned HTTP {}", resp.status());
                false
            }
            Ok(Err(e)) => {
                debug!("Health poll {url} failed: {e}");
                false
            }
            Err(_) => {
                debug!("Health poll {url} timed out after {timeout:?}");
                false
            }
        }
    }
}
