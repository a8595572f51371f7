use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Host-wide shutdown notification.
///
/// Once triggered it stays triggered. Cloning shares the same signal.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Trigger shutdown (call this from the host's exit path)
    pub fn trigger(&self) {
        if !self.tx.send_replace(true) {
            info!("Shutdown signal received, abandoning in-flight waits");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has been triggered.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on trigger.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
