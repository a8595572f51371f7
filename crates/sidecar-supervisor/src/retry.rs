use crate::ShutdownSignal;

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.0;

/// Bounds for a retry loop.
///
/// With the default multiplier of 1.0 the loop waits `interval` between
/// every attempt. A larger multiplier grows the wait geometrically, capped
/// at `max_interval`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Wait after the first failed attempt
    pub interval: Duration,
    /// Growth factor applied to the wait after each failed attempt
    pub backoff_multiplier: f64,
    /// Upper bound on any single wait
    pub max_interval: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_interval: interval,
        }
    }

    pub fn with_backoff(mut self, multiplier: f64, max_interval: Duration) -> Self {
        self.backoff_multiplier = multiplier.max(DEFAULT_BACKOFF_MULTIPLIER);
        self.max_interval = max_interval.max(self.interval);
        self
    }

    /// Wait that follows the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.interval.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(scaled.min(self.max_interval.as_secs_f64()))
    }
}

/// How a retry loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// An attempt produced a value
    Completed { value: T, attempts: u32 },
    /// Every attempt came back empty
    Exhausted { attempts: u32 },
    /// The shutdown signal fired before an attempt succeeded
    Cancelled { attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Completed { attempts, .. }
            | Self::Exhausted { attempts }
            | Self::Cancelled { attempts } => *attempts,
        }
    }
}

/// Run `attempt` until it yields `Some`, the attempt budget runs out, or
/// `shutdown` fires.
///
/// The attempt closure receives its 1-based attempt number. An in-flight
/// attempt is dropped when shutdown fires, which cancels whatever it was
/// awaiting.
pub async fn retry_until<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    shutdown: Option<&ShutdownSignal>,
    mut attempt: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let max_attempts = policy.max_attempts.max(1);

    for n in 1..=max_attempts {
        if shutdown.is_some_and(ShutdownSignal::is_triggered) {
            info!("{operation_name} cancelled before attempt {n}");
            return RetryOutcome::Cancelled { attempts: n - 1 };
        }

        let result = match shutdown {
            Some(signal) => {
                tokio::select! {
                    result = attempt(n) => result,
                    _ = signal.wait() => {
                        info!("{operation_name} cancelled during attempt {n}");
                        return RetryOutcome::Cancelled { attempts: n };
                    }
                }
            }
            None => attempt(n).await,
        };

        if let Some(value) = result {
            if n > 1 {
                debug!("{operation_name} succeeded after {n} attempts");
            }
            return RetryOutcome::Completed { value, attempts: n };
        }

        if n == max_attempts {
            break;
        }

        let delay = policy.delay_after(n);
        if delay.is_zero() {
            continue;
        }

        debug!("{operation_name} attempt {n} came back empty, retrying in {delay:?}");

        match shutdown {
            Some(signal) => {
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = signal.wait() => {
                        info!("{operation_name} cancelled after attempt {n}");
                        return RetryOutcome::Cancelled { attempts: n };
                    }
                }
            }
            None => sleep(delay).await,
        }
    }

    warn!("{operation_name} gave up after {max_attempts} attempts");
    RetryOutcome::Exhausted {
        attempts: max_attempts,
    }
}
