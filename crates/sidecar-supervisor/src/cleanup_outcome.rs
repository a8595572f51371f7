use std::fmt;

use serde::Serialize;

/// Result of a reap attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupOutcome {
    pub succeeded: bool,
    pub detail: String,
}

impl CleanupOutcome {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            detail: detail.into(),
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for CleanupOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.succeeded { "ok" } else { "failed" };
        write!(f, "{verdict}: {}", self.detail)
    }
}
