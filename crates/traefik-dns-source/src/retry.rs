//! Backoff for failed endpoint passes
//!
//! Failures are classified as transient or permanent. Transient failures are
//! retried with exponential backoff; permanent ones wait the maximum delay, as
//! they will not clear without someone changing the cluster.

use std::time::Duration;

use tracing::{debug, warn};

use crate::lister::ListError;
use crate::source::SourceError;

/// Base delay for exponential backoff (seconds)
const BASE_DELAY_SECS: u64 = 5;

/// Maximum delay between retries (1 hour)
const MAX_DELAY_SECS: u64 = 3600;

/// Error classification for retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network failures, timeouts, closed watches
    Transient,
    /// Missing CRDs or RBAC denials
    Permanent,
}

/// Classify a failed pass
pub fn classify(err: &SourceError) -> ErrorKind {
    match err {
        SourceError::List {
            source: ListError::Kube(kube::Error::Api(response)),
            ..
        } if matches!(response.code, 401 | 403 | 404) => ErrorKind::Permanent,
        SourceError::List {
            source: ListError::NoServedGroups,
            ..
        } => ErrorKind::Permanent,
        SourceError::List { .. } => ErrorKind::Transient,
    }
}

/// Delay before the given attempt (1-based): 5s, 10s, 20s, ... up to 1 hour
pub fn compute_backoff(attempt: u32, kind: ErrorKind) -> Duration {
    let delay_secs = match kind {
        ErrorKind::Transient => 2u64
            .checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| BASE_DELAY_SECS.checked_mul(factor))
            .map_or(MAX_DELAY_SECS, |secs| secs.min(MAX_DELAY_SECS)),
        ErrorKind::Permanent => MAX_DELAY_SECS,
    };
    Duration::from_secs(delay_secs)
}

/// Consecutive failure count for the resync loop
#[derive(Debug, Default)]
pub struct Backoff {
    attempts: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return how long to wait before the next pass
    pub fn on_failure(&mut self, err: &SourceError) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        let kind = classify(err);
        let delay = compute_backoff(self.attempts, kind);

        match kind {
            ErrorKind::Transient => debug!(
                attempt = self.attempts,
                delay_secs = delay.as_secs(),
                "Scheduling retry with exponential backoff"
            ),
            ErrorKind::Permanent => warn!(
                attempt = self.attempts,
                delay_secs = delay.as_secs(),
                "Permanent error, retrying at maximum interval"
            ),
        }

        delay
    }

    /// Reset after a successful pass
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
