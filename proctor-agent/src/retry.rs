use std::time::Duration;

use proctor_utils::backoff::{Backoff, BackoffConfig};
use tokio::time::Instant;
use tracing::warn;

use crate::error::AgentError;

/// Tracks consecutive transport failures of one agent.
///
/// Calls made before the backoff delay elapsed are skipped by the caller via
/// [`Connectivity::is_ready`].
#[derive(Debug)]
pub struct Connectivity {
    backoff: Backoff,
    retry_at: Option<Instant>,
}

impl Connectivity {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            backoff: Backoff::new(config),
            retry_at: None,
        }
    }

    /// Records the outcome of a call. Returns the delay to wait when it failed
    /// in a retryable way.
    pub fn observe<T>(&mut self, result: &Result<T, AgentError>) -> Option<Duration> {
        match result {
            Err(err) if err.is_transient() => {
                let delay = self.backoff.record_failure();
                self.retry_at = Some(Instant::now() + delay);
                if self.backoff.is_exhausted() {
                    warn!(failures = self.backoff.failures(), ?delay, "connection lost");
                }
                Some(delay)
            }
            _ => {
                self.backoff.record_success();
                self.retry_at = None;
                None
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.retry_at.is_none_or(|at| Instant::now() >= at)
    }

    /// When the next call may go out, if a failure pushed it back.
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn is_lost(&self) -> bool {
        self.backoff.is_exhausted()
    }
}
