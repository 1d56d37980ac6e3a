use std::time::Duration;

use proctor_utils::{backoff::BackoffConfig, violation::ViolationPolicy};

use crate::{error::AgentError, peer::PeerConfig};

/// Timings and policies shared by the student and instructor agents.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentConfig {
    /// Session polling: the student while waiting, the viewer for its lifetime
    pub status_poll_interval: Duration,
    pub face_check_interval: Duration,
    pub offer_poll_interval: Duration,
    pub answer_poll_interval: Duration,
    pub ice_poll_interval: Duration,
    /// Server-side hold of a signal poll; zero falls back to plain interval polling
    pub signal_wait: Duration,
    /// How long the viewer shows the ended notice before leaving
    pub end_grace_delay: Duration,
    pub violations: ViolationPolicy,
    pub backoff: BackoffConfig,
    pub peer: PeerConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            status_poll_interval: Duration::from_secs(2),
            face_check_interval: Duration::from_secs(1),
            offer_poll_interval: Duration::from_secs(5),
            answer_poll_interval: Duration::from_secs(5),
            ice_poll_interval: Duration::from_secs(2),
            signal_wait: Duration::from_secs(20),
            end_grace_delay: Duration::from_secs(2),
            violations: ViolationPolicy::default(),
            backoff: BackoffConfig::default(),
            peer: PeerConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), AgentError> {
        self.violations.validate()?;
        self.backoff.validate()?;
        Ok(())
    }
}

/// Interval that skips ticks missed while a request was in flight.
pub(crate) fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval
}
