//! Bounded exponential backoff for signaling and status polls.
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay added as random jitter, 0.0 disables it
    pub jitter: f64,
    /// Consecutive failures after which the connection is reported lost
    pub failure_threshold: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
            failure_threshold: 8,
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::InvalidPolicy(format!(
                "backoff multiplier must be a finite number of at least 1, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(Error::InvalidPolicy(format!(
                "backoff jitter must be within [0, 1], got {}",
                self.jitter
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(Error::InvalidPolicy(
                "backoff initial_delay exceeds max_delay".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(delay_secs).unwrap_or(self.max_delay)
    }
}

/// Consecutive-failure bookkeeping for one polling loop.
#[derive(Clone, Debug)]
pub struct Backoff {
    config: BackoffConfig,
    failures: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Records a failed call and returns how long to wait before the next one.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = self.config.delay_for_attempt(self.failures);
        if self.config.jitter <= 0.0 {
            return delay;
        }
        let jitter = delay.mul_f64(self.config.jitter * rand::thread_rng().r#gen::<f64>());
        (delay + jitter).min(self.config.max_delay)
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// True once the failure threshold is reached; retries continue at the ceiling delay.
    pub fn is_exhausted(&self) -> bool {
        self.failures >= self.config.failure_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            jitter: 0.0,
            failure_threshold: 3,
        }
    }

    #[test]
    fn delays_double_until_ceiling() {
        let config = no_jitter();
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(800));
        assert_eq!(config.delay_for_attempt(5), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(500), Duration::from_millis(1000));
    }

    #[test]
    fn threshold_marks_exhaustion_and_success_resets() {
        let mut backoff = Backoff::new(no_jitter());
        backoff.record_failure();
        backoff.record_failure();
        assert!(!backoff.is_exhausted());
        backoff.record_failure();
        assert!(backoff.is_exhausted());
        backoff.record_success();
        assert_eq!(backoff.failures(), 0);
        assert!(!backoff.is_exhausted());
    }

    #[test]
    fn rejects_shrinking_or_unbounded_settings() {
        assert!(no_jitter().validate().is_ok());
        for config in [
            BackoffConfig { multiplier: -2.0, ..no_jitter() },
            BackoffConfig { multiplier: 0.5, ..no_jitter() },
            BackoffConfig { multiplier: f64::NAN, ..no_jitter() },
            BackoffConfig { jitter: 1.5, ..no_jitter() },
            BackoffConfig { jitter: -0.1, ..no_jitter() },
            BackoffConfig { initial_delay: Duration::from_secs(5), ..no_jitter() },
        ] {
            assert!(matches!(config.validate(), Err(Error::InvalidPolicy(_))), "{config:?}");
        }
    }

    #[test]
    fn negative_multiplier_falls_back_to_ceiling() {
        let config = BackoffConfig { multiplier: -2.0, ..no_jitter() };
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_never_exceeds_ceiling() {
        let mut backoff = Backoff::new(BackoffConfig {
            jitter: 1.0,
            ..no_jitter()
        });
        for _ in 0..20 {
            assert!(backoff.record_failure() <= Duration::from_millis(1000));
        }
    }
}
