use std::time::{Duration, Instant};

use schema::EventKind;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;

pub const DEFAULT_MAX_STRIKES: u32 = 3;
/// How long the assessment is obscured after each violation
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(3);

/// Where the strike count starts when an agent (re)starts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrikeCounting {
    /// Counter lives in agent memory; a reload starts from zero.
    #[default]
    AgentLifetime,
    /// Counter is seeded from the violations already persisted for the session.
    PersistedLog,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationPolicy {
    pub max_strikes: u32,
    pub cooldown: Duration,
    pub counting: StrikeCounting,
}

impl Default for ViolationPolicy {
    fn default() -> Self {
        Self {
            max_strikes: DEFAULT_MAX_STRIKES,
            cooldown: DEFAULT_COOLDOWN,
            counting: StrikeCounting::default(),
        }
    }
}

impl ViolationPolicy {
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_strikes == 0 {
            return Err(Error::InvalidPolicy(
                "max_strikes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of recording one event against the tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strike {
    /// Not a violation, or the student is already removed.
    Ignored,
    /// Violation counted; the assessment stays obscured until the instant given.
    Warned { count: u32, obscured_until: Instant },
    /// Limit reached. Reported exactly once per tracker.
    Removed { count: u32 },
}

/// Three-strike counter held by the student agent.
#[derive(Clone, Debug)]
pub struct ViolationTracker {
    policy: ViolationPolicy,
    count: u32,
    removed: bool,
    obscured_until: Option<Instant>,
}

impl ViolationTracker {
    pub fn new(policy: ViolationPolicy) -> Self {
        Self {
            policy,
            count: 0,
            removed: false,
            obscured_until: None,
        }
    }

    /// Starts from the persisted history when the policy counts the log.
    ///
    /// A persisted `kicked-out` always carries over, regardless of counting mode.
    pub fn seeded<'a>(
        policy: ViolationPolicy,
        history: impl IntoIterator<Item = &'a EventKind>,
    ) -> Self {
        let mut tracker = Self::new(policy);
        for kind in history {
            match kind {
                EventKind::KickedOut => tracker.removed = true,
                k if k.is_violation() && policy.counting == StrikeCounting::PersistedLog => {
                    tracker.count += 1
                }
                _ => {}
            }
        }
        debug!(
            count = tracker.count,
            removed = tracker.removed,
            "seeded violation tracker"
        );
        tracker
    }

    pub fn record(&mut self, kind: &EventKind, now: Instant) -> Strike {
        if self.removed || !kind.is_violation() {
            return Strike::Ignored;
        }
        self.count += 1;
        let obscured_until = now + self.policy.cooldown;
        self.obscured_until = Some(obscured_until);

        if self.count >= self.policy.max_strikes {
            self.removed = true;
            return Strike::Removed { count: self.count };
        }
        Strike::Warned {
            count: self.count,
            obscured_until,
        }
    }

    /// Removes immediately if a seeded count already reached the limit.
    pub fn escalate_if_due(&mut self) -> Option<Strike> {
        if !self.removed && self.count >= self.policy.max_strikes {
            self.removed = true;
            return Some(Strike::Removed { count: self.count });
        }
        None
    }

    pub fn is_obscured(&self, now: Instant) -> bool {
        self.obscured_until.is_some_and(|until| now < until)
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn policy(&self) -> &ViolationPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use schema::SignalRole;

    use super::*;

    #[test]
    fn two_violations_do_not_remove() {
        let mut tracker = ViolationTracker::new(ViolationPolicy::default());
        let now = Instant::now();
        assert!(matches!(
            tracker.record(&EventKind::FaceLost, now),
            Strike::Warned { count: 1, .. }
        ));
        assert!(matches!(
            tracker.record(&EventKind::TabSwitch, now),
            Strike::Warned { count: 2, .. }
        ));
        assert!(!tracker.is_removed());
    }

    #[test]
    fn third_violation_removes_exactly_once() {
        let mut tracker = ViolationTracker::new(ViolationPolicy::default());
        let now = Instant::now();
        tracker.record(&EventKind::TabSwitch, now);
        tracker.record(&EventKind::TabSwitch, now);
        assert_eq!(
            tracker.record(&EventKind::TabSwitch, now),
            Strike::Removed { count: 3 }
        );
        assert_eq!(tracker.record(&EventKind::FaceLost, now), Strike::Ignored);
        assert_eq!(tracker.count(), 3);
    }

    #[test]
    fn non_violations_are_not_counted() {
        let mut tracker = ViolationTracker::new(ViolationPolicy::default());
        let now = Instant::now();
        for kind in [
            EventKind::WebcamAccessFailed,
            EventKind::VideoStreamStarted,
            SignalRole::Offer.event_kind(),
        ] {
            assert_eq!(tracker.record(&kind, now), Strike::Ignored);
        }
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn cooldown_obscures_for_three_seconds() {
        let mut tracker = ViolationTracker::new(ViolationPolicy::default());
        let now = Instant::now();
        assert!(!tracker.is_obscured(now));
        tracker.record(&EventKind::FaceLost, now);
        assert!(tracker.is_obscured(now + Duration::from_secs(2)));
        assert!(!tracker.is_obscured(now + Duration::from_secs(3)));
    }

    #[test]
    fn agent_lifetime_counting_ignores_history() {
        let history = [EventKind::TabSwitch, EventKind::FaceLost];
        let tracker = ViolationTracker::seeded(ViolationPolicy::default(), &history);
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn persisted_counting_resumes_from_history() {
        let policy = ViolationPolicy {
            counting: StrikeCounting::PersistedLog,
            ..Default::default()
        };
        let history = [
            EventKind::TabSwitch,
            SignalRole::Answer.event_kind(),
            EventKind::FaceLost,
        ];
        let mut tracker = ViolationTracker::seeded(policy, &history);
        assert_eq!(tracker.count(), 2);
        assert_eq!(tracker.escalate_if_due(), None);
        assert_eq!(
            tracker.record(&EventKind::TabSwitch, Instant::now()),
            Strike::Removed { count: 3 }
        );
    }

    #[test]
    fn persisted_kick_out_carries_over() {
        let history = [EventKind::KickedOut];
        let tracker = ViolationTracker::seeded(ViolationPolicy::default(), &history);
        assert!(tracker.is_removed());
    }

    #[test]
    fn zero_strike_policy_is_invalid() {
        let policy = ViolationPolicy {
            max_strikes: 0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }
}
