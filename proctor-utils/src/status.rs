use std::time::Duration;

use mongodb::bson::DateTime;
use schema::{ExamSession, SessionStatus};
use serde::{Deserialize, Serialize};

/// Sessions with no explicit end are abandoned after this long.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepPolicy {
    pub stale_after: Duration,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

impl SweepPolicy {
    /// Sessions started before this instant are stale.
    pub fn stale_cutoff(&self, now: DateTime) -> DateTime {
        let stale_ms = i64::try_from(self.stale_after.as_millis()).unwrap_or(i64::MAX);
        DateTime::from_millis(now.timestamp_millis().saturating_sub(stale_ms))
    }

    pub fn is_stale(&self, session: &ExamSession, now: DateTime) -> bool {
        session.started_at < self.stale_cutoff(now)
    }

    /// `completed OR endedAt set OR startedAt older than the staleness window`
    pub fn is_sweep_eligible(&self, session: &ExamSession, now: DateTime) -> bool {
        session.completed || session.ended_at.is_some() || self.is_stale(session, now)
    }

    /// Status implied by the session flags at `now`.
    pub fn derive_status(&self, session: &ExamSession, now: DateTime) -> SessionStatus {
        if session.completed {
            SessionStatus::Completed
        } else if session.ended_at.is_some() {
            SessionStatus::EndedIncomplete
        } else if self.is_stale(session, now) {
            SessionStatus::Expired
        } else if session.proctoring_active {
            SessionStatus::Active
        } else {
            SessionStatus::Waiting
        }
    }
}
