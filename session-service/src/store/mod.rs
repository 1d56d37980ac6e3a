//! Storage boundary for sessions, their events, and assessment definitions.
//!
//! Events are always returned most recent first; ties on `timestamp` resolve
//! to the later insert.
use std::future::Future;

use mongodb::bson::{DateTime, oid::ObjectId};
use proctor_utils::status::SweepPolicy;
use schema::{Assessment, EventKind, ExamSession, ExamSessionEvent};

use crate::error::Error;

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Conjunction of optional session filters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionFilter {
    pub assessment_id: Option<ObjectId>,
    pub user_id: Option<ObjectId>,
    /// Restrict to sessions of any of these assessments
    pub assessment_ids: Option<Vec<ObjectId>>,
}

impl SessionFilter {
    pub fn for_attempt(assessment_id: ObjectId, user_id: ObjectId) -> Self {
        Self {
            assessment_id: Some(assessment_id),
            user_id: Some(user_id),
            assessment_ids: None,
        }
    }

    pub fn matches(&self, session: &ExamSession) -> bool {
        self.assessment_id.is_none_or(|id| session.assessment_id == id)
            && self.user_id.is_none_or(|id| session.user_id == id)
            && self
                .assessment_ids
                .as_ref()
                .is_none_or(|ids| ids.contains(&session.assessment_id))
    }
}

pub trait SessionStore: Send + Sync + 'static {
    fn insert_session(
        &self,
        session: &ExamSession,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn find_session(
        &self,
        id: ObjectId,
    ) -> impl Future<Output = Result<Option<ExamSession>, Error>> + Send;

    fn find_sessions(
        &self,
        filter: &SessionFilter,
    ) -> impl Future<Output = Result<Vec<ExamSession>, Error>> + Send;

    /// Ids of sessions the cleanup sweep should delete at `now`.
    fn find_sweep_eligible(
        &self,
        policy: &SweepPolicy,
        now: DateTime,
    ) -> impl Future<Output = Result<Vec<ObjectId>, Error>> + Send;

    /// Replaces the stored session. With `expected_version`, the write only
    /// applies while the stored version still matches.
    ///
    /// Returns `false` if nothing was replaced.
    fn replace_session(
        &self,
        session: &ExamSession,
        expected_version: Option<i64>,
    ) -> impl Future<Output = Result<bool, Error>> + Send;

    fn delete_sessions(&self, ids: &[ObjectId])
    -> impl Future<Output = Result<u64, Error>> + Send;

    fn insert_event(
        &self,
        event: &ExamSessionEvent,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Events of one session, optionally of one kind, most recent first.
    fn find_events(
        &self,
        session_id: ObjectId,
        kind: Option<&EventKind>,
    ) -> impl Future<Output = Result<Vec<ExamSessionEvent>, Error>> + Send;

    fn latest_event(
        &self,
        session_id: ObjectId,
        kind: &EventKind,
    ) -> impl Future<Output = Result<Option<ExamSessionEvent>, Error>> + Send;

    fn delete_events(
        &self,
        session_ids: &[ObjectId],
    ) -> impl Future<Output = Result<u64, Error>> + Send;

    fn find_assessment(
        &self,
        id: ObjectId,
    ) -> impl Future<Output = Result<Option<Assessment>, Error>> + Send;

    fn find_assessment_ids_by_instructor(
        &self,
        instructor_id: ObjectId,
    ) -> impl Future<Output = Result<Vec<ObjectId>, Error>> + Send;
}
