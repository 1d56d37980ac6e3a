use std::collections::HashMap;
use std::sync::Arc;

use mongodb::bson::{DateTime, oid::ObjectId};
use proctor_utils::status::SweepPolicy;
use schema::{Assessment, EventKind, ExamSession, ExamSessionEvent};
use tokio::sync::RwLock;

use super::{SessionFilter, SessionStore};
use crate::error::Error;

#[derive(Debug, Default)]
struct Tables {
    sessions: HashMap<ObjectId, ExamSession>,
    /// Insertion order
    events: Vec<ExamSessionEvent>,
    assessments: HashMap<ObjectId, Assessment>,
}

/// Process-local store for development builds and tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an assessment, standing in for the content application.
    pub async fn insert_assessment(&self, assessment: Assessment) {
        self.tables
            .write()
            .await
            .assessments
            .insert(assessment.id, assessment);
    }

    pub async fn session_count(&self) -> usize {
        self.tables.read().await.sessions.len()
    }

    pub async fn event_count(&self) -> usize {
        self.tables.read().await.events.len()
    }
}

fn most_recent_first<'a>(
    events: impl DoubleEndedIterator<Item = &'a ExamSessionEvent>,
) -> Vec<ExamSessionEvent> {
    let mut events: Vec<ExamSessionEvent> = events.rev().cloned().collect();
    // Stable: later inserts stay ahead on equal timestamps
    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    events
}

impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &ExamSession) -> Result<(), Error> {
        self.tables
            .write()
            .await
            .sessions
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn find_session(&self, id: ObjectId) -> Result<Option<ExamSession>, Error> {
        Ok(self.tables.read().await.sessions.get(&id).cloned())
    }

    async fn find_sessions(&self, filter: &SessionFilter) -> Result<Vec<ExamSession>, Error> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<ExamSession> = tables
            .sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(sessions)
    }

    async fn find_sweep_eligible(
        &self,
        policy: &SweepPolicy,
        now: DateTime,
    ) -> Result<Vec<ObjectId>, Error> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .values()
            .filter(|s| policy.is_sweep_eligible(s, now))
            .map(|s| s.id)
            .collect())
    }

    async fn replace_session(
        &self,
        session: &ExamSession,
        expected_version: Option<i64>,
    ) -> Result<bool, Error> {
        let mut tables = self.tables.write().await;
        let Some(stored) = tables.sessions.get_mut(&session.id) else {
            return Ok(false);
        };
        if expected_version.is_some_and(|v| v != stored.version) {
            return Ok(false);
        }
        *stored = session.clone();
        Ok(true)
    }

    async fn delete_sessions(&self, ids: &[ObjectId]) -> Result<u64, Error> {
        let mut tables = self.tables.write().await;
        let deleted = ids
            .iter()
            .filter(|id| tables.sessions.remove(id).is_some())
            .count();
        Ok(deleted as u64)
    }

    async fn insert_event(&self, event: &ExamSessionEvent) -> Result<(), Error> {
        self.tables.write().await.events.push(event.clone());
        Ok(())
    }

    async fn find_events(
        &self,
        session_id: ObjectId,
        kind: Option<&EventKind>,
    ) -> Result<Vec<ExamSessionEvent>, Error> {
        let tables = self.tables.read().await;
        Ok(most_recent_first(tables.events.iter().filter(|e| {
            e.session_id == session_id && kind.is_none_or(|k| &e.kind == k)
        })))
    }

    async fn latest_event(
        &self,
        session_id: ObjectId,
        kind: &EventKind,
    ) -> Result<Option<ExamSessionEvent>, Error> {
        let events = self.find_events(session_id, Some(kind)).await?;
        Ok(events.into_iter().next())
    }

    async fn delete_events(&self, session_ids: &[ObjectId]) -> Result<u64, Error> {
        let mut tables = self.tables.write().await;
        let before = tables.events.len();
        tables
            .events
            .retain(|e| !session_ids.contains(&e.session_id));
        Ok((before - tables.events.len()) as u64)
    }

    async fn find_assessment(&self, id: ObjectId) -> Result<Option<Assessment>, Error> {
        Ok(self.tables.read().await.assessments.get(&id).cloned())
    }

    async fn find_assessment_ids_by_instructor(
        &self,
        instructor_id: ObjectId,
    ) -> Result<Vec<ObjectId>, Error> {
        let tables = self.tables.read().await;
        Ok(tables
            .assessments
            .values()
            .filter(|a| a.instructor_id == instructor_id)
            .map(|a| a.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use schema::{AssessmentKind, SignalRole};
    use serde_json::json;

    use super::*;

    fn session() -> ExamSession {
        ExamSession::new(
            ObjectId::new(),
            AssessmentKind::Exam,
            ObjectId::new(),
            DateTime::now(),
        )
    }

    #[tokio::test]
    async fn latest_event_prefers_later_insert_on_equal_timestamps() {
        let store = MemoryStore::new();
        let session = session();
        store.insert_session(&session).await.unwrap();

        let at = DateTime::now();
        let kind = SignalRole::StudentIce.event_kind();
        for n in 0..3 {
            let event =
                ExamSessionEvent::new(session.id, kind.clone(), Some(json!({ "signal": n })), at);
            store.insert_event(&event).await.unwrap();
        }

        let latest = store.latest_event(session.id, &kind).await.unwrap().unwrap();
        assert_eq!(latest.signal(), Some(&json!(2)));
    }

    #[tokio::test]
    async fn replace_respects_expected_version() {
        let store = MemoryStore::new();
        let mut session = session();
        store.insert_session(&session).await.unwrap();

        session.version = 1;
        assert!(!store.replace_session(&session, Some(5)).await.unwrap());
        assert!(store.replace_session(&session, Some(0)).await.unwrap());
        assert!(store.replace_session(&session, None).await.unwrap());
        let stored = store.find_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn deleting_events_only_touches_given_sessions() {
        let store = MemoryStore::new();
        let (a, b) = (session(), session());
        for s in [&a, &b] {
            store.insert_session(s).await.unwrap();
            let event = ExamSessionEvent::new(s.id, EventKind::TabSwitch, None, DateTime::now());
            store.insert_event(&event).await.unwrap();
        }

        assert_eq!(store.delete_events(&[a.id]).await.unwrap(), 1);
        assert_eq!(store.event_count().await, 1);
        assert_eq!(store.find_events(b.id, None).await.unwrap().len(), 1);
    }
}
