use futures_util::TryStreamExt;
use mongodb::{
    Database,
    bson::{DateTime, Document, doc, oid::ObjectId},
};
use proctor_utils::status::SweepPolicy;
use schema::{Assessment, EventKind, ExamSession, ExamSessionEvent, db::Collections};

use super::{SessionFilter, SessionStore};
use crate::error::Error;

/// Store backed by the shared MongoDB database.
#[derive(Clone, Debug)]
pub struct MongoStore {
    collections: Collections,
}

impl MongoStore {
    pub fn new(db: &Database) -> Self {
        Self {
            collections: Collections::new(db),
        }
    }

    /// Connects using the default database named in `uri`.
    #[tracing::instrument(skip_all, err(Debug))]
    pub async fn connect(uri: &str) -> anyhow::Result<Self> {
        let client = schema::db::client(uri).await?;
        let db = client
            .default_database()
            .ok_or_else(|| anyhow::anyhow!("MONGODB_URI does not name a database"))?;
        Ok(Self::new(&db))
    }
}

fn session_filter(filter: &SessionFilter) -> Document {
    let mut query = doc! {};
    if let Some(id) = filter.assessment_id {
        query.insert("assessmentId", id);
    }
    if let Some(id) = filter.user_id {
        query.insert("userId", id);
    }
    if let Some(ids) = &filter.assessment_ids {
        // Combined with a single `assessmentId` as a conjunction
        let in_ids = doc! { "$in": ids.clone() };
        match filter.assessment_id {
            Some(_) => {
                query = doc! { "$and": [query, { "assessmentId": in_ids }] };
            }
            None => {
                query.insert("assessmentId", in_ids);
            }
        }
    }
    query
}

fn event_filter(session_id: ObjectId, kind: Option<&EventKind>) -> Document {
    let mut query = doc! { "sessionId": session_id };
    if let Some(kind) = kind {
        query.insert("type", kind.to_string());
    }
    query
}

impl SessionStore for MongoStore {
    async fn insert_session(&self, session: &ExamSession) -> Result<(), Error> {
        self.collections.sessions.insert_one(session).await?;
        Ok(())
    }

    async fn find_session(&self, id: ObjectId) -> Result<Option<ExamSession>, Error> {
        Ok(self
            .collections
            .sessions
            .find_one(doc! { "_id": id })
            .await?)
    }

    async fn find_sessions(&self, filter: &SessionFilter) -> Result<Vec<ExamSession>, Error> {
        let sessions = self
            .collections
            .sessions
            .find(session_filter(filter))
            .sort(doc! { "startedAt": 1 })
            .await?
            .try_collect()
            .await?;
        Ok(sessions)
    }

    async fn find_sweep_eligible(
        &self,
        policy: &SweepPolicy,
        now: DateTime,
    ) -> Result<Vec<ObjectId>, Error> {
        let cutoff = policy.stale_cutoff(now);
        let sessions: Vec<ExamSession> = self
            .collections
            .sessions
            .find(doc! {
                "$or": [
                    { "completed": true },
                    { "endedAt": { "$ne": null } },
                    { "startedAt": { "$lt": cutoff } },
                ]
            })
            .await?
            .try_collect()
            .await?;
        Ok(sessions.into_iter().map(|s| s.id).collect())
    }

    async fn replace_session(
        &self,
        session: &ExamSession,
        expected_version: Option<i64>,
    ) -> Result<bool, Error> {
        let mut query = doc! { "_id": session.id };
        if let Some(version) = expected_version {
            query.insert("version", version);
        }
        let res = self
            .collections
            .sessions
            .replace_one(query, session)
            .await?;
        Ok(res.matched_count == 1)
    }

    async fn delete_sessions(&self, ids: &[ObjectId]) -> Result<u64, Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let res = self
            .collections
            .sessions
            .delete_many(doc! { "_id": { "$in": ids.to_vec() } })
            .await?;
        Ok(res.deleted_count)
    }

    async fn insert_event(&self, event: &ExamSessionEvent) -> Result<(), Error> {
        self.collections.events.insert_one(event).await?;
        Ok(())
    }

    async fn find_events(
        &self,
        session_id: ObjectId,
        kind: Option<&EventKind>,
    ) -> Result<Vec<ExamSessionEvent>, Error> {
        let events = self
            .collections
            .events
            .find(event_filter(session_id, kind))
            .sort(doc! { "timestamp": -1, "_id": -1 })
            .await?
            .try_collect()
            .await?;
        Ok(events)
    }

    async fn latest_event(
        &self,
        session_id: ObjectId,
        kind: &EventKind,
    ) -> Result<Option<ExamSessionEvent>, Error> {
        Ok(self
            .collections
            .events
            .find_one(event_filter(session_id, Some(kind)))
            .sort(doc! { "timestamp": -1, "_id": -1 })
            .await?)
    }

    async fn delete_events(&self, session_ids: &[ObjectId]) -> Result<u64, Error> {
        if session_ids.is_empty() {
            return Ok(0);
        }
        let res = self
            .collections
            .events
            .delete_many(doc! { "sessionId": { "$in": session_ids.to_vec() } })
            .await?;
        Ok(res.deleted_count)
    }

    async fn find_assessment(&self, id: ObjectId) -> Result<Option<Assessment>, Error> {
        Ok(self
            .collections
            .assessments
            .find_one(doc! { "_id": id })
            .await?)
    }

    async fn find_assessment_ids_by_instructor(
        &self,
        instructor_id: ObjectId,
    ) -> Result<Vec<ObjectId>, Error> {
        let assessments: Vec<Assessment> = self
            .collections
            .assessments
            .find(doc! { "instructorId": instructor_id })
            .await?
            .try_collect()
            .await?;
        Ok(assessments.into_iter().map(|a| a.id).collect())
    }
}
