use std::collections::HashMap;

use mongodb::bson::{DateTime, oid::ObjectId};
use proctor_utils::{
    score::{calculate_score, validate_answers},
    status::SweepPolicy,
};
use schema::{
    AssessmentKind, EventKind, ExamSession, ExamSessionEvent, UserRole,
    view::{EventView, SessionNotification, SessionView, SubmissionResult},
};
use tracing::{debug, info, instrument, warn};

use crate::{
    auth::Caller,
    config::EnvVars,
    error::Error,
    hub::Hub,
    store::{SessionFilter, SessionStore},
};

/// Result of toggling proctoring on a session.
#[derive(Debug)]
pub enum SetActiveOutcome {
    Updated(SessionView),
    /// Stopping a completed session removes it immediately
    Deleted,
}

/// Session lifecycle operations over a [`SessionStore`].
pub struct SessionManager<S> {
    store: S,
    hub: Hub,
    sweep: SweepPolicy,
    sweep_on_read: bool,
}

impl<S: SessionStore> SessionManager<S> {
    pub fn new(store: S, env_vars: &EnvVars) -> Self {
        Self {
            store,
            hub: Hub::new(),
            sweep: env_vars.sweep,
            sweep_on_read: env_vars.sweep_on_read,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub(crate) async fn load(&self, id: ObjectId) -> Result<ExamSession, Error> {
        self.store
            .find_session(id)
            .await?
            .ok_or_else(|| Error::session_not_found(id))
    }

    async fn detailed_view(&self, session: &ExamSession) -> Result<SessionView, Error> {
        let events = self.store.find_events(session.id, None).await?;
        let assessment = self.store.find_assessment(session.assessment_id).await?;
        Ok(SessionView::from(session)
            .with_events(&events)
            .with_assessment(assessment.as_ref()))
    }

    /// Bumps the version and persists. `expected_version` turns the write into a compare-and-set.
    async fn write(
        &self,
        session: &mut ExamSession,
        expected_version: Option<i64>,
        now: DateTime,
    ) -> Result<(), Error> {
        session.version += 1;
        session.status = self.sweep.derive_status(session, now);
        if self.store.replace_session(session, expected_version).await? {
            self.hub.notify(
                session.id,
                SessionNotification::State {
                    proctoring_active: session.proctoring_active,
                    status: session.status,
                    version: session.version,
                },
            );
            return Ok(());
        }
        match self.store.find_session(session.id).await? {
            None => Err(Error::session_not_found(session.id)),
            Some(current) => Err(Error::Conflict(format!(
                "Exam session {} is at version {}",
                session.id, current.version
            ))),
        }
    }

    /// Deletes events, then sessions, and disconnects subscribers.
    async fn purge(&self, ids: &[ObjectId]) -> Result<u64, Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.store.delete_events(ids).await?;
        let deleted = self.store.delete_sessions(ids).await?;
        for id in ids {
            self.hub.close(*id);
        }
        Ok(deleted)
    }

    /// Retires any previous attempt of the caller and starts a fresh one.
    #[instrument(skip_all, fields(assessment = %assessment_id, user = %caller.user_id), err(Debug))]
    pub async fn create(
        &self,
        caller: &Caller,
        assessment_id: ObjectId,
        assessment_kind: Option<AssessmentKind>,
    ) -> Result<SessionView, Error> {
        let prior: Vec<ObjectId> = self
            .store
            .find_sessions(&SessionFilter::for_attempt(assessment_id, caller.user_id))
            .await?
            .iter()
            .map(|s| s.id)
            .collect();
        if !prior.is_empty() {
            debug!(count = prior.len(), "retiring previous attempts");
            self.purge(&prior).await?;
        }

        let assessment = self.store.find_assessment(assessment_id).await?;
        let kind = assessment_kind
            .or(assessment.as_ref().map(|a| a.kind))
            .unwrap_or_default();

        let mut session = ExamSession::new(assessment_id, kind, caller.user_id, DateTime::now());
        session.requires_proctoring = assessment.as_ref().is_none_or(|a| a.requires_proctoring);
        self.store.insert_session(&session).await?;
        info!(session = %session.id, "created exam session");

        Ok(SessionView::from(&session).with_assessment(assessment.as_ref()))
    }

    /// Never deletes the record being fetched, even when it is sweep-eligible.
    pub async fn get(&self, id: ObjectId) -> Result<SessionView, Error> {
        let mut session = self.load(id).await?;
        // The stored status lags until the next write or sweep
        session.status = self.sweep.derive_status(&session, DateTime::now());
        self.detailed_view(&session).await
    }

    /// Lists sessions visible to `caller`, sweeping first when configured to.
    #[instrument(skip_all, fields(user = %caller.user_id), err(Debug))]
    pub async fn list(
        &self,
        caller: &Caller,
        mut filter: SessionFilter,
    ) -> Result<Vec<SessionView>, Error> {
        if self.sweep_on_read {
            if let Err(e) = self.sweep().await {
                warn!(error = ?e, "sweep before list failed");
            }
        }

        match caller.role {
            UserRole::Student => {
                if filter.user_id.is_some_and(|id| id != caller.user_id) {
                    return Err(Error::Forbidden(
                        "Students may only list their own sessions".to_string(),
                    ));
                }
                filter.user_id = Some(caller.user_id);
            }
            UserRole::Instructor => {
                let owned = self
                    .store
                    .find_assessment_ids_by_instructor(caller.user_id)
                    .await?;
                filter.assessment_ids = Some(owned);
            }
            UserRole::Admin => {}
        }

        let now = DateTime::now();
        let sessions = self.store.find_sessions(&filter).await?;
        let mut assessments = HashMap::new();
        let mut views = Vec::with_capacity(sessions.len());
        for session in sessions
            .iter()
            .filter(|s| !self.sweep.is_sweep_eligible(s, now))
        {
            if !assessments.contains_key(&session.assessment_id) {
                let assessment = self.store.find_assessment(session.assessment_id).await?;
                assessments.insert(session.assessment_id, assessment);
            }
            let events = self.store.find_events(session.id, None).await?;
            let assessment = assessments.get(&session.assessment_id).and_then(Option::as_ref);
            views.push(
                SessionView::from(session)
                    .with_events(&events)
                    .with_assessment(assessment),
            );
        }
        Ok(views)
    }

    /// Deletes every sweep-eligible session and its events.
    ///
    /// Idempotent. Sessions left behind by a failed pass are picked up by the next one.
    #[instrument(skip_all, err(Debug))]
    pub async fn sweep(&self) -> Result<u64, Error> {
        let ids = self
            .store
            .find_sweep_eligible(&self.sweep, DateTime::now())
            .await?;
        let deleted = self.purge(&ids).await?;
        if deleted > 0 {
            info!(deleted, "swept exam sessions");
        }
        Ok(deleted)
    }

    #[instrument(skip(self), err(Debug))]
    pub async fn set_active(
        &self,
        id: ObjectId,
        active: bool,
        expected_version: Option<i64>,
    ) -> Result<SetActiveOutcome, Error> {
        let mut session = self.load(id).await?;
        if let Some(expected) = expected_version {
            if expected != session.version {
                return Err(Error::Conflict(format!(
                    "Exam session {id} is at version {}, not {expected}",
                    session.version
                )));
            }
        }

        if !active && session.completed {
            self.purge(&[id]).await?;
            info!(session = %id, "deleted completed session on stop");
            return Ok(SetActiveOutcome::Deleted);
        }

        let now = DateTime::now();
        session.proctoring_active = active;
        session.ended_at = if active { None } else { Some(now) };
        self.write(&mut session, expected_version, now).await?;

        Ok(SetActiveOutcome::Updated(
            self.detailed_view(&session).await?,
        ))
    }

    /// Scores and completes the caller's own session.
    #[instrument(skip(self, caller, answers), fields(user = %caller.user_id), err(Debug))]
    pub async fn submit(
        &self,
        caller: &Caller,
        id: ObjectId,
        answers: schema::Answers,
    ) -> Result<SubmissionResult, Error> {
        let mut session = self.load(id).await?;
        if session.user_id != caller.user_id {
            return Err(Error::Forbidden(
                "Only the session owner may submit answers".to_string(),
            ));
        }
        if session.completed {
            return Err(Error::Conflict(format!(
                "Exam session {id} is already completed"
            )));
        }
        if self
            .store
            .latest_event(id, &EventKind::KickedOut)
            .await?
            .is_some()
        {
            return Err(Error::Conflict(format!(
                "Exam session {id} was ended after repeated violations"
            )));
        }

        let assessment = self
            .store
            .find_assessment(session.assessment_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("Assessment {} not found", session.assessment_id))
            })?;
        validate_answers(&assessment, &answers)?;
        let report = calculate_score(&assessment, &answers);

        let now = DateTime::now();
        session.answers = Some(answers);
        session.score = Some(report.score);
        session.completed = true;
        session.ended_at = Some(now);
        session.proctoring_active = false;
        self.write(&mut session, None, now).await?;
        info!(session = %id, score = report.score, "submitted answers");

        Ok(SubmissionResult {
            session_id: id.to_hex(),
            score: report.score,
            correct_answers: report.correct_answers,
            total_questions: report.total_questions,
        })
    }

    /// Persists an event and pushes it to subscribers.
    pub(crate) async fn append_event(
        &self,
        session_id: ObjectId,
        kind: EventKind,
        metadata: Option<serde_json::Value>,
    ) -> Result<ExamSessionEvent, Error> {
        self.load(session_id).await?;
        let event = ExamSessionEvent::new(session_id, kind, metadata, DateTime::now());
        self.store.insert_event(&event).await?;

        let notification = match event.kind {
            EventKind::Signal(role) => SessionNotification::Signal {
                role,
                event_id: event.id.to_hex(),
            },
            _ => SessionNotification::Event {
                event: EventView::from(&event),
            },
        };
        self.hub.notify(session_id, notification);
        Ok(event)
    }

    #[instrument(skip(self, metadata), err(Debug))]
    pub async fn log_event(
        &self,
        session_id: ObjectId,
        kind: EventKind,
        metadata: Option<serde_json::Value>,
    ) -> Result<EventView, Error> {
        if kind.is_signal() {
            return Err(Error::BadRequest(format!(
                "{kind} is a signaling event, publish it to the session's signals"
            )));
        }
        let event = self.append_event(session_id, kind, metadata).await?;
        debug!(kind = %event.kind, "logged session event");
        Ok(EventView::from(&event))
    }

    /// Most recent first.
    pub async fn events(&self, session_id: ObjectId) -> Result<Vec<EventView>, Error> {
        self.load(session_id).await?;
        let events = self.store.find_events(session_id, None).await?;
        Ok(events.iter().map(EventView::from).collect())
    }

    #[instrument(skip(self), err(Debug))]
    pub async fn delete(&self, id: ObjectId) -> Result<(), Error> {
        self.load(id).await?;
        self.purge(&[id]).await?;
        info!(session = %id, "deleted exam session");
        Ok(())
    }
}
