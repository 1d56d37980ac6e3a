//! JSON shapes exchanged over the HTTP API.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Answers, Assessment, AssessmentKind, EventKind, ExamSession, ExamSessionEvent, SessionStatus,
    SignalRole, to_chrono,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    pub assessment_id: String,
    pub assessment_kind: AssessmentKind,
    pub user_id: String,
    pub requires_proctoring: bool,
    pub proctoring_active: bool,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub completed: bool,
    pub answers: Option<Answers>,
    pub score: Option<f64>,
    pub version: i64,
    /// Most recent first
    #[serde(default)]
    pub events: Vec<EventView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<AssessmentView>,
    pub user: UserView,
}

impl SessionView {
    pub fn with_events(mut self, events: &[ExamSessionEvent]) -> Self {
        self.events = events.iter().map(EventView::from).collect();
        self
    }

    pub fn with_assessment(mut self, assessment: Option<&Assessment>) -> Self {
        self.assessment = assessment.map(AssessmentView::from);
        self
    }

    /// Violation and escalation events, most recent first.
    pub fn violations(&self) -> impl Iterator<Item = &EventView> {
        self.events.iter().filter(|e| !e.kind.is_signal())
    }
}

impl From<&ExamSession> for SessionView {
    fn from(session: &ExamSession) -> Self {
        Self {
            id: session.id.to_hex(),
            assessment_id: session.assessment_id.to_hex(),
            assessment_kind: session.assessment_kind,
            user_id: session.user_id.to_hex(),
            requires_proctoring: session.requires_proctoring,
            proctoring_active: session.proctoring_active,
            status: session.status,
            started_at: to_chrono(session.started_at),
            ended_at: session.ended_at.map(to_chrono),
            completed: session.completed,
            answers: session.answers.clone(),
            score: session.score,
            version: session.version,
            events: vec![],
            assessment: None,
            user: UserView {
                id: session.user_id.to_hex(),
            },
        }
    }
}

/// User projection. Names and emails stay with the identity provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserView {
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentView {
    pub id: String,
    pub kind: AssessmentKind,
    pub title: String,
    pub instructor_id: String,
    pub questions: Vec<QuestionView>,
}

impl From<&Assessment> for AssessmentView {
    fn from(assessment: &Assessment) -> Self {
        Self {
            id: assessment.id.to_hex(),
            kind: assessment.kind,
            title: assessment.title.clone(),
            instructor_id: assessment.instructor_id.to_hex(),
            questions: assessment
                .questions
                .iter()
                .map(|q| QuestionView {
                    id: q.id.clone(),
                    prompt: q.prompt.clone(),
                    options: q.options.clone(),
                })
                .collect(),
        }
    }
}

/// Question as shown to the student, without the correct option.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: String,
    pub prompt: String,
    pub options: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    pub id: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

impl From<&ExamSessionEvent> for EventView {
    fn from(event: &ExamSessionEvent) -> Self {
        Self {
            id: event.id.to_hex(),
            session_id: event.session_id.to_hex(),
            kind: event.kind.clone(),
            timestamp: to_chrono(event.timestamp),
            metadata: event.metadata.clone(),
        }
    }
}

/// Latest signal of one role. `signal` is `None` until one is published.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalView {
    pub session_id: String,
    #[serde(rename = "type")]
    pub role: SignalRole,
    pub signal: Option<serde_json::Value>,
    pub event_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl SignalView {
    pub fn empty(session_id: String, role: SignalRole) -> Self {
        Self {
            session_id,
            role,
            signal: None,
            event_id: None,
            timestamp: None,
        }
    }

    pub fn from_event(role: SignalRole, event: &ExamSessionEvent) -> Self {
        Self {
            session_id: event.session_id.to_hex(),
            role,
            signal: event.signal().cloned(),
            event_id: Some(event.id.to_hex()),
            timestamp: Some(to_chrono(event.timestamp)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub session_id: String,
    pub score: f64,
    pub correct_answers: usize,
    pub total_questions: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub assessment_id: String,
    #[serde(default)]
    pub assessment_kind: Option<AssessmentKind>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetActiveRequest {
    pub proctoring_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitAnswersRequest {
    pub answers: Answers,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEventRequest {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublishSignalRequest {
    #[serde(rename = "type")]
    pub role: SignalRole,
    pub signal: serde_json::Value,
}

/// Pushed to WebSocket subscribers of one session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionNotification {
    Signal {
        role: SignalRole,
        #[serde(rename = "eventId")]
        event_id: String,
    },
    Event {
        event: EventView,
    },
    State {
        #[serde(rename = "proctoringActive")]
        proctoring_active: bool,
        status: SessionStatus,
        version: i64,
    },
    Deleted,
}
