//! Persisted data model shared by the session service and the proctoring agents.
//!
//! Collection documents use `ObjectId` and BSON datetimes; the wire views in
//! [`view`] use hex strings and RFC 3339 timestamps.
pub mod db;
pub mod events;
pub mod view;

use std::collections::BTreeMap;

use mongodb::bson::{Bson, DateTime, oid::ObjectId};
use serde::{Deserialize, Serialize};

pub use events::{EventKind, SIGNAL_PREFIX, SignalRole};

/// Collection names, as created by the content application.
pub const SESSION_COLLECTION: &str = "ExamSession";
pub const EVENT_COLLECTION: &str = "ExamSessionEvent";
pub const ASSESSMENT_COLLECTION: &str = "Assessment";

/// Question id -> selected option index
pub type Answers = BTreeMap<String, i64>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentKind {
    #[default]
    Exam,
    Quiz,
}

/// Lifecycle status persisted on every session write.
///
/// `EndedIncomplete`, `Completed` and `Expired` are all sweep-eligible.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Waiting,
    Active,
    EndedIncomplete,
    Completed,
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Active => "active",
            SessionStatus::EndedIncomplete => "ended-incomplete",
            SessionStatus::Completed => "completed",
            SessionStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::EndedIncomplete | SessionStatus::Completed | SessionStatus::Expired
        )
    }
}

impl From<SessionStatus> for Bson {
    fn from(status: SessionStatus) -> Self {
        Bson::String(status.as_str().to_string())
    }
}

/// Identity role forwarded by the authentication layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    Student,
    Instructor,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Student => "STUDENT",
            UserRole::Instructor => "INSTRUCTOR",
            UserRole::Admin => "ADMIN",
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "STUDENT" => Ok(UserRole::Student),
            "INSTRUCTOR" => Ok(UserRole::Instructor),
            "ADMIN" => Ok(UserRole::Admin),
            other => Err(format!("unknown user role '{other}'")),
        }
    }
}

/// One student's attempt at an exam or quiz.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExamSession {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "assessmentId")]
    pub assessment_id: ObjectId,
    #[serde(rename = "assessmentKind", default)]
    pub assessment_kind: AssessmentKind,
    #[serde(rename = "userId")]
    pub user_id: ObjectId,
    #[serde(rename = "requiresProctoring")]
    pub requires_proctoring: bool,
    #[serde(rename = "proctoringActive")]
    pub proctoring_active: bool,
    pub status: SessionStatus,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime,
    #[serde(rename = "endedAt")]
    pub ended_at: Option<DateTime>,
    pub completed: bool,
    pub answers: Option<Answers>,
    pub score: Option<f64>,
    /// Bumped on every write, checked by compare-and-set updates
    #[serde(default)]
    pub version: i64,
}

impl ExamSession {
    /// A fresh attempt, waiting for the instructor to start proctoring.
    pub fn new(
        assessment_id: ObjectId,
        assessment_kind: AssessmentKind,
        user_id: ObjectId,
        started_at: DateTime,
    ) -> Self {
        Self {
            id: ObjectId::new(),
            assessment_id,
            assessment_kind,
            user_id,
            requires_proctoring: true,
            proctoring_active: false,
            status: SessionStatus::Waiting,
            started_at,
            ended_at: None,
            completed: false,
            answers: None,
            score: None,
            version: 0,
        }
    }
}

/// Violation or signaling record owned by exactly one session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExamSessionEvent {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "sessionId")]
    pub session_id: ObjectId,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime,
    pub metadata: Option<serde_json::Value>,
}

impl ExamSessionEvent {
    pub fn new(
        session_id: ObjectId,
        kind: EventKind,
        metadata: Option<serde_json::Value>,
        timestamp: DateTime,
    ) -> Self {
        Self {
            id: ObjectId::new(),
            session_id,
            kind,
            timestamp,
            metadata,
        }
    }

    /// Payload of a signaling event, stored as `{ "signal": ... }`.
    pub fn signal(&self) -> Option<&serde_json::Value> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("signal"))
            .filter(|s| !s.is_null())
    }
}

/// Exam or quiz definition. Owned by the content store; read-only here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(default)]
    pub kind: AssessmentKind,
    pub title: String,
    #[serde(rename = "instructorId")]
    pub instructor_id: ObjectId,
    /// Secure quizzes can opt out; exams are always proctored
    #[serde(rename = "requiresProctoring", default = "default_true")]
    pub requires_proctoring: bool,
    #[serde(default)]
    pub questions: Vec<Question>,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    pub options: Vec<String>,
    #[serde(rename = "correctOption")]
    pub correct_option: i64,
}

/// Converts a BSON datetime to chrono for the wire views.
pub fn to_chrono(dt: DateTime) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(dt.timestamp_millis()).unwrap_or_default()
}
