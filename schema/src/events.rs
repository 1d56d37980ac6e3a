use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Prefix namespacing signaling records among session events.
pub const SIGNAL_PREFIX: &str = "rtc-";

/// Which half of the WebRTC handshake a signal belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalRole {
    /// Published by the instructor
    Offer,
    /// Published by the student
    Answer,
    StudentIce,
    InstructorIce,
}

impl SignalRole {
    pub const ALL: [SignalRole; 4] = [
        SignalRole::Offer,
        SignalRole::Answer,
        SignalRole::StudentIce,
        SignalRole::InstructorIce,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalRole::Offer => "offer",
            SignalRole::Answer => "answer",
            SignalRole::StudentIce => "student-ice",
            SignalRole::InstructorIce => "instructor-ice",
        }
    }

    pub fn event_kind(self) -> EventKind {
        EventKind::Signal(self)
    }
}

impl fmt::Display for SignalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SignalRole::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unknown signal type '{s}'"))
    }
}

/// Session event tag.
///
/// Stored as a plain string so that tags written by other clients survive a
/// round trip through [`EventKind::Other`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    FaceLost,
    TabSwitch,
    KickedOut,
    WebcamAccessFailed,
    VideoStreamStarted,
    Signal(SignalRole),
    Other(String),
}

impl EventKind {
    /// Counts toward automatic removal.
    pub fn is_violation(&self) -> bool {
        matches!(self, EventKind::FaceLost | EventKind::TabSwitch)
    }

    pub fn is_signal(&self) -> bool {
        matches!(self, EventKind::Signal(_))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::FaceLost => f.write_str("face-lost"),
            EventKind::TabSwitch => f.write_str("tab-switch"),
            EventKind::KickedOut => f.write_str("kicked-out"),
            EventKind::WebcamAccessFailed => f.write_str("webcam-access-failed"),
            EventKind::VideoStreamStarted => f.write_str("video-stream-started"),
            EventKind::Signal(role) => write!(f, "{SIGNAL_PREFIX}{role}"),
            EventKind::Other(s) => f.write_str(s),
        }
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "face-lost" => EventKind::FaceLost,
            "tab-switch" => EventKind::TabSwitch,
            "kicked-out" => EventKind::KickedOut,
            "webcam-access-failed" => EventKind::WebcamAccessFailed,
            "video-stream-started" => EventKind::VideoStreamStarted,
            other => match other
                .strip_prefix(SIGNAL_PREFIX)
                .and_then(|role| role.parse().ok())
            {
                Some(role) => EventKind::Signal(role),
                None => EventKind::Other(s),
            },
        }
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        EventKind::from(s.to_string())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Other(s) => s,
            other => other.to_string(),
        }
    }
}
