use reqwest::StatusCode;

#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    /// The session no longer exists on the server.
    #[error("{0}")]
    NotFound(String),
    #[error("server rejected request ({status}): {message}")]
    Rejected { status: StatusCode, message: String },
    #[error("camera unavailable: {0}")]
    Camera(String),
    #[error("peer connection: {0}")]
    Peer(String),
    #[error("student was removed from the assessment")]
    Removed,
    #[error("assessment has not started")]
    NotActive,
    #[error("agent has stopped")]
    Stopped,
    // Froms
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Policy(#[from] proctor_utils::error::Error),
    #[error("agent task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AgentError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AgentError::NotFound(_))
    }

    /// Failures worth retrying: the service could not be reached or answered 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            AgentError::Transport(_) => true,
            AgentError::Rejected { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}
