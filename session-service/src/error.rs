use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),
    #[error("missing or invalid caller identity")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{1}")]
    Server(StatusCode, String),
    // Froms
    #[error("{0}")]
    MongoDB(#[from] mongodb::error::Error),
    #[error("{0}")]
    BsonSerialization(#[from] mongodb::bson::ser::Error),
    #[error("{0}")]
    ObjectId(#[from] mongodb::bson::oid::Error),
    #[error("{0}")]
    Policy(#[from] proctor_utils::error::Error),
}

impl Error {
    pub fn session_not_found(id: impl std::fmt::Display) -> Self {
        Error::NotFound(format!("Exam session {id} not found"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) | Error::ObjectId(_) | Error::Policy(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Server(c, _) => *c,
            Error::MongoDB(_) | Error::BsonSerialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        }
        let msg = match status {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
            _ => self.to_string(),
        };

        (status, Json(json!({ "error": msg }))).into_response()
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::BadRequest(rejection.body_text())
    }
}

impl From<Error> for StatusCode {
    fn from(error: Error) -> Self {
        error.status()
    }
}
