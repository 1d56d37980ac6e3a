use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use schema::{
    Answers, EventKind, SignalRole, UserRole,
    view::{
        CreateSessionRequest, EventView, LogEventRequest, PublishSignalRequest, SessionView,
        SetActiveRequest, SignalView, SubmissionResult, SubmitAnswersRequest,
    },
};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::debug;

use crate::error::AgentError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Session service client acting as a single user.
#[derive(Clone, Debug)]
pub struct ProctorClient {
    http: reqwest::Client,
    base_url: String,
    user_id: String,
    role: UserRole,
}

impl ProctorClient {
    pub fn new(
        base_url: impl Into<String>,
        user_id: impl Into<String>,
        role: UserRole,
    ) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
            role,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn role(&self) -> UserRole {
        self.role
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .header(USER_ID_HEADER, &self.user_id)
            .header(USER_ROLE_HEADER, self.role.as_str())
    }

    /// Maps non-success statuses onto [`AgentError`].
    async fn check(response: Response) -> Result<Response, AgentError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
        };
        debug!(%status, %message, "request rejected");
        if status == StatusCode::NOT_FOUND {
            return Err(AgentError::NotFound(message));
        }
        Err(AgentError::Rejected { status, message })
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, AgentError> {
        let response = Self::check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    pub async fn ping(&self) -> Result<(), AgentError> {
        Self::check(self.request(Method::GET, "/status/ping").send().await?).await?;
        Ok(())
    }

    pub async fn list_sessions(&self, assessment_id: &str) -> Result<Vec<SessionView>, AgentError> {
        let request = self
            .request(Method::GET, "/sessions")
            .query(&[("assessmentId", assessment_id)]);
        self.send(request).await
    }

    pub async fn create_session(&self, assessment_id: &str) -> Result<SessionView, AgentError> {
        let body = CreateSessionRequest {
            assessment_id: assessment_id.to_string(),
            assessment_kind: None,
        };
        self.send(self.request(Method::POST, "/sessions").json(&body))
            .await
    }

    pub async fn get_session(&self, id: &str) -> Result<SessionView, AgentError> {
        self.send(self.request(Method::GET, &format!("/sessions/{id}")))
            .await
    }

    /// Returns `None` when stopping a completed session deleted it.
    pub async fn set_active(
        &self,
        id: &str,
        proctoring_active: bool,
        expected_version: Option<i64>,
    ) -> Result<Option<SessionView>, AgentError> {
        let body = SetActiveRequest {
            proctoring_active,
            expected_version,
        };
        let response = self
            .request(Method::PATCH, &format!("/sessions/{id}"))
            .json(&body)
            .send()
            .await?;
        let response = Self::check(response).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Ok(Some(response.json().await?))
    }

    pub async fn delete_session(&self, id: &str) -> Result<(), AgentError> {
        let response = self
            .request(Method::DELETE, &format!("/sessions/{id}"))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn submit(&self, id: &str, answers: &Answers) -> Result<SubmissionResult, AgentError> {
        let body = SubmitAnswersRequest {
            answers: answers.clone(),
        };
        self.send(
            self.request(Method::POST, &format!("/sessions/{id}/submissions"))
                .json(&body),
        )
        .await
    }

    pub async fn log_event(
        &self,
        id: &str,
        kind: EventKind,
        metadata: Option<serde_json::Value>,
    ) -> Result<EventView, AgentError> {
        let body = LogEventRequest { kind, metadata };
        self.send(
            self.request(Method::POST, &format!("/sessions/{id}/events"))
                .json(&body),
        )
        .await
    }

    pub async fn events(&self, id: &str) -> Result<Vec<EventView>, AgentError> {
        self.send(self.request(Method::GET, &format!("/sessions/{id}/events")))
            .await
    }

    pub async fn publish_signal(
        &self,
        id: &str,
        role: SignalRole,
        signal: serde_json::Value,
    ) -> Result<SignalView, AgentError> {
        let body = PublishSignalRequest { role, signal };
        self.send(
            self.request(Method::POST, &format!("/sessions/{id}/signals"))
                .json(&body),
        )
        .await
    }

    /// Latest payload of `role`. With `wait`, the server holds the request until a
    /// payload newer than `since` arrives or the wait runs out.
    pub async fn poll_signal(
        &self,
        id: &str,
        role: SignalRole,
        since: Option<&str>,
        wait: Option<Duration>,
    ) -> Result<SignalView, AgentError> {
        let mut request = self
            .request(Method::GET, &format!("/sessions/{id}/signals"))
            .query(&[("type", role.as_str())]);
        if let Some(since) = since {
            request = request.query(&[("since", since)]);
        }
        if let Some(wait) = wait {
            request = request
                .query(&[("waitMs", wait.as_millis().to_string())])
                .timeout(REQUEST_TIMEOUT + wait);
        }
        self.send(request).await
    }
}
