use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use mongodb::bson::oid::ObjectId;
use schema::{
    SignalRole,
    view::{
        CreateSessionRequest, EventView, LogEventRequest, PublishSignalRequest, SessionView,
        SetActiveRequest, SignalView, SubmissionResult, SubmitAnswersRequest,
    },
};
use serde::Deserialize;
use tracing::info;

use crate::{
    auth::Caller,
    config::AppState,
    error::Error,
    manager::SetActiveOutcome,
    store::{SessionFilter, SessionStore},
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsQuery {
    pub assessment_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalQuery {
    #[serde(rename = "type")]
    pub role: SignalRole,
    /// Event id of the payload the caller already applied
    pub since: Option<String>,
    pub wait_ms: Option<u64>,
}

fn parse_id(id: &str) -> Result<ObjectId, Error> {
    ObjectId::parse_str(id).map_err(|_| Error::BadRequest(format!("'{id}' is not a valid id")))
}

fn parse_optional_id(id: Option<&str>) -> Result<Option<ObjectId>, Error> {
    id.filter(|s| !s.is_empty()).map(parse_id).transpose()
}

/// Loads the session and checks the caller may act on it.
pub(crate) async fn authorize<S: SessionStore>(
    state: &AppState<S>,
    caller: &Caller,
    id: &str,
) -> Result<ObjectId, Error> {
    let id = parse_id(id)?;
    let session = state.manager.load(id).await?;
    if !caller.may_manage(session.user_id) {
        return Err(Error::Forbidden(format!(
            "Exam session {id} belongs to another user"
        )));
    }
    Ok(id)
}

pub async fn get_status_ping() -> impl IntoResponse {
    info!("Status");
    StatusCode::OK
}

pub async fn post_session<S: SessionStore>(
    State(state): State<AppState<S>>,
    caller: Caller,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SessionView>), Error> {
    let Json(request) = payload?;
    let assessment_id = parse_id(&request.assessment_id)?;
    let view = state
        .manager
        .create(&caller, assessment_id, request.assessment_kind)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_sessions<S: SessionStore>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<Vec<SessionView>>, Error> {
    let filter = SessionFilter {
        assessment_id: parse_optional_id(query.assessment_id.as_deref())?,
        user_id: parse_optional_id(query.user_id.as_deref())?,
        assessment_ids: None,
    };
    let views = state.manager.list(&caller, filter).await?;
    Ok(Json(views))
}

pub async fn get_session<S: SessionStore>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, Error> {
    let id = authorize(&state, &caller, &id).await?;
    Ok(Json(state.manager.get(id).await?))
}

pub async fn patch_session<S: SessionStore>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Path(id): Path<String>,
    payload: Result<Json<SetActiveRequest>, JsonRejection>,
) -> Result<Response, Error> {
    let Json(request) = payload?;
    let id = authorize(&state, &caller, &id).await?;
    let outcome = state
        .manager
        .set_active(id, request.proctoring_active, request.expected_version)
        .await?;
    Ok(match outcome {
        SetActiveOutcome::Updated(view) => Json(view).into_response(),
        SetActiveOutcome::Deleted => StatusCode::NO_CONTENT.into_response(),
    })
}

pub async fn delete_session<S: SessionStore>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, Error> {
    let id = authorize(&state, &caller, &id).await?;
    state.manager.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn post_submission<S: SessionStore>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Path(id): Path<String>,
    payload: Result<Json<SubmitAnswersRequest>, JsonRejection>,
) -> Result<Json<SubmissionResult>, Error> {
    let Json(request) = payload?;
    let id = parse_id(&id)?;
    let result = state.manager.submit(&caller, id, request.answers).await?;
    Ok(Json(result))
}

pub async fn post_event<S: SessionStore>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Path(id): Path<String>,
    payload: Result<Json<LogEventRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EventView>), Error> {
    let Json(request) = payload?;
    let id = authorize(&state, &caller, &id).await?;
    let event = state
        .manager
        .log_event(id, request.kind, request.metadata)
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn get_events<S: SessionStore>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<Vec<EventView>>, Error> {
    let id = authorize(&state, &caller, &id).await?;
    Ok(Json(state.manager.events(id).await?))
}

pub async fn post_signal<S: SessionStore>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Path(id): Path<String>,
    payload: Result<Json<PublishSignalRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SignalView>), Error> {
    let Json(request) = payload?;
    let id = authorize(&state, &caller, &id).await?;
    let view = state
        .manager
        .publish_signal(id, request.role, request.signal)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// Plain poll, or a long-poll when `waitMs` is given.
pub async fn get_signal<S: SessionStore>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Path(id): Path<String>,
    Query(query): Query<SignalQuery>,
) -> Result<Json<SignalView>, Error> {
    let id = authorize(&state, &caller, &id).await?;
    let since = parse_optional_id(query.since.as_deref())?;

    let view = match query.wait_ms.filter(|ms| *ms > 0) {
        Some(ms) => {
            let wait = std::time::Duration::from_millis(ms).min(state.env_vars.signal_wait_max);
            state
                .manager
                .wait_signal(id, query.role, since, wait)
                .await?
        }
        None => state.manager.poll_signal(id, query.role).await?,
    };
    Ok(Json(view))
}
