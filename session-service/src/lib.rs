//! Exam session lifecycle and signaling relay service.
//!
//! ## Routes
//!
//! - `GET /status/ping`
//! - `POST|GET /sessions`
//! - `GET|PATCH|DELETE /sessions/{id}`
//! - `POST /sessions/{id}/submissions`
//! - `GET|POST /sessions/{id}/events`
//! - `GET|POST /sessions/{id}/signals`
//! - `GET /sessions/{id}/ws`
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    LatencyUnit,
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

pub mod auth;
pub mod config;
pub mod error;
pub mod hub;
pub mod manager;
pub mod relay;
pub mod routes;
pub mod store;
pub mod sweep;
pub mod ws;

use config::AppState;
use store::SessionStore;

pub fn app<S: SessionStore>(state: AppState<S>) -> Router {
    let request_timeout_in_ms = state.env_vars.request_timeout_in_ms;
    let request_body_size_limit = state.env_vars.request_body_size_limit;

    Router::new()
        .route("/status/ping", get(routes::get_status_ping))
        .route(
            "/sessions",
            post(routes::post_session::<S>).get(routes::get_sessions::<S>),
        )
        .route(
            "/sessions/{id}",
            get(routes::get_session::<S>)
                .patch(routes::patch_session::<S>)
                .delete(routes::delete_session::<S>),
        )
        .route(
            "/sessions/{id}/submissions",
            post(routes::post_submission::<S>),
        )
        .route(
            "/sessions/{id}/events",
            get(routes::get_events::<S>).post(routes::post_event::<S>),
        )
        .route(
            "/sessions/{id}/signals",
            get(routes::get_signal::<S>).post(routes::post_signal::<S>),
        )
        .route("/sessions/{id}/ws", get(ws::get_session_ws::<S>))
        .layer(TimeoutLayer::new(Duration::from_millis(
            request_timeout_in_ms,
        )))
        .layer(RequestBodyLimitLayer::new(request_body_size_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Micros),
                ),
        )
        .with_state(state)
}
