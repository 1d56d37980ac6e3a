//! Proctoring agents
//!
//! ## Current API
//!
//! - Student monitor: joins a session, detects violations, answers the instructor's call
//! - Instructor viewer: activates proctoring, calls the student, ends sessions
//! - HTTP client for the session service
//!
//! Camera, face detection and WebRTC are reached through the traits in
//! [`media`] and [`peer`]; [`testing`] has scripted implementations.
pub mod client;
pub mod config;
pub mod error;
pub mod media;
pub mod monitor;
pub mod peer;
pub mod retry;
pub mod signaling;
pub mod testing;
pub mod viewer;

pub use client::ProctorClient;
pub use config::AgentConfig;
pub use error::AgentError;
pub use monitor::{MonitorDevices, MonitorExit, MonitorHandle, MonitorPhase, StudentMonitor};
pub use viewer::{InstructorViewer, ViewerExit, ViewerHandle, ViewerPhase};
