//! WebRTC peer connection boundary.
//!
//! The agents drive the offer/answer handshake through [`PeerConnection`];
//! media transport itself belongs to the implementation.
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerEvent {
    /// Gathered locally, to be relayed to the other side
    LocalCandidate(IceCandidate),
    RemoteTrack { track_id: String },
    ConnectionState(ConnectionState),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub ice_servers: Vec<IceServer>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
        }
    }
}

pub trait PeerConnection: Send + 'static {
    /// Sends the local camera track.
    fn add_local_video(&mut self, track_id: &str) -> Result<(), AgentError>;

    /// Adds a receive-only video transceiver.
    fn add_receive_only_video(&mut self) -> Result<(), AgentError>;

    /// Creates an offer and sets it as the local description.
    fn create_offer(&mut self)
    -> impl Future<Output = Result<SessionDescription, AgentError>> + Send;

    /// Creates an answer to the remote offer and sets it as the local description.
    fn create_answer(
        &mut self,
    ) -> impl Future<Output = Result<SessionDescription, AgentError>> + Send;

    fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> impl Future<Output = Result<(), AgentError>> + Send;

    fn add_ice_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> impl Future<Output = Result<(), AgentError>> + Send;

    fn signaling_state(&self) -> SignalingState;

    /// Next event raised by the connection; `None` once it is closed.
    fn next_event(&mut self) -> impl Future<Output = Option<PeerEvent>> + Send;

    fn close(&mut self);
}

pub trait PeerFactory: Send + Sync + 'static {
    type Peer: PeerConnection;

    fn create(&mut self, config: &PeerConfig) -> Result<Self::Peer, AgentError>;
}
