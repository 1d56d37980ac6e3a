//! Scripted devices for exercising the agents without hardware.
//!
//! Each fake records what the agent did with it so tests can inspect the
//! resulting handshake and teardown.
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use tokio::sync::mpsc;

use crate::{
    error::AgentError,
    media::{Camera, FaceDetector, VideoStream},
    peer::{
        IceCandidate, PeerConfig, PeerConnection, PeerEvent, PeerFactory, SdpType,
        SessionDescription, SignalingState,
    },
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ScriptedStream {
    track_id: String,
    stopped: Arc<AtomicBool>,
}

impl VideoStream for ScriptedStream {
    fn track_id(&self) -> &str {
        &self.track_id
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Camera that either always opens or always reports a denied permission.
#[derive(Clone)]
pub struct ScriptedCamera {
    denied: bool,
    opened: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
}

impl ScriptedCamera {
    pub fn working() -> Self {
        Self {
            denied: false,
            opened: Arc::default(),
        }
    }

    pub fn denied() -> Self {
        Self {
            denied: true,
            ..Self::working()
        }
    }

    pub fn open_count(&self) -> usize {
        lock(&self.opened).len()
    }

    pub fn all_stopped(&self) -> bool {
        lock(&self.opened)
            .iter()
            .all(|stopped| stopped.load(Ordering::SeqCst))
    }
}

impl Camera for ScriptedCamera {
    type Stream = ScriptedStream;

    async fn open(&mut self) -> Result<ScriptedStream, AgentError> {
        if self.denied {
            return Err(AgentError::Camera("permission denied".to_string()));
        }
        let mut opened = lock(&self.opened);
        let stopped = Arc::new(AtomicBool::new(false));
        opened.push(Arc::clone(&stopped));
        Ok(ScriptedStream {
            track_id: format!("camera-{}", opened.len()),
            stopped,
        })
    }
}

/// Reports whatever face count the test last set; one face to begin with.
#[derive(Clone)]
pub struct ScriptedDetector {
    faces: Arc<AtomicUsize>,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self {
            faces: Arc::new(AtomicUsize::new(1)),
        }
    }

    pub fn set_faces(&self, faces: usize) {
        self.faces.store(faces, Ordering::SeqCst);
    }
}

impl Default for ScriptedDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceDetector for ScriptedDetector {
    async fn count_faces<V: VideoStream>(&mut self, _stream: &V) -> Result<usize, AgentError> {
        Ok(self.faces.load(Ordering::SeqCst))
    }
}

/// What happened to one scripted peer.
#[derive(Clone, Debug, Default)]
pub struct PeerRecord {
    pub local_video: Option<String>,
    pub receive_only: bool,
    pub remote: Option<SessionDescription>,
    /// Remote candidates applied, in order
    pub candidates: Vec<IceCandidate>,
    /// Candidates offered before any remote description
    pub early_candidates: usize,
    pub closed: bool,
}

pub struct ScriptedPeer {
    label: String,
    state: SignalingState,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: mpsc::UnboundedReceiver<PeerEvent>,
    record: Arc<Mutex<PeerRecord>>,
}

impl ScriptedPeer {
    fn gather(&self) {
        let candidate = IceCandidate {
            candidate: format!("candidate:{} 1 udp 2122260223 127.0.0.1 9 typ host", self.label),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        };
        let _ = self.events_tx.send(PeerEvent::LocalCandidate(candidate));
    }

    fn describe(&self, sdp_type: SdpType) -> SessionDescription {
        SessionDescription {
            sdp_type,
            sdp: format!("v=0\r\no={} {:?}", self.label, sdp_type),
        }
    }
}

impl PeerConnection for ScriptedPeer {
    fn add_local_video(&mut self, track_id: &str) -> Result<(), AgentError> {
        lock(&self.record).local_video = Some(track_id.to_string());
        Ok(())
    }

    fn add_receive_only_video(&mut self) -> Result<(), AgentError> {
        lock(&self.record).receive_only = true;
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SessionDescription, AgentError> {
        if self.state != SignalingState::Stable {
            return Err(AgentError::Peer(format!("cannot offer in {:?}", self.state)));
        }
        self.state = SignalingState::HaveLocalOffer;
        self.gather();
        Ok(self.describe(SdpType::Offer))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, AgentError> {
        if self.state != SignalingState::HaveRemoteOffer {
            return Err(AgentError::Peer(format!("cannot answer in {:?}", self.state)));
        }
        self.state = SignalingState::Stable;
        self.gather();
        Ok(self.describe(SdpType::Answer))
    }

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), AgentError> {
        self.state = match (self.state, description.sdp_type) {
            (SignalingState::Stable, SdpType::Offer) => SignalingState::HaveRemoteOffer,
            (SignalingState::HaveLocalOffer, SdpType::Answer) => {
                if lock(&self.record).receive_only {
                    let _ = self.events_tx.send(PeerEvent::RemoteTrack {
                        track_id: "remote-video".to_string(),
                    });
                }
                SignalingState::Stable
            }
            (state, sdp_type) => {
                return Err(AgentError::Peer(format!(
                    "unexpected {sdp_type:?} in {state:?}"
                )));
            }
        };
        lock(&self.record).remote = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), AgentError> {
        let mut record = lock(&self.record);
        if record.remote.is_none() {
            record.early_candidates += 1;
            return Err(AgentError::Peer("remote description not set".to_string()));
        }
        record.candidates.push(candidate);
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.state
    }

    async fn next_event(&mut self) -> Option<PeerEvent> {
        self.events_rx.recv().await
    }

    fn close(&mut self) {
        self.state = SignalingState::Closed;
        lock(&self.record).closed = true;
    }
}

/// Hands out [`ScriptedPeer`]s and keeps their records.
#[derive(Clone)]
pub struct ScriptedPeers {
    label: String,
    records: Arc<Mutex<Vec<Arc<Mutex<PeerRecord>>>>>,
}

impl ScriptedPeers {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            records: Arc::default(),
        }
    }

    pub fn created(&self) -> usize {
        lock(&self.records).len()
    }

    /// Snapshot of the `n`th peer created.
    pub fn record(&self, n: usize) -> PeerRecord {
        let records = lock(&self.records);
        lock(&records[n]).clone()
    }
}

impl PeerFactory for ScriptedPeers {
    type Peer = ScriptedPeer;

    fn create(&mut self, _config: &PeerConfig) -> Result<ScriptedPeer, AgentError> {
        let record = Arc::new(Mutex::new(PeerRecord::default()));
        lock(&self.records).push(Arc::clone(&record));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(ScriptedPeer {
            label: self.label.clone(),
            state: SignalingState::Stable,
            events_tx,
            events_rx,
            record,
        })
    }
}
