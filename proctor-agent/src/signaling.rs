//! Handshake state shared by both agents.
use std::{collections::HashMap, time::Duration};

use futures_util::future::BoxFuture;
use schema::{SignalRole, view::SignalView};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::{
    client::ProctorClient,
    error::AgentError,
    peer::{IceCandidate, PeerConnection, PeerEvent, SessionDescription, SignalingState},
};

/// Remembers the last mailbox entry applied per role, so a payload returned
/// by repeated polls is applied once.
#[derive(Debug, Default)]
pub struct SignalCursor {
    applied: HashMap<SignalRole, String>,
}

impl SignalCursor {
    /// Payload of `view` if it was not seen before.
    pub fn take_fresh(&mut self, view: SignalView) -> Option<serde_json::Value> {
        let (Some(signal), Some(event_id)) = (view.signal, view.event_id) else {
            return None;
        };
        if self.applied.get(&view.role) == Some(&event_id) {
            return None;
        }
        self.applied.insert(view.role, event_id);
        Some(signal)
    }

    pub fn mark_seen(&mut self, view: &SignalView) {
        if let Some(event_id) = &view.event_id {
            self.applied.insert(view.role, event_id.clone());
        }
    }

    pub fn last_applied(&self, role: SignalRole) -> Option<&str> {
        self.applied.get(&role).map(String::as_str)
    }
}

/// Peer connection plus the candidates that arrived before its remote description.
///
/// Closes the connection when dropped.
pub struct PeerLink<P: PeerConnection> {
    peer: P,
    cursor: SignalCursor,
    pending: Vec<IceCandidate>,
    remote_set: bool,
}

impl<P: PeerConnection> PeerLink<P> {
    pub fn new(peer: P) -> Self {
        Self {
            peer,
            cursor: SignalCursor::default(),
            pending: vec![],
            remote_set: false,
        }
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.peer.signaling_state()
    }

    pub fn queued_candidates(&self) -> usize {
        self.pending.len()
    }

    pub fn cursor(&self) -> &SignalCursor {
        &self.cursor
    }

    pub fn cursor_mut(&mut self) -> &mut SignalCursor {
        &mut self.cursor
    }

    /// Decodes a payload not applied before. Malformed payloads are skipped.
    pub fn fresh<T: DeserializeOwned>(&mut self, view: SignalView) -> Option<T> {
        let role = view.role;
        let payload = self.cursor.take_fresh(view)?;
        match serde_json::from_value(payload) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(%role, ?err, "ignoring malformed signal");
                None
            }
        }
    }

    pub async fn offer(&mut self) -> Result<SessionDescription, AgentError> {
        self.peer.create_offer().await
    }

    /// Applies a remote offer and returns the answer to publish.
    pub async fn answer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, AgentError> {
        self.apply_remote(offer).await?;
        self.peer.create_answer().await
    }

    /// Sets the remote description, then applies every queued candidate.
    pub async fn apply_remote(&mut self, description: SessionDescription) -> Result<(), AgentError> {
        self.peer.set_remote_description(description).await?;
        self.remote_set = true;
        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            debug!(count = pending.len(), "applying queued ice candidates");
        }
        for candidate in pending {
            self.peer.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    /// Applies `candidate` now, or queues it until a remote description is set.
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<(), AgentError> {
        if !self.remote_set {
            self.pending.push(candidate);
            return Ok(());
        }
        self.peer.add_ice_candidate(candidate).await
    }

    pub async fn next_event(&mut self) -> Option<PeerEvent> {
        self.peer.next_event().await
    }
}

impl<P: PeerConnection> Drop for PeerLink<P> {
    fn drop(&mut self) {
        debug!("closing peer connection");
        self.peer.close();
    }
}

/// At most one outstanding long-poll of a role's mailbox.
///
/// The request survives `select!` iterations: dropping the future returned by
/// [`SignalWait::finished`] leaves it in flight.
pub struct SignalWait {
    role: SignalRole,
    in_flight: Option<BoxFuture<'static, Result<SignalView, AgentError>>>,
}

impl SignalWait {
    pub fn new(role: SignalRole) -> Self {
        Self {
            role,
            in_flight: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }

    /// Asks for a payload newer than `since`. A zero `wait` reads the mailbox once.
    pub fn start(
        &mut self,
        client: &ProctorClient,
        session_id: &str,
        since: Option<&str>,
        wait: Duration,
    ) {
        let client = client.clone();
        let session_id = session_id.to_string();
        let since = since.map(str::to_string);
        let wait = (!wait.is_zero()).then_some(wait);
        let role = self.role;
        self.in_flight = Some(Box::pin(async move {
            client
                .poll_signal(&session_id, role, since.as_deref(), wait)
                .await
        }));
    }

    pub fn cancel(&mut self) {
        self.in_flight = None;
    }

    /// Result of the outstanding request, pending forever while idle.
    pub async fn finished(&mut self) -> Result<SignalView, AgentError> {
        let Some(request) = self.in_flight.as_mut() else {
            return std::future::pending().await;
        };
        let result = request.await;
        self.in_flight = None;
        result
    }
}

/// Next event of the link, pending forever when there is none.
pub async fn next_peer_event<P: PeerConnection>(link: &mut Option<PeerLink<P>>) -> Option<PeerEvent> {
    match link {
        Some(link) => link.next_event().await,
        None => std::future::pending().await,
    }
}
