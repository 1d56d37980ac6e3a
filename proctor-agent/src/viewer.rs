//! Instructor-side proctoring agent: watches one student's session.
use schema::{
    SignalRole,
    view::{SessionView, SignalView},
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, info, instrument, warn};

use crate::{
    client::ProctorClient,
    config::{AgentConfig, ticker},
    error::AgentError,
    peer::{
        IceCandidate, PeerConnection, PeerEvent, PeerFactory, SessionDescription, SignalingState,
    },
    retry::Connectivity,
    signaling::{PeerLink, SignalWait, next_peer_event},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ViewerPhase {
    #[default]
    Loading,
    Watching,
    /// Session deleted elsewhere; the viewer leaves after a grace delay
    SessionEnded,
    ConnectionLost,
    Closed,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ViewerStatus {
    pub phase: ViewerPhase,
    /// Latest session view, events most recent first
    pub session: Option<SessionView>,
    pub remote_video: bool,
    pub connection_lost: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewerExit {
    /// The instructor ended the session
    NavigateAway,
    SessionEndedElsewhere,
    ConnectionLost,
    Closed,
}

type Reply = oneshot::Sender<Result<(), AgentError>>;

enum Command {
    Stop(Reply),
    Start(Reply),
    EndSession(Reply),
    Close,
}

pub struct InstructorViewer<F> {
    client: ProctorClient,
    session_id: String,
    config: AgentConfig,
    peers: F,
}

/// Controls a spawned [`InstructorViewer`].
pub struct ViewerHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ViewerStatus>,
    task: JoinHandle<Result<ViewerExit, AgentError>>,
}

impl ViewerHandle {
    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<(), AgentError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| AgentError::Stopped)?;
        response.await.map_err(|_| AgentError::Stopped)?
    }

    /// Deactivates proctoring. The viewer will not reactivate it on its own.
    pub async fn stop_proctoring(&self) -> Result<(), AgentError> {
        self.request(Command::Stop).await
    }

    pub async fn start_proctoring(&self) -> Result<(), AgentError> {
        self.request(Command::Start).await
    }

    /// Deletes the session; the viewer then exits with [`ViewerExit::NavigateAway`].
    pub async fn end_session(&self) -> Result<(), AgentError> {
        self.request(Command::EndSession).await
    }

    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close).await;
    }

    pub fn status(&self) -> watch::Receiver<ViewerStatus> {
        self.status.clone()
    }

    pub async fn join(self) -> Result<ViewerExit, AgentError> {
        self.task.await?
    }
}

impl<F: PeerFactory> InstructorViewer<F> {
    pub fn new(
        client: ProctorClient,
        session_id: impl Into<String>,
        config: AgentConfig,
        peers: F,
    ) -> Self {
        Self {
            client,
            session_id: session_id.into(),
            config,
            peers,
        }
    }

    pub fn spawn(self) -> ViewerHandle {
        let (commands, command_rx) = mpsc::channel(8);
        let (status_tx, status) = watch::channel(ViewerStatus::default());
        let task = tokio::spawn(self.run(command_rx, status_tx));
        ViewerHandle {
            commands,
            status,
            task,
        }
    }

    #[instrument(skip_all, fields(session = %self.session_id))]
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        status: watch::Sender<ViewerStatus>,
    ) -> Result<ViewerExit, AgentError> {
        self.config.validate()?;
        let exit = self.follow(&mut commands, &status).await;
        status.send_modify(|s| {
            s.phase = match exit {
                Ok(ViewerExit::SessionEndedElsewhere) => ViewerPhase::SessionEnded,
                Ok(ViewerExit::ConnectionLost) => ViewerPhase::ConnectionLost,
                _ => ViewerPhase::Closed,
            };
            s.remote_video = false;
        });
        info!(?exit, "viewer finished");
        exit
    }

    async fn follow(
        &mut self,
        commands: &mut mpsc::Receiver<Command>,
        status: &watch::Sender<ViewerStatus>,
    ) -> Result<ViewerExit, AgentError> {
        let mut connectivity = Connectivity::new(self.config.backoff);
        let mut link: Option<PeerLink<F::Peer>> = None;
        let mut peer_events_open = false;
        let mut auto_activated = false;
        let mut stopped_by_instructor = false;

        let mut session_poll = ticker(self.config.status_poll_interval);
        let mut answer_poll = ticker(self.config.answer_poll_interval);
        let mut ice_poll = ticker(self.config.ice_poll_interval);
        let mut answer_wait = SignalWait::new(SignalRole::Answer);
        let mut ice_wait = SignalWait::new(SignalRole::StudentIce);
        let signal_wait = self.config.signal_wait;

        loop {
            let awaiting_answer = link
                .as_ref()
                .is_some_and(|l| l.signaling_state() == SignalingState::HaveLocalOffer);
            tokio::select! {
                _ = session_poll.tick() => {
                    if !connectivity.is_ready() {
                        continue;
                    }
                    let result = self.client.get_session(&self.session_id).await;
                    connectivity.observe(&result);
                    publish_connectivity(status, &connectivity);
                    let mut view = match result {
                        Ok(view) => view,
                        Err(err) if err.is_not_found() => return Ok(self.session_ended(status).await),
                        Err(err) => {
                            warn!(?err, "session poll failed");
                            if connectivity.is_lost() {
                                return Ok(ViewerExit::ConnectionLost);
                            }
                            continue;
                        }
                    };

                    if !view.proctoring_active && !auto_activated && !stopped_by_instructor {
                        info!("activating proctoring");
                        let result = self.client.set_active(&self.session_id, true, None).await;
                        connectivity.observe(&result);
                        publish_connectivity(status, &connectivity);
                        match result {
                            Ok(Some(updated)) => {
                                auto_activated = true;
                                view = SessionView { events: view.events, ..updated };
                            }
                            Ok(None) => auto_activated = true,
                            // Retried on the next poll
                            Err(err) => warn!(?err, "could not activate proctoring"),
                        }
                    }

                    let active = view.proctoring_active;
                    status.send_modify(|s| {
                        s.phase = ViewerPhase::Watching;
                        s.session = Some(view);
                    });

                    if !active && link.is_some() {
                        debug!("proctoring inactive, hanging up");
                        hang_up(&mut link, &mut answer_wait, &mut ice_wait, status);
                        peer_events_open = false;
                    }
                    if active && link.is_none() && connectivity.is_ready() {
                        let result = self.call().await;
                        connectivity.observe(&result);
                        match result {
                            Ok(started) => {
                                link = Some(started);
                                peer_events_open = true;
                            }
                            Err(err) => warn!(?err, "could not start call"),
                        }
                    }
                }
                _ = answer_poll.tick(), if awaiting_answer && answer_wait.is_idle() => {
                    if !connectivity.is_ready() {
                        continue;
                    }
                    if let Some(link) = link.as_ref() {
                        self.await_signal(&mut answer_wait, link, SignalRole::Answer);
                    }
                }
                result = answer_wait.finished() => {
                    connectivity.observe(&result);
                    let Some(link) = link.as_mut() else { continue };
                    match result {
                        Ok(view) => {
                            if let Err(err) = self.apply_answer(link, view).await {
                                warn!(?err, "could not apply answer");
                            }
                        }
                        Err(err) => warn!(?err, "answer poll failed"),
                    }
                }
                _ = ice_poll.tick(), if link.is_some() && ice_wait.is_idle() => {
                    if !connectivity.is_ready() {
                        continue;
                    }
                    if let Some(link) = link.as_ref() {
                        self.await_signal(&mut ice_wait, link, SignalRole::StudentIce);
                    }
                }
                result = ice_wait.finished() => {
                    connectivity.observe(&result);
                    let Some(link) = link.as_mut() else { continue };
                    let view = match result {
                        Ok(view) => view,
                        Err(err) => {
                            warn!(?err, "student candidate poll failed");
                            continue;
                        }
                    };
                    if let Some(candidate) = link.fresh::<IceCandidate>(view) {
                        if let Err(err) = link.add_remote_candidate(candidate).await {
                            warn!(?err, "could not apply student candidate");
                        }
                    }
                    if !signal_wait.is_zero() && connectivity.is_ready() {
                        self.await_signal(&mut ice_wait, link, SignalRole::StudentIce);
                    }
                }
                event = next_peer_event(&mut link), if peer_events_open => match event {
                    Some(PeerEvent::LocalCandidate(candidate)) => {
                        let result = self.publish_candidate(candidate).await;
                        connectivity.observe(&result);
                        if let Err(err) = result {
                            warn!(?err, "could not publish candidate");
                        }
                    }
                    Some(PeerEvent::RemoteTrack { track_id }) => {
                        info!(track = %track_id, "receiving student video");
                        status.send_modify(|s| s.remote_video = true);
                    }
                    Some(PeerEvent::ConnectionState(state)) => {
                        debug!(?state, "peer connection state changed");
                    }
                    None => peer_events_open = false,
                },
                command = commands.recv() => match command {
                    Some(Command::Stop(reply)) => {
                        let result = self.set_active(false, status).await;
                        if result.is_ok() {
                            stopped_by_instructor = true;
                            hang_up(&mut link, &mut answer_wait, &mut ice_wait, status);
                            peer_events_open = false;
                        }
                        let _ = reply.send(result);
                    }
                    Some(Command::Start(reply)) => {
                        stopped_by_instructor = false;
                        let result = self.set_active(true, status).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::EndSession(reply)) => {
                        match self.client.delete_session(&self.session_id).await {
                            Ok(()) => {
                                info!("session ended by instructor");
                                let _ = reply.send(Ok(()));
                                return Ok(ViewerExit::NavigateAway);
                            }
                            Err(err) if err.is_not_found() => {
                                let _ = reply.send(Ok(()));
                                return Ok(ViewerExit::NavigateAway);
                            }
                            Err(err) => {
                                let _ = reply.send(Err(err));
                            }
                        }
                    }
                    Some(Command::Close) | None => return Ok(ViewerExit::Closed),
                },
            }
        }
    }

    async fn session_ended(&self, status: &watch::Sender<ViewerStatus>) -> ViewerExit {
        info!("session no longer exists");
        status.send_modify(|s| {
            s.phase = ViewerPhase::SessionEnded;
            s.remote_video = false;
        });
        sleep(self.config.end_grace_delay).await;
        ViewerExit::SessionEndedElsewhere
    }

    async fn set_active(
        &self,
        active: bool,
        status: &watch::Sender<ViewerStatus>,
    ) -> Result<(), AgentError> {
        let updated = self
            .client
            .set_active(&self.session_id, active, None)
            .await?;
        if let Some(updated) = updated {
            status.send_modify(|s| {
                let events = s.session.take().map(|v| v.events).unwrap_or_default();
                s.session = Some(SessionView { events, ..updated });
            });
        }
        Ok(())
    }

    /// Opens a receive-only peer and publishes its offer.
    async fn call(&mut self) -> Result<PeerLink<F::Peer>, AgentError> {
        let mut peer = self.peers.create(&self.config.peer)?;
        peer.add_receive_only_video()?;
        let mut link = PeerLink::new(peer);

        // Whatever the student sent for an earlier call does not belong to this one
        for role in [SignalRole::Answer, SignalRole::StudentIce] {
            let previous = self
                .client
                .poll_signal(&self.session_id, role, None, None)
                .await?;
            link.cursor_mut().mark_seen(&previous);
        }

        let offer = link.offer().await?;
        self.client
            .publish_signal(&self.session_id, SignalRole::Offer, serde_json::to_value(&offer)?)
            .await?;
        info!("published offer");
        Ok(link)
    }

    fn await_signal(&self, wait: &mut SignalWait, link: &PeerLink<F::Peer>, role: SignalRole) {
        wait.start(
            &self.client,
            &self.session_id,
            link.cursor().last_applied(role),
            self.config.signal_wait,
        );
    }

    async fn apply_answer(
        &self,
        link: &mut PeerLink<F::Peer>,
        view: SignalView,
    ) -> Result<(), AgentError> {
        if let Some(answer) = link.fresh::<SessionDescription>(view) {
            debug!("applying student answer");
            link.apply_remote(answer).await?;
        }
        Ok(())
    }

    async fn publish_candidate(&self, candidate: IceCandidate) -> Result<(), AgentError> {
        self.client
            .publish_signal(
                &self.session_id,
                SignalRole::InstructorIce,
                serde_json::to_value(&candidate)?,
            )
            .await?;
        Ok(())
    }
}

/// Closes the current call and abandons its pending signal polls.
fn hang_up<P: PeerConnection>(
    link: &mut Option<PeerLink<P>>,
    answer_wait: &mut SignalWait,
    ice_wait: &mut SignalWait,
    status: &watch::Sender<ViewerStatus>,
) {
    *link = None;
    answer_wait.cancel();
    ice_wait.cancel();
    status.send_modify(|s| s.remote_video = false);
}

fn publish_connectivity(status: &watch::Sender<ViewerStatus>, connectivity: &Connectivity) {
    let lost = connectivity.is_lost();
    status.send_if_modified(|s| {
        let changed = s.connection_lost != lost;
        s.connection_lost = lost;
        changed
    });
}

