//! Student-side proctoring agent.
//!
//! The monitor joins (or resumes) the student's session, waits until an
//! instructor activates proctoring, then samples the camera and page
//! visibility, counts violations and answers the instructor's call.
//! Everything it starts is released when [`StudentMonitor::spawn`]'s task
//! ends, whichever way it ends.
use std::time::Duration;

use proctor_utils::violation::{Strike, ViolationTracker};
use schema::{
    Answers, EventKind, SignalRole,
    view::{SessionView, SignalView, SubmissionResult},
};
use serde_json::json;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Instant, sleep, sleep_until},
};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    client::ProctorClient,
    config::{AgentConfig, ticker},
    error::AgentError,
    media::{Camera, FaceDetector, StreamGuard, VideoStream, Visibility},
    peer::{IceCandidate, PeerConnection, PeerEvent, PeerFactory, SessionDescription},
    retry::Connectivity,
    signaling::{PeerLink, SignalWait, next_peer_event},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MonitorPhase {
    #[default]
    Joining,
    /// Session exists, proctoring not yet activated
    Waiting,
    Active,
    Removed,
    Submitted,
    /// The session disappeared from the server
    Ended,
    Stopped,
}

impl MonitorPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MonitorPhase::Removed
                | MonitorPhase::Submitted
                | MonitorPhase::Ended
                | MonitorPhase::Stopped
        )
    }
}

/// Observable state of a running monitor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MonitorStatus {
    pub phase: MonitorPhase,
    pub session_id: Option<String>,
    pub strikes: u32,
    /// Assessment hidden during a violation cooldown
    pub obscured: bool,
    pub camera_on: bool,
    pub connection_lost: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MonitorExit {
    Submitted(SubmissionResult),
    Removed,
    Ended,
    Stopped,
}

impl MonitorExit {
    fn phase(&self) -> MonitorPhase {
        match self {
            MonitorExit::Submitted(_) => MonitorPhase::Submitted,
            MonitorExit::Removed => MonitorPhase::Removed,
            MonitorExit::Ended => MonitorPhase::Ended,
            MonitorExit::Stopped => MonitorPhase::Stopped,
        }
    }
}

enum Command {
    Submit(Answers, oneshot::Sender<Result<SubmissionResult, AgentError>>),
    Stop,
}

/// Devices the monitor samples while proctored.
pub struct MonitorDevices<C, D, F> {
    pub camera: C,
    pub detector: D,
    pub peers: F,
    pub visibility: mpsc::Receiver<Visibility>,
}

pub struct StudentMonitor<C, D, F> {
    client: ProctorClient,
    assessment_id: String,
    config: AgentConfig,
    devices: MonitorDevices<C, D, F>,
}

/// Controls a spawned [`StudentMonitor`].
pub struct MonitorHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<MonitorStatus>,
    task: JoinHandle<Result<MonitorExit, AgentError>>,
}

impl MonitorHandle {
    /// Submits the student's answers. A failed submission leaves the monitor running.
    pub async fn submit(&self, answers: Answers) -> Result<SubmissionResult, AgentError> {
        if self.status.borrow().phase == MonitorPhase::Removed {
            return Err(AgentError::Removed);
        }
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Submit(answers, reply))
            .await
            .map_err(|_| AgentError::Stopped)?;
        response.await.map_err(|_| AgentError::Stopped)?
    }

    pub async fn stop(&self) {
        let _ = self.commands.send(Command::Stop).await;
    }

    pub fn status(&self) -> watch::Receiver<MonitorStatus> {
        self.status.clone()
    }

    pub async fn join(self) -> Result<MonitorExit, AgentError> {
        self.task.await?
    }
}

/// Session-scoped state of one running monitor.
struct Proctoring<'a> {
    client: ProctorClient,
    session_id: String,
    connectivity: Connectivity,
    status: &'a watch::Sender<MonitorStatus>,
    tracker: ViolationTracker,
    unobscure_at: Option<Instant>,
}

impl Proctoring<'_> {
    fn observe<T>(&mut self, result: &Result<T, AgentError>) -> Option<Duration> {
        let delay = self.connectivity.observe(result);
        publish_connectivity(self.status, &self.connectivity);
        delay
    }

    async fn log_event(
        &mut self,
        kind: EventKind,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), AgentError> {
        let result = self
            .client
            .log_event(&self.session_id, kind, metadata)
            .await
            .map(|_| ());
        self.observe(&result);
        result
    }

    async fn record(&mut self, kind: EventKind, metadata: Option<serde_json::Value>) {
        if let Err(err) = self.log_event(kind.clone(), metadata).await {
            warn!(%kind, ?err, "could not log session event");
        }
    }

    /// Counts one violation. Returns true once the student is removed.
    async fn violation(&mut self, kind: EventKind) -> bool {
        let strike = self.tracker.record(&kind, std::time::Instant::now());
        match strike {
            Strike::Ignored => false,
            Strike::Warned {
                count,
                obscured_until,
            } => {
                warn!(session = %self.session_id, %kind, count, "violation recorded");
                self.unobscure_at = Some(Instant::from_std(obscured_until));
                self.status.send_modify(|s| {
                    s.strikes = count;
                    s.obscured = true;
                });
                self.record(kind, Some(json!({ "strike": count }))).await;
                false
            }
            Strike::Removed { count } => {
                self.status.send_modify(|s| {
                    s.strikes = count;
                    s.obscured = true;
                });
                self.record(kind, Some(json!({ "strike": count }))).await;
                self.kick_out(count).await;
                true
            }
        }
    }

    /// Logs the single `kicked-out` event, retrying until the connection counts as lost.
    async fn kick_out(&mut self, strikes: u32) {
        info!(session = %self.session_id, strikes, "removing student from assessment");
        loop {
            let result = self
                .log_event(EventKind::KickedOut, Some(json!({ "strikes": strikes })))
                .await;
            match result {
                Ok(()) => return,
                Err(err) if err.is_transient() && !self.connectivity.is_lost() => {
                    if let Some(delay) = self.connectivity_delay() {
                        sleep(delay).await;
                    }
                }
                Err(err) => {
                    error!(session = %self.session_id, ?err, "could not log removal");
                    return;
                }
            }
        }
    }

    fn connectivity_delay(&self) -> Option<Duration> {
        self.connectivity
            .retry_at()
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Answers `view`'s offer unless it was already answered.
    async fn answer_offer<P: PeerConnection>(
        &mut self,
        link: &mut PeerLink<P>,
        view: SignalView,
    ) -> Result<(), AgentError> {
        let Some(offer) = link.fresh::<SessionDescription>(view) else {
            return Ok(());
        };
        debug!(session = %self.session_id, "answering instructor offer");
        let answer = link.answer(offer).await?;
        let result = self
            .client
            .publish_signal(
                &self.session_id,
                SignalRole::Answer,
                serde_json::to_value(&answer)?,
            )
            .await;
        self.observe(&result);
        result.map(|_| ())
    }

    /// Starts the next long-poll of `wait`'s mailbox past what `link` applied.
    fn await_signal<P: PeerConnection>(
        &self,
        wait: &mut SignalWait,
        link: &PeerLink<P>,
        role: SignalRole,
        hold: Duration,
    ) {
        wait.start(
            &self.client,
            &self.session_id,
            link.cursor().last_applied(role),
            hold,
        );
    }

    async fn publish_candidate(&mut self, candidate: IceCandidate) -> Result<(), AgentError> {
        let result = self
            .client
            .publish_signal(
                &self.session_id,
                SignalRole::StudentIce,
                serde_json::to_value(&candidate)?,
            )
            .await;
        self.observe(&result);
        result.map(|_| ())
    }
}

fn publish_connectivity(status: &watch::Sender<MonitorStatus>, connectivity: &Connectivity) {
    let lost = connectivity.is_lost();
    status.send_if_modified(|s| {
        let changed = s.connection_lost != lost;
        s.connection_lost = lost;
        changed
    });
}

/// Waits out `delay` while answering commands. Returns false when told to stop.
async fn idle(commands: &mut mpsc::Receiver<Command>, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        tokio::select! {
            _ = sleep_until(deadline) => return true,
            command = commands.recv() => match command {
                Some(Command::Submit(_, reply)) => {
                    let _ = reply.send(Err(AgentError::NotActive));
                }
                Some(Command::Stop) | None => return false,
            },
        }
    }
}

/// Resumes the student's unfinished session of the assessment, or starts one.
async fn find_or_create(
    client: &ProctorClient,
    assessment_id: &str,
) -> Result<SessionView, AgentError> {
    let sessions = client.list_sessions(assessment_id).await?;
    let resumable = sessions.into_iter().find(|s| {
        s.user_id == client.user_id() && s.ended_at.is_none() && !s.status.is_terminal()
    });
    match resumable {
        Some(session) => {
            info!(session = %session.id, "resuming exam session");
            Ok(session)
        }
        None => client.create_session(assessment_id).await,
    }
}

impl<C, D, F> StudentMonitor<C, D, F>
where
    C: Camera,
    D: FaceDetector,
    F: PeerFactory,
{
    pub fn new(
        client: ProctorClient,
        assessment_id: impl Into<String>,
        config: AgentConfig,
        devices: MonitorDevices<C, D, F>,
    ) -> Self {
        Self {
            client,
            assessment_id: assessment_id.into(),
            config,
            devices,
        }
    }

    pub fn spawn(self) -> MonitorHandle {
        let (commands, command_rx) = mpsc::channel(8);
        let (status_tx, status) = watch::channel(MonitorStatus::default());
        let task = tokio::spawn(self.run(command_rx, status_tx));
        MonitorHandle {
            commands,
            status,
            task,
        }
    }

    #[instrument(skip_all, fields(assessment = %self.assessment_id))]
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        status: watch::Sender<MonitorStatus>,
    ) -> Result<MonitorExit, AgentError> {
        self.config.validate()?;
        let result = self.monitor(&mut commands, &status).await;
        let phase = match &result {
            Ok(exit) => exit.phase(),
            Err(_) => MonitorPhase::Stopped,
        };
        status.send_modify(|s| {
            s.phase = phase;
            s.camera_on = false;
        });
        info!(?phase, "student monitor finished");
        result
    }

    async fn monitor(
        &mut self,
        commands: &mut mpsc::Receiver<Command>,
        status: &watch::Sender<MonitorStatus>,
    ) -> Result<MonitorExit, AgentError> {
        let mut connectivity = Connectivity::new(self.config.backoff);

        let session = loop {
            let result = find_or_create(&self.client, &self.assessment_id).await;
            let delay = connectivity.observe(&result);
            publish_connectivity(status, &connectivity);
            match (result, delay) {
                (Ok(session), _) => break session,
                (Err(err), Some(delay)) => {
                    warn!(?err, ?delay, "could not join session, retrying");
                    if !idle(commands, delay).await {
                        return Ok(MonitorExit::Stopped);
                    }
                }
                (Err(err), None) => return Err(err),
            }
        };

        let session_id = session.id.clone();
        status.send_modify(|s| {
            s.session_id = Some(session_id.clone());
            s.phase = MonitorPhase::Waiting;
        });

        let mut proctoring = Proctoring {
            client: self.client.clone(),
            session_id,
            connectivity,
            status,
            tracker: ViolationTracker::new(self.config.violations),
            unobscure_at: None,
        };

        if session.requires_proctoring && !session.proctoring_active {
            let mut poll = ticker(self.config.status_poll_interval);
            loop {
                tokio::select! {
                    _ = poll.tick() => {
                        if !proctoring.connectivity.is_ready() {
                            continue;
                        }
                        let result = proctoring.client.get_session(&proctoring.session_id).await;
                        proctoring.observe(&result);
                        match result {
                            Ok(view) if view.proctoring_active => break,
                            Ok(_) => {}
                            Err(err) if err.is_not_found() => return Ok(MonitorExit::Ended),
                            Err(err) => warn!(?err, "status poll failed"),
                        }
                    }
                    command = commands.recv() => match command {
                        Some(Command::Submit(_, reply)) => {
                            let _ = reply.send(Err(AgentError::NotActive));
                        }
                        Some(Command::Stop) | None => return Ok(MonitorExit::Stopped),
                    },
                }
            }
        }

        info!(session = %proctoring.session_id, "assessment started");
        status.send_modify(|s| s.phase = MonitorPhase::Active);
        self.proctor(proctoring, session.requires_proctoring, commands)
            .await
    }

    async fn proctor(
        &mut self,
        mut proctoring: Proctoring<'_>,
        proctored: bool,
        commands: &mut mpsc::Receiver<Command>,
    ) -> Result<MonitorExit, AgentError> {
        let mut stream: Option<StreamGuard<C::Stream>> = None;
        let mut link: Option<PeerLink<F::Peer>> = None;

        if proctored {
            match proctoring.client.events(&proctoring.session_id).await {
                Ok(events) => {
                    proctoring.tracker = ViolationTracker::seeded(
                        self.config.violations,
                        events.iter().map(|e| &e.kind),
                    );
                }
                Err(err) => warn!(?err, "could not load violation history"),
            }
            let seeded = proctoring.tracker.count();
            proctoring.status.send_modify(|s| s.strikes = seeded);
            if proctoring.tracker.is_removed() {
                info!(session = %proctoring.session_id, "student was already removed");
                return Ok(MonitorExit::Removed);
            }
            if let Some(Strike::Removed { count }) = proctoring.tracker.escalate_if_due() {
                proctoring.kick_out(count).await;
                return Ok(MonitorExit::Removed);
            }

            match self.devices.camera.open().await {
                Ok(opened) => {
                    let track_id = opened.track_id().to_string();
                    stream = Some(StreamGuard::new(opened));
                    proctoring.status.send_modify(|s| s.camera_on = true);
                    proctoring
                        .record(EventKind::VideoStreamStarted, Some(json!({ "track": track_id })))
                        .await;
                    match self.connect(&track_id) {
                        Ok(peer) => link = Some(PeerLink::new(peer)),
                        Err(err) => warn!(?err, "could not create peer connection"),
                    }
                }
                Err(err) => {
                    warn!(?err, "camera unavailable, continuing without video");
                    proctoring
                        .record(
                            EventKind::WebcamAccessFailed,
                            Some(json!({ "error": err.to_string() })),
                        )
                        .await;
                }
            }
        }

        let mut face_check = ticker(self.config.face_check_interval);
        let mut offer_poll = ticker(self.config.offer_poll_interval);
        let mut ice_poll = ticker(self.config.ice_poll_interval);
        let mut status_poll = ticker(self.config.status_poll_interval);
        let mut offer_wait = SignalWait::new(SignalRole::Offer);
        let mut ice_wait = SignalWait::new(SignalRole::InstructorIce);
        let signal_wait = self.config.signal_wait;
        let mut visibility_open = proctored;
        let mut peer_events_open = link.is_some();

        loop {
            let unobscure_at = proctoring.unobscure_at;
            tokio::select! {
                _ = face_check.tick(), if stream.is_some() => {
                    let Some(stream) = stream.as_ref() else { continue };
                    match self.devices.detector.count_faces(stream.get()).await {
                        Ok(0) => {
                            if proctoring.violation(EventKind::FaceLost).await {
                                return Ok(MonitorExit::Removed);
                            }
                        }
                        Ok(_) => {}
                        Err(err) => debug!(?err, "face detection failed"),
                    }
                }
                change = self.devices.visibility.recv(), if visibility_open => match change {
                    Some(Visibility::Hidden) => {
                        if proctoring.violation(EventKind::TabSwitch).await {
                            return Ok(MonitorExit::Removed);
                        }
                    }
                    Some(Visibility::Visible) => {}
                    None => visibility_open = false,
                },
                _ = sleep_until(unobscure_at.unwrap_or_else(Instant::now)), if unobscure_at.is_some() => {
                    proctoring.unobscure_at = None;
                    proctoring.status.send_modify(|s| s.obscured = false);
                }
                _ = offer_poll.tick(), if link.is_some() && offer_wait.is_idle() => {
                    if !proctoring.connectivity.is_ready() {
                        continue;
                    }
                    if let Some(link) = link.as_ref() {
                        proctoring.await_signal(&mut offer_wait, link, SignalRole::Offer, signal_wait);
                    }
                }
                result = offer_wait.finished() => {
                    proctoring.observe(&result);
                    let Some(link) = link.as_mut() else { continue };
                    let view = match result {
                        Ok(view) => view,
                        Err(err) => {
                            warn!(?err, "offer poll failed");
                            continue;
                        }
                    };
                    if let Err(err) = proctoring.answer_offer(link, view).await {
                        warn!(?err, "could not answer offer");
                    }
                    if !signal_wait.is_zero() && proctoring.connectivity.is_ready() {
                        proctoring.await_signal(&mut offer_wait, link, SignalRole::Offer, signal_wait);
                    }
                }
                _ = ice_poll.tick(), if link.is_some() && ice_wait.is_idle() => {
                    if !proctoring.connectivity.is_ready() {
                        continue;
                    }
                    if let Some(link) = link.as_ref() {
                        proctoring.await_signal(&mut ice_wait, link, SignalRole::InstructorIce, signal_wait);
                    }
                }
                result = ice_wait.finished() => {
                    proctoring.observe(&result);
                    let Some(link) = link.as_mut() else { continue };
                    let view = match result {
                        Ok(view) => view,
                        Err(err) => {
                            warn!(?err, "instructor candidate poll failed");
                            continue;
                        }
                    };
                    if let Some(candidate) = link.fresh::<IceCandidate>(view) {
                        if let Err(err) = link.add_remote_candidate(candidate).await {
                            warn!(?err, "could not apply instructor candidate");
                        }
                    }
                    if !signal_wait.is_zero() && proctoring.connectivity.is_ready() {
                        proctoring.await_signal(&mut ice_wait, link, SignalRole::InstructorIce, signal_wait);
                    }
                }
                event = next_peer_event(&mut link), if peer_events_open => match event {
                    Some(PeerEvent::LocalCandidate(candidate)) => {
                        if let Err(err) = proctoring.publish_candidate(candidate).await {
                            warn!(?err, "could not publish candidate");
                        }
                    }
                    Some(PeerEvent::ConnectionState(state)) => {
                        debug!(?state, "peer connection state changed");
                    }
                    Some(PeerEvent::RemoteTrack { .. }) => {}
                    None => peer_events_open = false,
                },
                _ = status_poll.tick() => {
                    if !proctoring.connectivity.is_ready() {
                        continue;
                    }
                    let result = proctoring.client.get_session(&proctoring.session_id).await;
                    proctoring.observe(&result);
                    match result {
                        Err(err) if err.is_not_found() => {
                            info!(session = %proctoring.session_id, "session ended elsewhere");
                            return Ok(MonitorExit::Ended);
                        }
                        Err(err) => debug!(?err, "status poll failed"),
                        Ok(_) => {}
                    }
                }
                command = commands.recv() => match command {
                    Some(Command::Submit(answers, reply)) => {
                        let result = proctoring.client.submit(&proctoring.session_id, &answers).await;
                        proctoring.observe(&result);
                        match result {
                            Ok(submitted) => {
                                info!(session = %proctoring.session_id, score = submitted.score, "answers submitted");
                                let _ = reply.send(Ok(submitted.clone()));
                                return Ok(MonitorExit::Submitted(submitted));
                            }
                            Err(err) => {
                                warn!(?err, "submission failed");
                                let _ = reply.send(Err(err));
                            }
                        }
                    }
                    Some(Command::Stop) | None => return Ok(MonitorExit::Stopped),
                },
            }
        }
    }

    fn connect(&mut self, track_id: &str) -> Result<F::Peer, AgentError> {
        let mut peer = self.devices.peers.create(&self.config.peer)?;
        peer.add_local_video(track_id)?;
        Ok(peer)
    }
}
