//! Session lifecycle: `Idle → Searching → Negotiating → Connected → Ending → Idle`.
//!
//! The machine is driven by one task. Each inbound event, transport callback
//! or user command is handled to completion before the next one is looked at,
//! so no locking is needed around the session.

use crate::config::Timeouts;
use crate::error::{Error, Result};
use crate::logger::analyze_candidates;
use crate::moderation::ModerationController;
use crate::peer::transport::{PeerTransportManager, TransportFactory};
use crate::peer::types::{
    IceCandidate, LocalTrack, RemoteTrack, SessionDescription, TransportEvent, TransportEvents,
    TransportState,
};
use crate::session::{ConsentRecord, Role, Session, SessionId, SessionState};
use crate::signaling::protocol::{ClientEvent, EventKind, ServerEvent, SignalPayload};
use crate::signaling::{SignalingChannel, Subscription};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    Hangup,
    PartnerLeft,
    Reported,
    Blocked,
    ChannelLost,
    TransportFailed,
    NegotiationTimeout,
    Error(String),
}

/// Notifications for whoever renders the chat.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Searching,
    PartnerFound { partner_id: String, role: Role },
    RemoteTrack(RemoteTrack),
    Connected,
    Ended { reason: EndReason },
    CouldNotStart(String),
    CommandRejected(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    StartSearch(ConsentRecord),
    /// End the current session and search again.
    Next,
    End,
    Report(String),
    Block(String),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineKind {
    Negotiation,
    Recovery,
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    kind: DeadlineKind,
}

pub struct SessionMachine {
    channel: SignalingChannel,
    peer: PeerTransportManager,
    local_tracks: Vec<LocalTrack>,
    timeouts: Timeouts,
    state: SessionState,
    session: Option<Session>,
    subscription: Option<Subscription>,
    consent: ConsentRecord,
    // Sender of candidates that arrived before its offer.
    early_partner: Option<String>,
    deadline: Option<Deadline>,
    transport_tx: mpsc::UnboundedSender<(SessionId, TransportEvent)>,
    transport_rx: mpsc::UnboundedReceiver<(SessionId, TransportEvent)>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionMachine {
    pub fn new(
        channel: SignalingChannel,
        factory: Arc<dyn TransportFactory>,
        local_tracks: Vec<LocalTrack>,
        timeouts: Timeouts,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let machine = Self {
            channel,
            peer: PeerTransportManager::new(factory),
            local_tracks,
            timeouts,
            state: SessionState::Idle,
            session: None,
            subscription: None,
            consent: ConsentRecord::default(),
            early_partner: None,
            deadline: None,
            transport_tx,
            transport_rx,
            events,
        };
        (machine, events_rx)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Remote candidates waiting for the remote description.
    pub fn pending_candidates(&self) -> usize {
        self.peer.pending_candidates()
    }

    pub fn deadline_kind(&self) -> Option<DeadlineKind> {
        self.deadline.map(|d| d.kind)
    }

    pub fn moderation(&mut self) -> ModerationController<'_> {
        ModerationController::new(self)
    }

    /// Opens the signaling channel and waits for a partner.
    pub async fn start_search(&mut self, consent: ConsentRecord) -> Result<()> {
        if !consent.is_satisfied() {
            return Err(Error::ConsentRequired);
        }
        if self.state != SessionState::Idle {
            return Err(Error::negotiation(format!(
                "cannot start searching while {:?}",
                self.state
            )));
        }

        if let Err(e) = self.channel.connect().await {
            warn!("Could not open signaling channel: {e}");
            self.emit(SessionEvent::CouldNotStart(e.to_string()));
            return Err(e);
        }
        self.subscription = Some(self.channel.subscribe(&EventKind::SESSION));
        self.consent = consent;
        self.state = SessionState::Searching;
        info!("Searching for a partner");
        self.emit(SessionEvent::Searching);
        Ok(())
    }

    /// Handles one relay event. An `Err` means the event was out of sequence
    /// and has been rejected; the machine is left as it was.
    pub async fn handle_server_event(&mut self, event: ServerEvent) -> Result<()> {
        match event {
            ServerEvent::PartnerFound { partner_id } => {
                self.on_partner_found(partner_id).await;
                Ok(())
            }
            ServerEvent::Signal { from, data, .. } => match data {
                SignalPayload::Offer(desc) => self.on_remote_offer(from, desc).await,
                SignalPayload::Answer(desc) => self.on_remote_answer(from, desc).await,
                SignalPayload::Candidate(candidate) => {
                    self.on_remote_candidate(from, candidate).await;
                    Ok(())
                }
            },
            ServerEvent::PartnerLeft {} => {
                if self.session.is_none() {
                    debug!("partner-left ignored: no active session");
                } else {
                    self.teardown(EndReason::PartnerLeft).await;
                }
                Ok(())
            }
        }
    }

    async fn on_partner_found(&mut self, partner_id: String) {
        if let Some(session) = &self.session {
            debug!(
                "partner-found for {partner_id} ignored: session {} with {} is active",
                session.id, session.partner_id
            );
            return;
        }
        if self.state != SessionState::Searching {
            debug!("partner-found for {partner_id} ignored while {:?}", self.state);
            return;
        }

        let session = Session::new(partner_id.clone(), Role::Caller);
        info!("Partner {partner_id} found, calling (session {})", session.id);
        let events = self.transport_events(&session.id);
        self.session = Some(session);
        if self.early_partner.as_deref() != Some(partner_id.as_str()) {
            self.peer.discard_pending();
        }
        self.early_partner = None;

        if let Err(e) = self.send_offer(events).await {
            self.abort_session(e).await;
            return;
        }
        self.state = SessionState::Negotiating(Role::Caller);
        self.arm_negotiation_deadline();
        self.emit(SessionEvent::PartnerFound {
            partner_id,
            role: Role::Caller,
        });
    }

    async fn send_offer(&mut self, events: TransportEvents) -> Result<()> {
        self.peer
            .open(Role::Caller, &self.local_tracks, events)
            .await?;
        let offer = self.peer.create_offer().await?;
        self.send_signal(SignalPayload::Offer(offer)).await
    }

    async fn on_remote_offer(&mut self, from: String, offer: SessionDescription) -> Result<()> {
        if matches!(self.state, SessionState::Idle | SessionState::Ending) {
            debug!("Offer from {from} ignored while {:?}", self.state);
            return Ok(());
        }
        if let Some(session) = &self.session {
            if !session.is_with(&from) {
                debug!("Stale offer from {from} ignored");
                return Ok(());
            }
            return Err(Error::negotiation(match session.role {
                Role::Caller => "offer received while calling (glare)",
                Role::Callee => "renegotiation is not supported",
            }));
        }

        let session = Session::new(from.clone(), Role::Callee);
        info!("Offer from {from}, answering (session {})", session.id);
        if self.early_partner.as_deref() != Some(from.as_str()) {
            self.peer.discard_pending();
        }
        self.early_partner = None;
        let events = self.transport_events(&session.id);
        self.session = Some(session);

        if let Err(e) = self.send_answer(offer, events).await {
            self.abort_session(e).await;
            return Ok(());
        }
        self.state = SessionState::Negotiating(Role::Callee);
        self.arm_negotiation_deadline();
        self.emit(SessionEvent::PartnerFound {
            partner_id: from,
            role: Role::Callee,
        });
        Ok(())
    }

    async fn send_answer(&mut self, offer: SessionDescription, events: TransportEvents) -> Result<()> {
        self.peer
            .open(Role::Callee, &self.local_tracks, events)
            .await?;
        self.peer.apply_remote_description(offer).await?;
        let answer = self.peer.create_answer().await?;
        self.send_signal(SignalPayload::Answer(answer)).await
    }

    async fn on_remote_answer(&mut self, from: String, answer: SessionDescription) -> Result<()> {
        let Some(session) = &self.session else {
            return Err(Error::negotiation("answer received without an outstanding offer"));
        };
        if !session.is_with(&from) {
            debug!("Stale answer from {from} ignored");
            return Ok(());
        }
        if self.state != SessionState::Negotiating(Role::Caller) {
            return Err(Error::negotiation(format!(
                "answer not expected while {:?}",
                self.state
            )));
        }

        if let Err(e) = self.peer.apply_remote_description(answer).await {
            if e.is_negotiation() {
                return Err(e);
            }
            self.abort_session(e).await;
            return Ok(());
        }
        self.mark_connected();
        Ok(())
    }

    async fn on_remote_candidate(&mut self, from: String, candidate: IceCandidate) {
        match &self.session {
            Some(session) if session.is_with(&from) => self.peer.add_candidate(candidate).await,
            Some(_) => debug!("Stale candidate from {from} ignored"),
            None if self.state == SessionState::Searching => {
                // The offer that opens this session may still be on its way.
                if self.early_partner.as_deref() != Some(from.as_str()) {
                    self.peer.discard_pending();
                    self.early_partner = Some(from);
                }
                self.peer.add_candidate(candidate).await;
            }
            None => debug!("Candidate from {from} ignored while {:?}", self.state),
        }
    }

    /// Handles a callback from the transport of session `id`. Events from a
    /// transport that no longer belongs to the active session are ignored.
    pub async fn handle_transport_event(&mut self, id: SessionId, event: TransportEvent) {
        let Some(session) = self.session.as_mut() else {
            trace!("Transport event for closed session {id} ignored");
            return;
        };
        if session.id != id {
            debug!("Transport event for stale session {id} ignored");
            return;
        }

        match event {
            TransportEvent::LocalCandidate(candidate) => {
                session.local_candidates.push(candidate.clone());
                if let Err(e) = self.send_signal(SignalPayload::Candidate(candidate)).await {
                    self.abort_session(e).await;
                }
            }
            TransportEvent::GatheringComplete => {
                info!(
                    "Gathered {} local candidates",
                    session.local_candidates.len()
                );
                analyze_candidates(&session.local_candidates);
            }
            TransportEvent::RemoteTrack(track) => {
                let stream = session
                    .remote_stream
                    .get_or_insert_with(|| track.stream_id.clone());
                if *stream != track.stream_id {
                    warn!(
                        "Ignoring track {} of unexpected second stream {}",
                        track.id, track.stream_id
                    );
                    return;
                }
                info!("Remote {:?} track {} available", track.kind, track.id);
                self.emit(SessionEvent::RemoteTrack(track));
            }
            TransportEvent::StateChanged(state) => self.on_transport_state(state),
        }
    }

    fn on_transport_state(&mut self, state: TransportState) {
        match state {
            TransportState::Connected => {
                if self.deadline_kind() == Some(DeadlineKind::Recovery) {
                    info!("Transport recovered");
                    self.deadline = None;
                }
                if self.state == SessionState::Negotiating(Role::Callee)
                    && self.peer.has_local_description()
                {
                    self.mark_connected();
                }
            }
            TransportState::Disconnected | TransportState::Failed => {
                if self.deadline_kind() == Some(DeadlineKind::Recovery) {
                    return;
                }
                let at = Instant::now() + self.timeouts.grace_period;
                match self.deadline {
                    Some(existing) if existing.at <= at => {}
                    _ => {
                        self.deadline = Some(Deadline {
                            at,
                            kind: DeadlineKind::Recovery,
                        })
                    }
                }
                warn!(
                    "Transport {:?}, waiting {}s for recovery",
                    state,
                    self.timeouts.grace_period.as_secs()
                );
            }
            TransportState::New | TransportState::Connecting | TransportState::Closed => {
                debug!("Transport state {:?}", state);
            }
        }
    }

    /// Ends the session (or the search) at the user's request. No-op when idle.
    pub async fn end_session(&mut self) {
        if self.state == SessionState::Idle {
            debug!("end_session: already idle");
            return;
        }
        self.teardown(EndReason::Hangup).await;
    }

    /// Reacts to a lost relay connection like a partner leaving.
    pub async fn on_channel_failure(&mut self, err: Error) {
        warn!("Signaling failure: {err}");
        let was_searching = self.state == SessionState::Searching && self.session.is_none();
        self.teardown(EndReason::ChannelLost).await;
        if was_searching {
            self.emit(SessionEvent::CouldNotStart(err.to_string()));
        }
    }

    /// Fires the pending deadline, if any.
    pub async fn on_deadline(&mut self) {
        let Some(deadline) = self.deadline.take() else {
            return;
        };
        let reason = match deadline.kind {
            DeadlineKind::Negotiation => EndReason::NegotiationTimeout,
            DeadlineKind::Recovery => EndReason::TransportFailed,
        };
        warn!("{:?} deadline expired", deadline.kind);
        self.teardown(reason).await;
    }

    pub async fn handle_command(&mut self, command: UserCommand) -> Result<()> {
        match command {
            UserCommand::StartSearch(consent) => self.start_search(consent).await,
            UserCommand::Next => {
                self.end_session().await;
                self.start_search(self.consent).await
            }
            UserCommand::End | UserCommand::Shutdown => {
                self.end_session().await;
                Ok(())
            }
            UserCommand::Report(reason) => self.moderation().report(&reason).await,
            UserCommand::Block(partner_id) => self.moderation().block(&partner_id).await,
        }
    }

    /// Drives the machine until `Shutdown` arrives or the command sender is dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<UserCommand>) {
        loop {
            let deadline = self.deadline.map(|d| d.at);
            tokio::select! {
                inbound = self.channel.recv() => match inbound {
                    Ok(event) => {
                        let kind = event.kind();
                        if let Err(e) = self.handle_server_event(event).await {
                            warn!("Rejected {kind}: {e}");
                        }
                    }
                    Err(e) => self.on_channel_failure(e).await,
                },
                Some((id, event)) = self.transport_rx.recv() => {
                    self.handle_transport_event(id, event).await;
                }
                command = commands.recv() => match command {
                    Some(UserCommand::Shutdown) | None => break,
                    Some(command) => {
                        if let Err(e) = self.handle_command(command).await {
                            warn!("Command rejected: {e}");
                            self.emit(SessionEvent::CommandRejected(e.to_string()));
                        }
                    }
                },
                _ = wait_for_deadline(deadline) => self.on_deadline().await,
            }
        }
        self.end_session().await;
        info!("Session machine stopped");
    }

    /// `Ending`: release the subscriptions, the transport and the queued
    /// candidates, then return to `Idle`.
    pub(crate) async fn teardown(&mut self, reason: EndReason) {
        if self.state == SessionState::Idle {
            return;
        }
        self.state = SessionState::Ending;
        self.subscription = None;
        self.deadline = None;
        self.early_partner = None;
        self.peer.close().await;
        self.channel.disconnect().await;
        let session = self.session.take();
        self.state = SessionState::Idle;

        match session {
            Some(session) => {
                info!(
                    "Session {} with {} ended: {:?}",
                    session.id, session.partner_id, reason
                );
                self.emit(SessionEvent::Ended { reason });
            }
            None => info!("Search stopped: {:?}", reason),
        }
    }

    /// Fire-and-forget delivery; a failure is only logged.
    pub(crate) async fn notify_server(&mut self, event: ClientEvent) {
        let name = event.name();
        if let Err(e) = self.channel.send(event).await {
            warn!("{name} not delivered: {e}");
        }
    }

    async fn abort_session(&mut self, err: Error) {
        warn!("Ending session: {err}");
        let reason = match err {
            Error::ChannelDelivery(_) => EndReason::ChannelLost,
            other => EndReason::Error(other.to_string()),
        };
        self.teardown(reason).await;
    }

    async fn send_signal(&mut self, data: SignalPayload) -> Result<()> {
        let to = self
            .session
            .as_ref()
            .map(|s| s.partner_id.clone())
            .ok_or_else(|| Error::negotiation("no active session"))?;
        debug!("Sending {} to {to}", data.label());
        self.channel.send(ClientEvent::Signal { to, data }).await
    }

    fn mark_connected(&mut self) {
        self.state = SessionState::Connected;
        self.deadline = None;
        info!("Session connected");
        self.emit(SessionEvent::Connected);
    }

    fn arm_negotiation_deadline(&mut self) {
        self.deadline = Some(Deadline {
            at: Instant::now() + self.timeouts.negotiation,
            kind: DeadlineKind::Negotiation,
        });
    }

    fn transport_events(&self, id: &SessionId) -> TransportEvents {
        TransportEvents::new(id.clone(), self.transport_tx.clone())
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
