use crate::error::{Error, Result};
use crate::logger::dump_candidate;
use crate::peer::ice::CandidateBuffer;
use crate::peer::types::{IceCandidate, LocalTrack, SdpKind, SessionDescription, TransportEvents};
use crate::session::Role;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One peer connection. Implementations report callbacks through the
/// `TransportEvents` sink they were opened with.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Creates a transport with `tracks` attached and callbacks wired to `events`.
    async fn open(
        &self,
        tracks: &[LocalTrack],
        events: TransportEvents,
    ) -> Result<Box<dyn PeerTransport>>;
}

/// Owns the transport of the current session and enforces the offer/answer order.
pub struct PeerTransportManager {
    factory: Arc<dyn TransportFactory>,
    transport: Option<Box<dyn PeerTransport>>,
    role: Option<Role>,
    buffer: CandidateBuffer,
    local_applied: bool,
    remote_applied: bool,
}

impl PeerTransportManager {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            transport: None,
            role: None,
            buffer: CandidateBuffer::new(),
            local_applied: false,
            remote_applied: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn has_local_description(&self) -> bool {
        self.local_applied
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_applied
    }

    pub fn pending_candidates(&self) -> usize {
        self.buffer.len()
    }

    pub async fn open(
        &mut self,
        role: Role,
        tracks: &[LocalTrack],
        events: TransportEvents,
    ) -> Result<()> {
        if self.transport.is_some() {
            return Err(Error::negotiation("transport already open for this session"));
        }

        info!(
            "Opening {:?} transport for session {} with {} local tracks",
            role,
            events.session_id(),
            tracks.len()
        );
        let transport = self.factory.open(tracks, events).await?;
        self.transport = Some(transport);
        self.role = Some(role);
        Ok(())
    }

    /// Creates the offer, applies it locally and returns it for sending.
    pub async fn create_offer(&mut self) -> Result<SessionDescription> {
        if self.role != Some(Role::Caller) {
            return Err(Error::negotiation("only the caller creates an offer"));
        }
        if self.local_applied {
            return Err(Error::negotiation("local description already set"));
        }
        let transport = self.require_transport()?;

        let offer = transport.create_offer().await?;
        transport.set_local_description(offer.clone()).await?;
        self.local_applied = true;
        debug!("Local offer applied");
        Ok(offer)
    }

    /// Creates the answer to an applied remote offer, applies it locally and
    /// returns it for sending.
    pub async fn create_answer(&mut self) -> Result<SessionDescription> {
        if self.role != Some(Role::Callee) {
            return Err(Error::negotiation("only the callee creates an answer"));
        }
        if !self.remote_applied {
            return Err(Error::negotiation("no remote offer applied yet"));
        }
        if self.local_applied {
            return Err(Error::negotiation("local description already set"));
        }
        let transport = self.require_transport()?;

        let answer = transport.create_answer().await?;
        transport.set_local_description(answer.clone()).await?;
        self.local_applied = true;
        debug!("Local answer applied");
        Ok(answer)
    }

    /// Applies the partner's description, then flushes buffered candidates.
    pub async fn apply_remote_description(&mut self, desc: SessionDescription) -> Result<()> {
        if self.remote_applied {
            return Err(Error::negotiation("remote description already set"));
        }
        match (self.role, desc.kind) {
            (Some(Role::Callee), SdpKind::Offer) => {}
            (Some(Role::Caller), SdpKind::Answer) if self.local_applied => {}
            (Some(Role::Caller), SdpKind::Answer) => {
                return Err(Error::negotiation("answer received before an offer was sent"));
            }
            (role, kind) => {
                return Err(Error::negotiation(format!(
                    "unexpected remote {kind:?} for role {role:?}"
                )));
            }
        }
        let transport = self.transport.as_deref().ok_or_else(|| {
            Error::negotiation("no transport open for this session")
        })?;

        transport.set_remote_description(desc).await?;
        self.remote_applied = true;

        let queued = self.buffer.len();
        let applied = self.buffer.drain_into(transport).await;
        if queued > 0 {
            info!("Applied {applied}/{queued} queued candidates");
        }
        Ok(())
    }

    /// Applies a remote candidate, or queues it until the remote description is set.
    /// Per-candidate failures are logged and swallowed.
    pub async fn add_candidate(&mut self, candidate: IceCandidate) {
        dump_candidate("REMOTE", &candidate);

        match self.transport.as_deref() {
            Some(transport) if self.remote_applied => {
                if let Err(e) = transport.add_ice_candidate(candidate).await {
                    warn!("Failed to add ICE candidate: {e}");
                }
            }
            _ => {
                debug!("Remote description not set yet, queuing candidate");
                if !self.buffer.push(candidate) {
                    warn!("Candidate arrived after drain without a transport, dropped");
                }
            }
        }
    }

    /// Releases the transport and forgets all per-session state. Idempotent.
    pub async fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                warn!("Error while closing transport: {e}");
            }
            info!("Transport closed");
        }
        self.role = None;
        self.local_applied = false;
        self.remote_applied = false;
        self.buffer.clear();
    }

    /// Drops queued candidates without touching an open transport.
    pub fn discard_pending(&mut self) {
        if !self.buffer.is_empty() {
            debug!("Discarding {} queued candidates", self.buffer.len());
        }
        self.buffer.clear();
    }

    fn require_transport(&self) -> Result<&dyn PeerTransport> {
        self.transport
            .as_deref()
            .ok_or_else(|| Error::negotiation("no transport open for this session"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::fake::FakeFactory;
    use crate::peer::types::MediaKind;
    use crate::session::SessionId;
    use tokio::sync::mpsc;

    fn events() -> TransportEvents {
        let (tx, _rx) = mpsc::unbounded_channel();
        TransportEvents::new(SessionId::from("P1"), tx)
    }

    fn manager() -> (PeerTransportManager, FakeFactory) {
        let factory = FakeFactory::new();
        (PeerTransportManager::new(Arc::new(factory.clone())), factory)
    }

    #[tokio::test]
    async fn caller_offer_then_answer() {
        let (mut mgr, factory) = manager();
        let tracks = vec![
            LocalTrack::new(MediaKind::Audio, "local"),
            LocalTrack::new(MediaKind::Video, "local"),
        ];
        mgr.open(Role::Caller, &tracks, events()).await.unwrap();
        assert_eq!(factory.last().tracks(), tracks);

        let offer = mgr.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
        assert_eq!(factory.last().local(), Some(offer));

        mgr.apply_remote_description(SessionDescription::answer("v=0 answer"))
            .await
            .unwrap();
        assert!(mgr.has_remote_description());
    }

    #[tokio::test]
    async fn answer_before_remote_offer_fails_without_side_effects() {
        let (mut mgr, factory) = manager();
        mgr.open(Role::Callee, &[], events()).await.unwrap();

        let err = mgr.create_answer().await.unwrap_err();
        assert!(err.is_negotiation());
        assert!(!mgr.has_local_description());
        assert!(factory.last().local().is_none());

        mgr.apply_remote_description(SessionDescription::offer("v=0 offer"))
            .await
            .unwrap();
        let answer = mgr.create_answer().await.unwrap();
        assert_eq!(answer.kind, SdpKind::Answer);
    }

    #[tokio::test]
    async fn callee_cannot_offer_and_caller_cannot_answer() {
        let (mut callee, _) = manager();
        callee.open(Role::Callee, &[], events()).await.unwrap();
        assert!(callee.create_offer().await.unwrap_err().is_negotiation());

        let (mut caller, _) = manager();
        caller.open(Role::Caller, &[], events()).await.unwrap();
        assert!(caller.create_answer().await.unwrap_err().is_negotiation());
        // An answer is only acceptable after our own offer went out.
        assert!(caller
            .apply_remote_description(SessionDescription::answer("v=0"))
            .await
            .unwrap_err()
            .is_negotiation());
        // A caller never accepts an offer.
        assert!(caller
            .apply_remote_description(SessionDescription::offer("v=0"))
            .await
            .unwrap_err()
            .is_negotiation());
    }

    #[tokio::test]
    async fn remote_description_is_set_at_most_once() {
        let (mut mgr, _) = manager();
        mgr.open(Role::Callee, &[], events()).await.unwrap();
        mgr.apply_remote_description(SessionDescription::offer("v=0 first"))
            .await
            .unwrap();

        let err = mgr
            .apply_remote_description(SessionDescription::offer("v=0 second"))
            .await
            .unwrap_err();
        assert!(err.is_negotiation());
    }

    #[tokio::test]
    async fn candidates_wait_for_the_remote_description() {
        let (mut mgr, factory) = manager();
        mgr.open(Role::Callee, &[], events()).await.unwrap();

        mgr.add_candidate(IceCandidate::new("c1")).await;
        mgr.add_candidate(IceCandidate::new("bad-c2")).await;
        mgr.add_candidate(IceCandidate::new("c3")).await;
        assert_eq!(mgr.pending_candidates(), 3);
        assert!(factory.last().applied().is_empty());

        mgr.apply_remote_description(SessionDescription::offer("v=0"))
            .await
            .unwrap();
        assert_eq!(mgr.pending_candidates(), 0);

        mgr.add_candidate(IceCandidate::new("c4")).await;
        assert_eq!(factory.last().applied(), vec!["c1", "c3", "c4"]);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_clears_the_buffer() {
        let (mut mgr, factory) = manager();
        mgr.open(Role::Caller, &[], events()).await.unwrap();
        mgr.create_offer().await.unwrap();
        mgr.add_candidate(IceCandidate::new("c1")).await;

        mgr.close().await;
        mgr.close().await;

        assert!(!mgr.is_open());
        assert_eq!(mgr.pending_candidates(), 0);
        assert_eq!(factory.last().closed(), 1);
        assert!(mgr.role().is_none());
    }

    #[tokio::test]
    async fn second_open_is_rejected() {
        let (mut mgr, factory) = manager();
        mgr.open(Role::Caller, &[], events()).await.unwrap();
        assert!(mgr
            .open(Role::Caller, &[], events())
            .await
            .unwrap_err()
            .is_negotiation());
        assert_eq!(factory.opened(), 1);
    }
}
