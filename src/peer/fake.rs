//! In-memory transport used by unit tests.

use crate::error::{Error, Result};
use crate::peer::transport::{PeerTransport, TransportFactory};
use crate::peer::types::{
    IceCandidate, LocalTrack, RemoteMedia, SessionDescription, TransportEvents,
};
use webrtc::rtp::packet::Packet;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub(crate) struct FakeLog {
    pub local: Option<SessionDescription>,
    pub remote: Option<SessionDescription>,
    pub applied: Vec<String>,
    pub tracks: Vec<LocalTrack>,
    pub closed: usize,
}

/// Mimics the browser rules that matter here: candidates are rejected before a
/// remote description exists, answers need a remote offer, and candidates
/// containing "bad" are malformed.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeTransport {
    log: Arc<Mutex<FakeLog>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> Vec<String> {
        self.log.lock().unwrap().applied.clone()
    }

    pub fn closed(&self) -> usize {
        self.log.lock().unwrap().closed
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.log.lock().unwrap().remote.clone()
    }

    pub fn local(&self) -> Option<SessionDescription> {
        self.log.lock().unwrap().local.clone()
    }

    pub fn tracks(&self) -> Vec<LocalTrack> {
        self.log.lock().unwrap().tracks.clone()
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer("v=0 fake-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.log.lock().unwrap().remote.is_none() {
            return Err(Error::transport("no remote offer"));
        }
        Ok(SessionDescription::answer("v=0 fake-answer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.log.lock().unwrap().local = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.log.lock().unwrap().remote = Some(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        if log.remote.is_none() {
            return Err(Error::candidate_apply("remote description not set"));
        }
        if candidate.candidate.contains("bad") {
            return Err(Error::candidate_apply("malformed candidate"));
        }
        log.applied.push(candidate.candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.log.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// Hands out `FakeTransport`s and remembers each one with its event sink.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeFactory {
    opened: Arc<Mutex<Vec<(FakeTransport, TransportEvents)>>>,
    fail_open: bool,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn last(&self) -> FakeTransport {
        self.opened
            .lock()
            .unwrap()
            .last()
            .map(|(t, _)| t.clone())
            .expect("no transport opened")
    }

    pub fn last_events(&self) -> TransportEvents {
        self.opened
            .lock()
            .unwrap()
            .last()
            .map(|(_, e)| e.clone())
            .expect("no transport opened")
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn open(
        &self,
        tracks: &[LocalTrack],
        events: TransportEvents,
    ) -> Result<Box<dyn PeerTransport>> {
        if self.fail_open {
            return Err(Error::transport("no media devices"));
        }
        let transport = FakeTransport::new();
        transport.log.lock().unwrap().tracks = tracks.to_vec();
        self.opened
            .lock()
            .unwrap()
            .push((transport.clone(), events));
        Ok(Box::new(transport))
    }
}

/// Remote media that has already ended.
#[derive(Debug, Default)]
pub(crate) struct EndedMedia;

#[async_trait]
impl RemoteMedia for EndedMedia {
    async fn read_rtp(&self) -> Result<Packet> {
        Err(Error::transport("track ended"))
    }
}
