use crate::error::Result;
use crate::session::SessionId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Session description in the browser's `{type, sdp}` shape.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in the browser's `RTCIceCandidateInit` shape.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Codec the local track is encoded with.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Audio => MIME_TYPE_OPUS,
            Self::Video => MIME_TYPE_VP8,
        }
    }
}

/// A local track to attach to the transport. The capture pipeline writes
/// encoded frames into it; clones share the same underlying track.
#[derive(Clone)]
pub struct LocalTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: MediaKind,
    sample: Arc<TrackLocalStaticSample>,
}

impl LocalTrack {
    pub fn new(kind: MediaKind, stream_id: impl Into<String>) -> Self {
        let id = match kind {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
        .to_string();
        let stream_id = stream_id.into();
        let sample = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: kind.mime_type().to_owned(),
                ..Default::default()
            },
            id.clone(),
            stream_id.clone(),
        ));
        Self {
            id,
            stream_id,
            kind,
            sample,
        }
    }

    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.sample)
    }

    /// Sends one encoded frame to the partner. Frames written before the
    /// transport is connected are dropped.
    pub async fn write_sample(&self, sample: &Sample) -> Result<()> {
        self.sample.write_sample(sample).await?;
        Ok(())
    }

    pub fn same_track(&self, other: &LocalTrack) -> bool {
        Arc::ptr_eq(&self.sample, &other.sample)
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl PartialEq for LocalTrack {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.stream_id == other.stream_id
            && self.kind == other.kind
            && self.same_track(other)
    }
}

/// Read side of a partner's media track, handed to the renderer.
#[async_trait]
pub trait RemoteMedia: Send + Sync {
    /// Next RTP packet; fails once the track has ended.
    async fn read_rtp(&self) -> Result<Packet>;
}

/// A track announced by the partner.
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: Option<MediaKind>,
    pub media: Arc<dyn RemoteMedia>,
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl PartialEq for RemoteTrack {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.stream_id == other.stream_id
            && self.kind == other.kind
            && Arc::ptr_eq(&self.media, &other.media)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    LocalCandidate(IceCandidate),
    GatheringComplete,
    RemoteTrack(RemoteTrack),
    StateChanged(TransportState),
}

/// Sink for transport callbacks, tagged with the session that opened the transport
/// so that late events from a closed session can be told apart.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    session_id: SessionId,
    tx: mpsc::UnboundedSender<(SessionId, TransportEvent)>,
}

impl TransportEvents {
    pub fn new(session_id: SessionId, tx: mpsc::UnboundedSender<(SessionId, TransportEvent)>) -> Self {
        Self { session_id, tx }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn emit(&self, event: TransportEvent) {
        // The machine may already be gone during shutdown.
        let _ = self.tx.send((self.session_id.clone(), event));
    }
}
