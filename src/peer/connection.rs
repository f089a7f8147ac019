use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::logger::dump_candidate;
use crate::peer::transport::{PeerTransport, TransportFactory};
use crate::peer::types::{
    IceCandidate, LocalTrack, MediaKind, RemoteMedia, RemoteTrack, SdpKind,
    SessionDescription, TransportEvent, TransportEvents, TransportState,
};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;
use webrtc::{
    api::APIBuilder,
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// Создаёт peer connection webrtc-rs с ICE серверами из конфигурации
pub struct RtcTransportFactory {
    ice_servers: Vec<ServerConfig>,
}

impl RtcTransportFactory {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Self {
        Self { ice_servers }
    }
}

impl RtcTransportFactory {
    async fn connect(&self, tracks: &[LocalTrack], events: TransportEvents) -> Result<RtcTransport> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(&self.ice_servers)).await?);

        // Ссылку на трек держит вызывающий, он же пишет в него сэмплы
        for track in tracks {
            pc.add_track(track.sample_track() as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            debug!("Attached local {:?} track {}", track.kind, track.id);
        }

        wire_callbacks(&pc, events);
        Ok(RtcTransport { pc })
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn open(
        &self,
        tracks: &[LocalTrack],
        events: TransportEvents,
    ) -> Result<Box<dyn PeerTransport>> {
        Ok(Box::new(self.connect(tracks, events).await?))
    }
}

#[async_trait]
impl RemoteMedia for TrackRemote {
    async fn read_rtp(&self) -> Result<Packet> {
        let (packet, _attributes) = TrackRemote::read_rtp(self).await?;
        Ok(packet)
    }
}

fn wire_callbacks(pc: &Arc<RTCPeerConnection>, events: TransportEvents) {
    let candidate_events = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        match cand {
            Some(c) => match c.to_json() {
                Ok(init) => {
                    let candidate = IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    };
                    dump_candidate("LOCAL", &candidate);
                    candidate_events.emit(TransportEvent::LocalCandidate(candidate));
                }
                Err(e) => debug!("Could not serialize local candidate: {e}"),
            },
            // cand == None означает конец сбора
            None => candidate_events.emit(TransportEvent::GatheringComplete),
        }
        Box::pin(async {})
    }));

    let track_events = events.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let kind = match track.kind() {
                RTPCodecType::Audio => Some(MediaKind::Audio),
                RTPCodecType::Video => Some(MediaKind::Video),
                _ => None,
            };
            track_events.emit(TransportEvent::RemoteTrack(RemoteTrack {
                id: track.id(),
                stream_id: track.stream_id(),
                kind,
                media: track,
            }));
            Box::pin(async {})
        },
    ));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!("ICE gathering state changed to: {:?}", state);
        Box::pin(async {})
    }));

    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!("Peer connection state changed to: {:?}", st);
        let state = match st {
            RTCPeerConnectionState::Connecting => TransportState::Connecting,
            RTCPeerConnectionState::Connected => TransportState::Connected,
            RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
            RTCPeerConnectionState::Failed => TransportState::Failed,
            RTCPeerConnectionState::Closed => TransportState::Closed,
            _ => TransportState::New,
        };
        events.emit(TransportEvent::StateChanged(state));
        Box::pin(async {})
    }));
}

/// Живое соединение webrtc-rs
pub struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::candidate_apply(e))
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp)?,
    };
    Ok(rtc)
}

/// Собираем конфигурацию peer connection из ICE серверов
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_ice_servers;
    use crate::session::SessionId;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn attaches_the_callers_own_tracks() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let events = TransportEvents::new(SessionId::from("s1"), tx);
        let tracks = vec![
            LocalTrack::new(MediaKind::Audio, "local"),
            LocalTrack::new(MediaKind::Video, "local"),
        ];
        let transport = RtcTransportFactory::new(Vec::new())
            .connect(&tracks, events)
            .await
            .unwrap();

        let mut attached = Vec::new();
        for sender in transport.pc.get_senders().await {
            if let Some(track) = sender.track().await {
                attached.push(Arc::as_ptr(&track) as *const ());
            }
        }
        assert_eq!(attached.len(), 2);
        for track in &tracks {
            let own = Arc::as_ptr(&track.sample_track()) as *const ();
            assert!(attached.contains(&own), "track {} not attached", track.id);
        }
        transport.close().await.unwrap();
    }

    #[test]
    fn ice_servers_carry_schemes_and_credentials() {
        let mut servers = default_ice_servers();
        servers.push(ServerConfig {
            id: "relay".into(),
            r#type: "turn".into(),
            url: "relay.example.org:3478".into(),
            username: Some("user".into()),
            credential: Some("secret".into()),
        });

        let rtc = ice_servers(&servers);
        assert_eq!(rtc.len(), 3);
        assert_eq!(rtc[0].urls, vec!["stun:stun.l.google.com:19302".to_string()]);
        assert_eq!(rtc[2].urls, vec!["turn:relay.example.org:3478".to_string()]);
        assert_eq!(rtc[2].username, "user");
        assert_eq!(rtc[2].credential, "secret");
    }
}
