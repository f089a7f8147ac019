pub mod connection;
#[cfg(test)]
pub(crate) mod fake;
pub mod ice;
pub mod transport;
pub mod types;

pub use connection::RtcTransportFactory;
pub use ice::CandidateBuffer;
pub use transport::{PeerTransport, PeerTransportManager, TransportFactory};
pub use types::{
    IceCandidate, LocalTrack, MediaKind, RemoteTrack, SdpKind, SessionDescription,
    TransportEvent, TransportEvents, TransportState,
};
