//! Error types for the session core.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A protocol step was invoked out of sequence. State is left untouched.
    #[error("negotiation error: {0}")]
    Negotiation(String),

    /// A single connectivity candidate could not be applied.
    #[error("candidate could not be applied: {0}")]
    CandidateApply(String),

    /// The signaling connection is gone or was never opened.
    #[error("signaling delivery failure: {0}")]
    ChannelDelivery(String),

    #[error("invalid moderation request: {0}")]
    InvalidModerationRequest(String),

    #[error("age confirmation and terms acceptance are required before searching")]
    ConsentRequired,

    /// The peer transport backend failed.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn negotiation(msg: impl std::fmt::Display) -> Self {
        Self::Negotiation(msg.to_string())
    }

    pub fn candidate_apply(msg: impl std::fmt::Display) -> Self {
        Self::CandidateApply(msg.to_string())
    }

    pub fn channel_delivery(msg: impl std::fmt::Display) -> Self {
        Self::ChannelDelivery(msg.to_string())
    }

    pub fn invalid_moderation(msg: impl std::fmt::Display) -> Self {
        Self::InvalidModerationRequest(msg.to_string())
    }

    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Out-of-sequence protocol steps are reported to the caller; everything
    /// else raised during negotiation ends the session.
    pub fn is_negotiation(&self) -> bool {
        matches!(self, Self::Negotiation(_))
    }
}

impl From<webrtc::Error> for Error {
    fn from(err: webrtc::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
