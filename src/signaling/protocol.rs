//! Wire envelopes exchanged with the relay server.
//!
//! Every frame is a JSON object `{"event": "<name>", "data": {...}}` with
//! camelCase fields. The server relays `signal` payloads without looking at them.

use crate::peer::types::{IceCandidate, SessionDescription};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exactly one of offer, answer or candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalPayload {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidate),
}

impl SignalPayload {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Candidate(_) => "candidate",
        }
    }
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    PartnerFound {
        partner_id: String,
    },
    Signal {
        from: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        data: SignalPayload,
    },
    PartnerLeft {},
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PartnerFound { .. } => EventKind::PartnerFound,
            Self::Signal { .. } => EventKind::Signal,
            Self::PartnerLeft {} => EventKind::PartnerLeft,
        }
    }
}

/// Client → server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    Signal { to: String, data: SignalPayload },
    ReportUser { partner_id: String, reason: String },
    BlockUser { partner_id: String },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Signal { .. } => "signal",
            Self::ReportUser { .. } => "report-user",
            Self::BlockUser { .. } => "block-user",
        }
    }
}

/// Inbound event names a subscription can cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PartnerFound,
    Signal,
    PartnerLeft,
}

impl EventKind {
    pub const SESSION: [EventKind; 3] = [
        EventKind::PartnerFound,
        EventKind::Signal,
        EventKind::PartnerLeft,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PartnerFound => "partner-found",
            Self::Signal => "signal",
            Self::PartnerLeft => "partner-left",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_server_frames() {
        let found: ServerEvent = serde_json::from_value(json!({
            "event": "partner-found",
            "data": { "partnerId": "abc" }
        }))
        .unwrap();
        assert_eq!(
            found,
            ServerEvent::PartnerFound {
                partner_id: "abc".into()
            }
        );

        let left: ServerEvent =
            serde_json::from_value(json!({ "event": "partner-left", "data": {} })).unwrap();
        assert_eq!(left.kind(), EventKind::PartnerLeft);
    }

    #[test]
    fn parses_browser_shaped_candidate() {
        let signal: ServerEvent = serde_json::from_value(json!({
            "event": "signal",
            "data": {
                "from": "abc",
                "data": {
                    "candidate": {
                        "candidate": "candidate:1 1 udp 2130706431 192.168.1.4 50000 typ host",
                        "sdpMid": "0",
                        "sdpMLineIndex": 0,
                        "usernameFragment": "f00d"
                    }
                }
            }
        }))
        .unwrap();

        match signal {
            ServerEvent::Signal {
                from,
                to,
                data: SignalPayload::Candidate(c),
            } => {
                assert_eq!(from, "abc");
                assert_eq!(to, None);
                assert_eq!(c.sdp_mid.as_deref(), Some("0"));
                assert_eq!(c.sdp_mline_index, Some(0));
                assert_eq!(c.username_fragment.as_deref(), Some("f00d"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn parses_offer_in_session_description_shape() {
        let signal: ServerEvent = serde_json::from_value(json!({
            "event": "signal",
            "data": { "from": "abc", "to": "me", "data": { "offer": { "type": "offer", "sdp": "v=0" } } }
        }))
        .unwrap();
        assert_eq!(
            signal,
            ServerEvent::Signal {
                from: "abc".into(),
                to: Some("me".into()),
                data: SignalPayload::Offer(SessionDescription::offer("v=0")),
            }
        );
    }

    #[test]
    fn client_frames_match_the_relay_contract() {
        let report = ClientEvent::ReportUser {
            partner_id: "abc".into(),
            reason: "Spam or scam".into(),
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({ "event": "report-user", "data": { "partnerId": "abc", "reason": "Spam or scam" } })
        );

        let answer = ClientEvent::Signal {
            to: "abc".into(),
            data: SignalPayload::Answer(SessionDescription::answer("v=0")),
        };
        assert_eq!(
            serde_json::to_value(&answer).unwrap(),
            json!({ "event": "signal", "data": { "to": "abc", "data": { "answer": { "type": "answer", "sdp": "v=0" } } } })
        );
        assert_eq!(
            ClientEvent::BlockUser {
                partner_id: "abc".into()
            }
            .name(),
            "block-user"
        );
    }

    #[test]
    fn unknown_events_are_rejected() {
        let parsed = serde_json::from_value::<ServerEvent>(json!({ "event": "heartbeat", "data": {} }));
        assert!(parsed.is_err());
    }
}
