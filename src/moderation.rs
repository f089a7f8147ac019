//! Reporting and blocking the current partner. Both end the session.

use crate::error::{Error, Result};
use crate::machine::{EndReason, SessionMachine};
use crate::signaling::protocol::ClientEvent;
use tracing::info;

/// Reasons offered by the report dialog. Free text is accepted as well.
pub const REPORT_REASONS: [&str; 4] = [
    "Inappropriate content",
    "Harassment",
    "Spam or scam",
    "Other",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationRequest {
    Report { partner_id: String, reason: String },
    Block { partner_id: String },
}

impl ModerationRequest {
    fn end_reason(&self) -> EndReason {
        match self {
            Self::Report { .. } => EndReason::Reported,
            Self::Block { .. } => EndReason::Blocked,
        }
    }
}

impl From<ModerationRequest> for ClientEvent {
    fn from(request: ModerationRequest) -> Self {
        match request {
            ModerationRequest::Report { partner_id, reason } => {
                ClientEvent::ReportUser { partner_id, reason }
            }
            ModerationRequest::Block { partner_id } => ClientEvent::BlockUser { partner_id },
        }
    }
}

/// Borrowed view of the machine for moderation actions on the active session.
///
/// A valid request sends exactly one notice to the relay server and then ends
/// the session whether or not the notice was delivered. An invalid one changes
/// nothing.
pub struct ModerationController<'a> {
    machine: &'a mut SessionMachine,
}

impl<'a> ModerationController<'a> {
    pub(crate) fn new(machine: &'a mut SessionMachine) -> Self {
        Self { machine }
    }

    pub async fn report(self, reason: &str) -> Result<()> {
        let partner_id = self.partner()?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::invalid_moderation("a report needs a reason"));
        }
        self.submit(ModerationRequest::Report {
            partner_id,
            reason: reason.to_string(),
        })
        .await;
        Ok(())
    }

    pub async fn block(self, partner_id: &str) -> Result<()> {
        let current = self.partner()?;
        if current != partner_id {
            return Err(Error::invalid_moderation(format!(
                "{partner_id} is not the current partner"
            )));
        }
        self.submit(ModerationRequest::Block {
            partner_id: current,
        })
        .await;
        Ok(())
    }

    fn partner(&self) -> Result<String> {
        self.machine
            .session()
            .map(|s| s.partner_id.clone())
            .ok_or_else(|| Error::invalid_moderation("no active session"))
    }

    async fn submit(self, request: ModerationRequest) {
        info!("Moderation: {:?}", request);
        let reason = request.end_reason();
        self.machine.notify_server(request.into()).await;
        self.machine.teardown(reason).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timeouts;
    use crate::peer::fake::FakeFactory;
    use crate::session::{ConsentRecord, SessionState};
    use crate::signaling::memory::{self, MemoryRelay};
    use crate::signaling::protocol::ServerEvent;
    use crate::signaling::SignalingChannel;
    use std::sync::Arc;

    async fn in_session_with(partner: &str) -> (SessionMachine, MemoryRelay) {
        let (transport, mut relay) = memory::pair();
        let (mut machine, _events) = SessionMachine::new(
            SignalingChannel::new(Box::new(transport)),
            Arc::new(FakeFactory::new()),
            Vec::new(),
            Timeouts::default(),
        );
        machine.start_search(ConsentRecord::granted()).await.unwrap();
        machine
            .handle_server_event(ServerEvent::PartnerFound {
                partner_id: partner.into(),
            })
            .await
            .unwrap();
        relay.drain();
        (machine, relay)
    }

    #[test]
    fn requests_map_to_relay_events() {
        let event: ClientEvent = ModerationRequest::Block {
            partner_id: "p".into(),
        }
        .into();
        assert_eq!(
            event,
            ClientEvent::BlockUser {
                partner_id: "p".into()
            }
        );
    }

    #[tokio::test]
    async fn report_needs_a_session() {
        let (transport, _relay) = memory::pair();
        let (mut machine, _events) = SessionMachine::new(
            SignalingChannel::new(Box::new(transport)),
            Arc::new(FakeFactory::new()),
            Vec::new(),
            Timeouts::default(),
        );
        let err = machine.moderation().report("Spam or scam").await.unwrap_err();
        assert!(matches!(err, Error::InvalidModerationRequest(_)));
    }

    #[tokio::test]
    async fn empty_reason_is_rejected_without_side_effects() {
        let (mut machine, mut relay) = in_session_with("P1").await;
        for reason in ["", "   "] {
            let err = machine.moderation().report(reason).await.unwrap_err();
            assert!(matches!(err, Error::InvalidModerationRequest(_)));
        }
        assert!(relay.drain().is_empty());
        assert!(machine.state().is_negotiating());
    }

    #[tokio::test]
    async fn report_sends_one_notice_and_ends_the_session() {
        let (mut machine, mut relay) = in_session_with("P1").await;
        machine.moderation().report(REPORT_REASONS[1]).await.unwrap();

        assert_eq!(
            relay.drain(),
            vec![ClientEvent::ReportUser {
                partner_id: "P1".into(),
                reason: "Harassment".into(),
            }]
        );
        assert_eq!(machine.state(), SessionState::Idle);
        assert!(machine.session().is_none());
    }

    #[tokio::test]
    async fn block_only_targets_the_current_partner() {
        let (mut machine, mut relay) = in_session_with("P1").await;

        let err = machine.moderation().block("P2").await.unwrap_err();
        assert!(matches!(err, Error::InvalidModerationRequest(_)));
        assert!(relay.drain().is_empty());

        machine.moderation().block("P1").await.unwrap();
        assert_eq!(
            relay.drain(),
            vec![ClientEvent::BlockUser {
                partner_id: "P1".into()
            }]
        );
        assert_eq!(machine.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn session_ends_even_if_the_notice_is_lost() {
        let (mut machine, relay) = in_session_with("P1").await;
        drop(relay);
        machine.moderation().block("P1").await.unwrap();
        assert_eq!(machine.state(), SessionState::Idle);
    }
}
