use crate::logger::dump_candidate;
use crate::peer::transport::PeerTransport;
use crate::peer::types::IceCandidate;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Кандидаты удаленной стороны, пришедшие до установки remote description
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: VecDeque<IceCandidate>,
    drained: bool,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Откладывает кандидат. После drain возвращает `false` и ничего не сохраняет:
    /// дальше кандидаты применяются сразу
    pub fn push(&mut self, candidate: IceCandidate) -> bool {
        if self.drained {
            debug!("Candidate buffer already drained, not queueing");
            return false;
        }
        dump_candidate("QUEUED", &candidate);
        self.pending.push_back(candidate);
        true
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }

    /// Применяет все отложенные кандидаты в порядке поступления.
    /// Ошибочный кандидат логируем и пропускаем, остальные всё равно применяем.
    /// Возвращает число успешно применённых
    pub async fn drain_into(&mut self, transport: &dyn PeerTransport) -> usize {
        self.drained = true;

        let mut applied = 0;
        while let Some(candidate) = self.pending.pop_front() {
            debug!("Applying pending candidate: {:?}", candidate.candidate);
            match transport.add_ice_candidate(candidate).await {
                Ok(()) => applied += 1,
                Err(e) => warn!("Failed to apply pending candidate: {e}"),
            }
        }
        applied
    }

    /// Сбрасывает очередь и готовит буфер к следующей сессии
    pub fn clear(&mut self) {
        self.pending.clear();
        self.drained = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::fake::FakeTransport;
    use crate::peer::types::SessionDescription;

    #[tokio::test]
    async fn drains_in_arrival_order() {
        let transport = FakeTransport::new();
        transport
            .set_remote_description(SessionDescription::offer("v=0"))
            .await
            .unwrap();

        let mut buffer = CandidateBuffer::new();
        for c in ["c1", "c2", "c3"] {
            assert!(buffer.push(IceCandidate::new(c)));
        }

        assert_eq!(buffer.drain_into(&transport).await, 3);
        assert_eq!(transport.applied(), vec!["c1", "c2", "c3"]);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn push_after_drain_is_a_noop_and_drain_is_idempotent() {
        let transport = FakeTransport::new();
        transport
            .set_remote_description(SessionDescription::offer("v=0"))
            .await
            .unwrap();

        let mut buffer = CandidateBuffer::new();
        buffer.push(IceCandidate::new("c1"));
        assert_eq!(buffer.drain_into(&transport).await, 1);

        assert!(!buffer.push(IceCandidate::new("late")));
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.drain_into(&transport).await, 0);
        assert_eq!(transport.applied(), vec!["c1"]);
    }

    #[tokio::test]
    async fn failing_candidate_does_not_stop_the_drain() {
        let transport = FakeTransport::new();
        transport
            .set_remote_description(SessionDescription::offer("v=0"))
            .await
            .unwrap();

        let mut buffer = CandidateBuffer::new();
        buffer.push(IceCandidate::new("c1"));
        buffer.push(IceCandidate::new("bad-candidate"));
        buffer.push(IceCandidate::new("c3"));

        assert_eq!(buffer.drain_into(&transport).await, 2);
        assert_eq!(transport.applied(), vec!["c1", "c3"]);
    }

    #[test]
    fn clear_rearms_the_buffer() {
        let mut buffer = CandidateBuffer::new();
        buffer.push(IceCandidate::new("c1"));
        buffer.drained = true;
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(!buffer.is_drained());
        assert!(buffer.push(IceCandidate::new("c2")));
    }
}
