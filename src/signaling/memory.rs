//! In-process signaling transport. The `MemoryRelay` end plays the server.

use super::protocol::{ClientEvent, ServerEvent};
use super::SignalingTransport;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicUsize,
    closes: AtomicUsize,
}

pub struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<ServerEvent>,
    outbound: mpsc::UnboundedSender<ClientEvent>,
    counters: Arc<Counters>,
}

pub struct MemoryRelay {
    to_client: mpsc::UnboundedSender<ServerEvent>,
    from_client: mpsc::UnboundedReceiver<ClientEvent>,
    counters: Arc<Counters>,
}

/// Creates a connected transport/relay pair. Dropping the relay looks like a
/// lost connection to the transport.
pub fn pair() -> (MemoryTransport, MemoryRelay) {
    let (to_client, inbound) = mpsc::unbounded_channel();
    let (outbound, from_client) = mpsc::unbounded_channel();
    let counters = Arc::new(Counters::default());
    (
        MemoryTransport {
            inbound,
            outbound,
            counters: Arc::clone(&counters),
        },
        MemoryRelay {
            to_client,
            from_client,
            counters,
        },
    )
}

#[async_trait]
impl SignalingTransport for MemoryTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.outbound.is_closed() {
            return Err(Error::channel_delivery("relay is gone"));
        }
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&mut self, event: &ClientEvent) -> Result<()> {
        self.outbound
            .send(event.clone())
            .map_err(|_| Error::channel_delivery("relay is gone"))
    }

    async fn recv(&mut self) -> Option<ServerEvent> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl MemoryRelay {
    /// Queues an event for the client.
    pub fn push(&self, event: ServerEvent) {
        let _ = self.to_client.send(event);
    }

    /// Next event the client sent, if any is waiting.
    pub fn try_next(&mut self) -> Option<ClientEvent> {
        self.from_client.try_recv().ok()
    }

    pub async fn next(&mut self) -> Option<ClientEvent> {
        self.from_client.recv().await
    }

    /// Everything the client has sent so far.
    pub fn drain(&mut self) -> Vec<ClientEvent> {
        let mut sent = Vec::new();
        while let Some(event) = self.try_next() {
            sent.push(event);
        }
        sent
    }

    pub fn connects(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }
}
