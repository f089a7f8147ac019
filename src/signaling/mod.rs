//! Persistent connection to the relay server.

pub mod memory;
pub mod protocol;
pub mod websocket;

use crate::error::{Error, Result};
use async_trait::async_trait;
use protocol::{ClientEvent, EventKind, ServerEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub use memory::{MemoryRelay, MemoryTransport};
pub use websocket::WebSocketTransport;

/// The raw bidirectional connection underneath a `SignalingChannel`.
#[async_trait]
pub trait SignalingTransport: Send {
    async fn connect(&mut self) -> Result<()>;

    async fn send(&mut self, event: &ClientEvent) -> Result<()>;

    /// Next inbound event in arrival order, or `None` once the connection is
    /// gone. Must be cancel-safe.
    async fn recv(&mut self) -> Option<ServerEvent>;

    async fn close(&mut self);
}

#[derive(Debug, Default)]
struct Registry {
    generation: u64,
    counts: HashMap<EventKind, usize>,
}

type SharedRegistry = Arc<Mutex<Registry>>;

fn lock(registry: &SharedRegistry) -> MutexGuard<'_, Registry> {
    // Counts stay consistent even if a holder panicked mid-update.
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Interest in a set of inbound events, released on drop.
/// A subscription taken before a `disconnect()` no longer has any effect.
#[derive(Debug)]
pub struct Subscription {
    kinds: Vec<EventKind>,
    generation: u64,
    registry: SharedRegistry,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut registry = lock(&self.registry);
        if registry.generation != self.generation {
            return;
        }
        for kind in &self.kinds {
            if let Some(count) = registry.counts.get_mut(kind) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    registry.counts.remove(kind);
                }
            }
        }
    }
}

/// Explicitly owned signaling connection with scoped event subscriptions.
pub struct SignalingChannel {
    transport: Box<dyn SignalingTransport>,
    connected: bool,
    registry: SharedRegistry,
}

impl SignalingChannel {
    pub fn new(transport: Box<dyn SignalingTransport>) -> Self {
        Self {
            transport,
            connected: false,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Opens the connection. Calling it while connected does nothing.
    pub async fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }
        self.transport.connect().await?;
        self.connected = true;
        info!("Signaling channel connected");
        Ok(())
    }

    /// Closes the connection and releases every subscription. Idempotent.
    pub async fn disconnect(&mut self) {
        self.release_all();
        if !self.connected {
            return;
        }
        self.connected = false;
        self.transport.close().await;
        info!("Signaling channel disconnected");
    }

    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        let mut registry = lock(&self.registry);
        for kind in kinds {
            *registry.counts.entry(*kind).or_insert(0) += 1;
        }
        Subscription {
            kinds: kinds.to_vec(),
            generation: registry.generation,
            registry: Arc::clone(&self.registry),
        }
    }

    pub fn is_subscribed(&self, kind: EventKind) -> bool {
        lock(&self.registry).counts.contains_key(&kind)
    }

    pub async fn send(&mut self, event: ClientEvent) -> Result<()> {
        if !self.connected {
            return Err(Error::channel_delivery(format!(
                "cannot send {}: not connected",
                event.name()
            )));
        }
        debug!("Sending {}", event.name());
        if let Err(e) = self.transport.send(&event).await {
            warn!("Send of {} failed, dropping connection: {e}", event.name());
            self.connected = false;
            self.release_all();
            return Err(Error::channel_delivery(e));
        }
        Ok(())
    }

    /// Waits for the next subscribed event. Events nobody subscribed to are
    /// dropped. A lost connection is reported once as `ChannelDelivery`; while
    /// disconnected this never resolves. Cancel-safe.
    pub async fn recv(&mut self) -> Result<ServerEvent> {
        if !self.connected {
            return std::future::pending().await;
        }
        loop {
            match self.transport.recv().await {
                Some(event) if self.is_subscribed(event.kind()) => return Ok(event),
                Some(event) => debug!("No subscription for {}, dropping", event.kind()),
                None => {
                    warn!("Signaling connection dropped");
                    self.connected = false;
                    self.release_all();
                    return Err(Error::channel_delivery("connection to relay server lost"));
                }
            }
        }
    }

    fn release_all(&self) {
        let mut registry = lock(&self.registry);
        registry.generation += 1;
        registry.counts.clear();
    }
}
