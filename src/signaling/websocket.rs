use super::protocol::{ClientEvent, ServerEvent};
use super::SignalingTransport;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// JSON-over-WebSocket connection to the relay server.
pub struct WebSocketTransport {
    url: String,
    ws: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ws: None,
        }
    }
}

#[async_trait]
impl SignalingTransport for WebSocketTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.ws.is_some() {
            return Ok(());
        }
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::channel_delivery(format!("connect to {}: {e}", self.url)))?;
        info!("Connected to relay server at {}", self.url);
        self.ws = Some(ws);
        Ok(())
    }

    async fn send(&mut self, event: &ClientEvent) -> Result<()> {
        let ws = self
            .ws
            .as_mut()
            .ok_or_else(|| Error::channel_delivery("websocket not connected"))?;
        let text = serde_json::to_string(event)?;
        ws.send(Message::Text(text.into()))
            .await
            .map_err(|e| Error::channel_delivery(e))
    }

    async fn recv(&mut self) -> Option<ServerEvent> {
        loop {
            let ws = self.ws.as_mut()?;
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerEvent>(text.as_str()) {
                        Ok(event) => return Some(event),
                        Err(e) => warn!("Ignoring unparseable frame: {e}"),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Relay closed the connection: {:?}", frame);
                    self.ws = None;
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("Websocket error: {e}");
                    self.ws = None;
                    return None;
                }
                None => {
                    self.ws = None;
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut ws) = self.ws.take() {
            if let Err(e) = ws.close(None).await {
                debug!("Error while closing websocket: {e}");
            }
        }
    }
}
