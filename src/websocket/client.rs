//! WebSocket client for the venue's public streams
//!
//! Handles connection, depth subscription, and message reception. Framing is
//! tungstenite's; decoding is handed to the parser so callers only ever see
//! [`WsMessage`] values.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use super::depth_channel;
use crate::error::{DepthFlowError, Result};
use crate::parser::{parse_ws_message, WsMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket client for a single connection
pub struct WsClient {
    stream: Option<WsStream>,
    endpoint: String,
    next_id: u64,
}

impl WsClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            stream: None,
            endpoint: endpoint.to_string(),
            next_id: 1,
        }
    }

    pub async fn connect(&mut self) -> Result<()> {
        info!(url = %self.endpoint, "connecting to venue WebSocket");

        let (ws_stream, response) = connect_async(&self.endpoint).await.map_err(|e| {
            DepthFlowError::WebSocket(format!("failed to connect: {e}"))
        })?;

        info!(status = ?response.status(), "WebSocket connected");
        self.stream = Some(ws_stream);
        Ok(())
    }

    /// Subscribe to the aggregated depth channel for `symbol`.
    pub async fn subscribe_depth(&mut self, symbol: &str) -> Result<()> {
        let channel = depth_channel(symbol);
        info!(%channel, "subscribing");
        self.send_method("SUBSCRIPTION", &channel).await
    }

    pub async fn unsubscribe_depth(&mut self, symbol: &str) -> Result<()> {
        let channel = depth_channel(symbol);
        info!(%channel, "unsubscribing");
        self.send_method("UNSUBSCRIPTION", &channel).await
    }

    async fn send_method(&mut self, method: &str, channel: &str) -> Result<()> {
        let id = self.next_id;
        self.next_id += 1;
        let msg = json!({
            "method": method,
            "params": [channel],
            "id": id,
        });
        self.send_text(msg.to_string()).await
    }

    async fn send_text(&mut self, text: String) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| DepthFlowError::WebSocket("not connected".to_string()))?;
        stream.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Receive the next decoded message. `Ok(None)` means a transport-level
    /// frame (ping/pong) was handled internally.
    pub async fn recv(&mut self) -> Result<Option<WsMessage>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| DepthFlowError::WebSocket("not connected".to_string()))?;

        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!(len = text.len(), "received text message");
                match parse_ws_message(&text) {
                    Ok(msg) => Ok(Some(msg)),
                    Err(e) => {
                        warn!(error = %e, "undecodable message dropped");
                        Ok(Some(WsMessage::Unknown))
                    }
                }
            }
            Some(Ok(Message::Binary(data))) => {
                let text = String::from_utf8_lossy(&data).to_string();
                match parse_ws_message(&text) {
                    Ok(msg) => Ok(Some(msg)),
                    Err(_) => Ok(Some(WsMessage::Unknown)),
                }
            }
            Some(Ok(Message::Ping(data))) => {
                debug!("received ping, sending pong");
                if let Some(stream) = self.stream.as_mut() {
                    let _ = stream.send(Message::Pong(data)).await;
                }
                Ok(None)
            }
            Some(Ok(Message::Pong(_))) => Ok(None),
            Some(Ok(Message::Close(frame))) => {
                warn!(frame = ?frame, "received close frame");
                self.stream = None;
                Err(DepthFlowError::WebSocket("connection closed".to_string()))
            }
            Some(Ok(Message::Frame(_))) => Ok(None),
            Some(Err(e)) => {
                error!(error = %e, "WebSocket error");
                self.stream = None;
                Err(DepthFlowError::WebSocket(e.to_string()))
            }
            None => {
                warn!("WebSocket stream ended");
                self.stream = None;
                Err(DepthFlowError::WebSocket("stream ended".to_string()))
            }
        }
    }

    /// Keepalive in the venue's request format.
    pub async fn ping(&mut self) -> Result<()> {
        self.send_text(json!({"method": "PING"}).to_string()).await
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}
