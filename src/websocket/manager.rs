//! WebSocket connection manager
//!
//! Runs the depth stream with automatic reconnection and feeds decoded frames
//! into the depth manager. Every reconnect re-bootstraps the replica from a
//! fresh REST snapshot before resubscribing.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, error, info, warn};

use super::WsClient;
use crate::config::Config;
use crate::error::{DepthFlowError, Result};
use crate::orderbook::DepthManager;
use crate::parser::WsMessage;
use crate::rest::MexcRest;

/// Maximum backoff delay in milliseconds (60 seconds)
const MAX_BACKOFF_MS: u64 = 60_000;
/// Cooldown after which the reconnect counter resets (5 minutes)
const RECONNECT_COOLDOWN_SECS: u64 = 300;

/// Manages the depth WebSocket connection with automatic reconnection
pub struct WebSocketManager {
    depth: Arc<DepthManager>,
    rest: MexcRest,
    client: WsClient,
    config: Arc<Config>,
    reconnect_attempts: u32,
    last_successful_connection: Option<Instant>,
}

impl WebSocketManager {
    pub fn new(depth: Arc<DepthManager>, rest: MexcRest, config: Arc<Config>) -> Self {
        let client = WsClient::new(&config.ws_endpoint);
        Self {
            depth,
            rest,
            client,
            config,
            reconnect_attempts: 0,
            last_successful_connection: None,
        }
    }

    /// Run indefinitely with automatic reconnection.
    pub async fn run(&mut self) -> Result<()> {
        info!("starting WebSocket manager");

        let status_depth = self.depth.clone();
        tokio::spawn(async move {
            let mut status_interval = interval(Duration::from_secs(30));
            loop {
                status_interval.tick().await;
                let snapshot = status_depth.snapshot().await;
                if snapshot.last_update_id > 0 {
                    info!(
                        best_bid = %snapshot.best_bid,
                        best_ask = %snapshot.best_ask,
                        update_id = snapshot.last_update_id,
                        valid = snapshot.is_valid(),
                        latency = %status_depth.latency().stats(),
                        "replica status"
                    );
                }
            }
        });

        loop {
            if let Some(last_success) = self.last_successful_connection {
                if last_success.elapsed() > Duration::from_secs(RECONNECT_COOLDOWN_SECS)
                    && self.reconnect_attempts > 0
                {
                    info!(
                        previous_attempts = self.reconnect_attempts,
                        "resetting reconnect counter after cooldown"
                    );
                    self.reconnect_attempts = 0;
                }
            }

            match self.connect_and_process().await {
                Ok(()) => {
                    info!("WebSocket processing completed, reconnecting");
                    sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    error!(error = %e, "WebSocket error");
                    self.reconnect_attempts += 1;

                    let base_delay = self.config.reconnect_delay_ms
                        * 2u64.pow(self.reconnect_attempts.min(6));
                    let delay = Duration::from_millis(base_delay.min(MAX_BACKOFF_MS));

                    warn!(
                        attempt = self.reconnect_attempts,
                        delay_secs = delay.as_secs(),
                        "reconnecting after error"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn connect_and_process(&mut self) -> Result<()> {
        self.client.connect().await?;
        self.last_successful_connection = Some(Instant::now());
        self.reconnect_attempts = 0;

        // The old subscription died with the previous connection.
        self.depth.mark_unsubscribed();
        if !self.depth.subscribe(&mut self.client, Some(&self.rest)).await {
            return Err(DepthFlowError::WebSocket(
                "depth subscription refused".to_string(),
            ));
        }

        let mut last_message = Instant::now();
        let keepalive_timeout = Duration::from_secs(30);
        let recv_timeout = Duration::from_secs(45);

        loop {
            match timeout(recv_timeout, self.client.recv()).await {
                Ok(Ok(Some(msg))) => {
                    last_message = Instant::now();
                    match msg {
                        WsMessage::Depth(frame) => {
                            // Rejected frames are logged by the manager and
                            // never disturb the subscription.
                            let _ = self.depth.on_frame(&frame).await;
                        }
                        WsMessage::Ack { code, msg } if code == 0 => {
                            debug!(%msg, "acknowledged");
                        }
                        WsMessage::Ack { code, msg } => {
                            warn!(code, %msg, "venue rejected request");
                        }
                        WsMessage::Unknown => {}
                    }
                }
                Ok(Ok(None)) => {
                    if last_message.elapsed() > keepalive_timeout {
                        if let Err(e) = self.client.ping().await {
                            warn!(error = %e, "keepalive ping failed");
                        }
                    }
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(
                        last_message_secs = last_message.elapsed().as_secs(),
                        "no message within timeout, sending keepalive"
                    );
                    if let Err(e) = self.client.ping().await {
                        warn!(error = %e, "keepalive failed, reconnecting");
                        return Err(DepthFlowError::Timeout("websocket keepalive".into()));
                    }
                }
            }
        }
    }
}
