//! WebSocket transport for the venue's public depth stream

mod client;
mod manager;

pub use client::WsClient;
pub use manager::WebSocketManager;

/// Aggregated depth channel name for a symbol (100ms cadence).
pub fn depth_channel(symbol: &str) -> String {
    format!("spot@public.aggre.depth.v3.api@100ms@{}", symbol.to_uppercase())
}
