//! depthflow — venue depth replication and single-symbol market making
//!
//! Maintains a local order-book replica from MEXC's aggregated depth stream
//! (REST snapshot bootstrap + version-gated WebSocket deltas) and drives two
//! consumers from it: a quoting control loop and a terminal book viewer.

pub mod config;
pub mod display;
pub mod error;
pub mod latency;
pub mod orderbook;
pub mod parser;
pub mod rest;
pub mod strategy;
pub mod websocket;

pub use config::{Config, Credentials};
pub use error::{DepthFlowError, Result};
pub use latency::{LatencyStats, LatencyTracker};
pub use orderbook::{BookSnapshot, DepthManager, OrderBook, VersionGate};
pub use parser::{DepthFrame, PriceLevel, RestDepth};
pub use rest::{MexcRest, SpotRest};
pub use strategy::{MakerConfig, MarketMaker};
pub use websocket::{WebSocketManager, WsClient};
