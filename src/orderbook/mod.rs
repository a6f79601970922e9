//! Order book replica
//!
//! Maintains synchronized book state from the venue's aggregated depth stream
//! and REST snapshots, with a continuity gate over the delta versions.

mod book;
mod manager;
mod version;

pub use book::OrderBook;
pub use manager::{DepthManager, UpdateSink};
pub use version::{FrameKind, GateOutcome, GateReject, VersionGate};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::parser::PriceLevel;

/// Immutable view of the book at one update
///
/// `bids`/`asks` are truncated ladder copies, present only when the snapshot
/// was taken with full depth. Volumes are notional sums over the top levels.
#[derive(Debug, Clone)]
pub struct BookSnapshot {
    pub symbol: String,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub spread: Decimal,
    pub bid_volume: Decimal,
    pub ask_volume: Decimal,
    pub microprice: Decimal,
    pub last_update_id: i64,
    pub timestamp: DateTime<Utc>,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl BookSnapshot {
    pub fn empty(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            best_bid: Decimal::ZERO,
            best_ask: Decimal::ZERO,
            spread: Decimal::ZERO,
            bid_volume: Decimal::ZERO,
            ask_volume: Decimal::ZERO,
            microprice: Decimal::ZERO,
            last_update_id: 0,
            timestamp: Utc::now(),
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    /// Both touches present and uncrossed.
    pub fn is_valid(&self) -> bool {
        self.best_bid > Decimal::ZERO
            && self.best_ask > Decimal::ZERO
            && self.best_bid < self.best_ask
    }

    /// Human-readable reason when the snapshot is not valid.
    pub fn diagnosis(&self) -> Option<&'static str> {
        if self.is_valid() {
            return None;
        }
        if self.best_bid <= Decimal::ZERO && self.best_ask <= Decimal::ZERO {
            Some("empty book")
        } else if self.best_bid <= Decimal::ZERO {
            Some("empty bids")
        } else if self.best_ask <= Decimal::ZERO {
            Some("empty asks")
        } else {
            Some("crossed book")
        }
    }
}
