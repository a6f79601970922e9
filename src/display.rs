//! Terminal rendering for the book viewer
//!
//! Formats a snapshot as a two-sided ladder with the latency line underneath.
//! When the book is invalid the ladder still renders, under a prominent
//! banner naming the problem.

use rust_decimal::Decimal;

use crate::latency::LatencyStats;
use crate::orderbook::BookSnapshot;

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

/// Renders snapshots to stdout
pub struct BookDisplay {
    symbol: String,
    levels: usize,
}

impl BookDisplay {
    pub fn new(symbol: &str, levels: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            levels: levels.max(1),
        }
    }

    pub fn render(&self, snapshot: &BookSnapshot, latency: &LatencyStats) {
        print!("{}", self.format(snapshot, latency));
    }

    /// Build the full frame as a string (separated from I/O for testing).
    pub fn format(&self, snapshot: &BookSnapshot, latency: &LatencyStats) -> String {
        let mut out = String::with_capacity(1024);
        out.push_str(CLEAR_SCREEN);

        out.push_str(&format!(
            "  {} order book  (update {})\n",
            self.symbol, snapshot.last_update_id
        ));

        if let Some(reason) = snapshot.diagnosis() {
            out.push_str(&format!("  !! BOOK INVALID: {reason} !!\n"));
        }

        out.push_str("\n        PRICE         QTY\n");

        let asks: Vec<_> = snapshot.asks.iter().take(self.levels).collect();
        for level in asks.iter().rev() {
            out.push_str(&format!(
                "  ask {:>12} {:>11}\n",
                format_price(level.price),
                level.quantity
            ));
        }

        if snapshot.spread > Decimal::ZERO {
            out.push_str(&format!(
                "  ---- spread {} ({} / {}) ----\n",
                snapshot.spread,
                format_price(snapshot.best_bid),
                format_price(snapshot.best_ask)
            ));
        } else {
            out.push_str("  ---- spread n/a ----\n");
        }

        for level in snapshot.bids.iter().take(self.levels) {
            out.push_str(&format!(
                "  bid {:>12} {:>11}\n",
                format_price(level.price),
                level.quantity
            ));
        }

        out.push_str(&format!(
            "\n  microprice {}   bid notional {}   ask notional {}\n",
            format_price(snapshot.microprice),
            snapshot.bid_volume.round_dp(2),
            snapshot.ask_volume.round_dp(2)
        ));
        out.push_str(&format!("  latency: {latency}\n"));

        out
    }
}

fn format_price(price: Decimal) -> String {
    if price > Decimal::ZERO {
        price.to_string()
    } else {
        "-".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::PriceLevel;
    use rust_decimal_macros::dec;

    #[test]
    fn test_invalid_book_shows_banner() {
        let display = BookDisplay::new("SPYXUSDT", 5);
        let mut snapshot = BookSnapshot::empty("SPYXUSDT");
        snapshot.bids = vec![PriceLevel::new(dec!(1.30), dec!(2))];
        snapshot.best_bid = dec!(1.30);

        let frame = display.format(&snapshot, &LatencyStats::default());
        assert!(frame.contains("BOOK INVALID"));
        assert!(frame.contains("empty asks"));
        assert!(frame.contains("1.30"));
    }

    #[test]
    fn test_valid_book_renders_both_sides() {
        let display = BookDisplay::new("SPYXUSDT", 5);
        let mut snapshot = BookSnapshot::empty("SPYXUSDT");
        snapshot.best_bid = dec!(1.30);
        snapshot.best_ask = dec!(1.31);
        snapshot.spread = dec!(0.01);
        snapshot.bids = vec![PriceLevel::new(dec!(1.30), dec!(2))];
        snapshot.asks = vec![PriceLevel::new(dec!(1.31), dec!(3))];

        let frame = display.format(&snapshot, &LatencyStats::default());
        assert!(!frame.contains("BOOK INVALID"));
        assert!(frame.contains("spread 0.01"));
    }
}
