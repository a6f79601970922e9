//! Core order book ladders
//!
//! Two `BTreeMap` ladders keyed by price: bids descending via `Reverse`, asks
//! ascending. Callers serialize access through a single reader/writer lock;
//! every method here works from one borrow and never re-enters.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::BTreeMap;

use super::BookSnapshot;
use crate::parser::PriceLevel;

/// Order book for a single symbol
#[derive(Debug)]
pub struct OrderBook {
    symbol: String,
    /// Bids sorted by price descending (highest first)
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    /// Asks sorted by price ascending (lowest first)
    asks: BTreeMap<Decimal, Decimal>,
    /// Highest update id applied so far
    last_update_id: i64,
    last_update_time: DateTime<Utc>,
}

impl OrderBook {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
            last_update_time: Utc::now(),
        }
    }

    /// Replace both ladders wholesale. Non-positive prices or quantities are
    /// dropped.
    pub fn apply_snapshot(&mut self, bids: &[PriceLevel], asks: &[PriceLevel], update_id: i64) {
        self.bids.clear();
        self.asks.clear();

        for level in bids {
            if level.price > Decimal::ZERO && level.quantity > Decimal::ZERO {
                self.bids.insert(Reverse(level.price), level.quantity);
            }
        }
        for level in asks {
            if level.price > Decimal::ZERO && level.quantity > Decimal::ZERO {
                self.asks.insert(level.price, level.quantity);
            }
        }

        self.last_update_id = update_id;
        self.last_update_time = Utc::now();
    }

    /// Apply absolute per-level deltas: zero quantity removes the level,
    /// anything else replaces it.
    pub fn apply_update(&mut self, bids: &[PriceLevel], asks: &[PriceLevel], update_id: i64) {
        for level in bids {
            if level.quantity <= Decimal::ZERO {
                self.bids.remove(&Reverse(level.price));
            } else if level.price > Decimal::ZERO {
                self.bids.insert(Reverse(level.price), level.quantity);
            }
        }
        for level in asks {
            if level.quantity <= Decimal::ZERO {
                self.asks.remove(&level.price);
            } else if level.price > Decimal::ZERO {
                self.asks.insert(level.price, level.quantity);
            }
        }

        self.last_update_id = update_id;
        self.last_update_time = Utc::now();
    }

    pub fn best_bid(&self) -> Decimal {
        self.bids
            .first_key_value()
            .map(|(Reverse(p), _)| *p)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn best_ask(&self) -> Decimal {
        self.asks
            .first_key_value()
            .map(|(p, _)| *p)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn spread(&self) -> Decimal {
        let bid = self.best_bid();
        let ask = self.best_ask();
        if bid > Decimal::ZERO && ask > bid {
            ask - bid
        } else {
            Decimal::ZERO
        }
    }

    /// Volume-weighted mid using each side's top-N notional as the opposite
    /// touch's weight. One-sided books yield the surviving touch, an empty
    /// book yields zero, and vanishing notional falls back to the arithmetic
    /// mid.
    pub fn microprice(&self, depth_levels: usize) -> Decimal {
        let best_bid = self.best_bid();
        let best_ask = self.best_ask();

        match (best_bid > Decimal::ZERO, best_ask > Decimal::ZERO) {
            (false, false) => return Decimal::ZERO,
            (true, false) => return best_bid,
            (false, true) => return best_ask,
            (true, true) => {}
        }

        let bid_volume = self.side_notional(true, depth_levels);
        let ask_volume = self.side_notional(false, depth_levels);
        let total = bid_volume + ask_volume;

        if bid_volume <= Decimal::ZERO || ask_volume <= Decimal::ZERO || total <= Decimal::ZERO {
            return (best_bid + best_ask) / Decimal::TWO;
        }

        best_bid * (ask_volume / total) + best_ask * (bid_volume / total)
    }

    /// Notional sum (price * qty) over the top `levels` of one side.
    pub fn side_notional(&self, is_bid: bool, levels: usize) -> Decimal {
        if is_bid {
            self.bids
                .iter()
                .take(levels)
                .map(|(Reverse(price), qty)| *price * *qty)
                .sum()
        } else {
            self.asks
                .iter()
                .take(levels)
                .map(|(price, qty)| *price * *qty)
                .sum()
        }
    }

    pub fn get_bids(&self, levels: usize) -> Vec<PriceLevel> {
        self.bids
            .iter()
            .take(levels)
            .map(|(Reverse(price), qty)| PriceLevel::new(*price, *qty))
            .collect()
    }

    pub fn get_asks(&self, levels: usize) -> Vec<PriceLevel> {
        self.asks
            .iter()
            .take(levels)
            .map(|(price, qty)| PriceLevel::new(*price, *qty))
            .collect()
    }

    /// Derive every aggregate from this one borrow.
    pub fn snapshot(&self, depth_levels: usize, include_full_depth: bool) -> BookSnapshot {
        let best_bid = self.best_bid();
        let best_ask = self.best_ask();

        let spread = if best_bid > Decimal::ZERO && best_ask > best_bid {
            best_ask - best_bid
        } else {
            Decimal::ZERO
        };

        BookSnapshot {
            symbol: self.symbol.clone(),
            best_bid,
            best_ask,
            spread,
            bid_volume: self.side_notional(true, depth_levels),
            ask_volume: self.side_notional(false, depth_levels),
            microprice: self.microprice(depth_levels),
            last_update_id: self.last_update_id,
            timestamp: self.last_update_time,
            bids: if include_full_depth {
                self.get_bids(depth_levels)
            } else {
                Vec::new()
            },
            asks: if include_full_depth {
                self.get_asks(depth_levels)
            } else {
                Vec::new()
            },
        }
    }

    /// Market view that skips levels at the caller's own resting prices, so a
    /// quoting loop does not react to its own orders. Prices match within
    /// 1e-6.
    pub fn snapshot_excluding(
        &self,
        exclude_bid_prices: &[Decimal],
        exclude_ask_prices: &[Decimal],
        depth_levels: usize,
    ) -> BookSnapshot {
        let tolerance = Decimal::new(1, 6);
        fn excluded(price: Decimal, excludes: &[Decimal], tolerance: Decimal) -> bool {
            excludes.iter().any(|e| (price - *e).abs() <= tolerance)
        }

        let mut snapshot = BookSnapshot::empty(&self.symbol);
        snapshot.last_update_id = self.last_update_id;
        snapshot.timestamp = self.last_update_time;

        for (Reverse(price), _) in &self.bids {
            if !excluded(*price, exclude_bid_prices, tolerance) {
                snapshot.best_bid = *price;
                break;
            }
        }
        for (price, _) in &self.asks {
            if !excluded(*price, exclude_ask_prices, tolerance) {
                snapshot.best_ask = *price;
                break;
            }
        }

        if snapshot.best_bid <= Decimal::ZERO || snapshot.best_ask <= Decimal::ZERO {
            snapshot.microprice = snapshot.best_bid.max(snapshot.best_ask);
            return snapshot;
        }

        snapshot.spread = snapshot.best_ask - snapshot.best_bid;

        let mut counted = 0usize;
        for (Reverse(price), qty) in &self.bids {
            if counted >= depth_levels {
                break;
            }
            if !excluded(*price, exclude_bid_prices, tolerance) {
                snapshot.bid_volume += *price * *qty;
                counted += 1;
            }
        }
        counted = 0;
        for (price, qty) in &self.asks {
            if counted >= depth_levels {
                break;
            }
            if !excluded(*price, exclude_ask_prices, tolerance) {
                snapshot.ask_volume += *price * *qty;
                counted += 1;
            }
        }

        let total = snapshot.bid_volume + snapshot.ask_volume;
        snapshot.microprice = if total > Decimal::ZERO {
            snapshot.best_bid * (snapshot.ask_volume / total)
                + snapshot.best_ask * (snapshot.bid_volume / total)
        } else {
            (snapshot.best_bid + snapshot.best_ask) / Decimal::TWO
        };

        snapshot
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        !self.bids.is_empty() && !self.asks.is_empty() && self.best_bid() < self.best_ask()
    }

    pub fn last_update_id(&self) -> i64 {
        self.last_update_id
    }

    pub fn last_update_time(&self) -> DateTime<Utc> {
        self.last_update_time
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_update_id = 0;
        self.last_update_time = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn level(price: Decimal, qty: Decimal) -> PriceLevel {
        PriceLevel::new(price, qty)
    }

    fn seeded_book() -> OrderBook {
        let mut book = OrderBook::new("SPYXUSDT");
        book.apply_snapshot(
            &[level(dec!(100), dec!(1)), level(dec!(99), dec!(2))],
            &[level(dec!(101), dec!(1)), level(dec!(102), dec!(2))],
            10,
        );
        book
    }

    #[test]
    fn test_snapshot_sets_update_id_and_validity() {
        let book = seeded_book();
        assert_eq!(book.last_update_id(), 10);
        assert!(book.is_valid());
        assert_eq!(book.best_bid(), dec!(100));
        assert_eq!(book.best_ask(), dec!(101));
        assert_eq!(book.spread(), dec!(1));
    }

    #[test]
    fn test_snapshot_drops_nonpositive_levels() {
        let mut book = OrderBook::new("SPYXUSDT");
        book.apply_snapshot(
            &[level(dec!(100), dec!(0)), level(dec!(0), dec!(5)), level(dec!(99), dec!(1))],
            &[level(dec!(101), dec!(1))],
            5,
        );
        assert_eq!(book.get_bids(10).len(), 1);
        assert_eq!(book.best_bid(), dec!(99));
    }

    #[test]
    fn test_snapshot_is_idempotent() {
        let mut book = seeded_book();
        let before = book.snapshot(10, true);
        book.apply_snapshot(
            &[level(dec!(100), dec!(1)), level(dec!(99), dec!(2))],
            &[level(dec!(101), dec!(1)), level(dec!(102), dec!(2))],
            10,
        );
        let after = book.snapshot(10, true);
        assert_eq!(before.best_bid, after.best_bid);
        assert_eq!(before.bids, after.bids);
        assert_eq!(before.asks, after.asks);
        assert_eq!(before.last_update_id, after.last_update_id);
    }

    #[test]
    fn test_update_inserts_replaces_and_removes() {
        let mut book = seeded_book();
        book.apply_update(
            &[level(dec!(100), dec!(0.5)), level(dec!(98), dec!(3))],
            &[level(dec!(101), dec!(0))],
            12,
        );
        assert_eq!(book.last_update_id(), 12);
        let bids = book.get_bids(10);
        assert_eq!(bids[0], level(dec!(100), dec!(0.5)));
        assert_eq!(bids[2], level(dec!(98), dec!(3)));
        assert_eq!(book.best_ask(), dec!(102));
    }

    #[test]
    fn test_update_is_idempotent_modulo_id() {
        let mut book = seeded_book();
        let deltas = [level(dec!(100), dec!(0.5))];
        book.apply_update(&deltas, &[], 11);
        let first = book.snapshot(10, true);
        book.apply_update(&deltas, &[], 12);
        let second = book.snapshot(10, true);
        assert_eq!(first.bids, second.bids);
        assert_eq!(first.asks, second.asks);
        assert_eq!(second.last_update_id, 12);
    }

    #[test]
    fn test_crossed_book_is_invalid() {
        let mut book = OrderBook::new("SPYXUSDT");
        book.apply_snapshot(
            &[level(dec!(102), dec!(1))],
            &[level(dec!(101), dec!(1))],
            1,
        );
        assert!(!book.is_valid());
        assert_eq!(book.spread(), Decimal::ZERO);
    }

    #[test]
    fn test_microprice_weighting() {
        let book = seeded_book();
        // bid notional = 100*1 + 99*2 = 298, ask notional = 101*1 + 102*2 = 305
        let expected = dec!(100) * (dec!(305) / dec!(603)) + dec!(101) * (dec!(298) / dec!(603));
        assert_eq!(book.microprice(5), expected);
    }

    #[test]
    fn test_microprice_one_side_empty() {
        let mut book = OrderBook::new("SPYXUSDT");
        book.apply_update(&[level(dec!(100), dec!(1))], &[], 1);
        assert_eq!(book.microprice(5), dec!(100));

        let mut book = OrderBook::new("SPYXUSDT");
        book.apply_update(&[], &[level(dec!(101), dec!(1))], 1);
        assert_eq!(book.microprice(5), dec!(101));
    }

    #[test]
    fn test_microprice_empty_book() {
        let book = OrderBook::new("SPYXUSDT");
        assert_eq!(book.microprice(5), Decimal::ZERO);
    }

    #[test]
    fn test_snapshot_ladders_match_getters() {
        let book = seeded_book();
        let snapshot = book.snapshot(2, true);
        assert_eq!(snapshot.bids, book.get_bids(2));
        assert_eq!(snapshot.asks, book.get_asks(2));
        assert_eq!(snapshot.bid_volume, book.side_notional(true, 2));
        assert_eq!(snapshot.ask_volume, book.side_notional(false, 2));
    }

    #[test]
    fn test_snapshot_excluding_own_quotes() {
        let book = seeded_book();
        let view = book.snapshot_excluding(&[dec!(100)], &[], 5);
        assert_eq!(view.best_bid, dec!(99));
        assert_eq!(view.best_ask, dec!(101));
        // excluded level's notional is gone from the bid volume
        assert_eq!(view.bid_volume, dec!(198));
        assert_eq!(view.ask_volume, dec!(305));
    }

    #[test]
    fn test_snapshot_excluding_tolerates_near_prices() {
        let book = seeded_book();
        let view = book.snapshot_excluding(&[dec!(100.0000005)], &[], 5);
        assert_eq!(view.best_bid, dec!(99));
    }

    #[test]
    fn test_clear_resets_state() {
        let mut book = seeded_book();
        book.clear();
        assert!(book.is_empty());
        assert_eq!(book.last_update_id(), 0);
        assert_eq!(book.best_bid(), Decimal::ZERO);
    }
}
