//! Quoter-side domain types
//!
//! The market view built here is the "market excluding self" picture: resting
//! quotes owned by the loop are skipped so it never reacts to its own prices.

use rust_decimal::Decimal;

use crate::parser::RestDepth;
use crate::rest::{OrderReport, OrderSide};

/// Depth window used for volumes and imbalance.
const DEPTH_LEVELS: usize = 5;

/// One of the loop's resting quotes
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingOrder {
    pub client_id: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Account balances for the traded pair
#[derive(Debug, Clone, Copy, Default)]
pub struct Balances {
    pub base_free: Decimal,
    pub base_locked: Decimal,
    pub quote_free: Decimal,
    pub quote_locked: Decimal,
    /// Venue timestamp of the snapshot, epoch millis
    pub updated_at_ms: i64,
}

impl Balances {
    pub fn total_base(&self) -> Decimal {
        self.base_free + self.base_locked
    }

    pub fn total_quote(&self) -> Decimal {
        self.quote_free + self.quote_locked
    }
}

/// Depth-5 market view with the loop's own quotes excluded
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketView {
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub spread: Decimal,
    pub bid_volume: Decimal,
    pub ask_volume: Decimal,
    pub microprice: Decimal,
    pub last_update_id: i64,
}

impl MarketView {
    /// Build the ex-self view from a REST depth response.
    pub fn from_depth(
        depth: &RestDepth,
        buy_order: Option<&WorkingOrder>,
        sell_order: Option<&WorkingOrder>,
    ) -> Self {
        let tolerance = Decimal::new(1, 6);
        fn matches_own(price: Decimal, own: Option<&WorkingOrder>, tolerance: Decimal) -> bool {
            own.is_some_and(|o| (price - o.price).abs() <= tolerance)
        }

        let mut view = MarketView {
            last_update_id: depth.last_update_id,
            ..Default::default()
        };

        let mut counted = 0usize;
        for level in &depth.bids {
            if matches_own(level.price, buy_order, tolerance) {
                continue;
            }
            if view.best_bid <= Decimal::ZERO {
                view.best_bid = level.price;
            }
            if counted < DEPTH_LEVELS {
                view.bid_volume += level.price * level.quantity;
                counted += 1;
            }
        }

        counted = 0;
        for level in &depth.asks {
            if matches_own(level.price, sell_order, tolerance) {
                continue;
            }
            if view.best_ask <= Decimal::ZERO {
                view.best_ask = level.price;
            }
            if counted < DEPTH_LEVELS {
                view.ask_volume += level.price * level.quantity;
                counted += 1;
            }
        }

        if view.best_bid > Decimal::ZERO && view.best_ask > Decimal::ZERO {
            view.spread = view.best_ask - view.best_bid;
        }

        // Microprice weights the touches by the opposite touch quantity, with
        // any of our own size at the touch netted out.
        fn touch_qty(
            levels: &[crate::parser::PriceLevel],
            best: Decimal,
            own: Option<&WorkingOrder>,
            tolerance: Decimal,
        ) -> Decimal {
            if best <= Decimal::ZERO {
                return Decimal::ZERO;
            }
            for level in levels {
                if (level.price - best).abs() <= tolerance {
                    let mut qty = level.quantity;
                    if let Some(own) = own {
                        if (level.price - own.price).abs() <= tolerance {
                            qty = (qty - own.quantity).max(Decimal::ZERO);
                        }
                    }
                    return qty;
                }
            }
            Decimal::ZERO
        }

        let bid_qty = touch_qty(&depth.bids, view.best_bid, buy_order, tolerance);
        let ask_qty = touch_qty(&depth.asks, view.best_ask, sell_order, tolerance);

        view.microprice = if view.best_bid > Decimal::ZERO && view.best_ask > Decimal::ZERO {
            let denom = bid_qty + ask_qty;
            if denom > Decimal::ZERO {
                (view.best_bid * ask_qty + view.best_ask * bid_qty) / denom
            } else {
                (view.best_bid + view.best_ask) / Decimal::TWO
            }
        } else {
            view.best_bid.max(view.best_ask)
        };

        view
    }

    /// Price everything is marked at: microprice when usable, else the best
    /// surviving touch.
    pub fn mark(&self) -> Decimal {
        if self.microprice > Decimal::ZERO {
            self.microprice
        } else {
            self.best_bid.max(self.best_ask)
        }
    }
}

/// Pick the loop's resting orders out of the venue's open-order list: the
/// best-priced order per side with meaningful remaining size.
pub fn select_working_orders(
    open_orders: &[OrderReport],
    min_base_quantity: Decimal,
) -> (Option<WorkingOrder>, Option<WorkingOrder>) {
    let mut buy: Option<WorkingOrder> = None;
    let mut sell: Option<WorkingOrder> = None;

    for entry in open_orders {
        let remaining = entry.remaining_qty();
        if entry.client_order_id.is_empty()
            || entry.price <= Decimal::ZERO
            || remaining < min_base_quantity
        {
            continue;
        }

        let order = |side| WorkingOrder {
            client_id: entry.client_order_id.clone(),
            side,
            price: entry.price,
            quantity: remaining,
        };

        match entry.side.as_str() {
            "BUY" => {
                if buy.as_ref().is_none_or(|b| entry.price > b.price) {
                    buy = Some(order(OrderSide::Buy));
                }
            }
            "SELL" => {
                if sell.as_ref().is_none_or(|s| entry.price < s.price) {
                    sell = Some(order(OrderSide::Sell));
                }
            }
            _ => {}
        }
    }

    (buy, sell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::PriceLevel;
    use rust_decimal_macros::dec;

    fn depth() -> RestDepth {
        RestDepth {
            last_update_id: 50,
            bids: vec![
                PriceLevel::new(dec!(1.30), dec!(10)),
                PriceLevel::new(dec!(1.29), dec!(5)),
                PriceLevel::new(dec!(1.28), dec!(5)),
            ],
            asks: vec![
                PriceLevel::new(dec!(1.32), dec!(4)),
                PriceLevel::new(dec!(1.33), dec!(6)),
            ],
        }
    }

    fn working(side: OrderSide, price: Decimal, qty: Decimal) -> WorkingOrder {
        WorkingOrder {
            client_id: "X".to_string(),
            side,
            price,
            quantity: qty,
        }
    }

    #[test]
    fn test_view_without_own_orders() {
        let view = MarketView::from_depth(&depth(), None, None);
        assert_eq!(view.best_bid, dec!(1.30));
        assert_eq!(view.best_ask, dec!(1.32));
        assert_eq!(view.spread, dec!(0.02));
        assert_eq!(view.last_update_id, 50);
        // microprice = (1.30*4 + 1.32*10) / 14
        assert_eq!(
            view.microprice,
            (dec!(1.30) * dec!(4) + dec!(1.32) * dec!(10)) / dec!(14)
        );
    }

    #[test]
    fn test_view_excludes_own_best_bid() {
        let own = working(OrderSide::Buy, dec!(1.30), dec!(10));
        let view = MarketView::from_depth(&depth(), Some(&own), None);
        assert_eq!(view.best_bid, dec!(1.29));
        // the excluded level's notional is gone
        assert_eq!(
            view.bid_volume,
            dec!(1.29) * dec!(5) + dec!(1.28) * dec!(5)
        );
    }

    #[test]
    fn test_touch_quantity_nets_partial_own_size() {
        // our order sits at the touch but is smaller than the level
        let own = working(OrderSide::Sell, dec!(1.32), dec!(4));
        let view = MarketView::from_depth(&depth(), None, Some(&own));
        // level fully ours: ask touch moves to 1.33
        assert_eq!(view.best_ask, dec!(1.33));

        let own = working(OrderSide::Sell, dec!(1.33), dec!(2));
        let view = MarketView::from_depth(&depth(), None, Some(&own));
        assert_eq!(view.best_ask, dec!(1.32));
        // ask touch qty unchanged, bid touch qty unchanged
        assert!(view.microprice > view.best_bid && view.microprice < view.best_ask);
    }

    #[test]
    fn test_one_sided_view_marks_at_surviving_touch() {
        let one_sided = RestDepth {
            last_update_id: 1,
            bids: vec![PriceLevel::new(dec!(1.30), dec!(10))],
            asks: vec![],
        };
        let view = MarketView::from_depth(&one_sided, None, None);
        assert_eq!(view.microprice, dec!(1.30));
        assert_eq!(view.mark(), dec!(1.30));
        assert_eq!(view.spread, Decimal::ZERO);
    }

    #[test]
    fn test_select_working_orders_prefers_best_price() {
        let report = |id: &str, side: &str, price: Decimal, orig: Decimal| OrderReport {
            client_order_id: id.to_string(),
            side: side.to_string(),
            price,
            orig_qty: orig,
            executed_qty: Decimal::ZERO,
            status: "NEW".to_string(),
        };

        let open = vec![
            report("b1", "BUY", dec!(1.28), dec!(5)),
            report("b2", "BUY", dec!(1.29), dec!(5)),
            report("s1", "SELL", dec!(1.33), dec!(5)),
            report("s2", "SELL", dec!(1.32), dec!(5)),
            report("dust", "SELL", dec!(1.31), dec!(0.0001)),
        ];

        let (buy, sell) = select_working_orders(&open, dec!(0.001));
        assert_eq!(buy.unwrap().client_id, "b2");
        assert_eq!(sell.unwrap().client_id, "s2");
    }
}
