//! Quoting math
//!
//! Pure helpers for the pricing pipeline: target spread, skew from book
//! imbalance and inventory deviation, price rounding, size flooring, and the
//! venue filter validation. Money stays `Decimal`; dimensionless factors are
//! `f64`.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::rest::SymbolFilters;

const BASIS_POINT: f64 = 1e-4;
/// Target spread bounds: 5 bps to 200 bps.
const MIN_SPREAD_FRACTION: f64 = 0.0005;
const MAX_SPREAD_FRACTION: f64 = 0.02;

/// Half-spread pricing for both quotes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotePair {
    pub buy: Decimal,
    pub sell: Decimal,
}

/// Target spread fraction: at least the configured spread, widened to half
/// the observed book spread, clamped to [5, 200] bps.
pub fn target_spread_fraction(spread_bps: f64, spread: Decimal, microprice: Decimal) -> f64 {
    let book_fraction = if spread > Decimal::ZERO && microprice > Decimal::ZERO {
        (spread / microprice).to_f64().unwrap_or(0.0)
    } else {
        0.0
    };
    (spread_bps * BASIS_POINT)
        .max(book_fraction * 0.5)
        .clamp(MIN_SPREAD_FRACTION, MAX_SPREAD_FRACTION)
}

/// Minimum edge worth quoting: configured floor or fees plus 2 bps.
pub fn min_edge_fraction(min_edge_bps: f64, maker_fee: f64) -> f64 {
    (min_edge_bps * BASIS_POINT).max(2.0 * maker_fee + 0.0002)
}

/// `(bid_vol - ask_vol) / (bid_vol + ask_vol)` over the depth window.
pub fn book_imbalance(bid_volume: Decimal, ask_volume: Decimal) -> f64 {
    let total = bid_volume + ask_volume;
    if total <= Decimal::ZERO {
        return 0.0;
    }
    ((bid_volume - ask_volume) / total).to_f64().unwrap_or(0.0)
}

/// How far the base share sits from target, in tolerance units.
pub fn inventory_deviation(base_share: f64, target: f64, tolerance: f64) -> f64 {
    if tolerance <= 0.0 {
        return 0.0;
    }
    (base_share - target) / tolerance
}

/// Net skew: lean with the book, against the inventory.
pub fn skew_bias(book_imbalance: f64, inventory_deviation: f64) -> f64 {
    (0.5 * book_imbalance - inventory_deviation).clamp(-1.0, 1.0)
}

/// Both quote prices around the microprice, floored to the price precision.
/// `None` when rounding collapses or crosses the pair.
pub fn quote_prices(
    microprice: Decimal,
    spread_fraction: f64,
    skew: f64,
    price_precision: u32,
) -> Option<QuotePair> {
    let buy_factor = 1.0 - spread_fraction / 2.0 - 0.25 * skew * spread_fraction;
    let sell_factor = 1.0 + spread_fraction / 2.0 + 0.25 * skew * spread_fraction;

    let buy = round_down(microprice * Decimal::from_f64(buy_factor)?, price_precision);
    let sell = round_down(microprice * Decimal::from_f64(sell_factor)?, price_precision);

    if buy <= Decimal::ZERO || sell <= Decimal::ZERO || buy >= sell {
        return None;
    }
    Some(QuotePair { buy, sell })
}

/// Truncate toward zero at `precision` decimal places.
pub fn round_down(value: Decimal, precision: u32) -> Decimal {
    value.round_dp_with_strategy(precision, RoundingStrategy::ToZero)
}

/// Floor to a multiple of `increment`; zero/negative increments pass the
/// value through.
pub fn floor_to_increment(value: Decimal, increment: Decimal) -> Decimal {
    if increment <= Decimal::ZERO || value <= Decimal::ZERO {
        return value.max(Decimal::ZERO);
    }
    (value / increment).floor() * increment
}

/// Whether `value` sits on the increment grid (within rounding noise).
pub fn within_increment(value: Decimal, increment: Decimal) -> bool {
    if increment <= Decimal::ZERO {
        return true;
    }
    let steps = value / increment;
    (steps - steps.round()).abs() < Decimal::new(1, 6)
}

/// Validate an order against the venue's declared filters. Zero-valued
/// arguments skip their check (market orders have no price).
pub fn validate_filters(
    filters: Option<&SymbolFilters>,
    price: Decimal,
    quantity: Decimal,
    notional: Decimal,
) -> Result<(), String> {
    let Some(filters) = filters else {
        return Ok(());
    };

    if price > Decimal::ZERO && filters.tick_size > Decimal::ZERO {
        if filters.min_price > Decimal::ZERO && price < filters.min_price {
            return Err(format!("price {price} below minimum {}", filters.min_price));
        }
        if !within_increment(price, filters.tick_size) {
            return Err(format!(
                "price {price} not aligned to tick size {}",
                filters.tick_size
            ));
        }
    }

    if quantity > Decimal::ZERO && filters.step_size > Decimal::ZERO {
        if filters.min_qty > Decimal::ZERO && quantity < filters.min_qty {
            return Err(format!(
                "quantity {quantity} below minimum {}",
                filters.min_qty
            ));
        }
        if !within_increment(quantity, filters.step_size) {
            return Err(format!(
                "quantity {quantity} not aligned to step size {}",
                filters.step_size
            ));
        }
    }

    if notional > Decimal::ZERO
        && filters.min_notional > Decimal::ZERO
        && notional < filters.min_notional
    {
        return Err(format!(
            "notional {notional} below minimum {}",
            filters.min_notional
        ));
    }

    Ok(())
}

/// Decimal places implied by an increment such as 0.001.
pub fn precision_from_increment(increment: Decimal) -> u32 {
    if increment <= Decimal::ZERO {
        return 0;
    }
    increment.normalize().scale().min(8)
}
