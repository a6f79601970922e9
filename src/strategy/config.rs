//! Market-maker configuration
//!
//! Defaults mirror the parameters the desk actually runs; any of them can be
//! overridden from the environment.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Quoting-loop parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MakerConfig {
    /// Trading symbol (base asset + quote asset, e.g. "SPYXUSDT")
    pub symbol: String,
    /// Quote asset of the pair
    pub quote_asset: String,
    /// Path of the append-only fill journal
    pub ledger_path: String,

    // === Sizing ===
    /// Quote budget per resting order
    pub quote_budget: Decimal,
    /// Smallest notional worth sending
    pub min_quote_order: Decimal,
    /// Base inventory floor kept out of quotes
    pub min_base_quantity: Decimal,
    pub quantity_increment: Decimal,
    pub quote_increment: Decimal,

    // === Pricing ===
    pub spread_bps: f64,
    pub min_edge_bps: f64,
    pub maker_fee: f64,
    pub taker_fee: f64,
    pub price_precision: u32,
    pub quantity_precision: u32,
    pub quote_precision: u32,

    // === Inventory ===
    /// Target base share of NAV (0.0 - 1.0)
    pub inventory_target: f64,
    pub inventory_tolerance: f64,
    pub max_inventory_ratio: f64,

    // === Escape ===
    pub escape_bps: f64,
    pub escape_hysteresis_bps: f64,
    pub min_escape_interval_ms: u64,
    pub taker_escape_cooldown_ms: u64,
    pub max_taker_escapes_per_min: u32,

    // === Risk ===
    pub max_drawdown_pct: f64,
    pub max_drawdown_usd: Decimal,
    pub risk_cooldown_ms: u64,

    // === Cadence ===
    pub refresh_interval_ms: u64,
    pub account_staleness_ms: i64,
    pub order_status_poll_ms: u64,
    pub order_status_timeout_ms: u64,
    pub fill_poll_interval_ms: u64,
    pub rate_limit_backoff_ms_initial: f64,
    pub rate_limit_backoff_ms_max: f64,
}

impl Default for MakerConfig {
    fn default() -> Self {
        Self {
            symbol: "SPYXUSDT".to_string(),
            quote_asset: "USDT".to_string(),
            ledger_path: "data/trade_ledger.jsonl".to_string(),

            quote_budget: dec!(10),
            min_quote_order: dec!(1),
            min_base_quantity: dec!(0.0005),
            quantity_increment: dec!(0.0001),
            quote_increment: dec!(0.01),

            spread_bps: 20.0,
            min_edge_bps: 5.0,
            maker_fee: 0.0,
            taker_fee: 0.0005,
            price_precision: 4,
            quantity_precision: 4,
            quote_precision: 2,

            inventory_target: 0.5,
            inventory_tolerance: 0.10,
            max_inventory_ratio: 0.8,

            escape_bps: 25.0,
            escape_hysteresis_bps: 5.0,
            min_escape_interval_ms: 1500,
            taker_escape_cooldown_ms: 5000,
            max_taker_escapes_per_min: 6,

            max_drawdown_pct: 0.2,
            max_drawdown_usd: dec!(10),
            risk_cooldown_ms: 60_000,

            refresh_interval_ms: 1000,
            account_staleness_ms: 2000,
            order_status_poll_ms: 200,
            order_status_timeout_ms: 2000,
            fill_poll_interval_ms: 2000,
            rate_limit_backoff_ms_initial: 750.0,
            rate_limit_backoff_ms_max: 10_000.0,
        }
    }
}

impl MakerConfig {
    /// Defaults for `symbol` with environment overrides applied.
    pub fn from_env(symbol: &str) -> Self {
        let mut config = Self {
            symbol: symbol.to_uppercase(),
            ..Self::default()
        };

        fn set<T: std::str::FromStr>(target: &mut T, var: &str) {
            if let Ok(value) = std::env::var(var) {
                if let Ok(parsed) = value.parse() {
                    *target = parsed;
                }
            }
        }

        set(&mut config.ledger_path, "LEDGER_PATH");
        set(&mut config.quote_budget, "QUOTE_BUDGET");
        set(&mut config.min_quote_order, "MIN_QUOTE_ORDER");
        set(&mut config.min_base_quantity, "MIN_BASE_QUANTITY");
        set(&mut config.spread_bps, "SPREAD_BPS");
        set(&mut config.min_edge_bps, "MIN_EDGE_BPS");
        set(&mut config.maker_fee, "MAKER_FEE");
        set(&mut config.taker_fee, "TAKER_FEE");
        set(&mut config.inventory_target, "INVENTORY_TARGET");
        set(&mut config.inventory_tolerance, "INVENTORY_TOLERANCE");
        set(&mut config.max_inventory_ratio, "MAX_INVENTORY_RATIO");
        set(&mut config.escape_bps, "ESCAPE_BPS");
        set(&mut config.max_drawdown_pct, "MAX_DRAWDOWN_PCT");
        set(&mut config.max_drawdown_usd, "MAX_DRAWDOWN_USD");
        set(&mut config.refresh_interval_ms, "REFRESH_INTERVAL_MS");
        set(&mut config.quantity_increment, "QUANTITY_INCREMENT");
        set(&mut config.quote_increment, "QUOTE_INCREMENT");
        set(&mut config.price_precision, "PRICE_PRECISION");
        set(&mut config.quantity_precision, "QUANTITY_PRECISION");
        set(&mut config.quote_precision, "QUOTE_PRECISION");

        config
    }

    /// Base asset implied by the symbol (the part before the quote asset).
    pub fn base_asset(&self) -> String {
        self.symbol
            .strip_suffix(&self.quote_asset)
            .unwrap_or(&self.symbol)
            .to_string()
    }
}
