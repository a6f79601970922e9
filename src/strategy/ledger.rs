//! Append-only fill journal and position accumulator
//!
//! Fixed-point accounting: base and quote amounts are i64 units scaled by
//! powers of ten derived from the symbol's precisions. One JSON record per
//! line; a reload replays the journal and must land on exactly the state the
//! live accumulator reached.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use tracing::warn;

use crate::error::{DepthFlowError, Result};

/// Hard cap on quote-unit magnitudes (position cost, realized PnL).
const QUOTE_CAPACITY_LIMIT: i64 = 1_000_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// One fill in scaled integer units
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFill {
    pub id: i64,
    /// Fill time, epoch millis
    #[serde(rename = "time")]
    pub time_ms: i64,
    pub side: TradeSide,
    #[serde(rename = "base")]
    pub base_qty: i64,
    #[serde(rename = "quote")]
    pub quote_qty: i64,
    #[serde(rename = "feeQty", default)]
    pub fee_qty: i64,
    #[serde(rename = "feeAsset", default)]
    pub fee_asset: String,
    #[serde(rename = "isMaker", default)]
    pub is_maker: bool,
}

/// Accumulated position state in scaled integer units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerState {
    pub position_base: i64,
    /// Quote units paid for the current position
    pub position_cost: i64,
    pub realized_pnl: i64,
    pub last_trade_id: i64,
}

/// Journal location and unit scales
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub storage_path: PathBuf,
    pub base_scale: i64,
    pub quote_scale: i64,
    pub base_asset: String,
    pub quote_asset: String,
}

/// Append-only trade ledger
#[derive(Debug)]
pub struct TradeLedger {
    config: LedgerConfig,
    state: LedgerState,
}

impl TradeLedger {
    pub fn new(config: LedgerConfig) -> Result<Self> {
        if config.base_scale <= 0 || config.quote_scale <= 0 {
            return Err(DepthFlowError::Config(
                "ledger scales must be positive".to_string(),
            ));
        }
        if config.storage_path.as_os_str().is_empty() {
            return Err(DepthFlowError::Config(
                "ledger storage path not set".to_string(),
            ));
        }
        Ok(Self {
            config,
            state: LedgerState::default(),
        })
    }

    pub fn state(&self) -> LedgerState {
        self.state
    }

    pub fn base_scale(&self) -> i64 {
        self.config.base_scale
    }

    pub fn quote_scale(&self) -> i64 {
        self.config.quote_scale
    }

    /// Convert scaled base units to a Decimal quantity.
    pub fn base_to_decimal(&self, units: i64) -> Decimal {
        Decimal::from(units) / Decimal::from(self.config.base_scale)
    }

    /// Convert scaled quote units to a Decimal amount.
    pub fn quote_to_decimal(&self, units: i64) -> Decimal {
        Decimal::from(units) / Decimal::from(self.config.quote_scale)
    }

    /// Replay the journal into a fresh state. Malformed lines are skipped;
    /// entries replay in id order regardless of file order.
    pub fn load(&mut self) -> Result<LedgerState> {
        self.state = LedgerState::default();

        let file = match File::open(&self.config.storage_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(self.state),
            Err(e) => return Err(e.into()),
        };

        let mut fills: Vec<TradeFill> = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TradeFill>(&line) {
                Ok(fill) => fills.push(fill),
                Err(e) => warn!(error = %e, "skipping malformed ledger record"),
            }
        }

        fills.sort_by_key(|fill| fill.id);
        for fill in &fills {
            self.apply_fill(fill)?;
        }

        Ok(self.state)
    }

    /// Persist one fill then fold it into the running state.
    pub fn append(&mut self, fill: &TradeFill) -> Result<()> {
        self.persist(fill)?;
        self.apply_fill(fill)
    }

    fn persist(&self, fill: &TradeFill) -> Result<()> {
        if let Some(dir) = self.config.storage_path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.storage_path)?;
        let record = serde_json::to_string(fill)?;
        writeln!(file, "{record}")?;
        Ok(())
    }

    /// The fee nets into the leg it was charged in: base fees shrink the base
    /// quantity, quote fees shrink the quote amount.
    fn effective_amounts(&self, fill: &TradeFill) -> (i64, i64) {
        let mut base = fill.base_qty;
        let mut quote = fill.quote_qty;
        if fill.fee_qty > 0 {
            if fill.fee_asset == self.config.base_asset {
                base = (base - fill.fee_qty).max(0);
            } else if fill.fee_asset == self.config.quote_asset {
                quote = (quote - fill.fee_qty).max(0);
            }
        }
        (base, quote)
    }

    fn apply_fill(&mut self, fill: &TradeFill) -> Result<()> {
        let (base, quote) = self.effective_amounts(fill);

        match fill.side {
            TradeSide::Buy => {
                self.state.position_base = safe_add(self.state.position_base, base)?;
                self.state.position_cost = safe_add(self.state.position_cost, quote)?;
            }
            TradeSide::Sell => {
                let mut remaining = base;
                while remaining > 0 && self.state.position_base > 0 {
                    let avg_cost = self.state.position_cost as f64
                        / self.state.position_base.max(1) as f64;
                    let matched = self.state.position_base.min(remaining);
                    let cost_reduction = (avg_cost * matched as f64).round() as i64;
                    let fill_ratio = matched as f64 / base.max(1) as f64;
                    let proceeds = (quote as f64 * fill_ratio).round() as i64;

                    self.state.position_base -= matched;
                    self.state.position_cost =
                        (self.state.position_cost - cost_reduction).max(0);
                    self.state.realized_pnl =
                        safe_add(self.state.realized_pnl, proceeds - cost_reduction)?;

                    remaining -= matched;
                }
                if remaining > 0 {
                    warn!(
                        trade_id = fill.id,
                        residual_base_units = remaining,
                        "sell exceeds tracked position; absorbing residual"
                    );
                }
            }
        }

        self.state.last_trade_id = self.state.last_trade_id.max(fill.id);
        self.state.realized_pnl = self
            .state
            .realized_pnl
            .clamp(-QUOTE_CAPACITY_LIMIT, QUOTE_CAPACITY_LIMIT);
        Ok(())
    }
}

/// Scale a Decimal into integer units, rounding to nearest.
pub fn to_units(value: Decimal, scale: i64) -> Result<i64> {
    (value * Decimal::from(scale))
        .round()
        .to_i64()
        .ok_or(DepthFlowError::Overflow)
}

fn safe_add(lhs: i64, rhs: i64) -> Result<i64> {
    lhs.checked_add(rhs).ok_or(DepthFlowError::Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_ledger(dir: &std::path::Path) -> TradeLedger {
        TradeLedger::new(LedgerConfig {
            storage_path: dir.join("fills.jsonl"),
            base_scale: 10_000,
            quote_scale: 100,
            base_asset: "SPYX".to_string(),
            quote_asset: "USDT".to_string(),
        })
        .unwrap()
    }

    fn fill(id: i64, side: TradeSide, base: i64, quote: i64) -> TradeFill {
        TradeFill {
            id,
            time_ms: 1_700_000_000_000 + id,
            side,
            base_qty: base,
            quote_qty: quote,
            fee_qty: 0,
            fee_asset: String::new(),
            is_maker: true,
        }
    }

    #[test]
    fn test_buy_then_partial_sell_with_quote_fee() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = test_ledger(dir.path());

        ledger
            .append(&fill(1, TradeSide::Buy, 10_000, 100_000))
            .unwrap();

        let mut sell = fill(2, TradeSide::Sell, 4_000, 44_000);
        sell.fee_qty = 44;
        sell.fee_asset = "USDT".to_string();
        ledger.append(&sell).unwrap();

        let state = ledger.state();
        assert_eq!(state.position_base, 6_000);
        assert_eq!(state.position_cost, 60_000);
        // (44000 - 44) - round(10 * 4000)
        assert_eq!(state.realized_pnl, 3_956);
        assert_eq!(state.last_trade_id, 2);
    }

    #[test]
    fn test_reload_replays_to_identical_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = test_ledger(dir.path());

        ledger
            .append(&fill(1, TradeSide::Buy, 5_000, 52_000))
            .unwrap();
        ledger
            .append(&fill(2, TradeSide::Buy, 2_500, 27_000))
            .unwrap();
        let mut sell = fill(3, TradeSide::Sell, 6_000, 66_000);
        sell.fee_qty = 66;
        sell.fee_asset = "USDT".to_string();
        ledger.append(&sell).unwrap();
        let live = ledger.state();

        let mut replayed = test_ledger(dir.path());
        assert_eq!(replayed.load().unwrap(), live);
    }

    #[test]
    fn test_load_sorts_by_id_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fills.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"id\":2,\"time\":2,\"side\":\"SELL\",\"base\":1000,\"quote\":12000,\"feeQty\":0,\"feeAsset\":\"\",\"isMaker\":true}\n",
                "not json at all\n",
                "{\"id\":1,\"time\":1,\"side\":\"BUY\",\"base\":2000,\"quote\":20000,\"feeQty\":0,\"feeAsset\":\"\",\"isMaker\":true}\n",
            ),
        )
        .unwrap();

        let mut ledger = test_ledger(dir.path());
        let state = ledger.load().unwrap();
        // buy replays before the sell despite file order
        assert_eq!(state.position_base, 1_000);
        assert_eq!(state.position_cost, 10_000);
        assert_eq!(state.realized_pnl, 2_000);
        assert_eq!(state.last_trade_id, 2);
    }

    #[test]
    fn test_sell_beyond_position_is_absorbed() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = test_ledger(dir.path());

        ledger.append(&fill(1, TradeSide::Buy, 1_000, 10_000)).unwrap();
        ledger
            .append(&fill(2, TradeSide::Sell, 5_000, 55_000))
            .unwrap();

        let state = ledger.state();
        assert_eq!(state.position_base, 0);
        assert_eq!(state.position_cost, 0);
        // only the matched 1000 units realize: round(55000 * 0.2) - 10000
        assert_eq!(state.realized_pnl, 1_000);
    }

    #[test]
    fn test_base_fee_nets_from_base_leg() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = test_ledger(dir.path());

        let mut buy = fill(1, TradeSide::Buy, 10_000, 100_000);
        buy.fee_qty = 10;
        buy.fee_asset = "SPYX".to_string();
        ledger.append(&buy).unwrap();

        assert_eq!(ledger.state().position_base, 9_990);
        assert_eq!(ledger.state().position_cost, 100_000);
    }

    #[test]
    fn test_invalid_scales_rejected() {
        let err = TradeLedger::new(LedgerConfig {
            storage_path: PathBuf::from("/tmp/x.jsonl"),
            base_scale: 0,
            quote_scale: 100,
            base_asset: "A".to_string(),
            quote_asset: "B".to_string(),
        })
        .unwrap_err();
        assert!(matches!(err, DepthFlowError::Config(_)));
    }

    #[test]
    fn test_to_units_rounds() {
        assert_eq!(to_units(dec!(1.23456), 10_000).unwrap(), 12_346);
        assert_eq!(to_units(dec!(0.5), 100).unwrap(), 50);
    }
}
