//! Market-making strategy
//!
//! A single control loop that turns the latest market view and account state
//! into quote decisions, with inventory, drawdown, escape, and rate-limit
//! guardrails. All venue writes happen here; the loop owns its REST client
//! and the fill ledger.

mod config;
mod ledger;
mod models;
mod quoting;
mod risk;

pub use config::MakerConfig;
pub use ledger::{LedgerConfig, LedgerState, TradeFill, TradeLedger, TradeSide};
pub use models::{Balances, MarketView, WorkingOrder};
pub use risk::{EscapeThrottle, RateLimitBackoff, RiskGate};

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::error::{DepthFlowError, Result};
use crate::rest::{AccountInfo, OrderSide, SpotRest, SymbolFilters};
use models::select_working_orders;
use quoting::{
    book_imbalance, floor_to_increment, inventory_deviation, min_edge_fraction,
    precision_from_increment, quote_prices, round_down, skew_bias, target_spread_fraction,
    validate_filters,
};

const BASIS_POINT: f64 = 1e-4;
const DEPTH_LEVELS: u32 = 5;
const TRADES_PAGE_LIMIT: u32 = 100;

fn dec(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

fn pow10(precision: u32) -> i64 {
    10i64.pow(precision.min(15))
}

/// The market-making control loop
pub struct MarketMaker<R: SpotRest> {
    rest: R,
    config: MakerConfig,
    base_asset: String,

    ledger: TradeLedger,
    balances: Balances,
    buy_order: Option<WorkingOrder>,
    sell_order: Option<WorkingOrder>,
    filters: Option<SymbolFilters>,

    risk: RiskGate,
    backoff: RateLimitBackoff,
    escape_throttle: EscapeThrottle,
    last_sell_escape: Option<(Instant, Decimal)>,
    last_buy_escape: Option<(Instant, Decimal)>,

    initial_nav: Option<Decimal>,
    realized_at_session_start: Decimal,
    position_base: Decimal,
    position_cost: Decimal,
    realized_pnl: Decimal,
    position_initialized: bool,
    last_trade_id: i64,
    last_trades_poll: Option<Instant>,
    last_depth_update_id: i64,

    order_seq: AtomicU64,
}

impl<R: SpotRest> MarketMaker<R> {
    pub fn new(rest: R, config: MakerConfig) -> Result<Self> {
        let base_asset = config.base_asset();
        let mut ledger = TradeLedger::new(LedgerConfig {
            storage_path: PathBuf::from(&config.ledger_path),
            base_scale: pow10(config.quantity_precision),
            quote_scale: pow10(config.quote_precision),
            base_asset: base_asset.clone(),
            quote_asset: config.quote_asset.clone(),
        })?;

        let state = ledger.load()?;
        let position_base = ledger.base_to_decimal(state.position_base);
        let position_cost = ledger.quote_to_decimal(state.position_cost);
        let realized_pnl = ledger.quote_to_decimal(state.realized_pnl);
        let position_initialized = state.position_base > 0 || state.position_cost > 0;

        if state.last_trade_id > 0 {
            info!(
                target: "ledger",
                last_trade_id = state.last_trade_id,
                position = %position_base,
                cost = %position_cost,
                realized = %realized_pnl,
                "restored fill journal"
            );
        } else {
            info!(target: "ledger", "no prior fills; starting fresh");
        }

        Ok(Self {
            risk: RiskGate::new(
                config.max_drawdown_usd,
                config.max_drawdown_pct,
                config.risk_cooldown_ms,
            ),
            backoff: RateLimitBackoff::new(
                config.rate_limit_backoff_ms_initial,
                config.rate_limit_backoff_ms_max,
            ),
            escape_throttle: EscapeThrottle::new(
                config.taker_escape_cooldown_ms,
                config.max_taker_escapes_per_min,
            ),
            rest,
            base_asset,
            ledger,
            balances: Balances::default(),
            buy_order: None,
            sell_order: None,
            filters: None,
            last_sell_escape: None,
            last_buy_escape: None,
            initial_nav: None,
            realized_at_session_start: Decimal::ZERO,
            position_base,
            position_cost,
            realized_pnl,
            position_initialized,
            last_trade_id: state.last_trade_id,
            last_trades_poll: None,
            last_depth_update_id: 0,
            order_seq: AtomicU64::new(0),
            config,
        })
    }

    pub fn config(&self) -> &MakerConfig {
        &self.config
    }

    /// Run the control loop until a fatal error.
    pub async fn run(&mut self) -> Result<()> {
        info!(target: "strategy", symbol = %self.config.symbol, "starting market making");
        self.load_symbol_filters().await;

        let refresh = Duration::from_millis(self.config.refresh_interval_ms);
        let mut first_iteration = true;

        loop {
            if let Some(wait) = self.backoff.remaining(Instant::now()) {
                sleep(wait).await;
                continue;
            }

            self.backoff.begin_iteration();
            let loop_start = Instant::now();

            match self.iteration(&mut first_iteration).await {
                Ok(()) => self.backoff.note_success(),
                Err(e @ (DepthFlowError::Overflow | DepthFlowError::Config(_))) => {
                    error!(target: "strategy", error = %e, "fatal error; stopping");
                    return Err(e);
                }
                Err(e) => {
                    self.note_error(&e);
                    warn!(target: "strategy", error = %e, "iteration aborted");
                }
            }

            let elapsed = loop_start.elapsed();
            if elapsed < refresh {
                sleep(refresh - elapsed).await;
            }
        }
    }

    /// One pass of the control loop.
    async fn iteration(&mut self, first_iteration: &mut bool) -> Result<()> {
        let account = self.rest.account_info().await?;
        self.refresh_balances(&account)?;

        let open_orders = self.rest.open_orders(&self.config.symbol).await?;
        let (buy, sell) = select_working_orders(&open_orders, self.config.min_base_quantity);
        if self.buy_order.is_some() && buy.is_none() {
            info!(target: "strategy", "buy order closed");
        }
        if self.sell_order.is_some() && sell.is_none() {
            info!(target: "strategy", "sell order closed");
        }
        self.buy_order = buy;
        self.sell_order = sell;
        let open_ids: HashSet<String> = open_orders
            .iter()
            .map(|o| o.client_order_id.clone())
            .collect();

        let depth = self.rest.depth(&self.config.symbol, DEPTH_LEVELS).await?;
        let view = MarketView::from_depth(&depth, self.buy_order.as_ref(), self.sell_order.as_ref());
        if view.last_update_id < self.last_depth_update_id {
            return Err(DepthFlowError::VersionReject(
                "out-of-order depth snapshot".to_string(),
            ));
        }
        self.last_depth_update_id = view.last_update_id;
        info!(
            target: "strategy",
            best_bid = %view.best_bid,
            best_ask = %view.best_ask,
            spread = %view.spread,
            "market ex-self"
        );

        self.enforce_escapes(&view, &open_ids).await;

        if !self.position_initialized {
            let mark = view.mark();
            self.position_base = self.balances.total_base();
            self.position_cost = self.position_base * mark;
            self.position_initialized = true;
        }

        self.pull_recent_trades().await?;

        let nav = self.compute_nav(&view);
        let base_share = self.compute_base_share(nav, &view);
        let decision = self.risk.check(nav, Instant::now());
        if decision.just_tripped {
            info!(
                target: "risk",
                drawdown = %decision.drawdown_abs,
                drawdown_pct = decision.drawdown_pct * 100.0,
                "drawdown exceeded thresholds; disabling quoting"
            );
            self.cancel_all_quotes().await;
        }
        if base_share > self.config.max_inventory_ratio
            || base_share < 1.0 - self.config.max_inventory_ratio
        {
            info!(target: "risk", base_share = base_share * 100.0, "inventory imbalance");
        }
        self.report_pnl(nav, base_share, first_iteration);

        if !decision.trading_enabled {
            info!(target: "strategy", "trading disabled by risk manager; skipping quotes");
            return Ok(());
        }

        if !self.ensure_starting_inventory(&view).await {
            return Ok(());
        }

        self.maintain_quotes(&view).await;
        Ok(())
    }

    fn refresh_balances(&mut self, account: &AccountInfo) -> Result<()> {
        let (base_free, base_locked) = account.balance(&self.base_asset);
        let (quote_free, quote_locked) = account.balance(&self.config.quote_asset);
        let now_ms = chrono::Utc::now().timestamp_millis();
        let updated_at_ms = account.update_time.unwrap_or(now_ms);

        if self.config.account_staleness_ms > 0 {
            let age_ms = now_ms - updated_at_ms;
            if age_ms > self.config.account_staleness_ms {
                return Err(DepthFlowError::StaleAccount { age_ms });
            }
        }

        self.balances = Balances {
            base_free,
            base_locked,
            quote_free,
            quote_locked,
            updated_at_ms,
        };

        info!(
            target: "strategy",
            base = %self.base_asset,
            base_free = %base_free,
            base_locked = %base_locked,
            quote_free = %quote_free,
            quote_locked = %quote_locked,
            "balances"
        );
        Ok(())
    }

    async fn load_symbol_filters(&mut self) {
        match self.rest.exchange_info(&self.config.symbol).await {
            Ok(Some(filters)) => {
                if filters.step_size > Decimal::ZERO
                    && filters.step_size != self.config.quantity_increment
                {
                    info!(
                        target: "filters",
                        configured = %self.config.quantity_increment,
                        exchange = %filters.step_size,
                        "adjusting quantity increment to exchange step size"
                    );
                    self.config.quantity_increment = filters.step_size;
                }
                if filters.step_size > Decimal::ZERO {
                    self.config.quantity_precision = self
                        .config
                        .quantity_precision
                        .max(precision_from_increment(filters.step_size));
                }
                if filters.tick_size > Decimal::ZERO {
                    self.config.price_precision = self
                        .config
                        .price_precision
                        .max(precision_from_increment(filters.tick_size));
                }
                self.filters = Some(filters);
            }
            Ok(None) => warn!(target: "filters", symbol = %self.config.symbol, "no filters declared"),
            Err(e) => {
                self.note_error(&e);
                warn!(target: "filters", error = %e, "failed to load symbol filters");
            }
        }
    }

    /// Cancel a resting order when the opposite touch has moved through its
    /// escape threshold, then optionally cross the spread.
    async fn enforce_escapes(&mut self, view: &MarketView, open_ids: &HashSet<String>) {
        let escape_fraction = dec(self.config.escape_bps * BASIS_POINT);
        let hysteresis_fraction = dec(self.config.escape_hysteresis_bps * BASIS_POINT);
        let min_interval = Duration::from_millis(self.config.min_escape_interval_ms);
        let now = Instant::now();

        if let Some(order) = self.sell_order.clone() {
            let recently = self
                .last_sell_escape
                .is_some_and(|(at, _)| now.duration_since(at) < min_interval);
            if open_ids.contains(&order.client_id) && !recently {
                let threshold = order.price * (Decimal::ONE - escape_fraction);
                let mut adjusted = threshold - order.price * hysteresis_fraction;
                if let Some((_, last_price)) = self.last_sell_escape {
                    adjusted = adjusted.min(last_price - order.price * hysteresis_fraction);
                }

                if view.best_bid > Decimal::ZERO && view.best_bid < adjusted {
                    info!(
                        target: "strategy",
                        bid = %view.best_bid,
                        threshold = %threshold,
                        "sell escape triggered"
                    );
                    self.cancel_and_escape(&order, view, OrderSide::Sell).await;
                    self.sell_order = None;
                    self.last_sell_escape = Some((now, view.best_bid));
                }
            }
        }

        if let Some(order) = self.buy_order.clone() {
            let recently = self
                .last_buy_escape
                .is_some_and(|(at, _)| now.duration_since(at) < min_interval);
            if open_ids.contains(&order.client_id) && !recently {
                let threshold = order.price * (Decimal::ONE + escape_fraction);
                let mut adjusted = threshold + order.price * hysteresis_fraction;
                if let Some((_, last_price)) = self.last_buy_escape {
                    adjusted = adjusted.max(last_price + order.price * hysteresis_fraction);
                }

                if view.best_ask > adjusted {
                    info!(
                        target: "strategy",
                        ask = %view.best_ask,
                        threshold = %threshold,
                        "buy escape triggered"
                    );
                    self.cancel_and_escape(&order, view, OrderSide::Buy).await;
                    self.buy_order = None;
                    self.last_buy_escape = Some((now, view.best_ask));
                }
            }
        }
    }

    async fn cancel_and_escape(&mut self, order: &WorkingOrder, view: &MarketView, side: OrderSide) {
        if let Err(e) = self
            .rest
            .cancel_order(&self.config.symbol, &order.client_id)
            .await
        {
            self.note_error(&e);
            warn!(target: "strategy", error = %e, side = %side, "failed to cancel order");
        }

        self.wait_for_order_close(&order.client_id, side).await;

        let min_notional = self
            .filters
            .map(|f| f.min_notional)
            .filter(|n| *n > Decimal::ZERO)
            .unwrap_or(self.config.min_quote_order)
            .max(self.config.min_quote_order);

        match side {
            OrderSide::Sell => {
                let notional = order.quantity * view.best_bid.max(Decimal::ZERO);
                if notional >= min_notional && self.escape_throttle.try_acquire(Instant::now()) {
                    self.place_market(side, order.quantity, notional, "escape_sell")
                        .await;
                }
            }
            OrderSide::Buy => {
                let notional = order.quantity * view.best_ask.max(Decimal::ZERO);
                let spend = self
                    .balances
                    .quote_free
                    .min(notional.max(self.config.min_quote_order));
                if spend >= min_notional && self.escape_throttle.try_acquire(Instant::now()) {
                    self.place_market(side, order.quantity, spend, "escape_buy")
                        .await;
                }
            }
        }
    }

    /// Poll the order status until it reaches a terminal state or the
    /// configured deadline passes.
    async fn wait_for_order_close(&mut self, client_id: &str, side: OrderSide) -> bool {
        let deadline = Instant::now() + Duration::from_millis(self.config.order_status_timeout_ms);
        while Instant::now() < deadline {
            sleep(Duration::from_millis(self.config.order_status_poll_ms)).await;
            match self.rest.query_order(&self.config.symbol, client_id).await {
                Ok(report) if report.is_closed() => {
                    info!(
                        target: "strategy",
                        %side,
                        client_id,
                        status = %report.status,
                        "order confirmed closed"
                    );
                    return true;
                }
                Ok(_) => {}
                Err(e) => {
                    self.note_error(&e);
                    warn!(target: "strategy", error = %e, client_id, "order status query failed");
                }
            }
        }
        warn!(target: "strategy", %side, client_id, "timed out waiting for order to close");
        false
    }

    /// Make sure both sides of the book can be quoted: convert inventory when
    /// one leg is too small to meet the venue minimums. Returns false when a
    /// bootstrap order was placed (or is needed) and quoting should wait.
    async fn ensure_starting_inventory(&mut self, view: &MarketView) -> bool {
        if view.microprice <= Decimal::ZERO {
            return false;
        }

        let mut ready = true;

        if self.balances.quote_free < self.config.min_quote_order
            && self.balances.base_free > self.config.min_base_quantity
        {
            let price = if view.best_bid > Decimal::ZERO {
                view.best_bid
            } else {
                view.microprice
            };
            let desired_quote = (self.config.min_quote_order * dec(1.5)).max(self.config.quote_budget);
            let needed_quote =
                (desired_quote - self.balances.quote_free).max(self.config.min_quote_order);

            let max_sell = (self.balances.base_free - self.config.min_base_quantity)
                .max(Decimal::ZERO);
            let sell_qty = floor_to_increment(needed_quote / price, self.config.quantity_increment)
                .min(max_sell);

            if sell_qty >= self.config.min_base_quantity {
                let order_id = self.make_order_id("BOOT_SELL");
                if self
                    .place_limit(OrderSide::Sell, price, sell_qty, &order_id)
                    .await
                {
                    self.sell_order = Some(WorkingOrder {
                        client_id: order_id,
                        side: OrderSide::Sell,
                        price,
                        quantity: sell_qty,
                    });
                }
            }
            ready = false;
        }

        if ready
            && self.balances.base_free < self.config.min_base_quantity
            && self.balances.quote_free >= self.config.min_quote_order
        {
            let price = if view.best_ask > Decimal::ZERO {
                view.best_ask
            } else {
                view.microprice
            };
            let buy_notional = floor_to_increment(
                self.balances
                    .quote_free
                    .min(self.config.quote_budget.max(self.config.min_quote_order)),
                self.config.quote_increment,
            );

            if buy_notional >= self.config.min_quote_order {
                let buy_qty =
                    floor_to_increment(buy_notional / price, self.config.quantity_increment);
                if buy_qty >= self.config.min_base_quantity {
                    let order_id = self.make_order_id("BOOT_BUY");
                    if self
                        .place_limit(OrderSide::Buy, price, buy_qty, &order_id)
                        .await
                    {
                        self.buy_order = Some(WorkingOrder {
                            client_id: order_id,
                            side: OrderSide::Buy,
                            price,
                            quantity: buy_qty,
                        });
                    }
                }
            }
            ready = false;
        }

        ready
    }

    /// Derive both quotes from the microprice and place whichever side is
    /// missing, subject to the inventory guards.
    async fn maintain_quotes(&mut self, view: &MarketView) {
        if view.microprice <= Decimal::ZERO {
            warn!(target: "strategy", "invalid microprice; skipping quotes");
            return;
        }

        let sigma = target_spread_fraction(self.config.spread_bps, view.spread, view.microprice);
        let min_edge = min_edge_fraction(self.config.min_edge_bps, self.config.maker_fee);
        if sigma < min_edge {
            info!(
                target: "strategy",
                sigma_bps = sigma * 1e4,
                "spread too tight; skipping quoting"
            );
            return;
        }

        let total_base = self.balances.total_base();
        let total_value = self.balances.total_quote() + total_base * view.microprice;
        if total_value <= Decimal::ZERO {
            warn!(target: "strategy", "no inventory to deploy");
            return;
        }

        let target_qty = total_value * dec(self.config.inventory_target) / view.microprice;
        let upper_qty = target_qty * dec(1.0 + self.config.inventory_tolerance);
        let lower_qty = target_qty * dec(1.0 - self.config.inventory_tolerance);

        let imbalance = book_imbalance(view.bid_volume, view.ask_volume);
        let inventory_ratio = ((total_base * view.microprice) / total_value)
            .to_f64()
            .unwrap_or(0.0);
        let deviation = inventory_deviation(
            inventory_ratio,
            self.config.inventory_target,
            self.config.inventory_tolerance,
        );
        let skew = skew_bias(imbalance, deviation);

        let Some(pair) = quote_prices(view.microprice, sigma, skew, self.config.price_precision)
        else {
            warn!(target: "strategy", "price rounding collapsed spread; skipping");
            return;
        };

        let hysteresis = self.config.inventory_tolerance * 0.5;
        let allow_sell = inventory_ratio > (1.0 - self.config.max_inventory_ratio) + hysteresis;
        let allow_buy = inventory_ratio < self.config.max_inventory_ratio - hysteresis;

        if self.sell_order.is_none() {
            if allow_sell
                && total_base > lower_qty
                && self.balances.base_free > self.config.min_base_quantity
            {
                let excess_base = (total_base - lower_qty).max(Decimal::ZERO);
                let capacity =
                    (self.balances.base_free - self.config.min_base_quantity).max(Decimal::ZERO);
                let budget_qty = self.config.quote_budget / pair.sell;
                let sell_qty = floor_to_increment(
                    excess_base.min(capacity).min(budget_qty),
                    self.config.quantity_increment,
                );

                if sell_qty >= self.config.min_base_quantity {
                    let order_id = self.make_order_id("SELL");
                    if self
                        .place_limit(OrderSide::Sell, pair.sell, sell_qty, &order_id)
                        .await
                    {
                        self.sell_order = Some(WorkingOrder {
                            client_id: order_id,
                            side: OrderSide::Sell,
                            price: pair.sell,
                            quantity: sell_qty,
                        });
                    }
                }
            } else if !allow_sell {
                info!(target: "strategy", "sell side paused; base share below guard");
            }
        }

        if self.buy_order.is_none() {
            if allow_buy
                && total_base < upper_qty
                && self.balances.quote_free >= self.config.min_quote_order
            {
                let buy_notional = floor_to_increment(
                    self.config
                        .quote_budget
                        .min(self.balances.quote_free)
                        .max(self.config.min_quote_order),
                    self.config.quote_increment,
                )
                .min(self.balances.quote_free);

                if buy_notional >= self.config.min_quote_order {
                    let buy_qty =
                        floor_to_increment(buy_notional / pair.buy, self.config.quantity_increment);
                    if buy_qty >= self.config.min_base_quantity {
                        let order_id = self.make_order_id("BUY");
                        if self
                            .place_limit(OrderSide::Buy, pair.buy, buy_qty, &order_id)
                            .await
                        {
                            self.buy_order = Some(WorkingOrder {
                                client_id: order_id,
                                side: OrderSide::Buy,
                                price: pair.buy,
                                quantity: buy_qty,
                            });
                        }
                    }
                }
            } else if !allow_buy {
                info!(target: "strategy", "buy side paused; base share above guard");
            }
        }
    }

    /// Page new fills from the venue and fold them into the ledger.
    async fn pull_recent_trades(&mut self) -> Result<()> {
        let now = Instant::now();
        if let Some(last) = self.last_trades_poll {
            if now.duration_since(last)
                < Duration::from_millis(self.config.fill_poll_interval_ms)
            {
                return Ok(());
            }
        }
        self.last_trades_poll = Some(now);

        let cursor = self.last_trade_id.max(self.ledger.state().last_trade_id);
        let rows = match self
            .rest
            .my_trades(
                &self.config.symbol,
                (cursor > 0).then_some(cursor + 1),
                TRADES_PAGE_LIMIT,
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                self.note_error(&e);
                warn!(target: "fill", error = %e, "failed to pull trades");
                return Ok(());
            }
        };

        let mut new_rows: Vec<_> = rows.into_iter().filter(|r| r.id > cursor).collect();
        if new_rows.is_empty() {
            return Ok(());
        }
        new_rows.sort_by_key(|r| r.id);

        for row in &new_rows {
            let base_units = ledger::to_units(row.qty, self.ledger.base_scale())?;
            let quote_amount = if row.quote_qty > Decimal::ZERO {
                row.quote_qty
            } else {
                row.price * row.qty
            };
            let quote_units = ledger::to_units(quote_amount, self.ledger.quote_scale())?;

            let fee_units = if row.commission_asset == self.base_asset {
                ledger::to_units(row.commission, self.ledger.base_scale())?
            } else if row.commission_asset == self.config.quote_asset {
                ledger::to_units(row.commission, self.ledger.quote_scale())?
            } else {
                0
            };

            let fill = TradeFill {
                id: row.id,
                time_ms: row.time,
                side: if row.is_buyer {
                    TradeSide::Buy
                } else {
                    TradeSide::Sell
                },
                base_qty: base_units,
                quote_qty: quote_units,
                fee_qty: fee_units,
                fee_asset: row.commission_asset.clone(),
                is_maker: row.is_maker,
            };

            let before = self.ledger.state();
            self.ledger.append(&fill)?;
            let realized_delta = self
                .ledger
                .quote_to_decimal(self.ledger.state().realized_pnl - before.realized_pnl);

            info!(
                target: "fill",
                side = %if row.is_buyer { "BUY" } else { "SELL" },
                role = %if row.is_maker { "maker" } else { "taker" },
                qty = %row.qty,
                price = %row.price,
                notional = %quote_amount,
                realized = %realized_delta,
                "fill recorded"
            );
        }

        let state = self.ledger.state();
        self.position_base = self.ledger.base_to_decimal(state.position_base);
        self.position_cost = self.ledger.quote_to_decimal(state.position_cost);
        self.realized_pnl = self.ledger.quote_to_decimal(state.realized_pnl);
        self.last_trade_id = state.last_trade_id;
        self.position_initialized = true;
        Ok(())
    }

    async fn place_limit(
        &mut self,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
        client_order_id: &str,
    ) -> bool {
        if price <= Decimal::ZERO || quantity <= Decimal::ZERO {
            return false;
        }

        let quantity = floor_to_increment(quantity, self.config.quantity_increment);
        let notional = quantity * price;
        if quantity < self.config.min_base_quantity || notional < self.config.min_quote_order {
            return false;
        }

        if let Err(reason) = validate_filters(self.filters.as_ref(), price, quantity, notional) {
            warn!(target: "filters", %reason, "limit order dropped");
            return false;
        }

        let price_str = self.format_decimal(price, self.config.price_precision);
        let qty_str = self.format_decimal(quantity, self.config.quantity_precision);

        match self
            .rest
            .place_limit_order(&self.config.symbol, side, &price_str, &qty_str, client_order_id)
            .await
        {
            Ok(ack) => {
                if let Some(status) = &ack.status {
                    if status != "NEW" && status != "PARTIALLY_FILLED" {
                        warn!(target: "strategy", %status, "limit order rejected");
                        return false;
                    }
                }
                info!(
                    target: "strategy",
                    %side,
                    order_id = %ack.order_id.as_deref().unwrap_or(client_order_id),
                    %price,
                    qty = %quantity,
                    "placed limit order"
                );
                true
            }
            Err(e) => {
                self.note_error(&e);
                warn!(target: "strategy", error = %e, "failed to place limit order");
                false
            }
        }
    }

    async fn place_market(
        &mut self,
        side: OrderSide,
        quantity: Decimal,
        quote_amount: Decimal,
        reason_tag: &str,
    ) -> bool {
        let result = match side {
            OrderSide::Sell => {
                let qty = floor_to_increment(quantity, self.config.quantity_increment);
                if qty < self.config.min_base_quantity {
                    return false;
                }
                if let Err(reason) =
                    validate_filters(self.filters.as_ref(), Decimal::ZERO, qty, quote_amount)
                {
                    warn!(target: "filters", %reason, "market sell dropped");
                    return false;
                }
                let qty_str = self.format_decimal(qty, self.config.quantity_precision);
                self.rest
                    .place_market_order(&self.config.symbol, side, Some(&qty_str), None)
                    .await
            }
            OrderSide::Buy => {
                let quote = floor_to_increment(
                    quote_amount.max(self.config.min_quote_order),
                    self.config.quote_increment,
                )
                .min(self.balances.quote_free);
                if quote < self.config.min_quote_order {
                    return false;
                }
                if let Err(reason) = validate_filters(
                    self.filters.as_ref(),
                    Decimal::ZERO,
                    Decimal::ZERO,
                    quote,
                ) {
                    warn!(target: "filters", %reason, "market buy dropped");
                    return false;
                }
                let quote_str = self.format_decimal(quote, self.config.quote_precision);
                self.rest
                    .place_market_order(&self.config.symbol, side, None, Some(&quote_str))
                    .await
            }
        };

        match result {
            Ok(_) => {
                info!(target: "strategy", %side, reason = reason_tag, "executed market order");
                true
            }
            Err(e) => {
                self.note_error(&e);
                warn!(target: "strategy", error = %e, reason = reason_tag, "market order failed");
                false
            }
        }
    }

    async fn cancel_all_quotes(&mut self) {
        if let Err(e) = self.rest.cancel_open_orders(&self.config.symbol).await {
            self.note_error(&e);
            warn!(target: "risk", error = %e, "failed to cancel open orders");
        }
        self.buy_order = None;
        self.sell_order = None;
    }

    fn compute_nav(&self, view: &MarketView) -> Decimal {
        self.balances.total_quote() + self.balances.total_base() * view.mark()
    }

    fn compute_base_share(&self, nav: Decimal, view: &MarketView) -> f64 {
        if nav <= Decimal::ZERO {
            return 0.0;
        }
        ((self.balances.total_base() * view.mark()) / nav)
            .to_f64()
            .unwrap_or(0.0)
    }

    fn report_pnl(&mut self, nav: Decimal, base_share: f64, first_iteration: &mut bool) {
        if *first_iteration || self.initial_nav.is_none() {
            self.initial_nav = Some(nav);
            self.realized_at_session_start = self.realized_pnl;
            *first_iteration = false;
            info!(target: "pnl", %nav, "initialized");
            return;
        }

        let initial = self.initial_nav.unwrap_or(nav);
        let pnl = nav - initial;
        let realized = self.realized_pnl - self.realized_at_session_start;
        let unrealized = pnl - realized;
        info!(
            target: "pnl",
            %nav,
            delta = %pnl,
            base_share = base_share * 100.0,
            position = %self.position_base,
            cost = %self.position_cost,
            %realized,
            %unrealized,
            "session"
        );
    }

    /// Client order ids: symbol initial + side initial + millis + 4-digit
    /// rolling sequence, capped at 32 chars.
    fn make_order_id(&self, side_tag: &str) -> String {
        let symbol_initial = self.config.symbol.chars().next().unwrap_or('X');
        let side_initial = side_tag
            .chars()
            .next()
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or('X');
        let millis = chrono::Utc::now().timestamp_millis();
        let seq = self.order_seq.fetch_add(1, Ordering::Relaxed) % 10_000;
        let mut id = format!("{symbol_initial}{side_initial}{millis}{seq:04}");
        id.truncate(32);
        id
    }

    fn format_decimal(&self, value: Decimal, precision: u32) -> String {
        format!("{:.*}", precision as usize, round_down(value, precision))
    }

    fn note_error(&mut self, error: &DepthFlowError) {
        if error.is_rate_limit() {
            let backoff = self.backoff.note_hit(Instant::now());
            info!(
                target: "ratelimit",
                backoff_ms = backoff.as_millis() as u64,
                "backing off"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{PriceLevel, RestDepth};
    use crate::rest::{Balance, OrderAck, OrderReport, TradeRow};
    use rust_decimal_macros::dec as d;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockState {
        account: Option<AccountInfo>,
        depth: Option<RestDepth>,
        open_orders: Vec<OrderReport>,
        trades: Vec<TradeRow>,
        placed_limits: Vec<(OrderSide, String, String, String)>,
        placed_markets: Vec<(OrderSide, Option<String>, Option<String>)>,
        cancel_all_calls: usize,
        rate_limit_depth: bool,
    }

    struct MockRest(Mutex<MockState>);

    impl MockRest {
        fn new(state: MockState) -> Self {
            Self(Mutex::new(state))
        }

        fn with<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
            f(&mut self.0.lock().unwrap())
        }
    }

    impl SpotRest for &MockRest {
        async fn depth(&self, _symbol: &str, _limit: u32) -> Result<RestDepth> {
            self.with(|s| {
                if s.rate_limit_depth {
                    return Err(DepthFlowError::RateLimited { retry_after_ms: None });
                }
                Ok(s.depth.clone().expect("mock depth set"))
            })
        }

        async fn exchange_info(&self, _symbol: &str) -> Result<Option<SymbolFilters>> {
            Ok(None)
        }

        async fn account_info(&self) -> Result<AccountInfo> {
            self.with(|s| Ok(s.account.clone().expect("mock account set")))
        }

        async fn open_orders(&self, _symbol: &str) -> Result<Vec<OrderReport>> {
            self.with(|s| Ok(s.open_orders.clone()))
        }

        async fn query_order(&self, _symbol: &str, client_order_id: &str) -> Result<OrderReport> {
            Ok(OrderReport {
                client_order_id: client_order_id.to_string(),
                side: "SELL".to_string(),
                price: Decimal::ZERO,
                orig_qty: Decimal::ZERO,
                executed_qty: Decimal::ZERO,
                status: "CANCELED".to_string(),
            })
        }

        async fn place_limit_order(
            &self,
            _symbol: &str,
            side: OrderSide,
            price: &str,
            quantity: &str,
            client_order_id: &str,
        ) -> Result<OrderAck> {
            self.with(|s| {
                s.placed_limits.push((
                    side,
                    price.to_string(),
                    quantity.to_string(),
                    client_order_id.to_string(),
                ));
                Ok(OrderAck {
                    order_id: Some("1".to_string()),
                    status: Some("NEW".to_string()),
                })
            })
        }

        async fn place_market_order(
            &self,
            _symbol: &str,
            side: OrderSide,
            quantity: Option<&str>,
            quote_order_qty: Option<&str>,
        ) -> Result<OrderAck> {
            self.with(|s| {
                s.placed_markets.push((
                    side,
                    quantity.map(str::to_string),
                    quote_order_qty.map(str::to_string),
                ));
                Ok(OrderAck {
                    order_id: Some("2".to_string()),
                    status: Some("FILLED".to_string()),
                })
            })
        }

        async fn cancel_order(&self, _symbol: &str, _client_order_id: &str) -> Result<OrderAck> {
            Ok(OrderAck {
                order_id: None,
                status: Some("CANCELED".to_string()),
            })
        }

        async fn cancel_open_orders(&self, _symbol: &str) -> Result<()> {
            self.with(|s| {
                s.cancel_all_calls += 1;
                Ok(())
            })
        }

        async fn my_trades(
            &self,
            _symbol: &str,
            from_id: Option<i64>,
            _limit: u32,
        ) -> Result<Vec<TradeRow>> {
            self.with(|s| {
                let cursor = from_id.unwrap_or(0);
                Ok(s.trades.iter().filter(|t| t.id >= cursor).cloned().collect())
            })
        }
    }

    fn account(base_free: Decimal, quote_free: Decimal) -> AccountInfo {
        AccountInfo {
            balances: vec![
                Balance {
                    asset: "SPYX".to_string(),
                    free: base_free,
                    locked: Decimal::ZERO,
                },
                Balance {
                    asset: "USDT".to_string(),
                    free: quote_free,
                    locked: Decimal::ZERO,
                },
            ],
            update_time: Some(chrono::Utc::now().timestamp_millis()),
        }
    }

    fn depth(update_id: i64) -> RestDepth {
        RestDepth {
            last_update_id: update_id,
            bids: vec![
                PriceLevel::new(d!(1.29), d!(10)),
                PriceLevel::new(d!(1.28), d!(5)),
                PriceLevel::new(d!(1.27), d!(5)),
            ],
            asks: vec![
                PriceLevel::new(d!(1.31), d!(10)),
                PriceLevel::new(d!(1.32), d!(5)),
            ],
        }
    }

    fn test_config(dir: &std::path::Path) -> MakerConfig {
        MakerConfig {
            ledger_path: dir.join("fills.jsonl").to_string_lossy().into_owned(),
            min_base_quantity: d!(0.1),
            order_status_poll_ms: 1,
            order_status_timeout_ms: 20,
            ..MakerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_iteration_places_two_sided_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockRest::new(MockState {
            account: Some(account(d!(100), d!(130))),
            depth: Some(depth(10)),
            ..Default::default()
        });

        let mut maker = MarketMaker::new(&mock, test_config(dir.path())).unwrap();
        let mut first = true;
        maker.iteration(&mut first).await.unwrap();

        let (limits, markets) = mock.with(|s| (s.placed_limits.clone(), s.placed_markets.clone()));
        assert!(markets.is_empty());
        assert_eq!(limits.len(), 2);

        let buy = limits.iter().find(|l| l.0 == OrderSide::Buy).unwrap();
        let sell = limits.iter().find(|l| l.0 == OrderSide::Sell).unwrap();
        let buy_price: Decimal = buy.1.parse().unwrap();
        let sell_price: Decimal = sell.1.parse().unwrap();
        assert!(buy_price < sell_price);
        assert!(buy_price < d!(1.31) && sell_price > d!(1.29));
        // client ids carry symbol and side initials
        assert!(buy.3.starts_with("SB"));
        assert!(sell.3.starts_with("SS"));
        assert!(buy.3.len() <= 32);

        // cached working orders reflect what was placed
        assert!(maker.buy_order.is_some());
        assert!(maker.sell_order.is_some());
    }

    #[tokio::test]
    async fn test_stale_account_aborts_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let mut stale = account(d!(100), d!(130));
        stale.update_time = Some(chrono::Utc::now().timestamp_millis() - 10_000);
        let mock = MockRest::new(MockState {
            account: Some(stale),
            depth: Some(depth(10)),
            ..Default::default()
        });

        let mut maker = MarketMaker::new(&mock, test_config(dir.path())).unwrap();
        let mut first = true;
        let err = maker.iteration(&mut first).await.unwrap_err();
        assert!(matches!(err, DepthFlowError::StaleAccount { .. }));
        assert!(mock.with(|s| s.placed_limits.is_empty()));
    }

    #[tokio::test]
    async fn test_depth_regression_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockRest::new(MockState {
            account: Some(account(d!(100), d!(130))),
            depth: Some(depth(10)),
            ..Default::default()
        });

        let mut maker = MarketMaker::new(&mock, test_config(dir.path())).unwrap();
        maker.last_depth_update_id = 99;
        let mut first = true;
        let err = maker.iteration(&mut first).await.unwrap_err();
        assert!(matches!(err, DepthFlowError::VersionReject(_)));
    }

    #[tokio::test]
    async fn test_rate_limited_call_arms_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockRest::new(MockState {
            account: Some(account(d!(100), d!(130))),
            depth: Some(depth(10)),
            rate_limit_depth: true,
            ..Default::default()
        });

        let mut maker = MarketMaker::new(&mock, test_config(dir.path())).unwrap();
        let mut first = true;
        let err = maker.iteration(&mut first).await.unwrap_err();
        assert!(err.is_rate_limit());

        maker.note_error(&err);
        assert!(maker.backoff.remaining(Instant::now()).is_some());
    }

    #[tokio::test]
    async fn test_drawdown_trips_and_cancels_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockRest::new(MockState {
            account: Some(account(d!(100), d!(130))),
            depth: Some(depth(10)),
            ..Default::default()
        });

        let mut maker = MarketMaker::new(&mock, test_config(dir.path())).unwrap();
        let mut first = true;
        maker.iteration(&mut first).await.unwrap();
        let placed_before = mock.with(|s| s.placed_limits.len());

        // NAV collapses well past the absolute drawdown limit
        mock.with(|s| {
            s.account = Some(account(d!(50), d!(130)));
            s.depth = Some(depth(11));
        });
        maker.iteration(&mut first).await.unwrap();

        assert_eq!(mock.with(|s| s.cancel_all_calls), 1);
        assert_eq!(mock.with(|s| s.placed_limits.len()), placed_before);
        assert!(maker.buy_order.is_none() && maker.sell_order.is_none());
    }

    #[tokio::test]
    async fn test_sell_escape_cancels_and_crosses() {
        let dir = tempfile::tempdir().unwrap();
        // resting sell far above a collapsing market
        let resting = OrderReport {
            client_order_id: "SS17000000000000001".to_string(),
            side: "SELL".to_string(),
            price: d!(1.50),
            orig_qty: d!(5),
            executed_qty: Decimal::ZERO,
            status: "NEW".to_string(),
        };
        let mock = MockRest::new(MockState {
            account: Some(account(d!(100), d!(130))),
            depth: Some(depth(10)),
            open_orders: vec![resting],
            ..Default::default()
        });

        let mut maker = MarketMaker::new(&mock, test_config(dir.path())).unwrap();
        let mut first = true;
        maker.iteration(&mut first).await.unwrap();

        let markets = mock.with(|s| s.placed_markets.clone());
        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].0, OrderSide::Sell);
        assert!(markets[0].1.is_some());
        assert!(maker.last_sell_escape.is_some());
    }

    #[tokio::test]
    async fn test_fills_flow_into_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let trades = vec![TradeRow {
            id: 7,
            is_buyer: true,
            is_maker: true,
            price: d!(1.30),
            qty: d!(10),
            quote_qty: d!(13),
            commission: d!(0.013),
            commission_asset: "USDT".to_string(),
            time: 1_700_000_000_000,
        }];
        let mock = MockRest::new(MockState {
            account: Some(account(d!(100), d!(130))),
            depth: Some(depth(10)),
            trades,
            ..Default::default()
        });

        let mut maker = MarketMaker::new(&mock, test_config(dir.path())).unwrap();
        let mut first = true;
        maker.iteration(&mut first).await.unwrap();

        assert_eq!(maker.last_trade_id, 7);
        assert_eq!(maker.position_base, d!(10));
        let state = maker.ledger.state();
        // quote fee netted from the cost leg: 13.00 - 0.01 fee units
        assert_eq!(state.position_cost, 1_299);
    }
}
