//! Risk guardrails for the quoting loop
//!
//! Three small state machines: the drawdown gate over session peak NAV, the
//! taker-escape throttle, and the rate-limit backoff that paces every venue
//! call after a 429.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::time::{Duration, Instant};
use tracing::info;

/// What the drawdown gate decided this iteration
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskDecision {
    pub trading_enabled: bool,
    /// Drawdown breached on this very check; caller should flatten quotes.
    pub just_tripped: bool,
    pub drawdown_abs: Decimal,
    pub drawdown_pct: f64,
}

/// Session drawdown gate: peak NAV only rises, and trading pauses when the
/// drop from peak exceeds either threshold.
#[derive(Debug)]
pub struct RiskGate {
    max_drawdown_usd: Decimal,
    max_drawdown_pct: f64,
    cooldown: Duration,
    peak_nav: Option<Decimal>,
    trading_enabled: bool,
    disabled_since: Option<Instant>,
}

impl RiskGate {
    pub fn new(max_drawdown_usd: Decimal, max_drawdown_pct: f64, cooldown_ms: u64) -> Self {
        Self {
            max_drawdown_usd,
            max_drawdown_pct,
            cooldown: Duration::from_millis(cooldown_ms),
            peak_nav: None,
            trading_enabled: true,
            disabled_since: None,
        }
    }

    pub fn trading_enabled(&self) -> bool {
        self.trading_enabled
    }

    /// Fold one NAV observation into the gate.
    ///
    /// Re-enabling requires both the cooldown to elapse and NAV to recover to
    /// `peak * (1 - max_drawdown_pct / 2)`.
    pub fn check(&mut self, nav: Decimal, now: Instant) -> RiskDecision {
        let Some(peak) = self.peak_nav else {
            self.peak_nav = Some(nav);
            self.trading_enabled = true;
            self.disabled_since = None;
            return RiskDecision {
                trading_enabled: true,
                ..Default::default()
            };
        };

        let peak = peak.max(nav);
        self.peak_nav = Some(peak);

        let drawdown_abs = (peak - nav).max(Decimal::ZERO);
        let drawdown_pct = if peak > Decimal::ZERO {
            (drawdown_abs / peak).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        let mut just_tripped = false;
        if self.trading_enabled {
            let breach = (self.max_drawdown_usd > Decimal::ZERO
                && drawdown_abs > self.max_drawdown_usd)
                || (self.max_drawdown_pct > 0.0 && drawdown_pct > self.max_drawdown_pct);
            if breach {
                self.trading_enabled = false;
                self.disabled_since = Some(now);
                just_tripped = true;
            }
        } else {
            let disabled_since = *self.disabled_since.get_or_insert(now);
            let recovery_threshold = peak
                * (Decimal::ONE
                    - Decimal::try_from(0.5 * self.max_drawdown_pct).unwrap_or(Decimal::ZERO));
            if now.duration_since(disabled_since) >= self.cooldown && nav >= recovery_threshold {
                self.trading_enabled = true;
                self.disabled_since = None;
                info!(target: "risk", "cooldown elapsed and NAV recovered; re-enabling quoting");
            }
        }

        RiskDecision {
            trading_enabled: self.trading_enabled,
            just_tripped,
            drawdown_abs,
            drawdown_pct,
        }
    }
}

/// Rolling-window throttle for taker escapes: a per-event cooldown plus a
/// per-minute cap.
#[derive(Debug)]
pub struct EscapeThrottle {
    cooldown: Duration,
    max_per_minute: u32,
    last_escape: Option<Instant>,
    window_start: Option<Instant>,
    count_in_window: u32,
}

impl EscapeThrottle {
    pub fn new(cooldown_ms: u64, max_per_minute: u32) -> Self {
        Self {
            cooldown: Duration::from_millis(cooldown_ms),
            max_per_minute,
            last_escape: None,
            window_start: None,
            count_in_window: 0,
        }
    }

    /// Try to take one escape slot. Consumes the slot when allowed.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_escape {
            if now.duration_since(last) < self.cooldown {
                return false;
            }
        }

        match self.window_start {
            Some(start) if now.duration_since(start) < Duration::from_secs(60) => {}
            _ => {
                self.window_start = Some(now);
                self.count_in_window = 0;
            }
        }

        if self.max_per_minute > 0 && self.count_in_window >= self.max_per_minute {
            return false;
        }

        self.last_escape = Some(now);
        self.count_in_window += 1;
        true
    }
}

/// Exponential backoff armed by 429 responses, decayed by clean iterations
#[derive(Debug)]
pub struct RateLimitBackoff {
    initial_ms: f64,
    max_ms: f64,
    current_ms: f64,
    until: Option<Instant>,
    hit_this_iteration: bool,
}

impl RateLimitBackoff {
    pub fn new(initial_ms: f64, max_ms: f64) -> Self {
        Self {
            initial_ms,
            max_ms,
            current_ms: 0.0,
            until: None,
            hit_this_iteration: false,
        }
    }

    /// Remaining gate time, if the loop is currently rate-limited.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.until.and_then(|until| until.checked_duration_since(now))
    }

    pub fn begin_iteration(&mut self) {
        self.hit_this_iteration = false;
    }

    /// A 429 arrived: grow the backoff by 1.5x (clamped) and extend the gate.
    pub fn note_hit(&mut self, now: Instant) -> Duration {
        self.hit_this_iteration = true;
        self.current_ms = if self.current_ms <= 0.0 {
            self.initial_ms
        } else {
            (self.current_ms * 1.5).min(self.max_ms)
        };
        let backoff = Duration::from_millis(self.current_ms as u64);
        let candidate = now + backoff;
        self.until = Some(match self.until {
            Some(until) if until > candidate => until,
            _ => candidate,
        });
        backoff
    }

    /// A clean iteration decays the backoff; below half the initial value it
    /// resets and clears the gate.
    pub fn note_success(&mut self) {
        if self.hit_this_iteration {
            return;
        }
        if self.current_ms > 0.0 {
            self.current_ms = (self.current_ms * 0.5 - self.initial_ms * 0.25).max(0.0);
            if self.current_ms < self.initial_ms * 0.5 {
                self.current_ms = 0.0;
                self.until = None;
            }
        }
    }

    pub fn current_ms(&self) -> f64 {
        self.current_ms
    }
}
