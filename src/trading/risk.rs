//! Risk Guard
//!
//! Daily gatekeeper for paper entries: trade count and realised loss are
//! tracked per IST date and reset when the date rolls.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::to_decimal;
use crate::config::RiskConfig;

pub struct RiskGuard {
    max_trades_per_day: u32,
    daily_loss_limit: Decimal,
    max_exposure: Decimal,
    qty_per_trade: u32,
    /// Current IST date (for reset detection)
    day: Option<NaiveDate>,
    trades_today: u32,
    pnl_today: Decimal,
}

impl RiskGuard {
    pub fn new(cfg: &RiskConfig) -> Self {
        Self {
            max_trades_per_day: cfg.max_trades_per_day,
            daily_loss_limit: to_decimal(cfg.daily_loss_limit.abs()),
            max_exposure: to_decimal(cfg.max_exposure_per_trade),
            qty_per_trade: cfg.qty_per_trade,
            day: None,
            trades_today: 0,
            pnl_today: Decimal::ZERO,
        }
    }

    /// Resets the counters when `today` differs from the tracked date.
    pub fn roll_day(&mut self, today: NaiveDate) {
        if self.day != Some(today) {
            self.day = Some(today);
            self.trades_today = 0;
            self.pnl_today = Decimal::ZERO;
        }
    }

    /// Check if we're allowed to open another trade.
    ///
    /// Returns (can_trade, reason)
    pub fn can_trade(&self) -> (bool, String) {
        if self.trades_today >= self.max_trades_per_day {
            return (false, format!(
                "Max daily trades reached ({}/{})",
                self.trades_today, self.max_trades_per_day
            ));
        }
        if !self.daily_loss_limit.is_zero() && self.pnl_today <= -self.daily_loss_limit {
            return (false, format!(
                "Daily loss limit hit ({} <= -{})",
                self.pnl_today, self.daily_loss_limit
            ));
        }
        (true, "OK".to_string())
    }

    pub fn block_reason(&self) -> Option<String> {
        match self.can_trade() {
            (true, _) => None,
            (false, reason) => Some(reason),
        }
    }

    /// Either cap reached; surfaced as the DailyCap flag on snapshots.
    pub fn daily_cap_hit(&self) -> bool {
        !self.can_trade().0
    }

    /// Fixed quantity when configured, else exposure / spot (at least 1).
    pub fn compute_qty(&self, spot: Decimal) -> u32 {
        if self.qty_per_trade > 0 {
            return self.qty_per_trade;
        }
        if spot <= Decimal::ZERO {
            return 1;
        }
        (self.max_exposure / spot).floor().to_u32().unwrap_or(0).max(1)
    }

    pub fn record_open(&mut self) {
        self.trades_today += 1;
    }

    pub fn record_close(&mut self, pnl: Decimal) {
        self.pnl_today += pnl;
    }

    /// Restores today's counters after a restart.
    pub fn restore(&mut self, today: NaiveDate, trades: u32, pnl: Decimal) {
        self.day = Some(today);
        self.trades_today = trades;
        self.pnl_today = pnl;
    }

    pub fn trades_today(&self) -> u32 {
        self.trades_today
    }

    pub fn pnl_today(&self) -> Decimal {
        self.pnl_today
    }
}
