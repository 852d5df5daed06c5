//! Paper book
//!
//! Open paper trades keyed by trade id, plus the set of dedupe keys already
//! attempted today so each level is traded at most once per day.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::info;

use super::exits::{self, ExitReason, ExitRules, TrailState};
use super::to_decimal;
use crate::config::SymbolParams;
use crate::core::session::to_ist;
use crate::core::types::{LevelTag, OptionSide, Snapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperTrade {
    pub trade_id: String,
    pub symbol: String,
    pub side: OptionSide,
    pub trigger: LevelTag,
    pub trigger_price: Decimal,
    pub entry_spot: Decimal,
    pub qty: u32,
    /// Absolute underlying level
    pub sl: Decimal,
    /// Absolute underlying level
    pub tp: Decimal,
    pub dedupe_key: String,
    pub opened_at: DateTime<Utc>,
    pub reason: String,
    #[serde(default)]
    pub trail: TrailState,
}

impl PaperTrade {
    /// Points in the trade's favour at `exit`.
    pub fn pnl_points(&self, exit: Decimal) -> Decimal {
        match self.side {
            OptionSide::Ce => exit - self.entry_spot,
            OptionSide::Pe => self.entry_spot - exit,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedTrade {
    pub trade: PaperTrade,
    pub exit_spot: Option<Decimal>,
    pub pnl_points: Decimal,
    pub pnl: Decimal,
    pub reason: ExitReason,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EntryOrder {
    pub symbol: String,
    pub side: OptionSide,
    pub tag: LevelTag,
    pub trigger_price: f64,
    pub spot: f64,
    pub qty: u32,
    pub dedupe_key: String,
    pub reason: String,
}

/// `YYYYMMDDTHHMMSS_SYMBOL_SIDE_TAG` on the IST clock.
pub fn trade_id(now: DateTime<Utc>, symbol: &str, side: OptionSide, tag: LevelTag) -> String {
    format!(
        "{}_{}_{}_{}",
        to_ist(now).format("%Y%m%dT%H%M%S"),
        symbol.to_ascii_uppercase(),
        side,
        tag
    )
}

pub struct PaperBook {
    open: BTreeMap<String, PaperTrade>,
    attempted: HashSet<String>,
    day: Option<NaiveDate>,
    point_value: Decimal,
}

impl PaperBook {
    pub fn new(point_value: f64) -> Self {
        Self {
            open: BTreeMap::new(),
            attempted: HashSet::new(),
            day: None,
            point_value: to_decimal(point_value),
        }
    }

    /// Clears the dedupe set on a new IST date. Open trades carry over.
    pub fn roll_day(&mut self, today: NaiveDate) {
        if self.day != Some(today) {
            self.day = Some(today);
            self.attempted.clear();
        }
    }

    pub fn attempted(&self) -> &HashSet<String> {
        &self.attempted
    }

    pub fn mark_attempted(&mut self, key: &str) {
        self.attempted.insert(key.to_string());
    }

    pub fn open_trades(&self) -> impl Iterator<Item = &PaperTrade> {
        self.open.values()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Re-adopts a trade recovered from the journal.
    pub fn restore(&mut self, trade: PaperTrade) {
        self.attempted.insert(trade.dedupe_key.clone());
        self.open.insert(trade.trade_id.clone(), trade);
    }

    /// Opens a trade unless its level was already attempted today.
    pub fn open(&mut self, order: EntryOrder, params: &SymbolParams, now: DateTime<Utc>) -> Option<PaperTrade> {
        if !self.attempted.insert(order.dedupe_key.clone()) {
            return None;
        }

        let entry = to_decimal(order.spot);
        let sl_pts = to_decimal(params.sl_points);
        let tp_pts = to_decimal(params.tp_points);
        let (sl, tp) = match order.side {
            OptionSide::Ce => (entry - sl_pts, entry + tp_pts),
            OptionSide::Pe => (entry + sl_pts, entry - tp_pts),
        };

        let trade = PaperTrade {
            trade_id: trade_id(now, &order.symbol, order.side, order.tag),
            symbol: order.symbol.to_ascii_uppercase(),
            side: order.side,
            trigger: order.tag,
            trigger_price: to_decimal(order.trigger_price),
            entry_spot: entry,
            qty: order.qty.max(1),
            sl,
            tp,
            dedupe_key: order.dedupe_key,
            opened_at: now,
            reason: order.reason,
            trail: TrailState::default(),
        };
        info!(
            "PAPER OPEN {} {} @ {} spot={} SL={} TP={} qty={}",
            trade.symbol, trade.side, trade.trigger.shifted_label(), entry, sl, tp, trade.qty
        );
        self.open.insert(trade.trade_id.clone(), trade.clone());
        Some(trade)
    }

    /// Drops a trade without closing it (journal rejected the open).
    pub fn discard(&mut self, trade_id: &str) -> Option<PaperTrade> {
        self.open.remove(trade_id)
    }

    pub fn close(
        &mut self,
        trade_id: &str,
        exit_spot: Option<Decimal>,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Option<ClosedTrade> {
        let trade = self.open.remove(trade_id)?;
        let pnl_points = exit_spot.map(|x| trade.pnl_points(x)).unwrap_or(Decimal::ZERO);
        let pnl = (pnl_points * Decimal::from(trade.qty) * self.point_value).round_dp(2);
        info!(
            "PAPER CLOSE {} {} reason={} exit={:?} pnl={}",
            trade.trade_id, trade.side, reason, exit_spot, pnl
        );
        Some(ClosedTrade { trade, exit_spot, pnl_points, pnl, reason, closed_at: now })
    }

    /// Runs the exit rules over every open trade of the snapshot's symbol.
    pub fn evaluate_exits(&mut self, snap: Option<&Snapshot>, rules: &ExitRules, now: DateTime<Utc>) -> Vec<ClosedTrade> {
        let now_ist = to_ist(now);
        let mut decisions = Vec::new();
        for trade in self.open.values_mut() {
            if let Some(s) = snap {
                if s.symbol != trade.symbol {
                    continue;
                }
            }
            if let Some(d) = exits::evaluate(trade, snap, rules, now_ist) {
                decisions.push((trade.trade_id.clone(), d));
            }
        }
        decisions
            .into_iter()
            .filter_map(|(id, d)| self.close(&id, d.exit_spot, d.reason, now))
            .collect()
    }

    /// Closes everything at `spot`. Without a spot nothing is closed.
    pub fn flatten_all(&mut self, spot: Option<Decimal>, reason: ExitReason, now: DateTime<Utc>) -> Vec<ClosedTrade> {
        let Some(spot) = spot else {
            return Vec::new();
        };
        let ids: Vec<String> = self.open.keys().cloned().collect();
        ids.iter()
            .filter_map(|id| self.close(id, Some(spot), reason, now))
            .collect()
    }
}
