//! Exit rules for open paper trades
//!
//! Checked in order on every paper tick: flat time, stop-loss, take-profit,
//! trailing stop, market-view reversal, stale data. The first rule that
//! fires closes the trade.

use chrono::{NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::paper::PaperTrade;
use super::to_decimal;
use crate::config::SymbolParams;
use crate::core::types::{OptionSide, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    Time,
    #[serde(rename = "SL")]
    StopLoss,
    #[serde(rename = "TP")]
    TakeProfit,
    Trail,
    MvReversal,
    Stale,
    EodFlat,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Time => "TIME",
            ExitReason::StopLoss => "SL",
            ExitReason::TakeProfit => "TP",
            ExitReason::Trail => "TRAIL",
            ExitReason::MvReversal => "MV_REVERSAL",
            ExitReason::Stale => "STALE",
            ExitReason::EodFlat => "EOD_FLAT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TIME" => Some(ExitReason::Time),
            "SL" => Some(ExitReason::StopLoss),
            "TP" => Some(ExitReason::TakeProfit),
            "TRAIL" => Some(ExitReason::Trail),
            "MV_REVERSAL" => Some(ExitReason::MvReversal),
            "STALE" => Some(ExitReason::Stale),
            "EOD_FLAT" => Some(ExitReason::EodFlat),
            _ => None,
        }
    }

    pub fn is_stop_loss(&self) -> bool {
        *self == ExitReason::StopLoss
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-trade state carried between ticks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrailState {
    pub trail_line: Option<Decimal>,
    pub best_spot: Option<Decimal>,
    pub mv_bad_streak: u32,
    pub stale_streak: u32,
}

#[derive(Debug, Clone)]
pub struct ExitRules {
    pub trail_trigger: Decimal,
    pub trail_offset: Decimal,
    pub mv_confirm: u32,
    pub stale_confirm: u32,
    pub flat_time: NaiveTime,
    pub fresh_max_age_secs: u64,
}

impl ExitRules {
    pub fn new(params: &SymbolParams, flat_time: NaiveTime, fresh_max_age_secs: u64) -> Self {
        Self {
            trail_trigger: to_decimal(params.trail_trigger_points),
            trail_offset: to_decimal(params.trail_offset_points),
            mv_confirm: params.mv_reversal_confirm.max(1),
            stale_confirm: params.stale_exit_confirm.max(1),
            flat_time,
            fresh_max_age_secs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitDecision {
    pub reason: ExitReason,
    pub exit_spot: Option<Decimal>,
}

/// Evaluates one trade against the latest snapshot; updates its trail state.
pub fn evaluate(
    trade: &mut PaperTrade,
    snap: Option<&Snapshot>,
    rules: &ExitRules,
    now_ist: NaiveDateTime,
) -> Option<ExitDecision> {
    let spot = snap.and_then(|s| s.spot).map(to_decimal);

    if now_ist.time() >= rules.flat_time {
        return Some(ExitDecision { reason: ExitReason::Time, exit_spot: spot });
    }

    let (snap, spot) = match (snap, spot) {
        (Some(s), Some(p)) => (s, p),
        _ => return None,
    };
    let hit = |reason| Some(ExitDecision { reason, exit_spot: Some(spot) });

    match trade.side {
        OptionSide::Ce => {
            if spot <= trade.sl {
                return hit(ExitReason::StopLoss);
            }
            if spot >= trade.tp {
                return hit(ExitReason::TakeProfit);
            }
        }
        OptionSide::Pe => {
            if spot >= trade.sl {
                return hit(ExitReason::StopLoss);
            }
            if spot <= trade.tp {
                return hit(ExitReason::TakeProfit);
            }
        }
    }

    // Trailing stop: armed once the favourable move reaches the trigger,
    // then only ratchets in the trade's favour.
    let state = &mut trade.trail;
    let favourable = match trade.side {
        OptionSide::Ce => spot - trade.entry_spot,
        OptionSide::Pe => trade.entry_spot - spot,
    };
    let best = match (trade.side, state.best_spot) {
        (OptionSide::Ce, Some(b)) => b.max(spot),
        (OptionSide::Pe, Some(b)) => b.min(spot),
        (_, None) => spot,
    };
    state.best_spot = Some(best);

    if let Some(line) = state.trail_line {
        let crossed = match trade.side {
            OptionSide::Ce => spot <= line,
            OptionSide::Pe => spot >= line,
        };
        if crossed {
            return hit(ExitReason::Trail);
        }
    }
    if favourable >= rules.trail_trigger {
        let candidate = match trade.side {
            OptionSide::Ce => spot - rules.trail_offset,
            OptionSide::Pe => spot + rules.trail_offset,
        };
        state.trail_line = Some(match (trade.side, state.trail_line) {
            (OptionSide::Ce, Some(line)) => line.max(candidate),
            (OptionSide::Pe, Some(line)) => line.min(candidate),
            (_, None) => candidate,
        });
    }

    if snap.mv.opposes(trade.side) {
        state.mv_bad_streak += 1;
    } else {
        state.mv_bad_streak = 0;
    }
    if state.mv_bad_streak >= rules.mv_confirm {
        return hit(ExitReason::MvReversal);
    }

    if snap.stale || snap.age_secs > rules.fresh_max_age_secs {
        state.stale_streak += 1;
    } else {
        state.stale_streak = 0;
    }
    if state.stale_streak >= rules.stale_confirm {
        return hit(ExitReason::Stale);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::parse_hhmm;
    use crate::core::types::{LevelTag, MarketView, SnapshotSource};
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;

    fn rules() -> ExitRules {
        ExitRules::new(&SymbolParams::defaults_for("NIFTY"), parse_hhmm("15:15").unwrap(), 90)
    }

    fn at(hhmm: &str) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 8, 7).unwrap().and_time(parse_hhmm(hhmm).unwrap())
    }

    fn trade(side: OptionSide) -> PaperTrade {
        let (sl, tp) = match side {
            OptionSide::Ce => (dec!(24880), dec!(24940)),
            OptionSide::Pe => (dec!(24920), dec!(24860)),
        };
        PaperTrade {
            trade_id: "t1".to_string(),
            symbol: "NIFTY".to_string(),
            side,
            trigger: LevelTag::S1,
            trigger_price: dec!(24900),
            entry_spot: dec!(24900),
            qty: 1,
            sl,
            tp,
            dedupe_key: "k".to_string(),
            opened_at: Utc::now(),
            reason: String::new(),
            trail: TrailState::default(),
        }
    }

    fn snap(spot: f64, mv: MarketView) -> Snapshot {
        let mut s = Snapshot::new("NIFTY", SnapshotSource::Provider, Utc::now());
        s.spot = Some(spot);
        s.mv = mv;
        s.age_secs = 5;
        s
    }

    #[test]
    fn test_time_exit_first() {
        let mut t = trade(OptionSide::Ce);
        let d = evaluate(&mut t, None, &rules(), at("15:15")).unwrap();
        assert_eq!(d.reason, ExitReason::Time);
        assert_eq!(d.exit_spot, None);
    }

    #[test]
    fn test_no_spot_no_exit() {
        let mut t = trade(OptionSide::Ce);
        assert!(evaluate(&mut t, None, &rules(), at("11:00")).is_none());
    }

    #[test]
    fn test_sl_and_tp() {
        let mut t = trade(OptionSide::Ce);
        let d = evaluate(&mut t, Some(&snap(24879.0, MarketView::Bullish)), &rules(), at("11:00")).unwrap();
        assert_eq!(d.reason, ExitReason::StopLoss);

        let mut t = trade(OptionSide::Pe);
        let d = evaluate(&mut t, Some(&snap(24860.0, MarketView::Bearish)), &rules(), at("11:00")).unwrap();
        assert_eq!(d.reason, ExitReason::TakeProfit);
        assert_eq!(d.exit_spot, Some(dec!(24860)));
    }

    #[test]
    fn test_trailing_stop_ratchets() {
        let r = rules();
        let mut t = trade(OptionSide::Ce);
        // +30 arms the trail at 24915
        assert!(evaluate(&mut t, Some(&snap(24930.0, MarketView::Bullish)), &r, at("11:00")).is_none());
        assert_eq!(t.trail.trail_line, Some(dec!(24915)));
        // Pullback above the line does not lower it
        assert!(evaluate(&mut t, Some(&snap(24926.0, MarketView::Bullish)), &r, at("11:01")).is_none());
        assert_eq!(t.trail.trail_line, Some(dec!(24915)));
        let d = evaluate(&mut t, Some(&snap(24914.0, MarketView::Bullish)), &r, at("11:02")).unwrap();
        assert_eq!(d.reason, ExitReason::Trail);
    }

    #[test]
    fn test_mv_reversal_needs_confirmation() {
        let r = rules();
        let mut t = trade(OptionSide::Ce);
        assert!(evaluate(&mut t, Some(&snap(24905.0, MarketView::Bearish)), &r, at("11:00")).is_none());
        assert_eq!(t.trail.mv_bad_streak, 1);
        let d = evaluate(&mut t, Some(&snap(24905.0, MarketView::Bearish)), &r, at("11:01")).unwrap();
        assert_eq!(d.reason, ExitReason::MvReversal);
    }

    #[test]
    fn test_mv_streak_resets() {
        let r = rules();
        let mut t = trade(OptionSide::Pe);
        evaluate(&mut t, Some(&snap(24905.0, MarketView::Bullish)), &r, at("11:00"));
        evaluate(&mut t, Some(&snap(24905.0, MarketView::Sideways)), &r, at("11:01"));
        assert_eq!(t.trail.mv_bad_streak, 0);
    }

    #[test]
    fn test_stale_exit() {
        let r = rules();
        let mut t = trade(OptionSide::Ce);
        let mut s = snap(24905.0, MarketView::Bullish);
        s.age_secs = 200;
        assert!(evaluate(&mut t, Some(&s), &r, at("11:00")).is_none());
        let d = evaluate(&mut t, Some(&s), &r, at("11:01")).unwrap();
        assert_eq!(d.reason, ExitReason::Stale);
    }

    #[test]
    fn test_reason_roundtrip_names() {
        assert_eq!(ExitReason::parse("mv_reversal"), Some(ExitReason::MvReversal));
        assert_eq!(ExitReason::EodFlat.to_string(), "EOD_FLAT");
        assert_eq!(serde_json::to_string(&ExitReason::StopLoss).unwrap(), "\"SL\"");
    }
}
