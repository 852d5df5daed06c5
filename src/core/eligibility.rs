//! Entry eligibility (C1..C6)
//!
//! Each snapshot is checked against six conditions:
//!
//! - C1 level trigger: spot within the entry band of the nearest allowed
//!   shifted level
//! - C2 market view allows a side (CE on supports, PE on resistances)
//! - C3 OI delta pattern confirms the side
//! - C4 session timing and data freshness
//! - C5 risk and hygiene blockers (hold, caps, circuit, events, dedupe)
//! - C6 enough room to the next level for the target
//!
//! All six passing makes the level eligible for one paper entry per day.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashSet;

use super::levels::ShiftedLevels;
use super::session::{blocking_window, TimeWindow};
use super::types::{LevelTag, OiTrend, OptionSide, Snapshot};
use crate::config::SymbolParams;

pub struct EligibilityInput<'a> {
    pub snapshot: &'a Snapshot,
    pub params: &'a SymbolParams,
    /// IST wall clock
    pub now: NaiveDateTime,
    pub fresh_max_age_secs: u64,
    pub oi_flat_eps: f64,
    pub no_trade_windows: &'a [TimeWindow],
    /// Engine-side blockers (circuit pause, risk guard, event hold)
    pub blockers: &'a [String],
    /// Dedupe keys already attempted today
    pub attempted: &'a HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelState {
    Cross,
    Near,
    Far,
}

impl LevelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LevelState::Cross => "CROSS",
            LevelState::Near => "NEAR",
            LevelState::Far => "FAR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    pub tag: LevelTag,
    pub price: f64,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub id: &'static str,
    pub ok: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Eligible { side: OptionSide, tag: LevelTag, price: f64 },
    Near { tag: LevelTag, price: f64 },
    NotEligible { failed: Vec<&'static str> },
}

#[derive(Debug, Clone)]
pub struct Eligibility {
    pub side: Option<OptionSide>,
    pub trigger: Option<Trigger>,
    pub level_state: Option<LevelState>,
    pub shifted: ShiftedLevels,
    pub checks: Vec<Check>,
    pub verdict: Verdict,
    pub dedupe_key: Option<String>,
}

/// One attempt per (date, symbol, side, level).
pub fn dedupe_key(date: NaiveDate, symbol: &str, side: OptionSide, tag: LevelTag) -> String {
    format!("{}|{}|{}|{}", date.format("%Y-%m-%d"), symbol.to_ascii_uppercase(), side, tag)
}

fn nearest_trigger(spot: f64, side: OptionSide, shifted: &ShiftedLevels) -> Option<Trigger> {
    side.allowed_levels()
        .into_iter()
        .filter_map(|tag| {
            shifted.get(tag).map(|price| Trigger { tag, price, distance: (spot - price).abs() })
        })
        .fold(None, |best: Option<Trigger>, t| match best {
            Some(b) if b.distance <= t.distance => Some(b),
            _ => Some(t),
        })
}

fn oi_pattern_ok(side: OptionSide, ce: OiTrend, pe: OiTrend) -> bool {
    use OiTrend::*;
    match side {
        OptionSide::Ce => matches!((ce, pe), (Down, Up) | (Down, Down) | (Flat, Up)),
        OptionSide::Pe => matches!((ce, pe), (Up, Down) | (Down, Down) | (Up, Flat)),
    }
}

/// Room from the trigger to the next level in the trade direction.
fn space_points(side: OptionSide, tag: LevelTag, trig: f64, snap: &Snapshot) -> Option<f64> {
    match (side, tag) {
        (OptionSide::Ce, LevelTag::S1) => snap.r1.map(|r1| r1 - trig),
        (OptionSide::Ce, LevelTag::S2) => snap.s1.map(|s1| s1 - trig),
        (OptionSide::Pe, LevelTag::R1) => snap.s1.map(|s1| trig - s1),
        (OptionSide::Pe, LevelTag::R2) => snap.r1.map(|r1| trig - r1),
        _ => None,
    }
}

pub fn evaluate(input: &EligibilityInput) -> Eligibility {
    let snap = input.snapshot;
    let params = input.params;
    let shifted = ShiftedLevels::from_snapshot(snap, params.buffer_points);

    // C2
    let side = snap.mv.entry_side();
    let c2 = Check {
        id: "C2",
        ok: side.is_some(),
        reason: format!("MV={} {}", snap.mv, if side.is_some() { "OK" } else { "block" }),
    };

    let trigger = match (side, snap.spot) {
        (Some(side), Some(spot)) => nearest_trigger(spot, side, &shifted),
        _ => None,
    };

    // C1
    let band = params.entry_band;
    let level_state = trigger.map(|t| {
        if t.distance <= band {
            LevelState::Cross
        } else if t.distance <= band * 2.0 {
            LevelState::Near
        } else {
            LevelState::Far
        }
    });
    let c1 = match (trigger, level_state) {
        (Some(t), Some(state)) => Check {
            id: "C1",
            ok: state == LevelState::Cross,
            reason: format!("{} @ {} ({:.2})", state.as_str(), t.tag.shifted_label(), t.price),
        },
        _ => Check { id: "C1", ok: false, reason: "no trigger (MV/levels)".to_string() },
    };

    // C3
    let ce = OiTrend::classify(snap.ce_oi_delta, input.oi_flat_eps);
    let pe = OiTrend::classify(snap.pe_oi_delta, input.oi_flat_eps);
    let c3 = match side {
        Some(side) => Check {
            id: "C3",
            ok: oi_pattern_ok(side, ce, pe),
            reason: format!("CEΔ={} / PEΔ={}", ce.as_str(), pe.as_str()),
        },
        None => Check { id: "C3", ok: false, reason: "MV unknown".to_string() },
    };

    // C4
    let blocked = blocking_window(input.no_trade_windows, input.now.time());
    let fresh = snap.age_secs <= input.fresh_max_age_secs && !snap.stale;
    let time_part = match blocked {
        Some(w) => format!("blocked time {}", w),
        None => "time OK".to_string(),
    };
    let fresh_part = if fresh {
        format!("fresh {}s≤{}s", snap.age_secs, input.fresh_max_age_secs)
    } else {
        "stale/old".to_string()
    };
    let c4 = Check {
        id: "C4",
        ok: blocked.is_none() && fresh,
        reason: format!("{}, {}", time_part, fresh_part),
    };

    // C5
    let dedupe = match (side, trigger) {
        (Some(side), Some(t)) => Some(dedupe_key(input.now.date(), &snap.symbol, side, t.tag)),
        _ => None,
    };
    let mut blockers: Vec<String> = Vec::new();
    if snap.hold {
        blockers.push("HOLD".to_string());
    }
    if snap.daily_cap_hit {
        blockers.push("DailyCap".to_string());
    }
    blockers.extend(input.blockers.iter().cloned());
    if let Some(key) = &dedupe {
        if input.attempted.contains(key) {
            blockers.push("already attempted today".to_string());
        }
    }
    let c5 = Check {
        id: "C5",
        ok: blockers.is_empty(),
        reason: if blockers.is_empty() { "OK".to_string() } else { blockers.join(", ") },
    };

    // C6
    let target = params.target_min_points;
    let c6 = match (side, trigger) {
        (Some(side), Some(t)) => match space_points(side, t.tag, t.price, snap) {
            Some(space) => Check {
                id: "C6",
                ok: space >= target,
                reason: format!("space {:.0} {} target {:.0}", space, if space >= target { "≥" } else { "<" }, target),
            },
            None => Check { id: "C6", ok: false, reason: "space n/a".to_string() },
        },
        _ => Check { id: "C6", ok: false, reason: "—".to_string() },
    };

    let checks = vec![c1, c2, c3, c4, c5, c6];
    let failed: Vec<&'static str> = checks.iter().filter(|c| !c.ok).map(|c| c.id).collect();

    let verdict = match (side, trigger) {
        (Some(side), Some(t)) if failed.is_empty() => Verdict::Eligible { side, tag: t.tag, price: t.price },
        (Some(_), Some(t)) if level_state == Some(LevelState::Near) => Verdict::Near { tag: t.tag, price: t.price },
        _ => Verdict::NotEligible { failed },
    };

    Eligibility { side, trigger, level_state, shifted, checks, verdict, dedupe_key: dedupe }
}

fn fmt_opt(v: Option<f64>, digits: usize) -> String {
    match v {
        Some(x) => format!("{:.*}", digits, x),
        None => "—".to_string(),
    }
}

fn fmt_signed(v: Option<f64>) -> String {
    match v {
        Some(x) => format!("{:+.0}", x),
        None => "—".to_string(),
    }
}

fn mark(ok: bool) -> &'static str {
    if ok { "✅" } else { "❌" }
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self.verdict, Verdict::Eligible { .. })
    }

    pub fn check(&self, id: &str) -> Option<&Check> {
        self.checks.iter().find(|c| c.id == id)
    }

    /// "C1: NEAR @ S1* (24888.00)" style lines for every failed check.
    pub fn failed_reasons(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|c| !c.ok)
            .map(|c| format!("{}: {}", c.id, c.reason))
            .collect()
    }

    pub fn summary_line(&self) -> String {
        match &self.verdict {
            Verdict::Eligible { side, tag, price } => {
                format!("✅ Eligible - {} @ {} ({:.2})", side, tag.shifted_label(), price)
            }
            Verdict::Near { tag, price } => {
                format!("⏳ NEAR - waiting at {} ({:.2})", tag.shifted_label(), price)
            }
            Verdict::NotEligible { failed } => {
                let list = if failed.is_empty() { "rules".to_string() } else { failed.join(", ") };
                format!("❌ Not eligible - failed: {}", list)
            }
        }
    }

    /// Multi-line snapshot report with the six checks and the verdict.
    pub fn render(&self, snap: &Snapshot, buffer: f64) -> String {
        let exp = if snap.expiry.is_empty() { "—" } else { snap.expiry.as_str() };
        let sh = &self.shifted;
        let mut lines = vec![
            "OC Snapshot".to_string(),
            format!("Symbol: {}  |  Exp: {}  |  Spot: {}", snap.symbol, exp, fmt_opt(snap.spot, 2)),
            format!(
                "Levels: S1 {}  S2 {}  R1 {}  R2 {}",
                fmt_opt(snap.s1, 2), fmt_opt(snap.s2, 2), fmt_opt(snap.r1, 2), fmt_opt(snap.r2, 2)
            ),
            format!(
                "Shifted: S1* {}  S2* {}  R1* {}  R2* {}",
                fmt_opt(sh.s1, 2), fmt_opt(sh.s2, 2), fmt_opt(sh.r1, 2), fmt_opt(sh.r2, 2)
            ),
            format!(
                "Buffer: {:.0}  |  MV: {}  |  PCR: {}  |  MP: {}",
                buffer, snap.mv, fmt_opt(snap.pcr, 2), fmt_opt(snap.max_pain, 2)
            ),
            format!(
                "Source: {}  |  As-of: {}  |  Age: {}s{}",
                snap.source.as_str(),
                crate::core::session::format_ist(snap.fetched_at),
                snap.age_secs,
                if snap.stale { "  |  ⚠️ STALE" } else { "" }
            ),
            String::new(),
            "Checks".to_string(),
        ];
        for c in &self.checks {
            let mut line = format!("- {}: {} {}", c.id, mark(c.ok), c.reason);
            if c.id == "C3" {
                line.push_str(&format!(
                    "  (raw CEΔ={}, PEΔ={})",
                    fmt_signed(snap.ce_oi_delta),
                    fmt_signed(snap.pe_oi_delta)
                ));
            }
            lines.push(line);
        }
        lines.push(String::new());
        lines.push(format!("Summary: {}", self.summary_line()));
        lines.join("\n")
    }
}
