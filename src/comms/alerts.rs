//! Near-level alerts
//!
//! Fires when spot sits between a level and its buffer-shifted trigger:
//! supports in `[S - buffer, S]`, resistances in `[R, R + buffer]`. Each
//! (symbol, level) pair is rate limited by a cooldown.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use super::telegram::escape_html;
use crate::core::types::{LevelTag, OptionSide, Snapshot};

const MAX_REASONS_CHARS: usize = 180;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearLevel {
    pub tag: LevelTag,
    /// Buffer-shifted trigger
    pub trigger: f64,
    /// Original level
    pub level: f64,
}

/// Levels whose near zone contains spot right now.
pub fn detect_near_levels(snap: &Snapshot, buffer: f64) -> Vec<NearLevel> {
    let Some(spot) = snap.spot else {
        return Vec::new();
    };
    LevelTag::ALL
        .iter()
        .filter_map(|&tag| {
            let level = snap.level(tag)?;
            let (trigger, inside) = if tag.is_support() {
                let trig = level - buffer;
                (trig, trig <= spot && spot <= level)
            } else {
                let trig = level + buffer;
                (trig, level <= spot && spot <= trig)
            };
            inside.then_some(NearLevel { tag, trigger, level })
        })
        .collect()
}

/// What the entry logic did on this snapshot
#[derive(Debug, Clone, Default)]
pub struct AlertContext {
    pub trade_taken: Option<(OptionSide, LevelTag)>,
    pub reasons: Vec<String>,
}

pub struct NearAlerter {
    cooldown: Duration,
    last_sent: HashMap<(String, LevelTag), DateTime<Utc>>,
}

impl NearAlerter {
    pub fn new(cooldown_secs: u64) -> Self {
        Self {
            cooldown: Duration::seconds(cooldown_secs.max(60) as i64),
            last_sent: HashMap::new(),
        }
    }

    /// Near levels that are not cooling down.
    pub fn due(&self, snap: &Snapshot, buffer: f64, now: DateTime<Utc>) -> Vec<NearLevel> {
        detect_near_levels(snap, buffer)
            .into_iter()
            .filter(|n| match self.last_sent.get(&(snap.symbol.clone(), n.tag)) {
                Some(last) => now - *last >= self.cooldown,
                None => true,
            })
            .collect()
    }

    pub fn mark_sent(&mut self, symbol: &str, tag: LevelTag, now: DateTime<Utc>) {
        self.last_sent.insert((symbol.to_ascii_uppercase(), tag), now);
    }
}

fn fmt2(v: Option<f64>) -> String {
    v.map(|x| format!("{:.2}", x)).unwrap_or_else(|| "n/a".to_string())
}

pub fn near_alert_message(snap: &Snapshot, near: &NearLevel, buffer: f64, ctx: &AlertContext) -> String {
    let zone = if near.tag.is_support() {
        format!("[{:.2} … {:.2}]", near.level - buffer, near.level)
    } else {
        format!("[{:.2} … {:.2}]", near.level, near.level + buffer)
    };

    let action = match ctx.trade_taken {
        Some((side, tag)) if tag == near.tag => format!("Action: TAKEN ✅ {}", side),
        _ => {
            let why = if ctx.reasons.is_empty() {
                "—".to_string()
            } else {
                ctx.reasons.join(", ").chars().take(MAX_REASONS_CHARS).collect()
            };
            format!("Action: NOT TAKEN ❌ ({})", escape_html(&why))
        }
    };

    format!(
        "NEAR ⚠️ {} spot={}  Level={}\n\
        Zone: {}  (trigger={:.2})\n\
        View: {}; {}\n\
        PCR={}  MP={}\n\
        {}",
        snap.symbol,
        fmt2(snap.spot),
        near.tag,
        zone,
        near.trigger,
        snap.mv,
        escape_html(&snap.summary),
        fmt2(snap.pcr),
        fmt2(snap.max_pain),
        action
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MarketView, SnapshotSource};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 7, 5, 30, 0).unwrap()
    }

    fn snap(spot: f64) -> Snapshot {
        let mut s = Snapshot::new("NIFTY", SnapshotSource::Provider, t0());
        s.spot = Some(spot);
        s.s1 = Some(24900.0);
        s.s2 = Some(24850.0);
        s.r1 = Some(24950.0);
        s.r2 = Some(25000.0);
        s.pcr = Some(1.2);
        s.mv = MarketView::Bullish;
        s
    }

    #[test]
    fn test_detect_zones() {
        let near = detect_near_levels(&snap(24895.0), 12.0);
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].tag, LevelTag::S1);
        assert_eq!(near[0].trigger, 24888.0);

        // Edges are inclusive
        assert_eq!(detect_near_levels(&snap(24962.0), 12.0)[0].tag, LevelTag::R1);
        assert!(detect_near_levels(&snap(24920.0), 12.0).is_empty());
        assert!(detect_near_levels(&snap(24901.0), 12.0).is_empty());
    }

    #[test]
    fn test_cooldown() {
        let mut a = NearAlerter::new(10); // floored to 60s
        let s = snap(24895.0);
        assert_eq!(a.due(&s, 12.0, t0()).len(), 1);
        a.mark_sent("nifty", LevelTag::S1, t0());
        assert!(a.due(&s, 12.0, t0() + Duration::seconds(59)).is_empty());
        assert_eq!(a.due(&s, 12.0, t0() + Duration::seconds(60)).len(), 1);
    }

    #[test]
    fn test_message_action_lines() {
        let s = snap(24895.0);
        let near = detect_near_levels(&s, 12.0)[0];

        let taken = AlertContext { trade_taken: Some((OptionSide::Ce, LevelTag::S1)), reasons: vec![] };
        let msg = near_alert_message(&s, &near, 12.0, &taken);
        assert!(msg.starts_with("NEAR ⚠️ NIFTY spot=24895.00  Level=S1"));
        assert!(msg.contains("Zone: [24888.00 … 24900.00]  (trigger=24888.00)"));
        assert!(msg.ends_with("Action: TAKEN ✅ CE"));

        let skipped = AlertContext { trade_taken: None, reasons: vec!["C6: space 22 < target 30".to_string()] };
        let msg = near_alert_message(&s, &near, 12.0, &skipped);
        assert!(msg.ends_with("Action: NOT TAKEN ❌ (C6: space 22 &lt; target 30)"));
    }
}
