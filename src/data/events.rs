//! Event calendar hold gate
//!
//! Active events for today block new entries while the current IST time is
//! inside their window. A blank or unreadable window holds all day.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::core::session::TimeWindow;

const MAX_REASON_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    pub date: NaiveDate,
    /// e.g. RBI, CPI, BUDGET
    pub kind: String,
    /// "HH:MM-HH:MM", empty for all day
    pub window: String,
    pub note: String,
    pub active: bool,
}

impl EventRow {
    /// Inclusive on both ends.
    pub fn holds_at(&self, now: NaiveDateTime) -> bool {
        if !self.active || self.date != now.date() {
            return false;
        }
        match TimeWindow::parse(&self.window) {
            Some(w) => w.contains_inclusive(now.time()),
            None => true,
        }
    }

    fn reason(&self) -> String {
        let window = if self.window.trim().is_empty() { "(all-day)" } else { self.window.trim() };
        format!("{} {} {}", self.kind.trim(), window, self.note.trim()).trim().to_string()
    }
}

/// Joined reasons of every event holding at `now`, or None.
pub fn hold_reason(events: &[EventRow], now: NaiveDateTime) -> Option<String> {
    let reasons: Vec<String> = events
        .iter()
        .filter(|e| e.holds_at(now))
        .map(EventRow::reason)
        .collect();
    if reasons.is_empty() {
        return None;
    }
    Some(reasons.join("; ").chars().take(MAX_REASON_CHARS).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::parse_hhmm;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 8, 7).unwrap()
    }

    fn at(hhmm: &str) -> NaiveDateTime {
        day().and_time(parse_hhmm(hhmm).unwrap())
    }

    fn event(window: &str, active: bool) -> EventRow {
        EventRow {
            date: day(),
            kind: "RBI".to_string(),
            window: window.to_string(),
            note: "policy".to_string(),
            active,
        }
    }

    #[test]
    fn test_window_inclusive() {
        let events = vec![event("10:00-10:30", true)];
        assert_eq!(hold_reason(&events, at("10:30")).as_deref(), Some("RBI 10:00-10:30 policy"));
        assert!(hold_reason(&events, at("10:31")).is_none());
        assert!(hold_reason(&events, at("09:59")).is_none());
    }

    #[test]
    fn test_blank_or_bad_window_is_all_day() {
        let events = vec![event("", true), event("whenever", true)];
        let reason = hold_reason(&events, at("14:00")).unwrap();
        assert_eq!(reason, "RBI (all-day) policy; RBI whenever policy");
    }

    #[test]
    fn test_inactive_and_other_days_ignored() {
        let mut other = event("", true);
        other.date = day().succ_opt().unwrap();
        let events = vec![event("", false), other];
        assert!(hold_reason(&events, at("11:00")).is_none());
    }

    #[test]
    fn test_reason_truncated() {
        let mut e = event("", true);
        e.note = "x".repeat(400);
        assert_eq!(hold_reason(&[e], at("11:00")).unwrap().chars().count(), 300);
    }
}
