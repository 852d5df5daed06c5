//! IST session clock
//!
//! The exchange runs on Indian Standard Time (UTC+05:30, no DST). All
//! wall-clock rules (no-trade windows, flat time, scheduled jobs) are
//! evaluated on the naive IST time returned by [`to_ist`].

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use std::fmt;

pub const IST_OFFSET_SECS: i64 = 19_800;

pub fn to_ist(t: DateTime<Utc>) -> NaiveDateTime {
    t.naive_utc() + Duration::seconds(IST_OFFSET_SECS)
}

pub fn ist_date(t: DateTime<Utc>) -> NaiveDate {
    to_ist(t).date()
}

pub fn format_ist(t: DateTime<Utc>) -> String {
    format!("{} IST", to_ist(t).format("%Y-%m-%d %H:%M:%S"))
}

/// Parses "HH:MM" or "HHMM".
pub fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    let (h, m) = match s.split_once(':') {
        Some((h, m)) => (h, m),
        None if s.len() == 4 && s.chars().all(|c| c.is_ascii_digit()) => s.split_at(2),
        None => return None,
    };
    let h: u32 = h.trim().parse().ok()?;
    let m: u32 = m.trim().parse().ok()?;
    NaiveTime::from_hms_opt(h, m, 0)
}

/// Wall-clock window such as `09:15-09:30`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn parse(s: &str) -> Option<Self> {
        let (a, b) = s.trim().split_once('-')?;
        let start = parse_hhmm(a)?;
        let end = parse_hhmm(b)?;
        (start <= end).then_some(Self { start, end })
    }

    /// Half-open: start inclusive, end exclusive.
    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start <= t && t < self.end
    }

    pub fn contains_inclusive(&self, t: NaiveTime) -> bool {
        self.start <= t && t <= self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// First no-trade window containing `t`.
pub fn blocking_window(windows: &[TimeWindow], t: NaiveTime) -> Option<&TimeWindow> {
    windows.iter().find(|w| w.contains(t))
}

pub fn is_trading_day(d: NaiveDate) -> bool {
    !matches!(d.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Regular session 09:15 to 15:30 IST on weekdays.
pub fn is_market_open(ist: NaiveDateTime) -> bool {
    let open = NaiveTime::from_hms_opt(9, 15, 0);
    let close = NaiveTime::from_hms_opt(15, 30, 0);
    match (open, close) {
        (Some(open), Some(close)) => {
            is_trading_day(ist.date()) && ist.time() >= open && ist.time() < close
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(s: &str) -> NaiveTime {
        parse_hhmm(s).unwrap()
    }

    #[test]
    fn test_ist_offset() {
        let utc = Utc.with_ymd_and_hms(2024, 8, 7, 3, 45, 0).unwrap();
        let ist = to_ist(utc);
        assert_eq!(ist.time(), t("09:15"));
        assert_eq!(format_ist(utc), "2024-08-07 09:15:00 IST");

        // 20:00 UTC is already the next day in IST
        let late = Utc.with_ymd_and_hms(2024, 8, 7, 20, 0, 0).unwrap();
        assert_eq!(ist_date(late), NaiveDate::from_ymd_opt(2024, 8, 8).unwrap());
    }

    #[test]
    fn test_parse_hhmm() {
        assert_eq!(parse_hhmm("0915"), Some(t("09:15")));
        assert_eq!(parse_hhmm(" 14:45 "), Some(t("14:45")));
        assert_eq!(parse_hhmm("25:00"), None);
        assert_eq!(parse_hhmm("abc"), None);
    }

    #[test]
    fn test_window_half_open() {
        let w = TimeWindow::parse("09:15-09:30").unwrap();
        assert!(w.contains(t("09:15")));
        assert!(w.contains(t("09:29")));
        assert!(!w.contains(t("09:30")));
        assert!(w.contains_inclusive(t("09:30")));
        assert_eq!(w.to_string(), "09:15-09:30");

        assert!(TimeWindow::parse("0915-0930").is_some());
        assert!(TimeWindow::parse("10:00-09:00").is_none());
        assert!(TimeWindow::parse("all day").is_none());
    }

    #[test]
    fn test_blocking_window() {
        let windows = vec![
            TimeWindow::parse("09:15-09:30").unwrap(),
            TimeWindow::parse("14:45-15:15").unwrap(),
        ];
        assert!(blocking_window(&windows, t("14:50")).is_some());
        assert!(blocking_window(&windows, t("15:15")).is_none());
        assert!(blocking_window(&windows, t("11:00")).is_none());
    }

    #[test]
    fn test_market_open() {
        // 2024-08-07 is a Wednesday, 2024-08-10 a Saturday
        let wed = NaiveDate::from_ymd_opt(2024, 8, 7).unwrap();
        let sat = NaiveDate::from_ymd_opt(2024, 8, 10).unwrap();
        assert!(is_market_open(wed.and_time(t("10:00"))));
        assert!(!is_market_open(wed.and_time(t("09:00"))));
        assert!(!is_market_open(wed.and_time(t("15:30"))));
        assert!(!is_market_open(sat.and_time(t("10:00"))));
    }
}
