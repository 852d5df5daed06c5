//! Circuit breaker
//!
//! Too many stop-losses in a short window pause new entries for a while.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use tracing::warn;

use super::exits::ExitReason;
use crate::config::CircuitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trip {
    pub until: DateTime<Utc>,
    pub pause_mins: i64,
}

pub struct CircuitBreaker {
    threshold: usize,
    window: Duration,
    pause: Duration,
    sl_hits: VecDeque<DateTime<Utc>>,
    pause_until: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(cfg: &CircuitConfig) -> Self {
        Self {
            threshold: cfg.sl_threshold.max(1) as usize,
            window: Duration::minutes(cfg.window_mins as i64),
            pause: Duration::minutes(cfg.pause_mins as i64),
            sl_hits: VecDeque::new(),
            pause_until: None,
        }
    }

    /// Feeds an exit; returns the trip when this exit opens the breaker.
    pub fn record_exit(&mut self, reason: ExitReason, now: DateTime<Utc>) -> Option<Trip> {
        if !reason.is_stop_loss() {
            return None;
        }
        self.sl_hits.push_back(now);
        while let Some(&first) = self.sl_hits.front() {
            if now - first > self.window {
                self.sl_hits.pop_front();
            } else {
                break;
            }
        }
        if self.sl_hits.len() < self.threshold {
            return None;
        }

        let until = now + self.pause;
        warn!(
            "Circuit breaker tripped: {} SL exits within {}m, pausing entries until {}",
            self.sl_hits.len(),
            self.window.num_minutes(),
            until
        );
        self.sl_hits.clear();
        self.pause_until = Some(until);
        Some(Trip { until, pause_mins: self.pause.num_minutes() })
    }

    /// Remaining pause, if any.
    pub fn is_paused(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.pause_until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }

    pub fn reset(&mut self) {
        self.sl_hits.clear();
        self.pause_until = None;
    }
}

/// "circuit pause 12m05s left"
pub fn pause_label(remaining: Duration) -> String {
    let secs = remaining.num_seconds().max(0);
    format!("circuit pause {}m{:02}s left", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(mins: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 7, 4, 0, 0).unwrap() + Duration::minutes(mins)
    }

    #[test]
    fn test_trips_on_third_sl_in_window() {
        let mut cb = CircuitBreaker::new(&CircuitConfig::default());
        assert!(cb.record_exit(ExitReason::StopLoss, t(0)).is_none());
        assert!(cb.record_exit(ExitReason::TakeProfit, t(1)).is_none());
        assert!(cb.record_exit(ExitReason::StopLoss, t(5)).is_none());
        let trip = cb.record_exit(ExitReason::StopLoss, t(10)).unwrap();
        assert_eq!(trip.until, t(30));
        assert_eq!(trip.pause_mins, 20);

        assert_eq!(cb.is_paused(t(12)), Some(Duration::minutes(18)));
        assert!(cb.is_paused(t(30)).is_none());
    }

    #[test]
    fn test_old_hits_expire() {
        let mut cb = CircuitBreaker::new(&CircuitConfig::default());
        cb.record_exit(ExitReason::StopLoss, t(0));
        cb.record_exit(ExitReason::StopLoss, t(10));
        // First hit is 16 minutes old by now
        assert!(cb.record_exit(ExitReason::StopLoss, t(16)).is_none());
        assert!(cb.record_exit(ExitReason::StopLoss, t(20)).is_some());
    }

    #[test]
    fn test_reset_and_label() {
        let mut cb = CircuitBreaker::new(&CircuitConfig::default());
        for m in 0..3 {
            cb.record_exit(ExitReason::StopLoss, t(m));
        }
        assert!(cb.is_paused(t(3)).is_some());
        cb.reset();
        assert!(cb.is_paused(t(3)).is_none());

        assert_eq!(pause_label(Duration::seconds(725)), "circuit pause 12m05s left");
    }
}
