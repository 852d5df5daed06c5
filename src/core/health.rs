//! Health Monitor - Detects option-chain feed gaps during market hours

use chrono::{DateTime, Duration, Utc};

pub struct HealthMonitor {
    last_fresh: DateTime<Utc>,
    stale_after: Duration,
    gap_count: u32,
    market_open: bool,
}

impl HealthMonitor {
    /// `stale_after_secs` is how long the feed may go without a fresh
    /// snapshot before each check counts a gap.
    pub fn new(stale_after_secs: u64, now: DateTime<Utc>) -> Self {
        Self {
            last_fresh: now,
            stale_after: Duration::seconds(stale_after_secs as i64),
            gap_count: 0,
            market_open: true,
        }
    }

    pub fn record_fresh(&mut self, now: DateTime<Utc>) {
        let was_stale = self.is_stale(now);
        self.last_fresh = now;
        if was_stale {
            self.gap_count = 0; // Reset on recovery
        }
    }

    pub fn set_market_open(&mut self, open: bool) {
        self.market_open = open;
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.last_fresh > self.stale_after
    }

    pub fn check(&mut self, now: DateTime<Utc>) -> HealthStatus {
        if !self.market_open {
            return HealthStatus::MarketClosed;
        }
        let age = now - self.last_fresh;
        if age > self.stale_after {
            self.gap_count += 1;
            return HealthStatus::StaleFeed {
                seconds: age.num_seconds().max(0) as u64,
                gaps: self.gap_count,
            };
        }
        HealthStatus::Healthy
    }

    pub fn should_alert(&self) -> bool {
        self.gap_count >= 3
    }

    pub fn gap_count(&self) -> u32 {
        self.gap_count
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> u64 {
        (now - self.last_fresh).num_seconds().max(0) as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    StaleFeed { seconds: u64, gaps: u32 },
    MarketClosed,
}

/// Rate limits repeated alerts of the same kind.
pub struct AlertThrottle {
    last_sent: Option<DateTime<Utc>>,
    interval: Duration,
}

impl AlertThrottle {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            last_sent: None,
            interval: Duration::seconds(interval_secs as i64),
        }
    }

    pub fn should_send(&mut self, now: DateTime<Utc>) -> bool {
        match self.last_sent {
            Some(last) if now - last < self.interval => false,
            _ => {
                self.last_sent = Some(now);
                true
            }
        }
    }
}
