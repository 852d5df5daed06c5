//! Snapshot refresher
//!
//! Wraps an [`OptionChainProvider`] with a cadence cache and a 429 cooldown,
//! and turns each provider quote into an enriched [`Snapshot`]: current age,
//! HOLD / daily-cap flags, market view, staleness and a one-line summary.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::FeedError;
use crate::config::{parse_truthy, OverrideFlags};
use crate::core::levels::{derive_view, ChainStats};
use crate::core::session::ist_date;
use crate::core::types::{OptionSide, Snapshot, SnapshotSource};

#[async_trait]
pub trait OptionChainProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self, symbol: &str) -> Result<ProviderQuote, FeedError>;
}

/// Raw analysed chain as returned by a provider
#[derive(Debug, Clone)]
pub struct ProviderQuote {
    pub symbol: String,
    pub expiry: String,
    pub stats: ChainStats,
    pub fetched_at: DateTime<Utc>,
}

/// Effective HOLD / daily-cap state for a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HoldFlags {
    pub hold: bool,
    pub daily_cap_hit: bool,
}

impl HoldFlags {
    /// Environment flags win; journal override rows fill the gaps.
    pub fn resolve(env: &OverrideFlags, overrides: &HashMap<String, String>) -> Self {
        let from_journal = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| overrides.get(*k))
                .and_then(|v| parse_truthy(v))
                .unwrap_or(false)
        };
        Self {
            hold: env
                .hold
                .unwrap_or_else(|| from_journal(&["hold", "system_hold", "manual_hold"])),
            daily_cap_hit: env
                .daily_cap_hit
                .unwrap_or_else(|| from_journal(&["daily_cap_hit", "daily_cap", "cap_hit"])),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshStatus {
    Fresh,
    Cached,
    Cooldown,
    ProviderError(String),
}

#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub status: RefreshStatus,
    pub snapshot: Option<Snapshot>,
}

pub struct SnapshotRefresher {
    provider: Arc<dyn OptionChainProvider>,
    symbol: String,
    cadence: Duration,
    cooldown: Duration,
    max_snapshot_age_secs: u64,
    last_fetch: Option<DateTime<Utc>>,
    last: Option<Snapshot>,
    cooldown_until: Option<DateTime<Utc>>,
}

impl SnapshotRefresher {
    pub fn new(
        provider: Arc<dyn OptionChainProvider>,
        symbol: &str,
        cadence_secs: u64,
        cooldown_secs: u64,
        max_snapshot_age_secs: u64,
    ) -> Self {
        Self {
            provider,
            symbol: symbol.to_ascii_uppercase(),
            cadence: Duration::seconds(cadence_secs.max(3) as i64),
            cooldown: Duration::seconds(cooldown_secs as i64),
            max_snapshot_age_secs,
            last_fetch: None,
            last: None,
            cooldown_until: None,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.last.as_ref()
    }

    /// Seeds the cache (journal fallback on start) without counting as a fetch.
    pub fn seed(&mut self, snap: Snapshot) {
        if self.last.is_none() {
            self.last = Some(snap);
        }
    }

    pub fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        self.cooldown_until
    }

    pub async fn refresh(&mut self, flags: HoldFlags, now: DateTime<Utc>) -> RefreshOutcome {
        if let Some(until) = self.cooldown_until {
            if now < until {
                return self.cached(RefreshStatus::Cooldown, flags, now);
            }
            self.cooldown_until = None;
        }

        if let (Some(last_fetch), Some(_)) = (self.last_fetch, &self.last) {
            if now - last_fetch < self.cadence {
                return self.cached(RefreshStatus::Cached, flags, now);
            }
        }

        match self.provider.fetch(&self.symbol).await {
            Ok(quote) => {
                self.last_fetch = Some(now);
                let snap = finalize(snapshot_from_quote(quote), flags, now, self.max_snapshot_age_secs);
                self.last = Some(snap.clone());
                RefreshOutcome { status: RefreshStatus::Fresh, snapshot: Some(snap) }
            }
            Err(FeedError::RateLimited) => {
                let until = now + self.cooldown;
                warn!("{} rate limited; cooling down until {}", self.provider.name(), until);
                self.cooldown_until = Some(until);
                self.cached(RefreshStatus::Cooldown, flags, now)
            }
            Err(e) => {
                warn!("{} fetch failed: {}", self.provider.name(), e);
                self.cached(RefreshStatus::ProviderError(e.to_string()), flags, now)
            }
        }
    }

    fn cached(&self, status: RefreshStatus, flags: HoldFlags, now: DateTime<Utc>) -> RefreshOutcome {
        let snapshot = self
            .last
            .clone()
            .map(|s| finalize(s, flags, now, self.max_snapshot_age_secs));
        RefreshOutcome { status, snapshot }
    }
}

pub fn snapshot_from_quote(q: ProviderQuote) -> Snapshot {
    let mut s = Snapshot::new(&q.symbol, SnapshotSource::Provider, q.fetched_at);
    s.expiry = q.expiry;
    s.spot = Some(q.stats.spot);
    if let Some(lv) = q.stats.levels {
        s.s1 = Some(lv.s1);
        s.s2 = Some(lv.s2);
        s.r1 = Some(lv.r1);
        s.r2 = Some(lv.r2);
    }
    s.pcr = Some(q.stats.pcr);
    s.max_pain = q.stats.max_pain;
    s.ce_oi_delta = Some(q.stats.ce_oi_delta);
    s.pe_oi_delta = Some(q.stats.pe_oi_delta);
    s.mv = q.stats.mv;
    s
}

/// Recomputes the derived fields of a snapshot for the given instant.
pub fn finalize(mut snap: Snapshot, flags: HoldFlags, now: DateTime<Utc>, max_age_secs: u64) -> Snapshot {
    snap.age_secs = (now - snap.fetched_at).num_seconds().max(0) as u64;
    snap.hold = flags.hold;
    snap.daily_cap_hit = flags.daily_cap_hit;

    if !snap.mv.is_known() {
        snap.mv = derive_view(snap.pcr, snap.max_pain, snap.spot, snap.ce_oi_delta, snap.pe_oi_delta);
    }

    snap.stale = false;
    snap.stale_reasons.clear();
    let today = ist_date(now);
    if let Ok(exp) = NaiveDate::parse_from_str(snap.expiry.trim(), "%Y-%m-%d") {
        if exp < today {
            snap.stale_reasons.push(format!("expiry {} < today {}", exp, today));
        }
    }
    if snap.age_secs > max_age_secs {
        snap.stale_reasons.push(format!("age>{}s", max_age_secs));
    }
    snap.stale = !snap.stale_reasons.is_empty();

    snap.summary = summarize(&snap);
    snap
}

/// One-line bias summary for alerts and the status file.
pub fn summarize(snap: &Snapshot) -> String {
    if snap.stale {
        return format!("STALE DATA - no trade ({})", snap.stale_reasons.join("; "));
    }
    if snap.hold || snap.daily_cap_hit {
        let what = match (snap.hold, snap.daily_cap_hit) {
            (true, true) => "HOLD & DailyCap",
            (true, false) => "HOLD",
            _ => "DailyCap",
        };
        return format!("System {} - no trade", what);
    }

    let Some(side) = snap.mv.entry_side() else {
        return "Insufficient data - waiting for live feed".to_string();
    };

    let pcr_mp = match (snap.pcr, snap.max_pain, snap.spot) {
        (Some(pcr), Some(mp), Some(spot)) => Some(match side {
            OptionSide::Ce => pcr >= 1.0 && mp >= spot,
            OptionSide::Pe => pcr < 1.0 && mp <= spot,
        }),
        _ => None,
    };
    let oi = match (snap.ce_oi_delta, snap.pe_oi_delta) {
        (Some(ce), Some(pe)) => Some(match side {
            OptionSide::Ce => pe > 0.0 && ce <= 0.0,
            OptionSide::Pe => ce > 0.0 && pe <= 0.0,
        }),
        _ => None,
    };

    match (pcr_mp, oi) {
        (Some(true), Some(true)) => {
            format!("Bias: {} - {} setup aligned (PCR/MP + OI delta)", snap.mv, side)
        }
        (Some(false), _) | (_, Some(false)) => {
            let mut failed = Vec::new();
            if pcr_mp == Some(false) {
                failed.push("PCR/MP");
            }
            if oi == Some(false) {
                failed.push("OI delta");
            }
            format!("Bias: {} - {} not aligned: {}", snap.mv, side, failed.join(", "))
        }
        _ => format!("Bias: {} - waiting for OI delta/PCR alignment", snap.mv),
    }
}

/// Logs a refresh outcome at the right level.
pub fn log_outcome(outcome: &RefreshOutcome) {
    match (&outcome.status, &outcome.snapshot) {
        (RefreshStatus::Fresh, Some(s)) => info!(
            "OC {} spot={:?} S1={:?} R1={:?} PCR={:?} MV={} | {}",
            s.symbol, s.spot, s.s1, s.r1, s.pcr, s.mv, s.summary
        ),
        (RefreshStatus::Fresh, None) | (RefreshStatus::Cached, _) => {}
        (RefreshStatus::Cooldown, _) => info!("OC refresh skipped: provider cooldown"),
        (RefreshStatus::ProviderError(e), _) => warn!("OC refresh using cached snapshot: {}", e),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::levels::SrLevels;
    use crate::core::types::MarketView;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Scripted provider: pops one result per fetch, repeating the last.
    pub(crate) struct FakeProvider {
        pub results: Mutex<Vec<Result<ProviderQuote, FeedError>>>,
        pub calls: Mutex<u32>,
    }

    impl FakeProvider {
        pub(crate) fn new(results: Vec<Result<ProviderQuote, FeedError>>) -> Self {
            Self { results: Mutex::new(results), calls: Mutex::new(0) }
        }

        pub(crate) fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl OptionChainProvider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        async fn fetch(&self, _symbol: &str) -> Result<ProviderQuote, FeedError> {
            *self.calls.lock().unwrap() += 1;
            let mut results = self.results.lock().unwrap();
            if results.len() > 1 {
                results.remove(0)
            } else {
                match results.first() {
                    Some(Ok(q)) => Ok(q.clone()),
                    Some(Err(_)) | None => Err(FeedError::NoExpiry),
                }
            }
        }
    }

    pub(crate) fn quote(fetched_at: DateTime<Utc>, spot: f64) -> ProviderQuote {
        ProviderQuote {
            symbol: "NIFTY".to_string(),
            expiry: "2024-08-08".to_string(),
            stats: ChainStats {
                spot,
                levels: Some(SrLevels { s1: 24900.0, s2: 24850.0, r1: 24950.0, r2: 25000.0 }),
                pcr: 1.2,
                max_pain: Some(24950.0),
                ce_oi_delta: -500.0,
                pe_oi_delta: 800.0,
                mv: MarketView::Bullish,
            },
            fetched_at,
        }
    }

    pub(crate) fn t0() -> DateTime<Utc> {
        // 2024-08-07 11:00 IST
        Utc.with_ymd_and_hms(2024, 8, 7, 5, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn test_cadence_cache() {
        let provider = Arc::new(FakeProvider::new(vec![Ok(quote(t0(), 24890.0))]));
        let mut r = SnapshotRefresher::new(provider.clone(), "nifty", 10, 30, 300);

        let first = r.refresh(HoldFlags::default(), t0()).await;
        assert_eq!(first.status, RefreshStatus::Fresh);

        let second = r.refresh(HoldFlags::default(), t0() + Duration::seconds(5)).await;
        assert_eq!(second.status, RefreshStatus::Cached);
        assert_eq!(second.snapshot.unwrap().age_secs, 5);
        assert_eq!(provider.calls(), 1);

        let third = r.refresh(HoldFlags::default(), t0() + Duration::seconds(11)).await;
        assert_eq!(third.status, RefreshStatus::Fresh);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_cooldown() {
        let provider = Arc::new(FakeProvider::new(vec![
            Ok(quote(t0(), 24890.0)),
            Err(FeedError::RateLimited),
            Ok(quote(t0() + Duration::seconds(60), 24900.0)),
        ]));
        let mut r = SnapshotRefresher::new(provider.clone(), "NIFTY", 10, 30, 300);

        r.refresh(HoldFlags::default(), t0()).await;
        let limited = r.refresh(HoldFlags::default(), t0() + Duration::seconds(10)).await;
        assert_eq!(limited.status, RefreshStatus::Cooldown);
        assert_eq!(limited.snapshot.unwrap().spot, Some(24890.0));

        let during = r.refresh(HoldFlags::default(), t0() + Duration::seconds(30)).await;
        assert_eq!(during.status, RefreshStatus::Cooldown);
        assert_eq!(provider.calls(), 2);

        let after = r.refresh(HoldFlags::default(), t0() + Duration::seconds(41)).await;
        assert_eq!(after.status, RefreshStatus::Fresh);
        assert_eq!(after.snapshot.unwrap().spot, Some(24900.0));
    }

    #[tokio::test]
    async fn test_provider_error_without_cache() {
        let provider = Arc::new(FakeProvider::new(vec![Err(FeedError::NoExpiry)]));
        let mut r = SnapshotRefresher::new(provider, "NIFTY", 10, 30, 300);
        let out = r.refresh(HoldFlags::default(), t0()).await;
        assert!(matches!(out.status, RefreshStatus::ProviderError(_)));
        assert!(out.snapshot.is_none());
    }

    #[test]
    fn test_finalize_staleness() {
        let snap = snapshot_from_quote(quote(t0(), 24890.0));

        let fresh = finalize(snap.clone(), HoldFlags::default(), t0() + Duration::seconds(20), 300);
        assert!(!fresh.stale);
        assert_eq!(fresh.summary, "Bias: bullish - CE setup aligned (PCR/MP + OI delta)");

        let old = finalize(snap.clone(), HoldFlags::default(), t0() + Duration::seconds(301), 300);
        assert!(old.stale);
        assert_eq!(old.stale_reasons, vec!["age>300s"]);

        // Two days later the expiry is in the past as well
        let expired = finalize(snap, HoldFlags::default(), t0() + Duration::days(2), 300);
        assert_eq!(expired.stale_reasons.len(), 2);
        assert!(expired.summary.starts_with("STALE DATA"));
    }

    #[test]
    fn test_finalize_flags_and_derived_view() {
        let mut q = quote(t0(), 24890.0);
        q.stats.mv = MarketView::Unknown;
        q.stats.pcr = 0.9;
        q.stats.max_pain = Some(24800.0);
        let snap = snapshot_from_quote(q);

        let out = finalize(snap, HoldFlags { hold: true, daily_cap_hit: false }, t0(), 300);
        assert_eq!(out.mv, MarketView::Bearish);
        assert!(out.hold);
        assert_eq!(out.summary, "System HOLD - no trade");
    }

    #[test]
    fn test_summary_not_aligned() {
        let mut snap = snapshot_from_quote(quote(t0(), 24890.0));
        snap.ce_oi_delta = Some(100.0);
        assert_eq!(summarize(&snap), "Bias: bullish - CE not aligned: OI delta");

        snap.mv = MarketView::Sideways;
        assert_eq!(summarize(&snap), "Insufficient data - waiting for live feed");
    }

    #[test]
    fn test_hold_flags_resolve() {
        let overrides: HashMap<String, String> =
            [("hold".to_string(), "yes".to_string()), ("cap_hit".to_string(), "1".to_string())]
                .into_iter()
                .collect();

        let flags = HoldFlags::resolve(&OverrideFlags::default(), &overrides);
        assert_eq!(flags, HoldFlags { hold: true, daily_cap_hit: true });

        let env = OverrideFlags { hold: Some(false), daily_cap_hit: None };
        let flags = HoldFlags::resolve(&env, &overrides);
        assert_eq!(flags, HoldFlags { hold: false, daily_cap_hit: true });
    }
}
