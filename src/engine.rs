//! Day loop
//!
//! One worker, one symbol. Tokio intervals drive the option-chain refresh,
//! the paper-exit tick, the heartbeat and a wall-clock tick that fires the
//! once-per-date jobs (flatten, end of day, nightly digest) and the feed
//! health check. Every job logs its own failure and carries on.

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::comms::alerts::{near_alert_message, AlertContext, NearAlerter};
use crate::comms::telegram::{self, Notifier};
use crate::config::{schedule_time, Config, ShiftMode, SymbolParams};
use crate::core::eligibility::{self, Eligibility, EligibilityInput, Verdict};
use crate::core::health::{AlertThrottle, HealthMonitor, HealthStatus};
use crate::core::session::{format_ist, is_market_open, is_trading_day, ist_date, to_ist, TimeWindow};
use crate::core::types::Snapshot;
use crate::data::{hold_reason, Journal};
use crate::feed::refresh::{finalize, log_outcome, HoldFlags, OptionChainProvider, RefreshStatus, SnapshotRefresher};
use crate::status::WorkerStatus;
use crate::trading::circuit::pause_label;
use crate::trading::performance::{self, DayPerformance};
use crate::trading::{to_decimal, CircuitBreaker, ClosedTrade, EntryOrder, ExitReason, ExitRules, PaperBook, RiskGuard};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const SEP: &str = "===========================================================";
const CLOCK_TICK_SECS: u64 = 10;
const FEED_GAP_ALERT_SECS: u64 = 300;
/// A scheduled job still runs if the worker comes up this late.
const JOB_GRACE_SECS: i64 = 3600;
const NIGHTLY_LOOKBACK_DAYS: i64 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    Flatten,
    EndOfDay,
    Nightly,
}

impl Job {
    pub fn as_str(&self) -> &'static str {
        match self {
            Job::Flatten => "flatten",
            Job::EndOfDay => "eod",
            Job::Nightly => "nightly",
        }
    }
}

fn status_label(status: &RefreshStatus) -> String {
    match status {
        RefreshStatus::Fresh => "fresh".to_string(),
        RefreshStatus::Cached => "cached".to_string(),
        RefreshStatus::Cooldown => "cooldown".to_string(),
        RefreshStatus::ProviderError(e) => format!("error: {}", e),
    }
}

pub struct DayLoop {
    cfg: Config,
    params: SymbolParams,
    windows: Vec<TimeWindow>,
    refresher: SnapshotRefresher,
    journal: Journal,
    notifier: Notifier,
    book: PaperBook,
    risk: RiskGuard,
    circuit: CircuitBreaker,
    alerter: NearAlerter,
    health: HealthMonitor,
    gap_throttle: AlertThrottle,
    exit_rules: ExitRules,
    flatten_at: NaiveTime,
    eod_at: NaiveTime,
    nightly_at: NaiveTime,
    status: WorkerStatus,
    jobs_done: HashMap<Job, NaiveDate>,
    last_verdict: Option<String>,
    snapshot: Option<Snapshot>,
}

impl DayLoop {
    pub fn new(
        cfg: Config,
        provider: Arc<dyn OptionChainProvider>,
        journal: Journal,
        notifier: Notifier,
        now: DateTime<Utc>,
    ) -> Self {
        let params = cfg.symbol_params();
        let refresher = SnapshotRefresher::new(
            provider,
            &cfg.oc.symbol,
            cfg.refresh_secs(),
            cfg.dhan.cooldown_429(),
            cfg.oc.max_snapshot_age_secs,
        );
        let flat_time = schedule_time(&cfg.schedule.flat_time, "15:15");
        let exit_rules = ExitRules::new(&params, flat_time, cfg.oc.fresh_max_age_secs);
        let status = WorkerStatus {
            running: true,
            worker_id: cfg.system.worker_id.clone(),
            shift: cfg.system.shift.to_string(),
            symbol: cfg.oc.symbol.clone(),
            version: VERSION.to_string(),
            start_time: now.to_rfc3339(),
            ..Default::default()
        };

        Self {
            windows: cfg.oc.parsed_no_trade_windows(),
            refresher,
            journal,
            notifier,
            book: PaperBook::new(cfg.risk.point_value),
            risk: RiskGuard::new(&cfg.risk),
            circuit: CircuitBreaker::new(&cfg.risk.circuit),
            alerter: NearAlerter::new(cfg.alerts.near_cooldown()),
            health: HealthMonitor::new(cfg.oc.fresh_max_age_secs, now),
            gap_throttle: AlertThrottle::new(FEED_GAP_ALERT_SECS),
            exit_rules,
            flatten_at: schedule_time(&cfg.schedule.flatten_at, "15:28"),
            eod_at: schedule_time(&cfg.schedule.eod_at, "15:31"),
            nightly_at: schedule_time(&cfg.schedule.nightly_at, "20:00"),
            status,
            jobs_done: HashMap::new(),
            last_verdict: None,
            snapshot: None,
            params,
            cfg,
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn status(&self) -> &WorkerStatus {
        &self.status
    }

    pub fn open_trade_count(&self) -> usize {
        self.book.open_count()
    }

    /// Re-adopts today's state from the journal after a restart.
    pub fn recover(&mut self, now: DateTime<Utc>) -> Result<()> {
        let today = ist_date(now);
        self.book.roll_day(today);

        let open = self.journal.open_trades()?;
        if open.is_empty() {
            info!("No open paper trades to recover");
        } else {
            info!("{}", SEP);
            info!("RECOVERING {} OPEN PAPER TRADE(S):", open.len());
            for t in open {
                info!("  {} {} {} @ {} | SL={} TP={}", t.trade_id, t.symbol, t.side, t.entry_spot, t.sl, t.tp);
                self.book.restore(t);
            }
            info!("{}", SEP);
        }

        let (keys, trades) = self.journal.day_activity(today)?;
        for key in &keys {
            self.book.mark_attempted(key);
        }
        let pnl: Decimal = self.journal.closed_pnls_on(today)?.into_iter().sum();
        self.risk.restore(today, trades, pnl);
        if trades > 0 {
            info!("Restored day counters: {} trade(s), pnl {}", trades, pnl);
        }

        if let Some(snap) = self.journal.last_snapshot(&self.cfg.oc.symbol)? {
            debug!("Seeding refresher with journalled snapshot from {}", format_ist(snap.fetched_at));
            self.refresher.seed(snap);
        }
        Ok(())
    }

    pub async fn announce_start(&self) {
        let msg = telegram::startup_message(
            &self.cfg.system.name,
            &self.cfg.system.worker_id,
            self.cfg.system.shift.as_str(),
            &self.cfg.oc.symbol,
            VERSION,
        );
        self.notifier.notify(&msg).await;
    }

    fn flags(&self) -> HoldFlags {
        let overrides = self.journal.overrides().unwrap_or_else(|e| {
            warn!("Reading params overrides failed: {:#}", e);
            HashMap::new()
        });
        let mut flags = HoldFlags::resolve(&self.cfg.flags, &overrides);
        flags.daily_cap_hit |= self.risk.daily_cap_hit();
        flags
    }

    /// Fresh or cached snapshot from the provider, falling back to the
    /// journal when the provider has nothing yet.
    async fn load_snapshot(&mut self, now: DateTime<Utc>) -> Result<Option<(RefreshStatus, Snapshot)>> {
        let flags = self.flags();
        let outcome = self.refresher.refresh(flags, now).await;
        log_outcome(&outcome);

        let snap = match outcome.snapshot {
            Some(s) => s,
            None => match self.journal.last_snapshot(&self.cfg.oc.symbol)? {
                Some(s) => {
                    info!("Using journalled snapshot from {}", format_ist(s.fetched_at));
                    self.refresher.seed(s.clone());
                    finalize(s, flags, now, self.cfg.oc.max_snapshot_age_secs)
                }
                None => {
                    info!("No option-chain snapshot available yet");
                    return Ok(None);
                }
            },
        };
        Ok(Some((outcome.status, snap)))
    }

    fn evaluate(&self, snap: &Snapshot, now: DateTime<Utc>) -> Eligibility {
        let now_ist = to_ist(now);
        let mut blockers = Vec::new();
        if let Some(left) = self.circuit.is_paused(now) {
            blockers.push(pause_label(left));
        }
        if let Some(reason) = self.risk.block_reason() {
            blockers.push(reason);
        }
        match self.journal.events_on(now_ist.date()) {
            Ok(events) => {
                if let Some(reason) = hold_reason(&events, now_ist) {
                    blockers.push(format!("event hold: {}", reason));
                }
            }
            Err(e) => warn!("Reading events failed: {:#}", e),
        }

        eligibility::evaluate(&EligibilityInput {
            snapshot: snap,
            params: &self.params,
            now: now_ist,
            fresh_max_age_secs: self.cfg.oc.fresh_max_age_secs,
            oi_flat_eps: self.cfg.oc.oi_flat_eps,
            no_trade_windows: &self.windows,
            blockers: &blockers,
            attempted: self.book.attempted(),
        })
    }

    pub async fn refresh_tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        let today = ist_date(now);
        self.book.roll_day(today);
        self.risk.roll_day(today);

        let Some((status, snap)) = self.load_snapshot(now).await? else {
            self.status.refresh_status = "empty".to_string();
            return Ok(());
        };

        if status == RefreshStatus::Fresh {
            self.journal.record_snapshot(&snap)?;
            self.health.record_fresh(now);
            self.status.last_refresh = now.to_rfc3339();
        }
        self.status.refresh_status = status_label(&status);
        self.status.spot = snap.spot;
        self.status.mv = snap.mv.to_string();
        self.status.summary = snap.summary.clone();

        let ctx = self.consider_entry(&snap, now).await?;
        if is_market_open(to_ist(now)) && !snap.stale {
            self.near_alerts(&snap, &ctx, now).await;
        }
        self.snapshot = Some(snap);
        Ok(())
    }

    async fn consider_entry(&mut self, snap: &Snapshot, now: DateTime<Utc>) -> Result<AlertContext> {
        let e = self.evaluate(snap, now);
        let line = e.summary_line();
        if self.last_verdict.as_deref() != Some(line.as_str()) {
            info!("Eligibility {}: {}", snap.symbol, line);
            self.journal.record_signal(now, &snap.symbol, &e)?;
            self.last_verdict = Some(line.clone());
        }
        self.status.last_verdict = line.clone();

        let mut ctx = AlertContext { trade_taken: None, reasons: e.failed_reasons() };
        let Verdict::Eligible { side, tag, price } = e.verdict else {
            return Ok(ctx);
        };
        if self.cfg.system.shift != ShiftMode::Day || !self.cfg.system.auto_trade {
            ctx.reasons.push(format!("auto trade off ({})", self.cfg.system.shift));
            return Ok(ctx);
        }
        let (Some(spot), Some(dedupe_key)) = (snap.spot, e.dedupe_key) else {
            return Ok(ctx);
        };

        let order = EntryOrder {
            symbol: snap.symbol.clone(),
            side,
            tag,
            trigger_price: price,
            spot,
            qty: self.risk.compute_qty(to_decimal(spot)),
            dedupe_key,
            reason: line,
        };
        let Some(trade) = self.book.open(order, &self.params, now) else {
            return Ok(ctx);
        };
        match self.journal.record_trade_open(&trade, &self.cfg.system.worker_id) {
            Ok(true) => {}
            Ok(false) => {
                warn!("Trade {} already journalled, dropping duplicate", trade.trade_id);
                self.book.discard(&trade.trade_id);
                return Ok(ctx);
            }
            Err(e) => {
                self.book.discard(&trade.trade_id);
                return Err(e);
            }
        }
        self.risk.record_open();
        self.notifier.notify(&telegram::trade_open_message(&trade)).await;

        ctx.trade_taken = Some((side, tag));
        ctx.reasons.clear();
        Ok(ctx)
    }

    async fn near_alerts(&mut self, snap: &Snapshot, ctx: &AlertContext, now: DateTime<Utc>) {
        let buffer = self.params.buffer_points;
        for near in self.alerter.due(snap, buffer, now) {
            let msg = near_alert_message(snap, &near, buffer, ctx);
            match self.notifier.send(&msg).await {
                Ok(true) => self.alerter.mark_sent(&snap.symbol, near.tag, now),
                Ok(false) => debug!("Near alert for {} {} not delivered", snap.symbol, near.tag),
                Err(e) => warn!("Near alert for {} {} failed: {}", snap.symbol, near.tag, e),
            }
        }
    }

    /// Runs the exit rules over the open book and journals trail updates.
    pub async fn paper_tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.book.open_count() == 0 {
            return Ok(());
        }
        let flags = self.flags();
        let max_age = self.cfg.oc.max_snapshot_age_secs;
        let snap = self.snapshot.clone().map(|s| finalize(s, flags, now, max_age));

        let closed = self.book.evaluate_exits(snap.as_ref(), &self.exit_rules, now);
        for c in closed {
            self.settle(c, now).await?;
        }
        for t in self.book.open_trades() {
            self.journal.update_trail(&t.trade_id, &t.trail)?;
        }
        Ok(())
    }

    async fn settle(&mut self, c: ClosedTrade, now: DateTime<Utc>) -> Result<()> {
        self.journal.record_trade_close(&c)?;
        self.risk.record_close(c.pnl);
        self.notifier.notify(&telegram::trade_close_message(&c)).await;

        if let Some(trip) = self.circuit.record_exit(c.reason, now) {
            self.notifier
                .notify(&telegram::circuit_trip_message(&c.trade.symbol, trip.pause_mins))
                .await;
            self.journal.log_status(
                now,
                &self.cfg.system.worker_id,
                "HOLD",
                &format!("circuit breaker until {}", format_ist(trip.until)),
            )?;
        }
        Ok(())
    }

    /// Closes every open trade at the last known spot.
    pub async fn flatten(&mut self, reason: ExitReason, now: DateTime<Utc>) -> Result<usize> {
        let spot = self.snapshot.as_ref().and_then(|s| s.spot).map(to_decimal);
        if spot.is_none() && self.book.open_count() > 0 {
            warn!("Flatten skipped: no spot for {} open trade(s)", self.book.open_count());
        }
        let closed = self.book.flatten_all(spot, reason, now);
        let n = closed.len();
        for c in closed {
            self.settle(c, now).await?;
        }
        info!("Flatten ({}): closed {} trade(s)", reason, n);
        Ok(n)
    }

    pub async fn end_of_day(&mut self, now: DateTime<Utc>) -> Result<DayPerformance> {
        let today = ist_date(now);
        let pnls = self.journal.closed_pnls_on(today)?;
        let perf = performance::compute(today, &self.cfg.oc.symbol, &pnls);
        self.journal.record_performance(&perf, VERSION)?;
        info!(
            "EOD {} {}: {} trades, win rate {}%, net {}, max DD {}",
            perf.symbol, perf.date, perf.trades, perf.win_rate, perf.net_pnl, perf.max_drawdown
        );
        self.notifier.notify(&telegram::daily_summary_message(&perf)).await;
        Ok(perf)
    }

    pub async fn nightly(&mut self, now: DateTime<Utc>) -> Result<Vec<DayPerformance>> {
        let from = ist_date(now) - Duration::days(NIGHTLY_LOOKBACK_DAYS);
        let rows = self.journal.performance_since(from)?;
        info!("Nightly digest: {} day(s) since {}", rows.len(), from);
        self.notifier.notify(&telegram::nightly_digest_message(&rows)).await;
        Ok(rows)
    }

    pub fn heartbeat(&mut self, now: DateTime<Utc>) -> Result<()> {
        let paused = self.circuit.is_paused(now).is_some();
        self.status.last_heartbeat = now.to_rfc3339();
        self.status.open_trades = self.book.open_count() as u32;
        self.status.trades_today = self.risk.trades_today();
        self.status.pnl_today = self.risk.pnl_today().to_string();
        self.status.circuit_paused = paused;

        let msg = format!(
            "open={} trades={} pnl={} | {}",
            self.status.open_trades, self.status.trades_today, self.status.pnl_today, self.status.summary
        );
        self.journal
            .log_status(now, &self.cfg.system.worker_id, if paused { "HOLD" } else { "OK" }, &msg)?;
        if let Err(e) = self.status.save(&self.cfg.journal.status_file) {
            warn!("Writing status file {} failed: {}", self.cfg.journal.status_file, e);
        }
        Ok(())
    }

    /// Scheduled jobs due now; each runs at most once per IST date.
    pub fn due_jobs(&mut self, now: DateTime<Utc>) -> Vec<Job> {
        let ist = to_ist(now);
        let today = ist.date();
        if !is_trading_day(today) {
            return Vec::new();
        }
        let schedule = match self.cfg.system.shift {
            ShiftMode::Day => vec![(Job::Flatten, self.flatten_at), (Job::EndOfDay, self.eod_at)],
            ShiftMode::Night => vec![(Job::Nightly, self.nightly_at)],
        };

        let mut due = Vec::new();
        for (job, at) in schedule {
            let late = (ist.time() - at).num_seconds();
            if (0..JOB_GRACE_SECS).contains(&late) && self.jobs_done.get(&job) != Some(&today) {
                self.jobs_done.insert(job, today);
                due.push(job);
            }
        }
        due
    }

    pub async fn run_job(&mut self, job: Job, now: DateTime<Utc>) -> Result<()> {
        info!("Running scheduled job: {}", job.as_str());
        match job {
            Job::Flatten => self.flatten(ExitReason::EodFlat, now).await.map(|_| ()),
            Job::EndOfDay => self.end_of_day(now).await.map(|_| ()),
            Job::Nightly => self.nightly(now).await.map(|_| ()),
        }
    }

    pub async fn health_check(&mut self, now: DateTime<Utc>) {
        self.health.set_market_open(is_market_open(to_ist(now)));
        match self.health.check(now) {
            HealthStatus::StaleFeed { seconds, gaps } => {
                warn!("HEALTH: no fresh option chain for {}s (gap #{})", seconds, gaps);
                if self.health.should_alert() && self.gap_throttle.should_send(now) {
                    self.notifier
                        .notify(&telegram::feed_gap_message(&self.cfg.oc.symbol, seconds, gaps))
                        .await;
                }
            }
            HealthStatus::Healthy | HealthStatus::MarketClosed => {}
        }
    }

    async fn job_failed(&self, job: &str, err: &anyhow::Error) {
        error!("Job {} failed: {:#}", job, err);
        self.notifier
            .notify(&telegram::job_error_message(job, &format!("{:#}", err)))
            .await;
    }

    /// One refresh and the C1..C6 report, without opening anything.
    pub async fn oc_now(&mut self, now: DateTime<Utc>) -> Result<String> {
        let Some((status, snap)) = self.load_snapshot(now).await? else {
            return Ok(format!("No option-chain snapshot for {} yet", self.cfg.oc.symbol));
        };
        if status == RefreshStatus::Fresh {
            self.journal.record_snapshot(&snap)?;
        }
        let e = self.evaluate(&snap, now);
        let report = e.render(&snap, self.params.buffer_points);
        self.snapshot = Some(snap);
        Ok(report)
    }

    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let day_shift = self.cfg.system.shift == ShiftMode::Day;
        let refresh_secs = self.cfg.refresh_secs();

        let mut refresh = interval(std::time::Duration::from_secs(refresh_secs));
        let mut paper = interval(std::time::Duration::from_secs(self.cfg.schedule.paper_tick_secs.max(1)));
        let mut heartbeat = interval(std::time::Duration::from_secs(self.cfg.schedule.heartbeat_secs.max(5)));
        let mut clock = interval(std::time::Duration::from_secs(CLOCK_TICK_SECS));
        for t in [&mut refresh, &mut paper, &mut heartbeat, &mut clock] {
            t.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        info!("{}", SEP);
        info!(
            "Day loop started: {} {} ({}) refresh={}s paper={}",
            self.cfg.oc.symbol,
            self.cfg.system.worker_id,
            self.cfg.system.shift,
            refresh_secs,
            if day_shift && self.cfg.system.auto_trade { "on" } else { "off" }
        );
        info!("Market Status: {}", if is_market_open(to_ist(Utc::now())) { "OPEN" } else { "CLOSED" });
        info!("{}", SEP);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = refresh.tick() => {
                    if let Err(e) = self.refresh_tick(Utc::now()).await {
                        self.job_failed("refresh", &e).await;
                    }
                }
                _ = paper.tick(), if day_shift => {
                    if let Err(e) = self.paper_tick(Utc::now()).await {
                        self.job_failed("paper", &e).await;
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = self.heartbeat(Utc::now()) {
                        self.job_failed("heartbeat", &e).await;
                    }
                }
                _ = clock.tick() => {
                    let now = Utc::now();
                    self.health_check(now).await;
                    for job in self.due_jobs(now) {
                        if let Err(e) = self.run_job(job, now).await {
                            self.job_failed(job.as_str(), &e).await;
                        }
                    }
                }
            }
        }

        let now = Utc::now();
        self.status.running = false;
        if let Err(e) = self.heartbeat(now) {
            warn!("Final heartbeat failed: {:#}", e);
        }
        self.journal.log_status(now, &self.cfg.system.worker_id, "STOPPED", "shutdown")?;
        info!("Day loop stopped ({} open paper trade(s) kept)", self.book.open_count());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SnapshotSource;
    use crate::data::EventRow;
    use crate::feed::refresh::tests::{quote, t0, FakeProvider};
    use crate::feed::FeedError;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use std::sync::atomic::{AtomicUsize, Ordering};

    const BASE: &str = "[system]\nname = \"KTW\"\n";
    static STATUS_FILES: AtomicUsize = AtomicUsize::new(0);

    fn engine_with(toml: &str, provider: Arc<FakeProvider>, journal: Journal) -> DayLoop {
        let mut cfg = Config::from_toml_str(toml).unwrap();
        let n = STATUS_FILES.fetch_add(1, Ordering::SeqCst);
        cfg.journal.status_file = std::env::temp_dir()
            .join(format!("ktw_engine_test_{}_{}.json", std::process::id(), n))
            .to_string_lossy()
            .into_owned();
        DayLoop::new(cfg, provider, journal, Notifier::disabled(), t0())
    }

    fn engine(results: Vec<Result<crate::feed::ProviderQuote, FeedError>>) -> (DayLoop, Arc<FakeProvider>) {
        let provider = Arc::new(FakeProvider::new(results));
        let e = engine_with(BASE, provider.clone(), Journal::open_in_memory().unwrap());
        (e, provider)
    }

    fn secs(n: i64) -> Duration {
        Duration::seconds(n)
    }

    #[tokio::test]
    async fn test_eligible_snapshot_opens_one_trade() {
        let (mut e, provider) = engine(vec![Ok(quote(t0(), 24890.0)), Ok(quote(t0() + secs(11), 24890.0))]);

        e.refresh_tick(t0()).await.unwrap();
        assert_eq!(e.open_trade_count(), 1);
        assert_eq!(e.journal().open_trades().unwrap().len(), 1);
        assert_eq!(e.journal().signal_count().unwrap(), 1);
        assert!(e.status().last_verdict.starts_with("✅ Eligible - CE @ S1*"));

        // Same level again the same day is deduped
        e.refresh_tick(t0() + secs(11)).await.unwrap();
        assert_eq!(provider.calls(), 2);
        assert_eq!(e.open_trade_count(), 1);
        assert!(e.status().last_verdict.starts_with("❌ Not eligible"));
        assert_eq!(e.journal().signal_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_night_shift_does_not_trade() {
        let provider = Arc::new(FakeProvider::new(vec![Ok(quote(t0(), 24890.0))]));
        let toml = "[system]\nname = \"KTW\"\nshift = \"NIGHT\"\n";
        let mut e = engine_with(toml, provider, Journal::open_in_memory().unwrap());
        e.refresh_tick(t0()).await.unwrap();
        assert_eq!(e.open_trade_count(), 0);
        assert!(e.status().last_verdict.starts_with("✅ Eligible"));
    }

    #[tokio::test]
    async fn test_hold_override_and_event_block_entries() {
        let journal = Journal::open_in_memory().unwrap();
        journal.set_override("HOLD", "true", "ops", t0()).unwrap();
        let provider = Arc::new(FakeProvider::new(vec![Ok(quote(t0(), 24890.0))]));
        let mut e = engine_with(BASE, provider, journal);
        e.refresh_tick(t0()).await.unwrap();
        assert_eq!(e.open_trade_count(), 0);
        assert!(e.status().summary.starts_with("System HOLD"));

        let journal = Journal::open_in_memory().unwrap();
        journal
            .add_event(&EventRow {
                date: ist_date(t0()),
                kind: "RBI".to_string(),
                window: String::new(),
                note: "policy".to_string(),
                active: true,
            })
            .unwrap();
        let provider = Arc::new(FakeProvider::new(vec![Ok(quote(t0(), 24890.0))]));
        let mut e = engine_with(BASE, provider, journal);
        e.refresh_tick(t0()).await.unwrap();
        assert_eq!(e.open_trade_count(), 0);
        assert_eq!(e.status().last_verdict, "❌ Not eligible - failed: C5");
    }

    #[tokio::test]
    async fn test_stop_loss_trips_circuit() {
        let provider = Arc::new(FakeProvider::new(vec![
            Ok(quote(t0(), 24890.0)),
            Ok(quote(t0() + secs(11), 24865.0)),
        ]));
        let toml = "[system]\nname = \"KTW\"\n\n[risk.circuit]\nsl_threshold = 1\n";
        let mut e = engine_with(toml, provider, Journal::open_in_memory().unwrap());

        e.refresh_tick(t0()).await.unwrap();
        e.refresh_tick(t0() + secs(11)).await.unwrap();
        e.paper_tick(t0() + secs(12)).await.unwrap();

        assert_eq!(e.open_trade_count(), 0);
        let day = ist_date(t0());
        assert_eq!(e.journal().closed_pnls_on(day).unwrap(), vec![dec!(-25)]);
        let (_, state, msg) = e.journal().last_status("DAY_A").unwrap().unwrap();
        assert_eq!(state, "HOLD");
        assert!(msg.starts_with("circuit breaker until"));

        e.heartbeat(t0() + secs(13)).unwrap();
        assert!(e.status().circuit_paused);
        assert_eq!(e.status().pnl_today.parse::<Decimal>().unwrap(), dec!(-25));
        let _ = std::fs::remove_file(&e.cfg.journal.status_file);
    }

    #[tokio::test]
    async fn test_recover_restores_book_and_counters() {
        let provider = Arc::new(FakeProvider::new(vec![Ok(quote(t0(), 24890.0))]));
        let mut first = engine_with(BASE, provider, Journal::open_in_memory().unwrap());
        first.refresh_tick(t0()).await.unwrap();
        assert_eq!(first.open_trade_count(), 1);

        // Restart: a fresh loop over the same journal
        let provider = Arc::new(FakeProvider::new(vec![Ok(quote(t0() + secs(30), 24890.0))]));
        let mut second = engine_with(BASE, provider, first.journal);
        second.recover(t0() + secs(30)).unwrap();

        assert_eq!(second.open_trade_count(), 1);
        assert_eq!(second.risk.trades_today(), 1);
        assert!(second.refresher.latest().is_some());

        // The recovered level is not traded twice
        second.refresh_tick(t0() + secs(30)).await.unwrap();
        assert_eq!(second.open_trade_count(), 1);
        assert_eq!(second.journal().day_activity(ist_date(t0())).unwrap().1, 1);
    }

    #[tokio::test]
    async fn test_carried_trade_settles_into_exit_day() {
        let provider = Arc::new(FakeProvider::new(vec![Ok(quote(t0(), 24890.0))]));
        let mut first = engine_with(BASE, provider, Journal::open_in_memory().unwrap());
        first.refresh_tick(t0()).await.unwrap();
        assert_eq!(first.open_trade_count(), 1);

        // Down over the flatten time; back at 10:00 IST the next day
        let day2 = t0() + Duration::days(1) - Duration::hours(1);
        let provider = Arc::new(FakeProvider::new(vec![Err(FeedError::NoExpiry)]));
        let mut second = engine_with(BASE, provider, first.journal);
        second.recover(day2).unwrap();
        assert_eq!(second.open_trade_count(), 1);

        second.snapshot = Some(crate::feed::refresh::snapshot_from_quote(quote(day2, 24870.0)));
        assert_eq!(second.flatten(ExitReason::EodFlat, day2).await.unwrap(), 1);
        assert_eq!(second.risk.pnl_today(), dec!(-20));

        let perf = second.end_of_day(day2 + secs(60)).await.unwrap();
        assert_eq!(perf.date, ist_date(day2));
        assert_eq!(perf.trades, 1);
        assert_eq!(perf.net_pnl, dec!(-20));

        // Another restart the same day keeps the realised loss
        let provider = Arc::new(FakeProvider::new(vec![Err(FeedError::NoExpiry)]));
        let mut third = engine_with(BASE, provider, second.journal);
        third.recover(day2 + secs(120)).unwrap();
        assert_eq!(third.risk.pnl_today(), dec!(-20));
        assert_eq!(third.risk.trades_today(), 0);
        assert_eq!(third.open_trade_count(), 0);
    }

    #[tokio::test]
    async fn test_journal_fallback_when_provider_fails() {
        let journal = Journal::open_in_memory().unwrap();
        let snap = crate::feed::refresh::snapshot_from_quote(quote(t0(), 24920.0));
        journal.record_snapshot(&snap).unwrap();

        let provider = Arc::new(FakeProvider::new(vec![Err(FeedError::NoExpiry)]));
        let mut e = engine_with(BASE, provider, journal);
        e.refresh_tick(t0() + secs(20)).await.unwrap();

        let used = e.snapshot.as_ref().unwrap();
        assert_eq!(used.source, SnapshotSource::Journal);
        assert_eq!(used.age_secs, 20);
        assert!(e.status().refresh_status.starts_with("error:"));
    }

    #[tokio::test]
    async fn test_flatten_uses_last_spot() {
        let (mut e, _) = engine(vec![Ok(quote(t0(), 24890.0))]);
        assert_eq!(e.flatten(ExitReason::EodFlat, t0()).await.unwrap(), 0);

        e.refresh_tick(t0()).await.unwrap();
        assert_eq!(e.flatten(ExitReason::EodFlat, t0() + secs(5)).await.unwrap(), 1);
        assert_eq!(e.open_trade_count(), 0);

        let perf = e.end_of_day(t0() + secs(10)).await.unwrap();
        assert_eq!(perf.trades, 1);
        assert_eq!(perf.net_pnl, Decimal::ZERO);
        let digest = e.nightly(t0() + secs(20)).await.unwrap();
        assert_eq!(digest.len(), 1);
    }

    #[tokio::test]
    async fn test_oc_now_reports_without_trading() {
        let (mut e, _) = engine(vec![Ok(quote(t0(), 24890.0))]);
        let report = e.oc_now(t0()).await.unwrap();
        assert!(report.starts_with("OC Snapshot"));
        assert!(report.contains("Summary: ✅ Eligible - CE @ S1* (24888.00)"));
        assert_eq!(e.open_trade_count(), 0);
    }

    #[test]
    fn test_due_jobs_once_per_day() {
        let (mut e, _) = engine(vec![]);
        // 2024-08-07 15:28 IST
        let flat = Utc.with_ymd_and_hms(2024, 8, 7, 9, 58, 0).unwrap();
        assert!(e.due_jobs(flat - secs(60)).is_empty());
        assert_eq!(e.due_jobs(flat), vec![Job::Flatten]);
        assert!(e.due_jobs(flat + secs(10)).is_empty());
        assert_eq!(e.due_jobs(flat + secs(180)), vec![Job::EndOfDay]);

        // Saturday
        let sat = Utc.with_ymd_and_hms(2024, 8, 10, 9, 58, 0).unwrap();
        assert!(e.due_jobs(sat).is_empty());

        // Too late to catch up
        let next_day_late = Utc.with_ymd_and_hms(2024, 8, 8, 12, 0, 0).unwrap();
        assert!(e.due_jobs(next_day_late).is_empty());
    }

    #[test]
    fn test_night_shift_schedule() {
        let provider = Arc::new(FakeProvider::new(vec![]));
        let toml = "[system]\nname = \"KTW\"\nshift = \"NIGHT\"\n";
        let mut e = engine_with(toml, provider, Journal::open_in_memory().unwrap());
        // 2024-08-07 20:00 IST
        let at = Utc.with_ymd_and_hms(2024, 8, 7, 14, 30, 0).unwrap();
        assert_eq!(e.due_jobs(at), vec![Job::Nightly]);
        assert!(e.due_jobs(Utc.with_ymd_and_hms(2024, 8, 7, 9, 58, 0).unwrap()).is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_writes_status() {
        let (mut e, _) = engine(vec![Ok(quote(t0(), 24890.0))]);
        e.refresh_tick(t0()).await.unwrap();
        e.heartbeat(t0() + secs(1)).unwrap();

        let (_, state, msg) = e.journal().last_status("DAY_A").unwrap().unwrap();
        assert_eq!(state, "OK");
        assert!(msg.starts_with("open=1 trades=1 pnl=0"));

        let saved = WorkerStatus::load(&e.cfg.journal.status_file);
        assert_eq!(saved.worker_id, "DAY_A");
        assert_eq!(saved.open_trades, 1);
        let _ = std::fs::remove_file(&e.cfg.journal.status_file);
    }
}
