//! Trade Journal - SQLite storage for snapshots, signals, trades and status
//!
//! One table per journal tab: `oc_live`, `signals`, `trades`,
//! `performance`, `status`, `events`, `params_override`.

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use super::events::EventRow;
use crate::core::eligibility::Eligibility;
use crate::core::session::ist_date;
use crate::core::types::{LevelTag, MarketView, OptionSide, Snapshot, SnapshotSource};
use crate::trading::exits::TrailState;
use crate::trading::paper::{ClosedTrade, PaperTrade};
use crate::trading::performance::DayPerformance;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS oc_live (
    id INTEGER PRIMARY KEY,
    ts TEXT NOT NULL,
    symbol TEXT NOT NULL,
    expiry TEXT NOT NULL,
    spot REAL,
    s1 REAL,
    s2 REAL,
    r1 REAL,
    r2 REAL,
    pcr REAL,
    max_pain REAL,
    ce_oi_delta REAL,
    pe_oi_delta REAL,
    mv TEXT NOT NULL,
    stale INTEGER NOT NULL,
    summary TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS signals (
    id INTEGER PRIMARY KEY,
    ts TEXT NOT NULL,
    symbol TEXT NOT NULL,
    side TEXT,
    trigger_tag TEXT,
    trigger_price REAL,
    c1 INTEGER NOT NULL,
    c2 INTEGER NOT NULL,
    c3 INTEGER NOT NULL,
    c4 INTEGER NOT NULL,
    c5 INTEGER NOT NULL,
    c6 INTEGER NOT NULL,
    eligible INTEGER NOT NULL,
    summary TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS trades (
    trade_id TEXT PRIMARY KEY,
    trade_date TEXT NOT NULL,
    worker_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    trigger_tag TEXT NOT NULL,
    trigger_price TEXT NOT NULL,
    entry_spot TEXT NOT NULL,
    qty INTEGER NOT NULL,
    sl TEXT NOT NULL,
    tp TEXT NOT NULL,
    dedupe_key TEXT NOT NULL,
    reason TEXT NOT NULL,
    opened_at TEXT NOT NULL,
    trail_json TEXT NOT NULL DEFAULT '{}',
    exit_spot TEXT,
    exit_at TEXT,
    exit_date TEXT,
    exit_reason TEXT,
    pnl_points TEXT,
    pnl TEXT
);
CREATE TABLE IF NOT EXISTS performance (
    date TEXT NOT NULL,
    symbol TEXT NOT NULL,
    trades INTEGER NOT NULL,
    wins INTEGER NOT NULL,
    losses INTEGER NOT NULL,
    win_rate TEXT NOT NULL,
    avg_pnl TEXT NOT NULL,
    gross_pnl TEXT NOT NULL,
    net_pnl TEXT NOT NULL,
    max_drawdown TEXT NOT NULL,
    version TEXT NOT NULL,
    PRIMARY KEY (date, symbol)
);
CREATE TABLE IF NOT EXISTS status (
    id INTEGER PRIMARY KEY,
    ts TEXT NOT NULL,
    worker_id TEXT NOT NULL,
    state TEXT NOT NULL,
    message TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY,
    date TEXT NOT NULL,
    kind TEXT NOT NULL,
    time_window TEXT NOT NULL,
    note TEXT NOT NULL,
    active INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS params_override (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_by TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

pub struct Journal {
    conn: Mutex<Connection>,
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s.trim()).unwrap_or_default()
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

/// Columns of a `trades` row before parsing
struct TradeRow {
    trade_id: String,
    symbol: String,
    side: String,
    trigger_tag: String,
    trigger_price: String,
    entry_spot: String,
    qty: i64,
    sl: String,
    tp: String,
    dedupe_key: String,
    reason: String,
    opened_at: String,
    trail_json: String,
}

impl TradeRow {
    fn into_trade(self) -> Option<PaperTrade> {
        Some(PaperTrade {
            side: OptionSide::parse(&self.side)?,
            trigger: LevelTag::parse(&self.trigger_tag)?,
            opened_at: parse_ts(&self.opened_at)?,
            trigger_price: dec(&self.trigger_price),
            entry_spot: dec(&self.entry_spot),
            qty: self.qty.max(1) as u32,
            sl: dec(&self.sl),
            tp: dec(&self.tp),
            trail: serde_json::from_str(&self.trail_json).unwrap_or_default(),
            trade_id: self.trade_id,
            symbol: self.symbol,
            dedupe_key: self.dedupe_key,
            reason: self.reason,
        })
    }
}

/// Journals created before `exit_date` existed get the column and a backfill.
fn add_exit_date(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(trades)")?;
    let has = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .iter()
        .any(|c| c == "exit_date");
    if has {
        return Ok(());
    }
    conn.execute("ALTER TABLE trades ADD COLUMN exit_date TEXT", [])?;

    let mut stmt = conn.prepare("SELECT trade_id, exit_at FROM trades WHERE exit_at IS NOT NULL")?;
    let closed = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (id, exit_at) in closed {
        if let Some(ts) = parse_ts(&exit_at) {
            conn.execute(
                "UPDATE trades SET exit_date = ?1 WHERE trade_id = ?2",
                params![ist_date(ts).to_string(), id],
            )?;
        }
    }
    info!("Journal trades tab migrated: exit_date added");
    Ok(())
}

impl Journal {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        let journal = Self::with_connection(conn)?;
        info!("Journal tabs ensured ({})", path);
        Ok(journal)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        add_exit_date(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("journal lock poisoned"))
    }

    // ---- oc_live ----

    pub fn record_snapshot(&self, snap: &Snapshot) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO oc_live (ts, symbol, expiry, spot, s1, s2, r1, r2, pcr, max_pain,
                                  ce_oi_delta, pe_oi_delta, mv, stale, summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                snap.fetched_at.to_rfc3339(),
                snap.symbol,
                snap.expiry,
                snap.spot,
                snap.s1,
                snap.s2,
                snap.r1,
                snap.r2,
                snap.pcr,
                snap.max_pain,
                snap.ce_oi_delta,
                snap.pe_oi_delta,
                snap.mv.as_str(),
                snap.stale,
                snap.summary,
            ],
        )?;
        Ok(())
    }

    /// Latest journalled snapshot for `symbol`, marked as journal-sourced.
    pub fn last_snapshot(&self, symbol: &str) -> Result<Option<Snapshot>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT ts, expiry, spot, s1, s2, r1, r2, pcr, max_pain, ce_oi_delta, pe_oi_delta, mv
                 FROM oc_live WHERE symbol = ?1 ORDER BY id DESC LIMIT 1",
                params![symbol.to_ascii_uppercase()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        [
                            row.get::<_, Option<f64>>(2)?,
                            row.get::<_, Option<f64>>(3)?,
                            row.get::<_, Option<f64>>(4)?,
                            row.get::<_, Option<f64>>(5)?,
                            row.get::<_, Option<f64>>(6)?,
                            row.get::<_, Option<f64>>(7)?,
                            row.get::<_, Option<f64>>(8)?,
                            row.get::<_, Option<f64>>(9)?,
                            row.get::<_, Option<f64>>(10)?,
                        ],
                        row.get::<_, String>(11)?,
                    ))
                },
            )
            .optional()?;

        let Some((ts, expiry, v, mv)) = row else {
            return Ok(None);
        };
        let Some(fetched_at) = parse_ts(&ts) else {
            warn!("oc_live row has unreadable timestamp {:?}", ts);
            return Ok(None);
        };
        let mut snap = Snapshot::new(symbol, SnapshotSource::Journal, fetched_at);
        snap.expiry = expiry;
        snap.spot = v[0];
        snap.s1 = v[1];
        snap.s2 = v[2];
        snap.r1 = v[3];
        snap.r2 = v[4];
        snap.pcr = v[5];
        snap.max_pain = v[6];
        snap.ce_oi_delta = v[7];
        snap.pe_oi_delta = v[8];
        snap.mv = MarketView::parse(&mv);
        Ok(Some(snap))
    }

    // ---- signals ----

    pub fn record_signal(&self, ts: DateTime<Utc>, symbol: &str, e: &Eligibility) -> Result<()> {
        let ok = |id: &str| e.check(id).map(|c| c.ok).unwrap_or(false);
        self.conn()?.execute(
            "INSERT INTO signals (ts, symbol, side, trigger_tag, trigger_price,
                                  c1, c2, c3, c4, c5, c6, eligible, summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                ts.to_rfc3339(),
                symbol,
                e.side.map(|s| s.as_str()),
                e.trigger.map(|t| t.tag.as_str()),
                e.trigger.map(|t| t.price),
                ok("C1"),
                ok("C2"),
                ok("C3"),
                ok("C4"),
                ok("C5"),
                ok("C6"),
                e.is_eligible(),
                e.summary_line(),
            ],
        )?;
        Ok(())
    }

    pub fn signal_count(&self) -> Result<u32> {
        let n: i64 = self.conn()?.query_row("SELECT COUNT(*) FROM signals", [], |r| r.get(0))?;
        Ok(n as u32)
    }

    // ---- trades ----

    /// Inserts an open trade. Returns false when the trade id already exists.
    pub fn record_trade_open(&self, trade: &PaperTrade, worker_id: &str) -> Result<bool> {
        let trail = serde_json::to_string(&trade.trail)?;
        let inserted = self.conn()?.execute(
            "INSERT OR IGNORE INTO trades (trade_id, trade_date, worker_id, symbol, side, trigger_tag,
                                           trigger_price, entry_spot, qty, sl, tp, dedupe_key, reason,
                                           opened_at, trail_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                trade.trade_id,
                ist_date(trade.opened_at).to_string(),
                worker_id,
                trade.symbol,
                trade.side.as_str(),
                trade.trigger.as_str(),
                trade.trigger_price.to_string(),
                trade.entry_spot.to_string(),
                trade.qty,
                trade.sl.to_string(),
                trade.tp.to_string(),
                trade.dedupe_key,
                trade.reason,
                trade.opened_at.to_rfc3339(),
                trail,
            ],
        )?;
        Ok(inserted == 1)
    }

    pub fn update_trail(&self, trade_id: &str, trail: &TrailState) -> Result<()> {
        self.conn()?.execute(
            "UPDATE trades SET trail_json = ?1 WHERE trade_id = ?2 AND exit_at IS NULL",
            params![serde_json::to_string(trail)?, trade_id],
        )?;
        Ok(())
    }

    pub fn record_trade_close(&self, c: &ClosedTrade) -> Result<()> {
        let updated = self.conn()?.execute(
            "UPDATE trades SET exit_spot = ?1, exit_at = ?2, exit_date = ?3, exit_reason = ?4, pnl_points = ?5, pnl = ?6
             WHERE trade_id = ?7 AND exit_at IS NULL",
            params![
                c.exit_spot.map(|d| d.to_string()),
                c.closed_at.to_rfc3339(),
                ist_date(c.closed_at).to_string(),
                c.reason.as_str(),
                c.pnl_points.to_string(),
                c.pnl.to_string(),
                c.trade.trade_id,
            ],
        )?;
        if updated == 0 {
            warn!("Close for unknown or already closed trade {}", c.trade.trade_id);
        }
        Ok(())
    }

    pub fn open_trades(&self) -> Result<Vec<PaperTrade>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT trade_id, symbol, side, trigger_tag, trigger_price, entry_spot, qty, sl, tp,
                    dedupe_key, reason, opened_at, trail_json
             FROM trades WHERE exit_at IS NULL ORDER BY opened_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TradeRow {
                trade_id: row.get(0)?,
                symbol: row.get(1)?,
                side: row.get(2)?,
                trigger_tag: row.get(3)?,
                trigger_price: row.get(4)?,
                entry_spot: row.get(5)?,
                qty: row.get(6)?,
                sl: row.get(7)?,
                tp: row.get(8)?,
                dedupe_key: row.get(9)?,
                reason: row.get(10)?,
                opened_at: row.get(11)?,
                trail_json: row.get(12)?,
            })
        })?;

        let mut trades = Vec::new();
        for row in rows {
            let row = row?;
            let id = row.trade_id.clone();
            match row.into_trade() {
                Some(t) => trades.push(t),
                None => warn!("Skipping unreadable open trade {}", id),
            }
        }
        Ok(trades)
    }

    /// Realised pnl of trades closed on `date` (IST), in close order.
    /// A trade carried over from an earlier day counts on its exit day.
    pub fn closed_pnls_on(&self, date: NaiveDate) -> Result<Vec<Decimal>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT pnl FROM trades
             WHERE exit_date = ?1 AND exit_at IS NOT NULL
             ORDER BY exit_at",
        )?;
        let rows = stmt.query_map(params![date.to_string()], |row| row.get::<_, Option<String>>(0))?;
        let mut pnls = Vec::new();
        for pnl in rows {
            pnls.push(pnl?.map(|s| dec(&s)).unwrap_or_default());
        }
        Ok(pnls)
    }

    /// Dedupe keys and trade count for `date`, used to restore counters on restart.
    pub fn day_activity(&self, date: NaiveDate) -> Result<(Vec<String>, u32)> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT dedupe_key FROM trades WHERE trade_date = ?1")?;
        let keys = stmt
            .query_map(params![date.to_string()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let n = keys.len() as u32;
        Ok((keys, n))
    }

    // ---- performance ----

    pub fn record_performance(&self, p: &DayPerformance, version: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO performance (date, symbol, trades, wins, losses, win_rate,
                                                 avg_pnl, gross_pnl, net_pnl, max_drawdown, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                p.date.to_string(),
                p.symbol,
                p.trades,
                p.wins,
                p.losses,
                p.win_rate.to_string(),
                p.avg_pnl.to_string(),
                p.gross_pnl.to_string(),
                p.net_pnl.to_string(),
                p.max_drawdown.to_string(),
                version,
            ],
        )?;
        Ok(())
    }

    pub fn performance_since(&self, from: NaiveDate) -> Result<Vec<DayPerformance>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT date, symbol, trades, wins, losses, win_rate, avg_pnl, gross_pnl, net_pnl, max_drawdown
             FROM performance WHERE date >= ?1 ORDER BY date, symbol",
        )?;
        let rows = stmt.query_map(params![from.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, u32>(4)?,
                [
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                ],
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (date, symbol, trades, wins, losses, m) = row?;
            let Ok(date) = NaiveDate::parse_from_str(&date, "%Y-%m-%d") else {
                warn!("performance row has unreadable date {:?}", date);
                continue;
            };
            out.push(DayPerformance {
                date,
                symbol,
                trades,
                wins,
                losses,
                win_rate: dec(&m[0]),
                avg_pnl: dec(&m[1]),
                gross_pnl: dec(&m[2]),
                net_pnl: dec(&m[3]),
                max_drawdown: dec(&m[4]),
            });
        }
        Ok(out)
    }

    // ---- status ----

    pub fn log_status(&self, ts: DateTime<Utc>, worker_id: &str, state: &str, message: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO status (ts, worker_id, state, message) VALUES (?1, ?2, ?3, ?4)",
            params![ts.to_rfc3339(), worker_id, state, message],
        )?;
        Ok(())
    }

    /// Most recent (ts, state, message) for a worker.
    pub fn last_status(&self, worker_id: &str) -> Result<Option<(String, String, String)>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT ts, state, message FROM status WHERE worker_id = ?1 ORDER BY id DESC LIMIT 1",
                params![worker_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        Ok(row)
    }

    // ---- params_override ----

    /// All overrides with lower-cased keys.
    pub fn overrides(&self) -> Result<HashMap<String, String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM params_override")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        let mut out = HashMap::new();
        for row in rows {
            let (k, v) = row?;
            out.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
        }
        Ok(out)
    }

    pub fn set_override(&self, key: &str, value: &str, updated_by: &str, ts: DateTime<Utc>) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO params_override (key, value, updated_by, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                 updated_by = excluded.updated_by, updated_at = excluded.updated_at",
            params![key.trim().to_ascii_lowercase(), value, updated_by, ts.to_rfc3339()],
        )?;
        Ok(())
    }

    // ---- events ----

    pub fn add_event(&self, e: &EventRow) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO events (date, kind, time_window, note, active) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![e.date.to_string(), e.kind, e.window, e.note, e.active],
        )?;
        Ok(())
    }

    pub fn events_on(&self, date: NaiveDate) -> Result<Vec<EventRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT kind, time_window, note, active FROM events WHERE date = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![date.to_string()], |row| {
            Ok(EventRow {
                date,
                kind: row.get(0)?,
                window: row.get(1)?,
                note: row.get(2)?,
                active: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
