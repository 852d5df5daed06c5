//! Telegram notifications for KTW
//!
//! Outbound only: every message goes to each configured chat via
//! `sendMessage`. Nothing here polls the bot, so this worker never competes
//! with the command bot for updates.

use rust_decimal::Decimal;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::TelegramConfig;
use crate::core::session::format_ist;
use crate::trading::paper::{ClosedTrade, PaperTrade};
use crate::trading::performance::DayPerformance;

const API_BASE: &str = "https://api.telegram.org";
const MAX_TEXT_CHARS: usize = 4000;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("409 Conflict: another process is using this bot token; keep a single worker instance")]
    Conflict,
    #[error("telegram HTTP {status}")]
    Http { status: u16 },
    #[error("telegram transport: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    base_url: String,
    token: String,
    chat_ids: Vec<String>,
    enabled: bool,
}

impl Notifier {
    pub fn from_config(cfg: &TelegramConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: cfg.api_base.trim_end_matches('/').to_string(),
            token: cfg.bot_token.clone(),
            chat_ids: cfg.chat_ids.clone(),
            enabled: cfg.is_ready(),
        }
    }

    /// A notifier that drops every message.
    pub fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: API_BASE.to_string(),
            token: String::new(),
            chat_ids: Vec::new(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Sends to every chat. Ok(true) when at least one chat accepted it,
    /// Ok(false) when disabled or there was nothing to send.
    pub async fn send(&self, text: &str) -> Result<bool, TelegramError> {
        if !self.enabled || text.trim().is_empty() {
            return Ok(false);
        }
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);
        let text = truncate_html(text, MAX_TEXT_CHARS);

        let mut delivered = false;
        let mut last_err = None;
        for chat_id in &self.chat_ids {
            let body = json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            });
            match self.client.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!("Telegram delivered to {}", chat_id);
                    delivered = true;
                }
                Ok(resp) if resp.status().as_u16() == 409 => {
                    warn!("Telegram 409 Conflict for chat {}", chat_id);
                    last_err = Some(TelegramError::Conflict);
                }
                Ok(resp) => {
                    warn!("Telegram send failed for chat {}: {}", chat_id, resp.status());
                    last_err = Some(TelegramError::Http { status: resp.status().as_u16() });
                }
                Err(e) => {
                    warn!("Telegram error for chat {}: {}", chat_id, e);
                    last_err = Some(TelegramError::Transport(e));
                }
            }
        }

        match (delivered, last_err) {
            (true, _) => Ok(true),
            (false, Some(e)) => Err(e),
            (false, None) => Ok(false),
        }
    }

    /// Fire-and-log wrapper used by the day loop.
    pub async fn notify(&self, text: &str) {
        if let Err(e) = self.send(text).await {
            warn!("Telegram notify failed: {}", e);
        }
    }
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Cuts marked-up text to `max` chars without splitting an entity or a
/// tag, closing a `<b>` the cut left open.
pub fn truncate_html(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub("</b>".len())).collect();
    if let Some(lt) = out.rfind('<') {
        if !out[lt..].contains('>') {
            out.truncate(lt);
        }
    }
    if let Some(amp) = out.rfind('&') {
        if !out[amp..].contains(';') {
            out.truncate(amp);
        }
    }
    if out.matches("<b>").count() > out.matches("</b>").count() {
        out.push_str("</b>");
    }
    out
}

/// Escapes text for HTML parse mode.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn signed(d: Decimal) -> String {
    if d > Decimal::ZERO {
        format!("+{}", d)
    } else {
        d.to_string()
    }
}

pub fn startup_message(name: &str, worker_id: &str, shift: &str, symbol: &str, version: &str) -> String {
    format!(
        "🚀 <b>{}</b> v{} started\n\nWorker: {} ({})\nSymbol: {}",
        escape_html(name), version, escape_html(worker_id), shift, escape_html(symbol)
    )
}

pub fn trade_open_message(t: &PaperTrade) -> String {
    let emoji = match t.side {
        crate::core::types::OptionSide::Ce => "🟢",
        crate::core::types::OptionSide::Pe => "🔴",
    };
    format!(
        "{} <b>PAPER ENTRY</b> {} {}\n\n\
        Trigger: {} @ {}\n\
        Spot: {}\n\
        SL: {}\n\
        TP: {}\n\
        Qty: {}\n\
        Time: {}",
        emoji,
        escape_html(&t.symbol),
        t.side,
        t.trigger.shifted_label(),
        t.trigger_price,
        t.entry_spot,
        t.sl,
        t.tp,
        t.qty,
        format_ist(t.opened_at)
    )
}

pub fn trade_close_message(c: &ClosedTrade) -> String {
    let emoji = if c.pnl > Decimal::ZERO { "✅" } else if c.pnl < Decimal::ZERO { "❌" } else { "⚪" };
    let exit = c.exit_spot.map(|d| d.to_string()).unwrap_or_else(|| "—".to_string());
    format!(
        "{} <b>PAPER EXIT</b> {} {} ({})\n\n\
        Entry: {}\n\
        Exit: {}\n\
        Points: {}\n\
        P&amp;L: {}",
        emoji,
        escape_html(&c.trade.symbol),
        c.trade.side,
        c.reason,
        c.trade.entry_spot,
        exit,
        signed(c.pnl_points),
        signed(c.pnl)
    )
}

pub fn circuit_trip_message(symbol: &str, pause_mins: i64) -> String {
    format!(
        "⛔ <b>CIRCUIT BREAKER</b> {}\n\nRepeated stop-losses. New entries paused for {} min.",
        escape_html(symbol), pause_mins
    )
}

pub fn daily_summary_message(p: &DayPerformance) -> String {
    format!(
        "📊 <b>Daily Summary</b> {} {}\n\n\
        Trades: {} (W {} / L {})\n\
        Win rate: {}%\n\
        Avg P&amp;L: {}\n\
        Net P&amp;L: {}\n\
        Max drawdown: {}",
        escape_html(&p.symbol),
        p.date,
        p.trades,
        p.wins,
        p.losses,
        p.win_rate,
        signed(p.avg_pnl),
        signed(p.net_pnl),
        p.max_drawdown
    )
}

pub fn nightly_digest_message(rows: &[DayPerformance]) -> String {
    if rows.is_empty() {
        return "🌙 <b>Nightly digest</b>\n\nNo closed paper trades in the last week.".to_string();
    }
    let total: Decimal = rows.iter().map(|p| p.net_pnl).sum();
    let trades: u32 = rows.iter().map(|p| p.trades).sum();
    let mut lines = vec!["🌙 <b>Nightly digest</b>".to_string(), String::new()];
    for p in rows {
        lines.push(format!(
            "{} {}: {} trades, win {}%, net {}",
            p.date, escape_html(&p.symbol), p.trades, p.win_rate, signed(p.net_pnl)
        ));
    }
    lines.push(String::new());
    lines.push(format!("Week: {} trades, net {}", trades, signed(total)));
    lines.join("\n")
}

pub fn job_error_message(job: &str, err: &str) -> String {
    format!(
        "⚠️ <b>Job failed</b>: {}\n\n{}",
        escape_html(job),
        escape_html(&truncate_chars(err, 500))
    )
}

pub fn feed_gap_message(symbol: &str, seconds: u64, gaps: u32) -> String {
    format!(
        "⚠️ <b>Feed stale</b> {}\n\nNo fresh option chain for {}s ({} checks).",
        escape_html(symbol), seconds, gaps
    )
}

pub fn restart_message(restarts: u32, reason: &str) -> String {
    format!(
        "🔄 <b>KTW restarted</b> (#{} this hour)\n\n{}",
        restarts,
        escape_html(reason)
    )
}
