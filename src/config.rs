//! Configuration loader
//!
//! Static settings live in `config.toml`. Deployment secrets and per-shift
//! knobs are overlaid from the environment afterwards, grouped by prefix:
//! `TELEGRAM_*`, `OC_*`, `DHAN_*` (plus a few worker-level names).
//!
//! `GSHEET_*` variables from older deployments are recognised and reported as
//! ignored: the journal replaced the spreadsheet.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::core::session::{self, TimeWindow};

/// Which half of the day this worker is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ShiftMode {
    #[default]
    Day,
    Night,
}

impl ShiftMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DAY" => Some(ShiftMode::Day),
            "NIGHT" => Some(ShiftMode::Night),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftMode::Day => "DAY",
            ShiftMode::Night => "NIGHT",
        }
    }
}

impl fmt::Display for ShiftMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub system: SystemConfig,
    #[serde(default)]
    pub oc: OcConfig,
    #[serde(default)]
    pub dhan: DhanConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Per-symbol overrides keyed by upper-case symbol.
    #[serde(default)]
    pub symbols: HashMap<String, SymbolOverrides>,
    /// HOLD / daily-cap flags forced from the environment.
    #[serde(skip)]
    pub flags: OverrideFlags,
    /// Legacy variables present in the environment but no longer used.
    #[serde(skip)]
    pub ignored_env: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_worker_id")]
    pub worker_id: String,
    #[serde(default)]
    pub shift: ShiftMode,
    #[serde(default = "default_true")]
    pub auto_trade: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_worker_id() -> String {
    "DAY_A".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_refresh_day")]
    pub refresh_secs_day: u64,
    #[serde(default = "default_refresh_night")]
    pub refresh_secs_night: u64,
    /// Forces one cadence regardless of shift (`OC_REFRESH_SECS`).
    #[serde(default)]
    pub refresh_secs: Option<u64>,
    #[serde(default = "default_fresh_max_age")]
    pub fresh_max_age_secs: u64,
    #[serde(default = "default_max_snapshot_age")]
    pub max_snapshot_age_secs: u64,
    #[serde(default)]
    pub oi_flat_eps: f64,
    #[serde(default)]
    pub expiry: Option<String>,
    #[serde(default = "default_no_trade_windows")]
    pub no_trade_windows: Vec<String>,
}

fn default_symbol() -> String {
    "NIFTY".to_string()
}

fn default_refresh_day() -> u64 {
    10
}

fn default_refresh_night() -> u64 {
    60
}

fn default_fresh_max_age() -> u64 {
    90
}

fn default_max_snapshot_age() -> u64 {
    300
}

fn default_no_trade_windows() -> Vec<String> {
    vec!["09:15-09:30".to_string(), "14:45-15:15".to_string()]
}

impl Default for OcConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            refresh_secs_day: default_refresh_day(),
            refresh_secs_night: default_refresh_night(),
            refresh_secs: None,
            fresh_max_age_secs: default_fresh_max_age(),
            max_snapshot_age_secs: default_max_snapshot_age(),
            oi_flat_eps: 0.0,
            expiry: None,
            no_trade_windows: default_no_trade_windows(),
        }
    }
}

impl OcConfig {
    /// Refresh cadence for the shift, never below 3 seconds.
    pub fn refresh_secs_for(&self, shift: ShiftMode) -> u64 {
        let secs = self.refresh_secs.unwrap_or(match shift {
            ShiftMode::Day => self.refresh_secs_day,
            ShiftMode::Night => self.refresh_secs_night,
        });
        secs.max(3)
    }

    pub fn parsed_no_trade_windows(&self) -> Vec<TimeWindow> {
        self.no_trade_windows
            .iter()
            .filter_map(|w| {
                let parsed = TimeWindow::parse(w);
                if parsed.is_none() {
                    warn!("Ignoring invalid no-trade window {:?}", w);
                }
                parsed
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DhanConfig {
    #[serde(default = "default_dhan_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_underlying_seg")]
    pub underlying_seg: String,
    #[serde(default)]
    pub underlying_scrip: Option<u32>,
    #[serde(default = "default_scrip_map")]
    pub scrip_map: HashMap<String, u32>,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_cooldown_429")]
    pub cooldown_429_secs: u64,
}

fn default_dhan_base_url() -> String {
    "https://api.dhan.co/v2".to_string()
}

fn default_underlying_seg() -> String {
    "IDX_I".to_string()
}

fn default_scrip_map() -> HashMap<String, u32> {
    HashMap::from([
        ("NIFTY".to_string(), 13),
        ("BANKNIFTY".to_string(), 25),
        ("FINNIFTY".to_string(), 27),
    ])
}

fn default_http_timeout() -> u64 {
    12
}

fn default_max_retries() -> u32 {
    3
}

fn default_cooldown_429() -> u64 {
    30
}

impl Default for DhanConfig {
    fn default() -> Self {
        Self {
            base_url: default_dhan_base_url(),
            client_id: String::new(),
            access_token: String::new(),
            underlying_seg: default_underlying_seg(),
            underlying_scrip: None,
            scrip_map: default_scrip_map(),
            http_timeout_secs: default_http_timeout(),
            max_retries: default_max_retries(),
            cooldown_429_secs: default_cooldown_429(),
        }
    }
}

impl DhanConfig {
    /// Underlying scrip id: explicit value, then the symbol map, then NIFTY (13).
    pub fn scrip_for(&self, symbol: &str) -> u32 {
        self.underlying_scrip
            .or_else(|| self.scrip_map.get(&symbol.to_ascii_uppercase()).copied())
            .unwrap_or(13)
    }

    /// Cooldown after a 429, clamped to 10..=120 seconds.
    pub fn cooldown_429(&self) -> u64 {
        self.cooldown_429_secs.clamp(10, 120)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_ids: Vec<String>,
    /// Night/cron workers set this so they never talk to the bot.
    #[serde(default)]
    pub disabled: bool,
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bot_token: String::new(),
            chat_ids: Vec::new(),
            disabled: false,
            api_base: default_telegram_api(),
        }
    }
}

impl TelegramConfig {
    pub fn is_ready(&self) -> bool {
        self.enabled && !self.disabled && !self.bot_token.is_empty() && !self.chat_ids.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JournalConfig {
    #[serde(default = "default_journal_path")]
    pub path: String,
    #[serde(default = "default_status_file")]
    pub status_file: String,
    #[serde(default = "default_lock_dir")]
    pub lock_dir: String,
}

fn default_journal_path() -> String {
    "ktw_journal.db".to_string()
}

fn default_status_file() -> String {
    "ktw_status.json".to_string()
}

fn default_lock_dir() -> String {
    "/tmp".to_string()
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            path: default_journal_path(),
            status_file: default_status_file(),
            lock_dir: default_lock_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_trades")]
    pub max_trades_per_day: u32,
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: f64,
    #[serde(default = "default_max_exposure")]
    pub max_exposure_per_trade: f64,
    /// Fixed quantity; 0 sizes from `max_exposure_per_trade`.
    #[serde(default = "default_qty")]
    pub qty_per_trade: u32,
    #[serde(default = "default_point_value")]
    pub point_value: f64,
    #[serde(default)]
    pub circuit: CircuitConfig,
}

fn default_max_trades() -> u32 {
    6
}

fn default_daily_loss_limit() -> f64 {
    6000.0
}

fn default_max_exposure() -> f64 {
    3000.0
}

fn default_qty() -> u32 {
    1
}

fn default_point_value() -> f64 {
    1.0
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_trades_per_day: default_max_trades(),
            daily_loss_limit: default_daily_loss_limit(),
            max_exposure_per_trade: default_max_exposure(),
            qty_per_trade: default_qty(),
            point_value: default_point_value(),
            circuit: CircuitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitConfig {
    #[serde(default = "default_sl_threshold")]
    pub sl_threshold: u32,
    #[serde(default = "default_window_mins")]
    pub window_mins: u32,
    #[serde(default = "default_pause_mins")]
    pub pause_mins: u32,
}

fn default_sl_threshold() -> u32 {
    3
}

fn default_window_mins() -> u32 {
    15
}

fn default_pause_mins() -> u32 {
    20
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            sl_threshold: default_sl_threshold(),
            window_mins: default_window_mins(),
            pause_mins: default_pause_mins(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_near_cooldown")]
    pub near_cooldown_secs: u64,
}

fn default_near_cooldown() -> u64 {
    300
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            near_cooldown_secs: default_near_cooldown(),
        }
    }
}

impl AlertConfig {
    pub fn near_cooldown(&self) -> u64 {
        self.near_cooldown_secs.max(60)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_paper_tick")]
    pub paper_tick_secs: u64,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_flat_time")]
    pub flat_time: String,
    #[serde(default = "default_flatten_at")]
    pub flatten_at: String,
    #[serde(default = "default_eod_at")]
    pub eod_at: String,
    #[serde(default = "default_nightly_at")]
    pub nightly_at: String,
}

fn default_paper_tick() -> u64 {
    3
}

fn default_heartbeat() -> u64 {
    60
}

fn default_flat_time() -> String {
    "15:15".to_string()
}

fn default_flatten_at() -> String {
    "15:28".to_string()
}

fn default_eod_at() -> String {
    "15:31".to_string()
}

fn default_nightly_at() -> String {
    "20:00".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            paper_tick_secs: default_paper_tick(),
            heartbeat_secs: default_heartbeat(),
            flat_time: default_flat_time(),
            flatten_at: default_flatten_at(),
            eod_at: default_eod_at(),
            nightly_at: default_nightly_at(),
        }
    }
}

/// Optional per-symbol overrides; unset fields fall back to symbol defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SymbolOverrides {
    pub buffer_points: Option<f64>,
    pub entry_band: Option<f64>,
    pub target_min_points: Option<f64>,
    pub tp_points: Option<f64>,
    pub sl_points: Option<f64>,
    pub trail_trigger_points: Option<f64>,
    pub trail_offset_points: Option<f64>,
    pub mv_reversal_confirm: Option<u32>,
    pub stale_exit_confirm: Option<u32>,
}

/// Resolved per-symbol trading parameters, all in underlying points.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolParams {
    pub buffer_points: f64,
    pub entry_band: f64,
    pub target_min_points: f64,
    pub tp_points: f64,
    pub sl_points: f64,
    pub trail_trigger_points: f64,
    pub trail_offset_points: f64,
    pub mv_reversal_confirm: u32,
    pub stale_exit_confirm: u32,
}

impl SymbolParams {
    pub fn defaults_for(symbol: &str) -> Self {
        let (buffer, band, target, tp, sl, trig, off) = match symbol.to_ascii_uppercase().as_str() {
            "BANKNIFTY" => (30.0, 8.0, 80.0, 100.0, 60.0, 70.0, 40.0),
            "FINNIFTY" => (15.0, 4.0, 50.0, 60.0, 35.0, 45.0, 25.0),
            _ => (12.0, 3.0, 30.0, 40.0, 20.0, 25.0, 15.0),
        };
        Self {
            buffer_points: buffer,
            entry_band: band,
            target_min_points: target,
            tp_points: tp,
            sl_points: sl,
            trail_trigger_points: trig,
            trail_offset_points: off,
            mv_reversal_confirm: 2,
            stale_exit_confirm: 2,
        }
    }

    pub fn with_overrides(mut self, o: &SymbolOverrides) -> Self {
        if let Some(v) = o.buffer_points {
            self.buffer_points = v;
        }
        if let Some(v) = o.entry_band {
            self.entry_band = v;
        }
        if let Some(v) = o.target_min_points {
            self.target_min_points = v;
        }
        if let Some(v) = o.tp_points {
            self.tp_points = v;
        }
        if let Some(v) = o.sl_points {
            self.sl_points = v;
        }
        if let Some(v) = o.trail_trigger_points {
            self.trail_trigger_points = v;
        }
        if let Some(v) = o.trail_offset_points {
            self.trail_offset_points = v;
        }
        if let Some(v) = o.mv_reversal_confirm {
            self.mv_reversal_confirm = v.max(1);
        }
        if let Some(v) = o.stale_exit_confirm {
            self.stale_exit_confirm = v.max(1);
        }
        self
    }
}

/// HOLD / daily-cap flags forced through the environment. `None` defers to
/// the journal's params override tab.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverrideFlags {
    pub hold: Option<bool>,
    pub daily_cap_hit: Option<bool>,
}

/// Lenient boolean parsing used for env values and override cells.
pub fn parse_truthy(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" | "t" => Some(true),
        "0" | "false" | "no" | "n" | "off" | "f" => Some(false),
        _ => None,
    }
}

/// Parses "NIFTY=13,BANKNIFTY=25" (`;` also accepted).
pub fn parse_symbol_map(raw: &str) -> HashMap<String, u32> {
    raw.split([',', ';'])
        .filter_map(|part| {
            let (k, v) = part.split_once('=')?;
            let v: f64 = v.trim().parse().ok()?;
            Some((k.trim().to_ascii_uppercase(), v as u32))
        })
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

/// Splits a recipient list separated by commas, spaces or newlines.
pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split([',', ' ', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

type SymbolSetter = fn(&mut SymbolOverrides, f64);

const SYMBOL_ENV_KEYS: [(&str, SymbolSetter); 7] = [
    ("LEVEL_BUFFER", |o, v| o.buffer_points = Some(v)),
    ("ENTRY_BAND", |o, v| o.entry_band = Some(v)),
    ("TARGET_MIN_POINTS", |o, v| o.target_min_points = Some(v)),
    ("TP_POINTS", |o, v| o.tp_points = Some(v)),
    ("SL_POINTS", |o, v| o.sl_points = Some(v)),
    ("TRAIL_TRIGGER_POINTS", |o, v| o.trail_trigger_points = Some(v)),
    ("TRAIL_OFFSET_POINTS", |o, v| o.trail_offset_points = Some(v)),
];

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config = Self::from_toml_str(&contents)?;
        config.apply_env(|key| std::env::var(key).ok());

        config.ignored_env = std::env::vars()
            .map(|(k, _)| k)
            .filter(|k| k.starts_with("GSHEET_"))
            .collect();
        config.ignored_env.sort();
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(contents)?;
        config.oc.symbol = config.oc.symbol.trim().to_ascii_uppercase();
        config.symbols = config
            .symbols
            .into_iter()
            .map(|(k, v)| (k.to_ascii_uppercase(), v))
            .collect();
        Ok(config)
    }

    /// Overlays environment values. `lookup` is `std::env::var` in production.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let get_u64 = |key: &str| get(key).and_then(|v| v.parse::<f64>().ok()).map(|v| v as u64);

        // Worker
        if let Some(v) = get("WORKER_ID") {
            self.system.worker_id = v;
        }
        if let Some(mode) = get("SHIFT_MODE").as_deref().and_then(ShiftMode::parse) {
            self.system.shift = mode;
        }
        if let Some(v) = get("AUTO_TRADE").as_deref().and_then(parse_truthy) {
            self.system.auto_trade = v;
        }

        // Telegram
        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = v;
        }
        if let Some(v) = get("TELEGRAM_USER_ID").or_else(|| get("TELEGRAM_CHAT_ID")) {
            self.telegram.chat_ids = parse_recipients(&v);
        }
        if let Some(v) = get("TELEGRAM_DISABLED").as_deref().and_then(parse_truthy) {
            self.telegram.disabled = v;
        }

        // Option chain
        if let Some(primary) = get("OC_SYMBOL_PRIMARY") {
            self.oc.symbol = primary.to_ascii_uppercase();
        } else if let Some(list) = get("OC_SYMBOL") {
            if let Some(first) = list.split(',').map(str::trim).find(|s| !s.is_empty()) {
                self.oc.symbol = first.to_ascii_uppercase();
            }
        }
        if let Some(v) = get_u64("OC_REFRESH_SECS") {
            self.oc.refresh_secs = Some(v);
        }
        if let Some(v) = get("OC_EXPIRY") {
            self.oc.expiry = Some(v);
        }
        if let Some(v) = get_u64("OC_FRESH_MAX_AGE_SEC") {
            self.oc.fresh_max_age_secs = v;
        }
        if let Some(v) = get_u64("OC_MAX_SNAPSHOT_AGE_SEC") {
            self.oc.max_snapshot_age_secs = v;
        }
        if let Some(v) = get("OI_FLAT_EPS").and_then(|v| v.parse::<f64>().ok()) {
            self.oc.oi_flat_eps = v.abs();
        }

        // Dhan
        if let Some(v) = get("DHAN_CLIENT_ID") {
            self.dhan.client_id = v;
        }
        if let Some(v) = get("DHAN_ACCESS_TOKEN") {
            self.dhan.access_token = v;
        }
        if let Some(v) = get("DHAN_UNDERLYING_SEG") {
            self.dhan.underlying_seg = v;
        }
        if let Some(v) = get_u64("DHAN_UNDERLYING_SCRIP") {
            self.dhan.underlying_scrip = Some(v as u32);
        }
        if let Some(v) = get("DHAN_UNDERLYING_SCRIP_MAP") {
            self.dhan.scrip_map.extend(parse_symbol_map(&v));
        }
        if let Some(v) = get_u64("DHAN_429_COOLDOWN_SEC") {
            self.dhan.cooldown_429_secs = v;
        }
        if let Some(v) = get_u64("DHAN_HTTP_TIMEOUT") {
            self.dhan.http_timeout_secs = v.max(1);
        }
        if let Some(v) = get_u64("DHAN_HTTP_MAX_RETRIES") {
            self.dhan.max_retries = (v as u32).max(1);
        }

        // HOLD / daily cap
        let first_bool = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| get(k))
                .and_then(|v| parse_truthy(&v))
        };
        if let Some(v) = first_bool(&["HOLD_OVERRIDE", "SYSTEM_HOLD", "HOLD"]) {
            self.flags.hold = Some(v);
        }
        if let Some(v) = first_bool(&["DAILY_CAP_HIT", "DAILY_CAP", "CAP_HIT"]) {
            self.flags.daily_cap_hit = Some(v);
        }

        // Per-symbol points: NAME_<SYMBOL> wins over NAME.
        let symbol = self.oc.symbol.clone();
        let overrides = self.symbols.entry(symbol.clone()).or_default();
        for (base, set) in SYMBOL_ENV_KEYS {
            let value = get(&format!("{}_{}", base, symbol))
                .or_else(|| get(base))
                .and_then(|v| v.parse::<f64>().ok());
            if let Some(v) = value {
                set(overrides, v);
            }
        }
        if let Some(v) = get_u64("MV_REV_CONFIRM") {
            overrides.mv_reversal_confirm = Some(v as u32);
        }
        if let Some(v) = get_u64("STALE_EXIT_CONFIRM") {
            overrides.stale_exit_confirm = Some(v as u32);
        }
    }

    /// Parameters for the configured primary symbol.
    pub fn symbol_params(&self) -> SymbolParams {
        let base = SymbolParams::defaults_for(&self.oc.symbol);
        match self.symbols.get(&self.oc.symbol) {
            Some(o) => base.with_overrides(o),
            None => base,
        }
    }

    pub fn refresh_secs(&self) -> u64 {
        self.oc.refresh_secs_for(self.system.shift)
    }

    /// Redacted boot lines: which credentials are present, never their values.
    pub fn startup_summary(&self) -> Vec<String> {
        let set = |v: &str| if v.is_empty() { "MISSING" } else { "set" };
        let mut lines = vec![
            format!("WORKER_ID={} SHIFT={} AUTO_TRADE={}", self.system.worker_id, self.system.shift,
                if self.system.auto_trade { "on" } else { "off" }),
            format!("OC_SYMBOL={} refresh={}s", self.oc.symbol, self.refresh_secs()),
            format!("DHAN_CLIENT_ID={}", set(&self.dhan.client_id)),
            format!("DHAN_ACCESS_TOKEN={}", set(&self.dhan.access_token)),
            format!("DHAN_UNDERLYING_SCRIP={}", self.dhan.scrip_for(&self.oc.symbol)),
            format!("TELEGRAM={}", if self.telegram.is_ready() { "ready" } else { "off" }),
            format!("JOURNAL={}", self.journal.path),
        ];
        if self.flags.hold == Some(true) {
            lines.push("HOLD=forced".to_string());
        }
        if self.flags.daily_cap_hit == Some(true) {
            lines.push("DAILY_CAP=forced".to_string());
        }
        for key in &self.ignored_env {
            lines.push(format!("{} ignored: trades and snapshots are kept in the local journal", key));
        }
        lines
    }
}

/// Parses an "HH:MM" schedule entry, falling back to `default`.
pub fn schedule_time(raw: &str, default: &str) -> chrono::NaiveTime {
    session::parse_hhmm(raw)
        .or_else(|| session::parse_hhmm(default))
        .unwrap_or(chrono::NaiveTime::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "[system]\nname = \"KTW\"\n";

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(cfg.oc.symbol, "NIFTY");
        assert_eq!(cfg.system.shift, ShiftMode::Day);
        assert!(cfg.system.auto_trade);
        assert_eq!(cfg.refresh_secs(), 10);
        assert_eq!(cfg.dhan.scrip_for("BANKNIFTY"), 25);
        assert_eq!(cfg.risk.max_trades_per_day, 6);
        assert_eq!(cfg.oc.parsed_no_trade_windows().len(), 2);
    }

    #[test]
    fn test_symbol_defaults() {
        let bn = SymbolParams::defaults_for("banknifty");
        assert_eq!(bn.buffer_points, 30.0);
        assert_eq!(bn.entry_band, 8.0);
        assert_eq!(bn.target_min_points, 80.0);

        let unknown = SymbolParams::defaults_for("MIDCPNIFTY");
        assert_eq!(unknown, SymbolParams::defaults_for("NIFTY"));
    }

    #[test]
    fn test_env_overlay() {
        let mut cfg = Config::from_toml_str(MINIMAL).unwrap();
        cfg.apply_env(env(&[
            ("OC_SYMBOL", "banknifty, nifty"),
            ("SHIFT_MODE", "night"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_USER_ID", "111, 222"),
            ("DHAN_UNDERLYING_SCRIP_MAP", "BANKNIFTY=99"),
            ("LEVEL_BUFFER_BANKNIFTY", "35"),
            ("ENTRY_BAND", "5"),
            ("HOLD", "yes"),
            ("OC_REFRESH_SECS", "1"),
        ]));

        assert_eq!(cfg.oc.symbol, "BANKNIFTY");
        assert_eq!(cfg.system.shift, ShiftMode::Night);
        assert_eq!(cfg.telegram.chat_ids, vec!["111", "222"]);
        assert!(cfg.telegram.is_ready());
        assert_eq!(cfg.dhan.scrip_for("BANKNIFTY"), 99);
        assert_eq!(cfg.flags.hold, Some(true));
        assert_eq!(cfg.flags.daily_cap_hit, None);
        // Floor of three seconds.
        assert_eq!(cfg.refresh_secs(), 3);

        let p = cfg.symbol_params();
        assert_eq!(p.buffer_points, 35.0);
        assert_eq!(p.entry_band, 5.0);
        assert_eq!(p.target_min_points, 80.0);
    }

    #[test]
    fn test_primary_symbol_wins() {
        let mut cfg = Config::from_toml_str(MINIMAL).unwrap();
        cfg.apply_env(env(&[("OC_SYMBOL", "NIFTY"), ("OC_SYMBOL_PRIMARY", "finnifty")]));
        assert_eq!(cfg.oc.symbol, "FINNIFTY");
    }

    #[test]
    fn test_telegram_disabled_env() {
        let mut cfg = Config::from_toml_str(MINIMAL).unwrap();
        cfg.apply_env(env(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("TELEGRAM_CHAT_ID", "1"),
            ("TELEGRAM_DISABLED", "true"),
        ]));
        assert!(!cfg.telegram.is_ready());
    }

    #[test]
    fn test_cooldown_clamp() {
        let mut dhan = DhanConfig::default();
        dhan.cooldown_429_secs = 2;
        assert_eq!(dhan.cooldown_429(), 10);
        dhan.cooldown_429_secs = 600;
        assert_eq!(dhan.cooldown_429(), 120);
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_truthy("On"), Some(true));
        assert_eq!(parse_truthy("f"), Some(false));
        assert_eq!(parse_truthy("maybe"), None);

        let map = parse_symbol_map("nifty=13;BANKNIFTY = 25,bad,FIN=x");
        assert_eq!(map.get("NIFTY"), Some(&13));
        assert_eq!(map.get("BANKNIFTY"), Some(&25));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_startup_summary_redacts() {
        let mut cfg = Config::from_toml_str(MINIMAL).unwrap();
        cfg.apply_env(env(&[("DHAN_ACCESS_TOKEN", "secret-token")]));
        let lines = cfg.startup_summary().join("\n");
        assert!(lines.contains("DHAN_ACCESS_TOKEN=set"));
        assert!(lines.contains("DHAN_CLIENT_ID=MISSING"));
        assert!(!lines.contains("secret-token"));
    }

    #[test]
    fn test_symbol_table_overrides() {
        let toml = "[system]\nname = \"KTW\"\n[symbols.nifty]\ntp_points = 55.0\nmv_reversal_confirm = 0\n";
        let cfg = Config::from_toml_str(toml).unwrap();
        let p = cfg.symbol_params();
        assert_eq!(p.tp_points, 55.0);
        assert_eq!(p.mv_reversal_confirm, 1);
    }
}
