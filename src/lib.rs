//! KTW - option-chain paper trading worker
//!
//! Polls an index option chain during the IST session, derives S/R levels
//! and a market view, runs the C1..C6 entry checks against buffer-shifted
//! levels and manages paper trades, alerts and a local journal.
//!
//! # Layout
//!
//! - `core`: pure chain analytics, session clock, eligibility
//! - `feed`: option-chain providers and the snapshot refresher
//! - `trading`: risk guard, circuit breaker, paper book, exits
//! - `data`: SQLite journal and the event hold gate
//! - `comms`: Telegram notifier and near-level alerts
//! - `engine`: the day loop tying it together

pub mod core;
pub mod feed;
pub mod trading;
pub mod data;
pub mod comms;
pub mod config;
pub mod instance;
pub mod status;
pub mod engine;
