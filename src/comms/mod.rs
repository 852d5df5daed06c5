//! Communications Module
//!
//! - Telegram notifications (outbound only)
//! - Near-level alerts with per-level cooldown

pub mod alerts;
pub mod telegram;

pub use alerts::{AlertContext, NearAlerter};
pub use telegram::{Notifier, TelegramError};
