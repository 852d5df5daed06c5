//! Paper trading
//!
//! Entries come from eligible snapshots; exits are evaluated on every paper
//! tick. The risk guard and circuit breaker gate new entries.

pub mod risk;
pub mod circuit;
pub mod exits;
pub mod paper;
pub mod performance;

pub use circuit::CircuitBreaker;
pub use exits::{ExitReason, ExitRules, TrailState};
pub use paper::{ClosedTrade, EntryOrder, PaperBook, PaperTrade};
pub use performance::DayPerformance;
pub use risk::RiskGuard;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

/// f64 chain value into money/points, rounded to 2 dp.
pub fn to_decimal(x: f64) -> Decimal {
    Decimal::from_f64(x).unwrap_or_default().round_dp(2)
}
