//! Core option-chain logic
//!
//! Everything here is pure: callers pass the clock in, nothing touches the
//! network or the journal.
//!
//! - `session`: IST wall clock and no-trade windows
//! - `levels`: S1/S2/R1/R2, PCR, max pain and market view from a chain
//! - `eligibility`: the C1..C6 entry checks and their rendering
//! - `health`: feed freshness monitor

pub mod types;
pub mod session;
pub mod levels;
pub mod eligibility;
pub mod health;

// Re-export commonly used types
pub use types::{LevelTag, MarketView, OiTrend, OptionSide, Snapshot, SnapshotSource};
pub use levels::{ChainStats, ShiftedLevels, SrLevels, StrikeRow};
pub use eligibility::{Eligibility, EligibilityInput, Verdict};
pub use health::{HealthMonitor, HealthStatus};
