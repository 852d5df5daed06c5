//! Option-chain feed
//!
//! `dhan` talks to the Dhan v2 REST API; `refresh` wraps any provider with
//! the cadence cache, 429 cooldown and snapshot enrichment.

pub mod dhan;
pub mod refresh;

use thiserror::Error;

pub use dhan::{DhanClient, DhanProvider};
pub use refresh::{HoldFlags, OptionChainProvider, ProviderQuote, RefreshOutcome, RefreshStatus, SnapshotRefresher};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("rate limited (429)")]
    RateLimited,
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("decode: {0}")]
    Decode(String),
    #[error("no expiry available")]
    NoExpiry,
    #[error("credentials missing: {0}")]
    Credentials(&'static str),
}

impl FeedError {
    /// 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::RateLimited => true,
            FeedError::Http { status, .. } => *status >= 500,
            FeedError::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
