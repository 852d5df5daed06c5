//! Core type definitions
//!
//! Option sides, level tags, market views and the option-chain snapshot that
//! flows from the feed through eligibility, exits and the journal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Option leg bought by a paper trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionSide {
    #[serde(rename = "CE")]
    Ce,
    #[serde(rename = "PE")]
    Pe,
}

impl OptionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionSide::Ce => "CE",
            OptionSide::Pe => "PE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CE" | "CALL" => Some(OptionSide::Ce),
            "PE" | "PUT" => Some(OptionSide::Pe),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            OptionSide::Ce => OptionSide::Pe,
            OptionSide::Pe => OptionSide::Ce,
        }
    }

    /// Levels this side may trigger from: supports for CE, resistances for PE.
    pub fn allowed_levels(&self) -> [LevelTag; 2] {
        match self {
            OptionSide::Ce => [LevelTag::S1, LevelTag::S2],
            OptionSide::Pe => [LevelTag::R1, LevelTag::R2],
        }
    }
}

impl fmt::Display for OptionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Support / resistance level name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LevelTag {
    S1,
    S2,
    R1,
    R2,
}

impl LevelTag {
    pub const ALL: [LevelTag; 4] = [LevelTag::S1, LevelTag::S2, LevelTag::R1, LevelTag::R2];

    pub fn as_str(&self) -> &'static str {
        match self {
            LevelTag::S1 => "S1",
            LevelTag::S2 => "S2",
            LevelTag::R1 => "R1",
            LevelTag::R2 => "R2",
        }
    }

    /// Label of the buffer-shifted level, e.g. `S1*`.
    pub fn shifted_label(&self) -> String {
        format!("{}*", self.as_str())
    }

    /// Accepts both plain and shifted labels.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().trim_end_matches('*').to_ascii_uppercase().as_str() {
            "S1" => Some(LevelTag::S1),
            "S2" => Some(LevelTag::S2),
            "R1" => Some(LevelTag::R1),
            "R2" => Some(LevelTag::R2),
            _ => None,
        }
    }

    pub fn is_support(&self) -> bool {
        matches!(self, LevelTag::S1 | LevelTag::S2)
    }
}

impl fmt::Display for LevelTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directional read of the chain (MV)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketView {
    Bullish,
    StrongBullish,
    BigMove,
    Bearish,
    StrongBearish,
    Sideways,
    #[default]
    Unknown,
}

impl MarketView {
    pub fn parse(s: &str) -> Self {
        let norm = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match norm.as_str() {
            "bullish" => MarketView::Bullish,
            "strong_bullish" => MarketView::StrongBullish,
            "big_move" | "big_move_possible" => MarketView::BigMove,
            "bearish" => MarketView::Bearish,
            "strong_bearish" => MarketView::StrongBearish,
            "sideways" | "neutral" => MarketView::Sideways,
            _ => MarketView::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketView::Bullish => "bullish",
            MarketView::StrongBullish => "strong_bullish",
            MarketView::BigMove => "big_move",
            MarketView::Bearish => "bearish",
            MarketView::StrongBearish => "strong_bearish",
            MarketView::Sideways => "sideways",
            MarketView::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != MarketView::Unknown
    }

    /// Side the view allows an entry on, if any.
    pub fn entry_side(&self) -> Option<OptionSide> {
        match self {
            MarketView::Bullish | MarketView::StrongBullish | MarketView::BigMove => {
                Some(OptionSide::Ce)
            }
            MarketView::Bearish | MarketView::StrongBearish => Some(OptionSide::Pe),
            MarketView::Sideways | MarketView::Unknown => None,
        }
    }

    /// True when the view points against an open position on `side`.
    pub fn opposes(&self, side: OptionSide) -> bool {
        self.entry_side() == Some(side.opposite())
    }
}

impl fmt::Display for MarketView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of an OI delta after the flat epsilon is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OiTrend {
    Up,
    Down,
    Flat,
    Na,
}

impl OiTrend {
    pub fn classify(delta: Option<f64>, eps: f64) -> Self {
        match delta {
            None => OiTrend::Na,
            Some(d) if d.is_nan() => OiTrend::Na,
            Some(d) if d > eps => OiTrend::Up,
            Some(d) if d < -eps => OiTrend::Down,
            Some(_) => OiTrend::Flat,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OiTrend::Up => "up",
            OiTrend::Down => "down",
            OiTrend::Flat => "flat",
            OiTrend::Na => "na",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotSource {
    Provider,
    Journal,
}

impl SnapshotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotSource::Provider => "provider",
            SnapshotSource::Journal => "journal",
        }
    }
}

/// One option-chain reading for a symbol, enriched with flags and staleness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub symbol: String,
    /// YYYY-MM-DD, empty when unknown
    pub expiry: String,
    pub spot: Option<f64>,
    pub s1: Option<f64>,
    pub s2: Option<f64>,
    pub r1: Option<f64>,
    pub r2: Option<f64>,
    pub pcr: Option<f64>,
    pub max_pain: Option<f64>,
    pub ce_oi_delta: Option<f64>,
    pub pe_oi_delta: Option<f64>,
    pub mv: MarketView,
    pub source: SnapshotSource,
    pub fetched_at: DateTime<Utc>,
    pub age_secs: u64,
    pub stale: bool,
    pub stale_reasons: Vec<String>,
    pub hold: bool,
    pub daily_cap_hit: bool,
    pub summary: String,
}

impl Snapshot {
    pub fn new(symbol: &str, source: SnapshotSource, fetched_at: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_ascii_uppercase(),
            expiry: String::new(),
            spot: None,
            s1: None,
            s2: None,
            r1: None,
            r2: None,
            pcr: None,
            max_pain: None,
            ce_oi_delta: None,
            pe_oi_delta: None,
            mv: MarketView::Unknown,
            source,
            fetched_at,
            age_secs: 0,
            stale: false,
            stale_reasons: Vec::new(),
            hold: false,
            daily_cap_hit: false,
            summary: String::new(),
        }
    }

    pub fn level(&self, tag: LevelTag) -> Option<f64> {
        match tag {
            LevelTag::S1 => self.s1,
            LevelTag::S2 => self.s2,
            LevelTag::R1 => self.r1,
            LevelTag::R2 => self.r2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_view_parse() {
        assert_eq!(MarketView::parse("Strong Bullish"), MarketView::StrongBullish);
        assert_eq!(MarketView::parse("big-move-possible"), MarketView::BigMove);
        assert_eq!(MarketView::parse(""), MarketView::Unknown);
        assert_eq!(MarketView::parse("??"), MarketView::Unknown);
    }

    #[test]
    fn test_market_view_sides() {
        assert_eq!(MarketView::BigMove.entry_side(), Some(OptionSide::Ce));
        assert_eq!(MarketView::StrongBearish.entry_side(), Some(OptionSide::Pe));
        assert_eq!(MarketView::Sideways.entry_side(), None);

        assert!(MarketView::Bearish.opposes(OptionSide::Ce));
        assert!(MarketView::Bullish.opposes(OptionSide::Pe));
        assert!(!MarketView::Unknown.opposes(OptionSide::Pe));
    }

    #[test]
    fn test_oi_trend_epsilon() {
        assert_eq!(OiTrend::classify(Some(5.0), 10.0), OiTrend::Flat);
        assert_eq!(OiTrend::classify(Some(-11.0), 10.0), OiTrend::Down);
        assert_eq!(OiTrend::classify(Some(0.1), 0.0), OiTrend::Up);
        assert_eq!(OiTrend::classify(Some(0.0), 0.0), OiTrend::Flat);
        assert_eq!(OiTrend::classify(None, 0.0), OiTrend::Na);
    }

    #[test]
    fn test_level_tag_parse() {
        assert_eq!(LevelTag::parse("s1*"), Some(LevelTag::S1));
        assert_eq!(LevelTag::parse("R2"), Some(LevelTag::R2));
        assert_eq!(LevelTag::parse("X"), None);
        assert_eq!(LevelTag::R1.shifted_label(), "R1*");
    }
}
