//! Option-chain analytics
//!
//! Turns a strike ladder into the numbers the worker trades on:
//! nearest support/resistance strikes around spot, PCR, a simplified max
//! pain, aggregate OI deltas and a market view.

use super::types::{LevelTag, MarketView, Snapshot};

/// One strike of the chain with current and previous-session OI
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StrikeRow {
    pub strike: f64,
    pub ce_oi: f64,
    pub ce_prev_oi: f64,
    pub pe_oi: f64,
    pub pe_prev_oi: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SrLevels {
    pub s1: f64,
    pub s2: f64,
    pub r1: f64,
    pub r2: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OiTotals {
    pub ce_oi: f64,
    pub pe_oi: f64,
    pub ce_delta: f64,
    pub pe_delta: f64,
}

/// Everything derived from a single chain fetch
#[derive(Debug, Clone, PartialEq)]
pub struct ChainStats {
    pub spot: f64,
    pub levels: Option<SrLevels>,
    pub pcr: f64,
    pub max_pain: Option<f64>,
    pub ce_oi_delta: f64,
    pub pe_oi_delta: f64,
    pub mv: MarketView,
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Nearest strikes around `spot`. `strikes` must be sorted ascending.
///
/// R1 is the first strike at or above spot (the last strike when spot is
/// above the ladder), R2 the one after it. S1/S2 are the two strikes below
/// R1's position, collapsing onto each other at the bottom of the ladder.
pub fn nearest_levels(spot: f64, strikes: &[f64]) -> Option<SrLevels> {
    let last = *strikes.last()?;
    let lo = strikes.partition_point(|&s| s < spot);

    let r1 = strikes.get(lo).copied().unwrap_or(last);
    let r2 = strikes.get(lo + 1).copied().unwrap_or(r1);
    let s1 = if lo >= 1 { strikes[lo - 1] } else { strikes[0] };
    let mut s2 = if lo >= 2 { strikes[lo - 2] } else { s1 };
    let mut s1 = s1;
    if s2 > s1 {
        std::mem::swap(&mut s1, &mut s2);
    }
    Some(SrLevels { s1, s2, r1, r2 })
}

pub fn oi_totals(rows: &[StrikeRow]) -> OiTotals {
    rows.iter().fold(OiTotals::default(), |acc, r| OiTotals {
        ce_oi: acc.ce_oi + r.ce_oi,
        pe_oi: acc.pe_oi + r.pe_oi,
        ce_delta: acc.ce_delta + (r.ce_oi - r.ce_prev_oi),
        pe_delta: acc.pe_delta + (r.pe_oi - r.pe_prev_oi),
    })
}

pub fn pcr(totals: &OiTotals) -> f64 {
    if totals.ce_oi > 0.0 {
        round2(totals.pe_oi / totals.ce_oi)
    } else {
        0.0
    }
}

/// Strike carrying the most combined OI. Rows must be sorted by strike;
/// ties resolve to the later strike.
pub fn max_pain(rows: &[StrikeRow]) -> Option<f64> {
    let mut best: Option<(f64, f64)> = None;
    for r in rows {
        let total = r.ce_oi + r.pe_oi;
        match best {
            Some((_, b)) if total < b => {}
            _ => best = Some((r.strike, total)),
        }
    }
    best.map(|(strike, _)| strike)
}

/// View straight from PCR: at most 0.75 bearish, at least 1.1 bullish.
pub fn view_from_pcr(pcr: f64) -> MarketView {
    if pcr <= 0.75 {
        MarketView::Bearish
    } else if pcr >= 1.1 {
        MarketView::Bullish
    } else {
        MarketView::Unknown
    }
}

/// Score-based view used when the provider has no opinion.
pub fn derive_view(
    pcr: Option<f64>,
    max_pain: Option<f64>,
    spot: Option<f64>,
    ce_delta: Option<f64>,
    pe_delta: Option<f64>,
) -> MarketView {
    let mut score = 0i32;
    if let Some(p) = pcr {
        score += if p >= 1.0 { 1 } else { -1 };
    }
    if let (Some(mp), Some(spot)) = (max_pain, spot) {
        score += if mp > spot { 1 } else { -1 };
    }

    if score > 0 {
        return MarketView::Bullish;
    }
    if score < 0 {
        return MarketView::Bearish;
    }
    match (ce_delta, pe_delta) {
        (Some(ce), Some(pe)) if pe > ce => MarketView::Bullish,
        (Some(ce), Some(pe)) if pe < ce => MarketView::Bearish,
        _ => MarketView::Unknown,
    }
}

/// Full analysis of one chain. Rows may arrive in any order.
pub fn analyze(spot: f64, rows: &[StrikeRow]) -> ChainStats {
    let mut sorted: Vec<StrikeRow> = rows.iter().copied().filter(|r| r.strike.is_finite()).collect();
    sorted.sort_by(|a, b| a.strike.total_cmp(&b.strike));

    let strikes: Vec<f64> = sorted.iter().map(|r| r.strike).collect();
    let totals = oi_totals(&sorted);
    let pcr = pcr(&totals);
    let mv = if totals.ce_oi > 0.0 {
        view_from_pcr(pcr)
    } else {
        MarketView::Unknown
    };

    ChainStats {
        spot,
        levels: nearest_levels(spot, &strikes),
        pcr,
        max_pain: max_pain(&sorted),
        ce_oi_delta: totals.ce_delta,
        pe_oi_delta: totals.pe_delta,
        mv,
    }
}

/// Levels moved away from spot by the symbol buffer (S - b, R + b)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShiftedLevels {
    pub s1: Option<f64>,
    pub s2: Option<f64>,
    pub r1: Option<f64>,
    pub r2: Option<f64>,
}

impl ShiftedLevels {
    pub fn from_snapshot(snap: &Snapshot, buffer: f64) -> Self {
        Self {
            s1: snap.s1.map(|v| v - buffer),
            s2: snap.s2.map(|v| v - buffer),
            r1: snap.r1.map(|v| v + buffer),
            r2: snap.r2.map(|v| v + buffer),
        }
    }

    pub fn get(&self, tag: LevelTag) -> Option<f64> {
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

    fn row(strike: f64, ce: f64, ce_prev: f64, pe: f64, pe_prev: f64) -> StrikeRow {
        StrikeRow { strike, ce_oi: ce, ce_prev_oi: ce_prev, pe_oi: pe, pe_prev_oi: pe_prev }
    }

    #[test]
    fn test_nearest_levels_mid_ladder() {
        let strikes = [24800.0, 24850.0, 24900.0, 24950.0, 25000.0, 25050.0];
        let lv = nearest_levels(24930.0, &strikes).unwrap();
        assert_eq!(lv.r1, 24950.0);
        assert_eq!(lv.r2, 25000.0);
        assert_eq!(lv.s1, 24900.0);
        assert_eq!(lv.s2, 24850.0);
    }

    #[test]
    fn test_nearest_levels_spot_on_strike() {
        let strikes = [100.0, 200.0, 300.0];
        let lv = nearest_levels(200.0, &strikes).unwrap();
        assert_eq!(lv.r1, 200.0);
        assert_eq!(lv.s1, 100.0);
        assert_eq!(lv.s2, 100.0);
        assert_eq!(lv.r2, 300.0);
    }

    #[test]
    fn test_nearest_levels_edges() {
        let strikes = [100.0, 200.0, 300.0];
        let below = nearest_levels(50.0, &strikes).unwrap();
        assert_eq!((below.s1, below.s2, below.r1, below.r2), (100.0, 100.0, 100.0, 200.0));

        let above = nearest_levels(999.0, &strikes).unwrap();
        assert_eq!(above.r1, 300.0);
        assert_eq!(above.r2, 300.0);
        assert_eq!(above.s1, 300.0);
        assert_eq!(above.s2, 200.0);

        assert!(nearest_levels(100.0, &[]).is_none());
    }

    #[test]
    fn test_pcr_and_totals() {
        let rows = [row(100.0, 1000.0, 900.0, 1500.0, 1600.0), row(200.0, 1000.0, 1000.0, 500.0, 300.0)];
        let t = oi_totals(&rows);
        assert_eq!(t.ce_delta, 100.0);
        assert_eq!(t.pe_delta, 100.0);
        assert_eq!(pcr(&t), 1.0);
        assert_eq!(pcr(&OiTotals::default()), 0.0);
    }

    #[test]
    fn test_max_pain_tie_goes_to_later_strike() {
        let rows = [row(100.0, 10.0, 0.0, 10.0, 0.0), row(200.0, 5.0, 0.0, 15.0, 0.0), row(300.0, 1.0, 0.0, 1.0, 0.0)];
        assert_eq!(max_pain(&rows), Some(200.0));
        assert_eq!(max_pain(&[]), None);
    }

    #[test]
    fn test_view_from_pcr() {
        assert_eq!(view_from_pcr(0.75), MarketView::Bearish);
        assert_eq!(view_from_pcr(1.1), MarketView::Bullish);
        assert_eq!(view_from_pcr(0.9), MarketView::Unknown);
    }

    #[test]
    fn test_derive_view() {
        assert_eq!(derive_view(Some(1.2), Some(101.0), Some(100.0), None, None), MarketView::Bullish);
        assert_eq!(derive_view(Some(0.8), Some(99.0), Some(100.0), None, None), MarketView::Bearish);
        // Score ties fall back to OI deltas
        assert_eq!(derive_view(Some(1.2), Some(99.0), Some(100.0), Some(5.0), Some(9.0)), MarketView::Bullish);
        assert_eq!(derive_view(Some(1.2), Some(99.0), Some(100.0), Some(9.0), Some(5.0)), MarketView::Bearish);
        assert_eq!(derive_view(None, None, None, Some(1.0), Some(1.0)), MarketView::Unknown);
    }

    #[test]
    fn test_analyze_unsorted_rows() {
        let rows = [
            row(25000.0, 800.0, 700.0, 400.0, 400.0),
            row(24900.0, 300.0, 300.0, 900.0, 800.0),
            row(24950.0, 500.0, 500.0, 500.0, 500.0),
        ];
        let stats = analyze(24930.0, &rows);
        let lv = stats.levels.unwrap();
        assert_eq!(lv.r1, 24950.0);
        assert_eq!(lv.s1, 24900.0);
        assert_eq!(stats.pcr, 1.13);
        assert_eq!(stats.mv, MarketView::Bullish);
        assert_eq!(stats.max_pain, Some(25000.0));
        assert_eq!(stats.ce_oi_delta, 100.0);
        assert_eq!(stats.pe_oi_delta, 100.0);
    }

    #[test]
    fn test_shifted_levels() {
        let mut snap = Snapshot::new("NIFTY", crate::core::types::SnapshotSource::Provider, chrono::Utc::now());
        snap.s1 = Some(24900.0);
        snap.r1 = Some(24950.0);
        let sh = ShiftedLevels::from_snapshot(&snap, 12.0);
        assert_eq!(sh.get(LevelTag::S1), Some(24888.0));
        assert_eq!(sh.get(LevelTag::R1), Some(24962.0));
        assert_eq!(sh.get(LevelTag::S2), None);
    }
}
