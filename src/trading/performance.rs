//! End-of-day performance over the day's closed paper trades

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayPerformance {
    pub date: NaiveDate,
    pub symbol: String,
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
    /// Percent, 2 dp
    pub win_rate: Decimal,
    pub avg_pnl: Decimal,
    pub gross_pnl: Decimal,
    pub net_pnl: Decimal,
    pub max_drawdown: Decimal,
}

/// `pnls` in close order. Break-even trades count as neither win nor loss.
pub fn compute(date: NaiveDate, symbol: &str, pnls: &[Decimal]) -> DayPerformance {
    let trades = pnls.len() as u32;
    let wins = pnls.iter().filter(|p| **p > Decimal::ZERO).count() as u32;
    let losses = pnls.iter().filter(|p| **p < Decimal::ZERO).count() as u32;
    let gross: Decimal = pnls.iter().copied().sum();

    let (win_rate, avg) = if trades > 0 {
        let n = Decimal::from(trades);
        (
            (Decimal::from(wins) * Decimal::ONE_HUNDRED / n).round_dp(2),
            (gross / n).round_dp(2),
        )
    } else {
        (Decimal::ZERO, Decimal::ZERO)
    };

    // Largest fall of cumulative pnl from its running peak (peak starts at 0)
    let mut cum = Decimal::ZERO;
    let mut peak = Decimal::ZERO;
    let mut max_dd = Decimal::ZERO;
    for p in pnls {
        cum += *p;
        peak = peak.max(cum);
        max_dd = max_dd.max(peak - cum);
    }

    DayPerformance {
        date,
        symbol: symbol.to_ascii_uppercase(),
        trades,
        wins,
        losses,
        win_rate,
        avg_pnl: avg,
        gross_pnl: gross,
        net_pnl: gross,
        max_drawdown: max_dd,
    }
}
