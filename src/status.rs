//! Status file shared between the worker and `ktw status`

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct WorkerStatus {
    pub running: bool,
    pub worker_id: String,
    pub shift: String,
    pub symbol: String,
    pub version: String,
    /// RFC 3339
    pub start_time: String,
    pub last_heartbeat: String,
    pub last_refresh: String,
    pub refresh_status: String,
    pub spot: Option<f64>,
    pub mv: String,
    pub summary: String,
    pub open_trades: u32,
    pub trades_today: u32,
    pub pnl_today: String,
    pub circuit_paused: bool,
    pub last_verdict: String,
}

impl WorkerStatus {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if path.exists() {
            if let Ok(contents) = fs::read_to_string(path) {
                if let Ok(status) = serde_json::from_str(&contents) {
                    return status;
                }
            }
        }
        Self::default()
    }

    /// Lines printed by `ktw status`.
    pub fn render(&self) -> String {
        if self.worker_id.is_empty() {
            return "No status recorded yet".to_string();
        }
        let dash = |s: &str| if s.is_empty() { "—".to_string() } else { s.to_string() };
        [
            format!("Worker:      {} ({}) v{}", self.worker_id, self.shift, self.version),
            format!("Running:     {}", if self.running { "yes" } else { "no" }),
            format!("Started:     {}", dash(&self.start_time)),
            format!("Heartbeat:   {}", dash(&self.last_heartbeat)),
            format!("Symbol:      {}", self.symbol),
            format!(
                "Last OC:     {} [{}] spot={} MV={}",
                dash(&self.last_refresh),
                dash(&self.refresh_status),
                self.spot.map(|s| format!("{:.2}", s)).unwrap_or_else(|| "—".to_string()),
                dash(&self.mv)
            ),
            format!("Summary:     {}", dash(&self.summary)),
            format!("Verdict:     {}", dash(&self.last_verdict)),
            format!(
                "Trades:      {} today, {} open, pnl {}{}",
                self.trades_today,
                self.open_trades,
                dash(&self.pnl_today),
                if self.circuit_paused { " | CIRCUIT PAUSED" } else { "" }
            ),
        ]
        .join("\n")
    }
}
