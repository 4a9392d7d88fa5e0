//! Ambient supplements: completed-trade CSV audit trail and gateway
//! round-trip latency tracking. Neither is on the hot fill path — failures
//! here are logged and swallowed, never propagated into the engine.

use std::collections::VecDeque;
use std::io::Write;

use chrono::Utc;

use crate::grid::CompletedTrade;

/// Appends every `CompletedTrade` to a daily-rotated CSV under
/// `data/trades/<symbol>/<date>.csv`. Opt-in via `TRADE_LOG_ENABLED`.
pub fn log_completed_trade(symbol: &str, trade: &CompletedTrade) {
    let date = Utc::now().format("%Y-%m-%d").to_string();
    let dir = format!("data/trades/{}", symbol);
    let path = format!("{}/{}.csv", dir, date);

    if std::fs::create_dir_all(&dir).is_ok() {
        if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            let _ = writeln!(
                file,
                "{},{:.6},{:.6},{:.6},{:.6}",
                trade.closed_at.to_rfc3339(),
                trade.entry.price,
                trade.exit.price,
                trade.net_profit,
                trade.combined_fees,
            );
        }
    }
}

/// Rolling P95 of gateway round-trip latency, in microseconds.
pub struct LatencyAuditor {
    samples: VecDeque<u64>,
}

impl Default for LatencyAuditor {
    fn default() -> Self {
        Self { samples: VecDeque::new() }
    }
}

impl LatencyAuditor {
    pub fn record(&mut self, started_at_us: u64, finished_at_us: u64) {
        let delta = finished_at_us.saturating_sub(started_at_us);
        if self.samples.len() >= 10_000 {
            self.samples.pop_front();
        }
        self.samples.push_back(delta);
    }

    pub fn p95_us(&self) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = self.samples.iter().cloned().collect();
        sorted.sort_unstable();
        sorted[(sorted.len() as f64 * 0.95) as usize]
    }

    pub fn report(&self) -> String {
        if self.samples.is_empty() {
            return "no samples yet".to_string();
        }
        let avg = self.samples.iter().sum::<u64>() / self.samples.len() as u64;
        format!("latency avg={}us p95={}us", avg, self.p95_us())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p95_is_zero_with_no_samples() {
        let auditor = LatencyAuditor::default();
        assert_eq!(auditor.p95_us(), 0);
    }

    #[test]
    fn p95_reflects_recorded_samples() {
        let mut auditor = LatencyAuditor::default();
        for i in 1..=100u64 {
            auditor.record(0, i * 1000);
        }
        assert!(auditor.p95_us() >= 94_000);
    }
}
