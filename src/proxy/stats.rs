//! Batch summary statistics

use crate::proxy::models::{BatchStats, CheckResult};
use std::collections::HashSet;
use std::time::Duration;

impl BatchStats {
    /// Reduce a finished batch to its summary.
    ///
    /// Latency and fraud averages only consider alive results with a positive
    /// value; uniqueness is by `host:port`.
    pub fn compute(results: &[CheckResult], elapsed: Duration) -> Self {
        let total = results.len();
        let unique: HashSet<String> = results.iter().map(|r| r.proxy.key()).collect();
        let alive: Vec<&CheckResult> = results.iter().filter(|r| r.alive).collect();

        let latencies: Vec<u64> = alive
            .iter()
            .map(|r| r.latency_ms)
            .filter(|latency| *latency > 0)
            .collect();
        let scores: Vec<f64> = alive
            .iter()
            .map(|r| r.fraud_score)
            .filter(|score| *score > 0.0)
            .collect();

        let avg_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
        };
        let avg_fraud_score = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        let success_rate_pct = if total == 0 {
            0.0
        } else {
            alive.len() as f64 / total as f64 * 100.0
        };

        Self {
            total_proxies: total,
            unique_proxies: unique.len(),
            alive_proxies: alive.len(),
            avg_latency_ms,
            avg_fraud_score,
            success_rate_pct,
            total_processing_time_ms: elapsed.as_millis() as u64,
        }
    }
}
