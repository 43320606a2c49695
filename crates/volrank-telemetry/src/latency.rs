//! Trade latency sampling.
//!
//! Samples accumulate between reports; each report summarizes and clears
//! them. Samples may be negative when the local clock trails the exchange.

use std::fmt;
use std::time::Duration;
use tracing::info;

/// Default reporting interval (60 seconds).
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Summary of one reporting interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyStats {
    pub min: i64,
    /// Arithmetic mean, rounded up.
    pub mean: i64,
    pub max: i64,
    pub count: usize,
}

impl fmt::Display for LatencyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min={}ms mean={}ms max={}ms (n={})",
            self.min, self.mean, self.max, self.count
        )
    }
}

/// Buffer of latency samples in milliseconds.
#[derive(Debug, Default)]
pub struct LatencyMonitor {
    samples: Vec<i64>,
}

impl LatencyMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one message and return its latency.
    pub fn record_sample(&mut self, event_ts_ms: i64, receive_ts_ms: i64) -> i64 {
        let latency = receive_ts_ms - event_ts_ms;
        self.samples.push(latency);
        latency
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Summarize, log and clear the buffer. An empty buffer yields `None`
    /// and logs nothing.
    pub fn flush_stats(&mut self) -> Option<LatencyStats> {
        let stats = summarize(&self.samples)?;
        self.samples.clear();
        info!(
            min_ms = stats.min,
            mean_ms = stats.mean,
            max_ms = stats.max,
            count = stats.count,
            "Trade latency"
        );
        Some(stats)
    }
}

fn summarize(samples: &[i64]) -> Option<LatencyStats> {
    let min = *samples.iter().min()?;
    let max = *samples.iter().max()?;
    let sum: i128 = samples.iter().map(|&s| i128::from(s)).sum();
    let count = samples.len();
    Some(LatencyStats {
        min,
        mean: div_ceil(sum, count as i128) as i64,
        max,
        count,
    })
}

fn div_ceil(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    if numerator % denominator > 0 {
        quotient + 1
    } else {
        quotient
    }
}
